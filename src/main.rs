use anyhow::{Context, Error, Result};
use chrono::{DateTime, Utc};
use rand::prelude::*;
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::{env, net::SocketAddr, str::FromStr};
use tokio::fs;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use warp::{
    http,
    reply::{self, Reply},
    Filter, Rejection,
};

use controllers::{Newsletter, RecordWriter, SiteController};
use error::{QuizError, SiteError};
use models::{Audience, Config, Content, ContentKind, Tip, UserState};
use session::{OptionMark, Outcome, Phase, Progress, QuizSession, ScoreSummary, Transition};

mod chat;
mod controllers;
mod error;
mod filters;
mod models;
mod session;
mod token;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct ContentQuery {
    audience: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct TipQuery {
    category: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct TipListReply<'a> {
    tips: Vec<&'a Tip>,
}

#[derive(Clone, Debug, Serialize)]
struct ContentSummary<'a> {
    id: &'a str,
    title: &'a str,
    kind: ContentKind,
    audience: Audience,
    body: &'a str,
    file_url: Option<&'a str>,
    thumbnail_url: Option<&'a str>,
    question_count: usize,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a Content> for ContentSummary<'a> {
    fn from(content: &'a Content) -> ContentSummary<'a> {
        ContentSummary {
            id: &content.id,
            title: &content.title,
            kind: content.kind,
            audience: content.audience,
            body: &content.body,
            file_url: content.file_url.as_deref(),
            thumbnail_url: content.thumbnail_url.as_deref(),
            question_count: content.questions.len(),
            created_at: content.created_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct ContentListReply<'a> {
    content: Vec<ContentSummary<'a>>,
}

#[derive(Clone, Debug, Serialize)]
struct OptionView<'a> {
    text: &'a str,
    mark: OptionMark,
}

#[derive(Clone, Debug, Serialize)]
struct QuestionView<'a> {
    id: &'a str,
    prompt: &'a str,
    options: Vec<OptionView<'a>>,
    selected: Option<usize>,
    is_correct: Option<bool>,
    explanation: Option<&'a str>,
}

#[derive(Clone, Debug, Serialize)]
struct QuizReply<'a> {
    title: &'a str,
    phase: Phase,
    progress: Progress,
    score: ScoreSummary,
    question: Option<QuestionView<'a>>,
    outcome: Option<Outcome>,
    token: &'a str,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct AnswerRequest {
    answer: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ChatRequest {
    message: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ChatReply<'a> {
    response: &'a str,
    token: &'a str,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct NewsletterRequest {
    email: String,

    #[serde(default)]
    name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct NewsletterReply {
    subscribed: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ErrorReply {
    error: ErrorCode,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
enum ErrorCode {
    NotFound,
    MethodNotAllowed,
    InvalidBody,
    InvalidQuery,
    NoQuestionsAvailable,
    InvalidInput,
    InvalidEmail,
    AlreadySubscribed,
    EmptyMessage,
    Unauthorized,
    Internal,
}

/// Quiz operations that take no request body, named by their path segment.
#[derive(Clone, Copy, Debug)]
enum QuizAction {
    Confirm,
    Next,
    Restart,
}

impl FromStr for QuizAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<QuizAction> {
        match s {
            "confirm" => Ok(QuizAction::Confirm),
            "next" => Ok(QuizAction::Next),
            "restart" => Ok(QuizAction::Restart),
            _ => Err(anyhow::anyhow!("unknown quiz action {}", s)),
        }
    }
}

impl QuizAction {
    fn apply(self, session: &mut QuizSession) -> Transition {
        match self {
            QuizAction::Confirm => session.confirm_answer(),
            QuizAction::Next => session.advance(),
            QuizAction::Restart => {
                session.restart();
                Transition::Applied
            }
        }
    }
}

fn error_reply(error: ErrorCode, status: http::StatusCode) -> reply::Response {
    reply::with_status(reply::json(&ErrorReply { error }), status).into_response()
}

fn site_error_reply(err: &SiteError) -> reply::Response {
    let (code, status) = match err {
        SiteError::NotFound(_) => (ErrorCode::NotFound, http::StatusCode::NOT_FOUND),
        SiteError::Quiz(QuizError::NoQuestionsAvailable) => (
            ErrorCode::NoQuestionsAvailable,
            http::StatusCode::UNPROCESSABLE_ENTITY,
        ),
        SiteError::Quiz(QuizError::InvalidInput { .. }) => {
            (ErrorCode::InvalidInput, http::StatusCode::BAD_REQUEST)
        }
        SiteError::InvalidFilter { .. } => (ErrorCode::InvalidQuery, http::StatusCode::BAD_REQUEST),
        SiteError::InvalidEmail => (ErrorCode::InvalidEmail, http::StatusCode::BAD_REQUEST),
        SiteError::EmptyMessage => (ErrorCode::EmptyMessage, http::StatusCode::BAD_REQUEST),
        SiteError::AlreadySubscribed(_) => {
            (ErrorCode::AlreadySubscribed, http::StatusCode::CONFLICT)
        }
        SiteError::Quiz(_) | SiteError::Token(_) | SiteError::Internal(_) => {
            (ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    if status.is_server_error() {
        error!(%err, "request failed");
    } else {
        debug!(%err, "request rejected");
    }

    error_reply(code, status)
}

fn question_view(session: &QuizSession) -> QuestionView<'_> {
    let question = session.current_question();
    let state = session.state();

    let options = question
        .options
        .iter()
        .zip(session.option_marks())
        .map(|(text, mark)| OptionView {
            text: text.as_str(),
            mark,
        })
        .collect();

    QuestionView {
        id: &question.id,
        prompt: &question.prompt,
        options,
        selected: state.selected,
        is_correct: session.answered_correctly(),
        explanation: if state.revealed {
            Some(question.explanation.as_str())
        } else {
            None
        },
    }
}

/// Stores the session in the user's token and renders the quiz view.
fn quiz_reply(
    controller: &SiteController,
    content_id: &str,
    session: Result<QuizSession, SiteError>,
    mut user_state: UserState,
) -> reply::Response {
    let session = match session {
        Ok(session) => session,
        Err(err) => return site_error_reply(&err),
    };

    controller.save_session(content_id, &session, &mut user_state);

    let token = match controller.seal_user(&user_state) {
        Ok(token) => token,
        Err(err) => return site_error_reply(&err),
    };

    let title = controller
        .content(content_id)
        .map(|content| content.title.as_str())
        .unwrap_or(content_id);

    let score = session.score_summary();
    let (question, outcome) = if session.is_completed() {
        (None, Some(score.outcome(controller.pass_policy())))
    } else {
        (Some(question_view(&session)), None)
    };

    let reply = QuizReply {
        title,
        phase: session.phase(),
        progress: session.progress(),
        score,
        question,
        outcome,
        token: &token,
    };

    reply::json(&reply).into_response()
}

/// Turns warp's rejections into the same JSON error replies the handlers use.
async fn handle_rejection(err: Rejection) -> Result<reply::Response, Rejection> {
    let (code, status) = if err.is_not_found() {
        (ErrorCode::NotFound, http::StatusCode::NOT_FOUND)
    } else if err.find::<filters::Unauthorized>().is_some() {
        (ErrorCode::Unauthorized, http::StatusCode::UNAUTHORIZED)
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        debug!(%body_err, "rejecting request body");
        (ErrorCode::InvalidBody, http::StatusCode::BAD_REQUEST)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (ErrorCode::MethodNotAllowed, http::StatusCode::METHOD_NOT_ALLOWED)
    } else {
        error!(?err, "unhandled rejection");
        (ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
    };

    Ok(error_reply(code, status))
}

fn routes(
    controller: SiteController,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone + Send + Sync + 'static {
    let get_content = warp::path!("content")
        .and(warp::get())
        .and(
            warp::query::<ContentQuery>()
                .or(warp::any().map(ContentQuery::default))
                .unify(),
        )
        .and(filters::with_controller(controller.clone()))
        .map(|query: ContentQuery, controller: SiteController| {
            match controller.list_content(query.audience.as_deref()) {
                Ok(content) => {
                    let content = content.into_iter().map(ContentSummary::from).collect();
                    reply::json(&ContentListReply { content }).into_response()
                }
                Err(err) => site_error_reply(&err),
            }
        });

    let get_tips = warp::path!("tips")
        .and(warp::get())
        .and(
            warp::query::<TipQuery>()
                .or(warp::any().map(TipQuery::default))
                .unify(),
        )
        .and(filters::with_controller(controller.clone()))
        .map(|query: TipQuery, controller: SiteController| {
            let tips = controller.list_tips(query.category.as_deref());
            reply::json(&TipListReply { tips }).into_response()
        });

    let get_quiz = warp::path!("quiz" / String)
        .and(warp::get())
        .and(filters::user_state(controller.clone()))
        .and(filters::with_controller(controller.clone()))
        .map(
            |content_id: String, user_state: UserState, controller: SiteController| {
                let session = controller.open_quiz(&content_id, &user_state);
                quiz_reply(&controller, &content_id, session, user_state)
            },
        );

    let post_answer = warp::path!("quiz" / String / "answer")
        .and(warp::post())
        .and(warp::filters::body::json())
        .and(filters::user_state(controller.clone()))
        .and(filters::with_controller(controller.clone()))
        .map(
            |content_id: String,
             body: AnswerRequest,
             user_state: UserState,
             controller: SiteController| {
                let session = controller
                    .open_quiz(&content_id, &user_state)
                    .and_then(|mut session| {
                        let transition = session.select_answer(body.answer)?;
                        debug!(%content_id, answer = body.answer, ?transition, "select answer");
                        Ok(session)
                    });

                quiz_reply(&controller, &content_id, session, user_state)
            },
        );

    let post_action = warp::path!("quiz" / String / QuizAction)
        .and(warp::post())
        .and(filters::user_state(controller.clone()))
        .and(filters::with_controller(controller.clone()))
        .map(
            |content_id: String,
             action: QuizAction,
             user_state: UserState,
             controller: SiteController| {
                let session = controller
                    .open_quiz(&content_id, &user_state)
                    .map(|mut session| {
                        let transition = action.apply(&mut session);
                        debug!(%content_id, ?action, ?transition, "quiz action");
                        session
                    });

                quiz_reply(&controller, &content_id, session, user_state)
            },
        );

    let post_chat = warp::path!("chat")
        .and(warp::post())
        .and(warp::filters::body::json())
        .and(filters::user_state(controller.clone()))
        .and(filters::with_controller(controller.clone()))
        .and_then(
            |body: ChatRequest, user_state: UserState, controller: SiteController| async move {
                let response = match controller.chat(&body.message, &user_state).await {
                    Ok(response) => response,
                    Err(err) => return Ok::<_, Rejection>(site_error_reply(&err)),
                };

                let reply = match controller.seal_user(&user_state) {
                    Ok(token) => reply::json(&ChatReply {
                        response: &response,
                        token: &token,
                    })
                    .into_response(),
                    Err(err) => site_error_reply(&err),
                };

                Ok(reply)
            },
        );

    let post_newsletter = warp::path!("newsletter")
        .and(warp::post())
        .and(warp::filters::body::json())
        .and(filters::with_controller(controller))
        .and_then(
            |body: NewsletterRequest, controller: SiteController| async move {
                let reply = match controller
                    .subscribe(&body.email, body.name.as_deref())
                    .await
                {
                    Ok(()) => reply::json(&NewsletterReply { subscribed: true }).into_response(),
                    Err(err) => site_error_reply(&err),
                };

                Ok::<_, Rejection>(reply)
            },
        );

    get_content
        .or(get_tips)
        .or(get_quiz)
        .or(post_answer)
        .or(post_action)
        .or(post_chat)
        .or(post_newsletter)
        .recover(handle_rejection)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_err| EnvFilter::new("eco_quiz=info")),
        )
        .init();

    let bind_addr = env::var("BIND").unwrap_or_else(|_err| "127.0.0.1:3030".into());
    let bind_addr: SocketAddr = bind_addr.parse()?;

    let cors_origin = env::var("CORS_ORIGIN").unwrap_or_else(|_err| "http://localhost:5173".into());

    let secret_key = env::var("SECRET_KEY")
        .map_err(|err| Error::new(err))
        .and_then(|env| {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            hex::decode_to_slice(env, &mut secret_key)?;
            Ok(secret_key)
        })
        .or_else(|_err| -> Result<_> {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            rand::rngs::OsRng.fill(&mut secret_key);

            warn!("no secret key was specified, generated a new secret key");
            warn!("rerun with SECRET_KEY={}", hex::encode(secret_key));

            Ok(secret_key)
        })?;

    let secret_key = hmac::Key::new(hmac::HMAC_SHA256, secret_key.as_ref());

    let config_path = env::var("QUIZ_CONFIG").unwrap_or_else(|_err| "quiz.toml".into());
    let config = fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("couldn't read {}", config_path))?;
    let config: Config = toml::de::from_str(&config)
        .with_context(|| format!("couldn't parse {}", config_path))?;

    let chat_log = env::var("CHAT_LOG").unwrap_or_else(|_err| "chat_logs.csv".into());
    let chat_log = RecordWriter::new(&chat_log)?;

    let newsletter = env::var("NEWSLETTER_LOG").unwrap_or_else(|_err| "newsletter.csv".into());
    let newsletter = Newsletter::open(&newsletter)?;

    let controller = SiteController::new(secret_key, &config, chat_log, newsletter)?;

    let cors = warp::cors()
        .allow_origin(cors_origin.as_str())
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["Authorization", "Content-Type"]);

    info!(%bind_addr, %cors_origin, "listening");
    warp::serve(routes(controller).with(cors)).run(bind_addr).await;

    Ok(())
}
