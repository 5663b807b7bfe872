use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use rand::prelude::*;
use ring::hmac;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{File, OpenOptions},
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::{debug, info, warn};

use crate::chat::ChatResponder;
use crate::error::{QuizError, SiteError};
use crate::models::{
    Audience, ChatLogRecord, Config, Content, ContentKind, NewsletterRecord, Tip, UserId,
    UserState,
};
use crate::session::{PassPolicy, QuizQuestion, QuizSession};
use crate::token::{TokenError, TokenSigner};

/// Treats a missing, blank or `all` filter as no filter.
fn filter_value(value: Option<&str>) -> Option<String> {
    value
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty() && value != "all")
}

#[derive(Clone, Debug)]
pub struct SiteController {
    tokens: TokenSigner,
    content: Arc<BTreeMap<String, Content>>,
    tips: Arc<Vec<Tip>>,
    quizzes: Arc<BTreeMap<String, Arc<[QuizQuestion]>>>,
    pass_policy: PassPolicy,
    chat: Arc<ChatResponder>,
    chat_log: RecordWriter,
    newsletter: Newsletter,
}

impl SiteController {
    pub fn new(
        secret_key: hmac::Key,
        config: &Config,
        chat_log: RecordWriter,
        newsletter: Newsletter,
    ) -> Result<SiteController> {
        let mut content = BTreeMap::new();
        let mut quizzes: BTreeMap<String, Arc<[QuizQuestion]>> = BTreeMap::new();

        for item in config.content.iter() {
            for question in item.questions.iter() {
                question
                    .validate()
                    .map_err(|err| anyhow!("content {}: {}", item.id, err))?;
            }

            if item.kind == ContentKind::Quiz {
                quizzes.insert(item.id.clone(), item.questions.clone().into());
            } else if !item.questions.is_empty() {
                warn!(content_id = %item.id, "ignoring questions on non-quiz content");
            }

            if content.insert(item.id.clone(), item.clone()).is_some() {
                bail!("duplicate content id {}", item.id);
            }
        }

        let mut tip_ids = BTreeSet::new();
        for tip in config.tip.iter() {
            if !tip_ids.insert(tip.id.as_str()) {
                bail!("duplicate tip id {}", tip.id);
            }
        }

        let mut tips = config.tip.clone();
        tips.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        info!(
            content = content.len(),
            tips = tips.len(),
            quizzes = quizzes.len(),
            chat_rules = config.chat.rule.len(),
            "loaded content"
        );

        Ok(SiteController {
            tokens: TokenSigner::new(secret_key),
            content: Arc::new(content),
            tips: Arc::new(tips),
            quizzes: Arc::new(quizzes),
            pass_policy: config.scoring,
            chat: Arc::new(ChatResponder::new(&config.chat)),
            chat_log,
            newsletter,
        })
    }

    pub fn create_user(&self) -> UserState {
        let id = {
            let mut id = [0u8; 16];
            rand::rngs::OsRng.fill(&mut id);
            UserId(id)
        };

        UserState {
            id,
            quizzes: Default::default(),
        }
    }

    pub fn open_user(&self, token: &str) -> Result<UserState, TokenError> {
        self.tokens.open(token)
    }

    pub fn seal_user(&self, user_state: &UserState) -> Result<String, SiteError> {
        Ok(self.tokens.seal(user_state)?)
    }

    pub fn pass_policy(&self) -> &PassPolicy {
        &self.pass_policy
    }

    pub fn content(&self, content_id: &str) -> Option<&Content> {
        self.content.get(content_id)
    }

    /// Content for the given audience, or everything, newest first.
    pub fn list_content(&self, audience: Option<&str>) -> Result<Vec<&Content>, SiteError> {
        let audience = match filter_value(audience) {
            None => None,
            Some(name) => Some(Audience::from_name(&name).ok_or(SiteError::InvalidFilter {
                field: "audience",
                value: name,
            })?),
        };

        let mut content = self
            .content
            .values()
            .filter(|item| audience.map_or(true, |audience| item.audience == audience))
            .collect::<Vec<_>>();

        content.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(content)
    }

    /// Tips in a category, or all of them, newest first. Categories are free
    /// text, so an unknown one simply has no tips.
    pub fn list_tips(&self, category: Option<&str>) -> Vec<&Tip> {
        let category = filter_value(category);

        self.tips
            .iter()
            .filter(|tip| {
                category
                    .as_ref()
                    .map_or(true, |category| tip.category.trim().to_lowercase() == *category)
            })
            .collect()
    }

    /// Picks up the user's saved session for a quiz, or starts a new one.
    pub fn open_quiz(&self, content_id: &str, user_state: &UserState) -> Result<QuizSession, SiteError> {
        let questions = self
            .quizzes
            .get(content_id)
            .ok_or_else(|| SiteError::NotFound(content_id.into()))?;

        let session = match user_state.quizzes.get(content_id) {
            None => QuizSession::start(questions.clone())?,
            Some(state) => match QuizSession::resume(questions.clone(), *state) {
                Ok(session) => session,
                Err(QuizError::StaleSession) => {
                    warn!(content_id, "saved quiz session no longer fits, starting over");
                    QuizSession::start(questions.clone())?
                }
                Err(err) => return Err(err.into()),
            },
        };

        Ok(session)
    }

    pub fn save_session(&self, content_id: &str, session: &QuizSession, user_state: &mut UserState) {
        debug!(content_id, state = ?session.state(), "saving quiz session");
        user_state
            .quizzes
            .insert(content_id.into(), session.state());
    }

    pub async fn chat(&self, message: &str, user_state: &UserState) -> Result<String, SiteError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SiteError::EmptyMessage);
        }

        let response = self.chat.respond(message).to_owned();

        let record = ChatLogRecord {
            session_id: hex::encode(&user_state.id.0),
            user_message: message.into(),
            ai_response: response.clone(),
            time: Utc::now(),
        };

        let chat_log = self.chat_log.clone();
        tokio::task::spawn_blocking(move || chat_log.write(&record))
            .await
            .map_err(|err| anyhow!("chat log task failed: {}", err))??;

        Ok(response)
    }

    pub async fn subscribe(&self, email: &str, name: Option<&str>) -> Result<(), SiteError> {
        self.newsletter.subscribe(email, name).await
    }
}

#[derive(Clone, Debug)]
pub struct RecordWriter {
    writer: Arc<Mutex<csv::Writer<File>>>,
}

impl RecordWriter {
    pub fn new(path: impl AsRef<Path>) -> Result<RecordWriter> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let writer = Arc::new(Mutex::new(writer));

        Ok(RecordWriter { writer })
    }

    pub fn write(&self, record: &impl Serialize) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_err| anyhow!("couldn't lock writer"))?;
        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone, Debug)]
pub struct Newsletter {
    subscribers: Arc<Mutex<BTreeSet<String>>>,
    writer: RecordWriter,
}

impl Newsletter {
    /// Opens the subscriber file, remembering everyone already in it.
    pub fn open(path: impl AsRef<Path>) -> Result<Newsletter> {
        let path = path.as_ref();
        let mut subscribers = BTreeSet::new();

        if path.exists() {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .from_path(path)?;

            for record in reader.deserialize() {
                let record: NewsletterRecord = record?;
                subscribers.insert(normalize_email(&record.email));
            }
        }

        let writer = RecordWriter::new(path)?;

        Ok(Newsletter {
            subscribers: Arc::new(Mutex::new(subscribers)),
            writer,
        })
    }

    pub async fn subscribe(&self, email: &str, name: Option<&str>) -> Result<(), SiteError> {
        let email = normalize_email(email);
        if !email.contains('@') || email.len() < 3 {
            return Err(SiteError::InvalidEmail);
        }

        {
            let mut subscribers = self
                .subscribers
                .lock()
                .map_err(|_err| anyhow!("couldn't lock subscribers"))?;

            if !subscribers.insert(email.clone()) {
                return Err(SiteError::AlreadySubscribed(email));
            }
        }

        let record = NewsletterRecord {
            email: email.clone(),
            name: name
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty()),
            time: Utc::now(),
        };

        let writer = self.writer.clone();
        let written = tokio::task::spawn_blocking(move || writer.write(&record))
            .await
            .map_err(|err| anyhow!("newsletter task failed: {}", err))
            .and_then(|result| result);

        if let Err(err) = written {
            if let Ok(mut subscribers) = self.subscribers.lock() {
                subscribers.remove(&email);
            }
            return Err(err.into());
        }

        info!("new newsletter subscriber");
        Ok(())
    }
}
