use thiserror::Error;

use crate::token::TokenError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("no questions available")]
    NoQuestionsAvailable,

    #[error("answer {index} is out of range for a question with {options} options")]
    InvalidInput { index: usize, options: usize },

    #[error("question {id} has no option at index {correct}")]
    MalformedQuestion { id: String, correct: usize },

    #[error("session state does not fit the quiz questions")]
    StaleSession,
}

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("content {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Quiz(#[from] QuizError),

    #[error("unknown {field} {value}")]
    InvalidFilter { field: &'static str, value: String },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("invalid email address")]
    InvalidEmail,

    #[error("{0} is already subscribed")]
    AlreadySubscribed(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
