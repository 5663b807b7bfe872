use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chat::ChatConfig;
use crate::session::{PassPolicy, QuizQuestion, SessionState};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub content: Vec<Content>,

    #[serde(default)]
    pub tip: Vec<Tip>,

    #[serde(default)]
    pub scoring: PassPolicy,

    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Article,
    Video,
    Download,
    Quiz,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Children,
    Youth,
    Adults,
}

impl Audience {
    pub fn from_name(name: &str) -> Option<Audience> {
        match name {
            "children" => Some(Audience::Children),
            "youth" => Some(Audience::Youth),
            "adults" => Some(Audience::Adults),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Content {
    pub id: String,
    pub title: String,
    pub kind: ContentKind,
    pub audience: Audience,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub file_url: Option<String>,

    #[serde(default)]
    pub thumbnail_url: Option<String>,

    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Tip {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub difficulty: String,
    pub impact_level: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserId(pub [u8; 16]);

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserState {
    pub id: UserId,
    pub quizzes: BTreeMap<String, SessionState>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatLogRecord {
    pub session_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub time: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewsletterRecord {
    pub email: String,
    pub name: Option<String>,
    pub time: DateTime<Utc>,
}
