use serde::Deserialize;

const DEFAULT_FALLBACK: &str = "That's a great question about the environment! \
I can help with recycling, saving water and energy, climate change, composting \
and sustainable habits. Try asking about one of those topics.";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub fallback: Option<String>,

    #[serde(default)]
    pub rule: Vec<ChatRule>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRule {
    pub keywords: Vec<String>,
    pub response: String,
}

impl ChatRule {
    fn matches(&self, message: &str) -> bool {
        self.keywords.iter().any(|keyword| message.contains(keyword.as_str()))
    }
}

/// Canned replies picked by keyword. Rules are tried in order and the first
/// one with a keyword contained in the message answers it.
#[derive(Clone, Debug)]
pub struct ChatResponder {
    rules: Vec<ChatRule>,
    fallback: String,
}

impl ChatResponder {
    pub fn new(config: &ChatConfig) -> ChatResponder {
        let rules = config
            .rule
            .iter()
            .map(|rule| ChatRule {
                keywords: rule
                    .keywords
                    .iter()
                    .map(|keyword| keyword.trim().to_lowercase())
                    .filter(|keyword| !keyword.is_empty())
                    .collect(),
                response: rule.response.clone(),
            })
            .collect();

        let fallback = config
            .fallback
            .clone()
            .unwrap_or_else(|| DEFAULT_FALLBACK.into());

        ChatResponder { rules, fallback }
    }

    pub fn respond(&self, message: &str) -> &str {
        let message = message.to_lowercase();

        self.rules
            .iter()
            .find(|rule| rule.matches(&message))
            .map(|rule| rule.response.as_str())
            .unwrap_or(&self.fallback)
    }
}
