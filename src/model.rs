use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a keyword is compared against page content
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-insensitive substring
    #[default]
    Fuzzy,
    /// Case-insensitive whole word
    Exact,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Fuzzy => "fuzzy",
            MatchMode::Exact => "exact",
        }
    }
}

/// One step of a feed extraction chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorStrategy {
    /// Selector for the record containers (e.g. `article`)
    pub container: String,
    /// Selectors tried in order inside a container for the record text.
    /// Falls back to the whole container text when none match.
    #[serde(default)]
    pub text: Vec<String>,
}

impl SelectorStrategy {
    pub fn new(container: &str, text: &[&str]) -> Self {
        Self {
            container: container.to_string(),
            text: text.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn default_strategies() -> Vec<SelectorStrategy> {
    let text = ["div.txt", "div.content", "div.Feed_body"];
    vec![
        SelectorStrategy::new("article", &text),
        SelectorStrategy::new("div.card-wrap", &text),
        SelectorStrategy::new("div.weibo-card", &text),
    ]
}

fn default_id_attributes() -> Vec<String> {
    vec!["mid".to_string(), "data-mid".to_string()]
}

fn default_record_limit() -> usize {
    10
}

/// How the match target is derived from fetched content
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extraction {
    /// The page as fetched is the match target
    #[default]
    Document,
    /// Many postable records per page, deduplicated by record identity
    Feed {
        #[serde(default = "default_strategies")]
        strategies: Vec<SelectorStrategy>,
        /// Attributes holding an explicit record id, tried in order
        #[serde(default = "default_id_attributes")]
        id_attributes: Vec<String>,
        /// Only the first N records are considered
        #[serde(default = "default_record_limit")]
        limit: usize,
    },
}

impl Extraction {
    /// Feed extraction with the default selector chain
    pub fn feed() -> Self {
        Extraction::Feed {
            strategies: default_strategies(),
            id_attributes: default_id_attributes(),
            limit: default_record_limit(),
        }
    }

    pub fn is_feed(&self) -> bool {
        matches!(self, Extraction::Feed { .. })
    }
}

/// A monitored URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    /// Display name used in notifications
    pub name: String,
    pub url: String,
    /// Advisory only; every enabled target is checked on each sweep
    pub interval_secs: u64,
    pub enabled: bool,
    #[serde(default)]
    pub extraction: Extraction,
    pub created_at: DateTime<Utc>,
}

impl Target {
    /// Create a new target with defaults
    pub fn new(name: String, url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            url,
            interval_secs: 300,
            enabled: true,
            extraction: Extraction::default(),
            created_at: Utc::now(),
        }
    }
}

/// A keyword armed on a target. Consumed by its first match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordRule {
    pub id: Uuid,
    pub target_id: Uuid,
    pub keyword: String,
    pub mode: MatchMode,
    pub created_at: DateTime<Utc>,
}

impl KeywordRule {
    pub fn new(target_id: Uuid, keyword: String, mode: MatchMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            keyword,
            mode,
            created_at: Utc::now(),
        }
    }
}

/// Audit record of one check outcome
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub target_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub found: bool,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Notification channel settings (singleton)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl ChannelConfig {
    /// Token with everything past the first 10 chars hidden
    pub fn masked_token(&self) -> String {
        if self.bot_token.chars().count() <= 10 {
            return "...".to_string();
        }
        let head: String = self.bot_token.chars().take(10).collect();
        format!("{}...", head)
    }
}
