use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Optional per-turn metadata recorded alongside the content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: TurnMeta,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            created_at: Utc::now(),
            meta: TurnMeta::default(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            meta: TurnMeta::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fetched artifacts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a fetched artifact came from. Each kind keeps its own bounded
/// FIFO sequence inside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebSearch,
    BrowserScrape,
    PageInjected,
    ToolOutput,
}

impl SourceKind {
    /// Stable rendering order for [`render_for_llm`](crate::SessionStore::render_for_llm).
    pub const ALL: [SourceKind; 4] = [
        SourceKind::PageInjected,
        SourceKind::BrowserScrape,
        SourceKind::WebSearch,
        SourceKind::ToolOutput,
    ];

    /// The marker prefix each kind carries when rendered back to the LLM.
    ///
    /// These strings are load-bearing: the planner detects an injected page
    /// through them, and the scrape marker tells the model not to re-fetch.
    pub fn marker(self) -> &'static str {
        match self {
            SourceKind::PageInjected | SourceKind::BrowserScrape => {
                "[CURRENT PAGE CONTENT - Already scraped, do NOT re-scrape]: "
            }
            SourceKind::WebSearch => "[WEB SEARCH RESULTS]: ",
            SourceKind::ToolOutput => "[TOOL OUTPUTS]: ",
        }
    }
}

/// A single fetched item (search hit, scraped page, tool output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extras: HashMap<String, serde_json::Value>,
}

impl Artifact {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            origin_url: None,
            created_at: Utc::now(),
            extras: HashMap::new(),
        }
    }

    pub fn with_url(content: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            origin_url: Some(url.into()),
            ..Self::new(content)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub user_timezone: Option<String>,
    #[serde(default)]
    pub user_clock_iso: Option<String>,
    pub last_touched: Option<DateTime<Utc>>,
}

/// One session's full state: conversation, fetched artifacts, assembled
/// system prompt, and request metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub conversation: Vec<Turn>,
    #[serde(default)]
    pub fetched_context: HashMap<SourceKind, Vec<Artifact>>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

/// Counters reported by `stats()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub turn_count: usize,
    pub approx_tokens: usize,
    pub artifact_counts_by_kind: HashMap<String, usize>,
}
