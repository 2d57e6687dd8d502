use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which wire protocol an alias speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI chat-completions wire format (OpenAI, DeepSeek, vLLM, ...).
    OpenaiCompat,
    Anthropic,
    Google,
}

/// One entry of the model-alias table: the client-facing alias plus
/// everything needed to build the provider handle for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAlias {
    pub kind: ProviderKind,
    /// Provider-side model identifier (e.g. `gpt-4o-mini`).
    pub model: String,
    pub base_url: String,
    /// Env var the API key is read from at startup.
    pub key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Alias → provider mapping. The table is fixed at startup; requests
    /// referencing an alias outside it fail with MODEL_UNKNOWN.
    #[serde(default = "d_aliases")]
    pub aliases: BTreeMap<String, ModelAlias>,
    /// Alias used when a request does not name a model.
    #[serde(default = "d_default_alias")]
    pub default_alias: String,
    /// Small/cheap alias for the research operators (analyzer, gap
    /// detector). Distinct from the synthesis model.
    #[serde(default = "d_analysis_alias")]
    pub analysis_alias: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            aliases: d_aliases(),
            default_alias: d_default_alias(),
            analysis_alias: d_analysis_alias(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_alias() -> String {
    "gpt-4o".into()
}

fn d_analysis_alias() -> String {
    "gpt-4o-mini".into()
}

fn d_aliases() -> BTreeMap<String, ModelAlias> {
    let mut aliases = BTreeMap::new();
    aliases.insert(
        "gpt-4o".into(),
        ModelAlias {
            kind: ProviderKind::OpenaiCompat,
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            key_env: "OPENAI_API_KEY".into(),
        },
    );
    aliases.insert(
        "gpt-4o-mini".into(),
        ModelAlias {
            kind: ProviderKind::OpenaiCompat,
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            key_env: "OPENAI_API_KEY".into(),
        },
    );
    aliases.insert(
        "claude-sonnet".into(),
        ModelAlias {
            kind: ProviderKind::Anthropic,
            model: "claude-sonnet-4-20250514".into(),
            base_url: "https://api.anthropic.com".into(),
            key_env: "ANTHROPIC_API_KEY".into(),
        },
    );
    aliases.insert(
        "gemini-flash".into(),
        ModelAlias {
            kind: ProviderKind::Google,
            model: "gemini-2.0-flash".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            key_env: "GOOGLE_API_KEY".into(),
        },
    );
    aliases.insert(
        "deepseek-chat".into(),
        ModelAlias {
            kind: ProviderKind::OpenaiCompat,
            model: "deepseek-chat".into(),
            base_url: "https://api.deepseek.com/v1".into(),
            key_env: "DEEPSEEK_API_KEY".into(),
        },
    );
    aliases
}
