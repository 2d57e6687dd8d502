/// Shared error type used across all FinSearch crates.
///
/// Variants map one-to-one onto the error kinds the gateway surfaces:
/// user-actionable errors become HTTP status + envelope, everything else is
/// logged in full and returned as a generic 500.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("unknown model alias: {0}")]
    ModelUnknown(String),

    #[error("provider {provider}: {message}")]
    Upstream { provider: String, message: String },

    #[error("tool {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("rejected expression: {0}")]
    ToolInputRejected(String),

    #[error("turn budget exceeded after {turns} turns")]
    TurnBudgetExceeded {
        turns: u32,
        /// Text accumulated before the budget ran out.
        partial: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("planner: {0}")]
    Plan(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is safe to show to the client verbatim.
    ///
    /// Upstream provider detail, IO paths, and internal messages must never
    /// reach the client; they are logged and replaced with a generic message.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::InputInvalid(_)
                | Error::Auth(_)
                | Error::ModelUnknown(_)
                | Error::ToolInputRejected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
