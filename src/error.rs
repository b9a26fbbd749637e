use thiserror::Error;

/// Failures that end a poll cycle without touching the stored snapshot
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Request to exchange failed: {0}")]
    Transport(String),

    #[error("Exchange returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Exchange rejected request (retCode {code}): {message}")]
    Api { code: i64, message: String },

    #[error("Failed to parse exchange response: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Short label used in logs and the state file
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Configuration(_) => "configuration",
            ExchangeError::Transport(_) => "transport",
            ExchangeError::Http { .. } => "http",
            ExchangeError::Api { .. } => "api",
            ExchangeError::Parse(_) => "parse",
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Transport(format!("request timed out: {}", err))
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Parse(err.to_string())
    }
}
