use serde_json::Value;

pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;

#[derive(thiserror::Error, Debug)]
pub enum ConsoleError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected the request (HTTP {status}){}", .message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    Rejected { status: u16, message: Option<String> },

    #[error("failed to decode backend payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("execution stream failed: {0}")]
    Stream(String),

    #[error("runtime unavailable: {0}")]
    Runtime(String),
}

impl ConsoleError {
    /// Message supplied by the backend, if the failure carried one
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ConsoleError::Rejected { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// What the operator sees: the backend's own words when present, the fallback otherwise
    pub fn user_message(&self, fallback: &str) -> String {
        self.server_message()
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }

    pub fn rejected(status: u16, body: &str) -> Self {
        ConsoleError::Rejected {
            status,
            message: message_from_body(body),
        }
    }
}

/// Pulls `message` (resources API) or `error` (plugins API) out of a JSON error body
pub fn message_from_body(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
