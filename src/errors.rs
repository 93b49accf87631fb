use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Credential not found: {0}")]
    MissingCredential(String),

    #[error("Credential rejected by the API (status 401): {0}")]
    Unauthorized(String),

    #[error("Access denied to model (status {status}): {message}")]
    AccessDenied { status: u16, message: String },

    #[error("API reported an error: {message}")]
    Api {
        message: String,
        kind: Option<String>,
    },

    #[error("Failed to send HTTP request: {0}")]
    HttpError(String),

    #[error("Failed to parse API response: {0}")]
    JsonError(String),

    #[error("Failed to access credential storage: {0}")]
    StorageError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ChatError {
    /// Access problems the user has to fix on their side (key or model access),
    /// as opposed to transient network failures.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. } | Self::Unauthorized(_))
    }

    /// Short text for an alert banner.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingCredential(name) => {
                format!("No {name} found. Run `llmium set-key <KEY>` to store one.")
            }
            Self::Unauthorized(_) => {
                "The API rejected your key. Check it with `llmium show-key`.".to_string()
            }
            Self::AccessDenied { .. } => {
                "Your API key does not have access to this model. Try another model.".to_string()
            }
            Self::Api { message, .. } => format!("The API returned an error: {message}"),
            Self::HttpError(_) => {
                "Network error while talking to the API. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(error: reqwest::Error) -> Self {
        ChatError::HttpError(error.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(error: serde_json::Error) -> Self {
        ChatError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(error: std::io::Error) -> Self {
        ChatError::StorageError(error.to_string())
    }
}
