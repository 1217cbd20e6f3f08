use thiserror::Error;

/// Fallback shown when the backend rejects a request without a message.
pub const GENERIC_BACKEND_MESSAGE: &str = "The server could not complete the request";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to fetch {what}")]
    Transport {
        what: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{0}")]
    Validation(String),

    #[error("server responded {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("unexpected response for {what}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read {path}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Builds a backend error from a response body, preferring the payload's
    /// `error` or `message` field.
    pub fn from_body(status: u16, body: &str) -> Self {
        Self::Backend {
            status,
            message: extract_message(body).unwrap_or_else(|| GENERIC_BACKEND_MESSAGE.to_string()),
        }
    }
}

pub fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message", "detail"]
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(|field| field.as_str().map(str::trim).filter(|s| !s.is_empty()))
        .map(str::to_string)
}
