use std::path::PathBuf;

use thiserror::Error;

use crate::locale;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config.toml: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failures talking to the generative model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("No API key configured. Set GEMINI_API_KEY or add your key to config.toml.")]
    MissingApiKey,
    #[error("Request timed out.")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("Response blocked: {0}")]
    Blocked(String),
    #[error("Unexpected API response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub(crate) fn from_status(status: u16) -> Self {
        let message = match status {
            400 => "Bad request",
            401 | 403 => "Invalid API key",
            404 => "Unknown model",
            429 => "Rate limited",
            500 | 503 => "API server error",
            _ => "API error",
        };
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to read image file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not an http(s) image URL: {0}")]
    InvalidUrl(String),
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("{url} refused to serve the image to this client")]
    CrossOrigin { url: String },
}

impl AcquisitionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io { .. } => locale::FILE_READ_FAILED,
            Self::InvalidUrl(_) | Self::Fetch { .. } => locale::URL_FETCH_FAILED,
            Self::CrossOrigin { .. } => locale::URL_CROSS_ORIGIN,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("model returned no text")]
    EmptyResponse,
    #[error("model returned malformed plant data: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ExtractionError {
    /// All extraction failures collapse into one message; details are only logged.
    pub fn user_message(&self) -> &'static str {
        locale::IDENTIFY_FAILED
    }
}

#[derive(Debug, Error)]
pub enum ChatTurnError {
    #[error("a chat turn is already in flight")]
    TurnInFlight,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ChatTurnError {
    pub fn user_message(&self) -> &'static str {
        locale::CHAT_FAILED
    }
}
