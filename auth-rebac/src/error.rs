use thiserror::Error;

/// Failure kinds surfaced by the gateway.
///
/// Absence of a tuple is never an error: it reads as "no permission".
#[derive(Error, Debug)]
pub enum RebacError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Permission engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Traversal limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable classification of a [`RebacError`] for collaborator layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Forbidden,
    InvalidRequest,
    EngineUnavailable,
    LimitExceeded,
    Config,
}

impl ErrorKind {
    /// HTTP status a transport layer should answer with.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Forbidden => 403,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::EngineUnavailable => 503,
            ErrorKind::LimitExceeded => 422,
            ErrorKind::Config => 500,
        }
    }
}

impl RebacError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RebacError::Forbidden(_) => ErrorKind::Forbidden,
            RebacError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RebacError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            RebacError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            RebacError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<reqwest::Error> for RebacError {
    fn from(err: reqwest::Error) -> Self {
        RebacError::EngineUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for RebacError {
    fn from(err: config::ConfigError) -> Self {
        RebacError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RebacError>;
