/// Core error type.
///
/// Adapter crates map their specific errors into this type so the pipeline can
/// decide between "start over", "retry later" and "tell the user why".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("external error: {0}")]
    External(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Failures of an outbound collaborator call that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::External(_) | Error::Store(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
