use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A stored or supplied signature could not be decoded.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Query and candidate signatures do not share the fixed shape.
    #[error("incompatible signature: {0}")]
    IncompatibleSignature(String),

    #[error("signature store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    /// Every failure collected while scanning, reported once per run.
    #[error("duplicate scan failed with {} error(s): {}", .0.len(), summarize(.0))]
    ScanFailed(Vec<Error>),

    /// A worker pool or job thread could not start, or panicked.
    #[error("background job failed: {0}")]
    JobFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl Error {
    /// Per-image failures a batch operation logs and skips.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::MalformedSignature(_))
    }
}

fn summarize(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
