use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /* mapped errors */
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    UrlError(#[from] url::ParseError),

    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),

    #[error(transparent)]
    SetLoggerError(#[from] log::SetLoggerError),

    #[error(transparent)]
    ErrnoError(#[from] nix::errno::Errno),

    /* heimdall errors */
    #[error("Unrecognized bridge reply: {0}")]
    UnrecognizedReply(serde_json::Value),

    #[error("Bridge not found: {0}")]
    BridgeNotFound(String),

    #[error("Cannot read state file {0}: {1}")]
    StateFile(Utf8PathBuf, String),

    #[error("Service error: {0}")]
    ServiceError(String),
}

impl ApiError {
    pub fn service_error(msg: impl AsRef<str>) -> Self {
        Self::ServiceError(msg.as_ref().to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
