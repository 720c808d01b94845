use std::sync::Arc;
use thiserror::Error;

/// Unified error type for the proxy core: protocol-level failures,
/// upstream failures, storage, and the ambient IO/config errors every
/// Rust service carries.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    #[error("malformed DNS query")]
    MalformedQuery,

    #[error("rate limited")]
    RateLimited,

    #[error("upstream query timed out")]
    UpstreamTimeout,
    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),
    #[error("upstream returned non-success rcode: {0:?}")]
    UpstreamProtocolError(crate::dns::RCode),
    #[error("all upstreams failed")]
    AllUpstreamsFailed,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("mapping not found: {0}")]
    MappingNotFound(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::IoError(Arc::new(err))
    }
}

/// Fatal, startup-time configuration errors.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("invalid upstream server: {0}")]
    InvalidUpstreamServer(String),
    #[error("invalid duration for {field}: {value}")]
    InvalidDuration { field: String, value: String },
    #[error("invalid integer for {field}: {value}")]
    InvalidInteger { field: String, value: String },
}

pub type Result<T> = std::result::Result<T, ProxyError>;
