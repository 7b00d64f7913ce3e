use thiserror::Error;

#[derive(Debug, Error)]
pub enum TracelineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata limit exceeded: attaching would reach {attempted} bytes against a {limit} byte ceiling")]
    MetadataLimit { attempted: usize, limit: usize },

    #[error("entity already closed: {0}")]
    Closed(String),

    #[error("emit error: {0}")]
    Emit(String),

    #[error("daemon proxy error: {0}")]
    Proxy(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TracelineError>;
