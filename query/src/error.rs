use protocol::DecodeError;
use thiserror::Error;

/// Ways a single probe of a server can fail
#[derive(Error, Debug)]
pub enum QueryError {
    /// The address could not be turned into an IPv4 socket address
    #[error("failed to resolve {address}: {reason}")]
    Resolve { address: String, reason: String },

    /// No response arrived before the probe deadline
    #[error("socket read timed out")]
    Timeout,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The response parsed badly; nothing from it is used
    #[error("malformed response: {0}")]
    Malformed(#[from] DecodeError),
}

impl QueryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryError::Timeout)
    }

    /// Short stable label for logs and counters
    pub fn as_label(&self) -> &'static str {
        match self {
            QueryError::Resolve { .. } => "resolve",
            QueryError::Timeout => "timeout",
            QueryError::Io(_) => "io",
            QueryError::Malformed(_) => "malformed",
        }
    }
}
