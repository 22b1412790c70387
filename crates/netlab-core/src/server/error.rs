use thiserror::Error;

/// Errors raised while interpreting server addresses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("invalid server string '{input}': {reason}")]
    Parse { input: String, reason: String },
    #[error("unsupported server protocol '{0}'")]
    UnsupportedProtocol(String),
}

impl ServerError {
    pub(crate) fn parse(input: &str, reason: impl Into<String>) -> Self {
        ServerError::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
