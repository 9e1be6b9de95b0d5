use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("empty message")]
    ErrEmptyMessage,
    #[error("malformed request line: {0}")]
    ErrMalformedRequestLine(String),
    #[error("malformed status line: {0}")]
    ErrMalformedStatusLine(String),
    #[error("malformed option line: {0}")]
    ErrMalformedOption(String),
    #[error("unsupported protocol: {0}")]
    ErrUnsupportedProtocol(String),
    #[error("message is not valid utf-8")]
    ErrInvalidUtf8,
    #[error("missing attribute: {0}")]
    ErrMissingAttribute(String),
    #[error("invalid attribute {0}: {1:?}")]
    ErrInvalidAttribute(String, String),
}
