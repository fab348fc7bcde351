use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error as ThisError;

use crate::data_type::DataType;
use crate::frame::{self, Frame};
use crate::handshake::HandshakeError;

/// An error reply sent by the server (`-ERR ...` or `!<len>\r\nERR ...`), kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerError(String);

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The error code, by convention the first word of the message (e.g. `WRONGTYPE`).
    pub fn kind(&self) -> &str {
        self.0.split_whitespace().next().unwrap_or_default()
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// The byte stream does not follow RESP3. The connection is out of sync and unusable.
    #[error("protocol error; {0}")]
    Protocol(#[from] frame::Error),
    #[error("io error; {0}")]
    Io(Arc<io::Error>),
    #[error("connection closed by the server")]
    ConnectionClosed,
    #[error("{0}")]
    Server(ServerError),
    /// The nil sentinel: the key or field does not exist.
    #[error("nil")]
    Nil,
    #[error("unexpected reply type; expected {expected}, got {actual}")]
    UnexpectedType {
        expected: DataType,
        actual: DataType,
    },
    #[error("cannot convert reply; {0}")]
    Conversion(String),
    #[error("command was not executed")]
    NotExecuted,
    #[error("protocol error; expected QUEUED, got {0:?}")]
    UnexpectedAck(Frame),
    #[error("transaction aborted")]
    TransactionAborted,
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("connection is unusable after a previous protocol or io error")]
    Poisoned,
    #[error("invalid connection uri; {0}")]
    InvalidUri(String),
    #[error("handshake failed; {0}")]
    Handshake(Box<HandshakeError>),
}

impl Error {
    /// Errors after which the connection must be discarded.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Protocol(err) => err.is_fatal(),
            Error::Io(_)
            | Error::ConnectionClosed
            | Error::UnexpectedAck(_)
            | Error::Poisoned => true,
            Error::Handshake(err) => err.source.is_fatal(),
            _ => false,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Error::Nil)
    }

    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Server(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(Box::new(err))
    }
}
