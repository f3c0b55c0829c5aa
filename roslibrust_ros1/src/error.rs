//! Crate-private error type for protocol-level failures.
//!
//! Every public API converts this into [`roslibrust_common::Error`] at the
//! boundary.

use roslibrust_common::Error as CommonError;

#[derive(thiserror::Error, Debug)]
pub enum Ros1Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed TCPROS header: {0}")]
    MalformedHeader(String),
    #[error("connection header mismatch: {0}")]
    HeaderMismatch(String),
    #[error("peer reported error: {0}")]
    PeerError(String),
    #[error("xmlrpc fault (code {code}): {message}")]
    XmlRpcFault { code: i32, message: String },
    #[error("xmlrpc encode/decode error: {0}")]
    XmlRpc(String),
    #[error("invalid graph resource name: {0}")]
    InvalidName(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("no such node / service: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<Ros1Error> for CommonError {
    fn from(value: Ros1Error) -> Self {
        match value {
            Ros1Error::Io(e) => CommonError::IoError(e),
            Ros1Error::MalformedHeader(s) => CommonError::SerializationError(s),
            Ros1Error::HeaderMismatch(s) => CommonError::SerializationError(s),
            Ros1Error::PeerError(s) => CommonError::ServerError(s),
            Ros1Error::XmlRpcFault { code, message } => {
                CommonError::ServerError(format!("xmlrpc fault {code}: {message}"))
            }
            Ros1Error::XmlRpc(s) => CommonError::SerializationError(s),
            Ros1Error::InvalidName(s) => CommonError::InvalidName(s),
            Ros1Error::Timeout(s) => CommonError::Timeout(s),
            Ros1Error::NotFound(s) => CommonError::Unexpected(anyhow::anyhow!(s)),
            Ros1Error::Other(e) => CommonError::Unexpected(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Ros1Error>;
