/// Errors and the server error-code table.
use thiserror::Error;

/// Classification of a server-reported failure.
///
/// The admin protocol carries failures as a `(code, message)` pair; the code
/// selects the kind, the message is preserved verbatim. Codes outside the
/// table land on `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Generic server-side failure.
    General,
    /// Not enough live replicas to serve the operation.
    InsufficientNodes,
    /// The storage engine rejected the operation.
    StoreOperation,
    /// The write carried a vector clock not after the stored one.
    ObsoleteVersion,
    /// The named store does not exist on the node.
    UnknownStore,
    /// No in-progress operation with the given request id. The server reaps
    /// completed operations on status queries, so this also covers
    /// "already reaped".
    AsyncOperationNotFound,
    /// The node's metadata store rejected the key or value.
    InvalidMetadata,
    /// Code not present in the table.
    Unknown,
}

impl ServerErrorKind {
    pub fn from_code(code: u16) -> ServerErrorKind {
        match code {
            1 => ServerErrorKind::General,
            2 => ServerErrorKind::InsufficientNodes,
            3 => ServerErrorKind::StoreOperation,
            4 => ServerErrorKind::ObsoleteVersion,
            5 => ServerErrorKind::UnknownStore,
            6 => ServerErrorKind::AsyncOperationNotFound,
            7 => ServerErrorKind::InvalidMetadata,
            _ => ServerErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("socket error: {0}")]
    Socket(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("socket operation timed out")]
    SocketTimeout,

    #[error("timed out waiting for a pooled connection")]
    CheckoutTimeout,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("filter encoding failed: {0}")]
    FilterEncode(String),

    #[error("unknown node id {0}")]
    NodeNotFound(i32),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("invalid metadata payload: {0}")]
    InvalidMetadata(String),

    #[error("bad config: {0}")]
    Config(String),

    #[error("server error {code}: {message}")]
    Server {
        kind: ServerErrorKind,
        code: u16,
        message: String,
    },

    #[error("operation {request_id} did not finish within {max_wait_ms} ms")]
    AsyncWaitTimeout { request_id: i32, max_wait_ms: u64 },
}

impl Error {
    /// Map a server `(code, message)` pair into a typed failure.
    pub fn from_server(code: u32, message: &str) -> Error {
        let code = code as u16;
        Error::Server {
            kind: ServerErrorKind::from_code(code),
            code,
            message: message.to_string(),
        }
    }

    pub fn server_kind(&self) -> Option<ServerErrorKind> {
        match self {
            Error::Server { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
