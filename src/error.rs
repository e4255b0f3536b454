use thiserror::Error as ThisError;

/// Error type returned by every coordination operation.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced entity is absent, or is owned by a different peer.
    #[error("not found error: {0}")]
    NotFoundError(NotFoundKind),
    /// The media engine refused the operation. The message carries the engine detail.
    #[error("engine rejected error")]
    EngineRejectedError,
    /// The engine handle behind the transport or producer has already been closed.
    #[error("already closed error: {0}")]
    AlreadyClosedError(ClosedKind),
}

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    #[error("peer")]
    Peer,
    #[error("transport")]
    Transport,
    #[error("producer")]
    Producer,
}

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedKind {
    #[error("transport")]
    Transport,
    #[error("producer")]
    Producer,
}

impl Error {
    pub fn new_not_found(message: String, kind: NotFoundKind) -> Error {
        Error {
            kind: ErrorKind::NotFoundError(kind),
            message,
        }
    }

    pub fn new_engine(message: String) -> Error {
        Error {
            kind: ErrorKind::EngineRejectedError,
            message,
        }
    }

    pub fn new_already_closed(message: String, kind: ClosedKind) -> Error {
        Error {
            kind: ErrorKind::AlreadyClosedError(kind),
            message,
        }
    }

    pub fn peer_not_found(peer_id: &str) -> Error {
        Error::new_not_found(format!("Peer not found: {}", peer_id), NotFoundKind::Peer)
    }

    pub fn transport_not_found(transport_id: &str) -> Error {
        Error::new_not_found(
            format!("Transport not found: {}", transport_id),
            NotFoundKind::Transport,
        )
    }

    pub fn producer_not_found(producer_id: &str) -> Error {
        Error::new_not_found(
            format!("Producer not found: {}", producer_id),
            NotFoundKind::Producer,
        )
    }

    pub fn is_not_found(&self, kind: NotFoundKind) -> bool {
        self.kind == ErrorKind::NotFoundError(kind)
    }

    pub fn is_engine_rejected(&self) -> bool {
        self.kind == ErrorKind::EngineRejectedError
    }

    pub fn is_already_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::AlreadyClosedError(_))
    }
}
