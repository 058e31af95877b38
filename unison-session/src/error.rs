use thiserror::Error;

pub use unison_core::ProtocolError;

/// Failures surfaced by the underlying broadcast transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The outbound channel to the transport is closed.
    #[error("transport channel closed")]
    ChannelClosed,
    /// An outbound event could not be encoded for the wire.
    #[error("could not encode outbound event: {0}")]
    Encode(#[from] ProtocolError),
}

/// Errors returned by the session facade. Rejected operations never mutate
/// shared state; the coordinator stays in its prior consistent state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has not been initialized")]
    NotInitialized,
    #[error("session is already initialized")]
    AlreadyInitialized,
    #[error("no track is loaded")]
    NoTrack,
    #[error("`{operation}` is disabled by the control policy")]
    Blocked { operation: &'static str },
    #[error("connection `{connection_id}` holds none of the allowed transport roles")]
    RoleDenied { connection_id: String },
    #[error("a suspension is already active")]
    AlreadySuspended,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: &'static str },
}
