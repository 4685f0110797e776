//! Error types for the chunk-streaming protocol.
//!
//! This module defines the central [`Error`] enum shared by every layer of the
//! protocol: catalog lookups, source discovery, negotiation, session handling
//! and the send loop. Errors fall into three families:
//!
//! - **Client errors** - the request was wrong and the client may correct it:
//!   [`DatasetNotFound`], [`InvalidParameters`], [`SessionNotFound`],
//!   [`SessionBusy`], [`NoCompatibleFormat`], [`UnknownAction`],
//!   [`MalformedRequest`], [`StreamAlreadyConsumed`].
//! - **Discovery/production errors** - the data source failed. After a
//!   mid-stream failure the session is dead and is removed from the store.
//! - **Resource errors** - transport or server state, e.g. [`Disconnected`] or
//!   [`ServiceShutdown`]. These never affect other sessions.
//!
//! Nothing in this crate retries. Every error is surfaced and the caller
//! decides whether to open a fresh session.
//!
//! With the `tonic` feature enabled, `From<Error> for tonic::Status` maps each
//! variant onto an appropriate gRPC status code.
//!
//! [`DatasetNotFound`]: Error::DatasetNotFound
//! [`InvalidParameters`]: Error::InvalidParameters
//! [`SessionNotFound`]: Error::SessionNotFound
//! [`SessionBusy`]: Error::SessionBusy
//! [`NoCompatibleFormat`]: Error::NoCompatibleFormat
//! [`UnknownAction`]: Error::UnknownAction
//! [`MalformedRequest`]: Error::MalformedRequest
//! [`StreamAlreadyConsumed`]: Error::StreamAlreadyConsumed
//! [`Disconnected`]: Error::Disconnected
//! [`ServiceShutdown`]: Error::ServiceShutdown

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the streaming protocol.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The catalog has no entry with this name.
    #[error("Dataset not found: {name}")]
    DatasetNotFound { name: String },

    /// The catalog rejected the user parameters for an entry.
    #[error("Invalid parameters: {reason}")]
    InvalidParameters { reason: String },

    /// The source could not discover its shape, dtype or container.
    #[error("Discovery failed for '{name}': {reason}")]
    DiscoveryFailed { name: String, reason: String },

    /// Unknown, closed, expired or malformed session identifier.
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// Another read currently holds the session.
    #[error("Session busy: {id}")]
    SessionBusy { id: String },

    /// None of the client's accepted formats can encode this container.
    #[error("No compatible format among {accepted:?}")]
    NoCompatibleFormat { accepted: Vec<String> },

    /// The request envelope named an action this server does not implement.
    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    /// The request envelope could not be decoded.
    #[error("Malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// A single-pass source was asked for its chunks a second time.
    #[error("Stream already consumed")]
    StreamAlreadyConsumed,

    /// The source failed while producing a chunk.
    #[error("Chunk production failed: {reason}")]
    Production { reason: String },

    /// The negotiated encoder could not encode a chunk.
    #[error("Encoding with '{format}' failed: {reason}")]
    Encoding { format: String, reason: String },

    /// The session table is at capacity.
    #[error("Too many open sessions (limit {limit})")]
    TooManySessions { limit: usize },

    /// The consumer side of a frame stream went away.
    #[error("Client disconnected")]
    Disconnected,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns `true` for errors caused by the request rather than the server
    /// or the data source.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::DatasetNotFound { .. }
                | Self::InvalidParameters { .. }
                | Self::SessionNotFound { .. }
                | Self::SessionBusy { .. }
                | Self::NoCompatibleFormat { .. }
                | Self::UnknownAction { .. }
                | Self::MalformedRequest { .. }
                | Self::StreamAlreadyConsumed
        )
    }

    pub(crate) fn production(reason: impl core::fmt::Display) -> Self {
        Self::Production {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_parameters(reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "tonic")]
impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::DatasetNotFound { .. } | Error::SessionNotFound { .. } => {
                Self::not_found(message)
            }
            Error::InvalidParameters { .. }
            | Error::NoCompatibleFormat { .. }
            | Error::UnknownAction { .. }
            | Error::MalformedRequest { .. } => Self::invalid_argument(message),
            Error::SessionBusy { .. } => Self::aborted(message),
            Error::StreamAlreadyConsumed => Self::failed_precondition(message),
            Error::DiscoveryFailed { .. } | Error::Production { .. } | Error::Encoding { .. } => {
                Self::internal(message)
            }
            Error::TooManySessions { .. } => Self::resource_exhausted(message),
            Error::Disconnected => Self::cancelled(message),
            Error::ServiceShutdown => Self::unavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_client_errors() {
        assert!(Error::SessionNotFound { id: "x".into() }.is_client_error());
        assert!(Error::NoCompatibleFormat { accepted: vec![] }.is_client_error());
        assert!(Error::UnknownAction { action: "seek".into() }.is_client_error());
        assert!(!Error::production("boom").is_client_error());
        assert!(!Error::Disconnected.is_client_error());
        assert!(
            !Error::DiscoveryFailed {
                name: "n".into(),
                reason: "r".into()
            }
            .is_client_error()
        );
    }

    #[cfg(feature = "tonic")]
    #[test]
    fn maps_to_grpc_codes() {
        use tonic::{Code, Status};

        let status: Status = Error::SessionNotFound { id: "abc".into() }.into();
        assert_eq!(status.code(), Code::NotFound);
        let status: Status = Error::NoCompatibleFormat { accepted: vec![] }.into();
        assert_eq!(status.code(), Code::InvalidArgument);
        let status: Status = Error::SessionBusy { id: "abc".into() }.into();
        assert_eq!(status.code(), Code::Aborted);
        let status: Status = Error::production("disk gone").into();
        assert_eq!(status.code(), Code::Internal);
        let status: Status = Error::ServiceShutdown.into();
        assert_eq!(status.code(), Code::Unavailable);
    }
}
