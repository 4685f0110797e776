//! The open/read/close state machine, independent of any transport.

use crate::{
    Catalog, ContainerKind, DataType, EncoderRegistry, EntryDescription, Error,
    Parameters, ReadStream, Result, Schema, SessionId, SessionStore, negotiate,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Server version reported by `info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A decoded client request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    Open {
        name: String,
        #[serde(default)]
        parameters: Parameters,
    },
    Read {
        source_id: String,
        #[serde(default)]
        accepted_formats: Vec<String>,
    },
    Close {
        source_id: String,
    },
}

impl Request {
    /// Action names understood by [`Protocol::handle`].
    pub const ACTIONS: [&'static str; 3] = ["open", "read", "close"];

    pub const fn action(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Read { .. } => "read",
            Self::Close { .. } => "close",
        }
    }
}

/// Result of [`Protocol::handle`].
#[derive(Debug)]
pub enum Reply {
    Opened(OpenResponse),
    Stream(ReadStream),
    Closed(CloseResponse),
}

/// Everything a client learns about a source when opening it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OpenResponse {
    pub datashape: Option<String>,
    pub dtype: DataType,
    pub shape: Vec<Option<u64>>,
    pub container: ContainerKind,
    pub source_id: String,
    pub npartitions: usize,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl OpenResponse {
    fn new(id: SessionId, schema: Schema) -> Self {
        Self {
            datashape: schema.datashape,
            dtype: schema.dtype,
            shape: schema.shape,
            container: schema.container,
            source_id: id.to_string(),
            npartitions: schema.npartitions,
            metadata: schema.metadata,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CloseResponse {
    pub source_id: String,
    pub closed: bool,
}

/// Server description returned by `info`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServerInfo {
    pub version: &'static str,
    /// Registered encoders, in registration order.
    pub formats: Vec<String>,
    pub sources: Vec<SourceListing>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceListing {
    pub name: String,
    #[serde(flatten)]
    pub entry: EntryDescription,
}

/// Shared protocol state: the catalog, the encoders and the session table.
///
/// Cheap to clone; every clone sees the same sessions.
#[derive(Clone)]
pub struct Protocol {
    catalog: Arc<dyn Catalog>,
    registry: Arc<EncoderRegistry>,
    sessions: Arc<SessionStore>,
}

impl Protocol {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        registry: Arc<EncoderRegistry>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            catalog,
            registry,
            sessions,
        }
    }

    pub fn registry(&self) -> &Arc<EncoderRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Lists the catalog and the registered formats.
    ///
    /// Entries that fail to describe themselves are left out.
    pub fn info(&self) -> ServerInfo {
        let sources = self
            .catalog
            .list_names()
            .into_iter()
            .filter_map(|name| {
                let entry = self.catalog.describe(&name).ok()?;
                Some(SourceListing { name, entry })
            })
            .collect();
        ServerInfo {
            version: VERSION,
            formats: self.registry.names().into_iter().map(str::to_owned).collect(),
            sources,
        }
    }

    /// Opens a catalog entry and creates a session for it.
    ///
    /// Discovery runs on the blocking pool. If it fails, or panics, the source
    /// is closed and no session is created.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, params), err))]
    pub async fn open(&self, name: &str, params: &Parameters) -> Result<OpenResponse> {
        let mut source = self.catalog.instantiate(name, params)?;
        let owned = name.to_owned();
        let (mut source, discovered) = tokio::task::spawn_blocking(move || {
            // The source must come back even if the driver panics.
            let discovered = catch_unwind(AssertUnwindSafe(|| source.discover())).unwrap_or_else(
                |panic| {
                    Err(Error::DiscoveryFailed {
                        name: owned,
                        reason: panic_message(panic.as_ref()),
                    })
                },
            );
            (source, discovered)
        })
        .await
        .map_err(|e| Error::DiscoveryFailed {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;

        let schema = match discovered {
            Ok(schema) => schema,
            Err(err) => {
                source.close();
                return Err(discovery_error(name, err));
            }
        };
        let id = self.sessions.create(source, schema.clone())?;
        #[cfg(feature = "tracing")]
        tracing::debug!(session = %id, container = %schema.container, "session opened");
        Ok(OpenResponse::new(id, schema))
    }

    /// Starts a read of an open session.
    ///
    /// The format is negotiated before anything is pulled from the source. A
    /// negotiation failure leaves the session untouched.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`], [`Error::SessionBusy`],
    /// [`Error::NoCompatibleFormat`], or whatever the source reports when asked
    /// for a fresh pass, e.g. [`Error::StreamAlreadyConsumed`].
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), err))]
    pub fn read(&self, source_id: &str, accepted: &[String]) -> Result<ReadStream> {
        let id = SessionId::parse(source_id)?;
        let mut lease = self.sessions.checkout(&id)?;
        let encoder = match negotiate::select(accepted, &self.registry, lease.container()) {
            Ok(encoder) => encoder,
            Err(err) => {
                lease.release();
                return Err(err);
            }
        };
        match lease.chunks() {
            Ok(chunks) => Ok(ReadStream::new(lease, chunks, encoder)),
            Err(err) if err.is_client_error() => {
                lease.release();
                Err(err)
            }
            // The lease drops here and takes the session with it.
            Err(err) => Err(err),
        }
    }

    pub fn close(&self, source_id: &str) -> Result<CloseResponse> {
        let id = SessionId::parse(source_id)?;
        self.sessions.close(&id)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(session = %id, "session closed by client");
        Ok(CloseResponse {
            source_id: source_id.to_owned(),
            closed: true,
        })
    }

    pub async fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Open { name, parameters } => {
                self.open(&name, &parameters).await.map(Reply::Opened)
            }
            Request::Read {
                source_id,
                accepted_formats,
            } => self.read(&source_id, &accepted_formats).map(Reply::Stream),
            Request::Close { source_id } => self.close(&source_id).map(Reply::Closed),
        }
    }
}

impl core::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Protocol")
            .field("sources", &self.catalog.list_names())
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .finish()
    }
}

fn discovery_error(name: &str, err: Error) -> Error {
    match err {
        err @ (Error::DiscoveryFailed { .. } | Error::InvalidParameters { .. }) => err,
        other => Error::DiscoveryFailed {
            name: name.to_owned(),
            reason: other.to_string(),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    format!("panicked: {message}")
}
