//! gRPC service implementation for session-based dataset streaming.
//!
//! This module defines [`SluiceService`], the implementation of the
//! [`Sluice`] service from `sluice.proto`. Every request travels as a
//! MessagePack [`Envelope`] and is dispatched to the transport-agnostic
//! [`Protocol`].
//!
//! ## Responsibilities
//!
//! - Decode envelopes and route `open`, `read` and `close` actions.
//! - Hand reads to [`stream_frames`], one task per read.
//! - Expire idle sessions in the background.
//! - Drain, cancel and close everything on shutdown.

use crate::server::{
    config::ServerConfig,
    streaming::{EnvelopeStream, coordinator::stream_frames, tracker::StreamTracker},
    sweeper::sweep_loop,
    telemetry::{
        increment_requests, increment_sessions_closed, increment_sessions_opened,
        increment_stream_errors,
    },
};
use core::time::Duration;
use futures::stream;
use sluice_tonic_core::{
    envelope,
    proto::{Envelope, InfoRequest, sluice_server::Sluice},
    sluice::{Error, Protocol, Reply},
};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tonic::{Request, Response, Status};

/// The `sluice.Sluice` gRPC service.
///
/// Cloning is cheap; clones share the session table and the stream tracker.
#[derive(Clone, Debug)]
pub struct SluiceService {
    protocol: Protocol,
    tracker: Arc<StreamTracker>,
    shutdown_timeout: Duration,
}

impl SluiceService {
    /// Creates the service and, when sessions expire, spawns the idle sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &ServerConfig) -> Self {
        let protocol = config.protocol();
        let tracker = Arc::new(StreamTracker::new());

        if let Some(max_idle) = config.session_idle_timeout {
            tokio::spawn(sweep_loop(
                Arc::clone(protocol.sessions()),
                max_idle,
                config.sweep_interval,
                tracker.shutdown_token().child_token(),
            ));
        }

        Self {
            protocol,
            tracker,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Number of reads currently streaming.
    pub fn streams_inflight(&self) -> usize {
        self.tracker.inflight()
    }

    /// Gracefully shuts the service down.
    ///
    /// New requests are refused, in-flight reads get the configured drain
    /// window to finish, then the remaining reads are cancelled, the sweeper
    /// stops and every session is closed.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.tracker.refuse();

        // === Phase 1: Wait for in-flight reads to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!("Draining in-flight streams ({} active)", self.tracker.inflight());
        let drain_result = timeout(self.shutdown_timeout, async {
            while self.tracker.inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight streams drained successfully");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} streams still active)",
                    self.tracker.inflight()
                );
            }
        }

        // === Phase 2: Cancel remaining reads and the sweeper ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.tracker.shutdown_token().cancel();

        // === Phase 3: Close every session ===
        let closed = self.protocol.sessions().close_all();
        increment_sessions_closed(closed as u64);

        #[cfg(feature = "tracing")]
        tracing::info!("Closed {closed} session(s), service shutdown complete");

        Ok(())
    }
}

#[tonic::async_trait]
impl Sluice for SluiceService {
    type SourceStream = EnvelopeStream;

    /// Describes the catalog and the formats this server can encode.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn info(&self, _req: Request<InfoRequest>) -> Result<Response<Envelope>, Status> {
        increment_requests("info");
        let info = self.protocol.info();
        Ok(Response::new(envelope::pack(&info)?))
    }

    /// Handles one `open`, `read` or `close` action.
    ///
    /// `open` and `close` answer with a single envelope. `read` answers with
    /// one envelope per frame and ends with the gRPC status of the read.
    ///
    /// If `metrics` is enabled, emits telemetry for:
    /// - request rate, by action
    /// - sessions opened and closed
    /// - concurrent stream count
    /// - frames and bytes sent
    /// - stream duration
    /// - request and stream errors
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn source(
        &self,
        req: Request<Envelope>,
    ) -> Result<Response<Self::SourceStream>, Status> {
        if self.tracker.is_refusing() {
            increment_stream_errors();
            return Err(Error::ServiceShutdown.into());
        }

        let request = envelope::unpack_request(req.get_ref()).inspect_err(|_e| {
            increment_stream_errors();
            #[cfg(feature = "tracing")]
            tracing::debug!("Rejected request: {}", _e);
        })?;
        increment_requests(request.action());

        let reply = self.protocol.handle(request).await.inspect_err(|_e| {
            increment_stream_errors();
            #[cfg(feature = "tracing")]
            tracing::debug!("Request failed: {}", _e);
        })?;

        let stream = match reply {
            Reply::Opened(opened) => {
                increment_sessions_opened();
                single(envelope::pack(&opened)?)
            }
            Reply::Closed(closed) => {
                increment_sessions_closed(1);
                single(envelope::pack(&closed)?)
            }
            Reply::Stream(read) => stream_frames(read, &self.tracker)?,
        };
        Ok(Response::new(stream))
    }
}

fn single(envelope: Envelope) -> EnvelopeStream {
    Box::pin(stream::once(async move { Ok(envelope) }))
}
