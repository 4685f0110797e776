//! Bookkeeping for in-flight reads.
//!
//! The tracker is shared by every read task. It counts live streams so
//! shutdown can wait for them to drain, refuses new work once shutdown has
//! begun, and owns the root [`CancellationToken`] that every read's own token
//! is derived from.

use crate::server::telemetry::{decrement_streams_inflight, increment_streams_inflight};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use sluice_tonic_core::sluice::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct StreamTracker {
    refusing: AtomicBool,
    inflight: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new read.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceShutdown`] once [`refuse`](Self::refuse) was called.
    pub fn begin(self: &Arc<Self>) -> Result<InflightGuard, Error> {
        if self.is_refusing() {
            return Err(Error::ServiceShutdown);
        }
        self.inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Ok(InflightGuard {
            tracker: Arc::clone(self),
        })
    }

    /// Stops [`begin`](Self::begin) from admitting new reads.
    pub fn refuse(&self) {
        self.refusing.store(true, Ordering::Release);
    }

    pub fn is_refusing(&self) -> bool {
        self.refusing.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Parent of every per-read token. Cancelling it stops all reads.
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }
}

/// Keeps a read counted as in flight until dropped.
#[derive(Debug)]
pub struct InflightGuard {
    tracker: Arc<StreamTracker>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.tracker.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}
