//! Per-read tasks and their shutdown bookkeeping.
//!
//! - [`coordinator`] - spawns the pump for one read and exposes its frames as
//!   a gRPC response stream.
//! - [`tracker`] - counts in-flight reads and owns the shutdown token.

pub mod coordinator;
pub mod tracker;

use core::pin::Pin;
use futures::Stream;
use sluice_tonic_core::proto::Envelope;
use tonic::Status;

/// Response stream of the `Source` RPC.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Envelope, Status>> + Send>>;
