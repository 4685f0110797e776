//! # sluice
//!
//! Session-based, format-negotiated streaming of remotely held datasets.
//!
//! A client opens a named dataset, receives its shape, dtype and container
//! kind together with an opaque session token, and then pulls the data back as
//! a sequence of encoded chunks. Neither side ever holds the whole dataset in
//! memory: the server pulls the next chunk from the source only after the
//! transport has taken the previous frame.
//!
//! This crate is the transport-agnostic core. The gRPC server lives in
//! `sluice-tonic-server`.
//!
//! ## Building blocks
//!
//! - [`Catalog`] and [`DataSource`]: where data comes from. [`StaticCatalog`]
//!   serves entries from a JSON catalog file backed by the in-memory drivers in
//!   [`sources`].
//! - [`EncoderRegistry`]: the wire formats the server can produce
//!   ([`RawEncoder`], [`MsgpackEncoder`]).
//! - [`negotiate::select`]: picks the first client-preferred format that can
//!   encode the session's container kind.
//! - [`SessionStore`]: the table of open sessions, with per-read leases, idle
//!   sweeping and bulk shutdown.
//! - [`Protocol`]: the open/read/close state machine.
//! - [`flow`]: the backpressured send loop ([`flow::pump`]) and the
//!   acknowledged channel that connects it to a transport.
//!
//! ## Example
//!
//! ```
//! use sluice::{EncoderRegistry, Protocol, SessionStore, StaticCatalog};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sluice::Result<()> {
//! let protocol = Protocol::new(
//!     Arc::new(StaticCatalog::builtin()),
//!     Arc::new(EncoderRegistry::with_defaults()),
//!     Arc::new(SessionStore::default()),
//! );
//!
//! let opened = protocol.open("numbers", &Default::default()).await?;
//! assert_eq!(opened.shape, vec![Some(1000)]);
//!
//! let mut read = protocol.read(&opened.source_id, &["raw".to_owned()])?;
//! let mut frames = 0;
//! while let Some(frame) = read.next_frame().await {
//!     // 100 little-endian float64 values per chunk
//!     assert_eq!(frame?.len(), 800);
//!     frames += 1;
//! }
//! assert_eq!(frames, 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tracing`: emit session lifecycle events and instrument protocol calls.
//! - `tonic`: `From<Error> for tonic::Status`.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod catalog;
mod chunk;
mod encoder;
mod error;
pub mod flow;
mod frame;
pub mod negotiate;
mod protocol;
mod read;
mod schema;
mod session;
mod source;
pub mod sources;

pub use crate::catalog::*;
pub use crate::chunk::*;
pub use crate::encoder::*;
pub use crate::error::*;
pub use crate::frame::*;
pub use crate::protocol::*;
pub use crate::read::*;
pub use crate::schema::*;
pub use crate::session::*;
pub use crate::source::*;
