//! gRPC service implementation.
//!
//! This module contains the client-facing side of the server: request
//! decoding, dispatch to the protocol, and the shutdown sequence.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`SluiceService`).

pub mod handler;
