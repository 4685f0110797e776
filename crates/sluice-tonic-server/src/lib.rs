//! Library half of the `sluice-server` binary.
//!
//! Exposed so the server can be embedded in other processes and driven from
//! integration tests; see [`server::serve_with_incoming`].

pub mod server;
