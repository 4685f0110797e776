//! Chunk encoders and the registry that maps format names to them.
//!
//! An encoder turns one [`Chunk`] into the opaque payload bytes of a frame.
//! Encoders must be pure: the output depends only on the chunk and the
//! session's container kind, so one encoder instance can serve any number of
//! concurrent sessions without coordination.
//!
//! ## Built-in formats
//!
//! - [`RAW`] - ndarray only. The payload is the packed little-endian element
//!   bytes; dtype and shape come from the open response.
//! - [`MSGPACK`] - every container. Self-describing MessagePack maps.

mod msgpack;
mod raw;
mod registry;

pub use msgpack::*;
pub use raw::*;
pub use registry::*;

use crate::{Chunk, ContainerKind, Error, Result};
use bytes::Bytes;

/// Serializes chunks into one wire format.
pub trait ChunkEncoder: Send + Sync + 'static {
    /// Format identifier clients use to request this encoder.
    fn name(&self) -> &str;

    /// Whether chunks of this container kind can be encoded.
    fn supports(&self, container: ContainerKind) -> bool;

    /// Encodes `chunk`, which must belong to `container`.
    fn encode(&self, chunk: &Chunk, container: ContainerKind) -> Result<Bytes>;
}

/// Rejects a chunk whose own container kind differs from the session's.
pub(crate) fn ensure_container(format: &str, chunk: &Chunk, container: ContainerKind) -> Result<()> {
    if chunk.container() == container {
        Ok(())
    } else {
        Err(Error::Encoding {
            format: format.to_owned(),
            reason: format!(
                "{} chunk in a {container} session",
                chunk.container()
            ),
        })
    }
}
