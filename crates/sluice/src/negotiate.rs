use crate::{ChunkEncoder, ContainerKind, EncoderRegistry, Error, Result};
use std::sync::Arc;

/// Picks the encoder for a read.
///
/// Walks `accepted` in the client's preference order and returns the first
/// format that is registered and can encode `container`. Nothing is read from
/// the source before this succeeds.
///
/// # Errors
///
/// [`Error::NoCompatibleFormat`] when no accepted format qualifies, including
/// when `accepted` is empty.
pub fn select(
    accepted: &[String],
    registry: &EncoderRegistry,
    container: ContainerKind,
) -> Result<Arc<dyn ChunkEncoder>> {
    accepted
        .iter()
        .filter_map(|name| registry.get(name))
        .find(|encoder| encoder.supports(container))
        .cloned()
        .ok_or_else(|| Error::NoCompatibleFormat {
            accepted: accepted.to_vec(),
        })
}
