use super::{ChunkEncoder, ensure_container};
use crate::{Chunk, ContainerKind, Error, Result};
use bytes::Bytes;

/// Format identifier of [`RawEncoder`].
pub const RAW: &str = "raw";

/// Emits an array chunk's packed element bytes unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawEncoder;

impl ChunkEncoder for RawEncoder {
    fn name(&self) -> &str {
        RAW
    }

    fn supports(&self, container: ContainerKind) -> bool {
        container == ContainerKind::NdArray
    }

    fn encode(&self, chunk: &Chunk, container: ContainerKind) -> Result<Bytes> {
        ensure_container(RAW, chunk, container)?;
        match chunk {
            // `Bytes` clones share the underlying buffer.
            Chunk::NdArray(array) => Ok(array.data.clone()),
            other => Err(Error::Encoding {
                format: RAW.to_owned(),
                reason: format!("cannot encode {} chunks", other.container()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArrayChunk, TableChunk};

    #[test]
    fn passes_array_bytes_through() {
        let array = ArrayChunk::from_slice(&[7_i64]);
        let bytes = RawEncoder
            .encode(&Chunk::NdArray(array.clone()), ContainerKind::NdArray)
            .unwrap();
        assert_eq!(bytes, array.data);
    }

    #[test]
    fn only_supports_arrays() {
        assert!(RawEncoder.supports(ContainerKind::NdArray));
        assert!(!RawEncoder.supports(ContainerKind::DataFrame));

        let table = Chunk::DataFrame(TableChunk {
            columns: vec![],
            rows: vec![],
        });
        assert!(matches!(
            RawEncoder.encode(&table, ContainerKind::DataFrame),
            Err(Error::Encoding { .. })
        ));
    }

    #[test]
    fn rejects_chunks_from_another_container() {
        let array = Chunk::NdArray(ArrayChunk::from_slice(&[1.0_f32]));
        assert!(matches!(
            RawEncoder.encode(&array, ContainerKind::Python),
            Err(Error::Encoding { .. })
        ));
    }
}
