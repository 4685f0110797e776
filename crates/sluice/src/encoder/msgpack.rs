use super::{ChunkEncoder, ensure_container};
use crate::{Chunk, ContainerKind, Error, Result};
use bytes::Bytes;
use serde::Serialize;

/// Format identifier of [`MsgpackEncoder`].
pub const MSGPACK: &str = "msgpack";

/// Encodes any chunk as a self-describing MessagePack value.
///
/// - ndarray: `{dtype: "<f8", shape: [n], data: <bin>}`
/// - dataframe: `{columns: [...], data: [[row], ...]}`
/// - python: `[value, ...]`
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgpackEncoder;

#[derive(Serialize)]
struct ArrayPayload<'a> {
    dtype: &'static str,
    shape: &'a [usize],
    data: &'a Bytes,
}

#[derive(Serialize)]
struct TablePayload<'a> {
    columns: &'a [String],
    data: &'a [Vec<serde_json::Value>],
}

impl MsgpackEncoder {
    fn pack<T: Serialize>(value: &T) -> Result<Bytes> {
        rmp_serde::to_vec_named(value)
            .map(Bytes::from)
            .map_err(|e| Error::Encoding {
                format: MSGPACK.to_owned(),
                reason: e.to_string(),
            })
    }
}

impl ChunkEncoder for MsgpackEncoder {
    fn name(&self) -> &str {
        MSGPACK
    }

    fn supports(&self, _container: ContainerKind) -> bool {
        true
    }

    fn encode(&self, chunk: &Chunk, container: ContainerKind) -> Result<Bytes> {
        ensure_container(MSGPACK, chunk, container)?;
        match chunk {
            Chunk::NdArray(array) => Self::pack(&ArrayPayload {
                dtype: array.dtype.descr(),
                shape: &array.shape,
                data: &array.data,
            }),
            Chunk::DataFrame(table) => Self::pack(&TablePayload {
                columns: &table.columns,
                data: &table.rows,
            }),
            Chunk::Python(values) => Self::pack(values),
        }
    }
}
