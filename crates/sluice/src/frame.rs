use crate::ContainerKind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One encoded chunk, ready for the transport.
///
/// Serializes as `{format, container, data}` with `data` as a binary blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Name of the encoder that produced `data`.
    pub format: String,
    pub container: ContainerKind,
    pub data: Bytes,
}

impl Frame {
    /// Size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
