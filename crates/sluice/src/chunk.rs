use crate::schema::{ContainerKind, ScalarType};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

/// One unit of a dataset, in the source's native container representation.
///
/// Chunks are produced lazily and in order by a
/// [`DataSource`](crate::DataSource). No size uniformity is assumed.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    NdArray(ArrayChunk),
    DataFrame(TableChunk),
    Python(Vec<Value>),
}

impl Chunk {
    pub const fn container(&self) -> ContainerKind {
        match self {
            Self::NdArray(_) => ContainerKind::NdArray,
            Self::DataFrame(_) => ContainerKind::DataFrame,
            Self::Python(_) => ContainerKind::Python,
        }
    }
}

/// A block of a homogeneous array.
///
/// `data` holds the elements packed little-endian in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayChunk {
    pub dtype: ScalarType,
    pub shape: Vec<usize>,
    pub data: Bytes,
}

impl ArrayChunk {
    /// Packs a one-dimensional slice of elements.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * T::SCALAR.item_size().unwrap_or(0));
        for value in values {
            value.put_le(&mut buf);
        }
        Self {
            dtype: T::SCALAR,
            shape: vec![values.len()],
            data: buf.freeze(),
        }
    }

    /// Number of elements described by `shape`.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A row-major batch of a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableChunk {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Fixed-width element types that can be packed into an [`ArrayChunk`].
pub trait Element: Copy {
    const SCALAR: ScalarType;
    fn put_le(&self, buf: &mut BytesMut);
}

impl Element for f64 {
    const SCALAR: ScalarType = ScalarType::Float64;
    fn put_le(&self, buf: &mut BytesMut) {
        buf.put_f64_le(*self);
    }
}

impl Element for f32 {
    const SCALAR: ScalarType = ScalarType::Float32;
    fn put_le(&self, buf: &mut BytesMut) {
        buf.put_f32_le(*self);
    }
}

impl Element for i64 {
    const SCALAR: ScalarType = ScalarType::Int64;
    fn put_le(&self, buf: &mut BytesMut) {
        buf.put_i64_le(*self);
    }
}

impl Element for i32 {
    const SCALAR: ScalarType = ScalarType::Int32;
    fn put_le(&self, buf: &mut BytesMut) {
        buf.put_i32_le(*self);
    }
}

impl Element for bool {
    const SCALAR: ScalarType = ScalarType::Bool;
    fn put_le(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}
