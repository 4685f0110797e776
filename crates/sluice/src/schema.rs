//! Discovery metadata: container kinds, element types and the schema a source
//! reports from [`DataSource::discover`](crate::DataSource::discover).
//!
//! The [`Schema`] returned at open time is the only schema contract a client
//! ever receives, so every type here is immutable once built.

use core::fmt;
use core::str::FromStr;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

/// Structural family of a dataset's data.
///
/// Fixed for the lifetime of a session. Encoders declare which kinds they can
/// serialize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Homogeneous n-dimensional array.
    NdArray,
    /// Named columns, row-chunked.
    DataFrame,
    /// Sequence of arbitrary self-describing values.
    Python,
}

impl ContainerKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NdArray => "ndarray",
            Self::DataFrame => "dataframe",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element type of a single array value or table column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    Object,
}

impl ScalarType {
    /// Numpy-style type string (`"<f8"`, `"|b1"`, ...).
    pub const fn descr(self) -> &'static str {
        match self {
            Self::Bool => "|b1",
            Self::Int32 => "<i4",
            Self::Int64 => "<i8",
            Self::Float32 => "<f4",
            Self::Float64 => "<f8",
            Self::Object => "|O",
        }
    }

    /// Packed width in bytes, or `None` for variable-width objects.
    pub const fn item_size(self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::Object => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(Self::Bool),
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            "object" => Ok(Self::Object),
            other => Err(format!("unsupported dtype '{other}'")),
        }
    }
}

/// Element type descriptor of a whole dataset.
///
/// Serializes as a numpy `descr` list: a scalar becomes `[["", "<f8"]]`, a
/// record becomes one `[name, type]` pair per field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    Scalar(ScalarType),
    Record(Vec<(String, ScalarType)>),
}

impl DataType {
    pub fn descr(&self) -> Vec<(&str, &'static str)> {
        match self {
            Self::Scalar(ty) => vec![("", ty.descr())],
            Self::Record(fields) => fields
                .iter()
                .map(|(name, ty)| (name.as_str(), ty.descr()))
                .collect(),
        }
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let descr = self.descr();
        let mut seq = serializer.serialize_seq(Some(descr.len()))?;
        for pair in &descr {
            seq.serialize_element(pair)?;
        }
        seq.end()
    }
}

/// Everything a source learns about itself during discovery.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Schema {
    /// Optional higher-level shape description, e.g. `"1000 * float64"`.
    pub datashape: Option<String>,
    pub dtype: DataType,
    /// Declared shape; `None` marks a dimension unknown before reading.
    pub shape: Vec<Option<u64>>,
    pub npartitions: usize,
    pub container: ContainerKind,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
