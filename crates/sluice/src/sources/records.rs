use super::merge_args;
use crate::{
    Capabilities, Chunk, ChunkStream, ContainerKind, DataSource, DataType, Error, Parameters,
    Result, ScalarType, Schema, TableChunk,
};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Arguments accepted by the `records` driver.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordsArgs {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    /// Explicit column types. Inferred from the first row when omitted.
    #[serde(default)]
    pub dtypes: Option<Vec<ScalarType>>,
    #[serde(default = "default_rows_per_chunk")]
    pub rows_per_chunk: usize,
}

const fn default_rows_per_chunk() -> usize {
    1000
}

/// An inline table served as a dataframe, `rows_per_chunk` rows at a time.
#[derive(Debug)]
pub struct RecordsSource {
    name: String,
    columns: Arc<Vec<String>>,
    rows: Arc<Vec<Vec<Value>>>,
    dtypes: Option<Vec<ScalarType>>,
    rows_per_chunk: usize,
    metadata: serde_json::Map<String, Value>,
    closed: bool,
}

impl RecordsSource {
    pub fn from_params(name: &str, args: &Parameters, params: &Parameters) -> Result<Self> {
        Self::new(name, merge_args(args, params)?)
    }

    pub fn new(name: &str, args: RecordsArgs) -> Result<Self> {
        if args.rows_per_chunk == 0 {
            return Err(Error::invalid_parameters(
                "rows_per_chunk must be greater than 0",
            ));
        }
        if let Some(dtypes) = &args.dtypes {
            if dtypes.len() != args.columns.len() {
                return Err(Error::invalid_parameters(format!(
                    "{} dtypes given for {} columns",
                    dtypes.len(),
                    args.columns.len()
                )));
            }
        }

        Ok(Self {
            name: name.to_owned(),
            columns: Arc::new(args.columns),
            rows: Arc::new(args.rows),
            dtypes: args.dtypes,
            rows_per_chunk: args.rows_per_chunk,
            metadata: serde_json::Map::new(),
            closed: false,
        })
    }

    /// Metadata reported by [`DataSource::discover`].
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    fn infer_dtypes(&self) -> Vec<ScalarType> {
        let Some(first) = self.rows.first() else {
            return vec![ScalarType::Object; self.columns.len()];
        };
        first
            .iter()
            .map(|value| match value {
                Value::Bool(_) => ScalarType::Bool,
                Value::Number(n) if n.is_i64() || n.is_u64() => ScalarType::Int64,
                Value::Number(_) => ScalarType::Float64,
                _ => ScalarType::Object,
            })
            .collect()
    }
}

impl DataSource for RecordsSource {
    fn discover(&mut self) -> Result<Schema> {
        let width = self.columns.len();
        if let Some(pos) = self.rows.iter().position(|row| row.len() != width) {
            return Err(Error::DiscoveryFailed {
                name: self.name.clone(),
                reason: format!(
                    "row {pos} has {} values, expected {width}",
                    self.rows[pos].len()
                ),
            });
        }

        let dtypes = self.dtypes.clone().unwrap_or_else(|| self.infer_dtypes());
        let fields = self.columns.iter().cloned().zip(dtypes).collect();
        let nrows = self.rows.len() as u64;

        Ok(Schema {
            datashape: None,
            dtype: DataType::Record(fields),
            shape: vec![Some(nrows), Some(width as u64)],
            npartitions: self.rows.len().div_ceil(self.rows_per_chunk),
            container: ContainerKind::DataFrame,
            metadata: self.metadata.clone(),
        })
    }

    fn chunks(&mut self) -> Result<ChunkStream> {
        if self.closed {
            return Err(Error::production(format!("source '{}' is closed", self.name)));
        }

        let columns = Arc::clone(&self.columns);
        let rows = Arc::clone(&self.rows);
        let step = self.rows_per_chunk;

        Ok(stream::iter((0..rows.len()).step_by(step))
            .map(move |start| {
                let end = (start + step).min(rows.len());
                Ok(Chunk::DataFrame(TableChunk {
                    columns: columns.as_ref().clone(),
                    rows: rows[start..end].to_vec(),
                }))
            })
            .boxed())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { restartable: true }
    }
}
