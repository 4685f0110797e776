use super::merge_args;
use crate::{
    ArrayChunk, Capabilities, Chunk, ChunkStream, ContainerKind, DataSource, DataType, Error,
    Parameters, Result, ScalarType, Schema,
};
use futures::stream::{self, StreamExt};
use serde::Deserialize;

/// Arguments accepted by the `range` driver.
///
/// Every field may come from the catalog entry's `args` or be overridden by
/// the client's open parameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeArgs {
    #[serde(default)]
    pub start: f64,
    pub stop: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_chunk_len")]
    pub chunk_len: usize,
    #[serde(default = "default_dtype")]
    pub dtype: ScalarType,
}

const fn default_step() -> f64 {
    1.0
}

const fn default_chunk_len() -> usize {
    100
}

const fn default_dtype() -> ScalarType {
    ScalarType::Float64
}

/// One-dimensional `arange(start, stop, step)` served as an ndarray.
///
/// Values are computed on demand per chunk, so memory use is bounded by
/// `chunk_len` regardless of the total length. The source is restartable.
#[derive(Debug)]
pub struct RangeSource {
    args: RangeArgs,
    len: u64,
    metadata: serde_json::Map<String, serde_json::Value>,
    closed: bool,
}

impl RangeSource {
    /// Builds a source from catalog `args` overlaid with user `params`.
    pub fn from_params(args: &Parameters, params: &Parameters) -> Result<Self> {
        Self::new(merge_args(args, params)?)
    }

    pub fn new(args: RangeArgs) -> Result<Self> {
        if args.step == 0.0 || !args.step.is_finite() {
            return Err(Error::invalid_parameters("step must be a non-zero finite number"));
        }
        if args.chunk_len == 0 {
            return Err(Error::invalid_parameters("chunk_len must be greater than 0"));
        }
        if matches!(args.dtype, ScalarType::Bool | ScalarType::Object) {
            return Err(Error::invalid_parameters(format!(
                "range cannot produce dtype '{}'",
                args.dtype
            )));
        }

        let span = ((args.stop - args.start) / args.step).ceil();
        let len = if span.is_finite() && span > 0.0 {
            span as u64
        } else {
            0
        };

        Ok(Self {
            args,
            len,
            metadata: serde_json::Map::new(),
            closed: false,
        })
    }

    /// Metadata reported by [`DataSource::discover`].
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn build_chunk(args: &RangeArgs, offset: u64, count: usize) -> ArrayChunk {
    let value_at = |i: u64| args.start + (offset + i) as f64 * args.step;
    let indices = 0..count as u64;
    match args.dtype {
        ScalarType::Float32 => {
            ArrayChunk::from_slice(&indices.map(|i| value_at(i) as f32).collect::<Vec<_>>())
        }
        ScalarType::Int64 => {
            ArrayChunk::from_slice(&indices.map(|i| value_at(i) as i64).collect::<Vec<_>>())
        }
        ScalarType::Int32 => {
            ArrayChunk::from_slice(&indices.map(|i| value_at(i) as i32).collect::<Vec<_>>())
        }
        _ => ArrayChunk::from_slice(&indices.map(value_at).collect::<Vec<_>>()),
    }
}

impl DataSource for RangeSource {
    fn discover(&mut self) -> Result<Schema> {
        let chunk_len = self.args.chunk_len as u64;
        Ok(Schema {
            datashape: Some(format!("{} * {}", self.len, self.args.dtype)),
            dtype: DataType::Scalar(self.args.dtype),
            shape: vec![Some(self.len)],
            npartitions: self.len.div_ceil(chunk_len) as usize,
            container: ContainerKind::NdArray,
            metadata: self.metadata.clone(),
        })
    }

    fn chunks(&mut self) -> Result<ChunkStream> {
        if self.closed {
            return Err(Error::production("range source is closed"));
        }

        let args = self.args.clone();
        let chunk_len = args.chunk_len as u64;
        let len = self.len;
        let offsets = (0..len.div_ceil(chunk_len)).map(move |i| i * chunk_len);

        Ok(stream::iter(offsets)
            .map(move |offset| {
                let count = chunk_len.min(len - offset) as usize;
                Ok(Chunk::NdArray(build_chunk(&args, offset, count)))
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

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on_stream;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Parameters {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn discovers_shape_and_dtype() {
        let mut source = RangeSource::from_params(&params(json!({"stop": 1000})), &Parameters::new())
            .unwrap();
        let schema = source.discover().unwrap();
        assert_eq!(schema.shape, vec![Some(1000)]);
        assert_eq!(schema.dtype, DataType::Scalar(ScalarType::Float64));
        assert_eq!(schema.container, ContainerKind::NdArray);
        assert_eq!(schema.npartitions, 10);
        assert_eq!(schema.datashape.as_deref(), Some("1000 * float64"));
    }

    #[test]
    fn user_parameters_override_catalog_args() {
        let source = RangeSource::from_params(
            &params(json!({"stop": 1000, "chunk_len": 10})),
            &params(json!({"stop": 25})),
        )
        .unwrap();
        assert_eq!(source.len(), 25);
    }

    #[test]
    fn rejects_unknown_and_invalid_parameters() {
        let err = RangeSource::from_params(&params(json!({"stop": 10})), &params(json!({"colour": 1})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameters { .. }));

        let err = RangeSource::from_params(&params(json!({"stop": 10, "step": 0.0})), &Parameters::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameters { .. }));
    }

    #[test]
    fn last_chunk_is_partial() {
        let mut source =
            RangeSource::from_params(&params(json!({"stop": 25, "chunk_len": 10, "dtype": "int64"})), &Parameters::new())
                .unwrap();
        let lens: Vec<usize> = block_on_stream(source.chunks().unwrap())
            .map(|chunk| match chunk.unwrap() {
                Chunk::NdArray(a) => a.len(),
                other => panic!("unexpected chunk {other:?}"),
            })
            .collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn restarts_from_the_first_chunk() {
        let mut source =
            RangeSource::from_params(&params(json!({"start": 5, "stop": 8})), &Parameters::new()).unwrap();
        let first: Vec<_> = block_on_stream(source.chunks().unwrap()).collect();
        let second: Vec<_> = block_on_stream(source.chunks().unwrap()).collect();
        assert_eq!(first, second);
        match &first[0] {
            Ok(Chunk::NdArray(a)) => assert_eq!(&a.data[..8], &5.0_f64.to_le_bytes()),
            other => panic!("unexpected chunk {other:?}"),
        }
    }

    #[test]
    fn closed_source_refuses_to_stream() {
        let mut source = RangeSource::from_params(&params(json!({"stop": 3})), &Parameters::new()).unwrap();
        source.close();
        assert!(matches!(source.chunks(), Err(Error::Production { .. })));
    }
}
