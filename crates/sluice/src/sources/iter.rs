use crate::{Chunk, ChunkStream, DataSource, Error, Result, Schema};
use futures::stream::{self, StreamExt};

type BoxedChunks = Box<dyn Iterator<Item = Result<Chunk>> + Send>;
type CloseHook = Box<dyn FnOnce() + Send>;

/// A single-pass source over an arbitrary chunk iterator.
///
/// The schema is supplied up front. The iterator is handed out on the first
/// call to [`DataSource::chunks`]; every later call fails with
/// [`Error::StreamAlreadyConsumed`]. Each chunk is pulled from the iterator
/// only when the returned stream is polled.
pub struct IterSource {
    schema: Schema,
    chunks: Option<BoxedChunks>,
    on_close: Option<CloseHook>,
}

impl IterSource {
    pub fn new<I>(schema: Schema, chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Chunk>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            schema,
            chunks: Some(Box::new(chunks.into_iter())),
            on_close: None,
        }
    }

    /// Registers a callback that runs when the source is closed.
    #[must_use]
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }
}

impl core::fmt::Debug for IterSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IterSource")
            .field("schema", &self.schema)
            .field("consumed", &self.chunks.is_none())
            .finish_non_exhaustive()
    }
}

impl DataSource for IterSource {
    fn discover(&mut self) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    fn chunks(&mut self) -> Result<ChunkStream> {
        let chunks = self.chunks.take().ok_or(Error::StreamAlreadyConsumed)?;
        Ok(stream::iter(chunks).boxed())
    }

    fn close(&mut self) {
        self.chunks = None;
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}
