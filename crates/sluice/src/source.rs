use crate::{Chunk, Result, Schema};
use futures::stream::BoxStream;

/// Lazy, finite, forward-only sequence of chunks.
///
/// Nothing is produced until the stream is polled, and each poll yields at
/// most one chunk.
pub type ChunkStream = BoxStream<'static, Result<Chunk>>;

/// User parameters passed to [`Catalog::instantiate`](crate::Catalog::instantiate).
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Optional capabilities a source may advertise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// [`DataSource::chunks`] may be called again after a stream finished and
    /// starts over from the first chunk. Without it a second call fails with
    /// [`Error::StreamAlreadyConsumed`](crate::Error::StreamAlreadyConsumed).
    pub restartable: bool,
}

/// An open handle to one dataset.
///
/// Created by a [`Catalog`](crate::Catalog) and owned by a session once
/// opened. A handle is only ever used by one read at a time, so methods take
/// `&mut self`.
///
/// # Lifecycle
///
/// 1. [`discover`](Self::discover) is called exactly once, eagerly, before any
///    data is read. It may block.
/// 2. [`chunks`](Self::chunks) is called once per read.
/// 3. [`close`](Self::close) is called exactly once when the session ends,
///    whether it ends normally, on error, on cancellation or by expiry.
pub trait DataSource: Send + 'static {
    /// Populates shape, dtype and container metadata.
    fn discover(&mut self) -> Result<Schema>;

    /// Returns the chunk sequence. Production errors surface as `Err` items.
    fn chunks(&mut self) -> Result<ChunkStream>;

    /// Releases any resources held by the source.
    fn close(&mut self);

    /// Consulted before every read after the first. A source that is not
    /// restartable is refused a second pass without being asked for chunks.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}
