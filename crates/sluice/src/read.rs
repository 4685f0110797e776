use crate::{
    ChunkEncoder, ChunkStream, ContainerKind, Frame, Result, SessionId, SessionLease,
};
use futures::{Stream, StreamExt, stream};
use std::sync::Arc;

/// A single pass over one session's chunks, encoded with the negotiated
/// format.
///
/// Each call to [`next_frame`](Self::next_frame) pulls exactly one chunk from
/// the source, so the source never runs ahead of the consumer.
///
/// The stream holds the session's lease. Reaching the end hands the source
/// back to the session. A production or encoding failure, or dropping the
/// stream before the end, closes the source and removes the session.
pub struct ReadStream {
    id: SessionId,
    container: ContainerKind,
    encoder: Arc<dyn ChunkEncoder>,
    chunks: ChunkStream,
    lease: Option<SessionLease>,
}

impl ReadStream {
    pub(crate) fn new(lease: SessionLease, chunks: ChunkStream, encoder: Arc<dyn ChunkEncoder>) -> Self {
        Self {
            id: *lease.id(),
            container: lease.container(),
            encoder,
            chunks,
            lease: Some(lease),
        }
    }

    pub const fn session_id(&self) -> &SessionId {
        &self.id
    }

    /// The negotiated format.
    pub fn format(&self) -> &str {
        self.encoder.name()
    }

    pub const fn container(&self) -> ContainerKind {
        self.container
    }

    /// Whether the stream has ended, either by exhaustion or by failure.
    pub const fn is_finished(&self) -> bool {
        self.lease.is_none()
    }

    /// Pulls, encodes and frames the next chunk.
    ///
    /// Returns `None` once the source is exhausted. After an error has been
    /// returned the stream is finished and yields `None`.
    pub async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.lease.as_ref()?;
        let next = match self.chunks.next().await {
            None => {
                if let Some(lease) = self.lease.take() {
                    lease.release();
                }
                return None;
            }
            Some(chunk) => chunk.and_then(|chunk| self.encoder.encode(&chunk, self.container)),
        };
        match next {
            Ok(data) => Some(Ok(Frame {
                format: self.encoder.name().to_owned(),
                container: self.container,
                data,
            })),
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(session = %self.id, error = %err, "read failed");
                self.lease = None;
                Some(Err(err))
            }
        }
    }

    /// Adapts the read into a `Stream` of frames.
    pub fn into_stream(self) -> impl Stream<Item = Result<Frame>> + Send {
        stream::unfold(self, |mut read| async move {
            read.next_frame().await.map(|frame| (frame, read))
        })
    }
}

impl core::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadStream")
            .field("id", &self.id)
            .field("format", &self.format())
            .field("container", &self.container)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
