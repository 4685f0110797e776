use super::{EnvelopeStream, tracker::StreamTracker};
use crate::server::telemetry::{
    increment_frames_sent, increment_stream_errors, record_stream_duration,
};
use futures::{StreamExt, TryStreamExt};
use sluice_tonic_core::envelope;
use sluice_tonic_core::sluice::{
    Error, ReadStream,
    flow::{self, FrameSink},
};
use std::sync::Arc;
use tonic::Status;

/// Runs a read on its own task and returns the client-facing stream.
///
/// The task pumps frames into an acknowledged channel, so the next chunk is
/// only produced after the transport polled for it. The returned stream owns
/// the receiving half: when tonic drops it because the client went away, the
/// read is cancelled and its session is closed.
///
/// # Behavior
///
/// - Frames are packed into envelopes in source order.
/// - A production or encoding failure ends the stream with the matching gRPC
///   status after the frames already sent.
/// - Shutdown cancels the read and ends the stream with `UNAVAILABLE`.
///
/// # Errors
///
/// [`Error::ServiceShutdown`] if the tracker is refusing new reads.
pub fn stream_frames(read: ReadStream, tracker: &Arc<StreamTracker>) -> Result<EnvelopeStream, Error> {
    let inflight = tracker.begin()?;
    let shutdown = tracker.shutdown_token().clone();
    let cancel = shutdown.child_token();
    let (mut sink, frames) = flow::channel(cancel.clone());

    #[cfg(feature = "tracing")]
    let span = tracing::info_span!(
        "streaming",
        session = %read.session_id(),
        format = read.format(),
        container = %read.container(),
    );

    let fut = async move {
        let _inflight = inflight;
        let start = std::time::Instant::now();
        match flow::pump(read, &mut sink, &cancel).await {
            Ok(_stats) => {
                record_stream_duration(start.elapsed().as_millis() as f64);
                #[cfg(feature = "tracing")]
                tracing::debug!(frames = _stats.frames, bytes = _stats.bytes, "read complete");
            }
            Err(Error::Disconnected) if shutdown.is_cancelled() => {
                // Queued behind the frame already handed over. Resolves once
                // the client takes it or the transport drops the stream.
                sink.fail(Error::ServiceShutdown).await;
                #[cfg(feature = "tracing")]
                tracing::debug!("read cancelled by shutdown");
            }
            Err(Error::Disconnected) => {
                increment_stream_errors();
                #[cfg(feature = "tracing")]
                tracing::debug!("client went away mid-stream");
            }
            Err(_e) => {
                // Already delivered to the client through the sink.
                #[cfg(feature = "tracing")]
                tracing::warn!("read failed: {}", _e);
            }
        }
    };

    #[cfg(feature = "tracing")]
    let fut = {
        use tracing::Instrument;
        fut.instrument(span)
    };

    tokio::spawn(fut);

    let stream = frames
        .inspect_ok(|frame| increment_frames_sent(frame.len() as u64))
        .map(|item| item.and_then(|frame| envelope::pack(&frame)))
        .map_err(Status::from)
        .inspect_err(|_e| increment_stream_errors());

    Ok(Box::pin(stream))
}
