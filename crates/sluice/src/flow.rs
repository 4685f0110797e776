//! Demand-driven delivery of frames to a transport.
//!
//! [`pump`] drives a [`ReadStream`] into a [`FrameSink`]. The next chunk is
//! only pulled from the source once the sink has taken the previous frame, so
//! a slow consumer holds back production instead of letting frames pile up in
//! memory.
//!
//! [`channel`] builds the sink used by the gRPC server: an acknowledged
//! rendezvous channel whose receiving half is a [`Stream`] handed to the
//! transport. A frame counts as taken when the transport polls the receiver
//! for the following item, so the channel itself never holds more than one
//! frame. Over gRPC the transport keeps polling while tonic and the HTTP/2
//! flow-control window have room, so a stalled client still lets production
//! run ahead by up to that buffered amount before the read stops pulling.

use crate::{Error, Frame, ReadStream, Result};
use core::pin::Pin;
use core::task::{Context, Poll, ready};
use futures::Stream;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Consumer side of a read.
pub trait FrameSink: Send {
    /// Hands one frame to the transport. Resolves once the transport has taken
    /// it.
    ///
    /// # Errors
    ///
    /// [`Error::Disconnected`] if the consumer has gone away.
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<()>> + Send;

    /// Delivers a terminal error to the consumer, best effort.
    fn fail(&mut self, error: Error) -> impl Future<Output = ()> + Send;
}

/// Totals for one completed read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub frames: u64,
    pub bytes: u64,
}

/// Sends every frame of `read` into `sink`, one at a time.
///
/// Stops within one scheduling step of `cancel` firing. On a production or
/// encoding failure the error is forwarded through [`FrameSink::fail`] and
/// returned; frames already delivered stay delivered.
///
/// # Errors
///
/// - The read's own failure.
/// - [`Error::Disconnected`] when the sink is gone or `cancel` fired.
pub async fn pump<S: FrameSink>(
    mut read: ReadStream,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<PumpStats> {
    let mut stats = PumpStats::default();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Disconnected),
            next = read.next_frame() => next,
        };
        let frame = match next {
            None => return Ok(stats),
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                sink.fail(err.clone()).await;
                return Err(err);
            }
        };

        let len = frame.len() as u64;
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Disconnected),
            sent = sink.send(frame) => sent?,
        }
        stats.frames += 1;
        stats.bytes += len;
    }
}

struct Delivery {
    item: Result<Frame>,
    ack: Option<oneshot::Sender<()>>,
}

/// Creates an acknowledged frame channel.
///
/// Dropping the returned [`FrameReceiver`] cancels `cancel`, which stops a
/// [`pump`] running against the paired sink.
pub fn channel(cancel: CancellationToken) -> (ChannelSink, FrameReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (
        ChannelSink { tx },
        FrameReceiver {
            rx,
            pending: None,
            _guard: cancel.drop_guard(),
        },
    )
}

/// Sending half of [`channel`].
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let (ack, taken) = oneshot::channel();
        self.tx
            .send(Delivery {
                item: Ok(frame),
                ack: Some(ack),
            })
            .await
            .map_err(|_| Error::Disconnected)?;
        taken.await.map_err(|_| Error::Disconnected)
    }

    async fn fail(&mut self, error: Error) {
        let _ = self
            .tx
            .send(Delivery {
                item: Err(error),
                ack: None,
            })
            .await;
    }
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("item", &self.item)
            .finish_non_exhaustive()
    }
}

/// Receiving half of [`channel`].
///
/// Each yielded frame is acknowledged when the receiver is polled again.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<Delivery>,
    pending: Option<oneshot::Sender<()>>,
    _guard: DropGuard,
}

impl Stream for FrameReceiver {
    type Item = Result<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(ack) = this.pending.take() {
            let _ = ack.send(());
        }
        match ready!(this.rx.poll_recv(cx)) {
            Some(delivery) => {
                this.pending = delivery.ack;
                Poll::Ready(Some(delivery.item))
            }
            None => Poll::Ready(None),
        }
    }
}
