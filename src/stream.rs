//! Asynchronous, cancellable progress stream over a blocking extraction
//!
//! The extraction itself is CPU-bound and synchronous; it runs on tokio's
//! blocking pool and hands events across a bounded channel. A full channel
//! parks the producer until the consumer catches up.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::color::Rgb;
use crate::config::PaletteRequest;
use crate::progress::{CancellationToken, ExtractionContext, ProgressEvent, ProgressSink};
use crate::sampler::Bitmap;
use crate::{PaletteError, Result};

/// Events buffered between producer and consumer.
pub const CHANNEL_CAPACITY: usize = 16;

struct ChannelSink {
    tx: mpsc::Sender<Result<ProgressEvent>>,
}

impl ProgressSink for ChannelSink {
    fn emit(&mut self, event: ProgressEvent) -> bool {
        self.tx.blocking_send(Ok(event)).is_ok()
    }
}

/// Finite, ordered progress sequence of one extraction. Ends after the
/// completed event, after an error, or as soon as it is cancelled.
pub struct PaletteStream {
    rx: mpsc::Receiver<Result<ProgressEvent>>,
    token: CancellationToken,
    finished: bool,
}

impl PaletteStream {
    /// Stop the extraction at its next checkpoint. No further events are
    /// yielded after this call, and a producer parked on a full channel
    /// fails its send immediately.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.rx.close();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drain the stream and return the final palette.
    pub async fn into_palette(mut self) -> Result<Vec<Rgb>> {
        while let Some(item) = self.next().await {
            let event = item?;
            if event.is_complete {
                return Ok(event.colors);
            }
        }
        Err(PaletteError::Cancelled)
    }
}

impl Stream for PaletteStream {
    type Item = Result<ProgressEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished || self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if matches!(&item, Ok(event) if event.is_complete) || item.is_err() {
                    self.finished = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PaletteStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start an extraction on the blocking pool and return its progress stream.
///
/// Must be called from within a tokio runtime.
pub fn extract_stream(bitmap: Bitmap, request: PaletteRequest) -> PaletteStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let token = CancellationToken::new();
    let producer_token = token.clone();

    tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink { tx };
        let result = {
            let mut ctx = ExtractionContext::with_token(&mut sink, producer_token);
            crate::extract(&bitmap, &request, &mut ctx)
        };
        match result {
            Ok(colors) => debug!(colors = colors.len(), "stream extraction finished"),
            Err(err) if err.is_fatal() => {
                warn!(error = %err, "stream extraction failed");
                let _ = sink.tx.blocking_send(Err(err));
            }
            Err(_) => debug!("stream extraction cancelled"),
        }
    });

    PaletteStream {
        rx,
        token,
        finished: false,
    }
}
