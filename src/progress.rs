//! Staged progress reporting and cooperative cancellation
//!
//! Every long-running loop receives an [`ExtractionContext`] and calls
//! [`ExtractionContext::checkpoint`] at its yield points (per scanned row,
//! per 50 neighbor expansions, per clustering iteration). The context owns
//! nothing but a sink and a token, so the host decides where events go and
//! who may cancel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::color::Rgb;
use crate::{PaletteError, Result};

/// Where an extraction currently is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Preprocessing,
    BuildingHistogram,
    Scoring,
    Clustering { clusters: usize, noise: usize },
    DetectingOutliers,
    MedianCut { iteration: usize, boxes: usize },
    Merging,
    Selecting,
    Deduplicating,
    KMeans { iteration: usize, max_iterations: usize },
    Converged,
    Completed,
}

/// Auxiliary counters carried alongside a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub clusters: usize,
    pub noise: usize,
    pub boxes: usize,
    pub outliers: usize,
    pub iteration: usize,
    /// Distinct histogram colors considered.
    pub unique_colors: usize,
    /// Colors accepted so far by a selection pass.
    pub selected: usize,
}

/// Center movement summary once k-means converges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceInfo {
    pub converged_at: usize,
    pub center_movements: Vec<f64>,
    pub average_movement: f64,
}

/// One element of the progress sequence. The last one has `is_complete` set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub colors: Vec<Rgb>,
    pub progress: f64,
    pub stage: Stage,
    pub counters: Counters,
    pub convergence: Option<ConvergenceInfo>,
    pub is_complete: bool,
}

impl ProgressEvent {
    pub fn new(stage: Stage, progress: f64) -> Self {
        Self {
            colors: Vec::new(),
            progress,
            stage,
            counters: Counters::default(),
            convergence: None,
            is_complete: false,
        }
    }

    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_colors(mut self, colors: Vec<Rgb>) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_convergence(mut self, info: ConvergenceInfo) -> Self {
        self.convergence = Some(info);
        self
    }
}

/// Receiver of progress events.
///
/// Returning `false` means the consumer has gone away; the extraction is
/// then cancelled at once.
pub trait ProgressSink: Send {
    fn emit(&mut self, event: ProgressEvent) -> bool;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&mut self, _event: ProgressEvent) -> bool {
        true
    }
}

impl ProgressSink for Vec<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) -> bool {
        self.push(event);
        true
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: FnMut(ProgressEvent) -> bool + Send,
{
    fn emit(&mut self, event: ProgressEvent) -> bool {
        (self.0)(event)
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Per-call progress and cancellation state.
pub struct ExtractionContext<'a> {
    sink: &'a mut dyn ProgressSink,
    token: CancellationToken,
    last_progress: f64,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self::with_token(sink, CancellationToken::new())
    }

    pub fn with_token(sink: &'a mut dyn ProgressSink, token: CancellationToken) -> Self {
        Self {
            sink,
            token,
            last_progress: 0.0,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Yield point. Fails with [`PaletteError::Cancelled`] once the token is set.
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(PaletteError::Cancelled);
        }
        Ok(())
    }

    pub fn report(&mut self, stage: Stage, progress: f64, counters: Counters) -> Result<()> {
        self.emit(ProgressEvent::new(stage, progress).with_counters(counters))
    }

    /// Send an event. Progress never goes backwards and never reaches 1.0
    /// before [`ExtractionContext::complete`].
    pub fn emit(&mut self, mut event: ProgressEvent) -> Result<()> {
        self.checkpoint()?;
        let progress = if event.progress.is_finite() {
            event.progress
        } else {
            self.last_progress
        };
        let ceiling: f64 = if event.is_complete { 1.0 } else { 0.99 };
        event.progress = progress.clamp(self.last_progress, ceiling.max(self.last_progress));
        self.last_progress = event.progress;
        if !self.sink.emit(event) {
            self.token.cancel();
            return Err(PaletteError::Cancelled);
        }
        Ok(())
    }

    /// Send the terminal event carrying the final palette.
    pub fn complete(&mut self, colors: Vec<Rgb>, counters: Counters) -> Result<()> {
        let mut event = ProgressEvent::new(Stage::Completed, 1.0)
            .with_counters(counters)
            .with_colors(colors);
        event.is_complete = true;
        self.emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped_monotonic() {
        let mut events: Vec<ProgressEvent> = Vec::new();
        {
            let mut ctx = ExtractionContext::new(&mut events);
            ctx.report(Stage::Preprocessing, 0.4, Counters::default()).unwrap();
            ctx.report(Stage::Scoring, 0.2, Counters::default()).unwrap();
            ctx.report(Stage::Selecting, 1.0, Counters::default()).unwrap();
            ctx.complete(vec![Rgb::new(1, 2, 3)], Counters::default()).unwrap();
        }
        let progress: Vec<f64> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![0.4, 0.4, 0.99, 1.0]);
        assert!(events.last().unwrap().is_complete);
        assert_eq!(events.last().unwrap().colors, vec![Rgb::new(1, 2, 3)]);
    }

    #[test]
    fn test_cancelled_token_stops_checkpoint() {
        let mut sink = NoProgress;
        let token = CancellationToken::new();
        let ctx = ExtractionContext::with_token(&mut sink, token.clone());
        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(ctx.checkpoint(), Err(PaletteError::Cancelled)));
    }

    #[test]
    fn test_closed_sink_cancels() {
        let mut sink = FnSink(|_event: ProgressEvent| false);
        let mut ctx = ExtractionContext::new(&mut sink);
        let result = ctx.report(Stage::Preprocessing, 0.1, Counters::default());
        assert!(matches!(result, Err(PaletteError::Cancelled)));
        assert!(ctx.token().is_cancelled());
    }
}
