//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the
//! pipeline from any specific output (log lines, terminal, GUI).
//!
//! Stages report every N files (the configured interval) and always on the
//! last file, so `processed` is strictly increasing within a stage.

use std::fmt;
use std::time::{Duration, Instant};

/// A long-running pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Digest pass over the source tree (before copy)
    HashSource,
    /// File transfer
    Copy,
    /// Digest pass over the destination tree (after copy)
    HashDestination,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::HashSource => write!(f, "hash-source"),
            Stage::Copy => write!(f, "copy"),
            Stage::HashDestination => write!(f, "hash-destination"),
        }
    }
}

/// A point-in-time progress report for one stage.
#[derive(Debug, Clone)]
pub struct ProgressUpdate<'a> {
    pub stage: Stage,
    /// Files processed so far, including the current one.
    pub processed: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Linear projection from the average per-file time so far.
    pub eta: Duration,
    /// Relative path of the file just processed.
    pub current: &'a str,
}

impl ProgressUpdate<'_> {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 / self.total as f64 * 100.0
        }
    }
}

/// Trait for receiving progress updates from pipeline stages.
///
/// All methods are called synchronously on the pipeline thread.
pub trait ProgressCallback: Send {
    /// Called once before a stage processes its first file.
    fn on_stage_started(&self, stage: Stage, total: usize);

    /// Called every configured interval and on the last file.
    fn on_progress(&self, update: &ProgressUpdate<'_>);

    /// Called once after a stage has processed every file.
    fn on_stage_completed(&self, stage: Stage, processed: usize, elapsed: Duration);
}

/// Default sink: reports through `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_stage_started(&self, stage: Stage, total: usize) {
        tracing::info!(%stage, total, "stage started");
    }

    fn on_progress(&self, update: &ProgressUpdate<'_>) {
        tracing::info!(
            stage = %update.stage,
            processed = update.processed,
            total = update.total,
            percent = update.percent(),
            elapsed = %format_hms(update.elapsed),
            eta = %format_hms(update.eta),
            "progress"
        );
    }

    fn on_stage_completed(&self, stage: Stage, processed: usize, elapsed: Duration) {
        tracing::info!(%stage, processed, elapsed = %format_hms(elapsed), "stage completed");
    }
}

/// Tracks timing for one stage and decides when to emit a report.
pub(crate) struct StageTracker<'a> {
    stage: Stage,
    total: usize,
    interval: usize,
    started: Instant,
    processed: usize,
    sink: &'a dyn ProgressCallback,
}

impl<'a> StageTracker<'a> {
    pub(crate) fn start(
        stage: Stage,
        total: usize,
        interval: usize,
        sink: &'a dyn ProgressCallback,
    ) -> Self {
        sink.on_stage_started(stage, total);
        StageTracker {
            stage,
            total,
            interval: interval.max(1),
            started: Instant::now(),
            processed: 0,
            sink,
        }
    }

    /// Mark one more file processed; reports if the interval or the end is reached.
    pub(crate) fn advance(&mut self, current: &str) {
        self.processed += 1;
        if self.processed % self.interval != 0 && self.processed != self.total {
            return;
        }
        let elapsed = self.started.elapsed();
        self.sink.on_progress(&ProgressUpdate {
            stage: self.stage,
            processed: self.processed,
            total: self.total,
            elapsed,
            eta: linear_eta(elapsed, self.processed, self.total),
            current,
        });
    }

    pub(crate) fn finish(self) {
        self.sink
            .on_stage_completed(self.stage, self.processed, self.started.elapsed());
    }
}

/// Remaining time assuming every remaining file costs the average so far.
pub fn linear_eta(elapsed: Duration, processed: usize, total: usize) -> Duration {
    if processed == 0 || processed >= total {
        return Duration::ZERO;
    }
    let remaining = (total - processed) as u32;
    elapsed / processed as u32 * remaining
}

/// Format a duration as `HH:MM:SS`.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
