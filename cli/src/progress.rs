//! Terminal progress sink.

use engine::progress::{format_hms, ProgressCallback, ProgressUpdate, Stage};
use std::io::Write;
use std::time::Duration;

/// Writes a progress bar per stage to stderr.
pub struct CliProgress {
    verbose: bool,
}

impl CliProgress {
    pub fn new(verbose: bool) -> Self {
        CliProgress { verbose }
    }

    fn progress_bar(percent: f64) -> String {
        let percent = percent.clamp(0.0, 100.0) as usize;
        let filled = percent / 5;
        format!("[{}{}] {:3}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
    }

    fn stage_label(stage: Stage) -> &'static str {
        match stage {
            Stage::HashSource => "Hashing source",
            Stage::Copy => "Copying",
            Stage::HashDestination => "Hashing destination",
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_stage_started(&self, stage: Stage, total: usize) {
        eprintln!("{}: {} files", Self::stage_label(stage), total);
    }

    fn on_progress(&self, update: &ProgressUpdate<'_>) {
        if self.verbose {
            eprintln!("  [{}/{}] {}", update.processed, update.total, update.current);
        }
        eprint!(
            "\r{} {}/{} | elapsed {} | eta {}",
            Self::progress_bar(update.percent()),
            update.processed,
            update.total,
            format_hms(update.elapsed),
            format_hms(update.eta)
        );
        let _ = std::io::stderr().flush();
    }

    fn on_stage_completed(&self, stage: Stage, processed: usize, elapsed: Duration) {
        eprintln!();
        eprintln!(
            "{} done: {} files in {}",
            Self::stage_label(stage),
            processed,
            format_hms(elapsed)
        );
    }
}
