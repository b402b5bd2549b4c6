//! 📊 progress.rs: "Are we there yet?" Every bulk run, every time, forever.
//!
//! 🚀 [`BulkProgress`] is a [`BulkAllObserver`] that draws an indicatif bar while outcomes
//! roll in, and [`render_summary`] turns the final [`BulkSummary`] into a table so comfy it
//! has lumbar support.
//!
//! ⚠️ Watching this progress bar will not make it go faster. We've tried. Science says no.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::bulk::{BulkAllObserver, BulkOutcome, BulkSummary};
use crate::errors::RepositoryError;

// -- 🔟 nobody reads past the tenth failure. if you do, consume the outcomes yourself.
const MAX_LISTED_FAILURES: usize = 10;

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS. If it shows hours, call your mom. It's been a while.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📊 Live progress for a `bulk_all` run.
///
/// Knows the document total when you tell it (bar), shrugs when you don't (spinner).
pub struct BulkProgress {
    label: String,
    bar: ProgressBar,
    documents: u64,
    failed: u64,
    batches: u64,
    /// 🔄 (timestamp, documents) samples for a 5-second sliding rate window
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for BulkProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't do Debug
        f.debug_struct("BulkProgress")
            .field("label", &self.label)
            .field("documents", &self.documents)
            .field("failed", &self.failed)
            .field("batches", &self.batches)
            .finish()
    }
}

impl BulkProgress {
    /// 🚀 `expected_documents = None` gets a spinner instead of a bar.
    pub fn new(label: impl Into<String>, expected_documents: Option<u64>) -> Self {
        let bar = match expected_documents {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style = ProgressStyle::default_bar()
                    .template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}")
                    .map(|style| style.progress_chars("=>-"))
                    .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let spinner = ProgressBar::new_spinner();
                spinner.enable_steady_tick(Duration::from_millis(120));
                spinner
            }
        };
        Self::with_bar(label.into(), bar)
    }

    /// 🙈 Same bookkeeping, nothing drawn. For tests and pipes.
    pub fn hidden(label: impl Into<String>) -> Self {
        Self::with_bar(label.into(), ProgressBar::hidden())
    }

    fn with_bar(label: String, bar: ProgressBar) -> Self {
        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0));
        Self {
            label,
            bar,
            documents: 0,
            failed: 0,
            batches: 0,
            rate_samples,
            start_time,
        }
    }

    pub fn documents(&self) -> u64 {
        self.documents
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 📈 Docs per second over the last five seconds, so one slow batch doesn't scare anyone.
    fn docs_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.documents));
        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_docs)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    self.documents.saturating_sub(oldest_docs) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

impl BulkAllObserver for BulkProgress {
    fn on_next(&mut self, outcome: &BulkOutcome) -> ControlFlow<()> {
        self.batches += 1;
        self.documents += outcome.submitted as u64;
        self.failed += outcome.failed as u64;
        let rate = self.docs_per_sec();
        self.bar.set_position(self.documents);
        self.bar.set_message(format!(
            "{}: batch {} | {} docs | {} failed | {} docs/s | {}",
            self.label,
            outcome.sequence,
            format_number(self.documents),
            format_number(self.failed),
            format_number(rate as u64),
            format_duration(self.elapsed()),
        ));
        ControlFlow::Continue(())
    }

    fn on_error(&mut self, error: &RepositoryError) {
        self.bar.abandon_with_message(format!("💀 {}: {error}", self.label));
    }

    fn on_completed(&mut self, summary: &BulkSummary) {
        let verdict = if summary.cancelled { "🛑 cancelled" } else { "✅ done" };
        self.bar.finish_with_message(format!(
            "{verdict}: {} docs in {} batches ({})",
            format_number(summary.submitted as u64),
            format_number(summary.batches),
            format_duration(self.elapsed()),
        ));
    }
}

/// 🍽️ The end-of-run table, plus the first few failures if there were any.
pub fn render_summary(summary: &BulkSummary) -> String {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let rows = [
        ("batches", format_number(summary.batches)),
        ("submitted", format_number(summary.submitted as u64)),
        ("succeeded", format_number(summary.succeeded as u64)),
        ("failed", format_number(summary.failed as u64)),
        ("cancelled", summary.cancelled.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    let mut rendered = table.to_string();

    if !summary.failures.is_empty() {
        let mut failures = Table::new();
        failures.load_preset(NOTHING);
        failures.set_content_arrangement(ContentArrangement::Dynamic);
        failures.set_header(vec!["batch", "position", "id", "status", "reason"]);
        for failed in summary.failures.iter().take(MAX_LISTED_FAILURES) {
            failures.add_row(vec![
                Cell::new(failed.sequence),
                Cell::new(failed.failure.position),
                Cell::new(failed.failure.id.as_deref().unwrap_or("-")),
                Cell::new(failed.failure.status),
                Cell::new(&failed.failure.reason),
            ]);
        }
        rendered.push_str("\n\n");
        rendered.push_str(&failures.to_string());
        if summary.failures.len() > MAX_LISTED_FAILURES {
            rendered.push_str(&format!(
                "\n... and {} more",
                format_number((summary.failures.len() - MAX_LISTED_FAILURES) as u64)
            ));
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkItemFailure, SummaryFailure};

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_time_is_formatted_for_humans() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_the_observer_keeps_count_quietly() {
        let mut progress = BulkProgress::hidden("orders");
        let outcome = BulkOutcome {
            sequence: 0,
            submitted: 3,
            succeeded: 2,
            failed: 1,
            failures: vec![],
            took_ms: Some(3),
        };
        assert!(progress.on_next(&outcome).is_continue());
        assert!(progress.on_next(&BulkOutcome { sequence: 1, ..outcome }).is_continue());
        assert_eq!(progress.documents(), 6);
        assert_eq!(progress.failed, 2);
        progress.on_completed(&BulkSummary::default());
    }

    #[test]
    fn the_one_where_the_summary_table_names_names() {
        let failures = (0..12)
            .map(|position| SummaryFailure {
                sequence: 2,
                failure: BulkItemFailure {
                    position,
                    id: Some(format!("doc-{position}")),
                    status: 400,
                    error_type: None,
                    reason: "validation error".into(),
                },
            })
            .collect();
        let summary = BulkSummary {
            batches: 3,
            submitted: 2_500,
            succeeded: 2_488,
            failed: 12,
            failures,
            cancelled: false,
        };
        let rendered = render_summary(&summary);
        assert!(rendered.contains("2,500"));
        assert!(rendered.contains("2,488"));
        assert!(rendered.contains("doc-0"));
        assert!(!rendered.contains("doc-11"), "only the first ten failures are listed");
        assert!(rendered.contains("and 2 more"));
    }
}
