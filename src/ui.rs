//! Terminal output: spinners, batch progress bar and coloured outcomes.
//!
//! Built on `indicatif` for progress and `console` for colours.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::BatchProgress;
use crate::report::{BatchReport, ItemOutcome, Summary};
use crate::state_machine::Outcome;

struct Palette {
    green: Style,
    red: Style,
    yellow: Style,
}

impl Palette {
    fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    fn line(&self, item: &ItemOutcome) -> String {
        match &item.outcome {
            Outcome::Succeeded(_) => format!("  {} {}", self.green.apply_to("✓"), item.filename),
            Outcome::Failed(reason) => {
                format!("  {} {}: {reason}", self.red.apply_to("✗"), item.filename)
            }
            Outcome::TimedOut(reason) | Outcome::Cancelled(reason) => {
                format!("  {} {}: {reason}", self.yellow.apply_to("⏱"), item.filename)
            }
        }
    }
}

/// Spinner shown while waiting on a single job.
pub struct JobSpinner {
    pb: ProgressBar,
    palette: Palette,
}

impl JobSpinner {
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("waiting for {label}"));
        pb.enable_steady_tick(Duration::from_millis(100));
        Self {
            pb,
            palette: Palette::new(),
        }
    }

    /// Clears the spinner and prints the summary line plus JSON.
    pub fn complete(&self, summary: &Summary) {
        self.pb.finish_and_clear();
        for item in &summary.items {
            println!("{}", self.palette.line(item));
        }
        println!("{}", serde_json::to_string_pretty(summary).unwrap_or_default());
    }
}

/// Progress bar for a batch.
pub struct BatchBar {
    pb: ProgressBar,
    palette: Palette,
    batch_id: String,
}

impl BatchBar {
    pub fn start(batch_id: &str, total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message(batch_id.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self {
            pb,
            palette: Palette::new(),
            batch_id: batch_id.to_string(),
        }
    }

    pub fn update(&self, progress: &BatchProgress) {
        let (done, total) = progress.position();
        self.pb.set_length(total);
        self.pb.set_position(done);
        let mut message = self.batch_id.clone();
        if let Some(percent) = progress.percent() {
            message.push_str(&format!(" {percent:.0}%"));
        }
        if let BatchProgress::Counted(counts) = progress
            && counts.failed > 0
        {
            message.push_str(&format!(" {} failed", counts.failed));
        }
        self.pb.set_message(message);
    }

    pub fn finish(&self, report: &BatchReport) {
        self.pb.finish_and_clear();
        for item in report.items() {
            println!("{}", self.palette.line(item));
        }
        let style = if report.failed() == 0 {
            &self.palette.green
        } else {
            &self.palette.red
        };
        println!(
            "{}",
            style.apply_to(format!(
                "─── {} of {} converted ───",
                report.successful(),
                report.total()
            ))
        );
        println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
    }
}
