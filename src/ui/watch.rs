use std::time::Duration;

use console::style;
use dependify_common::{Applied, JobStatus};
use indicatif::{ProgressBar, ProgressStyle};

use crate::dashboard::{DisplayStatus, FeedHealth, JobTracker};
use crate::ui::icons::{CHECK, CROSS, FILE_MOD, LINK, WARN};

/// Spinner that follows one job while `dependify watch` runs.
///
/// The spinner line shows the displayed status and feed health; file
/// results and status changes are printed above it as they arrive.
pub struct WatchUI {
    bar: ProgressBar,
    verbose: bool,
}

impl WatchUI {
    pub fn new(repository: &str, verbose: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix(repository.to_string());
        bar.set_message("connecting to progress feed...");
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar, verbose }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        self.bar.println(msg.as_ref());
    }

    /// Reflect the tracker after one feed message.
    pub fn update(&self, tracker: &JobTracker, applied: Option<&Applied>) {
        match applied {
            Some(Applied::Advanced { to, .. }) => {
                self.print_line(format!("  {} {}", style("→").cyan(), to.label()));
            }
            Some(Applied::Failed { .. }) => {
                self.print_line(format!(
                    "  {} {}",
                    style("→").red(),
                    style(JobStatus::Failed.label()).red()
                ));
            }
            Some(Applied::FileRecorded {
                file_name,
                replaced,
            }) => {
                let verb = if *replaced { "updated" } else { "rewritten" };
                self.print_line(format!("  {}{} {}", FILE_MOD, style(file_name).bold(), verb));
            }
            Some(Applied::Logged) if self.verbose => {
                if let Some(message) = &tracker.job().last_message {
                    self.print_line(format!("  {}", style(message).dim()));
                }
            }
            _ => {}
        }

        let health = match tracker.health() {
            FeedHealth::Connecting => style("connecting").dim().to_string(),
            FeedHealth::Live => style("live").green().to_string(),
            FeedHealth::Reconnecting { attempt } => {
                style(format!("reconnecting (attempt {})", attempt))
                    .yellow()
                    .to_string()
            }
            FeedHealth::Unknown => style("feed lost").red().to_string(),
        };
        self.bar.set_message(format!(
            "{} {}",
            tracker.display_status(),
            style(format!("[{}]", health)).dim()
        ));
    }

    /// Stop the spinner and print the final outcome.
    pub fn finish(&self, tracker: &JobTracker) {
        self.bar.finish_and_clear();
        let job = tracker.job();
        match tracker.display_status() {
            DisplayStatus::Known(JobStatus::Opened) => {
                println!(
                    "{}{} ({} files)",
                    CHECK,
                    style("Pull request opened").green().bold(),
                    job.files.len()
                );
                if let Some(url) = &job.pull_request_url {
                    println!("   {}{}", LINK, style(url).underlined());
                }
            }
            DisplayStatus::Known(JobStatus::Failed) => {
                println!("{}{}", CROSS, style("Job failed").red().bold());
                if let Some(reason) = &job.failure {
                    println!("   {}", reason);
                }
            }
            DisplayStatus::Unknown => {
                println!(
                    "{}{} (last seen: {})",
                    WARN,
                    style("Status unknown: lost the progress feed").yellow(),
                    job.status.label()
                );
                println!("   Run `dependify watch {}` to try again.", job.job_id);
            }
            DisplayStatus::Known(status) => {
                println!("{}", status.label());
            }
        }
    }
}
