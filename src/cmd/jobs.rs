//! Job commands: `dependify submit`, `dependify watch`, `dependify diff`.

use anyhow::{Context, Result, bail};
use console::style;
use dependify::client::{
    FeedMessage, ProgressSubscriber, SubmissionClient, SubscriberConfig, WsTransport,
};
use dependify::config::DependifyConfig;
use dependify::dashboard::{DisplayStatus, JobTracker};
use dependify::diff::{Changelog, DiffView, LineStats};
use dependify::errors::SubmitError;
use dependify::ui::WatchUI;
use dependify::ui::icons::{CROSS, ROCKET, WARN};
use dependify_common::{JobId, JobStatus};
use tokio::sync::mpsc;

use super::open_session;

fn submission_client(config: &DependifyConfig) -> Result<SubmissionClient> {
    let store = open_session(config)?;
    let token = store.bearer_token().map(str::to_string);
    if token.is_none() {
        tracing::debug!("no valid session; sending unauthenticated requests");
    }
    Ok(SubmissionClient::new(config.client.api_url.clone()).with_token(token))
}

pub async fn cmd_submit(
    config: &DependifyConfig,
    repository: &str,
    watch: bool,
    verbose: bool,
) -> Result<()> {
    let client = submission_client(config)?;
    let job_id = match client.submit(repository).await {
        Ok(id) => id,
        Err(SubmitError::Validation(e)) => {
            println!("{}{}", CROSS, style(&e).red());
            bail!("'{}' is not a GitHub repository reference", repository);
        }
        Err(e) => return Err(e).context("Failed to submit job"),
    };

    println!("{}Submitted {} as job {}", ROCKET, style(repository).bold(), style(&job_id).cyan());
    if watch {
        cmd_watch(config, job_id.as_str(), verbose).await
    } else {
        println!("Follow it with `dependify watch {}`.", job_id);
        Ok(())
    }
}

pub async fn cmd_watch(config: &DependifyConfig, job_id: &str, verbose: bool) -> Result<()> {
    let job_id = JobId::new(job_id);
    let client = submission_client(config)?;
    let job = client
        .fetch_job(&job_id)
        .await
        .with_context(|| format!("Failed to load job {}", job_id))?;

    let ui = WatchUI::new(&job.repository.to_string(), verbose);
    let mut tracker = JobTracker::new(job);

    let subscriber = ProgressSubscriber::new(
        WsTransport::new(config.feed_url()),
        SubscriberConfig {
            max_attempts: config.client.max_resubscribe_attempts,
            backoff: config.resubscribe_backoff(),
        },
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<FeedMessage>();
    let handle = subscriber.subscribe(job_id.clone(), move |msg| {
        let _ = tx.send(msg);
    });

    while !tracker.is_finished() {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(%job_id, "stopped watching");
                break;
            }
        };
        let Some(msg) = msg else { break };
        let applied = tracker.handle(msg);
        ui.update(&tracker, applied.as_ref());
    }

    subscriber.unsubscribe(handle).await;
    ui.finish(&tracker);

    match tracker.display_status() {
        DisplayStatus::Known(JobStatus::Opened) => {
            println!("Review the changes with `dependify diff {}`.", job_id);
            Ok(())
        }
        DisplayStatus::Known(JobStatus::Failed) => bail!("Job {} failed", job_id),
        DisplayStatus::Unknown => bail!("Lost the progress feed for job {}", job_id),
        DisplayStatus::Known(_) => Ok(()),
    }
}

/// Output of `dependify diff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffFormat {
    Unified,
    Markdown,
    Json,
}

pub async fn cmd_diff(
    config: &DependifyConfig,
    job_id: &str,
    file: Option<&str>,
    format: DiffFormat,
    context_lines: usize,
) -> Result<()> {
    let client = submission_client(config)?;
    let job = client
        .fetch_job(&JobId::new(job_id))
        .await
        .with_context(|| format!("Failed to load job {}", job_id))?;

    if job.status != JobStatus::Opened {
        // stderr keeps --json output parseable.
        eprintln!(
            "{}Job is {}; showing the files received so far.",
            WARN,
            style(job.status.label()).yellow()
        );
    }

    match format {
        DiffFormat::Markdown => {
            print!(
                "{}",
                Changelog::from_files(job.files.as_slice()).pr_description(&job.repository)
            );
            return Ok(());
        }
        DiffFormat::Json => {
            let json = Changelog::from_files(job.files.as_slice())
                .to_json()
                .context("Failed to serialize changelog")?;
            println!("{}", json);
            return Ok(());
        }
        DiffFormat::Unified => {}
    }

    let mut view = DiffView::from_job(&job);
    if view.is_empty() {
        println!("No files were changed.");
        return Ok(());
    }
    if let Some(name) = file
        && !view.select_file(name)
    {
        println!("{}No file named {}; showing the first file.", WARN, style(name).bold());
    }

    let total = view.total_stats();
    println!(
        "{} files changed, {} lines in the new versions ({} / {})",
        view.files_changed(),
        view.total_after_lines(),
        style(format!("+{}", total.added)).green(),
        style(format!("-{}", total.removed)).red(),
    );
    if let Some(url) = view.pull_request_url() {
        println!("Pull request: {}", style(url).underlined());
    }
    println!();

    let selected = view.selected().map(|f| f.file_name.clone());
    for f in view.files() {
        let marker = if Some(&f.file_name) == selected.as_ref() { ">" } else { " " };
        let stats = LineStats::of(f);
        println!(
            "{} {} {} {}",
            marker,
            f.file_name,
            style(format!("+{}", stats.added)).green(),
            style(format!("-{}", stats.removed)).red()
        );
    }
    println!();

    if let Some(panel) = view.panel() {
        println!("{}", style(panel.file_name).bold());
        if let Some((score, tier)) = panel.confidence {
            println!("Confidence: {}/100 ({})", score, tier.label());
        }
        if !panel.description.is_empty() {
            println!("{}", panel.description);
        }
        for change in panel.key_changes {
            println!("  • {}", change);
        }
        println!();
    }

    match view.render_unified(context_lines) {
        Some(diff) => {
            for line in diff.lines() {
                let styled = if line.starts_with("+++") || line.starts_with("---") {
                    style(line).bold()
                } else if line.starts_with('+') {
                    style(line).green()
                } else if line.starts_with('-') {
                    style(line).red()
                } else if line.starts_with("@@") {
                    style(line).cyan()
                } else {
                    style(line)
                };
                println!("{}", styled);
            }
        }
        None => println!("{}", style("(no content recorded for this file)").dim()),
    }
    Ok(())
}
