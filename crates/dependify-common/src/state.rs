//! Job state machine.
//!
//! All job mutation goes through [`apply`], a single reduction function that
//! folds one [`ProgressEvent`] into a [`Job`]. The fold is:
//!
//! - **forward-only**: a status event whose target is not strictly later in
//!   [`JobStatus::SEQUENCE`] than the current status is ignored;
//! - **terminal-sticky**: once a job is `opened` or `failed`, nothing changes;
//! - **idempotent**: re-applying an event that was already applied leaves the
//!   job exactly as it was.
//!
//! Together these keep the displayed state monotonic when the feed redelivers
//! or reorders events.

use chrono::{DateTime, Utc};

use crate::models::{
    EventBody, EventError, FileResult, Job, JobId, JobStatus, ProgressEvent, StatusPayload,
    Upsert,
};

/// Why an event left the job untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event belongs to another job.
    ForeignJob(JobId),
    /// The job already reached a terminal status.
    Terminal(JobStatus),
    /// The target status is not after the current one.
    NotForward { current: JobStatus, target: JobStatus },
    /// Same content as what the job already holds.
    Duplicate,
}

/// Outcome of folding one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Advanced { from: JobStatus, to: JobStatus },
    Failed { from: JobStatus },
    FileRecorded { file_name: String, replaced: bool },
    Logged,
    Ignored(IgnoreReason),
}

impl Applied {
    /// Whether the job snapshot changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Ignored(_))
    }
}

/// Whether a job in `current` may move to `target`.
pub fn can_transition(current: JobStatus, target: JobStatus) -> bool {
    if current.is_terminal() {
        return false;
    }
    match (current.rank(), target.rank()) {
        (_, None) => true,
        (Some(from), Some(to)) => to > from,
        (None, Some(_)) => false,
    }
}

/// Fold one event into `job`, stamping `updated_at` with the current time
/// when it changes anything.
///
/// Returns an error only when the payload cannot be decoded; a decodable
/// event that does not apply is reported as [`Applied::Ignored`].
pub fn apply(job: &mut Job, event: &ProgressEvent) -> Result<Applied, EventError> {
    apply_at(job, event, Utc::now())
}

/// [`apply`] with an explicit clock.
///
/// Foreign and terminal checks come before the payload is decoded, so a
/// malformed event for a finished job is ignored rather than rejected.
pub fn apply_at(
    job: &mut Job,
    event: &ProgressEvent,
    now: DateTime<Utc>,
) -> Result<Applied, EventError> {
    if event.job_id != job.job_id {
        return Ok(Applied::Ignored(IgnoreReason::ForeignJob(
            event.job_id.clone(),
        )));
    }
    if job.status.is_terminal() {
        return Ok(Applied::Ignored(IgnoreReason::Terminal(job.status)));
    }

    let applied = match event.body()? {
        EventBody::Status(payload) => apply_status(job, payload),
        EventBody::File(file) => apply_file(job, file),
        EventBody::Log(log) => {
            if job.last_message.as_deref() == Some(log.message.as_str()) {
                Applied::Ignored(IgnoreReason::Duplicate)
            } else {
                job.last_message = Some(log.message);
                Applied::Logged
            }
        }
    };
    if applied.changed() {
        job.updated_at = now;
    }
    Ok(applied)
}

fn apply_status(job: &mut Job, payload: StatusPayload) -> Applied {
    let current = job.status;
    let target = payload.status;

    if !can_transition(current, target) {
        return Applied::Ignored(IgnoreReason::NotForward { current, target });
    }

    job.status = target;
    if let Some(message) = payload.message.clone() {
        job.last_message = Some(message);
    }
    if let Some(url) = payload.pull_request_url {
        job.pull_request_url = Some(url);
    }

    if target == JobStatus::Failed {
        job.failure = payload
            .error
            .or(payload.message)
            .or_else(|| Some("The pipeline reported a failure without details".to_string()));
        Applied::Failed { from: current }
    } else {
        Applied::Advanced {
            from: current,
            to: target,
        }
    }
}

fn apply_file(job: &mut Job, file: FileResult) -> Applied {
    let file_name = file.file_name.clone();
    match job.files.upsert(file) {
        Upsert::Inserted => Applied::FileRecorded {
            file_name,
            replaced: false,
        },
        Upsert::Replaced => Applied::FileRecorded {
            file_name,
            replaced: true,
        },
        Upsert::Unchanged => Applied::Ignored(IgnoreReason::Duplicate),
    }
}

/// Fold a sequence of events in delivery order, skipping undecodable ones.
pub fn replay<'a, I>(job: &mut Job, events: I) -> Vec<Applied>
where
    I: IntoIterator<Item = &'a ProgressEvent>,
{
    events
        .into_iter()
        .filter_map(|event| apply(job, event).ok())
        .collect()
}
