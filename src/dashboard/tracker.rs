//! Client-side view of one running job.

use std::fmt;

use dependify_common::{Applied, Job, JobStatus, state};

use crate::client::FeedMessage;
use crate::diff::DiffView;

/// Health of the progress feed behind a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    Connecting,
    Live,
    Reconnecting { attempt: u32 },
    /// Re-attach attempts were exhausted.
    Unknown,
}

/// Status as it should be shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Known(JobStatus),
    Unknown,
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(status) => f.write_str(status.label()),
            Self::Unknown => f.write_str("status unknown"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobTracker {
    job: Job,
    health: FeedHealth,
}

impl JobTracker {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            health: FeedHealth::Connecting,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn health(&self) -> FeedHealth {
        self.health
    }

    /// Fold one subscription message. Returns the reducer outcome for
    /// progress events.
    pub fn handle(&mut self, message: FeedMessage) -> Option<Applied> {
        match message {
            FeedMessage::Connected => {
                self.health = FeedHealth::Live;
                None
            }
            FeedMessage::Disconnected { attempt } => {
                self.health = FeedHealth::Reconnecting { attempt };
                None
            }
            FeedMessage::Lost => {
                self.health = FeedHealth::Unknown;
                None
            }
            FeedMessage::Event(event) => match state::apply(&mut self.job, &event) {
                Ok(applied) => {
                    if applied.changed() {
                        tracing::debug!(job_id = %self.job.job_id, ?applied, "job updated");
                    }
                    Some(applied)
                }
                Err(e) => {
                    tracing::warn!(job_id = %self.job.job_id, error = %e, "dropping malformed event");
                    None
                }
            },
        }
    }

    /// A lost feed hides the last known status of a job that is still
    /// running; it never turns into `failed`.
    pub fn display_status(&self) -> DisplayStatus {
        if !self.job.status.is_terminal() && self.health == FeedHealth::Unknown {
            DisplayStatus::Unknown
        } else {
            DisplayStatus::Known(self.job.status)
        }
    }

    /// Nothing more will change: the job is terminal or the feed is gone.
    /// The caller should release the subscription.
    pub fn is_finished(&self) -> bool {
        self.job.status.is_terminal() || self.health == FeedHealth::Unknown
    }

    /// Review model, once the pull request is open.
    pub fn diff_view(&self) -> Option<DiffView> {
        (self.job.status == JobStatus::Opened).then(|| DiffView::from_job(&self.job))
    }
}
