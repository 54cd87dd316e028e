//! In-memory job registry with one broadcast channel per job.
//!
//! Events are folded with the same reducer the dashboard uses, so the hub's
//! snapshot and every subscriber's converge. Mutation and channel fan-out
//! happen under one lock: a subscriber attaching mid-stream gets a replay
//! that ends exactly where its live receiver begins.
//!
//! Jobs that reached a terminal status are kept for a retention window and
//! then evicted by [`JobHub::sweep`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use dependify_common::{Applied, Job, JobId, ProgressEvent, RepoRef, state};
use tokio::sync::broadcast;

use crate::errors::HubError;

struct JobEntry {
    job: Job,
    tx: broadcast::Sender<String>,
    /// Set when the job first reaches a terminal status.
    finished_at: Option<Instant>,
}

pub struct JobHub {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    capacity: usize,
    retention: Duration,
}

impl JobHub {
    /// `capacity` bounds each job's broadcast buffer; `retention` is how long
    /// a finished job stays queryable.
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            retention,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, JobEntry>>, HubError> {
        self.jobs.lock().map_err(|_| HubError::LockPoisoned)
    }

    /// Register a new queued job. Every call creates a distinct job, even
    /// for a repository that is already being processed.
    pub fn create_job(&self, repository: RepoRef) -> Result<Job, HubError> {
        let job = Job::new(JobId::generate(), repository, Utc::now());
        let (tx, _) = broadcast::channel(self.capacity);
        let mut jobs = self.lock()?;
        evict_finished(&mut jobs, Instant::now(), self.retention);
        jobs.insert(
            job.job_id.clone(),
            JobEntry {
                job: job.clone(),
                tx,
                finished_at: None,
            },
        );
        tracing::info!(job_id = %job.job_id, repository = %job.repository, "job created");
        Ok(job)
    }

    pub fn get(&self, job_id: &JobId) -> Result<Job, HubError> {
        self.lock()?
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| HubError::JobNotFound { id: job_id.clone() })
    }

    /// Fold `event` into its job and broadcast it when it changed anything.
    pub fn publish(&self, event: &ProgressEvent) -> Result<Applied, HubError> {
        let mut jobs = self.lock()?;
        let entry = jobs
            .get_mut(&event.job_id)
            .ok_or_else(|| HubError::JobNotFound {
                id: event.job_id.clone(),
            })?;

        let applied = state::apply(&mut entry.job, event)?;
        if entry.finished_at.is_none() && entry.job.status.is_terminal() {
            entry.finished_at = Some(Instant::now());
        }
        if applied.changed() {
            match serde_json::to_string(event) {
                Ok(json) => {
                    // No receivers is fine.
                    let _ = entry.tx.send(json);
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize progress event"),
            }
            tracing::debug!(job_id = %event.job_id, ?applied, "event published");
        } else {
            tracing::debug!(job_id = %event.job_id, ?applied, "event ignored");
        }
        Ok(applied)
    }

    /// Snapshot replay (serialized events) plus a receiver for everything
    /// published afterwards.
    pub fn attach(
        &self,
        job_id: &JobId,
    ) -> Result<(Vec<String>, broadcast::Receiver<String>), HubError> {
        let jobs = self.lock()?;
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| HubError::JobNotFound { id: job_id.clone() })?;
        let replay = entry
            .job
            .replay_events()
            .iter()
            .filter_map(|event| serde_json::to_string(event).ok())
            .collect();
        Ok((replay, entry.tx.subscribe()))
    }

    /// Evict finished jobs older than the retention window. Returns how
    /// many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        match self.lock() {
            Ok(mut jobs) => evict_finished(&mut jobs, now, self.retention),
            Err(e) => {
                tracing::error!(error = %e, "job sweep skipped");
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|jobs| jobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_finished(jobs: &mut HashMap<JobId, JobEntry>, now: Instant, retention: Duration) -> usize {
    let before = jobs.len();
    jobs.retain(|_, entry| match entry.finished_at {
        Some(at) => now.saturating_duration_since(at) < retention,
        None => true,
    });
    let evicted = before - jobs.len();
    if evicted > 0 {
        tracing::info!(evicted, remaining = jobs.len(), "evicted finished jobs");
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use dependify_common::{EventType, FileResult, JobStatus, StatusPayload};

    const RETENTION: Duration = Duration::from_secs(60);

    fn repo() -> RepoRef {
        RepoRef::parse("octocat/hello").unwrap()
    }

    fn hub() -> JobHub {
        JobHub::new(16, RETENTION)
    }

    fn finish(hub: &JobHub, id: &JobId, status: JobStatus) {
        hub.publish(&ProgressEvent::status(id.clone(), StatusPayload::new(status)))
            .unwrap();
    }

    #[test]
    fn test_each_submission_is_a_distinct_job() {
        let hub = hub();
        let a = hub.create_job(repo()).unwrap();
        let b = hub.create_job(repo()).unwrap();
        assert_ne!(a.job_id, b.job_id);
        assert_eq!(hub.len(), 2);
        assert_eq!(hub.get(&a.job_id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_unknown_job() {
        let hub = hub();
        let id = JobId::new("nope");
        assert!(matches!(hub.get(&id), Err(HubError::JobNotFound { .. })));
        assert!(matches!(
            hub.publish(&ProgressEvent::log(id.clone(), "hi")),
            Err(HubError::JobNotFound { .. })
        ));
        assert!(hub.attach(&id).is_err());
    }

    #[test]
    fn test_publish_broadcasts_only_changes() {
        let hub = hub();
        let job = hub.create_job(repo()).unwrap();
        let (_, mut rx) = hub.attach(&job.job_id).unwrap();

        let event = ProgressEvent::status(
            job.job_id.clone(),
            StatusPayload::new(JobStatus::Analyzing),
        );
        assert!(hub.publish(&event).unwrap().changed());
        assert!(!hub.publish(&event).unwrap().changed());

        let received: ProgressEvent = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(received, event);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_malformed_event_rejected() {
        let hub = hub();
        let job = hub.create_job(repo()).unwrap();
        let bad = ProgressEvent {
            job_id: job.job_id.clone(),
            event_type: EventType::File,
            payload: serde_json::json!({"file_name": "a.js", "before_content": "x"}),
        };
        assert!(matches!(hub.publish(&bad), Err(HubError::InvalidEvent(_))));
    }

    #[test]
    fn test_attach_replays_snapshot() {
        let hub = hub();
        let job = hub.create_job(repo()).unwrap();
        let id = job.job_id.clone();
        hub.publish(&ProgressEvent::file(
            id.clone(),
            &FileResult::new("a.js", "var a;\n", "let a;\n"),
        ))
        .unwrap();
        hub.publish(&ProgressEvent::status(
            id.clone(),
            StatusPayload::new(JobStatus::Refactoring),
        ))
        .unwrap();

        let (replay, _rx) = hub.attach(&id).unwrap();
        let snapshot = hub.get(&id).unwrap();
        let mut rebuilt = Job::new(id.clone(), repo(), job.submitted_at);
        for raw in &replay {
            let event: ProgressEvent = serde_json::from_str(raw).unwrap();
            state::apply_at(&mut rebuilt, &event, snapshot.updated_at).unwrap();
        }
        assert_eq!(rebuilt, snapshot);
    }

    #[test]
    fn test_publish_touches_updated_at() {
        let hub = hub();
        let job = hub.create_job(repo()).unwrap();
        finish(&hub, &job.job_id, JobStatus::Analyzing);
        assert!(hub.get(&job.job_id).unwrap().updated_at >= job.updated_at);
    }

    #[test]
    fn test_sweep_evicts_finished_jobs_after_retention() {
        let hub = hub();
        let opened = hub.create_job(repo()).unwrap().job_id;
        let failed = hub.create_job(repo()).unwrap().job_id;
        let running = hub.create_job(repo()).unwrap().job_id;
        finish(&hub, &opened, JobStatus::Opened);
        finish(&hub, &failed, JobStatus::Failed);
        finish(&hub, &running, JobStatus::Refactoring);

        assert_eq!(hub.sweep(), 0);
        assert_eq!(hub.len(), 3);

        let later = Instant::now() + RETENTION + Duration::from_secs(1);
        assert_eq!(hub.sweep_at(later), 2);
        assert_eq!(hub.len(), 1);
        assert!(matches!(hub.get(&opened), Err(HubError::JobNotFound { .. })));
        assert!(matches!(hub.get(&failed), Err(HubError::JobNotFound { .. })));
        assert_eq!(hub.get(&running).unwrap().status, JobStatus::Refactoring);
    }

    #[test]
    fn test_zero_retention_evicts_on_next_submission() {
        let hub = JobHub::new(16, Duration::ZERO);
        let done = hub.create_job(repo()).unwrap().job_id;
        finish(&hub, &done, JobStatus::Opened);
        let next = hub.create_job(repo()).unwrap().job_id;
        assert!(hub.get(&done).is_err());
        assert!(hub.get(&next).is_ok());
    }
}
