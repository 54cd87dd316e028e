//! Shared domain types for Dependify.
//!
//! Both the dashboard client and the progress hub fold the same
//! [`ProgressEvent`]s through [`state::apply`], so a job looks the same on
//! either side of the feed.

pub mod models;
pub mod repo;
pub mod state;

pub use models::{
    ContentPair, EventBody, EventError, EventType, FileList, FileResult, FileResultError,
    FileSet, Job, JobId, JobStatus, LogPayload, ProgressEvent, StatusPayload, Upsert,
};
pub use repo::{RepoRef, RepoRefError};
pub use state::{Applied, IgnoreReason, apply, apply_at, can_transition, replay};
