use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::repo::RepoRef;

// ── Identifiers ───────────────────────────────────────────────────────

/// Opaque, server-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh identifier for a newly accepted submission.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Job status ────────────────────────────────────────────────────────

/// Status of a modernization job as observed through the progress feed.
///
/// The non-failure statuses form a strict forward sequence; `Failed` sits
/// outside it and can be entered from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Analyzing,
    Refactoring,
    Validating,
    Committing,
    Opened,
    Failed,
}

impl JobStatus {
    /// The canonical forward sequence, earliest first.
    pub const SEQUENCE: [JobStatus; 6] = [
        Self::Queued,
        Self::Analyzing,
        Self::Refactoring,
        Self::Validating,
        Self::Committing,
        Self::Opened,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Analyzing => "analyzing",
            Self::Refactoring => "refactoring",
            Self::Validating => "validating",
            Self::Committing => "committing",
            Self::Opened => "opened",
            Self::Failed => "failed",
        }
    }

    /// Human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Analyzing => "Analyzing repository",
            Self::Refactoring => "Refactoring files",
            Self::Validating => "Validating changes",
            Self::Committing => "Committing changes",
            Self::Opened => "Pull request opened",
            Self::Failed => "Failed",
        }
    }

    /// Position in [`Self::SEQUENCE`]; `None` for `Failed`.
    pub fn rank(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| s == self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Opened | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "analyzing" => Ok(Self::Analyzing),
            "refactoring" => Ok(Self::Refactoring),
            "validating" => Ok(Self::Validating),
            "committing" => Ok(Self::Committing),
            "opened" => Ok(Self::Opened),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

// ── File results ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileResultError {
    #[error("file '{file_name}' has {present} content but no {missing} content")]
    OneSided {
        file_name: String,
        present: &'static str,
        missing: &'static str,
    },

    #[error("file '{file_name}' has confidence score {score}, expected 0-100")]
    ConfidenceOutOfRange { file_name: String, score: u8 },

    #[error("file result has an empty file name")]
    EmptyFileName,
}

/// Original and rewritten content of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPair {
    pub before: String,
    pub after: String,
}

/// One file's outcome from the modernization pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFileResult", into = "RawFileResult")]
pub struct FileResult {
    pub file_name: String,
    /// Before/after pair; both sides or neither.
    pub contents: Option<ContentPair>,
    pub description: String,
    pub key_changes: Vec<String>,
    pub confidence_score: Option<u8>,
    pub language: Option<String>,
}

impl FileResult {
    pub fn new(
        file_name: impl Into<String>,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            contents: Some(ContentPair {
                before: before.into(),
                after: after.into(),
            }),
            description: String::new(),
            key_changes: Vec::new(),
            confidence_score: None,
            language: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_key_changes<I, S>(mut self, changes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_changes = changes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, score: u8) -> Self {
        self.confidence_score = Some(score.min(100));
        self
    }
}

/// Wire shape of a [`FileResult`]: the two content sides travel as
/// independent optional fields and are checked on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawFileResult {
    file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    before_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after_content: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    key_changes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
}

impl TryFrom<RawFileResult> for FileResult {
    type Error = FileResultError;

    fn try_from(raw: RawFileResult) -> Result<Self, Self::Error> {
        if raw.file_name.trim().is_empty() {
            return Err(FileResultError::EmptyFileName);
        }
        if let Some(score) = raw.confidence_score
            && score > 100
        {
            return Err(FileResultError::ConfidenceOutOfRange {
                file_name: raw.file_name,
                score,
            });
        }
        let contents = match (raw.before_content, raw.after_content) {
            (Some(before), Some(after)) => Some(ContentPair { before, after }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(FileResultError::OneSided {
                    file_name: raw.file_name,
                    present: "before",
                    missing: "after",
                });
            }
            (None, Some(_)) => {
                return Err(FileResultError::OneSided {
                    file_name: raw.file_name,
                    present: "after",
                    missing: "before",
                });
            }
        };
        Ok(Self {
            file_name: raw.file_name,
            contents,
            description: raw.description,
            key_changes: raw.key_changes,
            confidence_score: raw.confidence_score,
            language: raw.language,
        })
    }
}

impl From<FileResult> for RawFileResult {
    fn from(file: FileResult) -> Self {
        let (before_content, after_content) = match file.contents {
            Some(pair) => (Some(pair.before), Some(pair.after)),
            None => (None, None),
        };
        Self {
            file_name: file.file_name,
            before_content,
            after_content,
            description: file.description,
            key_changes: file.key_changes,
            confidence_score: file.confidence_score,
            language: file.language,
        }
    }
}

/// A sequence of file results that is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileList(Vec<FileResult>);

impl FileList {
    pub fn new(files: Vec<FileResult>) -> Option<Self> {
        if files.is_empty() {
            None
        } else {
            Some(Self(files))
        }
    }

    pub fn first(&self) -> &FileResult {
        &self.0[0]
    }

    pub fn as_slice(&self) -> &[FileResult] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn position(&self, file_name: &str) -> Option<usize> {
        self.0.iter().position(|f| f.file_name == file_name)
    }
}

/// Files produced for a job so far.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<FileResult>", into = "Vec<FileResult>")]
pub enum FileSet {
    #[default]
    NoFiles,
    FileList(FileList),
}

/// What [`FileSet::upsert`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    Unchanged,
}

impl FileSet {
    pub fn as_slice(&self) -> &[FileResult] {
        match self {
            Self::NoFiles => &[],
            Self::FileList(list) => list.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::NoFiles)
    }

    /// Insert a file, or replace the existing record with the same name
    /// in place.
    pub fn upsert(&mut self, file: FileResult) -> Upsert {
        match self {
            Self::NoFiles => {
                *self = Self::FileList(FileList(vec![file]));
                Upsert::Inserted
            }
            Self::FileList(list) => match list.position(&file.file_name) {
                Some(idx) if list.0[idx] == file => Upsert::Unchanged,
                Some(idx) => {
                    list.0[idx] = file;
                    Upsert::Replaced
                }
                None => {
                    list.0.push(file);
                    Upsert::Inserted
                }
            },
        }
    }
}

impl From<Vec<FileResult>> for FileSet {
    fn from(files: Vec<FileResult>) -> Self {
        match FileList::new(files) {
            Some(list) => Self::FileList(list),
            None => Self::NoFiles,
        }
    }
}

impl From<FileSet> for Vec<FileResult> {
    fn from(set: FileSet) -> Self {
        match set {
            FileSet::NoFiles => Vec::new(),
            FileSet::FileList(list) => list.0,
        }
    }
}

// ── Job ───────────────────────────────────────────────────────────────

/// One end-to-end modernization request and its tracked progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub repository: RepoRef,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    /// Last time [`crate::state::apply`] changed this snapshot.
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub files: FileSet,
    #[serde(default)]
    pub pull_request_url: Option<String>,
    /// Diagnostic text supplied with a `failed` status.
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
}

impl Job {
    pub fn new(job_id: JobId, repository: RepoRef, submitted_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            repository,
            status: JobStatus::Queued,
            submitted_at,
            updated_at: submitted_at,
            files: FileSet::NoFiles,
            pull_request_url: None,
            failure: None,
            last_message: None,
        }
    }

    /// Events that rebuild this snapshot when folded into a fresh job.
    ///
    /// Files and the last log line come first: the reducer ignores them once
    /// a job is terminal, so the status has to be replayed last.
    pub fn replay_events(&self) -> Vec<ProgressEvent> {
        let mut events: Vec<ProgressEvent> = self
            .files
            .as_slice()
            .iter()
            .map(|file| ProgressEvent::file(self.job_id.clone(), file))
            .collect();
        if let Some(message) = &self.last_message {
            events.push(ProgressEvent::log(self.job_id.clone(), message.clone()));
        }
        events.push(ProgressEvent::status(
            self.job_id.clone(),
            StatusPayload {
                status: self.status,
                message: self.last_message.clone(),
                error: self.failure.clone(),
                pull_request_url: self.pull_request_url.clone(),
            },
        ));
        events
    }
}

// ── Progress events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    File,
    Log,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::File => "file",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_url: Option<String>,
}

impl StatusPayload {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            message: None,
            error: None,
            pull_request_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    pub message: String,
}

/// A single change notification from the progress feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Typed view of a [`ProgressEvent`] payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Status(StatusPayload),
    File(FileResult),
    Log(LogPayload),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed {event_type} payload: {source}")]
    MalformedPayload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

impl ProgressEvent {
    pub fn status(job_id: JobId, payload: StatusPayload) -> Self {
        Self {
            job_id,
            event_type: EventType::Status,
            payload: serde_json::to_value(payload).unwrap_or_default(),
        }
    }

    pub fn file(job_id: JobId, file: &FileResult) -> Self {
        Self {
            job_id,
            event_type: EventType::File,
            payload: serde_json::to_value(file).unwrap_or_default(),
        }
    }

    pub fn log(job_id: JobId, message: impl Into<String>) -> Self {
        Self {
            job_id,
            event_type: EventType::Log,
            payload: serde_json::json!({ "message": message.into() }),
        }
    }

    /// Decode the payload according to `event_type`.
    pub fn body(&self) -> Result<EventBody, EventError> {
        let malformed = |source| EventError::MalformedPayload {
            event_type: self.event_type,
            source,
        };
        let payload = self.payload.clone();
        match self.event_type {
            EventType::Status => serde_json::from_value(payload)
                .map(EventBody::Status)
                .map_err(malformed),
            EventType::File => serde_json::from_value(payload)
                .map(EventBody::File)
                .map_err(malformed),
            EventType::Log => serde_json::from_value(payload)
                .map(EventBody::Log)
                .map_err(malformed),
        }
    }
}
