//! Diff presentation model.
//!
//! [`DiffView`] arranges a job's file results for side-by-side review: one
//! active file, its description and key changes, and the before/after pair.
//! Aggregates are computed from the file set on every call.

pub mod changelog;

use dependify_common::{ContentPair, FileResult, FileSet, Job};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};

pub use changelog::{Changelog, ConfidenceTier};

/// Lines added and removed between two versions of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub added: usize,
    pub removed: usize,
}

impl LineStats {
    pub fn between(before: &str, after: &str) -> Self {
        let diff = TextDiff::from_lines(before, after);
        diff.iter_all_changes()
            .fold(Self::default(), |mut stats, change| {
                match change.tag() {
                    ChangeTag::Insert => stats.added += 1,
                    ChangeTag::Delete => stats.removed += 1,
                    ChangeTag::Equal => {}
                }
                stats
            })
    }

    pub fn of(file: &FileResult) -> Self {
        file.contents
            .as_ref()
            .map(|pair| Self::between(&pair.before, &pair.after))
            .unwrap_or_default()
    }
}

impl std::ops::Add for LineStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            added: self.added + rhs.added,
            removed: self.removed + rhs.removed,
        }
    }
}

/// Everything shown for the active file.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePanel<'a> {
    pub file_name: &'a str,
    pub description: &'a str,
    pub key_changes: &'a [String],
    pub contents: Option<&'a ContentPair>,
    pub confidence: Option<(u8, ConfidenceTier)>,
    pub stats: LineStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffView {
    files: FileSet,
    selected: usize,
    pull_request_url: Option<String>,
}

impl DiffView {
    pub fn new(files: FileSet, pull_request_url: Option<String>) -> Self {
        Self {
            files,
            selected: 0,
            pull_request_url,
        }
    }

    pub fn from_job(job: &Job) -> Self {
        Self::new(job.files.clone(), job.pull_request_url.clone())
    }

    /// True for the `NoFiles` empty state.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[FileResult] {
        self.files.as_slice()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files().iter().map(|f| f.file_name.as_str())
    }

    pub fn pull_request_url(&self) -> Option<&str> {
        self.pull_request_url.as_deref()
    }

    /// Make `file_name` the active file. Unknown names leave the selection
    /// as it was; returns whether the name was found.
    pub fn select_file(&mut self, file_name: &str) -> bool {
        match self.files().iter().position(|f| f.file_name == file_name) {
            Some(idx) => {
                self.selected = idx;
                true
            }
            None => {
                tracing::debug!(file_name, "select_file: unknown file, selection unchanged");
                false
            }
        }
    }

    pub fn selected(&self) -> Option<&FileResult> {
        self.files().get(self.selected)
    }

    pub fn panel(&self) -> Option<FilePanel<'_>> {
        self.selected().map(|file| FilePanel {
            file_name: &file.file_name,
            description: &file.description,
            key_changes: &file.key_changes,
            contents: file.contents.as_ref(),
            confidence: file
                .confidence_score
                .map(|score| (score, ConfidenceTier::from_score(score))),
            stats: LineStats::of(file),
        })
    }

    /// Ordered `(file_name, before/after)` pairs for files that carry content.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &ContentPair)> {
        self.files()
            .iter()
            .filter_map(|f| f.contents.as_ref().map(|c| (f.file_name.as_str(), c)))
    }

    pub fn files_changed(&self) -> usize {
        self.files.len()
    }

    /// Total line count of every file's after content.
    pub fn total_after_lines(&self) -> usize {
        self.pairs().map(|(_, pair)| pair.after.lines().count()).sum()
    }

    pub fn total_stats(&self) -> LineStats {
        self.files()
            .iter()
            .map(LineStats::of)
            .fold(LineStats::default(), |acc, s| acc + s)
    }

    /// Unified diff of the active file, `None` if it carries no content.
    pub fn render_unified(&self, context_lines: usize) -> Option<String> {
        let file = self.selected()?;
        let pair = file.contents.as_ref()?;
        let diff = TextDiff::from_lines(pair.before.as_str(), pair.after.as_str());
        Some(
            diff.unified_diff()
                .context_radius(context_lines)
                .header(
                    &format!("a/{}", file.file_name),
                    &format!("b/{}", file.file_name),
                )
                .to_string(),
        )
    }
}
