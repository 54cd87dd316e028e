//! Changelog and pull request description built from file results.

use std::fmt::Write as _;

use dependify_common::{FileResult, RepoRef};
use serde::Serialize;

use super::LineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    NeedsReview,
}

impl ConfidenceTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Self::High,
            60..=79 => Self::Medium,
            _ => Self::NeedsReview,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high confidence",
            Self::Medium => "medium confidence",
            Self::NeedsReview => "needs review",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub file_name: String,
    pub language: Option<String>,
    pub confidence_score: Option<u8>,
    pub tier: Option<ConfidenceTier>,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub description: String,
    pub key_changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_files: usize,
    #[serde(rename = "total_lines_added")]
    pub lines_added: usize,
    #[serde(rename = "total_lines_removed")]
    pub lines_removed: usize,
    /// Mean over files that carry a score.
    pub average_confidence: Option<f64>,
    pub high_confidence_files: usize,
}

/// File-by-file account of a modernization run.
#[derive(Debug, Clone, Serialize)]
pub struct Changelog {
    pub summary: Summary,
    pub files: Vec<FileEntry>,
}

impl Changelog {
    pub fn from_files(files: &[FileResult]) -> Self {
        let entries: Vec<FileEntry> = files
            .iter()
            .map(|file| {
                let stats = LineStats::of(file);
                FileEntry {
                    file_name: file.file_name.clone(),
                    language: file.language.clone(),
                    confidence_score: file.confidence_score,
                    tier: file.confidence_score.map(ConfidenceTier::from_score),
                    lines_added: stats.added,
                    lines_removed: stats.removed,
                    description: file.description.clone(),
                    key_changes: file.key_changes.clone(),
                }
            })
            .collect();

        let scores: Vec<f64> = entries
            .iter()
            .filter_map(|e| e.confidence_score.map(f64::from))
            .collect();
        let average_confidence =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        let summary = Summary {
            total_files: entries.len(),
            lines_added: entries.iter().map(|e| e.lines_added).sum(),
            lines_removed: entries.iter().map(|e| e.lines_removed).sum(),
            average_confidence,
            high_confidence_files: entries
                .iter()
                .filter(|e| e.tier == Some(ConfidenceTier::High))
                .count(),
        };

        Self {
            summary,
            files: entries,
        }
    }

    /// Pretty-printed JSON form, as printed by `dependify diff --json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Markdown body for the pull request.
    pub fn pr_description(&self, repository: &RepoRef) -> String {
        let s = &self.summary;
        let mut md = String::new();
        let _ = writeln!(md, "## Automated modernization of `{}`\n", repository);
        let _ = writeln!(
            md,
            "Updated **{} file{}** to current syntax and APIs.\n",
            s.total_files,
            if s.total_files == 1 { "" } else { "s" }
        );

        md.push_str("| Files | Lines added | Lines removed | Avg. confidence | High confidence |\n");
        md.push_str("|---|---|---|---|---|\n");
        let average = s
            .average_confidence
            .map(|a| format!("{:.1}/100", a))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(
            md,
            "| {} | +{} | -{} | {} | {} |\n",
            s.total_files, s.lines_added, s.lines_removed, average, s.high_confidence_files
        );

        md.push_str("### Changes by file\n\n");
        for (i, entry) in self.files.iter().enumerate() {
            let _ = writeln!(md, "#### {}. `{}`\n", i + 1, entry.file_name);
            match (entry.confidence_score, entry.tier) {
                (Some(score), Some(tier)) => {
                    let _ = writeln!(md, "**{}** ({}/100)", tier.label(), score);
                }
                _ => md.push_str("**unscored**\n"),
            }
            let _ = writeln!(
                md,
                "+{} / -{} lines\n",
                entry.lines_added, entry.lines_removed
            );
            if !entry.description.is_empty() {
                let _ = writeln!(md, "> {}\n", entry.description);
            }
            if !entry.key_changes.is_empty() {
                md.push_str("Key changes:\n");
                for change in &entry.key_changes {
                    let _ = writeln!(md, "- {}", change);
                }
                md.push('\n');
            }
        }

        md.push_str("---\n");
        md.push_str("Review files marked *needs review* before merging.\n");
        md
    }
}
