use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a repository reference was rejected by the shape check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoRefError {
    #[error("repository reference is empty")]
    Empty,

    #[error("'{0}' is not a GitHub repository reference (expected owner/name or a github.com URL)")]
    UnsupportedForm(String),

    #[error("invalid repository owner '{0}'")]
    InvalidOwner(String),

    #[error("invalid repository name '{0}'")]
    InvalidName(String),
}

/// A GitHub repository reference, normalized to `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoRef {
    owner: String,
    name: String,
}

impl RepoRef {
    /// Parse any of the accepted forms:
    ///
    /// - `owner/name`
    /// - `https://github.com/owner/name` (optionally `.git` and/or trailing `/`)
    /// - `github.com/owner/name`
    /// - `git@github.com:owner/name.git`
    pub fn parse(input: &str) -> Result<Self, RepoRefError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RepoRefError::Empty);
        }

        let path = if let Some(rest) = trimmed.strip_prefix("git@github.com:") {
            rest
        } else if let Some(rest) = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
            .or_else(|| trimmed.strip_prefix("github.com/"))
        {
            rest
        } else if trimmed.contains("://") || trimmed.contains('@') {
            return Err(RepoRefError::UnsupportedForm(trimmed.to_string()));
        } else {
            trimmed
        };

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != 2 {
            return Err(RepoRefError::UnsupportedForm(trimmed.to_string()));
        }
        let (owner, name) = (parts[0], parts[1]);

        if !is_valid_segment(owner) || owner.starts_with('-') {
            return Err(RepoRefError::InvalidOwner(owner.to_string()));
        }
        if !is_valid_segment(name) || name == "." || name == ".." {
            return Err(RepoRefError::InvalidName(name.to_string()));
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.name)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = RepoRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepoRef {
    type Error = RepoRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepoRef> for String {
    fn from(value: RepoRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug(input: &str) -> String {
        RepoRef::parse(input).unwrap().to_string()
    }

    #[test]
    fn test_parse_bare_slug() {
        assert_eq!(slug("octocat/hello-world"), "octocat/hello-world");
    }

    #[test]
    fn test_parse_https_url_variants() {
        assert_eq!(slug("https://github.com/owner/repo"), "owner/repo");
        assert_eq!(slug("https://github.com/owner/repo.git"), "owner/repo");
        assert_eq!(slug("https://github.com/owner/repo/"), "owner/repo");
        assert_eq!(slug("github.com/owner/repo"), "owner/repo");
    }

    #[test]
    fn test_parse_ssh_url() {
        assert_eq!(slug("git@github.com:owner/repo.git"), "owner/repo");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(slug("  owner/repo \n"), "owner/repo");
    }

    #[test]
    fn test_parse_empty_is_rejected() {
        assert_eq!(RepoRef::parse("   "), Err(RepoRefError::Empty));
    }

    #[test]
    fn test_parse_non_github_host_is_rejected() {
        assert!(matches!(
            RepoRef::parse("https://gitlab.com/owner/repo"),
            Err(RepoRefError::UnsupportedForm(_))
        ));
    }

    #[test]
    fn test_parse_wrong_segment_count() {
        assert!(RepoRef::parse("owner").is_err());
        assert!(RepoRef::parse("https://github.com/owner/repo/tree/main").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_characters() {
        assert!(matches!(
            RepoRef::parse("own er/repo"),
            Err(RepoRefError::InvalidOwner(_))
        ));
        assert!(matches!(
            RepoRef::parse("-owner/repo"),
            Err(RepoRefError::InvalidOwner(_))
        ));
        assert!(matches!(
            RepoRef::parse("owner/.."),
            Err(RepoRefError::InvalidName(_))
        ));
    }

    #[test]
    fn test_urls_are_derived_from_slug() {
        let repo = RepoRef::parse("git@github.com:owner/repo.git").unwrap();
        assert_eq!(repo.owner(), "owner");
        assert_eq!(repo.name(), "repo");
        assert_eq!(repo.html_url(), "https://github.com/owner/repo");
        assert_eq!(repo.clone_url(), "https://github.com/owner/repo.git");
    }

    #[test]
    fn test_serde_uses_slug_string() {
        let repo = RepoRef::parse("https://github.com/owner/repo").unwrap();
        assert_eq!(serde_json::to_string(&repo).unwrap(), "\"owner/repo\"");
        let back: RepoRef = serde_json::from_str("\"owner/repo\"").unwrap();
        assert_eq!(back, repo);
        assert!(serde_json::from_str::<RepoRef>("\"nope\"").is_err());
    }
}
