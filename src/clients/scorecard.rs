//! Scorecard engine backed by the public OpenSSF Scorecard REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::clients::{http_client, read_json};
use crate::model::{ScorecardCheck, ScorecardResult};
use crate::traits::{FetchError, ScorecardEngine};

#[derive(Debug, Deserialize)]
struct RawScorecard {
    score: f64,
    #[serde(default)]
    checks: Vec<RawCheck>,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    name: String,
    score: i32,
    #[serde(default)]
    reason: String,
}

impl From<RawScorecard> for ScorecardResult {
    fn from(raw: RawScorecard) -> Self {
        Self {
            score: raw.score,
            checks: raw
                .checks
                .into_iter()
                .map(|c| ScorecardCheck {
                    name: c.name,
                    score: c.score,
                    reason: c.reason,
                })
                .collect(),
        }
    }
}

/// Reduces a source repository URL to `host/owner/repo`.
///
/// Accepts `https://`, `http://`, `git+https://` and `git://` schemes, an
/// optional `www.` prefix, and a trailing `/` or `.git`.
///
/// # Errors
///
/// Returns [`FetchError::InvalidInput`] when the URL has no owner and repo.
pub fn project_path(repository_url: &str) -> Result<String, FetchError> {
    let trimmed = repository_url.trim();
    let without_scheme = ["git+https://", "https://", "http://", "git://"]
        .iter()
        .find_map(|scheme| trimmed.strip_prefix(scheme))
        .unwrap_or(trimmed);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    let path = without_www.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [host, owner, repo, ..] if host.contains('.') => {
            Ok(format!("{}/{owner}/{repo}", host.to_ascii_lowercase()))
        }
        _ => Err(FetchError::InvalidInput(format!(
            "not a repository URL: {repository_url}"
        ))),
    }
}

/// Scorecard REST API client.
pub struct ScorecardApiClient {
    client: Client,
    base_url: String,
}

impl ScorecardApiClient {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: "https://api.securityscorecards.dev".to_string(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ScorecardEngine for ScorecardApiClient {
    async fn fetch_risk_score(&self, repository_url: &str) -> Result<ScorecardResult, FetchError> {
        let url = format!("{}/projects/{}", self.base_url, project_path(repository_url)?);
        let raw: RawScorecard = read_json(self.client.get(&url), &url).await?;
        debug!(repository_url, score = raw.score, "fetched scorecard");
        Ok(raw.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_path_variants() {
        for url in [
            "https://github.com/ossf/scorecard",
            "https://github.com/ossf/scorecard/",
            "https://www.github.com/ossf/scorecard.git",
            "git+https://github.com/ossf/scorecard.git",
            "git://github.com/ossf/scorecard",
            "github.com/ossf/scorecard",
        ] {
            assert_eq!(project_path(url).unwrap(), "github.com/ossf/scorecard", "{url}");
        }
    }

    #[test]
    fn test_project_path_keeps_only_owner_and_repo() {
        assert_eq!(
            project_path("https://GitHub.com/expressjs/express/tree/master").unwrap(),
            "github.com/expressjs/express"
        );
    }

    #[test]
    fn test_project_path_rejects_incomplete() {
        assert!(matches!(
            project_path("https://github.com/ossf"),
            Err(FetchError::InvalidInput(_))
        ));
        assert!(project_path("").is_err());
        assert!(project_path("ossf/scorecard/x").is_err());
    }

    #[test]
    fn test_decode_response() {
        let body = r#"{
            "date": "2024-01-08",
            "repo": {"name": "github.com/ossf/scorecard", "commit": "abc"},
            "score": 8.3,
            "checks": [
                {"name": "Maintained", "score": 10, "reason": "30 commit(s) out of 30 and 8 issue activity out of 30 found in the last 90 days -- score normalized to 10"},
                {"name": "Fuzzing", "score": -1, "reason": "internal error"}
            ]
        }"#;
        let result: ScorecardResult = serde_json::from_str::<RawScorecard>(body).unwrap().into();
        assert_eq!(result.score, 8.3);
        assert_eq!(result.checks.len(), 2);
        assert_eq!(result.checks[1].name, "Fuzzing");
        assert_eq!(result.checks[1].score, -1);
    }
}
