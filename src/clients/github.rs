//! Diff source backed by the GitHub dependency review API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;
use urlencoding::encode;

use crate::clients::{http_client, read_json};
use crate::model::{ChangeDirection, DependencyRecord, Severity, VulnerabilityAdvisory};
use crate::traits::{DiffSource, FetchError};

/// One entry of the `dependency-graph/compare` response.
#[derive(Debug, Deserialize)]
struct RawChange {
    change_type: String,
    manifest: Option<String>,
    ecosystem: String,
    name: String,
    version: Option<String>,
    package_url: Option<String>,
    source_repository_url: Option<String>,
    #[serde(default)]
    vulnerabilities: Vec<RawVulnerability>,
}

#[derive(Debug, Deserialize)]
struct RawVulnerability {
    severity: Option<String>,
    advisory_ghsa_id: String,
    advisory_summary: Option<String>,
    advisory_url: Option<String>,
}

impl From<RawVulnerability> for VulnerabilityAdvisory {
    fn from(raw: RawVulnerability) -> Self {
        Self {
            advisory_id: raw.advisory_ghsa_id,
            title: raw.advisory_summary.filter(|s| !s.is_empty()),
            source_url: raw.advisory_url.filter(|s| !s.is_empty()),
            severity: raw
                .severity
                .as_deref()
                .map_or(Severity::Unknown, Severity::from_str_loose),
            cvss3_score: None,
            disclosed_at: None,
        }
    }
}

impl TryFrom<RawChange> for DependencyRecord {
    type Error = FetchError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        let change_type = match raw.change_type.as_str() {
            "added" => ChangeDirection::Added,
            "removed" => ChangeDirection::Removed,
            other => {
                return Err(FetchError::Decode(format!(
                    "unexpected change_type '{other}' for {}",
                    raw.name
                )))
            }
        };
        let mut record = DependencyRecord::new(&raw.name, &raw.ecosystem, change_type).direct();
        record.version = raw.version.filter(|v| !v.is_empty());
        record.manifest_path = raw.manifest;
        record.package_url = raw.package_url;
        record.source_repository_url = raw.source_repository_url;
        record.advisories = raw.vulnerabilities.into_iter().map(Into::into).collect();
        Ok(record)
    }
}

/// Parses a compare response body into diff records.
///
/// # Errors
///
/// Returns [`FetchError::Decode`] for malformed JSON or an unknown change type.
pub fn parse_diff(body: &str) -> Result<Vec<DependencyRecord>, FetchError> {
    let raw: Vec<RawChange> =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    raw.into_iter().map(DependencyRecord::try_from).collect()
}

/// GitHub dependency review client for one repository.
pub struct GitHubDiffSource {
    client: Client,
    base_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GitHubDiffSource {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(owner: &str, repo: &str, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: "https://api.github.com".to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    /// Set custom base URL (GitHub Enterprise, tests).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn compare_url(&self, base: &str, head: &str) -> String {
        format!(
            "{}/repos/{}/{}/dependency-graph/compare/{}...{}",
            self.base_url,
            encode(&self.owner),
            encode(&self.repo),
            encode(base),
            encode(head)
        )
    }
}

#[async_trait]
impl DiffSource for GitHubDiffSource {
    async fn fetch_diff(&self, base: &str, head: &str) -> Result<Vec<DependencyRecord>, FetchError> {
        let url = self.compare_url(base, head);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let raw: Vec<RawChange> = read_json(request, &url).await?;
        let records = raw
            .into_iter()
            .map(DependencyRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            owner = %self.owner,
            repo = %self.repo,
            records = records.len(),
            "fetched dependency review diff"
        );
        Ok(records)
    }
}
