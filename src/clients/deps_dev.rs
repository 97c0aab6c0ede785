//! Graph source backed by the deps.dev v3 API.
//!
//! Transitive dependencies come from the `:dependencies` graph, keeping
//! only nodes with a `DIRECT` relation to the queried version, which is one
//! level below it. Advisories are resolved through the version's advisory
//! keys, one `advisories/{id}` call per key.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use urlencoding::encode;

use crate::clients::{http_client, read_json};
use crate::model::{ChangeDirection, DependencyRecord, Severity, VulnerabilityAdvisory};
use crate::traits::{FetchError, GraphSource};

/// Converts a canonical ecosystem name to a deps.dev system name.
///
/// `None` for ecosystems deps.dev does not index (`actions`, `composer`, ...).
fn deps_dev_system(ecosystem: &str) -> Option<&'static str> {
    match ecosystem.to_ascii_lowercase().as_str() {
        "npm" => Some("NPM"),
        "pypi" | "pip" => Some("PYPI"),
        "go" | "golang" => Some("GO"),
        "maven" => Some("MAVEN"),
        "cargo" | "rust" => Some("CARGO"),
        "nuget" => Some("NUGET"),
        "rubygems" => Some("RUBYGEMS"),
        _ => None,
    }
}

/// CVSS v3 qualitative rating.
fn severity_from_cvss3(score: f64) -> Severity {
    match score {
        s if s >= 9.0 => Severity::Critical,
        s if s >= 7.0 => Severity::High,
        s if s >= 4.0 => Severity::Medium,
        s if s > 0.0 => Severity::Low,
        _ => Severity::None,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct VersionKey {
    system: String,
    name: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DependencyGraph {
    #[serde(default)]
    nodes: Vec<GraphNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphNode {
    version_key: VersionKey,
    #[serde(default)]
    relation: String,
}

/// Nodes one level below the queried version, as diff records.
fn direct_dependencies(graph: DependencyGraph) -> Vec<DependencyRecord> {
    graph
        .nodes
        .into_iter()
        .filter(|node| node.relation == "DIRECT")
        .map(|node| {
            DependencyRecord::new(
                &node.version_key.name,
                &node.version_key.system,
                ChangeDirection::Added,
            )
            .with_version(&node.version_key.version)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    #[serde(default)]
    advisory_keys: Vec<AdvisoryKey>,
}

#[derive(Debug, Deserialize)]
struct AdvisoryKey {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Advisory {
    advisory_key: AdvisoryKey,
    url: Option<String>,
    title: Option<String>,
    cvss3_score: Option<f64>,
    #[serde(default)]
    cvss3_vector: String,
}

impl From<Advisory> for VulnerabilityAdvisory {
    fn from(raw: Advisory) -> Self {
        // deps.dev reports 0 with an empty vector when no CVSS v3 data exists.
        let cvss3_score = raw
            .cvss3_score
            .filter(|score| *score > 0.0 || !raw.cvss3_vector.is_empty());
        Self {
            advisory_id: raw.advisory_key.id,
            title: raw.title.filter(|t| !t.is_empty()),
            source_url: raw.url.filter(|u| !u.is_empty()),
            severity: cvss3_score.map_or(Severity::Unknown, severity_from_cvss3),
            cvss3_score,
            disclosed_at: None,
        }
    }
}

/// deps.dev API client.
pub struct DepsDevGraphSource {
    client: Client,
    base_url: String,
}

impl DepsDevGraphSource {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: "https://api.deps.dev/v3".to_string(),
        })
    }

    /// Set custom base URL (for testing).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// `None` when deps.dev does not cover the ecosystem.
    fn version_url(&self, ecosystem: &str, name: &str, version: &str) -> Option<String> {
        let system = deps_dev_system(ecosystem)?;
        Some(format!(
            "{}/systems/{system}/packages/{}/versions/{}",
            self.base_url,
            encode(name),
            encode(version)
        ))
    }
}

#[async_trait]
impl GraphSource for DepsDevGraphSource {
    async fn fetch_transitive_dependencies(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<DependencyRecord>, FetchError> {
        let Some(version_url) = self.version_url(ecosystem, name, version) else {
            debug!(
                ecosystem,
                name,
                "ecosystem not indexed by deps.dev, no transitive dependencies"
            );
            return Ok(Vec::new());
        };
        let url = format!("{version_url}:dependencies");
        let graph: DependencyGraph = read_json(self.client.get(&url), &url).await?;

        let direct = direct_dependencies(graph);
        debug!(name, version, count = direct.len(), "fetched transitive dependencies");
        Ok(direct)
    }

    async fn fetch_advisories(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<VulnerabilityAdvisory>, FetchError> {
        let Some(url) = self.version_url(ecosystem, name, version) else {
            debug!(ecosystem, name, "ecosystem not indexed by deps.dev, no advisories");
            return Ok(Vec::new());
        };
        let info: VersionInfo = read_json(self.client.get(&url), &url).await?;

        let mut advisories = Vec::with_capacity(info.advisory_keys.len());
        for key in info.advisory_keys {
            advisories.push(self.fetch_advisory_by_id(&key.id).await?);
        }
        debug!(name, version, count = advisories.len(), "fetched advisories");
        Ok(advisories)
    }

    async fn fetch_advisory_by_id(
        &self,
        advisory_id: &str,
    ) -> Result<VulnerabilityAdvisory, FetchError> {
        let url = format!("{}/advisories/{}", self.base_url, encode(advisory_id));
        let advisory: Advisory = read_json(self.client.get(&url), &url).await?;
        Ok(advisory.into())
    }
}
