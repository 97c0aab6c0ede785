//! Shared record vocabulary: dependency records, advisories and the
//! enriched form handed from the enricher to the ranker and renderers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Direction of a change as reported by a diff source.
///
/// Diff sources only ever report additions and removals; an update is
/// derived later by pairing the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Added,
    Removed,
}

/// Classified change of a dependency between two commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Updated,
    Removed,
}

impl From<ChangeDirection> for ChangeType {
    fn from(direction: ChangeDirection) -> Self {
        match direction {
            ChangeDirection::Added => Self::Added,
            ChangeDirection::Removed => Self::Removed,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Updated => write!(f, "updated"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Returns the canonical (lowercase) ecosystem name, resolving known aliases.
///
/// Unknown names are lowercased and otherwise passed through.
pub fn normalize_ecosystem(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "pip" => "pypi".to_string(),
        "golang" => "go".to_string(),
        _ => lowered,
    }
}

/// Reconciliation identity of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyKey {
    pub ecosystem: String,
    pub name: String,
}

impl DependencyKey {
    pub fn new(ecosystem: &str, name: &str) -> Self {
        Self {
            ecosystem: normalize_ecosystem(ecosystem),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.ecosystem, self.name)
    }
}

/// A single dependency as reported by the diff source or the graph source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub name: String,
    pub ecosystem: String,
    pub version: Option<String>,
    pub change_type: ChangeDirection,
    pub package_url: Option<String>,
    pub source_repository_url: Option<String>,
    pub manifest_path: Option<String>,
    /// `true` only for records that came straight from the diff source.
    #[serde(default)]
    pub is_direct: bool,
    /// Advisories reported inline by the diff source, usually sparse.
    #[serde(default)]
    pub advisories: Vec<VulnerabilityAdvisory>,
}

impl DependencyRecord {
    pub fn new(name: &str, ecosystem: &str, change_type: ChangeDirection) -> Self {
        Self {
            name: name.to_string(),
            ecosystem: normalize_ecosystem(ecosystem),
            version: None,
            change_type,
            package_url: None,
            source_repository_url: None,
            manifest_path: None,
            is_direct: false,
            advisories: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_source_repository(mut self, url: &str) -> Self {
        self.source_repository_url = Some(url.to_string());
        self
    }

    pub fn with_manifest_path(mut self, path: &str) -> Self {
        self.manifest_path = Some(path.to_string());
        self
    }

    pub fn with_package_url(mut self, purl: &str) -> Self {
        self.package_url = Some(purl.to_string());
        self
    }

    pub fn with_advisory(mut self, advisory: VulnerabilityAdvisory) -> Self {
        self.advisories.push(advisory);
        self
    }

    pub fn direct(mut self) -> Self {
        self.is_direct = true;
        self
    }

    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(&self.ecosystem, &self.name)
    }

    /// Source repository URL, treating an empty string as absent.
    pub fn source_repository(&self) -> Option<&str> {
        self.source_repository_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// `ecosystem: name @ version`, or `ecosystem: name` when the version is unknown.
    pub fn identity(&self) -> String {
        match self.version.as_deref() {
            Some(version) if !version.is_empty() => {
                format!("{}: {} @ {}", self.ecosystem, self.name, version)
            }
            _ => format!("{}: {}", self.ecosystem, self.name),
        }
    }
}

/// Advisory severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Moderate,
    Low,
    None,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Parses a severity string case-insensitively; anything unrecognized is `Unknown`.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "moderate" => Self::Moderate,
            "low" => Self::Low,
            "none" => Self::None,
            _ => Self::Unknown,
        }
    }

    /// Ordering weight; higher is more severe. Medium and Moderate weigh the same.
    pub fn weight(self) -> u8 {
        match self {
            Self::Critical => 5,
            Self::High => 4,
            Self::Medium | Self::Moderate => 3,
            Self::Low => 2,
            Self::None => 1,
            Self::Unknown => 0,
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Moderate => "MODERATE",
            Self::Low => "LOW",
            Self::None => "NONE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// A published vulnerability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityAdvisory {
    /// Stable source identifier, e.g. a GHSA id.
    pub advisory_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    /// CVSS v3 base score in `0.0..=10.0`.
    #[serde(default)]
    pub cvss3_score: Option<f64>,
    #[serde(default)]
    pub disclosed_at: Option<DateTime<Utc>>,
}

impl VulnerabilityAdvisory {
    pub fn new(advisory_id: &str) -> Self {
        Self {
            advisory_id: advisory_id.to_string(),
            title: None,
            source_url: None,
            severity: Severity::Unknown,
            cvss3_score: None,
            disclosed_at: None,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_cvss3_score(mut self, score: f64) -> Self {
        self.cvss3_score = Some(score);
        self
    }

    pub fn with_source_url(mut self, url: &str) -> Self {
        self.source_url = Some(url.to_string());
        self
    }

    /// Number of populated descriptive fields.
    pub fn completeness(&self) -> usize {
        [
            self.title.as_deref().is_some_and(|t| !t.is_empty()),
            self.source_url.as_deref().is_some_and(|u| !u.is_empty()),
            self.severity.is_known(),
            self.cvss3_score.is_some(),
            self.disclosed_at.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// Missing a title or a score, the two fields the report leans on.
    pub fn is_sparse(&self) -> bool {
        self.title.as_deref().map_or(true, str::is_empty) || self.cvss3_score.is_none()
    }
}

/// One scorecard check outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardCheck {
    pub name: String,
    /// `-1` when the check could not be evaluated.
    pub score: i32,
    #[serde(default)]
    pub reason: String,
}

/// Aggregate score of a source repository plus the checks behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardResult {
    pub score: f64,
    #[serde(default)]
    pub checks: Vec<ScorecardCheck>,
}

/// Lookup that did not produce data for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    Transitive,
    Advisories,
    Score,
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transitive => write!(f, "transitive"),
            Self::Advisories => write!(f, "advisories"),
            Self::Score => write!(f, "score"),
        }
    }
}

/// A reconciled dependency with its advisories, score and one level of
/// transitive dependencies attached.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedDependency {
    /// For updated dependencies this is the new (added-side) record.
    pub record: DependencyRecord,
    pub change_type: ChangeType,
    pub advisories: Vec<VulnerabilityAdvisory>,
    /// `None` means the score is unavailable, which is not the same as zero.
    pub scorecard: Option<ScorecardResult>,
    pub transitive: Vec<EnrichedDependency>,
    /// Lookups that failed, timed out or were cancelled.
    pub unavailable: BTreeSet<Lookup>,
}

impl EnrichedDependency {
    pub fn new(record: DependencyRecord, change_type: ChangeType) -> Self {
        Self {
            record,
            change_type,
            advisories: Vec::new(),
            scorecard: None,
            transitive: Vec::new(),
            unavailable: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn key(&self) -> DependencyKey {
        self.record.key()
    }

    pub fn risk_score(&self) -> Option<f64> {
        self.scorecard.as_ref().map(|s| s.score)
    }

    pub fn is_vulnerable(&self) -> bool {
        !self.advisories.is_empty()
    }

    pub fn vulnerable_transitive(&self) -> impl Iterator<Item = &EnrichedDependency> {
        self.transitive.iter().filter(|dep| dep.is_vulnerable())
    }
}
