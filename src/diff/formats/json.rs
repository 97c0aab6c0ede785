//! Structured JSON form of a ranked report.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diff::reconcile::ReconciliationResult;
use crate::model::{
    ChangeType, EnrichedDependency, Lookup, ScorecardCheck, Severity, VulnerabilityAdvisory,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonAdvisory<'a> {
    advisory_id: &'a str,
    title: Option<&'a str>,
    source_url: Option<&'a str>,
    severity: Severity,
    cvss3_score: Option<f64>,
    disclosed_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a VulnerabilityAdvisory> for JsonAdvisory<'a> {
    fn from(advisory: &'a VulnerabilityAdvisory) -> Self {
        Self {
            advisory_id: &advisory.advisory_id,
            title: advisory.title.as_deref(),
            source_url: advisory.source_url.as_deref(),
            severity: advisory.severity,
            cvss3_score: advisory.cvss3_score,
            disclosed_at: advisory.disclosed_at,
        }
    }
}

fn no_checks(checks: &&[ScorecardCheck]) -> bool {
    checks.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonDependency<'a> {
    change_type: ChangeType,
    package_url: Option<&'a str>,
    source_repository: Option<&'a str>,
    manifest_path: Option<&'a str>,
    ecosystem: &'a str,
    version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_version: Option<&'a str>,
    name: &'a str,
    vulnerabilities: Vec<JsonAdvisory<'a>>,
    risk_score: Option<f64>,
    #[serde(skip_serializing_if = "no_checks")]
    scorecard_checks: &'a [ScorecardCheck],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unavailable: Vec<Lookup>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<JsonDependency<'a>>,
}

impl<'a> JsonDependency<'a> {
    fn build(result: &'a ReconciliationResult, dep: &'a EnrichedDependency) -> Self {
        let previous_version = match dep.change_type {
            ChangeType::Updated => result
                .previous_of(&dep.key())
                .and_then(|previous| previous.version.as_deref()),
            _ => None,
        };
        Self {
            change_type: dep.change_type,
            package_url: dep.record.package_url.as_deref(),
            source_repository: dep.record.source_repository(),
            manifest_path: dep.record.manifest_path.as_deref(),
            ecosystem: &dep.record.ecosystem,
            version: dep.record.version.as_deref(),
            previous_version,
            name: &dep.record.name,
            vulnerabilities: dep.advisories.iter().map(JsonAdvisory::from).collect(),
            risk_score: dep.risk_score(),
            scorecard_checks: dep
                .scorecard
                .as_ref()
                .map_or(&[][..], |s| s.checks.as_slice()),
            unavailable: dep.unavailable.iter().copied().collect(),
            dependencies: dep
                .transitive
                .iter()
                .map(|child| JsonDependency::build(result, child))
                .collect(),
        }
    }
}

/// Serializes the ranked buckets as one pretty-printed JSON array, in the
/// order added, updated, removed.
///
/// # Errors
///
/// Returns the serializer error; with the types used here this does not
/// happen in practice.
pub fn render(
    result: &ReconciliationResult,
    added: &[EnrichedDependency],
    updated: &[EnrichedDependency],
    removed: &[EnrichedDependency],
) -> serde_json::Result<String> {
    let out: Vec<JsonDependency<'_>> = added
        .iter()
        .chain(updated)
        .chain(removed)
        .map(|dep| JsonDependency::build(result, dep))
        .collect();
    serde_json::to_string_pretty(&out)
}
