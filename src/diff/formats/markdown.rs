//! Markdown report renderer.
//!
//! One line-group per dependency, buckets in the fixed order added, updated,
//! removed. A line-group starts with the change tag, then the score tag
//! (omitted when the score is unavailable), the vulnerability marker (only
//! when the dependency has advisories) and the identity. Detail lines for
//! advisories, vulnerable transitive dependencies and unavailable lookups
//! follow as a nested list.

use crate::diff::reconcile::ReconciliationResult;
use crate::model::{ChangeType, EnrichedDependency, VulnerabilityAdvisory};

/// Emitted instead of an empty report.
pub const NO_CHANGES: &str = "No dependency changes";

pub fn render(
    result: &ReconciliationResult,
    added: &[EnrichedDependency],
    updated: &[EnrichedDependency],
    removed: &[EnrichedDependency],
) -> String {
    let groups: Vec<String> = added
        .iter()
        .chain(updated)
        .chain(removed)
        .map(|dep| line_group(result, dep))
        .collect();

    if groups.is_empty() {
        return format!("{NO_CHANGES}\n");
    }
    groups.join("\n")
}

fn change_tag(change_type: ChangeType) -> String {
    match change_type {
        ChangeType::Added | ChangeType::Updated => format!("**`{change_type}`**"),
        ChangeType::Removed => format!("~~**`{change_type}`**~~"),
    }
}

fn vulnerability_marker(advisories: &[VulnerabilityAdvisory]) -> Option<String> {
    let first = advisories.first()?;
    Some(match first.source_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => format!("[**`vulnerable`**]({url})"),
        None => "**`vulnerable`**".to_string(),
    })
}

fn advisory_line(advisory: &VulnerabilityAdvisory) -> String {
    let mut line = format!("  - {} `{}`", advisory.advisory_id, advisory.severity);
    if let Some(score) = advisory.cvss3_score {
        line.push_str(&format!(" CVSS {score:.1}"));
    }
    if let Some(title) = advisory.title.as_deref().filter(|t| !t.is_empty()) {
        line.push_str(&format!(": {title}"));
    }
    line
}

fn line_group(result: &ReconciliationResult, dep: &EnrichedDependency) -> String {
    let mut head = vec![change_tag(dep.change_type)];
    if let Some(score) = dep.risk_score() {
        head.push(format!("`Scorecard Score: {score:.1}`"));
    }
    if let Some(marker) = vulnerability_marker(&dep.advisories) {
        head.push(marker);
    }

    let current = dep.record.identity();
    let identity = match (dep.change_type, result.previous_of(&dep.key())) {
        (ChangeType::Updated, Some(previous)) => format!(
            "{} (**old**) :arrow_right: {current} (**new**)",
            previous.identity()
        ),
        _ => current,
    };
    head.push(identity);

    let mut lines = vec![head.join(" ")];
    lines.extend(dep.advisories.iter().map(advisory_line));
    for child in dep.vulnerable_transitive() {
        let ids: Vec<&str> = child
            .advisories
            .iter()
            .map(|a| a.advisory_id.as_str())
            .collect();
        lines.push(format!(
            "  - transitive {} **`vulnerable`**: {}",
            child.record.identity(),
            ids.join(", ")
        ));
    }
    let incomplete = dep.transitive.iter().filter(|c| !c.unavailable.is_empty()).count();
    if !dep.unavailable.is_empty() || incomplete > 0 {
        let mut missing: Vec<String> = dep.unavailable.iter().map(ToString::to_string).collect();
        if incomplete > 0 {
            missing.push(format!("advisories of {incomplete} transitive"));
        }
        lines.push(format!("  - `unavailable: {}`", missing.join(", ")));
    }

    let mut group = lines.join("\n");
    group.push('\n');
    group
}
