//! Advisory deduplication.
//!
//! The same advisory often arrives more than once for one dependency: a sparse copy
//! inline in the diff source response and a fuller copy from the graph
//! source, sometimes a third from a lookup by id. All copies of one
//! `advisory_id` are merged together: the most complete copy wins and its
//! gaps are filled from the others in preference order, so the outcome does
//! not depend on which copy was seen first.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::model::VulnerabilityAdvisory;

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Total preference order between two copies of the same advisory.
fn preference(a: &VulnerabilityAdvisory, b: &VulnerabilityAdvisory) -> Ordering {
    a.completeness()
        .cmp(&b.completeness())
        .then_with(|| non_empty(&a.title).cmp(&non_empty(&b.title)))
        .then_with(|| non_empty(&a.source_url).cmp(&non_empty(&b.source_url)))
        .then_with(|| a.severity.weight().cmp(&b.severity.weight()))
        .then_with(|| a.severity.to_string().cmp(&b.severity.to_string()))
        .then_with(|| match (a.cvss3_score, b.cvss3_score) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        })
        .then_with(|| a.disclosed_at.cmp(&b.disclosed_at))
}

/// Fills the empty fields of `primary` from `other`.
fn fill_gaps(
    mut primary: VulnerabilityAdvisory,
    other: &VulnerabilityAdvisory,
) -> VulnerabilityAdvisory {
    if non_empty(&primary.title).is_none() {
        primary.title = non_empty(&other.title).map(str::to_string);
    }
    if non_empty(&primary.source_url).is_none() {
        primary.source_url = non_empty(&other.source_url).map(str::to_string);
    }
    if !primary.severity.is_known() {
        primary.severity = other.severity;
    }
    if primary.cvss3_score.is_none() {
        primary.cvss3_score = other.cvss3_score;
    }
    if primary.disclosed_at.is_none() {
        primary.disclosed_at = other.disclosed_at;
    }
    primary
}

/// Merges two copies of one advisory, preferring the more complete one.
pub fn merge_advisory(
    a: VulnerabilityAdvisory,
    b: VulnerabilityAdvisory,
) -> VulnerabilityAdvisory {
    if preference(&a, &b) == Ordering::Less {
        fill_gaps(b, &a)
    } else {
        fill_gaps(a, &b)
    }
}

/// Merges every copy of one advisory. Copies are ranked by preference and
/// the best one has its gaps filled from the others in rank order, so the
/// input order never matters. `None` only for an empty group.
fn merge_group(mut copies: Vec<VulnerabilityAdvisory>) -> Option<VulnerabilityAdvisory> {
    copies.sort_by(|a, b| preference(b, a));
    copies
        .into_iter()
        .reduce(|merged, other| fill_gaps(merged, &other))
}

/// Deduplicates advisories by id.
///
/// Output is ordered most severe first (severity, then CVSS score), ties
/// broken by id.
pub fn merge_advisories<I>(advisories: I) -> Vec<VulnerabilityAdvisory>
where
    I: IntoIterator<Item = VulnerabilityAdvisory>,
{
    let mut by_id: BTreeMap<String, Vec<VulnerabilityAdvisory>> = BTreeMap::new();
    for advisory in advisories {
        by_id
            .entry(advisory.advisory_id.clone())
            .or_default()
            .push(advisory);
    }

    let mut merged: Vec<_> = by_id.into_values().filter_map(merge_group).collect();
    merged.sort_by(|a, b| {
        b.severity
            .weight()
            .cmp(&a.severity.weight())
            .then_with(|| match (a.cvss3_score, b.cvss3_score) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.advisory_id.cmp(&b.advisory_id))
    });
    merged
}
