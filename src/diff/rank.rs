//! Risk ordering of enriched dependencies.

use std::cmp::Ordering;

use crate::model::EnrichedDependency;

/// Orders two dependencies by score (descending, unavailable last), then
/// name, then ecosystem.
///
/// An unavailable score sorts after every present score, including `0.0`.
pub fn compare(a: &EnrichedDependency, b: &EnrichedDependency) -> Ordering {
    let by_score = match (a.risk_score(), b.risk_score()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_score
        .then_with(|| a.record.name.cmp(&b.record.name))
        .then_with(|| a.record.ecosystem.cmp(&b.record.ecosystem))
}

/// Returns the bucket's dependencies in ranked order.
pub fn rank<I>(bucket: I) -> Vec<EnrichedDependency>
where
    I: IntoIterator<Item = EnrichedDependency>,
{
    let mut ranked: Vec<_> = bucket.into_iter().collect();
    ranked.sort_by(compare);
    ranked
}
