//! End-to-end pipeline scenarios against in-memory collaborators.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use dependency_diff::{
    ChangeDirection, DependencyRecord, DiffPipeline, DiffSource, FetchError, GraphSource, Lookup,
    PipelineError, ScorecardEngine, ScorecardResult, Severity, VulnerabilityAdvisory,
};

struct StaticDiff(Vec<DependencyRecord>);

#[async_trait]
impl DiffSource for StaticDiff {
    async fn fetch_diff(&self, _base: &str, _head: &str) -> Result<Vec<DependencyRecord>, FetchError> {
        Ok(self.0.clone())
    }
}

/// Graph answering from fixed tables, keyed by package name.
#[derive(Default)]
struct ScriptedGraph {
    transitive: HashMap<String, Vec<DependencyRecord>>,
    advisories: HashMap<String, Vec<VulnerabilityAdvisory>>,
    by_id: HashMap<String, VulnerabilityAdvisory>,
    failing: HashSet<String>,
    cancel_on: Option<(String, CancellationToken)>,
    calls: AtomicUsize,
}

impl ScriptedGraph {
    fn with_transitive(mut self, name: &str, records: Vec<DependencyRecord>) -> Self {
        self.transitive.insert(name.to_string(), records);
        self
    }

    fn with_advisories(mut self, name: &str, advisories: Vec<VulnerabilityAdvisory>) -> Self {
        self.advisories.insert(name.to_string(), advisories);
        self
    }

    fn with_full_advisory(mut self, advisory: VulnerabilityAdvisory) -> Self {
        self.by_id.insert(advisory.advisory_id.clone(), advisory);
        self
    }

    fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    fn cancelling_on(mut self, name: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((name.to_string(), token));
        self
    }
}

#[async_trait]
impl GraphSource for ScriptedGraph {
    async fn fetch_transitive_dependencies(
        &self,
        _ecosystem: &str,
        name: &str,
        _version: &str,
    ) -> Result<Vec<DependencyRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((target, token)) = &self.cancel_on {
            if target == name {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        if self.failing.contains(name) {
            return Err(FetchError::Status {
                status: 503,
                url: format!("https://graph.test/{name}"),
            });
        }
        Ok(self.transitive.get(name).cloned().unwrap_or_default())
    }

    async fn fetch_advisories(
        &self,
        _ecosystem: &str,
        name: &str,
        _version: &str,
    ) -> Result<Vec<VulnerabilityAdvisory>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.advisories.get(name).cloned().unwrap_or_default())
    }

    async fn fetch_advisory_by_id(
        &self,
        advisory_id: &str,
    ) -> Result<VulnerabilityAdvisory, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.by_id
            .get(advisory_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(advisory_id.to_string()))
    }
}

/// Scores by repository URL; unknown repositories are not found.
#[derive(Default)]
struct ScoreTable(HashMap<String, f64>);

impl ScoreTable {
    fn with(mut self, url: &str, score: f64) -> Self {
        self.0.insert(url.to_string(), score);
        self
    }
}

#[async_trait]
impl ScorecardEngine for ScoreTable {
    async fn fetch_risk_score(&self, url: &str) -> Result<ScorecardResult, FetchError> {
        self.0
            .get(url)
            .map(|score| ScorecardResult {
                score: *score,
                checks: vec![],
            })
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

fn added(name: &str, version: &str) -> DependencyRecord {
    DependencyRecord::new(name, "npm", ChangeDirection::Added).with_version(version)
}

fn removed(name: &str, version: &str) -> DependencyRecord {
    DependencyRecord::new(name, "npm", ChangeDirection::Removed).with_version(version)
}

fn critical(id: &str) -> VulnerabilityAdvisory {
    VulnerabilityAdvisory::new(id)
        .with_severity(Severity::Critical)
        .with_cvss3_score(9.8)
        .with_title("Remote code execution")
        .with_source_url(&format!("https://github.com/advisories/{id}"))
}

fn pipeline(
    records: Vec<DependencyRecord>,
    graph: ScriptedGraph,
    scores: ScoreTable,
) -> DiffPipeline {
    DiffPipeline::new(Arc::new(StaticDiff(records)), Arc::new(graph), Arc::new(scores))
}

#[tokio::test]
async fn test_scored_vulnerable_dependency_listed_before_unscored() {
    let records = vec![
        added("x", "2.0"),
        removed("x", "1.0"),
        added("y", "1.0").with_source_repository("https://github.com/acme/y"),
    ];
    let graph = ScriptedGraph::default()
        .with_advisories("y", vec![critical("GHSA-0001"), critical("GHSA-0002")]);
    let scores = ScoreTable::default().with("https://github.com/acme/y", 4.0);

    let report = pipeline(records, graph, scores)
        .run("base", "head", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.added.len(), 1);
    assert_eq!(report.updated.len(), 1);
    assert!(report.removed.is_empty());

    let y = &report.added[0];
    assert_eq!(y.name(), "y");
    assert_eq!(y.risk_score(), Some(4.0));
    assert_eq!(y.advisories.len(), 2);

    let x = &report.updated[0];
    assert_eq!(x.name(), "x");
    assert_eq!(x.risk_score(), None);
    assert!(x.unavailable.is_empty());

    let text = report.to_markdown();
    let y_at = text.find("npm: y @ 1.0").unwrap();
    let x_at = text.find("npm: x @ 1.0 (**old**) :arrow_right: npm: x @ 2.0 (**new**)").unwrap();
    assert!(y_at < x_at);
    assert!(text.starts_with(
        "**`added`** `Scorecard Score: 4.0` [**`vulnerable`**](https://github.com/advisories/GHSA-0001)"
    ));
    let x_line = text.lines().find(|l| l.contains(":arrow_right:")).unwrap();
    assert!(!x_line.contains("Scorecard Score"));
    assert!(!x_line.contains("vulnerable"));
}

#[tokio::test]
async fn test_bucket_ranked_by_score_with_unscored_last() {
    let records = vec![
        added("a", "1.0"),
        added("b", "1.0").with_source_repository("https://github.com/acme/b"),
        added("c", "1.0").with_source_repository("https://github.com/acme/c"),
    ];
    let scores = ScoreTable::default()
        .with("https://github.com/acme/b", 3.0)
        .with("https://github.com/acme/c", 7.5);

    let report = pipeline(records, ScriptedGraph::default(), scores)
        .run("base", "head", CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<_> = report.added.iter().map(|d| d.name().to_string()).collect();
    assert_eq!(names, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_every_record_lands_in_exactly_one_bucket() {
    let records = vec![
        added("kept", "2.0"),
        removed("kept", "1.0"),
        added("fresh", "1.0"),
        removed("gone", "3.1"),
        DependencyRecord::new("requests", "pip", ChangeDirection::Added).with_version("2.31.0"),
        DependencyRecord::new("requests", "pypi", ChangeDirection::Removed).with_version("2.28.0"),
    ];

    let report = pipeline(records, ScriptedGraph::default(), ScoreTable::default())
        .run("base", "head", CancellationToken::new())
        .await
        .unwrap();

    let mut seen = HashSet::new();
    for dep in report.added.iter().chain(&report.updated).chain(&report.removed) {
        assert!(seen.insert(dep.key()), "{} appears twice", dep.key());
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(report.updated.len(), 2);
    assert_eq!(report.removed[0].name(), "gone");
}

#[tokio::test]
async fn test_removed_dependencies_are_not_looked_up() {
    let graph = Arc::new(ScriptedGraph::default());
    let report = DiffPipeline::new(
        Arc::new(StaticDiff(vec![removed("old", "1.0")
            .with_source_repository("https://github.com/acme/old")])),
        graph.clone(),
        Arc::new(ScoreTable::default().with("https://github.com/acme/old", 9.0)),
    )
    .run("base", "head", CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(graph.calls.load(Ordering::SeqCst), 0);
    let old = &report.removed[0];
    assert_eq!(old.risk_score(), None);
    assert!(old.advisories.is_empty());
    assert!(report.to_markdown().starts_with("~~**`removed`**~~ npm: old @ 1.0"));
}

#[tokio::test]
async fn test_advisory_merge_ignores_source_order() {
    let sparse = VulnerabilityAdvisory::new("GHSA-aaaa").with_severity(Severity::High);
    let full = VulnerabilityAdvisory::new("GHSA-aaaa")
        .with_severity(Severity::High)
        .with_cvss3_score(8.1)
        .with_title("Prototype pollution")
        .with_source_url("https://github.com/advisories/GHSA-aaaa");
    let other = VulnerabilityAdvisory::new("GHSA-bbbb")
        .with_severity(Severity::Low)
        .with_cvss3_score(3.1)
        .with_title("Information exposure");

    let run = |inline: Vec<VulnerabilityAdvisory>, fetched: Vec<VulnerabilityAdvisory>| {
        let mut record = added("lib", "1.0");
        record.advisories = inline;
        let graph = ScriptedGraph::default()
            .with_advisories("lib", fetched)
            .with_full_advisory(full.clone());
        async move {
            pipeline(vec![record], graph, ScoreTable::default())
                .run("base", "head", CancellationToken::new())
                .await
                .unwrap()
        }
    };

    let first = run(
        vec![sparse.clone(), other.clone()],
        vec![full.clone(), other.clone()],
    )
    .await;
    let second = run(
        vec![other.clone(), sparse.clone()],
        vec![other.clone(), full.clone()],
    )
    .await;

    let advisories = &first.added[0].advisories;
    assert_eq!(advisories, &second.added[0].advisories);
    assert_eq!(advisories.len(), 2);
    assert_eq!(advisories[0], full);
    assert_eq!(advisories[1].advisory_id, "GHSA-bbbb");
}

#[tokio::test]
async fn test_transitive_failure_is_marked_not_fatal() {
    let records = vec![added("flaky", "1.0"), added("parent", "2.0")];
    let graph = ScriptedGraph::default()
        .failing("flaky")
        .with_transitive(
            "parent",
            vec![DependencyRecord::new("child", "NPM", ChangeDirection::Added).with_version("0.3.0")],
        )
        .with_advisories("child", vec![critical("GHSA-c1c1")]);

    let report = pipeline(records, graph, ScoreTable::default())
        .run("base", "head", CancellationToken::new())
        .await
        .unwrap();

    let flaky = report.added.iter().find(|d| d.name() == "flaky").unwrap();
    assert!(flaky.unavailable.contains(&Lookup::Transitive));
    assert!(!flaky.unavailable.contains(&Lookup::Advisories));

    let parent = report.added.iter().find(|d| d.name() == "parent").unwrap();
    let child = &parent.transitive[0];
    assert_eq!(child.record.ecosystem, "npm");
    assert!(!child.record.is_direct);
    assert!(!parent.is_vulnerable());
    assert_eq!(parent.vulnerable_transitive().count(), 1);

    let text = report.to_markdown();
    assert!(text.contains("  - `unavailable: transitive`"));
    assert!(text.contains("  - transitive npm: child @ 0.3.0 **`vulnerable`**: GHSA-c1c1"));
    assert_eq!(report.stats.incomplete_dependencies, 1);
}

#[tokio::test]
async fn test_fail_fast_aborts_on_lookup_failure() {
    let records = vec![added("bad", "1.0"), added("good", "1.0")];
    let err = pipeline(records, ScriptedGraph::default().failing("bad"), ScoreTable::default())
        .with_fail_fast(true)
        .run("base", "head", CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::Enrichment { dependency, .. } => assert_eq!(dependency, "npm: bad"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_cancellation_keeps_completed_records() {
    let cancel = CancellationToken::new();
    let records = vec![
        added("fast", "1.0").with_source_repository("https://github.com/acme/fast"),
        added("slow", "1.0").with_source_repository("https://github.com/acme/slow"),
    ];
    let graph = ScriptedGraph::default().cancelling_on("slow", cancel.clone());
    let scores = ScoreTable::default()
        .with("https://github.com/acme/fast", 6.0)
        .with("https://github.com/acme/slow", 6.0);

    let report = pipeline(records, graph, scores)
        .with_concurrency(1)
        .run("base", "head", cancel)
        .await
        .unwrap();

    let fast = report.added.iter().find(|d| d.name() == "fast").unwrap();
    assert!(fast.unavailable.is_empty());
    assert_eq!(fast.risk_score(), Some(6.0));

    let slow = report.added.iter().find(|d| d.name() == "slow").unwrap();
    assert!(slow.unavailable.contains(&Lookup::Transitive));
    assert!(slow.unavailable.contains(&Lookup::Advisories));
    assert!(slow.unavailable.contains(&Lookup::Score));
    assert_eq!(slow.risk_score(), None);
    assert_eq!(report.added[0].name(), "fast");
}

#[tokio::test]
async fn test_json_report_shape() {
    let records = vec![
        added("x", "2.0").with_manifest_path("package.json"),
        removed("x", "1.0"),
        added("y", "1.0").with_source_repository("https://github.com/acme/y"),
    ];
    let graph = ScriptedGraph::default().with_advisories("y", vec![critical("GHSA-0001")]);
    let scores = ScoreTable::default().with("https://github.com/acme/y", 4.0);

    let report = pipeline(records, graph, scores)
        .run("base", "head", CancellationToken::new())
        .await
        .unwrap();
    let value: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    let entries = value.as_array().unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["changeType"], "added");
    assert_eq!(entries[0]["name"], "y");
    assert_eq!(entries[0]["riskScore"], 4.0);
    assert_eq!(entries[0]["vulnerabilities"][0]["advisoryId"], "GHSA-0001");
    assert_eq!(entries[0]["vulnerabilities"][0]["severity"], "CRITICAL");

    assert_eq!(entries[1]["changeType"], "updated");
    assert_eq!(entries[1]["version"], "2.0");
    assert_eq!(entries[1]["previousVersion"], "1.0");
    assert_eq!(entries[1]["manifestPath"], "package.json");
    assert!(entries[1]["riskScore"].is_null());
}
