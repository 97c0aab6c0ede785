use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dependency_diff::clients::{DepsDevGraphSource, GitHubDiffSource, ScorecardApiClient};
use dependency_diff::{DiffPipeline, OutputFormat};

/// Risk report for the dependency changes between two commits of a GitHub repository
#[derive(Parser)]
#[command(name = "dependency-diff", version, about)]
struct Cli {
    /// Repository owner
    owner: String,

    /// Repository name
    repo: String,

    /// Base commit, branch or tag
    base: String,

    /// Head commit, branch or tag
    head: String,

    /// GitHub token for the dependency review API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Report format (markdown, json)
    #[arg(short, long, default_value = "markdown")]
    format: OutputFormat,

    /// Maximum dependencies enriched at once
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Timeout for each external call, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Fail on the first transitive or advisory lookup error
    #[arg(long)]
    fail_fast: bool,

    /// Log level, overridden by RUST_LOG
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Ignore the error if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<String> {
    let call_timeout = Duration::from_secs(cli.timeout_secs.max(1));

    let diff_source = GitHubDiffSource::new(&cli.owner, &cli.repo, call_timeout)
        .context("failed to build GitHub client")?
        .with_token(cli.token);
    let graph = DepsDevGraphSource::new(call_timeout).context("failed to build deps.dev client")?;
    let scorecard =
        ScorecardApiClient::new(call_timeout).context("failed to build Scorecard client")?;

    let pipeline = DiffPipeline::new(Arc::new(diff_source), Arc::new(graph), Arc::new(scorecard))
        .with_call_timeout(call_timeout)
        .with_concurrency(cli.concurrency)
        .with_fail_fast(cli.fail_fast);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing with partial results");
            on_signal.cancel();
        }
    });

    let report = pipeline
        .run(&cli.base, &cli.head, cancel)
        .await
        .with_context(|| format!("dependency diff {}...{} failed", cli.base, cli.head))?;
    tracing::info!(
        total_ms = report.stats.total_duration_ms,
        incomplete = report.stats.incomplete_dependencies,
        "report ready"
    );
    report
        .render(cli.format)
        .context("failed to serialize report")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli).await {
        Ok(output) => {
            println!("{}", output.trim_end());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
