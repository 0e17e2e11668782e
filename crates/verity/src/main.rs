mod scenario;

use anyhow::Context as _;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

use verity_common::protocol::{BrowserType, Resolution, TestOutcome, TestStatus};
use verity_engine::config::{ConfigLoader, NavigationWait, VerityConfig};
use verity_engine::driver::Grid;
use verity_engine::orchestrator::Orchestrator;
use verity_engine::session::SessionProvisioner;
use verity_wd::{SelenoidGrid, WdLauncher};

#[derive(Parser)]
#[command(name = "verity", version, about = "Resilient browser UI test runner")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario file against the configured target
    Run(RunArgs),
    /// Probe a grid's capacity
    GridStatus {
        /// Grid endpoint (e.g. http://localhost:4444)
        #[arg(long)]
        grid_url: Url,
    },
}

#[derive(ClapArgs)]
struct RunArgs {
    /// Scenario file to execute
    #[arg(long)]
    scenario: PathBuf,

    /// Config file (defaults to ./verity.yaml, then ~/.verity/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target application base URL
    #[arg(long)]
    target: Option<Url>,

    /// Browser type: chromium, firefox, webkit or edge
    #[arg(long)]
    browser: Option<String>,

    /// Grid endpoint; if provided, tests run on the grid
    #[arg(long)]
    grid_url: Option<Url>,

    /// Browser version to request from the grid
    #[arg(long)]
    browser_version: Option<String>,

    /// Screen resolution: hd, fhd, qhd, uhd or fullscreen
    #[arg(long)]
    resolution: Option<String>,

    /// Post-navigation wait: network_idle, animations_settled or none
    #[arg(long)]
    wait_strategy: Option<String>,

    /// Worker pool size
    #[arg(long)]
    workers: Option<usize>,

    /// Launch local browsers in visible mode (not headless)
    #[arg(long)]
    visible: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Run(run_args) => cmd_run(run_args).await,
        Command::GridStatus { grid_url } => cmd_grid_status(grid_url).await,
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    apply_overrides(&mut config, &args)?;

    let _log_guard = init_logging(&config.log_dir)?;
    info!(scenario = %args.scenario.display(), "verity starting");

    let tests = scenario::load_scenarios(&args.scenario)
        .with_context(|| format!("loading scenario {}", args.scenario.display()))?;

    let launcher = Arc::new(WdLauncher::new(!args.visible, config.video_on_failure_only));
    let grid: Option<Arc<dyn Grid>> = config
        .grid_endpoint
        .clone()
        .map(|endpoint| Arc::new(SelenoidGrid::new(endpoint)) as Arc<dyn Grid>);

    let provisioner = Arc::new(SessionProvisioner::new(
        launcher,
        grid,
        config.provisioner_options(),
    ));
    let orchestrator = Orchestrator::new(
        provisioner,
        config.session_request(),
        config.retry_policy(),
        config.run_options(),
    );

    let outcomes = orchestrator.run_suite(tests).await;
    persist_artifacts(&config.artifact_dir, &outcomes)?;

    if print_summary(&outcomes, config.flaky_fails_suite) {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_grid_status(grid_url: Url) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let grid = SelenoidGrid::new(grid_url.clone());
    match grid.capacity().await {
        Some(total) => println!("grid at {} reports {} container slots", grid_url, total),
        None => println!("grid at {} is unreachable", grid_url),
    }
    Ok(())
}

fn apply_overrides(config: &mut VerityConfig, args: &RunArgs) -> anyhow::Result<()> {
    if let Some(target) = &args.target {
        config.target = Some(target.clone());
    }
    if let Some(browser) = &args.browser {
        config.browser = browser
            .parse::<BrowserType>()
            .map_err(anyhow::Error::msg)?;
    }
    if let Some(grid_url) = &args.grid_url {
        config.grid_endpoint = Some(grid_url.clone());
    }
    if let Some(version) = &args.browser_version {
        config.browser_version = version.clone();
    }
    if let Some(resolution) = &args.resolution {
        config.resolution = resolution
            .parse::<Resolution>()
            .map_err(anyhow::Error::msg)?;
    }
    if let Some(strategy) = &args.wait_strategy {
        config.navigation_wait = match strategy.as_str() {
            "network_idle" => NavigationWait::NetworkIdle,
            "animations_settled" => NavigationWait::AnimationsSettled,
            "none" => NavigationWait::None,
            other => anyhow::bail!(
                "unknown wait strategy '{}' (expected network_idle, animations_settled or none)",
                other
            ),
        };
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    Ok(())
}

/// Console logging to stderr plus a per-run file under the log dir, named
/// by start time so parallel runs never clobber each other.
fn init_logging(log_dir: &Path) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let log_path = log_dir.join(format!("test_{}.log", timestamp));
    let log_file = std::fs::File::create(&log_path)?;
    let (file_writer, guard) = tracing_appender::non_blocking(log_file);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("verity=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    eprintln!("logging to {}", log_path.display());
    Ok(guard)
}

/// Write each failed test's bundle under `<artifact_dir>/<test-id>/`.
fn persist_artifacts(artifact_dir: &Path, outcomes: &[TestOutcome]) -> anyhow::Result<()> {
    for outcome in outcomes {
        let Some(bundle) = &outcome.artifacts else {
            continue;
        };

        let dir = artifact_dir.join(sanitize(&outcome.test_id));
        std::fs::create_dir_all(&dir)?;

        if let Some(screenshot) = &bundle.screenshot {
            std::fs::write(dir.join("screenshot.png"), screenshot)?;
        }
        if let Some(video) = &bundle.video {
            std::fs::write(dir.join("video.mp4"), video)?;
        }
        if let Some(dom) = &bundle.dom_snapshot {
            std::fs::write(dir.join("dom.html"), dom)?;
        }

        let mut log = bundle.log_lines.join("\n");
        if !bundle.warnings.is_empty() {
            log.push_str("\n\n# warnings\n");
            log.push_str(&bundle.warnings.join("\n"));
        }
        std::fs::write(dir.join("test.log"), log)?;

        info!(test = %outcome.test_id, dir = %dir.display(), "artifacts written");
    }
    Ok(())
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Print the suite summary; returns true when the run should fail the
/// process under the configured flaky policy.
fn print_summary(outcomes: &[TestOutcome], flaky_fails_suite: bool) -> bool {
    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut flaky = 0usize;
    let mut skipped = 0usize;

    for outcome in outcomes {
        let label = match outcome.status {
            TestStatus::Passed => {
                passed += 1;
                "PASS "
            }
            TestStatus::Failed => {
                failed += 1;
                "FAIL "
            }
            TestStatus::Flaky => {
                flaky += 1;
                "FLAKY"
            }
            TestStatus::Skipped => {
                skipped += 1;
                "SKIP "
            }
        };
        let detail = match &outcome.error {
            Some(error) => format!(" — {}", error),
            None => String::new(),
        };
        println!(
            "{} {} ({} attempt{}, {}ms){}",
            label,
            outcome.test_id,
            outcome.attempts_used,
            if outcome.attempts_used == 1 { "" } else { "s" },
            outcome.duration_ms,
            detail
        );
    }

    println!(
        "\n{} passed, {} failed, {} flaky, {} skipped",
        passed, failed, flaky, skipped
    );

    failed > 0 || (flaky_fails_suite && flaky > 0)
}
