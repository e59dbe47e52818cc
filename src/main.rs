use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use export_reconciler::utils::parse_date;
use export_reconciler::{
    read_config, summarize, Clock, CommandTrigger, DownloadDirectoryProbe, ExportTrigger,
    NamePattern, NoopTrigger, ReconciliationConfig, RetryCoordinator, SystemClock,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Export Reconciler - trigger, verify and retry daily spreadsheet exports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. "debug" or "export_reconciler=trace".
    /// Falls back to RUST_LOG, then "info".
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trigger and verify every missing deliverable, retrying failures
    Run(RunArgs),
    /// List which deliverables are present or missing, without triggering anything
    Check(CommonArgs),
    /// Remove duplicate downloads, keeping the newest file per deliverable
    Dedupe(CommonArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "EXPORT_RECONCILER_CONFIG")]
    config: PathBuf,

    /// Override the download directory from the config
    #[arg(long, env = "EXPORT_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// Target date (YYYY-MM-DD); defaults to the config value or today
    #[arg(long)]
    date: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Program run once per attempt to start an export.
    /// The deliverable's locator is passed as its last argument.
    #[arg(long, env = "EXPORT_TRIGGER_COMMAND")]
    trigger_command: Option<PathBuf>,

    /// Extra argument for the trigger program (repeatable)
    #[arg(long = "trigger-arg", allow_hyphen_values = true)]
    trigger_args: Vec<String>,

    /// Only wait for files, never trigger exports
    #[arg(long)]
    verify_only: bool,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Check(args) => check(args).await,
        Command::Dedupe(args) => dedupe(args).await,
    }
}

async fn load_config(args: &CommonArgs) -> Result<ReconciliationConfig> {
    let mut config = read_config(&args.config)
        .await
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    if let Some(dir) = &args.download_dir {
        config.download_dir = dir.clone();
    }
    if let Some(date) = &args.date {
        let date = parse_date(date).with_context(|| format!("Invalid date '{}'", date))?;
        config.target_date = Some(date);
    }

    Ok(config)
}

fn patterns_for(config: &ReconciliationConfig, clock: &dyn Clock) -> Result<Vec<NamePattern>> {
    let date = config.target_date.unwrap_or_else(|| clock.today());
    let options = config.pattern_options();
    config
        .deliverables
        .iter()
        .map(|d| NamePattern::for_deliverable(d, date, &options).map_err(Into::into))
        .collect()
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = load_config(&args.common).await?;

    let trigger: Arc<dyn ExportTrigger> = match (&args.trigger_command, args.verify_only) {
        (Some(program), false) => Arc::new(CommandTrigger::new(program, args.trigger_args)),
        _ => {
            info!("No trigger command, running in verify-only mode");
            Arc::new(NoopTrigger)
        }
    };

    let coordinator = RetryCoordinator::new(config, trigger, Arc::new(SystemClock));
    let result = coordinator.run().await?;
    let report = summarize(&result);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn check(args: CommonArgs) -> Result<ExitCode> {
    let config = load_config(&args).await?;
    let patterns = patterns_for(&config, &SystemClock)?;
    let probe = DownloadDirectoryProbe::from_config(&config);

    let presence = probe
        .check_existing(&patterns)
        .await
        .with_context(|| format!("Failed to read {}", probe.dir().display()))?;

    for entry in &presence.entries {
        if entry.files.is_empty() {
            println!("MISSING  {}  (expected: {})", entry.base_name, entry.expected_hint);
        } else {
            println!("PRESENT  {}  {}", entry.base_name, entry.files.join(", "));
        }
    }

    let missing = presence.missing().len();
    println!(
        "\n{} present, {} missing",
        presence.entries.len() - missing,
        missing
    );

    Ok(if missing == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn dedupe(args: CommonArgs) -> Result<ExitCode> {
    let config = load_config(&args).await?;
    let patterns = patterns_for(&config, &SystemClock)?;
    let probe = DownloadDirectoryProbe::from_config(&config);

    let report = probe.deduplicate(&patterns).await;

    for name in &report.removed {
        println!("removed  {}", name);
    }
    for (name, error) in &report.failed {
        println!("failed   {}: {}", name, error);
    }
    println!(
        "\nKept {}, removed {}, failed {}",
        report.kept.len(),
        report.removed.len(),
        report.failed.len()
    );

    Ok(if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
