//! Process entry point.
//!
//! Invocation modes:
//! - default: continuous monitoring loop with a fixed inter-cycle delay
//! - `--check-once`: run a single processing cycle and exit
//! - `--health-check`: probe the three dependencies and exit
//! - `--config-check`: validate configuration and exit, no network I/O
//!
//! Exit codes: 0 success; 1 a dependency is down or the run failed;
//! 2 configuration invalid.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use assignbot::config::Config;
use assignbot::health::{self, HealthReport};
use assignbot::mailbox::{ImapMailbox, MailboxReader};
use assignbot::pipeline::{Pipeline, PipelineSettings};
use assignbot::predict::{HttpPredictor, Predictor};
use assignbot::state::LibSqlStore;
use assignbot::tracker::{GitLabTracker, IssueTracker};

const EXIT_DEPENDENCY: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(
    name = "assignbot",
    version,
    about = "GitLab assignee automation driven by mailbox notifications"
)]
struct Cli {
    /// Run a single processing cycle and exit.
    #[arg(long, conflicts_with_all = ["health_check", "config_check"])]
    check_once: bool,

    /// Probe the mailbox, prediction service, and tracker, then exit.
    #[arg(long, conflicts_with = "config_check")]
    health_check: bool,

    /// Validate configuration and exit without any network I/O.
    #[arg(long)]
    config_check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let _log_guard = init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if cli.config_check {
        println!("✓ Configuration is valid");
        return ExitCode::SUCCESS;
    }

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {e:#}");
            ExitCode::from(EXIT_DEPENDENCY)
        }
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    let mailbox = Arc::new(ImapMailbox::new(config.imap.clone()));
    let predictor =
        Arc::new(HttpPredictor::new(&config.predictor).context("building predictor client")?);
    let tracker = Arc::new(GitLabTracker::new(&config.tracker).context("building tracker client")?);

    if cli.health_check {
        let report = health::check_health(
            mailbox.as_ref(),
            predictor.as_ref(),
            tracker.as_ref(),
            config.probe_timeout,
        )
        .await;
        print_health(&report);
        return Ok(if report.overall {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(EXIT_DEPENDENCY)
        });
    }

    let state = Arc::new(
        LibSqlStore::open(&config.state_path, config.max_attempts)
            .await
            .context("opening state store")?,
    );

    let settings = PipelineSettings {
        confidence_threshold: config.confidence_threshold,
        dry_run: config.dry_run,
        max_attempts: config.max_attempts,
    };
    let pipeline = Pipeline::new(
        Arc::clone(&mailbox) as Arc<dyn MailboxReader>,
        Arc::clone(&predictor) as Arc<dyn Predictor>,
        Arc::clone(&tracker) as Arc<dyn IssueTracker>,
        state,
        settings,
    );

    if cli.check_once {
        let report = pipeline.run_cycle().await?;
        println!(
            "Processed {} message(s): {} reassigned, {} skipped, {} failed, {} already done",
            report.fetched, report.reassigned, report.skipped, report.failed, report.deduplicated
        );
        return Ok(if report.failed == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(EXIT_DEPENDENCY)
        });
    }

    // Continuous mode refuses to start against dead dependencies.
    let initial = health::check_health(
        mailbox.as_ref(),
        predictor.as_ref(),
        tracker.as_ref(),
        config.probe_timeout,
    )
    .await;
    if !initial.overall {
        print_health(&initial);
        anyhow::bail!("initial health check failed");
    }

    tracing::info!(
        interval_secs = config.poll_interval.as_secs(),
        threshold = config.confidence_threshold,
        dry_run = config.dry_run,
        "Starting continuous monitoring"
    );

    let mut tick = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                // The cycle itself is never raced against the shutdown
                // signal — cancellation happens between cycles.
                if let Err(e) = pipeline.run_cycle().await {
                    tracing::error!(error = %e, "Cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received — stopping");
                break;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_health(report: &HealthReport) {
    let mark = |ok: bool| if ok { '✓' } else { '✗' };
    println!("{} imap", mark(report.imap));
    println!("{} prediction", mark(report.prediction));
    println!("{} tracker", mark(report.tracker));
    println!("{} overall", mark(report.overall));
}

/// Stdout logging, plus a non-blocking file layer when `ASSIGNBOT_LOG_FILE`
/// is set. The returned guard must stay alive for the file writer to flush.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = std::env::var("ASSIGNBOT_LOG_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file = path
                .file_name()
                .map(std::ffi::OsStr::to_os_string)
                .unwrap_or_else(|| "assignbot.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}
