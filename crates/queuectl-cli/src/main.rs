use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use queuectl_core::app::{LifecycleEngine, QueueService, ShutdownHandle, WorkerGroup};
use queuectl_core::domain::{EnqueueRequest, JobId, JobState};
use queuectl_core::impls::{ShellRunner, SqliteJobStore};
use queuectl_core::ports::SystemClock;

mod output;

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(version)]
#[command(about = "Background job queue with retries and a dead letter queue")]
#[command(propagate_version = true)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "QUEUECTL_DB", default_value = "queuectl.db")]
    db: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a job, e.g. '{"id":"job1","command":"echo hello"}'
    Enqueue {
        /// Job JSON with "id", "command" and optional "max_retries"
        job_json: String,
    },

    /// List jobs, oldest first
    List {
        /// Only jobs in this state (pending|processing|completed|failed|dead)
        #[arg(long)]
        state: Option<JobState>,

        #[arg(long)]
        json: bool,
    },

    /// Job counts per state and live workers
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Run or stop workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Dead letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Runtime configuration stored in the database
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCommands {
    /// Process jobs until Ctrl-C, SIGTERM or `worker stop`
    Start {
        /// Number of concurrent workers
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Override the poll_interval_ms setting
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Override the stale_after_secs setting (0 disables reclaim)
        #[arg(long)]
        stale_after_secs: Option<u64>,
    },

    /// Ask every running worker to finish its current job and exit
    Stop,
}

#[derive(Subcommand, Debug)]
enum DlqCommands {
    /// Jobs that exhausted their retries
    List {
        #[arg(long)]
        json: bool,
    },

    /// Move a dead job back to pending with a fresh retry budget
    Retry { job_id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG > --log-level > info. Logs go to stderr; stdout is for command output.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let store = SqliteJobStore::open(&cli.db)
        .await
        .with_context(|| format!("failed to open {}", cli.db.display()))?;
    let store = Arc::new(store);
    let service = QueueService::new(store.clone(), Arc::new(SystemClock));

    match cli.command {
        Commands::Enqueue { job_json } => {
            let request = EnqueueRequest::from_json(&job_json)?;
            let job = service.enqueue(request).await?;
            println!("Enqueued job: {}", job.id);
        }
        Commands::List { state, json } => {
            let jobs = service.list(state).await?;
            if json {
                output::print_json(&jobs)?;
            } else {
                output::print_jobs(&jobs, "No jobs.");
            }
        }
        Commands::Status { json } => {
            let report = service.status().await?;
            if json {
                output::print_json(&report)?;
            } else {
                output::print_status(&report);
            }
        }
        Commands::Worker { command } => match command {
            WorkerCommands::Start {
                count,
                poll_interval_ms,
                stale_after_secs,
            } => {
                if count == 0 {
                    bail!("--count must be at least 1");
                }
                let mut settings = service.worker_settings().await?;
                if let Some(ms) = poll_interval_ms {
                    settings.poll_interval = Duration::from_millis(ms.max(1));
                }
                if let Some(secs) = stale_after_secs {
                    settings.stale_after = Duration::from_secs(secs);
                }

                let engine = Arc::new(LifecycleEngine::new(
                    store,
                    Arc::new(ShellRunner::new()),
                    Arc::new(SystemClock),
                ));
                let group = WorkerGroup::spawn(count, engine, settings)
                    .await
                    .context("failed to start workers")?;
                println!("Started {count} worker(s). Press Ctrl-C to stop.");

                spawn_signal_handler(group.shutdown_handle());
                group.join().await;
                println!("Workers stopped.");
            }
            WorkerCommands::Stop => {
                let flagged = service.stop_workers().await?;
                if flagged == 0 {
                    println!("No running workers.");
                } else {
                    println!("Stop requested for {flagged} worker(s).");
                }
            }
        },
        Commands::Dlq { command } => match command {
            DlqCommands::List { json } => {
                let jobs = service.dlq_list().await?;
                if json {
                    output::print_json(&jobs)?;
                } else {
                    output::print_jobs(&jobs, "No jobs in DLQ.");
                }
            }
            DlqCommands::Retry { job_id } => {
                let id = JobId::new(job_id);
                service.dlq_retry(&id).await?;
                println!("Retried DLQ job: {id}");
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => {
                service.config_set(&key, &value).await?;
                println!("Config set: {key} = {value}");
            }
            ConfigCommands::Get { key } => match service.config_get(&key).await? {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} not set"),
            },
        },
    }

    Ok(())
}

/// Trigger `handle` on SIGINT or SIGTERM.
fn spawn_signal_handler(handle: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        handle.request_shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "failed to install signal handlers; using ctrl-c");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, finishing in-flight jobs"),
        _ = sigint.recv() => tracing::info!("received SIGINT, finishing in-flight jobs"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received ctrl-c, finishing in-flight jobs"),
        Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_worker_start_flags() {
        let cli = Cli::try_parse_from([
            "queuectl",
            "--db",
            "/tmp/q.db",
            "worker",
            "start",
            "--count",
            "3",
            "--stale-after-secs",
            "0",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/q.db"));
        match cli.command {
            Commands::Worker {
                command:
                    WorkerCommands::Start {
                        count,
                        stale_after_secs,
                        poll_interval_ms,
                    },
            } => {
                assert_eq!(count, 3);
                assert_eq!(stale_after_secs, Some(0));
                assert_eq!(poll_interval_ms, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_state_is_parsed_into_job_state() {
        let cli = Cli::try_parse_from(["queuectl", "list", "--state", "dead"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                state: Some(JobState::Dead),
                json: false
            }
        ));
        assert!(Cli::try_parse_from(["queuectl", "list", "--state", "zombie"]).is_err());
    }
}
