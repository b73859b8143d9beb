use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cronwheel::{
    AllowMode, ExecMode, JobFilter, JobPatch, JobService, JobState, NewJob, Page, Settings,
    SqliteCatalog, STOP_TIMEOUT,
};

/// Durable single-node cron job scheduler.
#[derive(Parser)]
#[command(name = "cronwheel", version)]
struct Cli {
    /// Path of the SQLite job catalog
    #[arg(long, env = "CRONWHEEL_DB", default_value = "data/cronwheel.db", global = true)]
    db: PathBuf,

    /// Directory for execution logs
    #[arg(long, env = "CRONWHEEL_RUNTIME_DIR", default_value = "runtime", global = true)]
    runtime_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler (default when no subcommand is given)
    Serve,
    /// Manage jobs in the catalog
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// List the registered in-process functions
    Functions,
    /// Re-align the scheduler entries with the catalog
    Reconcile,
}

#[derive(Subcommand)]
enum JobAction {
    /// List jobs
    List,
    /// Show one job as JSON
    Get { id: i64 },
    /// Create a job
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        cron: String,
        /// command | http | function
        #[arg(long, default_value = "command", value_parser = parse_mode)]
        mode: ExecMode,
        /// Job body in the tag grammar (or the bare command line)
        #[arg(long)]
        command: String,
        #[arg(long, default_value = "")]
        desc: String,
        /// parallel | skip | queue
        #[arg(long, default_value = "parallel", value_parser = parse_allow_mode)]
        allow_mode: AllowMode,
        /// 0 means unbounded
        #[arg(long, default_value_t = 0)]
        max_runs: u64,
    },
    /// Update fields of a job; omitted flags are left unchanged
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        desc: Option<String>,
        #[arg(long)]
        cron: Option<String>,
        /// command | http | function
        #[arg(long, value_parser = parse_mode)]
        mode: Option<ExecMode>,
        /// Job body in the tag grammar (or the bare command line)
        #[arg(long)]
        command: Option<String>,
        /// parallel | skip | queue
        #[arg(long, value_parser = parse_allow_mode)]
        allow_mode: Option<AllowMode>,
        /// 0 means unbounded
        #[arg(long)]
        max_runs: Option<u64>,
    },
    /// Delete a job
    Remove { id: i64 },
    /// Re-enable a stopped job
    Enable { id: i64 },
    /// Disable a job without removing it
    Disable { id: i64 },
    /// Run a job once, outside its schedule
    Run { id: i64 },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let catalog = Arc::new(SqliteCatalog::open(&cli.db).unwrap_or_else(die));
    let service = JobService::new(catalog, Settings::default(), &cli.runtime_dir);

    match cli.command {
        None | Some(Command::Serve) => serve(service).await,
        Some(Command::Job { action }) => handle_job(service, action).await,
        Some(Command::Functions) => {
            for name in service.registry().list() {
                println!("{name}");
            }
        }
        Some(Command::Reconcile) => {
            let report = service.reconcile().await.unwrap_or_else(die);
            println!("Reconcile: {} added, {} removed.", report.added, report.removed);
        }
    }
}

async fn serve(service: JobService) {
    let loaded = service.load_enabled().await.unwrap_or_else(die);
    service.start();
    tracing::info!(jobs = loaded, "cronwheel serving");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping scheduler");
    service.stop(STOP_TIMEOUT).await;
}

/// Resolves when the process receives a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix both signals are handled so container orchestrators trigger a
/// clean stop. On non-Unix only Ctrl-C (SIGINT) is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c  => {}
        _ = sigterm => {}
    }
}

async fn handle_job(service: JobService, action: JobAction) {
    match action {
        JobAction::List => cmd_list(&service),
        JobAction::Get { id } => {
            let job = service.get_job(id).unwrap_or_else(die);
            println!("{}", serde_json::to_string_pretty(&job).unwrap());
        }
        JobAction::Add {
            name,
            cron,
            mode,
            command,
            desc,
            allow_mode,
            max_runs,
        } => {
            let job = service
                .create_job(NewJob {
                    name,
                    desc,
                    cron_expr: cron,
                    mode,
                    command,
                    state: JobState::Waiting,
                    allow_mode,
                    max_run_count: max_runs,
                })
                .await
                .unwrap_or_else(die);
            println!("Job {} created.", job.id);
        }
        JobAction::Update {
            id,
            name,
            desc,
            cron,
            mode,
            command,
            allow_mode,
            max_runs,
        } => {
            service
                .update_job(
                    id,
                    JobPatch {
                        name,
                        desc,
                        cron_expr: cron,
                        mode,
                        command,
                        allow_mode,
                        max_run_count: max_runs,
                        ..JobPatch::default()
                    },
                )
                .await
                .unwrap_or_else(die);
            println!("Job {id} updated.");
        }
        JobAction::Remove { id } => {
            service.delete_job(id).await.unwrap_or_else(die);
            println!("Job {id} removed.");
        }
        JobAction::Enable { id } => {
            service
                .set_job_state(id, JobState::Waiting)
                .await
                .unwrap_or_else(die);
            println!("Job {id} enabled.");
        }
        JobAction::Disable { id } => {
            service
                .set_job_state(id, JobState::Stopped)
                .await
                .unwrap_or_else(die);
            println!("Job {id} disabled.");
        }
        JobAction::Run { id } => {
            let run = service.run_manually(id).await.unwrap_or_else(die);
            if run.skipped {
                println!("Skipped: {}", run.reason.unwrap_or_default());
            } else {
                println!("Execution {} started.", run.exec_id.unwrap_or_default());
                // Wait for the one-shot execution to finish and flush its record.
                service.stop(STOP_TIMEOUT).await;
            }
        }
    }
}

fn cmd_list(service: &JobService) {
    let jobs = service
        .list_jobs(&JobFilter::default(), Page { offset: 0, limit: 200 })
        .unwrap_or_else(die);
    if jobs.is_empty() {
        println!("No jobs in the catalog.");
        return;
    }
    println!("{:<6} {:<24} {:<10} {:<8} {:<12} SCHEDULE", "ID", "NAME", "MODE", "STATE", "RUNS");
    println!("{}", "-".repeat(80));
    for job in jobs {
        let state = match job.state {
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Stopped => "stopped",
        };
        let runs = if job.max_run_count > 0 {
            format!("{}/{}", job.run_count, job.max_run_count)
        } else {
            job.run_count.to_string()
        };
        println!(
            "{:<6} {:<24} {:<10} {:<8} {:<12} {}",
            job.id, job.name, job.mode, state, runs, job.cron_expr
        );
    }
}

fn parse_mode(s: &str) -> Result<ExecMode, String> {
    s.parse()
}

fn parse_allow_mode(s: &str) -> Result<AllowMode, String> {
    s.parse()
}

fn die<T>(e: impl std::fmt::Display) -> T {
    eprintln!("Error: {e}");
    std::process::exit(1);
}
