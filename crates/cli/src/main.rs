use crate::{
    commands::{CheckpointCommand, Commands},
    conn::{ConnectionPinger, DatabasePinger},
    env::EnvManager,
    error::CliError,
    job::JobFile,
    shutdown::{ExitCode, SignalGuard},
};
use clap::Parser;
use connectors::{SpecConnectionFactory, connect};
use engine_core::{
    progress::{ProgressCallback, ProgressSnapshot},
    state::SessionStore,
    stop::TokenStopSignal,
};
use engine_runtime::routine::{JobRoutine, MapperJob};
use model::execution::session::SessionParams;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod conn;
mod env;
mod error;
mod job;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "mapper", version = "0.1.0", about = "Incremental SCD mapping runner")]
struct Cli {
    #[arg(long, global = true, help = "Additional .env file used to expand ${VAR} references")]
    env_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::Failure
        }
    };
    std::process::exit(code.as_i32());
}

async fn execute(cli: Cli) -> Result<ExitCode, CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = &cli.env_file {
        env.load_from_file(path)?;
    }

    match cli.command {
        Commands::Run {
            job,
            process_id,
            session_id,
            checkpoint,
            json,
        } => {
            let file = JobFile::load(&job, &env).await?;
            let session_id = session_id.unwrap_or_else(epoch_seconds);
            let params = SessionParams::new(process_id, session_id).with_checkpoint(checkpoint);
            run_job(file, params, json).await
        }
        Commands::Checkpoint { command } => {
            match command {
                CheckpointCommand::Show { job } => {
                    let file = JobFile::load(&job, &env).await?;
                    let store = file.open_store().await?;
                    let value = store.load_checkpoint(&file.job.mapref).await?;
                    output::print_checkpoint(&file.job.mapref, value.as_deref());
                }
                CheckpointCommand::Reset { job } => {
                    let file = JobFile::load(&job, &env).await?;
                    let store = file.open_store().await?;
                    store.reset_checkpoint(&file.job.mapref).await?;
                    info!(mapref = %file.job.mapref, "Checkpoint reset");
                }
            }
            Ok(ExitCode::Success)
        }
        Commands::Stop { job, clear } => {
            let file = JobFile::load(&job, &env).await?;
            let store = file.open_store().await?;
            store.request_stop(&file.job.mapref, !clear).await?;
            if clear {
                info!(mapref = %file.job.mapref, "Stop request cleared");
            } else {
                info!(mapref = %file.job.mapref, "Stop requested");
            }
            Ok(ExitCode::Success)
        }
        Commands::TestConn { kind, url } => {
            DatabasePinger::new(&kind, &env.expand(&url)?)?.ping().await?;
            Ok(ExitCode::Success)
        }
    }
}

async fn run_job(file: JobFile, params: SessionParams, as_json: bool) -> Result<ExitCode, CliError> {
    let store = file.open_store().await?;
    let source = connect(&file.source).await?;
    let target = connect(&file.target).await?;

    let signals = SignalGuard::install();

    let routine = MapperJob::new(file.job, file.checkpoint)
        .with_factory(Arc::new(SpecConnectionFactory::new(file.source, file.target)))
        .with_stop_signal(Arc::new(TokenStopSignal::new(signals.token())))
        .with_progress(progress_logger());

    let outcome = routine.run(store, source, target, params).await;
    if signals.interrupted() {
        info!(status = %outcome.status, "Run interrupted by signal");
    }
    output::print_outcome(&outcome, as_json)?;

    Ok(ExitCode::from(outcome.status))
}

fn progress_logger() -> ProgressCallback {
    Arc::new(|snapshot: &ProgressSnapshot| {
        info!(
            chunks_done = snapshot.chunks_finished(),
            chunks_total = snapshot.chunks_total,
            rows = snapshot.rows_processed,
            failed = snapshot.rows_failed,
            eta_secs = snapshot.estimated_remaining.map(|d| d.as_secs()),
            "Progress"
        );
        Ok(())
    })
}

fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
