use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one session of a mapping job
    Run {
        #[arg(long, help = "Job file path (JSON)")]
        job: String,

        #[arg(long, help = "Process id recorded with the run", default_value_t = 1)]
        process_id: i64,

        #[arg(long, help = "Session id recorded with the run; defaults to the current epoch seconds")]
        session_id: Option<i64>,

        #[arg(
            long,
            help = "Checkpoint to resume from, overriding the value stored in the metadata store"
        )]
        checkpoint: Option<String>,

        #[arg(long, help = "If set, prints the run outcome as JSON")]
        json: bool,
    },
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
    /// Request (or clear) a cooperative stop of a running mapping
    Stop {
        #[arg(long, help = "Job file path (JSON)")]
        job: String,

        #[arg(long, help = "Clears a pending stop request instead of raising one")]
        clear: bool,
    },
    /// Test a connection URL for a given database kind
    TestConn {
        /// Database kind: "postgres", "mysql", "sqlite"
        #[arg(long)]
        kind: String,

        /// Connection URL
        #[arg(long)]
        url: String,
    },
}

#[derive(Subcommand)]
pub enum CheckpointCommand {
    /// Print the stored checkpoint of the job's mapping
    Show {
        #[arg(long, help = "Job file path (JSON)")]
        job: String,
    },
    /// Forget the stored checkpoint so the next run starts from scratch
    Reset {
        #[arg(long, help = "Job file path (JSON)")]
        job: String,
    },
}
