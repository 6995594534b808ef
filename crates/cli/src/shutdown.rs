use model::execution::result::JobStatus;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Turns SIGINT/SIGTERM into a cooperative stop. The running mapper sees
/// the cancelled token at its next batch boundary and commits what it has.
pub struct SignalGuard {
    token: CancellationToken,
    received: Arc<AtomicBool>,
}

impl SignalGuard {
    pub fn install() -> Self {
        let guard = SignalGuard {
            token: CancellationToken::new(),
            received: Arc::new(AtomicBool::new(false)),
        };

        let token = guard.token.clone();
        let received = guard.received.clone();
        tokio::spawn(async move {
            let name = wait_for_signal().await;
            info!(signal = name, "Stop requested, finishing the current batch");
            received.store(true, Ordering::SeqCst);
            token.cancel();
        });

        guard
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn interrupted(&self) -> bool {
        self.received.load(Ordering::SeqCst)
    }
}

async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    Interrupted = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<JobStatus> for ExitCode {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Success => ExitCode::Success,
            JobStatus::Stopped => ExitCode::Interrupted,
            JobStatus::Error => ExitCode::Failure,
        }
    }
}
