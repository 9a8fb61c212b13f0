use attendance_sync_lib::{cli::parse_args, commands};

use dotenv::dotenv;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels the run when SIGTERM or SIGINT arrives; in-flight work finishes its current unit.
async fn handle_shutdown_signals(cancel: CancellationToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                error!(
                    event = "signal_handler_failed",
                    error = %err,
                    "could not register shutdown signal handlers"
                );
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!(event = "shutdown_signal", signal = "SIGTERM", "SIGTERM received, finishing current step.");
        }
        _ = sigint.recv() => {
            info!(event = "shutdown_signal", signal = "SIGINT", "SIGINT received, finishing current step.");
        }
    }

    cancel.cancel();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenv().ok();
    // Older deployments keep their settings in `e.env`.
    dotenv::from_filename("e.env").ok();

    let args = parse_args();
    let cancel = CancellationToken::new();
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(cancel.clone()));

    let code = commands::run(args, cancel).await;

    shutdown_handle.abort();
    std::process::exit(code);
}
