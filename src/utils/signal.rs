//! Termination signals for long-running commands

use tracing::{debug, warn};

/// Resolve when SIGINT or SIGTERM arrives.
///
/// Unlike an exit-on-signal handler this lets the caller finish the current
/// sweep and flush its state before returning.
pub async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Falling back to ctrl-c only.", e);
				let _ = tokio::signal::ctrl_c().await;
				return;
			}
		};

		tokio::select! {
			_ = sigterm.recv() => debug!("Received SIGTERM, shutting down"),
			_ = tokio::signal::ctrl_c() => debug!("Received SIGINT, shutting down"),
		}
	}

	#[cfg(not(unix))]
	{
		if let Err(e) = tokio::signal::ctrl_c().await {
			warn!("Failed to listen for ctrl-c: {}", e);
		}
		debug!("Received ctrl-c, shutting down");
	}
}

// vim: ts=4
