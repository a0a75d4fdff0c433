use crate::cli::actions::{connect, status::describe};
use anyhow::{Context, Result};
use tracing::{debug, info};

/// Print every published snapshot until Ctrl-C.
/// # Errors
/// Returns an error if the session manager can't be started.
pub async fn execute(args: connect::Args) -> Result<()> {
    let handle = args.spawn()?;
    let mut snapshots = handle.watch();
    handle.initialize().await?;

    println!("{}", describe(&snapshots.borrow_and_update()));
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", describe(&snapshots.borrow_and_update()));
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("interrupted");
                break;
            }
        }
    }

    // The manager may already be gone if the channel closed.
    if let Err(err) = handle.shutdown().await {
        debug!("session manager already stopped: {err}");
    }
    Ok(())
}
