use crate::cli::actions::connect;
use anyhow::Result;

/// # Errors
/// Returns an error if the session manager can't be started.
pub async fn execute(args: connect::Args) -> Result<()> {
    let handle = args.spawn()?;
    handle.initialize().await?;
    handle.logout().await?;
    println!("Signed out");
    handle.shutdown().await?;
    Ok(())
}
