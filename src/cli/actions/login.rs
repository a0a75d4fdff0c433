use crate::{authz::landing_path, cli::actions::connect};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub connect: connect::Args,
    pub identifier: String,
    pub password: Option<SecretString>,
}

async fn read_password() -> Result<SecretString> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read password from stdin")?;
    Ok(SecretString::from(
        line.trim_end_matches(['\r', '\n']).to_string(),
    ))
}

/// # Errors
/// Returns the user-facing login failure, or an error if the session manager
/// can't be started.
pub async fn execute(args: Args) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => read_password().await?,
    };

    let handle = args.connect.spawn()?;
    handle.initialize().await?;

    let result = handle.login(&args.identifier, password).await;
    handle.shutdown().await?;

    let session = result.map_err(|err| {
        debug!("login failed: {err}");
        anyhow!(err.user_message())
    })?;
    println!(
        "Signed in as {} ({})",
        session.display_name(),
        session.role()
    );
    println!("Landing page: {}", landing_path(session.role()));
    Ok(())
}
