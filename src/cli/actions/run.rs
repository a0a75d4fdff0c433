use crate::cli::{
    actions::{Action, login, logout, permissions, status, watch},
    telemetry,
};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    let result = match action {
        Action::Login(args) => login::execute(args).await,
        Action::Logout(args) => logout::execute(args).await,
        Action::Status(args) => status::execute(args).await,
        Action::Permissions(args) => permissions::execute(&args),
        Action::Watch(args) => watch::execute(args).await,
    };

    telemetry::shutdown_tracer();
    result
}
