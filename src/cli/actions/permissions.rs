use crate::authz::{PermissionRegistry, Role, landing_path};
use anyhow::Result;
use serde_json::json;

#[derive(Debug)]
pub struct Args {
    pub role: Role,
}

/// Print the role's permission map and landing page.
/// # Errors
/// Returns an error if the output can't be serialized.
pub fn execute(args: &Args) -> Result<()> {
    let output = json!({
        "role": args.role,
        "landing_path": landing_path(args.role),
        "permissions": PermissionRegistry::permissions(args.role),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
