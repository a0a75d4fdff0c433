pub mod connect;
pub mod login;
pub mod logout;
pub mod permissions;
pub mod status;
pub mod watch;

// Internal "interpreter" for `Action`.
mod run;

#[derive(Debug)]
pub enum Action {
    Login(login::Args),
    Logout(connect::Args),
    Status(connect::Args),
    Permissions(permissions::Args),
    Watch(connect::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
