//! Role-derived authorization: permission sets and landing routes.

pub mod permissions;
pub mod redirect;
pub mod role;

pub use self::permissions::{Permission, PermissionRegistry, PermissionSet, UnknownPermission};
pub use self::redirect::{LogNavigator, Navigator, RedirectResolver, landing_path};
pub use self::role::{Role, UnknownRole};
