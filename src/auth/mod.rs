//! Token-based authentication with role-based access control.
//!
//! Access tokens travel as bearer tokens and are checked statelessly.
//! Refresh tokens travel in a signed, HttpOnly cookie and are checked against
//! the refresh token store by the session manager.

mod cookie;
mod extractors;
mod state;

pub use cookie::{REFRESH_COOKIE_NAME, RefreshCookie, get_cookie};
pub use extractors::{
    AccessGate, AdminOnly, AnyRole, Auth, RoleConstraint, authorize, bearer_token, require_role,
};
pub use state::HasAuthBackend;
