//! Session-aware HTTP client for the API.
//!
//! Holds the access token in an injected [`SessionContext`] and the refresh
//! cookie in the HTTP client's cookie jar. A request rejected with 401 is
//! retried once after a refresh; if the refresh fails the session is cleared
//! and the logout hook fires.

mod api;
mod session;

pub use api::{ApiClient, ClientError, LogoutHook, REFRESH_PATH};
pub use session::{Session, SessionContext};
