use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::{Session, SessionContext};
use crate::API_PREFIX;

/// Path of the refresh endpoint, relative to the API prefix. Never retried.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Called once when a refresh fails and the session is dropped.
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug)]
pub enum ClientError {
    /// Transport failure or undecodable response body
    Http(reqwest::Error),
    /// Request body could not be serialized
    Json(serde_json::Error),
    /// The server answered with a non-success status
    Status { status: StatusCode, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(e) => e.status(),
            Self::Json(_) => None,
            Self::Status { status, .. } => Some(*status),
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "HTTP error: {}", e),
            Self::Json(e) => write!(f, "Invalid request body: {}", e),
            Self::Status { status, message } => write!(f, "{}: {}", status, message),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    device_id: String,
    session: SessionContext,
    on_logout: Option<LogoutHook>,
    /// Serializes refreshes so a burst of 401s triggers a single rotation
    refresh_lock: Arc<Mutex<()>>,
}

impl ApiClient {
    /// Create a client for the server at `server_url` (without the API prefix).
    pub fn new(
        server_url: &str,
        device_id: impl Into<String>,
        session: SessionContext,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: format!("{}{}", server_url.trim_end_matches('/'), API_PREFIX),
            device_id: device_id.into(),
            session,
            on_logout: None,
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Set the hook fired when the session is lost (e.g. navigate to login).
    pub fn with_logout_hook(mut self, hook: LogoutHook) -> Self {
        self.on_logout = Some(hook);
        self
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Response, reqwest::Error> {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await
    }

    /// Send a request with the current access token. On a first 401 from
    /// anything but the refresh endpoint, refresh and replay exactly once.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ClientError> {
        let token = self.session.token();
        let response = self.dispatch(&method, path, body, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || path == REFRESH_PATH {
            return Ok(response);
        }

        debug!(path = %path, "Access token rejected, refreshing");
        if !self.refresh_after_rejection(token.as_deref()).await {
            return Ok(response);
        }

        let token = self.session.token();
        Ok(self.dispatch(&method, path, body, token.as_deref()).await?)
    }

    /// Refresh once for a request rejected while holding `rejected`.
    /// Returns whether the request should be replayed.
    async fn refresh_after_rejection(&self, rejected: Option<&str>) -> bool {
        let _guard = self.refresh_lock.lock().await;

        let current = self.session.token();
        if current.as_deref() != rejected {
            // Another request refreshed (or lost the session) while we waited
            return current.is_some();
        }

        match Box::pin(self.refresh()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Session refresh failed, logging out");
                if let Some(hook) = &self.on_logout {
                    hook();
                }
                false
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or_default().to_string());
        Err(ClientError::Status { status, message })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.execute(Method::GET, path, None).await?;
        Self::read_json(response).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let body = serde_json::to_value(body)?;
        let response = self.execute(Method::POST, path, Some(&body)).await?;
        Self::read_json(response).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.execute(Method::DELETE, path, None).await?;
        Self::read_json(response).await
    }

    /// Log in on this client's device and store the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        let session: Session = self
            .post(
                "/auth/login",
                &Credentials {
                    username,
                    password,
                    device_id: Some(&self.device_id),
                },
            )
            .await?;
        info!(user_id = session.user_id, "Logged in");
        self.session.set(session.clone());
        Ok(session)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let _: Value = self
            .post(
                "/auth/register",
                &Credentials {
                    username,
                    password,
                    device_id: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Rotate the refresh cookie and store the new session. Clears the
    /// session on failure.
    pub async fn refresh(&self) -> Result<Session, ClientError> {
        let result: Result<Session, ClientError> = self
            .post(REFRESH_PATH, &json!({ "deviceId": self.device_id }))
            .await;

        match result {
            Ok(session) => {
                self.session.set(session.clone());
                Ok(session)
            }
            Err(e) => {
                self.session.clear();
                Err(e)
            }
        }
    }

    /// Check that the current access token is accepted.
    pub async fn verify(&self) -> Result<(), ClientError> {
        let _: Value = self.get("/auth/protected").await?;
        Ok(())
    }

    /// Log out this device. The local session is cleared even if the request fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result: Result<Value, ClientError> = self
            .post("/auth/logout", &json!({ "deviceId": self.device_id }))
            .await;
        self.session.clear();
        result.map(|_| ())
    }
}
