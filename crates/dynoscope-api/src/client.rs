use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use dynoscope_types::{AddOn, AddOnState, App, Dyno, DynoState, Formation};

use crate::error::{ApiError, ApiResult};
use crate::token::TokenProvider;

/// Raw bytes from a live log stream
pub type ByteStream = BoxStream<'static, ApiResult<Vec<u8>>>;

/// Options for creating a log stream session
#[derive(Clone, Debug, Serialize)]
pub struct LogSessionRequest {
    /// Number of history lines to replay before live tailing
    pub lines: usize,
    /// Keep the stream open for new lines
    pub tail: bool,
}

impl Default for LogSessionRequest {
    fn default() -> Self {
        Self {
            lines: 100,
            tail: true,
        }
    }
}

/// Short-lived descriptor for one log stream session
#[derive(Clone, Debug, Deserialize)]
pub struct LogSessionDescriptor {
    /// Stream URL; connect promptly, the descriptor expires
    #[serde(rename = "logplex_url")]
    pub url: String,
}

/// Authenticated resource client boundary.
///
/// Every operation takes a cancellation token and resolves to
/// `ApiError::Cancelled` if the token fires before the request completes.
/// No operation retries; retry policy belongs to the sync engine.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn get_app(&self, name: &str, cancel: &CancellationToken) -> ApiResult<App>;

    async fn list_dynos(&self, app: &str, cancel: &CancellationToken) -> ApiResult<Vec<Dyno>>;

    async fn get_dyno(
        &self,
        app: &str,
        dyno: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Dyno>;

    async fn list_formations(
        &self,
        app: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Vec<Formation>>;

    async fn list_addons(&self, app: &str, cancel: &CancellationToken) -> ApiResult<Vec<AddOn>>;

    async fn create_log_session(
        &self,
        app: &str,
        request: &LogSessionRequest,
        cancel: &CancellationToken,
    ) -> ApiResult<LogSessionDescriptor>;

    /// Connect to a session descriptor's URL and return the raw byte stream
    async fn open_log_stream(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<ByteStream>;
}

/// HTTP implementation of [`PlatformApi`]
pub struct HttpPlatformApi {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpPlatformApi {
    /// Create a new client against the given API base URL.
    ///
    /// Only the connect phase is bounded; log streams stay open
    /// indefinitely, so no overall request timeout is set.
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let token = self.tokens.token().await?;
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("accept", "application/json")
            .send()
            .await?;

        let response = check_status(response, path).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let token = self.tokens.token().await?;
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("accept", "application/json")
            .json(body)
            .send()
            .await?;

        let response = check_status(response, path).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Map error statuses onto the failure taxonomy
async fn check_status(response: reqwest::Response, path: &str) -> ApiResult<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(ApiError::NotFound(path.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Status {
                code: status.as_u16(),
                body,
            })
        }
    }
}

/// Race a request against its cancellation token
async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = ApiResult<T>>,
) -> ApiResult<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        result = fut => result,
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn get_app(&self, name: &str, cancel: &CancellationToken) -> ApiResult<App> {
        let payload: AppPayload =
            with_cancel(cancel, self.get_json(&format!("/apps/{name}"))).await?;
        Ok(payload.into())
    }

    async fn list_dynos(&self, app: &str, cancel: &CancellationToken) -> ApiResult<Vec<Dyno>> {
        let payload: Vec<DynoPayload> =
            with_cancel(cancel, self.get_json(&format!("/apps/{app}/dynos"))).await?;
        Ok(payload.into_iter().map(Into::into).collect())
    }

    async fn get_dyno(
        &self,
        app: &str,
        dyno: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Dyno> {
        let payload: DynoPayload =
            with_cancel(cancel, self.get_json(&format!("/apps/{app}/dynos/{dyno}"))).await?;
        Ok(payload.into())
    }

    async fn list_formations(
        &self,
        app: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Vec<Formation>> {
        with_cancel(cancel, self.get_json(&format!("/apps/{app}/formation"))).await
    }

    async fn list_addons(&self, app: &str, cancel: &CancellationToken) -> ApiResult<Vec<AddOn>> {
        let payload: Vec<AddOnPayload> =
            with_cancel(cancel, self.get_json(&format!("/apps/{app}/addons"))).await?;
        Ok(payload.into_iter().map(Into::into).collect())
    }

    async fn create_log_session(
        &self,
        app: &str,
        request: &LogSessionRequest,
        cancel: &CancellationToken,
    ) -> ApiResult<LogSessionDescriptor> {
        with_cancel(
            cancel,
            self.post_json(&format!("/apps/{app}/log-sessions"), request),
        )
        .await
    }

    async fn open_log_stream(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<ByteStream> {
        let connect = async {
            let response = self.client.get(url).send().await?;
            let response = check_status(response, url).await?;
            Ok(response
                .bytes_stream()
                .map(|chunk| match chunk {
                    Ok(bytes) => Ok(bytes.to_vec()),
                    Err(e) => Err(ApiError::Transport(e)),
                })
                .boxed())
        };
        with_cancel(cancel, connect).await
    }
}

// ============================================================================
// Wire payloads
// ============================================================================

// The platform nests owners and reports states as free-form strings; these
// intermediate payloads absorb that so the shared types stay closed enums.

#[derive(Deserialize)]
struct NameRef {
    name: String,
}

#[derive(Deserialize)]
struct AppPayload {
    id: String,
    name: String,
    #[serde(default)]
    organization: Option<NameRef>,
    #[serde(default)]
    team: Option<NameRef>,
}

impl From<AppPayload> for App {
    fn from(payload: AppPayload) -> Self {
        let mut app = App::new(payload.id, payload.name);
        app.organization = payload.organization.map(|o| o.name);
        app.team = payload.team.map(|t| t.name);
        app
    }
}

#[derive(Deserialize)]
struct DynoPayload {
    id: String,
    name: String,
    state: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<DynoPayload> for Dyno {
    fn from(payload: DynoPayload) -> Self {
        let mut dyno = Dyno::new(payload.id, payload.name, DynoState::from(payload.state.as_str()));
        dyno.size = payload.size;
        dyno.command = payload.command;
        dyno.updated_at = payload.updated_at;
        dyno
    }
}

#[derive(Deserialize)]
struct AddOnPayload {
    id: String,
    name: String,
    #[serde(default)]
    addon_service: Option<NameRef>,
    #[serde(default)]
    state: Option<String>,
}

impl From<AddOnPayload> for AddOn {
    fn from(payload: AddOnPayload) -> Self {
        let state = payload
            .state
            .as_deref()
            .map(AddOnState::from)
            .unwrap_or(AddOnState::Unknown);
        let mut addon = AddOn::new(payload.id, payload.name, state);
        addon.service = payload.addon_service.map(|s| s.name);
        addon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_payload_flattens_owner() {
        let payload: AppPayload = serde_json::from_str(
            r#"{"id":"a1","name":"demo","team":{"name":"platform"}}"#,
        )
        .unwrap();
        let app: App = payload.into();
        assert_eq!(app.team.as_deref(), Some("platform"));
        assert!(app.organization.is_none());
    }

    #[test]
    fn dyno_payload_maps_state() {
        let payload: DynoPayload = serde_json::from_str(
            r#"{"id":"d1","name":"web.1","state":"up","size":"Standard-1X"}"#,
        )
        .unwrap();
        let dyno: Dyno = payload.into();
        assert_eq!(dyno.state, DynoState::Up);
        assert_eq!(dyno.size.as_deref(), Some("Standard-1X"));
    }

    #[test]
    fn unknown_dyno_state_does_not_fail_decode() {
        let payload: DynoPayload =
            serde_json::from_str(r#"{"id":"d1","name":"web.1","state":"warming"}"#).unwrap();
        let dyno: Dyno = payload.into();
        assert_eq!(dyno.state, DynoState::Unknown);
    }

    #[test]
    fn log_session_descriptor_reads_stream_url() {
        let descriptor: LogSessionDescriptor =
            serde_json::from_str(r#"{"logplex_url":"https://logs.example.com/s/abc"}"#).unwrap();
        assert_eq!(descriptor.url, "https://logs.example.com/s/abc");
    }
}
