//! PostgREST route store
//!
//! Talks to a Supabase-style REST endpoint:
//!
//! - `POST /rest/v1/routes` with `Prefer: resolution=merge-duplicates`
//! - `POST /rest/v1/route_points` with `Prefer: resolution=ignore-duplicates`
//! - `DELETE /rest/v1/routes?id=eq.<id>`
//!
//! Status codes are folded into [`SyncError`]: 401/403 are `Auth`, 409 or a
//! PostgREST `23505` body are `Conflict`, 400/422 are `Validation`,
//! 408/429/5xx and transport failures are `Network`.

use super::{PointRow, RemoteRouteStore, RouteHeader};
use crate::shared::config::RemoteConfig;
use crate::shared::route::RoutePoint;
use crate::shared::SyncError;
use futures_util::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// PostgREST code for unique violations
const UNIQUE_VIOLATION: &str = "23505";

/// Supplies the bearer token for remote calls
pub trait SessionProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    /// Renew the session; true if a fresh token is now available
    fn refresh(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { false })
    }
}

/// A fixed token that cannot be refreshed
#[derive(Debug, Default)]
pub struct StaticSession {
    token: RwLock<Option<String>>,
}

impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

impl SessionProvider for StaticSession {
    fn access_token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

/// HTTP implementation of [`RemoteRouteStore`]
pub struct RestRouteStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    session: Arc<dyn SessionProvider>,
}

impl std::fmt::Debug for RestRouteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRouteStore")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RestRouteStore {
    /// Build a store using the token from the configuration
    pub fn new(config: &RemoteConfig) -> Result<Self, SyncError> {
        let session = Arc::new(StaticSession::new(config.access_token.clone()));
        Self::with_session(config, session)
    }

    pub fn with_session(config: &RemoteConfig, session: Arc<dyn SessionProvider>) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.call_timeout_secs.max(1)))
            .build()
            .map_err(|e| SyncError::validation("HTTP_CLIENT", format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            session,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        if let Some(token) = self.session.access_token().or_else(|| self.api_key.clone()) {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SyncError> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }

    async fn upsert(&self, header: &RouteHeader) -> Result<String, SyncError> {
        let request = self
            .request(Method::POST, "/rest/v1/routes?on_conflict=id")
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(header);
        let response = self.send(request).await?;

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| SyncError::network("BAD_RESPONSE", format!("unreadable upsert response: {}", e)))?;

        let remote_id = rows
            .first()
            .and_then(|row| row.get("id"))
            .map(|id| match id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| header.id.clone());

        tracing::debug!("Upserted route {} as {}", header.id, remote_id);
        Ok(remote_id)
    }

    async fn insert(&self, remote_id: &str, points: &[RoutePoint]) -> Result<(), SyncError> {
        let rows: Vec<PointRow> = points.iter().map(|p| PointRow::new(remote_id, p)).collect();
        let request = self
            .request(Method::POST, "/rest/v1/route_points?on_conflict=route_id,sequence_number")
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&rows);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<(), SyncError> {
        let request = self
            .request(Method::DELETE, &format!("/rest/v1/routes?id=eq.{}", remote_id))
            .header("Prefer", "return=minimal");
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(SyncError::Validation { code, .. }) if code == "HTTP_404" => {
                tracing::debug!("Remote route {} already gone", remote_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl RemoteRouteStore for RestRouteStore {
    fn upsert_route<'a>(&'a self, header: &'a RouteHeader) -> BoxFuture<'a, Result<String, SyncError>> {
        Box::pin(self.upsert(header))
    }

    fn insert_points<'a>(
        &'a self,
        remote_id: &'a str,
        points: &'a [RoutePoint],
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(self.insert(remote_id, points))
    }

    fn delete_route<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(self.delete(remote_id))
    }

    fn refresh_session(&self) -> BoxFuture<'_, bool> {
        self.session.refresh()
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::network("TIMEOUT", err.to_string())
    } else if err.is_connect() {
        SyncError::network("UNREACHABLE", err.to_string())
    } else {
        SyncError::network("TRANSPORT", err.to_string())
    }
}

/// Map a non-success response onto the error taxonomy
pub(crate) fn classify_response(status: StatusCode, body: &str) -> SyncError {
    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            }
        });
    let code = format!("HTTP_{}", status.as_u16());

    if parsed.code.as_deref() == Some(UNIQUE_VIOLATION) {
        return SyncError::conflict(UNIQUE_VIOLATION, message);
    }

    match status.as_u16() {
        401 | 403 => SyncError::auth(code, message),
        409 => SyncError::conflict(code, message),
        408 | 429 => SyncError::network(code, message),
        500..=599 => SyncError::network(code, message),
        _ => SyncError::validation(code, message),
    }
}
