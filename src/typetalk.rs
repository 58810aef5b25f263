//! Typetalk API client.
//!
//! Authenticates with the client-credentials grant and keeps the access token
//! in memory, renewing it shortly before it expires.

use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{NowPlayingError, Result};

const TOKEN_URL: &str = "https://typetalk.com/oauth2/access_token";
const API_BASE_URL: &str = "https://typetalk.com/api/v1";
/// Scope needed to post messages and save the user status.
pub const DEFAULT_SCOPE: &str = "my topic.post";
/// Renew the access token when it expires within this many seconds.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 30;

/// Options for saving a user status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOptions {
    /// When the status clears itself; empty means never.
    pub clear_at: String,
    pub notification_disabled: bool,
}

/// The chat operations the notification handler relies on.
pub trait ChatApi: Send + Sync {
    /// Post `message` to a topic.
    fn post_message(&self, topic_id: u64, message: &str) -> impl Future<Output = Result<()>> + Send;

    /// Replace the user's status in `space_key`.
    fn save_user_status(
        &self,
        space_key: &str,
        emoji: &str,
        message: &str,
        options: &StatusOptions,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Client-credentials authenticated Typetalk client.
#[derive(Debug)]
pub struct TypetalkClient {
    http: Client,
    client_id: String,
    client_secret: String,
    scope: String,
    token_url: String,
    api_base_url: String,
    token: Mutex<Option<AccessToken>>,
}

impl TypetalkClient {
    /// Create a client for the public Typetalk endpoints.
    pub fn new(client_id: &str, client_secret: &str, scope: &str) -> Self {
        Self::with_endpoints(client_id, client_secret, scope, TOKEN_URL, API_BASE_URL)
    }

    /// Create a client talking to custom endpoints.
    pub fn with_endpoints(
        client_id: &str,
        client_secret: &str,
        scope: &str,
        token_url: &str,
        api_base_url: &str,
    ) -> Self {
        Self {
            http: Client::new(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: scope.to_string(),
            token_url: token_url.to_string(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    /// A usable access token, fetching a new one when needed.
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if Utc::now() + TimeDelta::seconds(TOKEN_EXPIRY_MARGIN_SECS) < current.expires_at {
                return Ok(current.value.clone());
            }
        }

        tracing::debug!("Requesting Typetalk access token");
        let fresh = self.request_token().await?;
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", self.scope.as_str()),
        ];

        let response = self.http.post(&self.token_url).form(&params).send().await?;
        let response = check_status(response, "Token request").await?;
        let body: TokenResponse = response.json().await?;

        let expires_at = TimeDelta::try_seconds(body.expires_in)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                NowPlayingError::Typetalk(format!("Token lifetime out of range: {}s", body.expires_in))
            })?;

        Ok(AccessToken {
            value: body.access_token,
            expires_at,
        })
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)], what: &str) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/{}", self.api_base_url, path))
            .bearer_auth(token)
            .form(form)
            .send()
            .await?;
        check_status(response, what).await?;
        Ok(())
    }
}

impl ChatApi for TypetalkClient {
    async fn post_message(&self, topic_id: u64, message: &str) -> Result<()> {
        self.post_form(
            &format!("topics/{topic_id}"),
            &[("message", message)],
            "Post message",
        )
        .await
    }

    async fn save_user_status(
        &self,
        space_key: &str,
        emoji: &str,
        message: &str,
        options: &StatusOptions,
    ) -> Result<()> {
        let notification_disabled = options.notification_disabled.to_string();
        self.post_form(
            &format!("spaces/{space_key}/userStatuses"),
            &[
                ("emoji", emoji),
                ("message", message),
                ("clearAt", options.clear_at.as_str()),
                ("isNotificationDisabled", notification_disabled.as_str()),
            ],
            "Save user status",
        )
        .await
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NowPlayingError::Typetalk(format!("{what} failed: {status} {body}")))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex as StdMutex},
    };

    use axum::{
        extract::{Form, Path, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};

    use super::*;

    #[derive(Default)]
    struct Recorded {
        token_requests: Vec<HashMap<String, String>>,
        calls: Vec<(String, String, HashMap<String, String>)>,
    }

    type Shared = Arc<StdMutex<Recorded>>;

    async fn token(
        State(rec): State<Shared>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<Value> {
        let expires_in = if form["client_id"] == "forever" { i64::MAX } else { 3600 };
        rec.lock().unwrap().token_requests.push(form);
        Json(json!({
            "access_token": "tt-token",
            "token_type": "Bearer",
            "expires_in": expires_in,
            "refresh_token": "unused"
        }))
    }

    async fn status(
        State(rec): State<Shared>,
        Path(space): Path<String>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        let auth = headers["authorization"].to_str().unwrap().to_string();
        rec.lock().unwrap().calls.push((format!("status:{space}"), auth, form));
        StatusCode::OK
    }

    async fn topic(
        State(rec): State<Shared>,
        Path(topic_id): Path<u64>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        if topic_id == 404 {
            return StatusCode::NOT_FOUND;
        }
        let auth = headers["authorization"].to_str().unwrap().to_string();
        rec.lock().unwrap().calls.push((format!("topic:{topic_id}"), auth, form));
        StatusCode::OK
    }

    async fn mock_server(client_id: &str) -> (TypetalkClient, Shared) {
        let rec = Shared::default();
        let app = Router::new()
            .route("/oauth2/access_token", post(token))
            .route("/api/v1/spaces/{space}/userStatuses", post(status))
            .route("/api/v1/topics/{topic_id}", post(topic))
            .with_state(rec.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = TypetalkClient::with_endpoints(
            client_id,
            "secret",
            DEFAULT_SCOPE,
            &format!("http://{addr}/oauth2/access_token"),
            &format!("http://{addr}/api/v1/"),
        );
        (client, rec)
    }

    #[tokio::test]
    async fn test_status_and_message_share_one_token() {
        let (client, rec) = mock_server("id").await;
        let options = StatusOptions {
            clear_at: String::new(),
            notification_disabled: true,
        };

        client
            .save_user_status("space", ":musical_note:", "Retarded/KID FRESINO", &options)
            .await
            .unwrap();
        client.post_message(42, "hello").await.unwrap();

        let rec = rec.lock().unwrap();
        assert_eq!(rec.token_requests.len(), 1);
        let token_form = &rec.token_requests[0];
        assert_eq!(token_form["grant_type"], "client_credentials");
        assert_eq!(token_form["scope"], "my topic.post");
        assert_eq!(token_form["client_id"], "id");

        let (route, auth, form) = &rec.calls[0];
        assert_eq!(route, "status:space");
        assert_eq!(auth, "Bearer tt-token");
        assert_eq!(form["emoji"], ":musical_note:");
        assert_eq!(form["message"], "Retarded/KID FRESINO");
        assert_eq!(form["clearAt"], "");
        assert_eq!(form["isNotificationDisabled"], "true");

        let (route, auth, form) = &rec.calls[1];
        assert_eq!(route, "topic:42");
        assert_eq!(auth, "Bearer tt-token");
        assert_eq!(form["message"], "hello");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let (client, _rec) = mock_server("id").await;
        let err = client.post_message(404, "hello").await.unwrap_err();
        assert!(matches!(err, NowPlayingError::Typetalk(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_token_lifetime_is_an_error() {
        let (client, rec) = mock_server("forever").await;
        let err = client.post_message(42, "hello").await.unwrap_err();

        assert!(matches!(err, NowPlayingError::Typetalk(msg) if msg.contains("out of range")));
        assert!(rec.lock().unwrap().calls.is_empty());
    }
}
