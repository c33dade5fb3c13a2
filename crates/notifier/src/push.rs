//! Push delivery through Firebase Cloud Messaging (HTTP v1 API).
//!
//! Authentication uses the service-account flow: a short-lived RS256
//! assertion is exchanged for an OAuth2 access token, which is cached until
//! shortly before it expires.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use webglow_common::types::PushMessage;

use crate::error::NotifierError;

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const FCM_ENDPOINT: &str = "https://fcm.googleapis.com/v1/projects";

/// Access tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Icon and badge shown by the web client's service worker.
const NOTIFICATION_ICON: &str = "/logo-192.png";

/// Sends a single push notification, returning the provider's message id.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<String, NotifierError>;
}

/// Service-account credentials for the Firebase project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseCredentials {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

#[derive(Deserialize)]
struct ServiceAccountJson {
    project_id: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
}

impl FirebaseCredentials {
    /// Load credentials from the environment.
    ///
    /// Individual `FIREBASE_PROJECT_ID` / `FIREBASE_CLIENT_EMAIL` /
    /// `FIREBASE_PRIVATE_KEY` variables take precedence; otherwise the
    /// `FIREBASE_SERVICE_ACCOUNT` JSON blob is used. Returns `None` when
    /// neither source is complete, which disables push delivery.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut project_id = lookup("FIREBASE_PROJECT_ID");
        let mut client_email = lookup("FIREBASE_CLIENT_EMAIL");
        let mut private_key = lookup("FIREBASE_PRIVATE_KEY");

        if project_id.is_none() || client_email.is_none() || private_key.is_none() {
            if let Some(raw) = lookup("FIREBASE_SERVICE_ACCOUNT") {
                match serde_json::from_str::<ServiceAccountJson>(&raw) {
                    Ok(account) => {
                        project_id = account.project_id;
                        client_email = account.client_email;
                        private_key = account.private_key;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to parse FIREBASE_SERVICE_ACCOUNT JSON");
                    }
                }
            }
        }

        let project_id = project_id.filter(|v| !v.is_empty())?;
        let client_email = client_email.filter(|v| !v.is_empty())?;
        let private_key = private_key.filter(|v| !v.is_empty())?;

        Some(Self {
            project_id,
            client_email,
            private_key: private_key.replace("\\n", "\n"),
        })
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// `PushSender` for the FCM HTTP v1 API.
pub struct FcmSender {
    http: reqwest::Client,
    credentials: FirebaseCredentials,
    encoding_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl FcmSender {
    pub fn new(credentials: FirebaseCredentials, timeout: Duration) -> Result<Self, NotifierError> {
        let encoding_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| NotifierError::Auth(format!("Invalid service account key: {}", e)))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        tracing::info!(
            project_id = %credentials.project_id,
            "Firebase Cloud Messaging sender initialized"
        );

        Ok(Self {
            http,
            credentials,
            encoding_key,
            token: Mutex::new(None),
        })
    }

    /// Return a valid access token, refreshing it if needed.
    async fn access_token(&self) -> Result<String, NotifierError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref()
            && token.expires_at > now
        {
            return Ok(token.access_token.clone());
        }

        let claims = AssertionClaims {
            iss: &self.credentials.client_email,
            scope: FCM_SCOPE,
            aud: TOKEN_URI,
            iat: now.timestamp(),
            exp: now.timestamp() + 3600,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| NotifierError::Auth(format!("Failed to sign assertion: {}", e)))?;

        let response = self
            .http
            .post(TOKEN_URI)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Auth(format!(
                "Token exchange returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let expires_at =
            now + chrono::Duration::seconds(token.expires_in - TOKEN_REFRESH_MARGIN_SECS);
        tracing::debug!(expires_at = %expires_at, "Refreshed FCM access token");

        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }
}

/// Build the FCM v1 request body for a push message.
pub fn fcm_request_body(message: &PushMessage) -> serde_json::Value {
    json!({
        "message": {
            "token": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": {
                "conversationId": message.data.conversation_id.to_string(),
                "senderId": message.data.sender_id.to_string(),
            },
            "webpush": {
                "headers": { "Urgency": "high" },
                "notification": {
                    "icon": NOTIFICATION_ICON,
                    "badge": NOTIFICATION_ICON,
                    "tag": message.data.conversation_id.to_string(),
                },
            },
        }
    })
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(&self, message: &PushMessage) -> Result<String, NotifierError> {
        let access_token = self.access_token().await?;
        let url = format!(
            "{}/{}/messages:send",
            FCM_ENDPOINT, self.credentials.project_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&fcm_request_body(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Force re-authentication on the next send.
            if status == reqwest::StatusCode::UNAUTHORIZED {
                *self.token.lock().await = None;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Push(format!("FCM returned {}: {}", status, body)));
        }

        let sent: SendResponse = response.json().await?;
        Ok(sent.name)
    }
}
