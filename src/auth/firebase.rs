// src/auth/firebase.rs
//! Identity Toolkit REST adapter
//! Talks to the hosted identity service over HTTPS and translates its error strings to `auth/...` codes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use super::{AuthError, IdentityProvider};
use crate::config::AppConfig;
use crate::models::{AuthMetadata, AuthUser, ProfileUpdate};

const DEFAULT_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    #[serde(default)]
    email_verified: bool,
    phone_number: Option<String>,
    /// Milliseconds since the epoch, as a string
    created_at: Option<String>,
    last_login_at: Option<String>,
    #[serde(default)]
    provider_user_info: Vec<ProviderInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderInfo {
    provider_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

impl LookupUser {
    fn into_auth_user(self) -> AuthUser {
        AuthUser {
            uid: self.local_id,
            email: self.email,
            display_name: self.display_name,
            photo_url: self.photo_url,
            email_verified: self.email_verified,
            phone_number: self.phone_number,
            provider_id: self
                .provider_user_info
                .into_iter()
                .next()
                .map(|p| p.provider_id)
                .unwrap_or_else(|| "firebase".to_string()),
            metadata: AuthMetadata {
                creation_time: self.created_at.as_deref().and_then(parse_millis),
                last_sign_in_time: self.last_login_at.as_deref().and_then(parse_millis),
            },
        }
    }
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>().ok().and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Translate an Identity Toolkit error message to the client SDK's code
pub fn code_for_rest_error(message: &str) -> &'static str {
    // "WEAK_PASSWORD : Password should be at least 6 characters"
    let key = message.split(" : ").next().unwrap_or(message).trim();
    if key.starts_with("API key not valid") {
        return "auth/invalid-api-key";
    }
    match key {
        "EMAIL_NOT_FOUND" => "auth/user-not-found",
        "INVALID_PASSWORD" => "auth/wrong-password",
        "INVALID_LOGIN_CREDENTIALS" | "INVALID_IDP_RESPONSE" => "auth/invalid-credential",
        "USER_DISABLED" => "auth/user-disabled",
        "EMAIL_EXISTS" => "auth/email-already-in-use",
        "WEAK_PASSWORD" => "auth/weak-password",
        "INVALID_EMAIL" | "MISSING_EMAIL" => "auth/invalid-email",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "auth/too-many-requests",
        "OPERATION_NOT_ALLOWED" | "PASSWORD_LOGIN_DISABLED" => "auth/operation-not-allowed",
        "INVALID_ID_TOKEN" => "auth/invalid-user-token",
        "TOKEN_EXPIRED" | "USER_NOT_FOUND" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => "auth/user-token-expired",
        "INVALID_TENANT_ID" | "TENANT_ID_MISMATCH" => "auth/invalid-tenant-id",
        "UNAUTHORIZED_DOMAIN" => "auth/unauthorized-domain",
        _ => "auth/internal-error",
    }
}

pub struct FirebaseRestProvider {
    client: Client,
    api_key: String,
    base_url: String,
    google_id_token: Option<String>,
    id_token: RwLock<Option<String>>,
    current: watch::Sender<Option<AuthUser>>,
}

impl FirebaseRestProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            google_id_token: None,
            id_token: RwLock::new(None),
            current,
        }
    }

    /// `None` when no API key is configured
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        config.firebase_api_key.as_ref().map(Self::new)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Google ID token obtained by the embedding app's OAuth flow
    pub fn with_google_id_token(mut self, token: impl Into<String>) -> Self {
        self.google_id_token = Some(token.into());
        self
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &impl Serialize) -> Result<T, AuthError> {
        let url = format!("{}/accounts:{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(Duration::from_secs(30))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Identity request {} failed: {}", method, e);
                AuthError::from_code("auth/network-request-failed")
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            tracing::error!("Failed to read identity response for {}: {}", method, e);
            AuthError::from_code("auth/network-request-failed")
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| text.clone());
            let code = code_for_rest_error(&message);
            tracing::warn!("Identity {} rejected ({}): {} -> {}", method, status, message, code);
            return Err(AuthError::from_code(code));
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!("Unexpected identity response for {}: {}", method, e);
            AuthError::from_code("auth/internal-error")
        })
    }

    /// Fetch the full profile for `id_token` and make it the current user
    async fn establish(&self, id_token: String) -> Result<AuthUser, AuthError> {
        let lookup: LookupResponse = self.call("lookup", &json!({ "idToken": id_token })).await?;
        let user = lookup
            .users
            .into_iter()
            .next()
            .map(LookupUser::into_auth_user)
            .ok_or_else(|| AuthError::from_code("auth/user-token-expired"))?;

        *self.id_token.write().await = Some(id_token);
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseRestProvider {
    async fn sign_in(&self, email: &str, password: &str, remember_me: bool) -> Result<AuthUser, AuthError> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let token: TokenResponse = self.call("signInWithPassword", &request).await?;
        // token persistence belongs to the embedding app
        tracing::debug!("Signed in {} (remember_me={})", email, remember_me);
        self.establish(token.id_token).await
    }

    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<AuthUser, AuthError> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let token: TokenResponse = self.call("signUp", &request).await?;

        let display_name = display_name.trim();
        if !display_name.is_empty() {
            let _: Value = self
                .call(
                    "update",
                    &json!({ "idToken": token.id_token, "displayName": display_name, "returnSecureToken": false }),
                )
                .await?;
        }
        self.establish(token.id_token).await
    }

    async fn sign_in_with_google(&self) -> Result<AuthUser, AuthError> {
        let google_token = self
            .google_id_token
            .as_ref()
            .ok_or_else(|| AuthError::from_code("auth/operation-not-allowed"))?;

        let body = json!({
            "postBody": format!("id_token={}&providerId=google.com", urlencoding::encode(google_token)),
            "requestUri": "http://localhost",
            "returnSecureToken": true,
            "returnIdpCredential": true,
        });
        let token: TokenResponse = self.call("signInWithIdp", &body).await?;
        self.establish(token.id_token).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.id_token.write().await = None;
        self.current.send_replace(None);
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let _: Value = self
            .call("sendOobCode", &json!({ "requestType": "PASSWORD_RESET", "email": email }))
            .await?;
        tracing::info!("📧 Password reset email requested for {}", email);
        Ok(())
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<AuthUser, AuthError> {
        let id_token = self
            .id_token
            .read()
            .await
            .clone()
            .ok_or_else(|| AuthError::from_code("auth/null-user"))?;

        let mut body = json!({ "idToken": id_token, "returnSecureToken": false });
        if let Some(name) = &update.display_name {
            body["displayName"] = json!(name);
        }
        if let Some(url) = &update.photo_url {
            body["photoUrl"] = json!(url);
        }
        let _: Value = self.call("update", &body).await?;
        self.establish(id_token).await
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers one request per scripted response and records each raw request
    async fn scripted_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = headers
                    .to_lowercase()
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() - header_end < content_length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                log.lock().unwrap().push(String::from_utf8_lossy(&buf).to_string());

                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });

        (format!("http://{}/v1", addr), seen)
    }

    #[test]
    fn test_rest_error_translation() {
        assert_eq!(code_for_rest_error("EMAIL_NOT_FOUND"), "auth/user-not-found");
        assert_eq!(code_for_rest_error("INVALID_PASSWORD"), "auth/wrong-password");
        assert_eq!(
            code_for_rest_error("WEAK_PASSWORD : Password should be at least 6 characters"),
            "auth/weak-password"
        );
        assert_eq!(
            code_for_rest_error("API key not valid. Please pass a valid API key."),
            "auth/invalid-api-key"
        );
        assert_eq!(code_for_rest_error("SOMETHING_NEW"), "auth/internal-error");
    }

    #[test]
    fn test_lookup_user_mapping() {
        let raw = r#"{"users":[{"localId":"u1","email":"ada@example.com","displayName":"Ada",
            "emailVerified":true,"createdAt":"1700000000000","lastLoginAt":"1700000360000",
            "providerUserInfo":[{"providerId":"password"}]}]}"#;
        let lookup: LookupResponse = serde_json::from_str(raw).unwrap();
        let user = lookup.users.into_iter().next().unwrap().into_auth_user();

        assert_eq!(user.uid, "u1");
        assert_eq!(user.provider_id, "password");
        assert!(user.email_verified);
        assert_eq!(user.metadata.creation_time.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(user.metadata.last_sign_in_time.unwrap().timestamp(), 1_700_000_360);
    }

    #[tokio::test]
    async fn test_sign_in_looks_up_profile() {
        let (base, seen) = scripted_server(vec![
            (200, r#"{"idToken":"tok-1","localId":"u1","registered":true}"#),
            (200, r#"{"users":[{"localId":"u1","email":"ada@example.com","displayName":"Ada"}]}"#),
        ])
        .await;
        let provider = FirebaseRestProvider::new("test-key").with_base_url(base);

        let user = provider.sign_in("ada@example.com", "Engine#42", false).await.unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert_eq!(user.provider_id, "firebase");
        assert_eq!(provider.current_user().map(|u| u.uid), Some("u1".to_string()));

        let requests = seen.lock().unwrap().clone();
        assert!(requests[0].starts_with("POST /v1/accounts:signInWithPassword?key=test-key"));
        assert!(requests[1].starts_with("POST /v1/accounts:lookup?key=test-key"));
    }

    #[tokio::test]
    async fn test_sign_in_error_is_translated() {
        let (base, _) = scripted_server(vec![(
            400,
            r#"{"error":{"code":400,"message":"EMAIL_NOT_FOUND","errors":[]}}"#,
        )])
        .await;
        let provider = FirebaseRestProvider::new("test-key").with_base_url(base);

        let error = provider.sign_in("ghost@example.com", "x", false).await.unwrap_err();
        assert_eq!(error.code, "auth/user-not-found");
        assert_eq!(error.message, "No account found with this email address.");
        assert!(provider.current_user().is_none());
    }

    #[tokio::test]
    async fn test_key_and_google_token_are_encoded() {
        let (base, seen) = scripted_server(vec![
            (200, r#"{"idToken":"tok-2","localId":"g1"}"#),
            (200, r#"{"users":[{"localId":"g1","email":"grace@example.com","providerUserInfo":[{"providerId":"google.com"}]}]}"#),
        ])
        .await;
        let provider = FirebaseRestProvider::new("k&ey=1")
            .with_base_url(base)
            .with_google_id_token("a+b&providerId=evil");

        let user = provider.sign_in_with_google().await.unwrap();
        assert_eq!(user.provider_id, "google.com");

        let requests = seen.lock().unwrap().clone();
        assert!(requests[0].starts_with("POST /v1/accounts:signInWithIdp?key=k%26ey%3D1 "));
        assert!(requests[0].contains("id_token=a%2Bb%26providerId%3Devil&providerId=google.com"));
    }

    #[tokio::test]
    async fn test_google_without_token_is_not_allowed() {
        let provider = FirebaseRestProvider::new("test-key");
        let error = provider.sign_in_with_google().await.unwrap_err();
        assert_eq!(error.code, "auth/operation-not-allowed");
    }

    #[tokio::test]
    async fn test_update_profile_without_session() {
        let provider = FirebaseRestProvider::new("test-key");
        let error = provider.update_profile(&ProfileUpdate::default()).await.unwrap_err();
        assert_eq!(error.code, "auth/null-user");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = FirebaseRestProvider::new("test-key").with_base_url(format!("http://{}/v1", addr));
        let error = provider.reset_password("ada@example.com").await.unwrap_err();
        assert_eq!(error.code, "auth/network-request-failed");
        assert_eq!(error.message, "Network error. Please check your connection.");
    }
}
