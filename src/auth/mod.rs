// src/auth/mod.rs
//! Authentication session
//! Wraps an identity provider and keeps the `{user, loading, error}` state the auth screens render

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub mod firebase;
pub mod memory;

pub use firebase::FirebaseRestProvider;
pub use memory::InMemoryIdentityProvider;

use crate::models::{AuthState, AuthUser, LoginCredentials, ProfileUpdate, RegisterCredentials};
use crate::utils::validate_email;

/// Minimum password length enforced at registration
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Provider failure with its `auth/...` code and the message shown to the user
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct AuthError {
    pub code: String,
    pub message: String,
}

impl AuthError {
    pub fn from_code(code: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message_for_code(code),
        }
    }

    /// Form validation failure; never reaches the provider
    pub fn invalid(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// User-facing message for a provider error code
pub fn message_for_code(code: &str) -> String {
    let message = match code {
        "auth/user-not-found" => "No account found with this email address.",
        "auth/wrong-password" => "Incorrect password. Please try again.",
        "auth/invalid-email" => "Please enter a valid email address.",
        "auth/user-disabled" => "This account has been disabled.",
        "auth/email-already-in-use" => "An account with this email already exists.",
        "auth/weak-password" => "Password should be at least 6 characters.",
        "auth/network-request-failed" => "Network error. Please check your connection.",
        "auth/too-many-requests" => "Too many attempts. Please try again later.",
        "auth/invalid-credential" => "Invalid credentials. Please check your email and password.",
        "auth/operation-not-allowed" => "This sign-in method is not enabled.",
        "auth/popup-closed-by-user" | "auth/cancelled-popup-request" => "Sign-in was cancelled.",
        "auth/popup-blocked" => "Pop-up was blocked by your browser. Please allow pop-ups and try again.",
        "auth/unauthorized-domain" => "This domain is not authorized for OAuth operations.",
        "auth/invalid-api-key" => "Invalid API key. Please check your Firebase configuration.",
        "auth/app-deleted" => "Firebase app was deleted.",
        "auth/invalid-user-token" | "auth/user-token-expired" => "Your session has expired. Please sign in again.",
        "auth/null-user" => "No user is currently signed in.",
        "auth/invalid-tenant-id" => "Invalid tenant ID.",
        other => return format!("An unexpected error occurred: {}. Please try again.", other),
    };
    message.to_string()
}

/// Identity backend capability. Implementations report failures with `auth/...` codes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str, remember_me: bool) -> Result<AuthUser, AuthError>;
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<AuthUser, AuthError>;
    async fn sign_in_with_google(&self) -> Result<AuthUser, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    async fn reset_password(&self, email: &str) -> Result<(), AuthError>;
    async fn update_profile(&self, update: &ProfileUpdate) -> Result<AuthUser, AuthError>;
    fn current_user(&self) -> Option<AuthUser>;
    /// Current user, updated on every sign-in, sign-out and profile change
    fn watch(&self) -> watch::Receiver<Option<AuthUser>>;
}

/// The registration screen's password checklist, in display order
pub fn password_checks(password: &str) -> [(&'static str, bool); 5] {
    [
        ("At least 8 characters", password.chars().count() >= MIN_PASSWORD_LENGTH),
        ("Contains uppercase letter", password.chars().any(|c| c.is_ascii_uppercase())),
        ("Contains lowercase letter", password.chars().any(|c| c.is_ascii_lowercase())),
        ("Contains number", password.chars().any(|c| c.is_ascii_digit())),
        ("Contains special character", password.chars().any(|c| !c.is_ascii_alphanumeric())),
    ]
}

pub fn validate_login(credentials: &LoginCredentials) -> Result<(), AuthError> {
    if !validate_email(credentials.email.trim()) {
        return Err(AuthError::from_code("auth/invalid-email"));
    }
    if credentials.password.is_empty() {
        return Err(AuthError::invalid("form/password-required", "Password is required."));
    }
    Ok(())
}

pub fn validate_registration(credentials: &RegisterCredentials) -> Result<(), AuthError> {
    if credentials.first_name.trim().is_empty() {
        return Err(AuthError::invalid("form/first-name-required", "First name is required."));
    }
    if credentials.last_name.trim().is_empty() {
        return Err(AuthError::invalid("form/last-name-required", "Last name is required."));
    }
    if !validate_email(credentials.email.trim()) {
        return Err(AuthError::from_code("auth/invalid-email"));
    }
    if let Some((rule, _)) = password_checks(&credentials.password).into_iter().find(|(_, met)| !met) {
        return Err(AuthError {
            code: "form/password-requirements".to_string(),
            message: format!("Password does not meet the requirements: {}.", rule.to_lowercase()),
        });
    }
    if credentials.password != credentials.confirm_password {
        return Err(AuthError::invalid("form/password-mismatch", "Passwords do not match."));
    }
    if !credentials.agree_terms {
        return Err(AuthError::invalid(
            "form/terms-required",
            "You must agree to the terms and conditions.",
        ));
    }
    Ok(())
}

/// Auth state for one client session
pub struct AuthSession {
    provider: Arc<dyn IdentityProvider>,
    state: Arc<watch::Sender<AuthState>>,
    forwarder: JoinHandle<()>,
}

impl AuthSession {
    /// Must be called inside a tokio runtime; a task mirrors the provider's user into the session state
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        let state = Arc::new(state);

        let mut users = provider.watch();
        let mirror = state.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                let user = users.borrow_and_update().clone();
                mirror.send_modify(|s| {
                    s.user = user;
                    s.loading = false;
                });
                if users.changed().await.is_err() {
                    break;
                }
            }
        });

        Self {
            provider,
            state,
            forwarder,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Resolves once the provider's first state has been observed
    pub async fn ready(&self) -> AuthState {
        let mut rx = self.state.subscribe();
        let state = rx.wait_for(|s| !s.loading).await.map(|s| s.clone());
        state.unwrap_or_else(|_| self.state())
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    pub async fn sign_in(&self, credentials: &LoginCredentials) -> Result<AuthUser, AuthError> {
        validate_login(credentials).map_err(|e| self.fail(e, false))?;
        self.begin(true);

        let result = self
            .provider
            .sign_in(credentials.email.trim(), &credentials.password, credentials.remember_me)
            .await;
        self.settle_user(result)
    }

    pub async fn sign_up(&self, credentials: &RegisterCredentials) -> Result<AuthUser, AuthError> {
        validate_registration(credentials).map_err(|e| self.fail(e, false))?;
        self.begin(true);

        let result = self
            .provider
            .sign_up(credentials.email.trim(), &credentials.password, &credentials.display_name())
            .await;
        self.settle_user(result)
    }

    pub async fn sign_in_with_google(&self) -> Result<AuthUser, AuthError> {
        self.begin(true);
        let result = self.provider.sign_in_with_google().await;
        self.settle_user(result)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.begin(true);
        match self.provider.sign_out().await {
            Ok(()) => {
                self.state.send_modify(|s| {
                    s.user = None;
                    s.loading = false;
                });
                tracing::info!("👋 Signed out");
                Ok(())
            }
            Err(e) => Err(self.fail(e, true)),
        }
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        self.begin(false);
        if !validate_email(email.trim()) {
            return Err(self.fail(AuthError::from_code("auth/invalid-email"), false));
        }
        self.provider
            .reset_password(email.trim())
            .await
            .map_err(|e| self.fail(e, false))
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<AuthUser, AuthError> {
        self.begin(false);
        if self.provider.current_user().is_none() {
            return Err(self.fail(AuthError::from_code("auth/null-user"), false));
        }
        match self.provider.update_profile(update).await {
            Ok(user) => {
                self.state.send_modify(|s| s.user = Some(user.clone()));
                Ok(user)
            }
            Err(e) => Err(self.fail(e, false)),
        }
    }

    /// Call `callback` with the current state and again after every change until the subscription is dropped
    pub fn on_auth_state_changed<F>(&self, callback: F) -> AuthSubscription
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        let mut rx = self.state.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                callback(&state);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        AuthSubscription { handle }
    }

    fn begin(&self, loading: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.error.is_some() || (loading && !s.loading);
            s.error = None;
            if loading {
                s.loading = true;
            }
            changed
        });
    }

    fn settle_user(&self, result: Result<AuthUser, AuthError>) -> Result<AuthUser, AuthError> {
        match result {
            Ok(user) => {
                tracing::info!("🔐 Signed in as {}", user.uid);
                self.state.send_modify(|s| {
                    s.user = Some(user.clone());
                    s.loading = false;
                });
                Ok(user)
            }
            Err(e) => Err(self.fail(e, true)),
        }
    }

    fn fail(&self, error: AuthError, stop_loading: bool) -> AuthError {
        tracing::warn!("Auth error {}: {}", error.code, error.message);
        self.state.send_modify(|s| {
            s.error = Some(error.message.clone());
            if stop_loading {
                s.loading = false;
            }
        });
        error
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Handle returned by `on_auth_state_changed`. Dropping it unsubscribes.
pub struct AuthSubscription {
    handle: JoinHandle<()>,
}

impl AuthSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn registration() -> RegisterCredentials {
        RegisterCredentials {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password: "Engine#42".into(),
            confirm_password: "Engine#42".into(),
            agree_terms: true,
        }
    }

    fn login(email: &str, password: &str) -> LoginCredentials {
        LoginCredentials {
            email: email.into(),
            password: password.into(),
            remember_me: false,
        }
    }

    async fn session_with(provider: InMemoryIdentityProvider) -> AuthSession {
        let session = AuthSession::new(Arc::new(provider));
        session.ready().await;
        session
    }

    #[test]
    fn test_known_codes_map_to_fixed_messages() {
        assert_eq!(
            AuthError::from_code("auth/wrong-password").to_string(),
            "Incorrect password. Please try again."
        );
        assert_eq!(message_for_code("auth/popup-closed-by-user"), "Sign-in was cancelled.");
        assert_eq!(message_for_code("auth/null-user"), "No user is currently signed in.");
    }

    #[test]
    fn test_unknown_code_gets_fallback_message() {
        let error = AuthError::from_code("auth/quota-exceeded");
        assert_eq!(error.code, "auth/quota-exceeded");
        assert_eq!(
            error.message,
            "An unexpected error occurred: auth/quota-exceeded. Please try again."
        );
    }

    #[test]
    fn test_registration_validation() {
        assert!(validate_registration(&registration()).is_ok());

        let mut missing_name = registration();
        missing_name.first_name = "  ".into();
        assert_eq!(validate_registration(&missing_name).unwrap_err().code, "form/first-name-required");

        let mut bad_email = registration();
        bad_email.email = "ada@".into();
        assert_eq!(validate_registration(&bad_email).unwrap_err().code, "auth/invalid-email");

        let mut no_special = registration();
        no_special.password = "Engine42".into();
        no_special.confirm_password = "Engine42".into();
        let error = validate_registration(&no_special).unwrap_err();
        assert_eq!(error.code, "form/password-requirements");
        assert!(error.message.contains("special character"));

        let mut mismatch = registration();
        mismatch.confirm_password = "Engine#43".into();
        assert_eq!(validate_registration(&mismatch).unwrap_err().code, "form/password-mismatch");

        let mut no_terms = registration();
        no_terms.agree_terms = false;
        assert_eq!(validate_registration(&no_terms).unwrap_err().code, "form/terms-required");
    }

    #[test]
    fn test_password_checks() {
        let checks = password_checks("abc");
        assert!(!checks[0].1);
        assert!(!checks[1].1);
        assert!(checks[2].1);
        assert!(password_checks("Abcdef1!").iter().all(|(_, met)| *met));
    }

    #[tokio::test]
    async fn test_loading_clears_after_first_provider_state() {
        let session = AuthSession::new(Arc::new(InMemoryIdentityProvider::new()));
        let state = session.ready().await;
        assert!(!state.loading);
        assert!(state.user.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_out() {
        let session = session_with(InMemoryIdentityProvider::new()).await;

        let user = session.sign_up(&registration()).await.unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(session.state().user.as_ref().map(|u| u.uid.clone()), Some(user.uid.clone()));
        assert!(!session.state().loading);

        session.sign_out().await.unwrap();
        assert!(session.state().user.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_failure_stores_message() {
        let provider = InMemoryIdentityProvider::new().with_account("ada@example.com", "Engine#42", "Ada");
        let session = session_with(provider).await;

        let error = session.sign_in(&login("ada@example.com", "nope")).await.unwrap_err();
        assert_eq!(error.code, "auth/wrong-password");
        let state = session.state();
        assert_eq!(state.error.as_deref(), Some("Incorrect password. Please try again."));
        assert!(!state.loading);

        session.clear_error();
        assert!(session.state().error.is_none());

        session.sign_in(&login("ada@example.com", "Engine#42")).await.unwrap();
        assert!(session.state().error.is_none());
        assert!(session.state().user.is_some());
    }

    #[tokio::test]
    async fn test_update_profile_requires_user() {
        let session = session_with(InMemoryIdentityProvider::new()).await;
        let update = ProfileUpdate {
            display_name: Some("Grace".into()),
            photo_url: None,
        };

        let error = session.update_profile(&update).await.unwrap_err();
        assert_eq!(error.to_string(), "No user is currently signed in.");
        assert_eq!(session.state().error.as_deref(), Some("No user is currently signed in."));
    }

    #[tokio::test]
    async fn test_update_profile_refreshes_user() {
        let provider = InMemoryIdentityProvider::new().with_account("ada@example.com", "Engine#42", "Ada");
        let session = session_with(provider).await;
        session.sign_in(&login("ada@example.com", "Engine#42")).await.unwrap();

        let update = ProfileUpdate {
            display_name: Some("Countess".into()),
            photo_url: Some("https://example.com/ada.png".into()),
        };
        let user = session.update_profile(&update).await.unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Countess"));
        assert_eq!(session.state().user.unwrap().photo_url.as_deref(), Some("https://example.com/ada.png"));
    }

    #[tokio::test]
    async fn test_google_sign_in_not_enabled() {
        let session = session_with(InMemoryIdentityProvider::new()).await;
        let error = session.sign_in_with_google().await.unwrap_err();
        assert_eq!(error.code, "auth/operation-not-allowed");
        assert_eq!(session.state().error.as_deref(), Some("This sign-in method is not enabled."));
    }

    #[tokio::test]
    async fn test_reset_password_validates_email() {
        let session = session_with(InMemoryIdentityProvider::new()).await;
        let error = session.reset_password("not-an-email").await.unwrap_err();
        assert_eq!(error.code, "auth/invalid-email");
        assert!(session.state().error.is_some());
    }

    #[tokio::test]
    async fn test_state_subscription_sees_changes_until_dropped() {
        let provider = InMemoryIdentityProvider::new().with_account("ada@example.com", "Engine#42", "Ada");
        let session = session_with(provider).await;

        let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = session.on_auth_state_changed(move |state| {
            sink.lock().unwrap().push(state.user.is_some());
        });
        tokio::task::yield_now().await;

        session.sign_in(&login("ada@example.com", "Engine#42")).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(seen.lock().unwrap().first(), Some(&false));
        assert_eq!(seen.lock().unwrap().last(), Some(&true));

        subscription.unsubscribe();
        let count = seen.lock().unwrap().len();
        session.sign_out().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(seen.lock().unwrap().len(), count);
    }
}
