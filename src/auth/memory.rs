// src/auth/memory.rs
//! Local account table. Used in demo mode and tests; applies the same rules the hosted provider does.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use super::{AuthError, IdentityProvider};
use crate::models::{AuthMetadata, AuthUser, ProfileUpdate};
use crate::utils::validate_email;

/// Provider-side minimum, looser than the registration form's rule
const PROVIDER_MIN_PASSWORD: usize = 6;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    disabled: bool,
    user: AuthUser,
}

pub struct InMemoryIdentityProvider {
    /// Keyed by lowercased email
    accounts: RwLock<HashMap<String, Account>>,
    google_user: Option<AuthUser>,
    current: watch::Sender<Option<AuthUser>>,
    password_resets: RwLock<Vec<String>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: RwLock::new(HashMap::new()),
            google_user: None,
            current,
            password_resets: RwLock::new(Vec::new()),
        }
    }

    /// Seed an email/password account
    pub fn with_account(mut self, email: &str, password: &str, display_name: &str) -> Self {
        let user = new_user(email, display_name, "password");
        self.accounts.get_mut().insert(
            email.to_lowercase(),
            Account {
                password: password.to_string(),
                disabled: false,
                user,
            },
        );
        self
    }

    /// Enable Google sign-in; it signs in as this user
    pub fn with_google_account(mut self, email: &str, display_name: &str) -> Self {
        self.google_user = Some(new_user(email, display_name, "google.com"));
        self
    }

    pub async fn disable(&self, email: &str) -> bool {
        match self.accounts.write().await.get_mut(&email.to_lowercase()) {
            Some(account) => {
                account.disabled = true;
                true
            }
            None => false,
        }
    }

    /// Emails that were sent a reset link, oldest first
    pub async fn password_resets(&self) -> Vec<String> {
        self.password_resets.read().await.clone()
    }

    fn sign_in_as(&self, mut user: AuthUser) -> AuthUser {
        user.metadata.last_sign_in_time = Some(Utc::now());
        self.current.send_replace(Some(user.clone()));
        user
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn new_user(email: &str, display_name: &str, provider_id: &str) -> AuthUser {
    let display_name = display_name.trim();
    AuthUser {
        uid: Uuid::new_v4().simple().to_string(),
        email: Some(email.to_string()),
        display_name: (!display_name.is_empty()).then(|| display_name.to_string()),
        photo_url: None,
        email_verified: provider_id != "password",
        phone_number: None,
        provider_id: provider_id.to_string(),
        metadata: AuthMetadata {
            creation_time: Some(Utc::now()),
            last_sign_in_time: None,
        },
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str, remember_me: bool) -> Result<AuthUser, AuthError> {
        if !validate_email(email) {
            return Err(AuthError::from_code("auth/invalid-email"));
        }

        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&email.to_lowercase())
            .ok_or_else(|| AuthError::from_code("auth/user-not-found"))?;
        if account.disabled {
            return Err(AuthError::from_code("auth/user-disabled"));
        }
        if account.password != password {
            return Err(AuthError::from_code("auth/wrong-password"));
        }

        tracing::debug!("In-memory sign-in for {} (remember_me={})", email, remember_me);
        let user = self.sign_in_as(account.user.clone());
        account.user = user.clone();
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<AuthUser, AuthError> {
        if !validate_email(email) {
            return Err(AuthError::from_code("auth/invalid-email"));
        }

        let mut accounts = self.accounts.write().await;
        let key = email.to_lowercase();
        if accounts.contains_key(&key) {
            return Err(AuthError::from_code("auth/email-already-in-use"));
        }
        if password.chars().count() < PROVIDER_MIN_PASSWORD {
            return Err(AuthError::from_code("auth/weak-password"));
        }

        let user = self.sign_in_as(new_user(email, display_name, "password"));
        accounts.insert(
            key,
            Account {
                password: password.to_string(),
                disabled: false,
                user: user.clone(),
            },
        );
        Ok(user)
    }

    async fn sign_in_with_google(&self) -> Result<AuthUser, AuthError> {
        match &self.google_user {
            Some(user) => Ok(self.sign_in_as(user.clone())),
            None => Err(AuthError::from_code("auth/operation-not-allowed")),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.current.send_replace(None);
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        if !validate_email(email) {
            return Err(AuthError::from_code("auth/invalid-email"));
        }
        if !self.accounts.read().await.contains_key(&email.to_lowercase()) {
            return Err(AuthError::from_code("auth/user-not-found"));
        }
        self.password_resets.write().await.push(email.to_string());
        Ok(())
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<AuthUser, AuthError> {
        let mut user = self
            .current_user()
            .ok_or_else(|| AuthError::from_code("auth/null-user"))?;
        if let Some(name) = &update.display_name {
            user.display_name = Some(name.clone());
        }
        if let Some(url) = &update.photo_url {
            user.photo_url = Some(url.clone());
        }

        if let Some(email) = &user.email {
            if let Some(account) = self.accounts.write().await.get_mut(&email.to_lowercase()) {
                account.user = user.clone();
            }
        }
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.current.subscribe()
    }
}
