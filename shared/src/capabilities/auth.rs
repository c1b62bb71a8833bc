use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::event::{AuthNotification, UserId};
use crate::ErrorKind;

pub type AuthStateStream = mpsc::UnboundedReceiver<AuthNotification>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: UserId,
    pub is_anonymous: bool,
}

impl AuthUser {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            uid: UserId::new(Uuid::new_v4().simple().to_string()),
            is_anonymous: true,
        }
    }
}

/// Failure reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: String,
    pub message: String,
}

impl AuthError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn network() -> Self {
        Self::new("auth/network-request-failed", "network request failed")
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Human-readable text for the terminal failure toast.
    #[must_use]
    pub fn user_message(&self) -> String {
        let code = self.code.strip_prefix("auth/").unwrap_or(&self.code);
        match code {
            "network-request-failed" => ErrorKind::Network.user_facing_message().to_string(),
            "invalid-api-key" => {
                "Invalid Firebase configuration. Please check your API key.".to_string()
            }
            "project-not-found" => {
                "Firebase project not found. Please check your project configuration.".to_string()
            }
            "app-deleted" => {
                "Firebase app has been deleted. Please check your configuration.".to_string()
            }
            _ if !self.message.trim().is_empty() => self.message.clone(),
            _ => "Please check your Firebase configuration and try again.".to_string(),
        }
    }
}

/// Anonymous identity provider.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_anonymously(&self) -> Result<AuthUser, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    /// Auth-state channel. The current state is delivered immediately, then
    /// every change; provider-side failures arrive as `AuthNotification::Error`.
    fn subscribe(&self) -> AuthStateStream;
}

#[derive(Default)]
struct ScriptState {
    script: VecDeque<Result<(), AuthError>>,
    user: Option<AuthUser>,
    listeners: Vec<mpsc::UnboundedSender<AuthNotification>>,
}

impl ScriptState {
    fn broadcast(&mut self, note: &AuthNotification) {
        self.listeners.retain(|tx| tx.send(note.clone()).is_ok());
    }
}

/// Identity provider whose sign-in outcomes are queued up front. An empty
/// script means every sign-in succeeds.
#[derive(Default)]
pub struct ScriptedAuthProvider {
    state: Mutex<ScriptState>,
    sign_in_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl ScriptedAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_failure(&self, error: AuthError) {
        self.lock().script.push_back(Err(error));
    }

    pub fn push_failures(&self, error: &AuthError, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.script.push_back(Err(error.clone()));
        }
    }

    pub fn push_success(&self) {
        self.lock().script.push_back(Ok(()));
    }

    /// Sends an error on the auth-state channel.
    pub fn emit_error(&self, error: AuthError) {
        self.lock().broadcast(&AuthNotification::Error(error));
    }

    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.lock().user.clone()
    }

    #[must_use]
    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuthProvider for ScriptedAuthProvider {
    async fn sign_in_anonymously(&self) -> Result<AuthUser, AuthError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.script.pop_front().unwrap_or(Ok(()))?;

        let user = state.user.clone().unwrap_or_else(AuthUser::anonymous);
        state.user = Some(user.clone());
        state.broadcast(&AuthNotification::StateChanged(Some(user.clone())));
        debug!(uid = %user.uid, "scripted sign-in succeeded");
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.user.take().is_some() {
            state.broadcast(&AuthNotification::StateChanged(None));
        }
        Ok(())
    }

    fn subscribe(&self) -> AuthStateStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let _ = tx.send(AuthNotification::StateChanged(state.user.clone()));
        state.listeners.push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_follow_provider_codes() {
        assert!(AuthError::network().user_message().contains("internet connection"));
        assert!(AuthError::new("auth/invalid-api-key", "")
            .user_message()
            .contains("API key"));
        assert!(AuthError::new("auth/project-not-found", "")
            .user_message()
            .contains("project not found"));
        assert!(AuthError::new("auth/app-deleted", "")
            .user_message()
            .contains("deleted"));
        assert_eq!(
            AuthError::new("auth/operation-not-allowed", "Anonymous sign-in disabled").user_message(),
            "Anonymous sign-in disabled"
        );
        assert!(AuthError::new("auth/internal-error", "")
            .user_message()
            .contains("try again"));
    }

    #[test]
    fn retryable_codes() {
        assert!(AuthError::network().is_retryable());
        assert!(AuthError::new("timeout", "").is_retryable());
        assert!(AuthError::new("unavailable", "").is_retryable());
        assert!(!AuthError::new("auth/invalid-api-key", "").is_retryable());
    }

    #[tokio::test]
    async fn script_is_consumed_in_order() {
        let provider = ScriptedAuthProvider::new();
        provider.push_failure(AuthError::network());

        assert!(provider.sign_in_anonymously().await.is_err());
        assert!(provider.current_user().is_none());
        let user = provider.sign_in_anonymously().await.unwrap();
        assert!(user.is_anonymous);
        assert_eq!(provider.sign_in_calls(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_initial_state_then_changes() {
        let provider = ScriptedAuthProvider::new();
        let mut rx = provider.subscribe();
        assert_eq!(rx.recv().await, Some(AuthNotification::StateChanged(None)));

        let user = provider.sign_in_anonymously().await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(AuthNotification::StateChanged(Some(user)))
        );

        provider.sign_out().await.unwrap();
        assert_eq!(rx.recv().await, Some(AuthNotification::StateChanged(None)));

        provider.emit_error(AuthError::network());
        assert!(matches!(rx.recv().await, Some(AuthNotification::Error(_))));
    }
}
