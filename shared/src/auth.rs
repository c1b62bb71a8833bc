use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::app_state::{AppStore, NewToast, SyncStatus};
use crate::capabilities::{AuthError, AuthProvider, AuthUser};
use crate::config::StoreConfig;
use crate::event::AuthNotification;
use crate::{calculate_backoff, AUTH_ERROR_TOAST_DURATION, AUTH_SUCCESS_TOAST_DURATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub status: AuthStatus,
    pub last_error: Option<String>,
    pub retry_count: u32,
    /// True until the provider has reported once.
    pub is_loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            status: AuthStatus::Uninitialized,
            last_error: None,
            retry_count: 0,
            is_loading: true,
        }
    }
}

impl AuthState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

struct AuthInner {
    state: watch::Sender<AuthState>,
    provider: Arc<dyn AuthProvider>,
    app: AppStore,
    max_retries: u32,
    backoff_base: Duration,
    listener: Mutex<Option<JoinHandle<()>>>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
}

impl AuthInner {
    fn listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retry_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.retry_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_retry(&self) {
        if let Some(handle) = self.retry_timer().take() {
            handle.abort();
        }
    }
}

impl Drop for AuthInner {
    fn drop(&mut self) {
        self.cancel_retry();
        if let Some(handle) = self.listener().take() {
            handle.abort();
        }
    }
}

/// Auth container: anonymous sign-in with bounded, backed-off retries.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<AuthInner>,
}

impl AuthStore {
    #[must_use]
    pub fn new(provider: Arc<dyn AuthProvider>, app: AppStore, config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                state: watch::Sender::new(AuthState::default()),
                provider,
                app,
                max_retries: config.auth_max_retries,
                backoff_base: config.auth_backoff_base,
                listener: Mutex::new(None),
                retry_timer: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<AuthUser> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.state.borrow().retry_count
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    #[must_use]
    pub fn has_pending_retry(&self) -> bool {
        self.inner
            .retry_timer()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Subscribes to the provider's auth-state channel. Binds once for the
    /// container's lifetime; later calls are ignored.
    pub fn initialize_auth(&self) {
        let mut listener = self.inner.listener();
        if listener.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, auth state will not be observed");
            return;
        };

        let mut rx = self.inner.provider.subscribe();
        let weak = Arc::downgrade(&self.inner);
        *listener = Some(runtime.spawn(async move {
            while let Some(note) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                AuthStore { inner }.handle_notification(note).await;
            }
        }));
        info!("auth listener started");
    }

    async fn handle_notification(&self, note: AuthNotification) {
        match note {
            AuthNotification::StateChanged(Some(user)) => {
                info!(uid = %user.uid, "auth state: signed in");
                self.inner.state.send_modify(|s| {
                    s.user = Some(user);
                    s.status = AuthStatus::Authenticated;
                    s.is_loading = false;
                });
                self.inner.app.set_sync_status(SyncStatus::Synced);
            }
            AuthNotification::StateChanged(None) => {
                let mut should_sign_in = false;
                self.inner.state.send_modify(|s| {
                    s.user = None;
                    s.is_loading = false;
                    should_sign_in = s.last_error.is_none();
                    if !should_sign_in {
                        s.status = AuthStatus::Unauthenticated;
                    }
                });
                if should_sign_in {
                    // Failures already surfaced by sign_in.
                    let _ = self.sign_in().await;
                }
            }
            AuthNotification::Error(e) => {
                error!(code = %e.code, "auth state error: {}", e.message);
                self.inner.state.send_modify(|s| {
                    s.last_error = Some(e.message.clone());
                    s.status = AuthStatus::Error;
                    s.is_loading = false;
                });
                self.inner.app.set_sync_status(SyncStatus::Error);
            }
        }
    }

    /// One anonymous sign-in attempt. A retryable failure under the retry
    /// maximum schedules the next attempt after `base * 2^retry_count`;
    /// anything else ends in an error toast. Both failure paths return the
    /// error.
    #[instrument(skip(self))]
    pub async fn sign_in(&self) -> Result<AuthUser, AuthError> {
        self.inner.state.send_modify(|s| {
            s.last_error = None;
            s.status = AuthStatus::Loading;
        });
        self.inner.app.set_sync_status(SyncStatus::Syncing);

        match self.inner.provider.sign_in_anonymously().await {
            Ok(user) => {
                info!(uid = %user.uid, "anonymous authentication successful");
                let signed_in = user.clone();
                self.inner.state.send_modify(|s| {
                    s.user = Some(signed_in);
                    s.status = AuthStatus::Authenticated;
                    s.retry_count = 0;
                    s.is_loading = false;
                });
                self.inner.app.set_sync_status(SyncStatus::Synced);
                self.inner.app.add_toast(
                    NewToast::success("Authentication successful")
                        .message("You are now connected to the system.")
                        .duration(AUTH_SUCCESS_TOAST_DURATION),
                );
                Ok(user)
            }
            Err(e) => {
                error!(code = %e.code, "authentication failed: {}", e.message);
                let message = if e.message.trim().is_empty() {
                    "Authentication failed".to_string()
                } else {
                    e.message.clone()
                };

                let max = self.inner.max_retries;
                let mut retry = None;
                self.inner.state.send_modify(|s| {
                    s.last_error = Some(message);
                    s.status = AuthStatus::Error;
                    s.is_loading = false;
                    if e.is_retryable() && s.retry_count < max {
                        retry = Some((
                            calculate_backoff(s.retry_count, self.inner.backoff_base),
                            s.retry_count + 1,
                        ));
                        s.retry_count += 1;
                    }
                });
                self.inner.app.set_sync_status(SyncStatus::Error);

                match retry {
                    Some((delay, attempt)) => {
                        warn!(attempt, max, ?delay, "retrying authentication");
                        self.schedule_retry(delay);
                    }
                    None => {
                        self.inner.app.add_toast(
                            NewToast::error("Authentication failed")
                                .message(e.user_message())
                                .duration(AUTH_ERROR_TOAST_DURATION),
                        );
                    }
                }
                Err(e)
            }
        }
    }

    fn schedule_retry(&self, delay: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, authentication retry dropped");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let mut timer = self.inner.retry_timer();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            // Detach our own handle so the next schedule does not abort us.
            drop(inner.retry_timer().take());
            let _ = AuthStore { inner }.sign_in().await;
        }));
    }

    /// Clears identity, error and retry state, cancels any pending retry,
    /// then signs out with the provider.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        self.inner.cancel_retry();
        self.inner.state.send_modify(|s| {
            s.user = None;
            s.status = AuthStatus::Unauthenticated;
            s.last_error = None;
            s.retry_count = 0;
        });
        if let Err(e) = self.inner.provider.sign_out().await {
            warn!(code = %e.code, "provider sign-out failed: {}", e.message);
        }
    }

    /// Manual retry from the UI: resets the counter and error, then signs in.
    pub async fn retry_authentication(&self) -> Result<AuthUser, AuthError> {
        self.inner.cancel_retry();
        self.inner.state.send_modify(|s| {
            s.retry_count = 0;
            s.last_error = None;
            s.is_loading = true;
        });
        self.sign_in().await
    }

    pub fn teardown(&self) {
        self.inner.cancel_retry();
        if let Some(handle) = self.inner.listener().take() {
            handle.abort();
        }
    }
}
