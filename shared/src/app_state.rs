use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::PlatformSignals;
use crate::event::ToastId;
use crate::DEFAULT_TOAST_DURATION;

/// Outcome of the most recent remote operation. Last write wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    Syncing,
    Offline,
    Error,
}

impl SyncStatus {
    #[must_use]
    pub const fn badge_icon(self) -> &'static str {
        match self {
            Self::Synced => "✓",
            Self::Syncing => "↻",
            Self::Offline => "⚠",
            Self::Error => "❌",
        }
    }

    /// Style classes of the sync badge.
    #[must_use]
    pub const fn badge_style(self) -> &'static str {
        match self {
            Self::Synced => "text-green-600",
            Self::Syncing => "text-blue-600 animate-spin",
            Self::Offline => "text-yellow-600",
            Self::Error => "text-red-600",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub id: ToastId,
    pub kind: ToastKind,
    pub title: String,
    pub message: Option<String>,
    /// Zero means the toast stays until removed.
    pub duration: Duration,
}

impl Toast {
    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.duration.is_zero()
    }
}

/// A toast before the container assigns its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToast {
    pub kind: ToastKind,
    pub title: String,
    pub message: Option<String>,
    /// `None` takes the container default.
    pub duration: Option<Duration>,
}

impl NewToast {
    pub fn new(kind: ToastKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: None,
            duration: None,
        }
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self::new(ToastKind::Success, title)
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self::new(ToastKind::Error, title)
    }

    pub fn warning(title: impl Into<String>) -> Self {
        Self::new(ToastKind::Warning, title)
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self::new(ToastKind::Info, title)
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn sticky(self) -> Self {
        self.duration(Duration::ZERO)
    }
}

/// Transient UI signals shared by every container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    pub sync_status: SyncStatus,
    pub is_online: bool,
    pub pending_writes: u32,
    pub toasts: Vec<Toast>,
    pub is_loading: bool,
    pub loading_message: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            sync_status: SyncStatus::Synced,
            is_online: true,
            pending_writes: 0,
            toasts: Vec::new(),
            is_loading: false,
            loading_message: String::new(),
        }
    }
}

struct AppInner {
    state: watch::Sender<UiState>,
    default_toast_duration: Duration,
    toast_timers: Mutex<HashMap<ToastId, JoinHandle<()>>>,
    online_listener: Mutex<Option<JoinHandle<()>>>,
}

impl AppInner {
    fn timers(&self) -> MutexGuard<'_, HashMap<ToastId, JoinHandle<()>>> {
        self.toast_timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.online_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_toast(&self, id: &ToastId) -> bool {
        let mut removed = false;
        self.state.send_if_modified(|s| {
            let before = s.toasts.len();
            s.toasts.retain(|t| &t.id != id);
            removed = s.toasts.len() != before;
            removed
        });
        removed
    }

    fn abort_all(&self) {
        for (_, handle) in self.timers().drain() {
            handle.abort();
        }
        if let Some(handle) = self.listener().take() {
            handle.abort();
        }
    }
}

impl Drop for AppInner {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// App/UI container. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct AppStore {
    inner: Arc<AppInner>,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_DURATION)
    }
}

impl AppStore {
    #[must_use]
    pub fn new(default_toast_duration: Duration) -> Self {
        Self {
            inner: Arc::new(AppInner {
                state: watch::Sender::new(UiState::default()),
                default_toast_duration,
                toast_timers: Mutex::new(HashMap::new()),
                online_listener: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> UiState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.inner.state.borrow().sync_status
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.state.borrow().is_online
    }

    #[must_use]
    pub fn pending_writes(&self) -> u32 {
        self.inner.state.borrow().pending_writes
    }

    #[must_use]
    pub fn toasts(&self) -> Vec<Toast> {
        self.inner.state.borrow().toasts.clone()
    }

    pub fn set_sync_status(&self, status: SyncStatus) {
        self.inner.state.send_if_modified(|s| {
            let changed = s.sync_status != status;
            s.sync_status = status;
            changed
        });
    }

    pub fn update_online_status(&self, online: bool) {
        self.inner.state.send_if_modified(|s| {
            let changed = s.is_online != online;
            s.is_online = online;
            changed
        });
    }

    pub fn update_pending_writes(&self, count: u32) {
        self.inner.state.send_modify(|s| s.pending_writes = count);
    }

    pub(crate) fn begin_write(&self) {
        self.inner
            .state
            .send_modify(|s| s.pending_writes = s.pending_writes.saturating_add(1));
    }

    pub(crate) fn end_write(&self) {
        self.inner
            .state
            .send_modify(|s| s.pending_writes = s.pending_writes.saturating_sub(1));
    }

    pub fn set_loading(&self, loading: bool, message: impl Into<String>) {
        let message = message.into();
        self.inner.state.send_modify(|s| {
            s.is_loading = loading;
            s.loading_message = message;
        });
    }

    /// Appends a toast and schedules its removal unless it is sticky.
    pub fn add_toast(&self, toast: NewToast) -> ToastId {
        let id = ToastId::generate();
        let duration = toast.duration.unwrap_or(self.inner.default_toast_duration);
        let toast = Toast {
            id: id.clone(),
            kind: toast.kind,
            title: toast.title,
            message: toast.message,
            duration,
        };
        debug!(toast_id = %id, kind = ?toast.kind, title = %toast.title, "toast added");

        // Held across spawn + insert so a firing timer always finds its entry.
        let mut timers = self.inner.timers();
        self.inner.state.send_modify(|s| s.toasts.push(toast));

        if duration.is_zero() {
            return id;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(toast_id = %id, "no async runtime, toast will not auto-dismiss");
            return id;
        };

        let weak: Weak<AppInner> = Arc::downgrade(&self.inner);
        let timer_id = id.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                inner.timers().remove(&timer_id);
                inner.drop_toast(&timer_id);
            }
        });
        timers.insert(id.clone(), handle);
        id
    }

    /// Removes a toast and cancels its timer. Unknown identifiers are ignored.
    pub fn remove_toast(&self, id: &ToastId) -> bool {
        if let Some(handle) = self.inner.timers().remove(id) {
            handle.abort();
        }
        self.inner.drop_toast(id)
    }

    /// Mirrors the platform's connectivity into `is_online`. Binds once;
    /// later calls are ignored.
    pub fn initialize_online_listeners(&self, signals: &dyn PlatformSignals) {
        let mut listener = self.inner.listener();
        if listener.is_some() {
            return;
        }
        let mut rx = signals.connectivity();
        self.update_online_status(*rx.borrow_and_update());

        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, connectivity changes will not be observed");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        *listener = Some(runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else { break };
                info!(online, "connectivity changed");
                AppStore { inner }.update_online_status(online);
            }
        }));
    }

    /// Cancels every outstanding timer and listener. State is left as is.
    pub fn teardown(&self) {
        self.inner.abort_all();
    }

    #[cfg(test)]
    pub(crate) fn timer_count(&self) -> usize {
        self.inner.timers().len()
    }
}
