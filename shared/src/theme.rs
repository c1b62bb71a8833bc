use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::capabilities::{DocumentRoot, KeyValueStore, KvKey, PlatformSignals};

/// Stored colour-scheme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Light => "Light",
            Self::Dark => "Dark",
            Self::System => "System",
        }
    }

    /// Resolves `System` against the OS preference.
    #[must_use]
    pub const fn resolve(self, system_prefers_dark: bool) -> ActiveTheme {
        match self {
            Self::Light => ActiveTheme::Light,
            Self::Dark => ActiveTheme::Dark,
            Self::System if system_prefers_dark => ActiveTheme::Dark,
            Self::System => ActiveTheme::Light,
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("unknown theme '{other}'")),
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveTheme {
    Light,
    Dark,
}

impl ActiveTheme {
    #[must_use]
    pub const fn icon(self) -> &'static str {
        match self {
            Self::Light => "☀️",
            Self::Dark => "🌙",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThemeState {
    pub theme: Theme,
    pub system_prefers_dark: bool,
}

impl ThemeState {
    #[must_use]
    pub const fn active_theme(&self) -> ActiveTheme {
        self.theme.resolve(self.system_prefers_dark)
    }

    #[must_use]
    pub const fn is_dark(&self) -> bool {
        matches!(self.active_theme(), ActiveTheme::Dark)
    }
}

/// Reads the persisted preference; anything absent, unreadable or unknown
/// yields `System`.
pub async fn get_initial_theme(kv: &dyn KeyValueStore, key: &KvKey) -> Theme {
    match kv.get(key).await {
        Ok(Some(raw)) => raw.parse().unwrap_or_else(|e: String| {
            debug!(error = %e, "ignoring stored theme");
            Theme::System
        }),
        Ok(None) => Theme::System,
        Err(e) => {
            warn!(error = %e, "failed to read stored theme");
            Theme::System
        }
    }
}

struct ThemeInner {
    state: watch::Sender<ThemeState>,
    kv: Arc<dyn KeyValueStore>,
    key: KvKey,
    root: Arc<dyn DocumentRoot>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ThemeInner {
    fn listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self) {
        let dark = self.state.borrow().is_dark();
        self.root.set_dark_class(dark);
    }
}

impl Drop for ThemeInner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener().take() {
            handle.abort();
        }
    }
}

/// Theme container.
#[derive(Clone)]
pub struct ThemeStore {
    inner: Arc<ThemeInner>,
}

impl ThemeStore {
    /// Builds the container around the persisted preference.
    pub async fn load(
        kv: Arc<dyn KeyValueStore>,
        key: KvKey,
        root: Arc<dyn DocumentRoot>,
    ) -> Self {
        let theme = get_initial_theme(kv.as_ref(), &key).await;
        Self {
            inner: Arc::new(ThemeInner {
                state: watch::Sender::new(ThemeState {
                    theme,
                    system_prefers_dark: false,
                }),
                kv,
                key,
                root,
                listener: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ThemeState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ThemeState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        self.state().theme
    }

    #[must_use]
    pub fn active_theme(&self) -> ActiveTheme {
        self.state().active_theme()
    }

    #[must_use]
    pub fn is_dark(&self) -> bool {
        self.state().is_dark()
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        self.theme().display_name()
    }

    #[must_use]
    pub fn icon(&self) -> &'static str {
        self.active_theme().icon()
    }

    /// Stores the preference and re-applies the document class. A failed
    /// write is logged; the in-memory preference still changes.
    #[instrument(skip(self))]
    pub async fn set_theme(&self, theme: Theme) {
        self.inner.state.send_modify(|s| s.theme = theme);
        if let Err(e) = self
            .inner
            .kv
            .set(&self.inner.key, theme.as_str().to_string())
            .await
        {
            warn!(error = %e, "failed to persist theme preference");
        }
        self.inner.apply();
    }

    /// Light becomes dark; dark and system become light.
    pub async fn toggle_theme(&self) {
        let next = match self.theme() {
            Theme::Light => Theme::Dark,
            Theme::Dark | Theme::System => Theme::Light,
        };
        self.set_theme(next).await;
    }

    /// Tracks the OS preference, applies the theme now and again whenever
    /// the resolved dark flag flips. Binds once.
    pub fn initialize_theme(&self, signals: &dyn PlatformSignals) {
        let mut listener = self.inner.listener();
        if listener.is_some() {
            return;
        }
        let mut rx = signals.prefers_dark();
        let prefers_dark = *rx.borrow_and_update();
        self.inner
            .state
            .send_modify(|s| s.system_prefers_dark = prefers_dark);
        self.inner.apply();

        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, colour-scheme changes will not be observed");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        *listener = Some(runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let prefers_dark = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else { break };
                let was_dark = inner.state.borrow().is_dark();
                inner
                    .state
                    .send_modify(|s| s.system_prefers_dark = prefers_dark);
                if inner.state.borrow().is_dark() != was_dark {
                    debug!(prefers_dark, "system colour scheme changed");
                    inner.apply();
                }
            }
        }));
    }

    pub fn teardown(&self) {
        if let Some(handle) = self.inner.listener().take() {
            handle.abort();
        }
    }
}
