//! Composition root: one instance of each container for the lifetime of the
//! application, wired to a single set of capabilities.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::app_state::AppStore;
use crate::auth::AuthStore;
use crate::capabilities::{Capabilities, KvError, KvKey, PlatformSignals};
use crate::clients::{ClientsStore, ListenerHandle};
use crate::config::{BackendConfig, ConfigError, StoreConfig};
use crate::repository::ClientRepository;
use crate::theme::ThemeStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServicesError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid storage key: {0}")]
    Storage(#[from] KvError),
}

pub struct Services {
    pub app: AppStore,
    pub auth: AuthStore,
    pub theme: ThemeStore,
    pub clients: ClientsStore,
    backend: BackendConfig,
    platform: Arc<dyn PlatformSignals>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl Services {
    /// Builds every container. Nothing is subscribed or fetched until
    /// [`Services::start`].
    #[instrument(skip_all, fields(project_id = %backend.project_id))]
    pub async fn new(
        backend: BackendConfig,
        config: StoreConfig,
        caps: Capabilities,
    ) -> Result<Self, ServicesError> {
        config.validate()?;
        let configured = backend.is_configured();
        if configured {
            backend.validate()?;
        } else {
            warn!(
                placeholders = ?backend.placeholder_fields(),
                "backend not configured, client records stay on this device"
            );
        }

        let app = AppStore::new(config.default_toast_duration);
        let auth = AuthStore::new(caps.auth, app.clone(), &config);
        let theme_key = KvKey::new(config.theme_storage_key.as_str())?;
        let theme = ThemeStore::load(caps.kv.clone(), theme_key, caps.root).await;
        let repo = ClientRepository::new(caps.documents, caps.kv, &config, configured)?;
        let clients = ClientsStore::new(repo, app.clone());

        Ok(Self {
            app,
            auth,
            theme,
            clients,
            backend,
            platform: caps.platform,
            listener: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.backend.is_configured()
    }

    #[must_use]
    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    fn listener(&self) -> MutexGuard<'_, Option<ListenerHandle>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds platform signals, signs in when a backend is configured, loads
    /// the client records and starts live updates.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        self.app
            .initialize_online_listeners(self.platform.as_ref());
        self.theme.initialize_theme(self.platform.as_ref());

        if self.is_configured() {
            self.auth.initialize_auth();
        } else {
            info!("demo mode, skipping sign-in");
        }

        self.clients.fetch_all().await;
        let handle = self.clients.start_realtime_listener();
        if let Some(previous) = self.listener().replace(handle) {
            previous.unsubscribe();
        }
        info!("services started");
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.listener().take() {
            handle.unsubscribe();
        }
        self.clients.teardown();
        self.auth.teardown();
        self.theme.teardown();
        self.app.teardown();
        info!("services stopped");
    }

    /// Whether the real-time listener started by [`Services::start`] is live.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener().as_ref().is_some_and(ListenerHandle::is_active)
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.shutdown();
    }
}
