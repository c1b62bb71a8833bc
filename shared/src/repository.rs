//! Remote-first storage of client records with a local fallback dataset.
//!
//! The repository owns the dual-write policy: while the backend is
//! configured and reachable every operation goes to the document store;
//! connectivity or configuration failures switch the repository into local
//! mode, where records live in a persisted list with `mock-N` identifiers.
//! The two datasets are never mixed: a record's id decides which one holds
//! it, so backend records are never written to the device list.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::capabilities::{
    load_json, store_json, ClientDocument, DocumentStore, DocumentUpdate, KeyValueStore, KvError,
    KvKey, RemoteError, RemoteTimestamp, SnapshotStream,
};
use crate::config::StoreConfig;
use crate::event::ClientId;
use crate::model::{demo_clients, sort_by_name, Client, ClientPatch, NewClient};
use crate::{ErrorKind, UnixTimeMs};

/// Dataset that new records go to.
///
/// Local mode is sticky: once a request falls back, the repository stays
/// local until `load_all` reaches the backend again or a live snapshot
/// arrives. Edits to backend records still go to the backend meanwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// Backend credentials are placeholders.
    Unconfigured,
    /// The backend rejected or could not serve the last request.
    Unreachable(RemoteError),
}

impl FallbackReason {
    /// Whether the failure was about connectivity rather than configuration.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable(e) if e.kind().is_connectivity())
    }
}

/// Which dataset served an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Remote,
    Local(FallbackReason),
}

impl Origin {
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    #[must_use]
    pub fn mode(&self) -> StorageMode {
        match self {
            Self::Remote => StorageMode::Remote,
            Self::Local(_) => StorageMode::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored<T> {
    pub value: T,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("remote store: {0}")]
    Remote(#[from] RemoteError),
    #[error("local storage: {0}")]
    Storage(#[from] KvError),
}

impl RepositoryError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote(e) => e.kind(),
            Self::Storage(e) => e.kind(),
        }
    }
}

/// Where an operation on an existing record is served from.
enum Route {
    Local(Origin),
    Remote,
    /// A device record while the remote dataset is active.
    Absent,
}

#[derive(Default)]
struct LocalData {
    clients: Vec<Client>,
    loaded: bool,
    next_seq: u64,
}

impl LocalData {
    fn position(&self, id: &ClientId) -> Option<usize> {
        self.clients.iter().position(|c| &c.id == id)
    }
}

pub struct ClientRepository {
    documents: Arc<dyn DocumentStore>,
    kv: Arc<dyn KeyValueStore>,
    collection: String,
    key: KvKey,
    configured: bool,
    seed_demo_data: bool,
    mode: Mutex<Origin>,
    local: tokio::sync::Mutex<LocalData>,
}

impl ClientRepository {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        kv: Arc<dyn KeyValueStore>,
        config: &StoreConfig,
        configured: bool,
    ) -> Result<Self, KvError> {
        let mode = if configured {
            Origin::Remote
        } else {
            Origin::Local(FallbackReason::Unconfigured)
        };
        Ok(Self {
            documents,
            kv,
            collection: config.clients_collection.clone(),
            key: KvKey::new(config.clients_storage_key.as_str())?,
            configured,
            seed_demo_data: config.seed_demo_data,
            mode: Mutex::new(mode),
            local: tokio::sync::Mutex::new(LocalData::default()),
        })
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    fn origin_guard(&self) -> MutexGuard<'_, Origin> {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin_guard().clone()
    }

    #[must_use]
    pub fn mode(&self) -> StorageMode {
        self.origin_guard().mode()
    }

    /// A live snapshot proves the backend is reachable again.
    pub(crate) fn resume_remote(&self) {
        if !self.configured {
            return;
        }
        let mut origin = self.origin_guard();
        if origin.is_local() {
            info!("remote store reachable again");
            *origin = Origin::Remote;
        }
    }

    /// Device records (`mock-N`) live in the local dataset and are only
    /// visible while it is active. Every other id belongs to the backend,
    /// which is tried even from local mode.
    fn route(&self, id: &ClientId) -> Route {
        if !id.is_local() && self.configured {
            return Route::Remote;
        }
        let origin = self.origin();
        if origin.is_local() {
            Route::Local(origin)
        } else {
            Route::Absent
        }
    }

    fn enter_fallback(&self, e: RemoteError) -> Origin {
        warn!(code = %e.code, "remote store unreachable, switching to local fallback");
        let origin = Origin::Local(FallbackReason::Unreachable(e));
        *self.origin_guard() = origin.clone();
        origin
    }

    /// The full record set, name-ordered. Retries the backend whenever it is
    /// configured, even from local mode.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<Stored<Vec<Client>>, RepositoryError> {
        if !self.configured {
            let clients = self.local_snapshot().await?;
            return Ok(Stored {
                value: clients,
                origin: Origin::Local(FallbackReason::Unconfigured),
            });
        }

        match self.documents.list_by_name(&self.collection).await {
            Ok(docs) => {
                *self.origin_guard() = Origin::Remote;
                let mut clients: Vec<Client> =
                    docs.into_iter().map(|d| d.into_client()).collect();
                sort_by_name(&mut clients);
                info!(count = clients.len(), "loaded clients from remote store");
                Ok(Stored {
                    value: clients,
                    origin: Origin::Remote,
                })
            }
            Err(e) if e.kind().triggers_fallback() => {
                let origin = self.enter_fallback(e);
                let clients = self.local_snapshot().await?;
                Ok(Stored {
                    value: clients,
                    origin,
                })
            }
            Err(e) => {
                error!(code = %e.code, "failed to load clients: {}", e.message);
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(&self, new: NewClient) -> Result<Stored<Client>, RepositoryError> {
        let now = UnixTimeMs::now();
        let origin = self.origin();
        if origin.is_local() {
            let client = self.local_create(new, now).await?;
            return Ok(Stored {
                value: client,
                origin,
            });
        }

        let data = ClientDocument::from_new(new.clone(), RemoteTimestamp::from_unix_ms(now));
        match self.documents.create(&self.collection, data).await {
            Ok(id) => {
                info!(%id, "client created");
                Ok(Stored {
                    value: Client::from_new(ClientId::new(id), new, now),
                    origin: Origin::Remote,
                })
            }
            Err(e) if e.kind().triggers_fallback() => {
                let origin = self.enter_fallback(e);
                let client = self.local_create(new, now).await?;
                Ok(Stored {
                    value: client,
                    origin,
                })
            }
            Err(e) => {
                error!(code = %e.code, "failed to create client: {}", e.message);
                Err(e.into())
            }
        }
    }

    /// Applies `patch` stamped with `now`. `value` is false when the dataset
    /// that owns `id` has no such record.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        id: &ClientId,
        patch: &ClientPatch,
        now: UnixTimeMs,
    ) -> Result<Stored<bool>, RepositoryError> {
        match self.route(id) {
            Route::Local(origin) => {
                let found = self.local_update(id, patch, now).await?;
                return Ok(Stored {
                    value: found,
                    origin,
                });
            }
            Route::Absent => {
                debug!("device record outside the remote dataset");
                return Ok(Stored {
                    value: false,
                    origin: Origin::Remote,
                });
            }
            Route::Remote => {}
        }

        let update = DocumentUpdate {
            fields: patch.clone(),
            updated_at: RemoteTimestamp::from_unix_ms(now),
        };
        match self.documents.update(&self.collection, id.as_str(), update).await {
            Ok(()) => Ok(Stored {
                value: true,
                origin: Origin::Remote,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("update target missing, ignoring");
                Ok(Stored {
                    value: false,
                    origin: Origin::Remote,
                })
            }
            Err(e) if e.kind().triggers_fallback() => {
                // Backend records have no device copy to write to.
                self.enter_fallback(e.clone());
                Err(e.into())
            }
            Err(e) => {
                error!(code = %e.code, "failed to update client: {}", e.message);
                Err(e.into())
            }
        }
    }

    /// Deletes by id. Absent ids succeed; `value` is false when nothing was
    /// removed. The backend does not say whether a document existed, so a
    /// successful remote delete always reports true.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &ClientId) -> Result<Stored<bool>, RepositoryError> {
        match self.route(id) {
            Route::Local(origin) => {
                let removed = self.local_delete(id).await?;
                return Ok(Stored {
                    value: removed,
                    origin,
                });
            }
            Route::Absent => {
                debug!("device record outside the remote dataset");
                return Ok(Stored {
                    value: false,
                    origin: Origin::Remote,
                });
            }
            Route::Remote => {}
        }

        match self.documents.delete(&self.collection, id.as_str()).await {
            Ok(()) => Ok(Stored {
                value: true,
                origin: Origin::Remote,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Stored {
                value: false,
                origin: Origin::Remote,
            }),
            Err(e) if e.kind().triggers_fallback() => {
                self.enter_fallback(e.clone());
                Err(e.into())
            }
            Err(e) => {
                error!(code = %e.code, "failed to delete client: {}", e.message);
                Err(e.into())
            }
        }
    }

    /// Point lookup in the dataset that owns `id`. No fallback on failure.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        match self.route(id) {
            Route::Local(_) => {
                let mut local = self.local.lock().await;
                self.ensure_loaded(&mut local).await?;
                return Ok(local.position(id).map(|i| local.clients[i].clone()));
            }
            Route::Absent => return Ok(None),
            Route::Remote => {}
        }
        let doc = self.documents.get(&self.collection, id.as_str()).await?;
        Ok(doc.map(|d| d.into_client()))
    }

    /// Change stream of the name-ordered query; `None` when unconfigured.
    pub fn subscribe(&self) -> Result<Option<SnapshotStream>, RemoteError> {
        if !self.configured {
            return Ok(None);
        }
        self.documents.subscribe_by_name(&self.collection).map(Some)
    }

    // --- Local dataset ---

    async fn local_snapshot(&self) -> Result<Vec<Client>, RepositoryError> {
        let mut local = self.local.lock().await;
        self.ensure_loaded(&mut local).await?;
        Ok(local.clients.clone())
    }

    async fn ensure_loaded(&self, local: &mut LocalData) -> Result<(), RepositoryError> {
        if local.loaded {
            return Ok(());
        }

        let stored: Option<Vec<Client>> = match load_json(self.kv.as_ref(), &self.key).await {
            Ok(v) => v,
            Err(e @ KvError::Serialization { .. }) => {
                warn!(error = %e, "discarding unreadable local client list");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let mut clients = match stored {
            Some(list) => list,
            None if self.seed_demo_data => {
                let demo = demo_clients(UnixTimeMs::now());
                if let Err(e) = store_json(self.kv.as_ref(), &self.key, &demo).await {
                    warn!(error = %e, "failed to persist demo clients");
                }
                info!(count = demo.len(), "seeded demo clients");
                demo
            }
            None => Vec::new(),
        };
        sort_by_name(&mut clients);

        local.next_seq = clients
            .iter()
            .filter_map(|c| c.id.mock_sequence())
            .max()
            .map_or(1, |max| max.saturating_add(1));
        local.clients = clients;
        local.loaded = true;
        debug!(count = local.clients.len(), next_seq = local.next_seq, "local dataset loaded");
        Ok(())
    }

    async fn persist(&self, local: &LocalData) -> Result<(), KvError> {
        store_json(self.kv.as_ref(), &self.key, &local.clients).await
    }

    async fn local_create(&self, new: NewClient, now: UnixTimeMs) -> Result<Client, RepositoryError> {
        let mut local = self.local.lock().await;
        self.ensure_loaded(&mut local).await?;

        let seq = local.next_seq;
        let client = Client::from_new(ClientId::mock(seq), new, now);

        // Memory first, then persist; roll back on failure.
        local.clients.push(client.clone());
        local.next_seq = seq.saturating_add(1);
        if let Err(e) = self.persist(&local).await {
            local.clients.pop();
            local.next_seq = seq;
            error!(error = %e, "failed to persist local client");
            return Err(e.into());
        }
        sort_by_name(&mut local.clients);
        info!(id = %client.id, "client saved locally");
        Ok(client)
    }

    async fn local_update(
        &self,
        id: &ClientId,
        patch: &ClientPatch,
        now: UnixTimeMs,
    ) -> Result<bool, RepositoryError> {
        let mut local = self.local.lock().await;
        self.ensure_loaded(&mut local).await?;

        let Some(index) = local.position(id) else {
            return Ok(false);
        };
        let previous = local.clients[index].clone();
        patch.apply(&mut local.clients[index], now);
        if let Err(e) = self.persist(&local).await {
            local.clients[index] = previous;
            error!(error = %e, "failed to persist local update");
            return Err(e.into());
        }
        sort_by_name(&mut local.clients);
        Ok(true)
    }

    async fn local_delete(&self, id: &ClientId) -> Result<bool, RepositoryError> {
        let mut local = self.local.lock().await;
        self.ensure_loaded(&mut local).await?;

        let Some(index) = local.position(id) else {
            return Ok(false);
        };
        let removed = local.clients.remove(index);
        if let Err(e) = self.persist(&local).await {
            local.clients.insert(index, removed);
            error!(error = %e, "failed to persist local delete");
            return Err(e.into());
        }
        Ok(true)
    }
}
