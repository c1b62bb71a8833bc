use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::event::{ClientId, SnapshotEvent};
use crate::model::{compare_names, Client, ClientPatch, NewClient};
use crate::{ErrorKind, UnixTimeMs};

pub type SnapshotStream = mpsc::UnboundedReceiver<SnapshotEvent>;

/// Failure reported by the remote data service, keyed by the provider's code.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unavailable() -> Self {
        Self::new("unavailable", "the service is currently unavailable")
    }

    #[must_use]
    pub fn not_found(id: &str) -> Self {
        Self::new("not-found", format!("no document with id {id}"))
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }
}

/// Backend timestamp: seconds plus nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl RemoteTimestamp {
    #[must_use]
    pub fn now() -> Self {
        Self::from_unix_ms(UnixTimeMs::now())
    }

    #[must_use]
    pub fn from_unix_ms(t: UnixTimeMs) -> Self {
        let ms = t.as_millis();
        Self {
            seconds: i64::try_from(ms / 1000).unwrap_or(i64::MAX),
            nanos: u32::try_from(ms % 1000).unwrap_or(0) * 1_000_000,
        }
    }

    /// Converts to the uniform date representation; pre-epoch values clamp to 0.
    #[must_use]
    pub fn to_unix_ms(self) -> UnixTimeMs {
        let secs = u64::try_from(self.seconds).unwrap_or(0);
        UnixTimeMs(
            secs.saturating_mul(1000)
                .saturating_add(u64::from(self.nanos / 1_000_000)),
        )
    }
}

/// Stored form of a client in the remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDocument {
    pub name: String,
    pub contact_name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    pub address: String,
    pub region: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<RemoteTimestamp>,
    #[serde(default)]
    pub updated_at: Option<RemoteTimestamp>,
}

impl ClientDocument {
    #[must_use]
    pub fn from_new(new: NewClient, now: RemoteTimestamp) -> Self {
        Self {
            name: new.name,
            contact_name: new.contact_name,
            phone: new.phone,
            email: new.email,
            address: new.address,
            region: new.region,
            notes: new.notes,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    #[must_use]
    pub fn from_client(client: &Client) -> Self {
        Self {
            created_at: Some(RemoteTimestamp::from_unix_ms(client.created_at)),
            updated_at: Some(RemoteTimestamp::from_unix_ms(client.updated_at)),
            ..Self::from_new(client.to_new(), RemoteTimestamp::from_unix_ms(client.created_at))
        }
    }

    fn apply(&mut self, update: &DocumentUpdate) {
        let p = &update.fields;
        if let Some(v) = &p.name {
            self.name.clone_from(v);
        }
        if let Some(v) = &p.contact_name {
            self.contact_name.clone_from(v);
        }
        if let Some(v) = &p.phone {
            self.phone.clone_from(v);
        }
        if let Some(v) = &p.email {
            self.email.clone_from(v);
        }
        if let Some(v) = &p.address {
            self.address.clone_from(v);
        }
        if let Some(v) = &p.region {
            self.region.clone_from(v);
        }
        if let Some(v) = &p.notes {
            self.notes.clone_from(v);
        }
        self.updated_at = Some(update.updated_at);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub data: ClientDocument,
}

impl RemoteDocument {
    /// Converts backend timestamps; a missing update time falls back to the
    /// creation time, a missing creation time to the epoch.
    #[must_use]
    pub fn into_client(self) -> Client {
        let created_at = self
            .data
            .created_at
            .map_or(UnixTimeMs(0), RemoteTimestamp::to_unix_ms);
        let updated_at = self
            .data
            .updated_at
            .map_or(created_at, RemoteTimestamp::to_unix_ms);

        Client {
            id: ClientId::new(self.id),
            name: self.data.name,
            contact_name: self.data.contact_name,
            phone: self.data.phone,
            email: self.data.email,
            address: self.data.address,
            region: self.data.region,
            notes: self.data.notes,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub fields: ClientPatch,
    pub updated_at: RemoteTimestamp,
}

/// Hosted document database: name-ordered queries, CRUD by id and a
/// full-snapshot change subscription.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of `collection`, ordered by name ascending.
    async fn list_by_name(&self, collection: &str) -> Result<Vec<RemoteDocument>, RemoteError>;
    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>, RemoteError>;
    /// Returns the backend-assigned identifier.
    async fn create(&self, collection: &str, data: ClientDocument) -> Result<String, RemoteError>;
    /// Fails with `not-found` when the document does not exist.
    async fn update(&self, collection: &str, id: &str, update: DocumentUpdate) -> Result<(), RemoteError>;
    /// Deleting an absent document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;
    /// Streams the name-ordered query; the current contents are delivered
    /// first, then a full snapshot after every change. Dropping the receiver
    /// unsubscribes.
    fn subscribe_by_name(&self, collection: &str) -> Result<SnapshotStream, RemoteError>;
}

#[derive(Default)]
struct InMemoryState {
    collections: HashMap<String, BTreeMap<String, ClientDocument>>,
    subscribers: Vec<(String, mpsc::UnboundedSender<SnapshotEvent>)>,
    failure: Option<RemoteError>,
}

impl InMemoryState {
    fn ordered(&self, collection: &str) -> Vec<RemoteDocument> {
        let mut docs: Vec<RemoteDocument> = self
            .collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .map(|(id, data)| RemoteDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| compare_names(&a.data.name, &b.data.name));
        docs
    }

    fn notify(&mut self, collection: &str) {
        let snapshot = self.ordered(collection);
        self.subscribers.retain(|(c, tx)| {
            if c != collection {
                return !tx.is_closed();
            }
            tx.send(SnapshotEvent::Snapshot(snapshot.clone())).is_ok()
        });
    }

    fn check(&self) -> Result<(), RemoteError> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Process-local document database with switchable failures.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<InMemoryState>,
    calls: AtomicUsize,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every subsequent call fails with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<RemoteError>) {
        self.lock().failure = error;
    }

    /// Pushes an error into every live subscription of `collection`.
    pub fn fail_subscriptions(&self, collection: &str, error: RemoteError) {
        let mut state = self.lock();
        state.subscribers.retain(|(c, tx)| {
            if c == collection {
                let _ = tx.send(SnapshotEvent::Error(error.clone()));
                false
            } else {
                !tx.is_closed()
            }
        });
    }

    /// Writes a document directly, as another client of the backend would.
    pub fn insert_external(&self, collection: &str, id: &str, data: ClientDocument) {
        let mut state = self.lock();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        state.notify(collection);
    }

    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.lock().collections.get(collection).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }

    /// Number of calls made through the `DocumentStore` trait.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> MutexGuard<'_, InMemoryState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list_by_name(&self, collection: &str) -> Result<Vec<RemoteDocument>, RemoteError> {
        let state = self.begin();
        state.check()?;
        Ok(state.ordered(collection))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        let state = self.begin();
        state.check()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| RemoteDocument {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn create(&self, collection: &str, data: ClientDocument) -> Result<String, RemoteError> {
        let mut state = self.begin();
        state.check()?;
        let id = Uuid::new_v4().simple().to_string()[..20].to_string();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), data);
        state.notify(collection);
        debug!(%id, collection, "document created");
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, update: DocumentUpdate) -> Result<(), RemoteError> {
        let mut state = self.begin();
        state.check()?;
        let doc = state
            .collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| RemoteError::not_found(id))?;
        doc.apply(&update);
        state.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let mut state = self.begin();
        state.check()?;
        let removed = state
            .collections
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some();
        if removed {
            state.notify(collection);
        }
        Ok(())
    }

    fn subscribe_by_name(&self, collection: &str) -> Result<SnapshotStream, RemoteError> {
        let mut state = self.begin();
        state.check()?;
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, so the initial send cannot fail.
        let _ = tx.send(SnapshotEvent::Snapshot(state.ordered(collection)));
        state.subscribers.push((collection.to_string(), tx));
        Ok(rx)
    }
}
