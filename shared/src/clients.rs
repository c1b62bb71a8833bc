use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::app_state::{AppStore, NewToast, SyncStatus};
use crate::capabilities::SnapshotStream;
use crate::event::{ClientId, SnapshotEvent};
use crate::model::{
    filter_clients, sort_by_name, unique_regions, Client, ClientFilter, ClientPatch, NewClient,
    ValidationError,
};
use crate::repository::{ClientRepository, FallbackReason, Origin, RepositoryError, Stored};
use crate::{ErrorKind, UnixTimeMs};

const CHECK_CONNECTION: &str = "Please check your connection and try again.";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientsState {
    /// Always name-ordered.
    pub clients: Vec<Client>,
    pub is_loading: bool,
    pub filter: ClientFilter,
}

impl ClientsState {
    #[must_use]
    pub fn filtered(&self) -> Vec<Client> {
        filter_clients(&self.clients, &self.filter)
    }

    #[must_use]
    pub fn regions(&self) -> Vec<String> {
        unique_regions(&self.clients)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.clients.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientsError {
    #[error("invalid client: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ClientsError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Unknown,
            Self::Repository(e) => e.kind(),
        }
    }
}

/// Toast body for a failed operation, telling connectivity apart from
/// configuration problems.
fn failure_message(kind: ErrorKind) -> String {
    if kind.is_connectivity() {
        CHECK_CONNECTION.to_string()
    } else {
        kind.user_facing_message().to_string()
    }
}

fn status_for(origin: &Origin) -> SyncStatus {
    match origin {
        Origin::Remote => SyncStatus::Synced,
        Origin::Local(_) => SyncStatus::Offline,
    }
}

struct ListenerSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

struct ClientsInner {
    state: watch::Sender<ClientsState>,
    repo: ClientRepository,
    app: AppStore,
    listener: Mutex<Option<ListenerSlot>>,
    generation: AtomicU64,
}

impl ClientsInner {
    fn listener(&self) -> MutexGuard<'_, Option<ListenerSlot>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upsert(&self, client: Client) {
        self.state.send_modify(|s| {
            // The live snapshot may already carry the record.
            match s.clients.iter_mut().find(|c| c.id == client.id) {
                Some(existing) => *existing = client,
                None => s.clients.push(client),
            }
            sort_by_name(&mut s.clients);
        });
    }

    fn apply_snapshot(&self, clients: Vec<Client>) {
        let mut loading = false;
        self.state.send_modify(|s| {
            s.clients = clients;
            loading = s.is_loading;
        });
        if !loading {
            self.app.set_sync_status(SyncStatus::Synced);
        }
    }
}

impl Drop for ClientsInner {
    fn drop(&mut self) {
        if let Some(slot) = self.listener().take() {
            slot.handle.abort();
        }
    }
}

/// Unsubscribe handle of the real-time listener. Dropping it leaves the
/// listener running; it stops on `unsubscribe`, on a stream error, or when
/// the container is torn down.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    target: Option<(Weak<ClientsInner>, u64)>,
}

impl ListenerHandle {
    /// Handle that owns nothing; used when there is no backend to listen to.
    #[must_use]
    pub fn noop() -> Self {
        Self { target: None }
    }

    pub fn unsubscribe(&self) {
        let Some((weak, generation)) = &self.target else {
            return;
        };
        let Some(inner) = weak.upgrade() else { return };
        let mut slot = inner.listener();
        if slot.as_ref().is_some_and(|s| s.generation == *generation) {
            if let Some(s) = slot.take() {
                s.handle.abort();
                info!("realtime listener unsubscribed");
            }
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        let Some((weak, generation)) = &self.target else {
            return false;
        };
        weak.upgrade().is_some_and(|inner| {
            inner
                .listener()
                .as_ref()
                .is_some_and(|s| s.generation == *generation && !s.handle.is_finished())
        })
    }
}

/// Client Records container.
#[derive(Clone)]
pub struct ClientsStore {
    inner: Arc<ClientsInner>,
}

impl ClientsStore {
    #[must_use]
    pub fn new(repo: ClientRepository, app: AppStore) -> Self {
        Self {
            inner: Arc::new(ClientsInner {
                state: watch::Sender::new(ClientsState::default()),
                repo,
                app,
                listener: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn repository(&self) -> &ClientRepository {
        &self.inner.repo
    }

    #[must_use]
    pub fn state(&self) -> ClientsState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClientsState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn clients(&self) -> Vec<Client> {
        self.inner.state.borrow().clients.clone()
    }

    #[must_use]
    pub fn filtered_clients(&self) -> Vec<Client> {
        self.inner.state.borrow().filtered()
    }

    #[must_use]
    pub fn regions(&self) -> Vec<String> {
        self.inner.state.borrow().regions()
    }

    #[must_use]
    pub fn total_clients(&self) -> usize {
        self.inner.state.borrow().total()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    /// Loads the full record set. Never fails: errors leave the list as it
    /// was and surface through the sync status and a toast.
    #[instrument(skip(self))]
    pub async fn fetch_all(&self) {
        let app = &self.inner.app;
        self.inner.state.send_modify(|s| s.is_loading = true);
        app.set_sync_status(SyncStatus::Syncing);

        match self.inner.repo.load_all().await {
            Ok(Stored { value, origin }) => {
                info!(count = value.len(), local = origin.is_local(), "clients loaded");
                self.inner.state.send_modify(|s| s.clients = value);
                app.set_sync_status(status_for(&origin));
                match origin {
                    Origin::Remote => {}
                    Origin::Local(FallbackReason::Unconfigured) => {
                        app.add_toast(NewToast::warning("Development Mode").message(
                            "Using local storage for client data. Configure Firebase for production.",
                        ));
                    }
                    Origin::Local(reason @ FallbackReason::Unreachable(_)) => {
                        let message = if reason.is_connectivity() {
                            "Connection unavailable. Using local storage."
                        } else {
                            "Firebase unavailable. Using local storage."
                        };
                        app.add_toast(NewToast::warning("Using offline mode").message(message));
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "failed to load clients");
                app.set_sync_status(SyncStatus::Error);
                app.add_toast(
                    NewToast::error("Failed to load clients").message(failure_message(e.kind())),
                );
            }
        }

        self.inner.state.send_modify(|s| s.is_loading = false);
    }

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn add(&self, new: NewClient) -> Result<Client, ClientsError> {
        new.validate()?;
        let app = &self.inner.app;
        let name = new.name.clone();

        app.begin_write();
        app.set_sync_status(SyncStatus::Syncing);
        let result = self.inner.repo.create(new).await;
        app.end_write();

        match result {
            Ok(Stored {
                value: client,
                origin,
            }) => {
                self.inner.upsert(client.clone());
                app.set_sync_status(status_for(&origin));
                app.add_toast(match &origin {
                    Origin::Remote => NewToast::success("Client added")
                        .message(format!("{name} has been added successfully.")),
                    Origin::Local(FallbackReason::Unconfigured) => {
                        NewToast::success("Client added (offline)")
                            .message(format!("{name} has been added to local storage."))
                    }
                    Origin::Local(FallbackReason::Unreachable(_)) => {
                        NewToast::warning("Client saved locally")
                            .message(format!("{name} saved locally. It will not sync until Firebase is reachable."))
                    }
                });
                Ok(client)
            }
            Err(e) => {
                error!(error = %e, "failed to add client");
                app.set_sync_status(SyncStatus::Error);
                app.add_toast(
                    NewToast::error("Failed to add client").message(failure_message(e.kind())),
                );
                Err(e.into())
            }
        }
    }

    /// Returns the updated record, or `None` when the dataset that owns `id`
    /// has no such record. A record the list does not hold yet is read back
    /// from the repository and inserted.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        id: &ClientId,
        patch: ClientPatch,
    ) -> Result<Option<Client>, ClientsError> {
        patch.validate()?;
        let app = &self.inner.app;
        let now = UnixTimeMs::now();

        app.begin_write();
        app.set_sync_status(SyncStatus::Syncing);
        let result = self.inner.repo.update(id, &patch, now).await;
        app.end_write();

        match result {
            Ok(Stored {
                value: found,
                origin,
            }) => {
                let mut updated = None;
                if found {
                    self.inner.state.send_if_modified(|s| {
                        let Some(c) = s.clients.iter_mut().find(|c| &c.id == id) else {
                            return false;
                        };
                        patch.apply(c, now);
                        updated = Some(c.clone());
                        sort_by_name(&mut s.clients);
                        true
                    });
                    if updated.is_none() {
                        updated = self.read_back(id).await;
                    }
                }
                app.set_sync_status(status_for(&origin));
                if updated.is_some() {
                    app.add_toast(match &origin {
                        Origin::Remote => NewToast::success("Client updated")
                            .message("Client information has been updated successfully."),
                        Origin::Local(FallbackReason::Unconfigured) => {
                            NewToast::success("Client updated (offline)")
                                .message("Client information has been updated locally.")
                        }
                        Origin::Local(FallbackReason::Unreachable(_)) => {
                            NewToast::warning("Client updated locally")
                                .message("Changes are saved on this device only.")
                        }
                    });
                } else {
                    debug!(%id, "update target not found");
                }
                Ok(updated)
            }
            Err(e) => {
                error!(error = %e, "failed to update client");
                app.set_sync_status(SyncStatus::Error);
                app.add_toast(
                    NewToast::error("Failed to update client").message(failure_message(e.kind())),
                );
                Err(e.into())
            }
        }
    }

    /// Removes a record. Absent ids are a no-op and return `None`.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &ClientId) -> Result<Option<Client>, ClientsError> {
        let app = &self.inner.app;

        app.begin_write();
        app.set_sync_status(SyncStatus::Syncing);
        let result = self.inner.repo.delete(id).await;
        app.end_write();

        match result {
            Ok(Stored {
                value: deleted,
                origin,
            }) => {
                let mut removed = None;
                if deleted {
                    self.inner.state.send_if_modified(|s| {
                        let index = s.clients.iter().position(|c| &c.id == id);
                        removed = index.map(|i| s.clients.remove(i));
                        removed.is_some()
                    });
                } else {
                    debug!(%id, "delete target not found");
                }
                app.set_sync_status(status_for(&origin));
                if let Some(client) = &removed {
                    let title = if origin.is_local() {
                        "Client deleted (offline)"
                    } else {
                        "Client deleted"
                    };
                    app.add_toast(
                        NewToast::success(title)
                            .message(format!("{} has been deleted.", client.name)),
                    );
                }
                Ok(removed)
            }
            Err(e) => {
                error!(error = %e, "failed to delete client");
                app.set_sync_status(SyncStatus::Error);
                app.add_toast(
                    NewToast::error("Failed to delete client").message(failure_message(e.kind())),
                );
                Err(e.into())
            }
        }
    }

    async fn read_back(&self, id: &ClientId) -> Option<Client> {
        match self.inner.repo.get(id).await {
            Ok(Some(client)) => {
                self.inner.upsert(client.clone());
                Some(client)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "updated client could not be read back");
                None
            }
        }
    }

    /// Point lookup; errors degrade to `None` plus a toast.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: &ClientId) -> Option<Client> {
        match self.inner.repo.get(id).await {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "failed to get client");
                self.inner.app.set_sync_status(SyncStatus::Error);
                self.inner.app.add_toast(
                    NewToast::error("Failed to load client").message(failure_message(e.kind())),
                );
                None
            }
        }
    }

    pub fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.inner.state.send_modify(|s| s.filter.search = query);
    }

    pub fn set_selected_region(&self, region: impl Into<String>) {
        let region = region.into();
        self.inner.state.send_modify(|s| s.filter.region = region);
    }

    pub fn clear_filters(&self) {
        self.inner
            .state
            .send_modify(|s| s.filter = ClientFilter::default());
    }

    /// Subscribes to the name-ordered change stream. Every snapshot replaces
    /// the list wholesale, including over a manual load still in flight.
    /// Starting a new listener stops the previous one.
    pub fn start_realtime_listener(&self) -> ListenerHandle {
        let rx = match self.inner.repo.subscribe() {
            Ok(Some(rx)) => rx,
            Ok(None) => {
                info!("backend not configured, skipping realtime listener");
                return ListenerHandle::noop();
            }
            Err(e) => {
                error!(code = %e.code, "failed to start realtime listener: {}", e.message);
                self.inner.app.set_sync_status(SyncStatus::Error);
                self.inner.app.add_toast(
                    NewToast::error("Live updates unavailable")
                        .message(failure_message(e.kind()))
                        .sticky(),
                );
                return ListenerHandle::noop();
            }
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, realtime listener not started");
            return ListenerHandle::noop();
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(&self.inner);
        let mut slot = self.inner.listener();
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }
        *slot = Some(ListenerSlot {
            generation,
            handle: runtime.spawn(run_listener(weak.clone(), rx)),
        });
        info!(generation, "realtime listener started");

        ListenerHandle {
            target: Some((weak, generation)),
        }
    }

    pub fn teardown(&self) {
        if let Some(slot) = self.inner.listener().take() {
            slot.handle.abort();
        }
    }
}

async fn run_listener(weak: Weak<ClientsInner>, mut rx: SnapshotStream) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        match event {
            SnapshotEvent::Snapshot(docs) => {
                let mut clients: Vec<Client> = docs.into_iter().map(|d| d.into_client()).collect();
                sort_by_name(&mut clients);
                debug!(count = clients.len(), "applying snapshot");
                inner.repo.resume_remote();
                inner.apply_snapshot(clients);
            }
            SnapshotEvent::Error(e) => {
                error!(code = %e.code, "realtime listener failed: {}", e.message);
                inner.app.set_sync_status(SyncStatus::Error);
                inner.app.add_toast(
                    NewToast::error("Live updates stopped")
                        .message(failure_message(e.kind()))
                        .sticky(),
                );
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::ToastKind;
    use crate::capabilities::{
        ClientDocument, InMemoryDocumentStore, MemoryKvStore, RemoteError, RemoteTimestamp,
    };
    use crate::config::StoreConfig;
    use crate::model::is_sorted_by_name;
    use proptest::prelude::*;

    struct Fixture {
        documents: Arc<InMemoryDocumentStore>,
        kv: Arc<MemoryKvStore>,
        app: AppStore,
        store: ClientsStore,
    }

    fn fixture(configured: bool) -> Fixture {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let kv = Arc::new(MemoryKvStore::new());
        let app = AppStore::default();
        let repo = ClientRepository::new(
            documents.clone(),
            kv.clone(),
            &StoreConfig::default(),
            configured,
        )
        .unwrap();
        Fixture {
            documents,
            kv,
            store: ClientsStore::new(repo, app.clone()),
            app,
        }
    }

    fn farm(name: &str, region: &str) -> NewClient {
        NewClient::new(name, region)
            .contact("Margaret Ellis", "0268 555 120")
            .address("14 Boundary Lane")
    }

    fn last_toast(app: &AppStore) -> (ToastKind, String) {
        let toasts = app.toasts();
        let t = toasts.last().expect("a toast");
        (t.kind, t.title.clone())
    }

    mod crud_tests {
        use super::*;

        #[tokio::test]
        async fn add_then_get_returns_input_with_timestamps() {
            for configured in [true, false] {
                let f = fixture(configured);
                let input = farm("Sunrise Farm", "NSW").email("m@sunrise.example");
                let added = f.store.add(input.clone()).await.unwrap();

                let fetched = f.store.get_by_id(&added.id).await.unwrap();
                assert_eq!(fetched.to_new(), input);
                assert!(fetched.created_at.as_millis() > 0);
                assert_eq!(fetched.created_at, fetched.updated_at);
                assert_eq!(f.store.total_clients(), 1);
                assert_eq!(f.app.pending_writes(), 0);
            }
        }

        #[tokio::test]
        async fn list_stays_sorted_after_mutations() {
            let f = fixture(true);
            let a = f.store.add(farm("Wattle Creek", "SA")).await.unwrap();
            f.store.add(farm("acacia Downs", "QLD")).await.unwrap();
            f.store.add(farm("Green Valley", "VIC")).await.unwrap();
            assert!(is_sorted_by_name(&f.store.clients()));

            let renamed = f
                .store
                .update(&a.id, ClientPatch::default().name("Banksia Hill"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(renamed.name, "Banksia Hill");
            assert!(renamed.updated_at >= renamed.created_at);
            let names: Vec<_> = f.store.clients().into_iter().map(|c| c.name).collect();
            assert_eq!(names, vec!["acacia Downs", "Banksia Hill", "Green Valley"]);
        }

        #[tokio::test]
        async fn delete_of_absent_id_is_a_no_op() {
            let f = fixture(true);
            f.store.add(farm("Sunrise Farm", "NSW")).await.unwrap();
            let before = f.store.clients();
            let toasts_before = f.app.toasts().len();

            let removed = f.store.delete(&ClientId::new("nope")).await.unwrap();
            assert!(removed.is_none());
            assert_eq!(f.store.clients(), before);
            assert_eq!(f.app.toasts().len(), toasts_before);
            assert_eq!(f.app.sync_status(), SyncStatus::Synced);
        }

        #[tokio::test]
        async fn delete_removes_and_toasts() {
            let f = fixture(false);
            let added = f.store.add(farm("Sunrise Farm", "NSW")).await.unwrap();
            let removed = f.store.delete(&added.id).await.unwrap().unwrap();
            assert_eq!(removed.id, added.id);
            assert!(f.store.clients().is_empty());
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Success, "Client deleted (offline)".to_string())
            );
        }

        #[tokio::test]
        async fn update_before_load_returns_the_stored_record() {
            let f = fixture(true);
            f.documents.insert_external(
                "clients",
                "ext-1",
                ClientDocument::from_new(farm("Sunrise Farm", "NSW"), RemoteTimestamp::now()),
            );
            assert!(f.store.clients().is_empty());

            let updated = f
                .store
                .update(&ClientId::new("ext-1"), ClientPatch::default().phone("0400 111 222"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(updated.phone, "0400 111 222");
            assert_eq!(f.store.clients(), vec![updated]);
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Success, "Client updated".to_string())
            );
        }

        #[tokio::test]
        async fn backend_records_are_not_lost_after_falling_back() {
            let f = fixture(true);
            let remote = f.store.add(farm("Sunrise Farm", "NSW")).await.unwrap();
            f.documents.set_failure(Some(RemoteError::unavailable()));
            let device = f.store.add(farm("Green Valley", "VIC")).await.unwrap();
            assert!(device.id.is_local());

            // 1. Edit and delete of the backend record fail loudly
            let err = f
                .store
                .update(&remote.id, ClientPatch::default().phone("0400"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unavailable);
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Error, "Failed to update client".to_string())
            );
            let err = f.store.delete(&remote.id).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unavailable);
            assert_eq!(f.app.sync_status(), SyncStatus::Error);

            let listed = f.store.clients();
            let kept = listed.iter().find(|c| c.id == remote.id).unwrap();
            assert_eq!(kept.phone, remote.phone);
            assert_eq!(listed.len(), 2);
            assert_eq!(f.documents.len("clients"), 1);

            // 2. Device records still edit locally
            let renamed = f
                .store
                .update(&device.id, ClientPatch::default().name("Banksia Hill"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(renamed.name, "Banksia Hill");
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Warning, "Client updated locally".to_string())
            );

            // 3. Once reachable the same writes go through
            f.documents.set_failure(None);
            let updated = f
                .store
                .update(&remote.id, ClientPatch::default().phone("0400"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(updated.phone, "0400");
            assert_eq!(f.app.sync_status(), SyncStatus::Synced);
            let removed = f.store.delete(&remote.id).await.unwrap().unwrap();
            assert_eq!(removed.id, remote.id);
            assert!(f.documents.is_empty("clients"));
            assert_eq!(f.store.total_clients(), 1);
        }

        #[tokio::test]
        async fn update_of_absent_id_returns_none() {
            let f = fixture(false);
            let result = f
                .store
                .update(&ClientId::mock(99), ClientPatch::default().phone("1"))
                .await
                .unwrap();
            assert!(result.is_none());
        }

        #[tokio::test]
        async fn invalid_input_is_rejected_before_any_write() {
            let f = fixture(true);
            let err = f.store.add(NewClient::new("  ", "NSW")).await.unwrap_err();
            assert!(matches!(err, ClientsError::Validation(_)));
            assert_eq!(f.documents.calls(), 0);
        }

        #[tokio::test]
        async fn hard_remote_failure_is_returned_to_caller() {
            let f = fixture(true);
            f.documents
                .set_failure(Some(RemoteError::new("permission-denied", "rules")));

            let err = f.store.add(farm("Sunrise Farm", "NSW")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PermissionDenied);
            assert_eq!(f.app.sync_status(), SyncStatus::Error);
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Error, "Failed to add client".to_string())
            );
            assert!(f.store.clients().is_empty());
            assert_eq!(f.app.pending_writes(), 0);
        }

        #[tokio::test]
        async fn unreachable_add_is_saved_locally_with_warning() {
            let f = fixture(true);
            f.documents.set_failure(Some(RemoteError::unavailable()));

            let added = f.store.add(farm("Sunrise Farm", "NSW")).await.unwrap();
            assert!(added.id.is_local());
            assert_eq!(f.app.sync_status(), SyncStatus::Offline);
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Warning, "Client saved locally".to_string())
            );
            assert!(f.kv.raw(crate::CLIENTS_STORAGE_KEY).is_some());
        }

        #[tokio::test]
        async fn get_failure_degrades_to_none() {
            let f = fixture(true);
            f.documents.set_failure(Some(RemoteError::unavailable()));
            assert!(f.store.get_by_id(&ClientId::new("x")).await.is_none());
            assert_eq!(f.app.sync_status(), SyncStatus::Error);
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Error, "Failed to load client".to_string())
            );
        }
    }

    mod fetch_tests {
        use super::*;

        #[tokio::test]
        async fn unconfigured_fetch_is_offline_with_notice() {
            let f = fixture(false);
            f.store.fetch_all().await;
            assert_eq!(f.app.sync_status(), SyncStatus::Offline);
            assert!(!f.store.is_loading());
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Warning, "Development Mode".to_string())
            );
        }

        #[tokio::test]
        async fn unreachable_fetch_falls_back_to_local_list() {
            let f = fixture(true);
            let local = vec![Client::from_new(
                ClientId::mock(1),
                farm("Sunrise Farm", "NSW"),
                UnixTimeMs(1_700_000_000_000),
            )];
            f.kv.insert_raw(
                crate::CLIENTS_STORAGE_KEY,
                &serde_json::to_string(&local).unwrap(),
            );
            f.documents.set_failure(Some(RemoteError::new("deadline-exceeded", "slow")));

            f.store.fetch_all().await;
            assert_eq!(f.store.clients(), local);
            assert_eq!(f.app.sync_status(), SyncStatus::Offline);
            let toast = f.app.toasts().pop().unwrap();
            assert_eq!(toast.title, "Using offline mode");
            assert_eq!(
                toast.message.as_deref(),
                Some("Connection unavailable. Using local storage.")
            );
        }

        #[tokio::test]
        async fn configuration_failure_is_described_as_such() {
            let f = fixture(true);
            f.documents
                .set_failure(Some(RemoteError::new("invalid-api-key", "bad key")));
            f.store.fetch_all().await;
            let toast = f.app.toasts().pop().unwrap();
            assert_eq!(
                toast.message.as_deref(),
                Some("Firebase unavailable. Using local storage.")
            );
        }

        #[tokio::test]
        async fn other_failures_keep_stale_list() {
            let f = fixture(true);
            f.store.add(farm("Sunrise Farm", "NSW")).await.unwrap();
            f.documents
                .set_failure(Some(RemoteError::new("permission-denied", "rules")));

            f.store.fetch_all().await;
            assert_eq!(f.store.total_clients(), 1);
            assert_eq!(f.app.sync_status(), SyncStatus::Error);
            assert_eq!(
                last_toast(&f.app),
                (ToastKind::Error, "Failed to load clients".to_string())
            );
        }

        #[tokio::test]
        async fn remote_fetch_converts_timestamps() {
            let f = fixture(true);
            let mut data = ClientDocument::from_new(
                farm("Sunrise Farm", "NSW"),
                RemoteTimestamp {
                    seconds: 1_700_000_000,
                    nanos: 500_000_000,
                },
            );
            data.updated_at = None;
            f.documents.insert_external("clients", "abc", data);

            f.store.fetch_all().await;
            let clients = f.store.clients();
            assert_eq!(clients[0].created_at, UnixTimeMs(1_700_000_000_500));
            assert_eq!(clients[0].updated_at, clients[0].created_at);
            assert_eq!(f.app.sync_status(), SyncStatus::Synced);
        }
    }

    mod listener_tests {
        use super::*;

        #[tokio::test]
        async fn snapshots_replace_the_list() {
            let f = fixture(true);
            let mut rx = f.store.subscribe();
            let handle = f.store.start_realtime_listener();
            assert!(handle.is_active());

            f.documents.insert_external(
                "clients",
                "ext-2",
                ClientDocument::from_new(farm("Wattle Creek", "SA"), RemoteTimestamp::now()),
            );
            f.documents.insert_external(
                "clients",
                "ext-1",
                ClientDocument::from_new(farm("Green Valley", "VIC"), RemoteTimestamp::now()),
            );
            rx.wait_for(|s| s.clients.len() == 2).await.unwrap();
            let names: Vec<_> = f.store.clients().into_iter().map(|c| c.name).collect();
            assert_eq!(names, vec!["Green Valley", "Wattle Creek"]);
            assert_eq!(f.app.sync_status(), SyncStatus::Synced);
        }

        #[tokio::test]
        async fn snapshot_during_load_leaves_status_alone() {
            let f = fixture(true);
            let mut rx = f.store.subscribe();
            f.store.inner.state.send_modify(|s| s.is_loading = true);
            f.app.set_sync_status(SyncStatus::Syncing);

            let _handle = f.store.start_realtime_listener();
            f.documents.insert_external(
                "clients",
                "ext-1",
                ClientDocument::from_new(farm("Green Valley", "VIC"), RemoteTimestamp::now()),
            );
            rx.wait_for(|s| s.clients.len() == 1).await.unwrap();
            assert_eq!(f.app.sync_status(), SyncStatus::Syncing);
        }

        #[tokio::test]
        async fn stream_error_stops_listener_with_sticky_toast() {
            let f = fixture(true);
            let mut ui = f.app.subscribe();
            let handle = f.store.start_realtime_listener();

            f.documents
                .fail_subscriptions("clients", RemoteError::new("permission-denied", "revoked"));
            ui.wait_for(|s| s.sync_status == SyncStatus::Error)
                .await
                .unwrap();
            tokio::task::yield_now().await;

            assert!(!handle.is_active());
            let toast = f.app.toasts().pop().unwrap();
            assert_eq!(toast.kind, ToastKind::Error);
            assert!(toast.is_sticky());
        }

        #[tokio::test]
        async fn unsubscribe_stops_updates() {
            let f = fixture(true);
            let handle = f.store.start_realtime_listener();
            handle.unsubscribe();
            assert!(!handle.is_active());
            tokio::task::yield_now().await;

            f.documents.insert_external(
                "clients",
                "ext-1",
                ClientDocument::from_new(farm("Green Valley", "VIC"), RemoteTimestamp::now()),
            );
            tokio::task::yield_now().await;
            assert!(f.store.clients().is_empty());
            assert_eq!(f.documents.subscriber_count(), 0);
        }

        #[tokio::test]
        async fn restarting_replaces_previous_listener() {
            let f = fixture(true);
            let first = f.store.start_realtime_listener();
            let second = f.store.start_realtime_listener();
            assert!(!first.is_active());
            assert!(second.is_active());

            // the stale handle cannot stop the new listener
            first.unsubscribe();
            assert!(second.is_active());
        }

        #[tokio::test]
        async fn unconfigured_listener_is_a_no_op() {
            let f = fixture(false);
            let handle = f.store.start_realtime_listener();
            assert!(!handle.is_active());
            handle.unsubscribe();
            assert_eq!(f.documents.calls(), 0);
        }
    }

    mod filter_tests {
        use super::*;

        #[tokio::test]
        async fn filter_actions_drive_derived_views() {
            let f = fixture(false);
            f.store.add(farm("Sunrise Farm", "NSW")).await.unwrap();
            f.store.add(farm("Green Valley", "VIC")).await.unwrap();

            f.store.set_search_query("valley");
            let filtered = f.store.filtered_clients();
            assert_eq!(filtered.len(), 1);
            assert_eq!(filtered[0].name, "Green Valley");

            f.store.set_search_query("");
            f.store.set_selected_region("NSW");
            assert_eq!(f.store.filtered_clients()[0].name, "Sunrise Farm");

            f.store.set_search_query("zzz");
            assert!(f.store.filtered_clients().is_empty());

            f.store.clear_filters();
            assert_eq!(f.store.filtered_clients().len(), 2);
            assert_eq!(f.store.regions(), vec!["NSW", "VIC"]);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Rename(usize, String),
        Delete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let name = "[A-Za-z][A-Za-z ]{0,10}";
        prop_oneof![
            name.prop_map(Op::Add),
            (any::<usize>(), name).prop_map(|(i, n)| Op::Rename(i, n)),
            any::<usize>().prop_map(Op::Delete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn list_is_sorted_at_every_observation(ops in proptest::collection::vec(op_strategy(), 1..25)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let f = fixture(false);
                for op in ops {
                    let ids: Vec<ClientId> = f.store.clients().into_iter().map(|c| c.id).collect();
                    match op {
                        Op::Add(name) => {
                            f.store.add(NewClient::new(name, "NSW")).await.unwrap();
                        }
                        Op::Rename(i, name) if !ids.is_empty() => {
                            let id = &ids[i % ids.len()];
                            f.store.update(id, ClientPatch::default().name(name)).await.unwrap();
                        }
                        Op::Delete(i) if !ids.is_empty() => {
                            f.store.delete(&ids[i % ids.len()]).await.unwrap();
                        }
                        _ => {}
                    }
                    assert!(is_sorted_by_name(&f.store.clients()));
                }
            });
        }
    }
}
