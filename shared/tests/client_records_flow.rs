use shared::capabilities::testing::TestCapabilities;
use shared::capabilities::{ClientDocument, RemoteError, RemoteTimestamp};
use shared::config::ENV_PREFIX;
use shared::{
    BackendConfig, Client, ClientId, ClientPatch, NewClient, Services, StorageMode, StoreConfig,
    SyncStatus, UnixTimeMs, CLIENTS_COLLECTION, CLIENTS_STORAGE_KEY,
};

fn configured_backend() -> BackendConfig {
    BackendConfig::from_lookup(|name| {
        let value = match name.strip_prefix(ENV_PREFIX)? {
            "API_KEY" => "AIzaSyD-test-key",
            "AUTH_DOMAIN" => "wool-tracker.firebaseapp.com",
            "PROJECT_ID" => "wool-tracker",
            "STORAGE_BUCKET" => "wool-tracker.appspot.com",
            "MESSAGING_SENDER_ID" => "998877665544",
            "APP_ID" => "1:998877665544:web:0f1e2d",
            _ => return None,
        };
        Some(value.to_string())
    })
}

fn names(services: &Services) -> Vec<String> {
    services.clients.clients().into_iter().map(|c| c.name).collect()
}

fn toast_titles(services: &Services) -> Vec<String> {
    services.app.toasts().into_iter().map(|t| t.title).collect()
}

#[tokio::test]
async fn records_round_trip_through_the_backend() {
    let caps = TestCapabilities::new();
    let services = Services::new(configured_backend(), StoreConfig::default(), caps.capabilities())
        .await
        .unwrap();
    services.start().await;
    assert!(services.is_listening());

    // 1. Add out of order, list comes back sorted
    let clients = &services.clients;
    let wattle = clients
        .add(NewClient::new("Wattle Creek", "SA").contact("Ian Moss", "08 8555 0199"))
        .await
        .unwrap();
    clients.add(NewClient::new("acacia Downs", "QLD")).await.unwrap();
    clients
        .add(NewClient::new("Green Valley", "VIC").notes("Gate code 4411"))
        .await
        .unwrap();
    assert_eq!(names(&services), vec!["acacia Downs", "Green Valley", "Wattle Creek"]);
    assert_eq!(caps.documents.len(CLIENTS_COLLECTION), 3);
    assert_eq!(services.app.pending_writes(), 0);

    // 2. Read back what was written
    let fetched = clients.get_by_id(&wattle.id).await.unwrap();
    assert_eq!(fetched.contact_name, "Ian Moss");
    assert_eq!(fetched.phone, "08 8555 0199");

    // 3. Rename moves the record in the ordering
    clients
        .update(&wattle.id, ClientPatch::default().name("Banksia Hill"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(names(&services), vec!["acacia Downs", "Banksia Hill", "Green Valley"]);

    // 4. Another device writes; the live snapshot replaces the list
    let mut rx = clients.subscribe();
    caps.documents.insert_external(
        CLIENTS_COLLECTION,
        "other-device",
        ClientDocument::from_new(NewClient::new("Coolabah Station", "NSW"), RemoteTimestamp::now()),
    );
    rx.wait_for(|s| s.clients.len() == 4).await.unwrap();
    assert_eq!(
        names(&services),
        vec!["acacia Downs", "Banksia Hill", "Coolabah Station", "Green Valley"]
    );

    // 5. Deleting an unknown id changes nothing
    let before = clients.clients();
    assert!(clients.delete(&ClientId::new("missing")).await.unwrap().is_none());
    assert_eq!(clients.clients(), before);

    let removed = clients.delete(&wattle.id).await.unwrap().unwrap();
    assert_eq!(removed.name, "Banksia Hill");
    assert_eq!(caps.documents.len(CLIENTS_COLLECTION), 3);
    assert_eq!(services.app.sync_status(), SyncStatus::Synced);

    services.shutdown();
    assert!(!services.is_listening());
}

#[tokio::test]
async fn demo_mode_reads_and_writes_local_storage() {
    let caps = TestCapabilities::new();
    let stored = vec![Client::from_new(
        ClientId::mock(7),
        NewClient::new("Sunrise Farm", "NSW"),
        UnixTimeMs(1_700_000_000_000),
    )];
    caps.kv
        .insert_raw(CLIENTS_STORAGE_KEY, &serde_json::to_string(&stored).unwrap());

    let services = Services::new(BackendConfig::default(), StoreConfig::default(), caps.capabilities())
        .await
        .unwrap();
    services.start().await;

    assert_eq!(services.clients.clients(), stored);
    assert_eq!(services.app.sync_status(), SyncStatus::Offline);
    assert!(toast_titles(&services).contains(&"Development Mode".to_string()));
    assert_eq!(caps.auth.sign_in_calls(), 0);
    assert_eq!(caps.documents.calls(), 0);

    // Identifiers continue after the largest persisted one
    let added = services
        .clients
        .add(NewClient::new("Banksia Hill", "VIC"))
        .await
        .unwrap();
    assert_eq!(added.id, ClientId::mock(8));
    drop(services);

    // A fresh session sees both records
    let services = Services::new(BackendConfig::default(), StoreConfig::default(), caps.capabilities())
        .await
        .unwrap();
    services.start().await;
    assert_eq!(names(&services), vec!["Banksia Hill", "Sunrise Farm"]);
}

#[tokio::test]
async fn empty_demo_storage_is_seeded_when_enabled() {
    let caps = TestCapabilities::new();
    let config = StoreConfig {
        seed_demo_data: true,
        ..StoreConfig::default()
    };
    let services = Services::new(BackendConfig::default(), config, caps.capabilities())
        .await
        .unwrap();
    services.start().await;

    let clients = services.clients.clients();
    assert_eq!(clients.len(), 3);
    assert!(clients.iter().all(|c| c.id.is_local()));
    assert!(shared::model::is_sorted_by_name(&clients));
}

#[tokio::test]
async fn outage_falls_back_to_device_then_recovers() {
    let caps = TestCapabilities::new();
    caps.documents.set_failure(Some(RemoteError::unavailable()));
    let services = Services::new(configured_backend(), StoreConfig::default(), caps.capabilities())
        .await
        .unwrap();
    services.start().await;

    // 1. Load and subscription both fail over
    assert_eq!(services.clients.repository().mode(), StorageMode::Local);
    let titles = toast_titles(&services);
    assert!(titles.contains(&"Using offline mode".to_string()));
    assert!(titles.contains(&"Live updates unavailable".to_string()));
    assert!(!services.is_listening());

    // 2. Writes land on the device
    let added = services
        .clients
        .add(NewClient::new("Sunrise Farm", "NSW"))
        .await
        .unwrap();
    assert!(added.id.is_local());
    assert!(toast_titles(&services).contains(&"Client saved locally".to_string()));
    assert!(caps.kv.raw(CLIENTS_STORAGE_KEY).is_some());

    // 3. Backend returns; the next load switches back to the remote dataset
    caps.documents.set_failure(None);
    services.clients.fetch_all().await;
    assert_eq!(services.clients.repository().mode(), StorageMode::Remote);
    assert_eq!(services.app.sync_status(), SyncStatus::Synced);
    assert_eq!(services.clients.total_clients(), 0);
    assert!(caps.documents.is_empty(CLIENTS_COLLECTION));
}

#[tokio::test]
async fn rejected_write_surfaces_to_caller() {
    let caps = TestCapabilities::new();
    let services = Services::new(configured_backend(), StoreConfig::default(), caps.capabilities())
        .await
        .unwrap();
    services.start().await;

    caps.documents
        .set_failure(Some(RemoteError::new("permission-denied", "Missing or insufficient permissions.")));
    let err = services
        .clients
        .add(NewClient::new("Sunrise Farm", "NSW"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), shared::ErrorKind::PermissionDenied);
    assert_eq!(services.app.sync_status(), SyncStatus::Error);
    assert_eq!(services.clients.repository().mode(), StorageMode::Remote);
    assert!(services.clients.clients().is_empty());
}
