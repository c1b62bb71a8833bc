use std::time::Duration;

use shared::capabilities::testing::TestCapabilities;
use shared::capabilities::AuthError;
use shared::config::ENV_PREFIX;
use shared::{
    AuthStatus, BackendConfig, NewToast, Services, StoreConfig, Theme, ToastKind,
    THEME_STORAGE_KEY,
};

fn configured_backend() -> BackendConfig {
    BackendConfig::from_lookup(|name| {
        let value = match name.strip_prefix(ENV_PREFIX)? {
            "API_KEY" => "AIzaSyD-test-key",
            "PROJECT_ID" => "wool-tracker",
            _ => "wool-tracker.firebaseapp.com",
        };
        Some(value.to_string())
    })
}

async fn started(caps: &TestCapabilities, backend: BackendConfig) -> Services {
    let services = Services::new(backend, StoreConfig::default(), caps.capabilities())
        .await
        .unwrap();
    services.start().await;
    services
}

#[tokio::test(start_paused = true)]
async fn start_signs_in_anonymously() {
    let caps = TestCapabilities::new();
    let services = started(&caps, configured_backend()).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(services.auth.is_authenticated());
    assert_eq!(caps.auth.sign_in_calls(), 1);

    let toasts = services.app.toasts();
    let success = toasts
        .iter()
        .find(|t| t.title == "Authentication successful")
        .unwrap();
    assert_eq!(success.duration, Duration::from_millis(3000));

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert!(services.app.toasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn network_failures_retry_three_times_then_give_up() {
    let caps = TestCapabilities::new();
    caps.auth.push_failures(&AuthError::network(), 4);
    let services = started(&caps, configured_backend()).await;

    // Attempts at 0s, 1s, 3s, 7s
    tokio::time::sleep(Duration::from_millis(7_500)).await;
    assert_eq!(caps.auth.sign_in_calls(), 4);
    let state = services.auth.state();
    assert_eq!(state.status, AuthStatus::Error);
    assert_eq!(state.retry_count, 3);
    assert!(!services.auth.has_pending_retry());

    let failures: Vec<_> = services
        .app
        .toasts()
        .into_iter()
        .filter(|t| t.kind == ToastKind::Error)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].title, "Authentication failed");
    assert!(failures[0]
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("internet connection"));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(caps.auth.sign_in_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn demo_mode_never_signs_in() {
    let caps = TestCapabilities::new();
    let services = started(&caps, BackendConfig::default()).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(caps.auth.sign_in_calls(), 0);
    assert!(!services.auth.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn toasts_dismiss_on_their_own_schedule() {
    let caps = TestCapabilities::new();
    let services = started(&caps, BackendConfig::default()).await;
    let app = &services.app;
    for toast in app.toasts() {
        app.remove_toast(&toast.id);
    }

    let quick = app.add_toast(NewToast::info("Saved").duration(Duration::from_millis(100)));
    let sticky = app.add_toast(NewToast::warning("Read me").sticky());
    let default = app.add_toast(NewToast::success("Done"));

    tokio::time::sleep(Duration::from_millis(99)).await;
    assert!(app.toasts().iter().any(|t| t.id == quick));

    tokio::time::sleep(Duration::from_millis(2)).await;
    let ids: Vec<_> = app.toasts().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![sticky.clone(), default]);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let ids: Vec<_> = app.toasts().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![sticky.clone()]);

    assert!(app.remove_toast(&sticky));
    assert!(!app.remove_toast(&sticky));
}

#[tokio::test]
async fn theme_survives_restart_and_follows_os() {
    let caps = TestCapabilities::new();
    let services = started(&caps, BackendConfig::default()).await;
    services.theme.set_theme(Theme::Dark).await;
    assert_eq!(caps.kv.raw(THEME_STORAGE_KEY).as_deref(), Some("dark"));
    drop(services);

    // 1. Preference restored before start, applied on start
    let services = Services::new(BackendConfig::default(), StoreConfig::default(), caps.capabilities())
        .await
        .unwrap();
    assert_eq!(services.theme.theme(), Theme::Dark);
    services.start().await;
    assert!(caps.root.has_dark_class());

    // 2. System follows the OS signal
    services.theme.set_theme(Theme::System).await;
    assert!(!caps.root.has_dark_class());
    let mut rx = services.theme.subscribe();
    caps.platform.set_prefers_dark(true);
    rx.wait_for(|s| s.system_prefers_dark).await.unwrap();
    tokio::task::yield_now().await;
    assert!(services.theme.is_dark());
    assert!(caps.root.has_dark_class());
}

#[tokio::test]
async fn connectivity_is_mirrored() {
    let caps = TestCapabilities::new();
    let services = started(&caps, BackendConfig::default()).await;
    assert!(services.app.is_online());

    let mut rx = services.app.subscribe();
    caps.platform.set_online(false);
    rx.wait_for(|s| !s.is_online).await.unwrap();
    assert!(!services.app.is_online());
}
