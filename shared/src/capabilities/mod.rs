//! Contracts of the external collaborators the containers consume, plus
//! in-process implementations of each.

mod auth;
mod documents;
mod kv;
mod platform;

pub use self::auth::{AuthError, AuthProvider, AuthStateStream, AuthUser, ScriptedAuthProvider};
pub use self::documents::{
    ClientDocument, DocumentStore, DocumentUpdate, InMemoryDocumentStore, RemoteDocument,
    RemoteError, RemoteTimestamp, SnapshotStream,
};
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use self::kv::SqliteKvStore;
pub use self::kv::{load_json, store_json, FileKvStore, KeyValueStore, KvError, KvKey, MemoryKvStore};
pub use self::platform::{DocumentRoot, ManualPlatform, PlatformSignals, RecordingRoot};

use std::sync::Arc;

/// Everything the containers reach outside the process for.
#[derive(Clone)]
pub struct Capabilities {
    pub documents: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub kv: Arc<dyn KeyValueStore>,
    pub platform: Arc<dyn PlatformSignals>,
    pub root: Arc<dyn DocumentRoot>,
}

pub mod testing {
    use super::*;

    /// In-process collaborators with their concrete handles kept so tests can
    /// inject failures and drive platform signals.
    pub struct TestCapabilities {
        pub documents: Arc<InMemoryDocumentStore>,
        pub auth: Arc<ScriptedAuthProvider>,
        pub kv: Arc<MemoryKvStore>,
        pub platform: Arc<ManualPlatform>,
        pub root: Arc<RecordingRoot>,
    }

    impl TestCapabilities {
        #[must_use]
        pub fn new() -> Self {
            Self {
                documents: Arc::new(InMemoryDocumentStore::new()),
                auth: Arc::new(ScriptedAuthProvider::new()),
                kv: Arc::new(MemoryKvStore::new()),
                platform: Arc::new(ManualPlatform::new(true, false)),
                root: Arc::new(RecordingRoot::default()),
            }
        }

        #[must_use]
        pub fn capabilities(&self) -> Capabilities {
            Capabilities {
                documents: self.documents.clone(),
                auth: self.auth.clone(),
                kv: self.kv.clone(),
                platform: self.platform.clone(),
                root: self.root.clone(),
            }
        }
    }

    impl Default for TestCapabilities {
        fn default() -> Self {
            Self::new()
        }
    }
}
