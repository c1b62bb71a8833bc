use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::capabilities::{AuthError, AuthUser, RemoteDocument, RemoteError};
use crate::MOCK_ID_PREFIX;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

typed_id!(ClientId);
typed_id!(ToastId);
typed_id!(UserId);

impl ClientId {
    /// Identifier from the local fallback sequence.
    #[must_use]
    pub fn mock(seq: u64) -> Self {
        Self(format!("{MOCK_ID_PREFIX}{seq}"))
    }

    /// Sequence number when this is a local fallback identifier.
    #[must_use]
    pub fn mock_sequence(&self) -> Option<u64> {
        self.0.strip_prefix(MOCK_ID_PREFIX)?.parse().ok()
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.mock_sequence().is_some()
    }
}

impl ToastId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

// --- Inbound notifications from external collaborators ---

/// Emission of the remote change subscription. Each snapshot carries the full
/// current contents of the ordered query, never a diff.
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotEvent {
    Snapshot(Vec<RemoteDocument>),
    Error(RemoteError),
}

/// Emission of the identity provider's auth-state channel.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthNotification {
    StateChanged(Option<AuthUser>),
    Error(AuthError),
}
