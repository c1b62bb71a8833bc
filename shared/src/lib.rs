// lib.rs - client core for the wool pickup tracker

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod app_state;
pub mod auth;
pub mod capabilities;
pub mod clients;
pub mod config;
pub mod event;
pub mod model;
pub mod repository;
pub mod services;
pub mod theme;
pub mod version;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use app_state::{AppStore, NewToast, SyncStatus, Toast, ToastKind, UiState};
pub use auth::{AuthState, AuthStatus, AuthStore};
pub use capabilities::Capabilities;
pub use clients::{ClientsError, ClientsState, ClientsStore, ListenerHandle};
pub use config::{BackendConfig, ConfigError, StoreConfig};
pub use event::{AuthNotification, ClientId, SnapshotEvent, ToastId, UserId};
pub use model::{Client, ClientFilter, ClientPatch, NewClient};
pub use repository::{ClientRepository, Origin, StorageMode};
pub use services::{Services, ServicesError};
pub use theme::{ActiveTheme, Theme, ThemeStore};

pub const CLIENTS_COLLECTION: &str = "clients";
pub const CLIENTS_STORAGE_KEY: &str = "wool-tracker-mock-clients";
pub const THEME_STORAGE_KEY: &str = "wool-tracker-theme";
pub const MOCK_ID_PREFIX: &str = "mock-";

pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_millis(5000);
pub const AUTH_SUCCESS_TOAST_DURATION: Duration = Duration::from_millis(3000);
pub const AUTH_ERROR_TOAST_DURATION: Duration = Duration::from_millis(8000);
pub const DEFAULT_AUTH_MAX_RETRIES: u32 = 3;
pub const AUTH_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
}

/// Classification of provider error codes shared by the remote data service,
/// the auth provider and local persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Unavailable,
    Configuration,
    PermissionDenied,
    NotFound,
    Storage,
    Serialization,
    Unknown,
}

impl ErrorKind {
    /// Maps a provider error code onto a kind. Accepts both the `auth/`-prefixed
    /// and the bare form of each code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let code = code.strip_prefix("auth/").unwrap_or(code);
        let code = code.strip_prefix("firestore/").unwrap_or(code);

        match code {
            "network-request-failed" | "network" => Self::Network,
            "timeout" | "deadline-exceeded" => Self::Timeout,
            "unavailable" => Self::Unavailable,
            "invalid-api-key" | "project-not-found" | "app-deleted" | "invalid-argument"
            | "configuration" => Self::Configuration,
            "permission-denied" | "unauthenticated" => Self::PermissionDenied,
            "not-found" => Self::NotFound,
            "storage" => Self::Storage,
            "serialization" => Self::Serialization,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "network-request-failed",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Configuration => "invalid-api-key",
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::Storage => "storage",
            Self::Serialization => "serialization",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Unavailable | Self::Storage => {
                ErrorSeverity::Transient
            }
            Self::Configuration
            | Self::PermissionDenied
            | Self::NotFound
            | Self::Serialization
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    /// Only connectivity failures are worth retrying.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        self.is_connectivity()
    }

    #[must_use]
    pub const fn is_connectivity(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Unavailable)
    }

    #[must_use]
    pub const fn user_facing_message(self) -> &'static str {
        match self {
            Self::Network => "Network connection failed. Please check your internet connection.",
            Self::Timeout => "The request timed out. Please try again.",
            Self::Unavailable => "The service is temporarily unavailable. Please try again later.",
            Self::Configuration => "Invalid Firebase configuration. Please check your settings.",
            Self::PermissionDenied => "You do not have permission to perform this action.",
            Self::NotFound => "The requested record could not be found.",
            Self::Storage => "Could not save data on this device.",
            Self::Serialization => "Stored data could not be read.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }

    /// Kinds that send the client records into fallback mode instead of
    /// surfacing a hard failure.
    #[must_use]
    pub const fn triggers_fallback(self) -> bool {
        self.is_connectivity() || matches!(self, Self::Configuration)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Delay before retry `attempt` (zero-based): `base * 2^attempt`, capped.
#[must_use]
pub fn calculate_backoff(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch; the uniform date representation every
/// backend timestamp is converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    #[must_use]
    pub fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

impl Default for UnixTimeMs {
    fn default() -> Self {
        Self::now()
    }
}
