use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;

/// Runtime signals the UI shell forwards: network reachability and the OS
/// colour-scheme preference. Each receiver starts at the current value.
pub trait PlatformSignals: Send + Sync {
    fn connectivity(&self) -> watch::Receiver<bool>;
    fn prefers_dark(&self) -> watch::Receiver<bool>;
}

/// The element whose style class selects the dark palette.
pub trait DocumentRoot: Send + Sync {
    fn set_dark_class(&self, dark: bool);
}

/// Signals driven by hand, e.g. from a native shell's callbacks.
pub struct ManualPlatform {
    online: watch::Sender<bool>,
    dark: watch::Sender<bool>,
}

impl ManualPlatform {
    #[must_use]
    pub fn new(online: bool, prefers_dark: bool) -> Self {
        Self {
            online: watch::Sender::new(online),
            dark: watch::Sender::new(prefers_dark),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    pub fn set_prefers_dark(&self, dark: bool) {
        self.dark.send_replace(dark);
    }
}

impl PlatformSignals for ManualPlatform {
    fn connectivity(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    fn prefers_dark(&self) -> watch::Receiver<bool> {
        self.dark.subscribe()
    }
}

#[derive(Default)]
pub struct RecordingRoot {
    dark: AtomicBool,
    applied: AtomicUsize,
}

impl RecordingRoot {
    #[must_use]
    pub fn has_dark_class(&self) -> bool {
        self.dark.load(Ordering::SeqCst)
    }

    /// How many times the class was (re)applied.
    #[must_use]
    pub fn apply_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

impl DocumentRoot for RecordingRoot {
    fn set_dark_class(&self, dark: bool) {
        self.dark.store(dark, Ordering::SeqCst);
        self.applied.fetch_add(1, Ordering::SeqCst);
    }
}
