//! Build identification stamped in at compile time.
//!
//! CI sets the `WOOL_TRACKER_*` variables below; local builds fall back to
//! `dev` and unknown timestamps.

use serde::Serialize;

use crate::UnixTimeMs;

const SHORT_HASH_LEN: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: &'static str,
    pub build_number: &'static str,
    pub commit_hash: &'static str,
    pub environment: &'static str,
    pub commit_time: Option<UnixTimeMs>,
    pub build_time: Option<UnixTimeMs>,
}

fn parse_ms(raw: Option<&str>) -> Option<UnixTimeMs> {
    raw.and_then(|s| s.trim().parse().ok()).map(UnixTimeMs)
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            build_number: option_env!("WOOL_TRACKER_BUILD_NUMBER").unwrap_or("dev"),
            commit_hash: option_env!("WOOL_TRACKER_COMMIT_HASH").unwrap_or("dev"),
            environment: option_env!("WOOL_TRACKER_ENVIRONMENT").unwrap_or("development"),
            commit_time: parse_ms(option_env!("WOOL_TRACKER_COMMIT_TIME_MS")),
            build_time: parse_ms(option_env!("WOOL_TRACKER_BUILD_TIME_MS")),
        }
    }

    #[must_use]
    pub fn short_commit_hash(&self) -> &str {
        self.commit_hash
            .get(..SHORT_HASH_LEN)
            .unwrap_or(self.commit_hash)
    }

    /// `v{version}.{build} ({hash})`
    #[must_use]
    pub fn build_label(&self) -> String {
        format!(
            "v{}.{} ({})",
            self.version,
            self.build_number,
            self.short_commit_hash()
        )
    }

    #[must_use]
    pub fn time_since_commit(&self, now: UnixTimeMs) -> String {
        self.commit_time
            .map_or_else(|| "Unknown".to_string(), |t| format_time_since(now.elapsed_since(t)))
    }

    #[must_use]
    pub fn time_since_build(&self, now: UnixTimeMs) -> String {
        self.build_time
            .map_or_else(|| "Unknown".to_string(), |t| format_time_since(now.elapsed_since(t)))
    }

    /// Seconds between the commit and the build, when both are known.
    #[must_use]
    pub fn commit_to_build_secs(&self) -> Option<u64> {
        match (self.commit_time, self.build_time) {
            (Some(commit), Some(build)) => Some(build.elapsed_since(commit) / 1000),
            _ => None,
        }
    }
}

/// Rounded relative age: minutes below an hour, hours below a day, then days.
#[must_use]
pub fn format_time_since(elapsed_ms: u64) -> String {
    let minutes = (elapsed_ms + 30_000) / 60_000;
    if minutes < 60 {
        format!("{minutes} minutes ago")
    } else if minutes < 1440 {
        format!("{} hours ago", (minutes + 30) / 60)
    } else {
        format!("{} days ago", (minutes + 720) / 1440)
    }
}

#[must_use]
pub fn format_time_lapse(seconds: Option<u64>) -> String {
    match seconds {
        None => "Unknown".to_string(),
        Some(s) if s < 60 => format!("{s}s"),
        Some(s) if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        Some(s) => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
