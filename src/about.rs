//! Build identification served on `/about`.
//!
//! Values are stamped at compile time through `BUILD_VERSION`, `BUILD_EPOCH`,
//! `BUILD_TIMESTAMP` and `BUILD_ID`; unstamped builds report `dev`.

use serde::Serialize;

/// Build metadata.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct About {
    /// Release version
    pub version: &'static str,
    /// Build epoch, `-1` when unstamped
    pub epoch: &'static str,
    /// Build identifier
    pub build: &'static str,
    /// Build time
    pub timestamp: &'static str,
}

impl About {
    /// Metadata of the running binary.
    pub const fn current() -> Self {
        Self {
            version: match option_env!("BUILD_VERSION") {
                Some(v) => v,
                None => env!("CARGO_PKG_VERSION"),
            },
            epoch: match option_env!("BUILD_EPOCH") {
                Some(v) => v,
                None => "-1",
            },
            build: match option_env!("BUILD_ID") {
                Some(v) => v,
                None => "dev",
            },
            timestamp: match option_env!("BUILD_TIMESTAMP") {
                Some(v) => v,
                None => "dev",
            },
        }
    }
}

impl std::fmt::Display for About {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version={} epoch={} build={} timestamp={}",
            self.version, self.epoch, self.build, self.timestamp
        )
    }
}
