//! Best-effort battery level reads.
//!
//! A battery read must never hold up a position sample: callers use
//! [`BatteryGauge::read_within`], which gives up after a bounded wait and
//! simply reports no level.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, trace};

/// Linux sysfs directory listing power supplies.
const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Source of the device battery level.
///
/// Enum dispatch keeps the read path async without boxing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BatteryGauge {
    /// The platform cannot report a battery level.
    #[default]
    Unavailable,
    /// A constant level, for fixed installations and tests.
    Fixed(u8),
    /// A sysfs `capacity` file (Linux).
    Sysfs(PathBuf),
}

impl BatteryGauge {
    /// Find the first battery under `/sys/class/power_supply`.
    ///
    /// Falls back to [`BatteryGauge::Unavailable`] when none is present.
    pub fn detect() -> Self {
        Self::detect_in(Path::new(POWER_SUPPLY_DIR))
    }

    /// Like [`BatteryGauge::detect`] but scanning an arbitrary directory.
    pub fn detect_in(dir: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Self::Unavailable;
        };
        let mut supplies: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        supplies.sort();

        supplies
            .into_iter()
            .find(|supply| {
                let kind = std::fs::read_to_string(supply.join("type")).unwrap_or_default();
                kind.trim() == "Battery" && supply.join("capacity").is_file()
            })
            .map_or(Self::Unavailable, |supply| {
                debug!(path = %supply.display(), "battery gauge detected");
                Self::Sysfs(supply.join("capacity"))
            })
    }

    /// Read the current level, if the platform can supply one.
    pub async fn read(&self) -> Option<u8> {
        match self {
            Self::Unavailable => None,
            Self::Fixed(level) => Some((*level).min(100)),
            Self::Sysfs(path) => {
                let raw = tokio::fs::read_to_string(path).await.ok()?;
                let level = raw.trim().parse::<u8>().ok()?;
                Some(level.min(100))
            }
        }
    }

    /// Read the level, giving up after `limit`.
    pub async fn read_within(&self, limit: Duration) -> Option<u8> {
        if let Ok(level) = tokio::time::timeout(limit, self.read()).await {
            level
        } else {
            trace!("battery read timed out");
            None
        }
    }
}
