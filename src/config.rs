use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::geofence::GeofenceFeedOption;
use crate::snapshot::SnapshotCell;

pub const DEFAULT_STATUS_URL: &str = "https://status.vatsim.net/status.json";

/// Poller and table settings, stored as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatsimSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
    #[serde(default = "default_status_url")]
    pub status_url: String,

    #[serde(default)]
    pub assume_slow_aircraft_on_ground: bool,
    #[serde(default = "default_slow_aircraft_threshold")]
    pub slow_aircraft_threshold_knots: i32,
    #[serde(default = "default_true")]
    pub infer_model_from_type: bool,
    #[serde(default)]
    pub show_invalid_registrations: bool,

    /// How long an aircraft stays visible to readers after its last report
    #[serde(default = "default_display_timeout")]
    pub display_timeout_seconds: u64,
    /// How long an aircraft stays in the table after its last report
    #[serde(default = "default_removal_timeout")]
    pub removal_timeout_seconds: u64,

    #[serde(default = "default_id_range_start")]
    pub id_range_start: u32,
    #[serde(default = "default_id_range_end")]
    pub id_range_end: u32,
    #[serde(default = "default_preferred_memory_capacity")]
    pub preferred_memory_capacity: usize,

    #[serde(default)]
    pub geofenced_feeds: Vec<GeofenceFeedOption>,
}

fn default_true() -> bool {
    true
}

fn default_refresh_seconds() -> u64 {
    15
}

fn default_status_url() -> String {
    DEFAULT_STATUS_URL.to_string()
}

fn default_slow_aircraft_threshold() -> i32 {
    40
}

fn default_display_timeout() -> u64 {
    60
}

fn default_removal_timeout() -> u64 {
    180
}

fn default_id_range_start() -> u32 {
    0xF0_0000
}

fn default_id_range_end() -> u32 {
    0xFF_FFFF
}

fn default_preferred_memory_capacity() -> usize {
    65_536
}

impl Default for VatsimSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_seconds: default_refresh_seconds(),
            status_url: default_status_url(),
            assume_slow_aircraft_on_ground: false,
            slow_aircraft_threshold_knots: default_slow_aircraft_threshold(),
            infer_model_from_type: true,
            show_invalid_registrations: false,
            display_timeout_seconds: default_display_timeout(),
            removal_timeout_seconds: default_removal_timeout(),
            id_range_start: default_id_range_start(),
            id_range_end: default_id_range_end(),
            preferred_memory_capacity: default_preferred_memory_capacity(),
            geofenced_feeds: Vec::new(),
        }
    }
}

impl VatsimSettings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let settings: VatsimSettings =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a TOML file (atomic: write to .tmp then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.id_range_start <= self.id_range_end,
            "id_range_start ({:#08X}) must not exceed id_range_end ({:#08X})",
            self.id_range_start,
            self.id_range_end
        );
        anyhow::ensure!(
            self.display_timeout_seconds <= self.removal_timeout_seconds,
            "display_timeout_seconds must not exceed removal_timeout_seconds"
        );
        for feed in &self.geofenced_feeds {
            feed.validate()?;
        }
        Ok(())
    }

    /// Configured refresh interval, never shorter than one second
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_seconds.max(1))
    }

    /// Poll tick: at most one second, re-armed after every fetch attempt
    pub fn tick_interval(&self) -> Duration {
        self.refresh_interval().min(Duration::from_secs(1))
    }

    pub fn display_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.display_timeout_seconds as i64)
    }

    pub fn removal_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.removal_timeout_seconds as i64)
    }
}

/// Shared, read-mostly settings handle.
///
/// Every poll cycle and batch reads the current value once; replacing it takes
/// effect from the next cycle.
#[derive(Clone, Default)]
pub struct SettingsStore {
    cell: Arc<SnapshotCell<VatsimSettings>>,
}

impl SettingsStore {
    pub fn new(settings: VatsimSettings) -> Self {
        Self {
            cell: Arc::new(SnapshotCell::new(settings)),
        }
    }

    pub fn current(&self) -> Arc<VatsimSettings> {
        self.cell.load()
    }

    pub fn replace(&self, settings: VatsimSettings) {
        self.cell.store(settings);
    }
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SettingsStore").field(&self.current()).finish()
    }
}
