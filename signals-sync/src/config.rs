use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signals_core::types::SilentType;
use thiserror::Error;

pub const SYNC_CONFIG_KEY: &str = "background_sync_config";

pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;

/// One week.
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("sync interval must be between 1 and 10080 minutes")]
    InvalidInterval,
}

fn interval_in_range(minutes: u64) -> bool {
    (1..=MAX_INTERVAL_MINUTES).contains(&minutes)
}

/// Per-installation background sync settings, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub enabled: bool,
    #[serde(rename = "interval")]
    pub interval_minutes: u64,
    /// Run order of a sync; no duplicates.
    #[serde(rename = "types")]
    pub allowed_types: Vec<SilentType>,
    #[serde(rename = "lastSync")]
    pub last_sync: DateTime<Utc>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            allowed_types: vec![
                SilentType::BackgroundSync,
                SilentType::PriceUpdate,
                SilentType::SignalRefresh,
            ],
            last_sync: Utc::now(),
        }
    }
}

/// Partial update. Types arrive as raw names so that stored or requested
/// configs naming retired handlers still load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, rename = "interval", alias = "intervalMinutes", skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
    #[serde(default, rename = "types", alias = "allowedTypes", skip_serializing_if = "Option::is_none")]
    pub allowed_types: Option<Vec<String>>,
    #[serde(default, rename = "lastSync", skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncConfigPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn interval(minutes: u64) -> Self {
        Self {
            interval_minutes: Some(minutes),
            ..Self::default()
        }
    }
}

fn parse_types(names: &[String]) -> Vec<SilentType> {
    let mut types = Vec::with_capacity(names.len());
    for name in names {
        match name.parse::<SilentType>() {
            Ok(t) if !types.contains(&t) => types.push(t),
            Ok(_) => {}
            Err(e) => tracing::warn!("Ignoring sync type: {}", e),
        }
    }
    types
}

impl SyncConfig {
    /// Field-by-field merge of `patch` over `self`.
    pub fn merge(&self, patch: &SyncConfigPatch) -> Result<SyncConfig, SyncError> {
        if patch.interval_minutes.is_some_and(|m| !interval_in_range(m)) {
            return Err(SyncError::InvalidInterval);
        }

        Ok(SyncConfig {
            enabled: patch.enabled.unwrap_or(self.enabled),
            interval_minutes: patch.interval_minutes.unwrap_or(self.interval_minutes),
            allowed_types: patch
                .allowed_types
                .as_deref()
                .map(parse_types)
                .unwrap_or_else(|| self.allowed_types.clone()),
            last_sync: patch.last_sync.unwrap_or(self.last_sync),
        })
    }

    /// Parses a stored document over the defaults. Unreadable documents and
    /// out-of-range intervals fall back to the default value for that field.
    pub fn from_stored(raw: &str) -> SyncConfig {
        let defaults = SyncConfig::default();
        let mut patch: SyncConfigPatch = match serde_json::from_str(raw) {
            Ok(patch) => patch,
            Err(e) => {
                tracing::warn!("Stored sync config unreadable, using defaults: {}", e);
                return defaults;
            }
        };
        if let Some(minutes) = patch.interval_minutes.filter(|m| !interval_in_range(*m)) {
            tracing::warn!(
                "Stored sync interval {} is out of range, using {} minutes",
                minutes,
                DEFAULT_INTERVAL_MINUTES
            );
            patch.interval_minutes = None;
        }
        defaults.merge(&patch).unwrap_or(defaults)
    }

    pub fn period(&self) -> std::time::Duration {
        let minutes = self.interval_minutes.clamp(1, MAX_INTERVAL_MINUTES);
        std::time::Duration::from_secs(minutes.saturating_mul(60))
    }
}
