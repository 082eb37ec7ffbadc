use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::page::IntersectionOptions;
use crate::sink::BufferCaps;

pub const ENDPOINT_ENV: &str = "LANDING_ANALYTICS_ENDPOINT";
pub const DEBUG_ENV: &str = "LANDING_ANALYTICS_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsSettings {
    /// Base URL the `/api/analytics/*` endpoints are resolved against.
    pub collector_url: String,
    /// Send events to the remote collector at all.
    pub remote_enabled: bool,
    /// Mirror events to the tag log target.
    pub tag_enabled: bool,
    pub scroll_throttle_ms: u64,
    pub section_threshold: f64,
    pub section_root_margin_px: i32,
    pub buffer_caps: BufferCaps,
    pub database_path: Option<PathBuf>,
    /// JSON experiment catalog replacing the built-in one.
    pub experiments_path: Option<PathBuf>,
    pub debug: bool,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            collector_url: "http://localhost:3000".into(),
            remote_enabled: true,
            tag_enabled: false,
            scroll_throttle_ms: 100,
            section_threshold: 0.5,
            section_root_margin_px: -100,
            buffer_caps: BufferCaps::default(),
            database_path: None,
            experiments_path: None,
            debug: false,
        }
    }
}

impl AnalyticsSettings {
    pub fn scroll_throttle(&self) -> Duration {
        Duration::from_millis(self.scroll_throttle_ms)
    }

    pub fn intersection_options(&self) -> IntersectionOptions {
        IntersectionOptions {
            threshold: self.section_threshold.clamp(0.0, 1.0),
            root_margin_bottom_px: self.section_root_margin_px,
        }
    }

    /// Apply `LANDING_ANALYTICS_*` overrides from the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(ENDPOINT_ENV).ok(),
            std::env::var(DEBUG_ENV).ok(),
        )
    }

    fn with_overrides(mut self, endpoint: Option<String>, debug: Option<String>) -> Self {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            self.collector_url = endpoint.trim().to_string();
        }
        if let Some(value) = debug {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AnalyticsSettings>,
    /// Why the file on disk was ignored, if it was. Kept for the caller to log
    /// once logging is up.
    load_warning: Option<String>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut load_warning = None;
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                load_warning = Some(format!(
                    "Ignoring unreadable settings in {}: {err}",
                    path.display()
                ));
                AnalyticsSettings::default()
            })
        } else {
            AnalyticsSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
            load_warning,
        })
    }

    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn settings(&self) -> AnalyticsSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, settings: AnalyticsSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: AnalyticsSettings = serde_json::from_str(&contents)?;
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
        Ok(())
    }

    fn persist(&self, data: &AnalyticsSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
