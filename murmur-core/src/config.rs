//! Persistent filter settings (JSON file).
//!
//! Keys match the filter's property names so a settings file reads like a
//! property dump.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::session::MAX_ALTERNATIVES;
use crate::error::{FilterError, Result};
use crate::inference::json::NumberFormat;

pub const DEFAULT_MODEL_PATH: &str = "/usr/share/vosk/model";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FilterSettings {
    pub speech_model: Option<PathBuf>,
    pub enable_denoise: bool,
    pub alternatives: u16,
    /// Minimum ms between partial results; -1 disables them.
    pub partial_results_interval: i64,
    pub use_signals: bool,
    /// Re-render numbers in results with this many decimals; `None` keeps
    /// the engine's text.
    pub result_decimals: Option<u8>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            speech_model: Some(PathBuf::from(DEFAULT_MODEL_PATH)),
            enable_denoise: cfg!(feature = "rnnoise"),
            alternatives: 0,
            partial_results_interval: 0,
            use_signals: false,
            result_decimals: None,
        }
    }
}

impl FilterSettings {
    pub fn normalize(&mut self) {
        self.speech_model = self
            .speech_model
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.alternatives = self.alternatives.min(MAX_ALTERNATIVES);
        self.partial_results_interval = self.partial_results_interval.max(-1);
    }

    pub fn number_format(&self) -> NumberFormat {
        match self.result_decimals {
            Some(decimals) => NumberFormat::FixedDecimals(decimals),
            None => NumberFormat::Verbatim,
        }
    }
}

/// Read and normalise settings from `path`.
///
/// # Errors
/// `Io` if the file cannot be read, `Settings` if it is not valid JSON.
pub fn read_settings(path: &Path) -> Result<FilterSettings> {
    let raw = fs::read_to_string(path)?;
    let mut settings: FilterSettings = serde_json::from_str(&raw)?;
    settings.normalize();
    Ok(settings)
}

/// Read settings from `path`; missing or malformed files yield defaults.
pub fn load_settings(path: &Path) -> FilterSettings {
    match read_settings(path) {
        Ok(settings) => settings,
        Err(FilterError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            FilterSettings::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable settings, using defaults");
            FilterSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &FilterSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}
