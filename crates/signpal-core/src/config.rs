use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Environment variable overriding the data directory (used by tests and packaging).
pub const DATA_DIR_ENV: &str = "SIGNPAL_DATA_DIR";

/// Get the local data directory for signpal.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("signpal");
    Ok(path)
}

/// Tunables for the learning engine, read from `config.toml` in the data dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// A prediction must be strictly above this to count as confident.
    pub match_threshold: f32,
    /// Wait after a correct sign before moving to the next letter.
    pub confirmation_delay_ms: u64,
    /// Interval between frame requests while learning.
    pub poll_interval_ms: u64,
    /// Stop the session after this many consecutive polls without a frame.
    /// Unset means keep retrying for as long as the session is active.
    pub max_missed_frames: Option<u32>,
    /// Log a warning every N consecutive missed frames (0 disables).
    pub missed_frame_warn_every: u32,
    /// Replay script the daemon uses as its frame source.
    pub replay_script: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            match_threshold: 0.5,
            confirmation_delay_ms: 1000,
            poll_interval_ms: 1000,
            max_missed_frames: None,
            missed_frame_warn_every: 10,
            replay_script: None,
        }
    }
}

impl Settings {
    /// Path of the config file inside `data_dir`.
    #[must_use]
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join("config.toml")
    }

    /// Load settings from `path`, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the loaded values are out of range.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let settings: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default location.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::path_in(&get_data_dir()?))
    }

    /// Write these settings as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            anyhow::bail!(
                "match_threshold must be within [0, 1], got {}",
                self.match_threshold
            );
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        Ok(())
    }

    #[must_use]
    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.confirmation_delay_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
