use crate::coordinator::CoordinatorSettings;
use crate::prefetch::PrefetchWindow;
use crate::validate_enum;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub simulated: SimulatedSettings,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Visibility and preload policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackSettings {
    /// Minimum on-screen share for an item to play
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,

    /// Maximum preloaded-but-not-playing resources
    #[serde(default = "default_preload_ceiling")]
    pub preload_ceiling: usize,

    #[serde(default = "default_prefetch_ahead")]
    pub prefetch_ahead: usize,

    #[serde(default = "default_prefetch_behind")]
    pub prefetch_behind: usize,

    #[serde(default = "default_true")]
    pub default_muted: bool,

    #[serde(default = "default_true")]
    pub loop_playback: bool,

    /// simulated, gstreamer
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            preload_ceiling: default_preload_ceiling(),
            prefetch_ahead: default_prefetch_ahead(),
            prefetch_behind: default_prefetch_behind(),
            default_muted: true,
            loop_playback: true,
            backend: default_backend(),
        }
    }
}

impl PlaybackSettings {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            visibility_threshold: self.visibility_threshold,
            preload_ceiling: self.preload_ceiling,
            prefetch: PrefetchWindow::new(self.prefetch_ahead, self.prefetch_behind),
            default_muted: self.default_muted,
            loop_playback: self.loop_playback,
        }
    }
}

fn default_visibility_threshold() -> f64 {
    crate::visibility::DEFAULT_VISIBILITY_THRESHOLD
}
fn default_preload_ceiling() -> usize {
    crate::resource_pool::DEFAULT_PRELOAD_CEILING
}
fn default_prefetch_ahead() -> usize {
    2
}
fn default_prefetch_behind() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_backend() -> String {
    "simulated".to_string()
}

/// Timer-driven backend settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatedSettings {
    #[serde(default = "default_prime_delay")]
    pub prime_delay_ms: u64,

    /// 0 disables end-of-media notifications
    #[serde(default = "default_clip_duration")]
    pub clip_duration_ms: u64,

    /// Locators whose pre-roll always fails
    #[serde(default)]
    pub failing_sources: Vec<String>,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            prime_delay_ms: default_prime_delay(),
            clip_duration_ms: default_clip_duration(),
            failing_sources: Vec::new(),
        }
    }
}

fn default_prime_delay() -> u64 {
    150
}
fn default_clip_duration() -> u64 {
    8000
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("feedplay");

        Ok(config_dir.join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;
        self.validate_backend(&self.playback.backend)?;

        let threshold = self.playback.visibility_threshold;
        if !(0.0..1.0).contains(&threshold) {
            anyhow::bail!(
                "Invalid visibility threshold: {} (must be in [0, 1))",
                threshold
            );
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_backend(&self, backend: &str) -> Result<()> {
        validate_enum!(backend, "simulated", "gstreamer")
    }
}
