use crate::error::{ImpairError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler evaluations.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

fn default_tick_seconds() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }
}

// ---------------------------------------------------------------------------
// AdapterConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterKind {
    /// In-process adapter that only records commands.
    Simulated {
        #[serde(default)]
        latency_ms: u64,
    },
    /// HTTPS configuration API of VyOS-style routers.
    Vyos {
        #[serde(default)]
        verify_tls: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_adapter_kind")]
    pub kind: AdapterKind,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_adapter_kind() -> AdapterKind {
    AdapterKind::Simulated { latency_ms: 0 }
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: default_adapter_kind(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl AdapterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

// ---------------------------------------------------------------------------
// EventsConfig / HistoryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Outcomes of one sequence within this window of a group's first member
    /// are displayed as one run.
    #[serde(default = "default_group_window_ms")]
    pub group_window_ms: i64,
}

fn default_group_window_ms() -> i64 {
    5_000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            group_window_ms: default_group_window_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub lab: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(lab: impl Into<String>) -> Self {
        Self {
            version: 1,
            lab: lab.into(),
            scheduler: SchedulerConfig::default(),
            adapter: AdapterConfig::default(),
            events: EventsConfig::default(),
            history: HistoryConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ImpairError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let tick = self.scheduler.tick_seconds;
        if tick == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "scheduler.tick_seconds must be greater than zero".into(),
            });
        } else if !(15..=60).contains(&tick) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "scheduler.tick_seconds={tick} is outside the recommended 15-60s range"
                ),
            });
        }

        if self.adapter.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "adapter.timeout_seconds must be greater than zero".into(),
            });
        }

        if self.events.channel_capacity == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "events.channel_capacity must be greater than zero".into(),
            });
        }

        if self.history.group_window_ms <= 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "history.group_window_ms <= 0 puts every outcome in its own group"
                    .into(),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("lab-a");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.lab, "lab-a");
        assert_eq!(parsed.scheduler.tick_seconds, 30);
        assert_eq!(parsed.history.group_window_ms, 5_000);
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("lab: bench\n").unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.adapter.timeout_seconds, 30);
        assert_eq!(cfg.adapter.kind, AdapterKind::Simulated { latency_ms: 0 });
        assert_eq!(cfg.events.channel_capacity, 256);
    }

    #[test]
    fn adapter_kind_yaml_tagged() {
        let yaml = "lab: bench\nadapter:\n  kind:\n    type: vyos\n    verify_tls: true\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.adapter.kind, AdapterKind::Vyos { verify_tls: true });
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ImpairError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("lab-b");
        cfg.scheduler.tick_seconds = 15;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.scheduler.tick_seconds, 15);
    }

    #[test]
    fn validate_flags_out_of_range_tick() {
        let mut cfg = Config::new("lab");
        assert!(cfg.validate().is_empty());
        cfg.scheduler.tick_seconds = 5;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        cfg.scheduler.tick_seconds = 0;
        assert_eq!(cfg.validate()[0].level, WarnLevel::Error);
    }
}
