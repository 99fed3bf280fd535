use std::{fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_BOUNCE_TIME_MS: u64 = 50;
pub const DEVICE_DEFAULT_NAME: &str = "Unnamed Device";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PullMode {
    Up,
    Down,
}

impl Default for PullMode {
    fn default() -> Self {
        PullMode::Up
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorEntry {
    pub name: String,
    pub port: u32,
    #[serde(default)]
    pub pull_mode: PullMode,
    #[serde(default = "default_bounce_time")]
    pub bounce_time: u64,
    #[serde(default)]
    pub invert_logic: bool,
    pub unique_id: Option<String>,
}

/// Two accepted shapes: a legacy `ports` map sharing the platform-wide
/// defaults, or a `sensors` list with per-entry settings. Exactly one
/// must be present.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlatformConfig {
    pub ports: Option<FxHashMap<u32, String>>,
    pub sensors: Option<Vec<SensorEntry>>,
    #[serde(default)]
    pub pull_mode: PullMode,
    #[serde(default = "default_bounce_time")]
    pub bounce_time: u64,
    #[serde(default)]
    pub invert_logic: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorConfig {
    pub name: String,
    pub port: u32,
    pub pull_mode: PullMode,
    pub bounce_time_ms: u64,
    pub invert_logic: bool,
    pub unique_id: Option<String>,
}

impl PlatformConfig {
    pub fn sensor_configs(&self) -> Result<Vec<SensorConfig>, AppError> {
        let configs: Vec<SensorConfig> = match (&self.ports, &self.sensors) {
            (Some(_), Some(_)) => {
                return Err(AppError::Config(
                    "'ports' and 'sensors' are mutually exclusive".into(),
                ));
            }
            (None, None) => {
                return Err(AppError::Config(
                    "either 'ports' or 'sensors' must be specified".into(),
                ));
            }
            (Some(ports), None) => {
                let mut entries: Vec<(&u32, &String)> = ports.iter().collect();
                entries.sort_by_key(|(port, _)| **port);
                entries
                    .into_iter()
                    .map(|(port, name)| SensorConfig {
                        name: display_name(name),
                        port: *port,
                        pull_mode: self.pull_mode,
                        bounce_time_ms: self.bounce_time,
                        invert_logic: self.invert_logic,
                        unique_id: None,
                    })
                    .collect()
            }
            (None, Some(sensors)) => sensors
                .iter()
                .map(|entry| SensorConfig {
                    name: display_name(&entry.name),
                    port: entry.port,
                    pull_mode: entry.pull_mode,
                    bounce_time_ms: entry.bounce_time,
                    invert_logic: entry.invert_logic,
                    unique_id: entry.unique_id.clone(),
                })
                .collect(),
        };

        validate_ports(&configs)?;

        Ok(configs)
    }
}

fn display_name(name: &str) -> String {
    if name.trim().is_empty() {
        DEVICE_DEFAULT_NAME.to_string()
    } else {
        name.to_string()
    }
}

fn validate_ports(configs: &[SensorConfig]) -> Result<(), AppError> {
    let mut seen = FxHashMap::default();
    for cfg in configs {
        if cfg.port == 0 {
            return Err(AppError::Config(format!(
                "Port must be a positive integer for sensor '{}'",
                cfg.name
            )));
        }
        if cfg.bounce_time_ms == 0 {
            return Err(AppError::Config(format!(
                "Bounce time must be a positive integer for sensor '{}'",
                cfg.name
            )));
        }
        if let Some(previous) = seen.insert(cfg.port, &cfg.name) {
            return Err(AppError::Config(format!(
                "Port {} configured twice ('{}' and '{}')",
                cfg.port, previous, cfg.name
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default = "default_chip")]
    pub chip: String,
    pub platform: PlatformConfig,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}

fn default_bounce_time() -> u64 {
    DEFAULT_BOUNCE_TIME_MS
}

fn default_chip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_history_capacity() -> usize {
    32
}
