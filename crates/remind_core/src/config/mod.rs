use crate::alarm::DEFAULT_LEAD_TIME;
use crate::error::AppError;
use crate::fire::FireCheck;
use crate::host::TimerCapability;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::Duration;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "REMIND_CONFIG_PATH";
const MAX_LEAD_TIME_MINUTES: u32 = 7 * 24 * 60;

fn default_lead_time_minutes() -> u32 {
    DEFAULT_LEAD_TIME.whole_minutes() as u32
}

fn default_exact_timers() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_lead_time_minutes")]
    pub lead_time_minutes: u32,
    /// `false` behaves as if the platform refused exact timers.
    #[serde(default = "default_exact_timers")]
    pub exact_timers: bool,
    #[serde(default)]
    pub fire_check: FireCheck,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lead_time_minutes: default_lead_time_minutes(),
            exact_timers: default_exact_timers(),
            fire_check: FireCheck::default(),
            log_level: None,
        }
    }
}

impl Config {
    pub fn lead_time(&self) -> Duration {
        Duration::minutes(i64::from(self.lead_time_minutes))
    }

    pub fn capability(&self) -> TimerCapability {
        if self.exact_timers {
            TimerCapability::Exact
        } else {
            TimerCapability::Denied
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub lead_time_minutes: Option<u32>,
    pub exact_timers: Option<bool>,
    pub fire_check: Option<FireCheck>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Applies one `KEY=VALUE` pair as given on the command line.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        let value = value.trim();
        match key.trim() {
            "lead_time_minutes" => {
                self.lead_time_minutes = Some(parse_lead_time(value)?);
            }
            "exact_timers" => {
                self.exact_timers = Some(parse_bool(value)?);
            }
            "fire_check" => {
                self.fire_check = Some(parse_fire_check(value)?);
            }
            "log_level" => {
                if value.is_empty() {
                    return Err(AppError::invalid_input("log_level must not be empty"));
                }
                self.log_level = Some(value.to_string());
            }
            other => {
                return Err(AppError::invalid_input(format!(
                    "unknown config key: {other}"
                )));
            }
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    let base = dirs::config_dir()
        .ok_or_else(|| AppError::invalid_data("config directory is not available"))?;
    Ok(base.join("remind").join(CONFIG_FILE_NAME))
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    let config: Config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    validate(config)
        .map_err(|err| AppError::invalid_data(format!("{}: {}", path.display(), err.message())))
}

fn validate(config: Config) -> Result<Config, AppError> {
    check_lead_time(config.lead_time_minutes)?;
    Ok(config)
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(minutes) = overrides.lead_time_minutes {
        merged.lead_time_minutes = minutes;
    }
    if let Some(exact) = overrides.exact_timers {
        merged.exact_timers = exact;
    }
    if let Some(check) = overrides.fire_check {
        merged.fire_check = check;
    }
    if let Some(level) = overrides.log_level.as_ref() {
        merged.log_level = Some(level.clone());
    }
    merged
}

fn parse_lead_time(raw: &str) -> Result<u32, AppError> {
    let minutes = raw
        .parse::<u32>()
        .map_err(|_| AppError::invalid_input(format!("lead_time_minutes: not a number: {raw}")))?;
    check_lead_time(minutes)
}

fn check_lead_time(minutes: u32) -> Result<u32, AppError> {
    if minutes > MAX_LEAD_TIME_MINUTES {
        return Err(AppError::invalid_input(format!(
            "lead_time_minutes must be at most {MAX_LEAD_TIME_MINUTES}"
        )));
    }
    Ok(minutes)
}

fn parse_bool(raw: &str) -> Result<bool, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(AppError::invalid_input(format!(
            "exact_timers: expected true or false, got {raw}"
        ))),
    }
}

fn parse_fire_check(raw: &str) -> Result<FireCheck, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "recheck" => Ok(FireCheck::Recheck),
        "snapshot" => Ok(FireCheck::Snapshot),
        _ => Err(AppError::invalid_input(format!(
            "fire_check: expected recheck or snapshot, got {raw}"
        ))),
    }
}
