use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::DEFAULT_TIME_ZONE;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;

pub const DEFAULT_STORAGE_KEY: &str = "weekly-planner-storage";
pub const DEFAULT_CALENDAR_ID: &str = "primary";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u8,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA as u8,
            app_name: default_app_name(),
            timezone: default_timezone(),
            calendar_id: default_calendar_id(),
            storage_key: default_storage_key(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        self.timezone.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("unknown timezone '{}': {error}", self.timezone))
        })?;
        if self.calendar_id.trim().is_empty() {
            return Err(InfraError::InvalidConfig("calendarId must not be empty".to_string()));
        }
        if self.storage_key.trim().is_empty() {
            return Err(InfraError::InvalidConfig("storageKey must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_app_name() -> String {
    "Weekly Planner".to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

fn default_calendar_id() -> String {
    DEFAULT_CALENDAR_ID.to_string()
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let raw = read_config(&config_dir.join(APP_JSON))?;
    let config: AppConfig = serde_json::from_value(raw)?;
    config.validate()?;
    Ok(config)
}
