use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{AppError, Result};
use crate::evaluate::Thresholds;
use crate::schedule::{BusinessHours, ScheduleConfig};
use crate::telemetry::TelemetryCodes;
use crate::tuya::StatusApi;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tuya: TuyaConfig,
    /// Registration order is the order issues appear in the alert.
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub ntfy: NtfyConfig,
    #[serde(default)]
    pub codes: TelemetryCodes,
    /// When set, the binary keeps running and starts a cycle every interval.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuyaConfig {
    #[serde(default = "default_tuya_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub access_id: String,
    #[serde(default)]
    pub access_secret: String,
    #[serde(default)]
    pub status_api: StatusApi,
}

fn default_tuya_endpoint() -> String {
    "https://openapi.tuyaeu.com".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(alias = "name")]
    pub display_name: String,
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtfyConfig {
    #[serde(default = "default_ntfy_url")]
    pub base_url: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_ntfy_title")]
    pub title: String,
    #[serde(default)]
    pub priority: NtfyPriority,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_ntfy_url() -> String {
    "https://ntfy.sh".into()
}

fn default_ntfy_title() -> String {
    "Ice Bath Alert 🧊".into()
}

/// ntfy message priority, "min" (1) to "max" (5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NtfyPriority {
    Min,
    Low,
    Default,
    #[default]
    High,
    #[serde(alias = "urgent")]
    Max,
}

impl NtfyPriority {
    pub fn as_number(&self) -> u8 {
        match self {
            NtfyPriority::Min => 1,
            NtfyPriority::Low => 2,
            NtfyPriority::Default => 3,
            NtfyPriority::High => 4,
            NtfyPriority::Max => 5,
        }
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards TUYA_ACCESS_ID, TUYA_ACCESS_SECRET and NTFY_TOPIC, when set,
    /// override whatever the YAML had.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(id) = std::env::var("TUYA_ACCESS_ID") {
            cfg.tuya.access_id = id;
        }
        if let Ok(secret) = std::env::var("TUYA_ACCESS_SECRET") {
            cfg.tuya.access_secret = secret;
        }
        if let Ok(topic) = std::env::var("NTFY_TOPIC") {
            cfg.ntfy.topic = topic;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn business_hours(&self) -> Result<BusinessHours> {
        BusinessHours::from_config(&self.schedule)
    }

    fn validate(&self) -> Result<()> {
        if self.tuya.access_id.is_empty() || self.tuya.access_secret.is_empty() {
            return Err(AppError::Config(
                "tuya.access_id and tuya.access_secret must be set".to_string(),
            ));
        }

        if self.devices.is_empty() {
            return Err(AppError::Config(
                "config must include at least one device".to_string(),
            ));
        }

        for device in &self.devices {
            if device.display_name.is_empty() || device.device_id.is_empty() {
                return Err(AppError::Config(format!(
                    "device entries need both a name and a device_id (got '{}' / '{}')",
                    device.display_name, device.device_id
                )));
            }
        }

        if self.ntfy.topic.is_empty() {
            return Err(AppError::Config("ntfy.topic cannot be empty".to_string()));
        }

        if !self.thresholds.min_flow_l_per_min.is_finite()
            || !self.thresholds.max_temp_celsius.is_finite()
        {
            return Err(AppError::Config("thresholds must be finite".to_string()));
        }

        if self.poll_interval_secs == Some(0) {
            return Err(AppError::Config(
                "poll_interval_secs cannot be 0".to_string(),
            ));
        }

        self.business_hours()?;

        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$"; any other '$' is kept as-is.
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{}'", close))
        })?;
        let val = std::env::var(&var)
            .map_err(|_| AppError::Config(format!("missing environment variable: {}", var)))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, consuming the closing delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
