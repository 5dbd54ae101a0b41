//! Threshold rules applied to one device's normalized reading.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::telemetry::{NormalizedReading, NO_TEMPERATURE_READING};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_min_flow")]
    pub min_flow_l_per_min: f64,
    #[serde(default = "default_max_temp")]
    pub max_temp_celsius: f64,
}

fn default_min_flow() -> f64 {
    19.0
}

fn default_max_temp() -> f64 {
    12.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_flow_l_per_min: default_min_flow(),
            max_temp_celsius: default_max_temp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    ConnectionError,
    NoFlow,
    LowFlow,
    HighTemp,
}

/// One abnormal condition for one device in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub device_name: String,
    pub kind: IssueKind,
    pub detail: String,
}

impl Issue {
    pub fn connection_error(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            kind: IssueKind::ConnectionError,
            detail: "Connection Error ❌".to_string(),
        }
    }

    fn no_flow(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            kind: IssueKind::NoFlow,
            detail: "No Flow (Pump Off?)".to_string(),
        }
    }

    fn low_flow(device_name: &str, flow: f64) -> Self {
        Self {
            device_name: device_name.to_string(),
            kind: IssueKind::LowFlow,
            detail: format!("Low Flow ({:?}L)", flow),
        }
    }

    fn high_temp(device_name: &str, temp: f64) -> Self {
        Self {
            device_name: device_name.to_string(),
            kind: IssueKind::HighTemp,
            detail: format!("High Temp ({:.1}°C)", temp),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device_name, self.detail)
    }
}

/// Flow and temperature rules are independent; the flow issue, if any, comes
/// first. Zero flow reads as a pump that is probably switched off rather than a
/// hard fault.
pub fn evaluate(
    device_name: &str,
    reading: &NormalizedReading,
    thresholds: &Thresholds,
) -> Vec<Issue> {
    let mut issues = Vec::new();

    let flow = reading.flow_rate_l_per_min;
    if flow < thresholds.min_flow_l_per_min {
        if flow == 0.0 {
            issues.push(Issue::no_flow(device_name));
        } else {
            issues.push(Issue::low_flow(device_name, flow));
        }
    }

    // The sentinel must never raise a high-temperature alert, even under a
    // negative threshold.
    let temp = reading.water_temp_celsius;
    if temp > thresholds.max_temp_celsius && temp > NO_TEMPERATURE_READING {
        issues.push(Issue::high_temp(device_name, temp));
    }

    issues
}
