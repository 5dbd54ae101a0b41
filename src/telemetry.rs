//! Normalization of raw device properties into a typed reading.
//!
//! Device property payloads are loosely typed: codes differ between firmware and
//! API versions, may be duplicated or missing, and values arrive as numbers,
//! booleans or anything else. Every known code is classified into a
//! [`TelemetryField`] and resolved in one pass; everything else is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Water temperature value meaning "no reading". A real 0.0 °C measurement is
/// indistinguishable from an absent one.
pub const NO_TEMPERATURE_READING: f64 = 0.0;

/// Device values are integers scaled by ten.
const RAW_SCALE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProperty {
    pub code: String,
    #[serde(default)]
    pub value: Value,
}

impl RawProperty {
    pub fn new(code: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedReading {
    pub flow_rate_l_per_min: f64,
    pub water_temp_celsius: f64,
    pub switch_on: bool,
}

impl NormalizedReading {
    pub fn has_temperature(&self) -> bool {
        self.water_temp_celsius != NO_TEMPERATURE_READING
    }
}

impl Default for NormalizedReading {
    fn default() -> Self {
        Self {
            flow_rate_l_per_min: 0.0,
            water_temp_celsius: NO_TEMPERATURE_READING,
            switch_on: false,
        }
    }
}

/// The readings the monitor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryField {
    Flow,
    TemperatureCelsius,
    TemperatureFahrenheit,
    Switch,
}

/// Property code aliases per field. Lists are checked in the order the fields
/// are declared here, so a code listed twice resolves to the first field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryCodes {
    #[serde(default = "default_flow")]
    pub flow: Vec<String>,
    #[serde(default = "default_celsius")]
    pub temperature_celsius: Vec<String>,
    #[serde(default = "default_fahrenheit")]
    pub temperature_fahrenheit: Vec<String>,
    #[serde(default = "default_switch")]
    pub switch: Vec<String>,
}

fn default_flow() -> Vec<String> {
    vec!["flow_water".into()]
}

fn default_celsius() -> Vec<String> {
    vec!["temp_current".into(), "temp_top".into()]
}

fn default_fahrenheit() -> Vec<String> {
    vec!["temp_current_f".into(), "temp_top_f".into()]
}

fn default_switch() -> Vec<String> {
    vec!["sw_water".into(), "switch".into()]
}

impl Default for TelemetryCodes {
    fn default() -> Self {
        Self {
            flow: default_flow(),
            temperature_celsius: default_celsius(),
            temperature_fahrenheit: default_fahrenheit(),
            switch: default_switch(),
        }
    }
}

impl TelemetryCodes {
    pub fn classify(&self, code: &str) -> Option<TelemetryField> {
        let matches = |aliases: &[String]| aliases.iter().any(|a| a == code);

        if matches(&self.flow) {
            Some(TelemetryField::Flow)
        } else if matches(&self.temperature_celsius) {
            Some(TelemetryField::TemperatureCelsius)
        } else if matches(&self.temperature_fahrenheit) {
            Some(TelemetryField::TemperatureFahrenheit)
        } else if matches(&self.switch) {
            Some(TelemetryField::Switch)
        } else {
            None
        }
    }

    /// Every configured code, for endpoints that read a selected property set.
    pub fn all_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        for code in self
            .flow
            .iter()
            .chain(&self.temperature_celsius)
            .chain(&self.temperature_fahrenheit)
            .chain(&self.switch)
        {
            if !codes.contains(code) {
                codes.push(code.clone());
            }
        }
        codes
    }

    /// Resolve a property list into a reading. Never fails: anything missing or
    /// of an unexpected type falls back to the reading's defaults.
    pub fn normalize(&self, properties: &[RawProperty]) -> NormalizedReading {
        let mut flow: Option<f64> = None;
        let mut celsius: Option<f64> = None;
        let mut fahrenheit: Option<f64> = None;
        let mut switch_on: Option<bool> = None;

        for prop in properties {
            let Some(field) = self.classify(&prop.code) else {
                continue;
            };
            match field {
                TelemetryField::Flow => {
                    if flow.is_none() {
                        flow = scaled(&prop.value);
                    }
                }
                TelemetryField::TemperatureCelsius => {
                    if celsius.is_none() {
                        celsius = scaled(&prop.value);
                    }
                }
                TelemetryField::TemperatureFahrenheit => {
                    if fahrenheit.is_none() {
                        fahrenheit = scaled(&prop.value);
                    }
                }
                TelemetryField::Switch => {
                    if switch_on.is_none() {
                        switch_on = truthy(&prop.value);
                    }
                }
            }
        }

        let water_temp_celsius = celsius
            .or_else(|| fahrenheit.map(fahrenheit_to_celsius))
            .unwrap_or(NO_TEMPERATURE_READING);

        NormalizedReading {
            flow_rate_l_per_min: flow.unwrap_or(0.0).max(0.0),
            water_temp_celsius,
            switch_on: switch_on.unwrap_or(false),
        }
    }
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Tenths-scaled numeric value; `None` for non-numeric values.
fn scaled(value: &Value) -> Option<f64> {
    value.as_f64().map(|raw| raw / RAW_SCALE)
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}
