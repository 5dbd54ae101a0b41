//! Business-hours gate.
//!
//! Decides whether a monitoring cycle should execute at a given instant. The
//! business is timezone-local, so every instant is converted into the configured
//! zone before the weekday and hour are inspected.

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Opening window for one weekday: `open <= hour < close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub open: u32,
    pub close: u32,
}

impl HourWindow {
    pub const fn new(open: u32, close: u32) -> Self {
        Self { open, close }
    }

    fn contains(&self, hour: u32) -> bool {
        self.open <= hour && hour < self.close
    }
}

/// Schedule section of the YAML config. Days left out keep the default table;
/// a day set to `null` is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub timezone: String,
    pub monday: Option<HourWindow>,
    pub tuesday: Option<HourWindow>,
    pub wednesday: Option<HourWindow>,
    pub thursday: Option<HourWindow>,
    pub friday: Option<HourWindow>,
    pub saturday: Option<HourWindow>,
    pub sunday: Option<HourWindow>,
}

impl ScheduleConfig {
    fn week(&self) -> [Option<HourWindow>; 7] {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
    }
}

fn default_timezone() -> String {
    "Australia/Sydney".into()
}

impl Default for ScheduleConfig {
    /// Closed Sunday and Monday, 07-19 Tuesday to Thursday, 07-20 Friday,
    /// 07-21 Saturday.
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            monday: None,
            tuesday: Some(HourWindow::new(7, 19)),
            wednesday: Some(HourWindow::new(7, 19)),
            thursday: Some(HourWindow::new(7, 19)),
            friday: Some(HourWindow::new(7, 20)),
            saturday: Some(HourWindow::new(7, 21)),
            sunday: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusinessHours {
    timezone: Tz,
    /// Indexed by days from Monday.
    week: [Option<HourWindow>; 7],
}

impl BusinessHours {
    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self> {
        let timezone = cfg
            .timezone
            .parse::<Tz>()
            .map_err(|e| AppError::Config(format!("invalid timezone '{}': {}", cfg.timezone, e)))?;

        let week = cfg.week();

        for window in week.iter().flatten() {
            if window.open >= window.close || window.close > 24 {
                return Err(AppError::Config(format!(
                    "invalid opening window {:02}-{:02}: expected open < close <= 24",
                    window.open, window.close
                )));
            }
        }

        if week.iter().all(Option::is_none) {
            return Err(AppError::Config("schedule has no open day".to_string()));
        }

        Ok(Self { timezone, week })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Returns true when `now` falls inside the opening window of its local
    /// weekday. Pure function of the input instant.
    pub fn should_run<Z: TimeZone>(&self, now: &DateTime<Z>) -> bool {
        let local = now.with_timezone(&self.timezone);
        let day = local.weekday().num_days_from_monday() as usize;

        match self.week.get(day).copied().flatten() {
            Some(window) => window.contains(local.hour()),
            None => false,
        }
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Australia::Sydney,
            week: ScheduleConfig::default().week(),
        }
    }
}
