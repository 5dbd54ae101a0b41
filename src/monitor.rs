//! One monitoring cycle: schedule gate, session, device polling, evaluation and
//! at most one notification.

use std::time::Duration;

use chrono::{DateTime, TimeZone};
use futures::future::join_all;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{Config, DeviceConfig};
use crate::error::Result;
use crate::evaluate::{evaluate, Issue};
use crate::notify::{aggregate_and_notify, Notifier};
use crate::pump::infer_pump_state;
use crate::schedule::BusinessHours;
use crate::tuya::TelemetrySource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Outside business hours.
    Skipped,
    /// The telemetry session could not be established; nothing was polled.
    SessionFailed(String),
    AllNormal,
    AlertSent { issues: usize },
    /// Issues were found but the notification could not be delivered.
    AlertFailed { issues: usize },
}

/// Ticker for daemon mode. The first tick completes immediately; a cycle that
/// overruns pushes the next one back instead of bursting.
pub fn cycle_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[derive(Debug, Clone)]
pub struct Monitor {
    config: Config,
    hours: BusinessHours,
    codes: Vec<String>,
}

impl Monitor {
    pub fn new(config: Config) -> Result<Self> {
        let hours = config.business_hours()?;
        let codes = config.codes.all_codes();
        Ok(Self {
            config,
            hours,
            codes,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run_cycle<Z: TimeZone>(
        &self,
        now: DateTime<Z>,
        source: &mut dyn TelemetrySource,
        notifier: &dyn Notifier,
    ) -> CycleOutcome {
        if !self.hours.should_run(&now) {
            info!("outside monitoring hours; skipping check");
            return CycleOutcome::Skipped;
        }

        if let Err(e) = source.connect().await {
            error!(error = %e, "failed to connect to telemetry source");
            return CycleOutcome::SessionFailed(e.to_string());
        }

        let per_device = self.poll_devices(source).await;
        let issues: usize = per_device.iter().map(Vec::len).sum();

        if issues == 0 {
            info!(devices = self.config.devices.len(), "all systems normal");
            return CycleOutcome::AllNormal;
        }

        if aggregate_and_notify(per_device, notifier).await {
            CycleOutcome::AlertSent { issues }
        } else {
            CycleOutcome::AlertFailed { issues }
        }
    }

    /// Issues per device, in registration order. Devices are read concurrently
    /// but `join_all` keeps the input order.
    pub async fn poll_devices(&self, source: &dyn TelemetrySource) -> Vec<Vec<Issue>> {
        let checks = self
            .config
            .devices
            .iter()
            .map(|device| self.check_device(source, device));
        join_all(checks).await
    }

    async fn check_device(
        &self,
        source: &dyn TelemetrySource,
        device: &DeviceConfig,
    ) -> Vec<Issue> {
        let name = &device.display_name;
        let properties = match source
            .device_properties(&device.device_id, &self.codes)
            .await
        {
            Ok(properties) => properties,
            Err(e) => {
                warn!(
                    device = %name,
                    device_id = %device.device_id,
                    error = %e,
                    "device status request failed"
                );
                return vec![Issue::connection_error(name)];
            }
        };

        let reading = self.config.codes.normalize(&properties);
        let pump = infer_pump_state(reading.flow_rate_l_per_min, reading.switch_on);
        info!(
            device = %name,
            flow = reading.flow_rate_l_per_min,
            temp = reading.water_temp_celsius,
            pump = %pump,
            "device reading"
        );

        evaluate(name, &reading, &self.config.thresholds)
    }
}
