pub mod config;
pub mod error;
pub mod evaluate;
pub mod monitor;
pub mod notify;
pub mod pump;
pub mod schedule;
pub mod telemetry;
pub mod tuya;

// Re-export commonly used items
pub use config::Config;
pub use error::{AppError, Result};
pub use evaluate::{evaluate, Issue, IssueKind, Thresholds};
pub use monitor::{CycleOutcome, Monitor};
pub use notify::{aggregate_and_notify, AlertBatch, Notifier, NtfyNotifier};
pub use pump::{infer_pump_state, PumpDisplayState};
pub use schedule::BusinessHours;
pub use telemetry::{NormalizedReading, RawProperty, TelemetryCodes};
pub use tuya::{TelemetrySource, TuyaClient};
