use std::time::Duration;

use icebath_monitor::monitor::cycle_ticker;
use icebath_monitor::{Config, CycleOutcome, Monitor, NtfyNotifier, TuyaClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        devices = cfg.devices.len(),
        timezone = %cfg.schedule.timezone,
        "loaded config"
    );

    let mut source = TuyaClient::new(&cfg.tuya)?;
    let notifier = NtfyNotifier::new(&cfg.ntfy)?;
    let interval = cfg.poll_interval_secs;
    let monitor = Monitor::new(cfg)?;

    let Some(interval_secs) = interval else {
        info!("starting ice bath check");
        let outcome = monitor
            .run_cycle(chrono::Utc::now(), &mut source, &notifier)
            .await;
        report(&outcome);
        return Ok(());
    };

    info!(interval_secs, "running ice bath checks until interrupted");
    let mut ticker = cycle_ticker(Duration::from_secs(interval_secs));
    let sig = tokio::signal::ctrl_c();
    tokio::pin!(sig);
    loop {
        tokio::select! {
            biased;
            _ = &mut sig => {
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let outcome = monitor
                    .run_cycle(chrono::Utc::now(), &mut source, &notifier)
                    .await;
                report(&outcome);
            }
        }
    }

    Ok(())
}

fn report(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Skipped | CycleOutcome::AllNormal => {}
        CycleOutcome::SessionFailed(reason) => error!(%reason, "check aborted"),
        CycleOutcome::AlertSent { issues } => info!(issues, "alert sent"),
        CycleOutcome::AlertFailed { issues } => error!(issues, "alert could not be delivered"),
    }
}
