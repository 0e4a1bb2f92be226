use anyhow::Result;
use chrono::Utc;
use heliocharge::config::Config;
use heliocharge::controller::{ChargeController, ControllerCommand, ControllerIo};
use heliocharge::loadpoint::LoadPointId;
use heliocharge::logging::init_logging;
use heliocharge::sim::SimulatedSite;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use tracing::{error, info, warn};

const SIM_PEAK_SOLAR_W: f64 = 6000.0;
const SIM_BASE_LOAD_W: f64 = 400.0;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Heliocharge {} starting up",
        option_env!("APP_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
    );

    let site = SimulatedSite::new(
        SimulatedSite::solar_curve(SIM_PEAK_SOLAR_W, Utc::now()),
        SIM_BASE_LOAD_W,
    );
    for lp in &config.load_points {
        site.add_load_point(LoadPointId::from_config(lp)?);
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ControllerCommand>();
    let io = ControllerIo {
        power: Arc::new(site.clone()),
        load_points: Arc::new(site.clone()),
        actuation: Arc::new(site.clone()),
        home_battery: Some(Arc::new(site.clone())),
    };
    let mut controller = ChargeController::new(config, io, cmd_rx)
        .map_err(|e| anyhow::anyhow!("Failed to create controller: {}", e))?;

    // Physics of the simulated site: ramp currents and follow the sun
    let sim_site = site.clone();
    let sim_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            sim_site.set_solar(SimulatedSite::solar_curve(SIM_PEAK_SOLAR_W, Utc::now()));
            sim_site.step();
        }
    });

    let mut reports = controller.subscribe_reports();
    let report_task = tokio::spawn(async move {
        while reports.changed().await.is_ok() {
            let summary = reports.borrow_and_update().as_ref().map(|r| {
                r.entries
                    .iter()
                    .map(|e| format!("{} -> {}", e.load_point, e.reason))
                    .collect::<Vec<_>>()
                    .join("; ")
            });
            if let Some(s) = summary {
                info!("Cycle: {}", s);
            }
        }
    });

    let shutdown_tx = cmd_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(ControllerCommand::Shutdown);
            }
            Err(e) => warn!("Cannot listen for shutdown signal: {}", e),
        }
    });

    let result = controller.run().await;
    sim_task.abort();
    report_task.abort();
    match result {
        Ok(()) => {
            info!("Controller shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Controller failed with error: {}", e);
            Err(anyhow::anyhow!("Controller error: {}", e))
        }
    }
}
