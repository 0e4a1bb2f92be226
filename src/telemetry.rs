//! Boundary to the outside world
//!
//! Telemetry providers, the actuation sink and the home battery hand-over are
//! traits; the allocation core only ever sees the already-fetched snapshots.
//! [`starting_budget`] turns a power snapshot into the cycle's [`PowerBudget`].

use crate::allocation::{PowerBudget, TargetChargeCommand};
use crate::config::{ControlsConfig, HomeBatteryConfig};
use crate::error::{HelioError, Result};
use crate::loadpoint::{LoadPointId, LoadPointSnapshot, LoadPointTelemetry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Site power snapshot, signed watts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerAvailability {
    pub solar_production_w: f64,
    /// Positive = importing from the grid, negative = exporting
    pub grid_power_w: f64,
    pub home_battery_soc: Option<f64>,
    /// Positive = battery charging, negative = discharging
    pub home_battery_power_w: f64,
    pub measured_at: DateTime<Utc>,
}

/// Source of site power readings
#[async_trait::async_trait]
pub trait PowerAvailabilityProvider: Send + Sync {
    async fn fetch_availability(&self) -> Result<PowerAvailability>;
}

/// Source of live load point state
#[async_trait::async_trait]
pub trait LoadPointStateProvider: Send + Sync {
    async fn fetch_load_points(&self) -> Result<Vec<LoadPointTelemetry>>;
}

/// A command on its way to a vehicle or connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationRequest {
    pub load_point: LoadPointId,
    pub command: TargetChargeCommand,
    pub issued_at: DateTime<Utc>,
}

/// Fire-and-forget command delivery; confirmation and retry live behind it
pub trait ChargeActuationSink: Send + Sync {
    fn dispatch(&self, request: ActuationRequest);
}

impl ChargeActuationSink for mpsc::UnboundedSender<ActuationRequest> {
    fn dispatch(&self, request: ActuationRequest) {
        // receiver gone means nobody delivers commands anymore; next cycle re-decides anyway
        let _ = self.send(request);
    }
}

/// Receives whatever budget is left after all load points were served
pub trait HomeBatterySink: Send + Sync {
    fn hand_over(&self, leftover: PowerBudget);
}

impl HomeBatterySink for mpsc::UnboundedSender<PowerBudget> {
    fn hand_over(&self, leftover: PowerBudget) {
        let _ = self.send(leftover);
    }
}

/// Derive the cycle's starting budget from a power snapshot.
///
/// Fails with `StaleInput` when the snapshot is older than the configured
/// maximum age; the caller must then skip the whole cycle.
pub fn starting_budget(
    availability: &PowerAvailability,
    load_points: &[LoadPointSnapshot],
    controls: &ControlsConfig,
    battery: &HomeBatteryConfig,
    now: DateTime<Utc>,
) -> Result<PowerBudget> {
    let age = now - availability.measured_at;
    let max_age = Duration::seconds(i64::from(controls.telemetry_max_age_seconds));
    if age > max_age {
        return Err(HelioError::stale_input(format!(
            "power values are {}s old (max {}s)",
            age.num_seconds(),
            max_age.num_seconds()
        )));
    }

    // only what the allocator itself steers is available to redistribute
    let charging_w: f64 = load_points
        .iter()
        .filter(|s| s.is_controlled())
        .map(|s| s.load_point.actual_power_w())
        .sum();
    let mut controllable = -availability.grid_power_w + charging_w - controls.power_buffer_w;

    let mut allowance = 0.0;
    if let Some(soc) = availability.home_battery_soc {
        let battery_charging_w = availability.home_battery_power_w.max(0.0);
        if soc >= battery.min_soc {
            controllable += battery_charging_w;
        } else {
            controllable -= (battery.reserve_w - battery_charging_w).max(0.0);
        }
        if soc > battery.discharge_min_soc {
            allowance = battery.max_discharge_w;
        }
    }

    Ok(PowerBudget::new(controllable, allowance))
}
