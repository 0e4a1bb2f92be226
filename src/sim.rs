//! In-memory site for the binary and for tests
//!
//! Models a PV array, a household base load, an optional home battery and any
//! number of load points whose actual current ramps towards the last
//! commanded value instead of jumping there. The grid meter is derived from
//! all of the above, so allocation decisions feed back into the next reading.

use crate::allocation::{PowerBudget, TargetChargeCommand};
use crate::error::{HelioError, Result};
use crate::loadpoint::{LoadPointId, LoadPointTelemetry};
use crate::telemetry::{
    ActuationRequest, ChargeActuationSink, HomeBatterySink, LoadPointStateProvider,
    PowerAvailability, PowerAvailabilityProvider,
};
use chrono::{DateTime, Timelike, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_VOLTAGE: f64 = 230.0;

#[derive(Debug, Clone)]
struct SimLoadPoint {
    telemetry: LoadPointTelemetry,
    commanded: f64,
}

#[derive(Debug, Clone)]
struct SiteState {
    solar_w: f64,
    base_load_w: f64,
    battery_soc: Option<f64>,
    battery_power_w: f64,
    ramp_step_a: f64,
    clock: Option<DateTime<Utc>>,
    offline: bool,
    load_points: Vec<SimLoadPoint>,
    requests: Vec<ActuationRequest>,
    handed_over: Vec<PowerBudget>,
}

/// Cloneable handle; all clones share one site
#[derive(Debug, Clone)]
pub struct SimulatedSite {
    state: Arc<Mutex<SiteState>>,
}

impl SimulatedSite {
    pub fn new(solar_w: f64, base_load_w: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SiteState {
                solar_w,
                base_load_w,
                battery_soc: None,
                battery_power_w: 0.0,
                ramp_step_a: 2.0,
                clock: None,
                offline: false,
                load_points: Vec::new(),
                requests: Vec::new(),
                handed_over: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SiteState> {
        // a panicking test thread must not take the whole site down with it
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a load point; it starts idle, plugged in and at home
    pub fn add_load_point(&self, id: LoadPointId) {
        let mut telemetry = LoadPointTelemetry::idle(id);
        telemetry.plugged_in = true;
        telemetry.at_home = true;
        telemetry.voltage = Some(DEFAULT_VOLTAGE);
        self.lock().load_points.push(SimLoadPoint {
            telemetry,
            commanded: 0.0,
        });
    }

    /// Modify a load point's telemetry in place
    pub fn update_load_point<F>(&self, id: &LoadPointId, f: F) -> Result<()>
    where
        F: FnOnce(&mut LoadPointTelemetry),
    {
        let mut state = self.lock();
        let lp = state
            .load_points
            .iter_mut()
            .find(|lp| &lp.telemetry.id == id)
            .ok_or_else(|| HelioError::provider(format!("unknown load point {}", id)))?;
        f(&mut lp.telemetry);
        Ok(())
    }

    pub fn load_point(&self, id: &LoadPointId) -> Option<LoadPointTelemetry> {
        self.lock()
            .load_points
            .iter()
            .find(|lp| &lp.telemetry.id == id)
            .map(|lp| lp.telemetry.clone())
    }

    pub fn set_solar(&self, solar_w: f64) {
        self.lock().solar_w = solar_w.max(0.0);
    }

    pub fn set_base_load(&self, base_load_w: f64) {
        self.lock().base_load_w = base_load_w.max(0.0);
    }

    pub fn set_battery(&self, soc: Option<f64>, power_w: f64) {
        let mut state = self.lock();
        state.battery_soc = soc;
        state.battery_power_w = power_w;
    }

    /// Amps the actual current moves per [`step`](Self::step)
    pub fn set_ramp_step(&self, amps: f64) {
        self.lock().ramp_step_a = amps.max(0.0);
    }

    /// Pin the measurement timestamp; `None` follows the wall clock
    pub fn set_clock(&self, at: Option<DateTime<Utc>>) {
        self.lock().clock = at;
    }

    /// While offline every fetch fails
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Advance every load point one ramp step towards its commanded current
    pub fn step(&self) {
        let mut state = self.lock();
        let ramp = state.ramp_step_a;
        for lp in &mut state.load_points {
            let t = &mut lp.telemetry;
            let delta = lp.commanded - t.actual_current;
            t.actual_current += delta.clamp(-ramp, ramp);
            if t.actual_current < 1e-6 {
                t.actual_current = 0.0;
            }
            t.is_charging = lp.commanded > 0.0 || t.actual_current > 0.0;
        }
    }

    /// Grid meter reading: positive when importing
    pub fn grid_power_w(&self) -> f64 {
        let state = self.lock();
        let charging_w: f64 = state
            .load_points
            .iter()
            .map(|lp| {
                let t = &lp.telemetry;
                t.actual_current
                    * t.voltage.unwrap_or(DEFAULT_VOLTAGE)
                    * f64::from(t.actual_phases.unwrap_or(1))
            })
            .sum();
        state.base_load_w + charging_w + state.battery_power_w - state.solar_w
    }

    /// Every request dispatched so far, oldest first
    pub fn requests(&self) -> Vec<ActuationRequest> {
        self.lock().requests.clone()
    }

    pub fn last_handed_over(&self) -> Option<PowerBudget> {
        self.lock().handed_over.last().copied()
    }

    /// Bell-shaped PV output between 06:00 and 18:00 UTC
    pub fn solar_curve(peak_w: f64, at: DateTime<Utc>) -> f64 {
        let hour = f64::from(at.hour()) + f64::from(at.minute()) / 60.0;
        if !(6.0..18.0).contains(&hour) {
            return 0.0;
        }
        peak_w * (std::f64::consts::PI * (hour - 6.0) / 12.0).sin()
    }
}

#[async_trait::async_trait]
impl PowerAvailabilityProvider for SimulatedSite {
    async fn fetch_availability(&self) -> Result<PowerAvailability> {
        let grid_power_w = self.grid_power_w();
        let state = self.lock();
        if state.offline {
            return Err(HelioError::provider("site meter offline"));
        }
        Ok(PowerAvailability {
            solar_production_w: state.solar_w,
            grid_power_w,
            home_battery_soc: state.battery_soc,
            home_battery_power_w: state.battery_power_w,
            measured_at: state.clock.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait::async_trait]
impl LoadPointStateProvider for SimulatedSite {
    async fn fetch_load_points(&self) -> Result<Vec<LoadPointTelemetry>> {
        let state = self.lock();
        if state.offline {
            return Err(HelioError::provider("load point gateway offline"));
        }
        Ok(state
            .load_points
            .iter()
            .map(|lp| lp.telemetry.clone())
            .collect())
    }
}

impl ChargeActuationSink for SimulatedSite {
    fn dispatch(&self, request: ActuationRequest) {
        let mut state = self.lock();
        if let Some(lp) = state
            .load_points
            .iter_mut()
            .find(|lp| lp.telemetry.id == request.load_point)
        {
            match request.command {
                TargetChargeCommand::NoChange => {}
                TargetChargeCommand::Stop => {
                    lp.commanded = 0.0;
                    lp.telemetry.connector_last_commanded_current = Some(0.0);
                }
                TargetChargeCommand::Set { current, phases } => {
                    if let Some(c) = current {
                        lp.commanded = c;
                        lp.telemetry.connector_last_commanded_current = Some(c);
                        lp.telemetry.vehicle_last_applied_current = Some(c);
                    }
                    if let Some(p) = phases {
                        lp.telemetry.actual_phases = Some(p);
                    }
                }
            }
        }
        state.requests.push(request);
    }
}

impl HomeBatterySink for SimulatedSite {
    fn hand_over(&self, leftover: PowerBudget) {
        self.lock().handed_over.push(leftover);
    }
}
