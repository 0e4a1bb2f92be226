//! Load point data model
//!
//! A load point is either a vehicle whose onboard charger is governed
//! directly or a charging-station connector governed locally. Snapshots of
//! both the live state ([`LoadPoint`]) and the bounds it must respect
//! ([`ChargingConstraints`]) are rebuilt fresh every cycle from telemetry and
//! static configuration.

use crate::config::LoadPointConfig;
use crate::error::{HelioError, Result};
#[cfg(feature = "schema")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a load point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadPointId {
    pub vehicle_id: Option<String>,
    pub connector_id: Option<String>,
}

impl LoadPointId {
    /// Build an identity; at least one side must be set
    pub fn new(vehicle_id: Option<String>, connector_id: Option<String>) -> Result<Self> {
        if vehicle_id.is_none() && connector_id.is_none() {
            return Err(HelioError::config(
                "load point needs a vehicle id or a connector id",
            ));
        }
        Ok(Self {
            vehicle_id,
            connector_id,
        })
    }

    pub fn vehicle(id: &str) -> Self {
        Self {
            vehicle_id: Some(id.to_string()),
            connector_id: None,
        }
    }

    pub fn connector(id: &str) -> Self {
        Self {
            vehicle_id: None,
            connector_id: Some(id.to_string()),
        }
    }

    /// Identity used by a static configuration entry
    pub fn from_config(cfg: &LoadPointConfig) -> Result<Self> {
        Self::new(cfg.vehicle_id.clone(), cfg.connector_id.clone())
    }
}

impl fmt::Display for LoadPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.vehicle_id, &self.connector_id) {
            (Some(v), Some(c)) => write!(f, "vehicle:{}@connector:{}", v, c),
            (Some(v), None) => write!(f, "vehicle:{}", v),
            (None, Some(c)) => write!(f, "connector:{}", c),
            (None, None) => write!(f, "unidentified"),
        }
    }
}

/// Which side tracks the last commanded current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub enum Governance {
    /// The vehicle's onboard charger is commanded directly
    #[serde(rename = "vehicle")]
    VehicleManaged,
    /// A charging-station connector is commanded locally
    #[serde(rename = "connector")]
    ConnectorManaged,
}

/// Administrative charge mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum ChargeMode {
    /// Never charge automatically
    #[default]
    Off,
    /// Solar-surplus driven allocation
    Auto,
    /// User-controlled; allocation leaves it untouched
    Manual,
}

/// Ascending priority: lower values are served first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ChargingPriority(pub u32);

/// Live state of one load point for the current cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPoint {
    pub id: LoadPointId,
    pub plugged_in: bool,
    pub at_home: bool,
    pub governance: Governance,
    pub priority: ChargingPriority,
    pub mode: ChargeMode,
    /// Measured current per phase (A)
    pub actual_current: f64,
    pub actual_phases: Option<u8>,
    pub estimated_voltage: Option<f64>,
    /// Last current the vehicle reports as applied (vehicle-managed)
    pub vehicle_last_applied_current: Option<f64>,
    /// Last current sent to the connector (connector-managed)
    pub connector_last_commanded_current: Option<f64>,
}

impl LoadPoint {
    /// Measured power draw (W); zero when voltage or phases are unknown
    pub fn actual_power_w(&self) -> f64 {
        match (self.estimated_voltage, self.actual_phases) {
            (Some(v), Some(p)) => self.actual_current * v * f64::from(p),
            _ => 0.0,
        }
    }
}

/// Bounds and limits a load point must respect this cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingConstraints {
    pub min_current: f64,
    /// May be below `min_current` after an upstream cap; handled, not an error
    pub max_current: f64,
    pub min_phases: u8,
    pub max_phases: u8,
    pub soc: Option<f64>,
    pub max_soc: f64,
    pub vehicle_soc_limit: Option<f64>,
    pub charge_start_allowed: bool,
    pub is_charging: bool,
}

/// Live per-load-point state as delivered by a state provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPointTelemetry {
    pub id: LoadPointId,
    pub plugged_in: bool,
    pub at_home: bool,
    pub actual_current: f64,
    pub actual_phases: Option<u8>,
    pub voltage: Option<f64>,
    pub soc: Option<f64>,
    pub vehicle_soc_limit: Option<f64>,
    pub charge_start_allowed: bool,
    pub is_charging: bool,
    pub vehicle_last_applied_current: Option<f64>,
    pub connector_last_commanded_current: Option<f64>,
}

impl LoadPointTelemetry {
    /// An unplugged, idle load point
    pub fn idle(id: LoadPointId) -> Self {
        Self {
            id,
            plugged_in: false,
            at_home: true,
            actual_current: 0.0,
            actual_phases: None,
            voltage: None,
            soc: None,
            vehicle_soc_limit: None,
            charge_start_allowed: true,
            is_charging: false,
            vehicle_last_applied_current: None,
            connector_last_commanded_current: None,
        }
    }
}

/// One load point as handed to the allocator
///
/// `constraints` carries the configuration error when mandatory bounds are
/// missing, so the allocator can skip that load point while still reporting it.
#[derive(Debug)]
pub struct LoadPointSnapshot {
    pub load_point: LoadPoint,
    pub constraints: Result<ChargingConstraints>,
}

impl LoadPointSnapshot {
    /// Merge static configuration with live telemetry
    pub fn build(cfg: &LoadPointConfig, telemetry: &LoadPointTelemetry, mode: ChargeMode) -> Self {
        let actual_phases = telemetry
            .actual_phases
            .filter(|p| *p > 0)
            .or(cfg.max_phases);
        let load_point = LoadPoint {
            id: telemetry.id.clone(),
            plugged_in: telemetry.plugged_in,
            at_home: telemetry.at_home,
            governance: cfg.governance,
            priority: ChargingPriority(cfg.priority),
            mode,
            actual_current: telemetry.actual_current.max(0.0),
            actual_phases,
            estimated_voltage: telemetry.voltage.filter(|v| *v > 0.0).or(cfg.nominal_voltage),
            vehicle_last_applied_current: telemetry.vehicle_last_applied_current,
            connector_last_commanded_current: telemetry.connector_last_commanded_current,
        };
        let constraints = Self::constraints_from(cfg, telemetry);
        Self {
            load_point,
            constraints,
        }
    }

    /// Whether the allocator steers this load point's current this cycle
    ///
    /// Manual and Off load points, and those without usable bounds, draw
    /// whatever they draw; that power is never part of the budget.
    pub fn is_controlled(&self) -> bool {
        self.load_point.mode == ChargeMode::Auto && self.constraints.is_ok()
    }

    fn constraints_from(
        cfg: &LoadPointConfig,
        telemetry: &LoadPointTelemetry,
    ) -> Result<ChargingConstraints> {
        let bound = |v: Option<f64>, name: &str| {
            v.filter(|x| x.is_finite() && *x >= 0.0)
                .ok_or_else(|| HelioError::config(format!("missing or invalid {}", name)))
        };
        let min_current = bound(cfg.min_current, "min_current")?;
        let max_current = bound(cfg.max_current, "max_current")?;
        let min_phases = cfg
            .min_phases
            .ok_or_else(|| HelioError::config("missing min_phases"))?;
        let max_phases = cfg
            .max_phases
            .ok_or_else(|| HelioError::config("missing max_phases"))?;
        if min_phases == 0 || min_phases > max_phases {
            return Err(HelioError::config(format!(
                "invalid phase range {}..={}",
                min_phases, max_phases
            )));
        }
        Ok(ChargingConstraints {
            min_current,
            max_current,
            min_phases,
            max_phases,
            soc: telemetry.soc,
            max_soc: cfg.max_soc,
            vehicle_soc_limit: telemetry.vehicle_soc_limit,
            charge_start_allowed: telemetry.charge_start_allowed,
            is_charging: telemetry.is_charging,
        })
    }
}

/// Lower each load point's ceiling so the site-wide combined current stays under `cap`.
///
/// Other load points are assumed to keep drawing their actual current, so the
/// headroom for one load point is `cap` minus everybody else's draw. The
/// result may drop below `min_current`.
pub fn apply_combined_current_cap(snapshots: &mut [LoadPointSnapshot], cap: f64) {
    let total: f64 = snapshots
        .iter()
        .map(|s| s.load_point.actual_current)
        .sum();
    for snapshot in snapshots.iter_mut() {
        let others = total - snapshot.load_point.actual_current;
        let headroom = (cap - others).max(0.0);
        if let Ok(constraints) = snapshot.constraints.as_mut()
            && constraints.max_current > headroom
        {
            constraints.max_current = headroom;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry(id: LoadPointId, current: f64) -> LoadPointTelemetry {
        LoadPointTelemetry {
            plugged_in: true,
            actual_current: current,
            actual_phases: Some(3),
            is_charging: current > 0.0,
            ..LoadPointTelemetry::idle(id)
        }
    }

    #[test]
    fn id_requires_one_side() {
        assert!(LoadPointId::new(None, None).is_err());
        let id = LoadPointId::new(Some("vin1".into()), Some("c1".into())).unwrap();
        assert_eq!(id.to_string(), "vehicle:vin1@connector:c1");
        assert_eq!(LoadPointId::connector("c2").to_string(), "connector:c2");
    }

    #[test]
    fn snapshot_merges_config_and_telemetry() {
        let cfg = LoadPointConfig::default();
        let t = telemetry(LoadPointId::connector("connector-1"), 8.0);
        let snap = LoadPointSnapshot::build(&cfg, &t, ChargeMode::Auto);
        assert_eq!(snap.load_point.actual_phases, Some(3));
        assert_eq!(snap.load_point.estimated_voltage, Some(230.0));
        assert!((snap.load_point.actual_power_w() - 8.0 * 230.0 * 3.0).abs() < 1e-9);
        let c = snap.constraints.unwrap();
        assert!((c.min_current - 6.0).abs() < 1e-9);
        assert!(c.is_charging);
    }

    #[test]
    fn snapshot_falls_back_to_configured_max_phases_when_idle() {
        let cfg = LoadPointConfig::default();
        let mut t = telemetry(LoadPointId::connector("connector-1"), 0.0);
        t.actual_phases = Some(0);
        let snap = LoadPointSnapshot::build(&cfg, &t, ChargeMode::Auto);
        assert_eq!(snap.load_point.actual_phases, Some(3));
    }

    #[test]
    fn missing_bounds_are_configuration_errors() {
        let cfg = LoadPointConfig {
            max_current: None,
            ..LoadPointConfig::default()
        };
        let t = telemetry(LoadPointId::connector("connector-1"), 0.0);
        let snap = LoadPointSnapshot::build(&cfg, &t, ChargeMode::Auto);
        assert!(matches!(snap.constraints, Err(HelioError::Config { .. })));
    }

    #[test]
    fn combined_cap_lowers_ceiling_below_minimum() {
        let cfg = LoadPointConfig::default();
        let mut snaps = vec![
            LoadPointSnapshot::build(
                &cfg,
                &telemetry(LoadPointId::connector("a"), 14.0),
                ChargeMode::Auto,
            ),
            LoadPointSnapshot::build(
                &cfg,
                &telemetry(LoadPointId::connector("b"), 0.0),
                ChargeMode::Auto,
            ),
        ];
        apply_combined_current_cap(&mut snaps, 18.0);
        let a = snaps[0].constraints.as_ref().unwrap();
        let b = snaps[1].constraints.as_ref().unwrap();
        assert!((a.max_current - 16.0).abs() < 1e-9);
        assert!((b.max_current - 4.0).abs() < 1e-9);
        assert!(b.max_current < b.min_current);
    }
}
