//! Usage estimation for loads that lag behind their commands
//!
//! The allocator cannot see what a load point really draws until the next
//! cycle. A load that is already under-drawing its last command (still ramping,
//! or self-limiting) is assumed to keep drawing only what it draws now, so the
//! budget is not over-committed to it.

use super::TargetChargeCommand;
use crate::config::NOT_USED_TOLERANCE_A;
use crate::loadpoint::{Governance, LoadPoint};

/// Where the "last commanded current" of a load point is tracked
pub trait CommandedCurrentSource {
    fn last_commanded_current(&self, load_point: &LoadPoint) -> Option<f64>;
}

/// The vehicle reports the amperage it last applied
pub struct VehicleManaged;

/// The connector remembers what it was last told
pub struct ConnectorManaged;

impl CommandedCurrentSource for VehicleManaged {
    fn last_commanded_current(&self, load_point: &LoadPoint) -> Option<f64> {
        load_point.vehicle_last_applied_current
    }
}

impl CommandedCurrentSource for ConnectorManaged {
    fn last_commanded_current(&self, load_point: &LoadPoint) -> Option<f64> {
        load_point.connector_last_commanded_current
    }
}

impl Governance {
    pub fn commanded_current_source(self) -> &'static dyn CommandedCurrentSource {
        match self {
            Governance::VehicleManaged => &VehicleManaged,
            Governance::ConnectorManaged => &ConnectorManaged,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UsageReconciler {
    /// Under-draw above this many amps counts as "not keeping up"
    pub not_used_tolerance_a: f64,
}

impl Default for UsageReconciler {
    fn default() -> Self {
        Self {
            not_used_tolerance_a: NOT_USED_TOLERANCE_A,
        }
    }
}

impl UsageReconciler {
    pub fn new(not_used_tolerance_a: f64) -> Self {
        Self {
            not_used_tolerance_a,
        }
    }

    /// Amps the load point is expected to draw this cycle after `command`
    pub fn estimate_usage(&self, command: &TargetChargeCommand, load_point: &LoadPoint) -> f64 {
        self.estimate_usage_with(
            command,
            load_point,
            load_point.governance.commanded_current_source(),
        )
    }

    pub fn estimate_usage_with(
        &self,
        command: &TargetChargeCommand,
        load_point: &LoadPoint,
        source: &dyn CommandedCurrentSource,
    ) -> f64 {
        let TargetChargeCommand::Set { current, .. } = command else {
            return 0.0;
        };
        let last_commanded = source.last_commanded_current(load_point).unwrap_or(0.0);
        let not_used = last_commanded - load_point.actual_current;
        if not_used > self.not_used_tolerance_a {
            return load_point.actual_current;
        }
        current.unwrap_or(load_point.actual_current)
    }

    /// Same estimate in watts, using the command's phases when it sets them
    ///
    /// Unknown voltage or phases yield zero; the target calculator has already
    /// rejected such load points before any `Set` command exists.
    pub fn estimate_usage_watts(&self, command: &TargetChargeCommand, load_point: &LoadPoint) -> f64 {
        let amps = self.estimate_usage(command, load_point);
        let phases = command.target_phases().or(load_point.actual_phases);
        match (load_point.estimated_voltage, phases) {
            (Some(v), Some(p)) => amps * v * f64::from(p),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadpoint::{ChargeMode, ChargingPriority, LoadPointId};

    fn load_point(governance: Governance, actual: f64) -> LoadPoint {
        LoadPoint {
            id: LoadPointId::vehicle("vin"),
            plugged_in: true,
            at_home: true,
            governance,
            priority: ChargingPriority(0),
            mode: ChargeMode::Auto,
            actual_current: actual,
            actual_phases: Some(3),
            estimated_voltage: Some(230.0),
            vehicle_last_applied_current: None,
            connector_last_commanded_current: None,
        }
    }

    #[test]
    fn no_change_and_stop_use_nothing() {
        let lp = load_point(Governance::VehicleManaged, 10.0);
        let r = UsageReconciler::default();
        assert_eq!(r.estimate_usage(&TargetChargeCommand::NoChange, &lp), 0.0);
        assert_eq!(r.estimate_usage(&TargetChargeCommand::Stop, &lp), 0.0);
    }

    #[test]
    fn lagging_vehicle_keeps_actual_current() {
        let mut lp = load_point(Governance::VehicleManaged, 10.0);
        lp.vehicle_last_applied_current = Some(16.0);
        let r = UsageReconciler::default();
        let amps = r.estimate_usage(&TargetChargeCommand::set(20.0, 3), &lp);
        assert_eq!(amps, 10.0);
    }

    #[test]
    fn keeping_up_uses_target() {
        let mut lp = load_point(Governance::VehicleManaged, 15.5);
        lp.vehicle_last_applied_current = Some(16.0);
        let r = UsageReconciler::default();
        assert_eq!(r.estimate_usage(&TargetChargeCommand::set(20.0, 3), &lp), 20.0);
    }

    #[test]
    fn exactly_one_amp_short_is_still_keeping_up() {
        let mut lp = load_point(Governance::ConnectorManaged, 15.0);
        lp.connector_last_commanded_current = Some(16.0);
        let r = UsageReconciler::default();
        assert_eq!(r.estimate_usage(&TargetChargeCommand::set(8.0, 3), &lp), 8.0);
    }

    #[test]
    fn governance_selects_the_source() {
        // Vehicle value would signal lag, but the connector governs this one
        let mut lp = load_point(Governance::ConnectorManaged, 10.0);
        lp.vehicle_last_applied_current = Some(16.0);
        lp.connector_last_commanded_current = Some(10.0);
        let r = UsageReconciler::default();
        assert_eq!(r.estimate_usage(&TargetChargeCommand::set(12.0, 3), &lp), 12.0);
    }

    #[test]
    fn unresolvable_source_counts_as_zero() {
        let lp = load_point(Governance::ConnectorManaged, 4.0);
        let r = UsageReconciler::default();
        assert_eq!(r.estimate_usage(&TargetChargeCommand::set(6.0, 3), &lp), 6.0);
    }

    #[test]
    fn unset_current_falls_back_to_actual() {
        let lp = load_point(Governance::VehicleManaged, 7.0);
        let cmd = TargetChargeCommand::Set {
            current: None,
            phases: Some(1),
        };
        let r = UsageReconciler::default();
        assert_eq!(r.estimate_usage(&cmd, &lp), 7.0);
        assert!((r.estimate_usage_watts(&cmd, &lp) - 7.0 * 230.0).abs() < 1e-9);
    }

    #[test]
    fn tolerance_is_overridable() {
        let mut lp = load_point(Governance::VehicleManaged, 10.0);
        lp.vehicle_last_applied_current = Some(16.0);
        let r = UsageReconciler::new(8.0);
        assert_eq!(r.estimate_usage(&TargetChargeCommand::set(20.0, 3), &lp), 20.0);
    }
}
