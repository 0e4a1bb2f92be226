//! Cooldown-gated phase switching
//!
//! Phase count is not part of the per-cycle current target; it changes only
//! when the offered power is comfortably outside what the current phase count
//! can absorb, and never twice within the cooldown.

use crate::loadpoint::{ChargingConstraints, LoadPoint};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
pub struct PhaseSwitchEvaluator {
    pub cooldown: Duration,
    pub hysteresis_w: f64,
}

impl PhaseSwitchEvaluator {
    pub fn new(cooldown: Duration, hysteresis_w: f64) -> Self {
        Self {
            cooldown,
            hysteresis_w: hysteresis_w.max(0.0),
        }
    }

    /// Phase count an idle load point should start on
    ///
    /// The high count only when the surplus covers its minimum current on
    /// every phase; otherwise the low count.
    pub fn start_phases(
        &self,
        constraints: &ChargingConstraints,
        voltage: f64,
        offered_w: f64,
    ) -> u8 {
        let high = constraints.max_phases;
        let high_min_w = constraints.min_current * voltage * f64::from(high);
        if constraints.min_phases < high && offered_w < high_min_w {
            constraints.min_phases
        } else {
            high
        }
    }

    /// New phase count for a charging load point, if a switch is due
    pub fn evaluate(
        &self,
        constraints: &ChargingConstraints,
        load_point: &LoadPoint,
        offered_w: f64,
        last_switch: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<u8> {
        if !constraints.is_charging || constraints.min_phases >= constraints.max_phases {
            return None;
        }
        if let Some(last) = last_switch
            && now - last < self.cooldown
        {
            return None;
        }
        let voltage = load_point.estimated_voltage?;
        let current = load_point.actual_phases?;

        let low = constraints.min_phases;
        let high = constraints.max_phases;
        let low_max_w = constraints.max_current * voltage * f64::from(low);
        let high_min_w = constraints.min_current * voltage * f64::from(high);

        let target = if current >= high {
            // consider downswitching if the low phase count can absorb everything
            if offered_w < low_max_w - self.hysteresis_w {
                low
            } else {
                high
            }
        } else if offered_w > high_min_w + self.hysteresis_w {
            high
        } else {
            low
        };

        (target != current).then_some(target)
    }
}
