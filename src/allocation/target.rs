//! Conversion of an offered power share into a bounded current target

use super::{TargetChargeCommand, TargetDecision};
use crate::config::SOC_LIMIT_MIN_DIFFERENCE;
use crate::diagnostics::ChargeReason;
use crate::error::{HelioError, Result};
use crate::loadpoint::{ChargeMode, ChargingConstraints, LoadPoint};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct TargetCurrentCalculator {
    /// Percentage points below the vehicle's own limit that count as "reached"
    pub soc_limit_min_difference: f64,
}

impl Default for TargetCurrentCalculator {
    fn default() -> Self {
        Self {
            soc_limit_min_difference: SOC_LIMIT_MIN_DIFFERENCE,
        }
    }
}

impl TargetCurrentCalculator {
    pub fn new(soc_limit_min_difference: f64) -> Self {
        Self {
            soc_limit_min_difference,
        }
    }

    /// Decide the target for one load point given `power_w` offered to it.
    ///
    /// Checks run in a fixed order and the first match wins. Only the final
    /// conversion can fail, and only on unresolvable voltage or phases.
    pub fn get_target(
        &self,
        constraints: &ChargingConstraints,
        load_point: &LoadPoint,
        power_w: f64,
        ignore_timers: bool,
        _now: DateTime<Utc>,
    ) -> Result<TargetDecision> {
        if !load_point.plugged_in {
            return Ok(TargetDecision::no_change(ChargeReason::NotPluggedIn));
        }
        if !load_point.at_home {
            return Ok(TargetDecision::no_change(ChargeReason::NotAtHome));
        }
        if constraints.max_current < constraints.min_current {
            let reason = ChargeReason::MaxCurrentBelowMinCurrent {
                stopping: constraints.is_charging,
            };
            return Ok(if constraints.is_charging {
                TargetDecision::stop(reason)
            } else {
                TargetDecision::no_change(reason)
            });
        }
        match load_point.mode {
            ChargeMode::Manual => return Ok(TargetDecision::no_change(ChargeReason::ManualMode)),
            ChargeMode::Off => return Ok(TargetDecision::no_change(ChargeReason::ModeOff)),
            ChargeMode::Auto => {}
        }
        if let Some(soc) = constraints.soc
            && soc >= constraints.max_soc
            && !ignore_timers
        {
            return Ok(TargetDecision::no_change(ChargeReason::MaxSocReached {
                soc,
                max_soc: constraints.max_soc,
            }));
        }
        if let (Some(soc), Some(limit)) = (constraints.soc, constraints.vehicle_soc_limit)
            && soc >= limit - self.soc_limit_min_difference
        {
            return Ok(TargetDecision::no_change(
                ChargeReason::VehicleSocLimitReached { soc, limit },
            ));
        }

        let voltage = load_point
            .estimated_voltage
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| {
                HelioError::config(format!("{}: charging voltage unknown", load_point.id))
            })?;
        let phases = load_point
            .actual_phases
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                HelioError::config(format!("{}: phase count unknown", load_point.id))
            })?;

        let raw_current = power_w / (voltage * f64::from(phases));
        let current = clamp_current(raw_current, constraints.min_current, constraints.max_current);
        Ok(TargetDecision {
            command: TargetChargeCommand::set(current, phases),
            reason: ChargeReason::SurplusTarget { current, phases },
        })
    }
}

/// Clamp without panicking; callers guarantee `min <= max`
pub(crate) fn clamp_current(raw: f64, min: f64, max: f64) -> f64 {
    if raw.is_nan() {
        return min;
    }
    raw.max(min).min(max)
}
