//! Per-cycle "why charging / why not" diagnostics
//!
//! Every load point gets exactly one [`ChargeReason`] per cycle, including
//! the cycles where nothing is changed.

use crate::allocation::{PowerBudget, TargetChargeCommand};
use crate::loadpoint::LoadPointId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Structured reason attached to each load point decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ChargeReason {
    NotPluggedIn,
    NotAtHome,
    /// Ceiling dropped below the hardware minimum
    MaxCurrentBelowMinCurrent { stopping: bool },
    ManualMode,
    ModeOff,
    MaxSocReached { soc: f64, max_soc: f64 },
    VehicleSocLimitReached { soc: f64, limit: f64 },
    /// Set to the computed target current
    SurplusTarget { current: f64, phases: u8 },
    /// Enough surplus, start pending the switch-on wait
    WaitingForSwitchOn { relevant_at: Option<DateTime<Utc>> },
    /// Enough surplus held long enough; charging starts
    Starting { current: f64, phases: u8 },
    /// Not enough surplus for the minimum current
    InsufficientSurplus { offered_w: f64, required_w: f64 },
    /// The load point refuses new starts right now
    StartNotAllowed,
    /// Surplus too low, stop pending the switch-off wait
    WaitingForSwitchOff { relevant_at: Option<DateTime<Utc>> },
    /// Surplus too low for long enough; charging stops
    StoppingInsufficientSurplus,
    PhaseSwitch { from: u8, to: u8 },
    ConfigurationError { message: String },
    /// Cycle was cancelled before this load point was reached
    Cancelled,
}

impl fmt::Display for ChargeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeReason::NotPluggedIn => write!(f, "not plugged in"),
            ChargeReason::NotAtHome => write!(f, "not at home"),
            ChargeReason::MaxCurrentBelowMinCurrent { stopping } => {
                if *stopping {
                    write!(f, "max current below min current; stopping")
                } else {
                    write!(f, "max current below min current")
                }
            }
            ChargeReason::ManualMode => write!(f, "manual mode"),
            ChargeReason::ModeOff => write!(f, "charge mode off"),
            ChargeReason::MaxSocReached { soc, max_soc } => {
                write!(f, "SoC {:.1}% reached max SoC {:.1}%", soc, max_soc)
            }
            ChargeReason::VehicleSocLimitReached { soc, limit } => {
                write!(f, "SoC {:.1}% reached vehicle limit {:.1}%", soc, limit)
            }
            ChargeReason::SurplusTarget { current, phases } => {
                write!(f, "surplus target {:.2} A on {} phase(s)", current, phases)
            }
            ChargeReason::WaitingForSwitchOn { relevant_at } => match relevant_at {
                Some(t) => write!(f, "waiting to start until {}", t.to_rfc3339()),
                None => write!(f, "waiting to start"),
            },
            ChargeReason::Starting { current, phases } => {
                write!(f, "starting at {:.2} A on {} phase(s)", current, phases)
            }
            ChargeReason::InsufficientSurplus {
                offered_w,
                required_w,
            } => write!(
                f,
                "insufficient surplus: {:.0} W offered, {:.0} W required",
                offered_w, required_w
            ),
            ChargeReason::StartNotAllowed => write!(f, "start not allowed"),
            ChargeReason::WaitingForSwitchOff { relevant_at } => match relevant_at {
                Some(t) => write!(f, "waiting to stop until {}", t.to_rfc3339()),
                None => write!(f, "waiting to stop"),
            },
            ChargeReason::StoppingInsufficientSurplus => {
                write!(f, "stopping: insufficient surplus")
            }
            ChargeReason::PhaseSwitch { from, to } => {
                write!(f, "switching phases {} -> {}", from, to)
            }
            ChargeReason::ConfigurationError { message } => {
                write!(f, "configuration error: {}", message)
            }
            ChargeReason::Cancelled => write!(f, "cycle cancelled"),
        }
    }
}

/// Diagnostics for one load point in one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPointDiagnostics {
    pub load_point: LoadPointId,
    pub command: TargetChargeCommand,
    pub reason: ChargeReason,
    /// Power offered to this load point (W)
    pub offered_power_w: f64,
    /// Estimated draw deducted from the budget (W)
    pub estimated_usage_w: f64,
}

/// Everything one allocation cycle decided
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub starting_budget: PowerBudget,
    pub leftover_budget: PowerBudget,
    pub entries: Vec<LoadPointDiagnostics>,
}

impl CycleReport {
    pub fn entry(&self, id: &LoadPointId) -> Option<&LoadPointDiagnostics> {
        self.entries.iter().find(|e| &e.load_point == id)
    }

    /// Commands that must be dispatched (everything except `NoChange`)
    pub fn commands(&self) -> impl Iterator<Item = (&LoadPointId, &TargetChargeCommand)> {
        self.entries
            .iter()
            .filter(|e| !e.command.is_no_change())
            .map(|e| (&e.load_point, &e.command))
    }
}
