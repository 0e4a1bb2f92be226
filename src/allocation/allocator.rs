//! Priority-ordered power budget allocation
//!
//! One call to [`PowerBudgetAllocator::allocate`] is one control cycle. Load
//! points are visited strictly in priority order because each one's estimated
//! usage shrinks the budget offered to the next.

use super::budget::{PowerBudget, recalculate};
use super::hysteresis::{TimeStampedCondition, is_relevant_and_fulfilled};
use super::phase::PhaseSwitchEvaluator;
use super::target::{TargetCurrentCalculator, clamp_current};
use super::usage::UsageReconciler;
use super::{TargetChargeCommand, TargetDecision};
use crate::config::ControlsConfig;
use crate::diagnostics::{ChargeReason, LoadPointDiagnostics};
use crate::logging::{LogContext, StructuredLogger, get_logger, get_logger_with_context};
use crate::loadpoint::{ChargingConstraints, LoadPoint, LoadPointId, LoadPointSnapshot};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tuning for one allocator instance
#[derive(Debug, Clone, Copy)]
pub struct AllocatorSettings {
    pub switch_on_wait: Duration,
    pub switch_off_wait: Duration,
    pub phase_switch_cooldown: Duration,
    pub phase_switch_hysteresis_w: f64,
    pub soc_limit_min_difference: f64,
    pub not_used_tolerance_a: f64,
}

impl AllocatorSettings {
    pub fn from_config(controls: &ControlsConfig) -> Self {
        Self {
            switch_on_wait: Duration::minutes(i64::from(controls.minutes_until_switch_on)),
            switch_off_wait: Duration::minutes(i64::from(controls.minutes_until_switch_off)),
            phase_switch_cooldown: Duration::seconds(i64::from(
                controls.phase_switch_cooldown_seconds,
            )),
            phase_switch_hysteresis_w: controls.phase_switch_hysteresis_watts,
            soc_limit_min_difference: controls.soc_limit_min_difference,
            not_used_tolerance_a: controls.not_used_tolerance_a,
        }
    }
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self::from_config(&ControlsConfig::default())
    }
}

/// Hysteresis memory of one load point, kept across cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchMemory {
    /// "Enough surplus to run at minimum current"
    pub should_start: TimeStampedCondition<bool>,
    /// "Not enough surplus to keep running"
    pub should_stop: TimeStampedCondition<bool>,
    pub last_phase_switch: Option<DateTime<Utc>>,
}

/// Cooperative cancellation checked between load points
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one allocation cycle
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    /// One entry per load point, in the order they were served
    pub entries: Vec<LoadPointDiagnostics>,
    /// Budget left after every load point; goes to the home battery controller
    pub leftover: PowerBudget,
}

pub struct PowerBudgetAllocator {
    settings: AllocatorSettings,
    target: TargetCurrentCalculator,
    usage: UsageReconciler,
    phase: PhaseSwitchEvaluator,
    memory: HashMap<LoadPointId, SwitchMemory>,
    logger: StructuredLogger,
}

impl PowerBudgetAllocator {
    pub fn new(settings: AllocatorSettings) -> Self {
        Self {
            settings,
            target: TargetCurrentCalculator::new(settings.soc_limit_min_difference),
            usage: UsageReconciler::new(settings.not_used_tolerance_a),
            phase: PhaseSwitchEvaluator::new(
                settings.phase_switch_cooldown,
                settings.phase_switch_hysteresis_w,
            ),
            memory: HashMap::new(),
            logger: get_logger("allocator"),
        }
    }

    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    pub fn memory(&self, id: &LoadPointId) -> Option<&SwitchMemory> {
        self.memory.get(id)
    }

    /// Run one cycle over `snapshots`, starting from `budget`.
    ///
    /// `ignore_timers` bypasses the switch-on/off waits and the max SoC stop.
    pub fn allocate(
        &mut self,
        mut snapshots: Vec<LoadPointSnapshot>,
        budget: PowerBudget,
        ignore_timers: bool,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> AllocationOutcome {
        // stable: equal priorities keep provider order
        snapshots.sort_by_key(|s| s.load_point.priority);

        let mut budget = budget;
        let mut entries = Vec::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let id = snapshot.load_point.id.clone();
            let offered_w = budget.offerable_w();

            if cancel.is_cancelled() {
                entries.push(LoadPointDiagnostics {
                    load_point: id,
                    command: TargetChargeCommand::NoChange,
                    reason: ChargeReason::Cancelled,
                    offered_power_w: offered_w,
                    estimated_usage_w: 0.0,
                });
                continue;
            }

            let decision = match snapshot.constraints.as_ref() {
                Ok(constraints) => self.decide(
                    constraints,
                    &snapshot.load_point,
                    offered_w,
                    ignore_timers,
                    now,
                ),
                Err(e) => {
                    self.load_point_logger(&id)
                        .warn(&format!("Skipping load point: {}", e));
                    TargetDecision::no_change(ChargeReason::ConfigurationError {
                        message: e.to_string(),
                    })
                }
            };

            let usage_w = if decision.command.is_no_change() && snapshot.is_controlled() {
                // left alone but still drawing; that draw is part of the starting budget
                snapshot.load_point.actual_power_w()
            } else {
                self.usage
                    .estimate_usage_watts(&decision.command, &snapshot.load_point)
            };
            budget = recalculate(budget, usage_w);

            self.logger.debug(&format!(
                "{}: {} (offered {:.0} W, estimated usage {:.0} W)",
                id, decision.reason, offered_w, usage_w
            ));

            entries.push(LoadPointDiagnostics {
                load_point: id,
                command: decision.command,
                reason: decision.reason,
                offered_power_w: offered_w,
                estimated_usage_w: usage_w,
            });
        }

        AllocationOutcome {
            entries,
            leftover: budget,
        }
    }

    fn decide(
        &mut self,
        constraints: &ChargingConstraints,
        load_point: &LoadPoint,
        offered_w: f64,
        ignore_timers: bool,
        now: DateTime<Utc>,
    ) -> TargetDecision {
        let decision = match self
            .target
            .get_target(constraints, load_point, offered_w, ignore_timers, now)
        {
            Ok(d) => d,
            Err(e) => {
                self.load_point_logger(&load_point.id)
                    .warn(&format!("Cannot compute target: {}", e));
                return TargetDecision::no_change(ChargeReason::ConfigurationError {
                    message: e.to_string(),
                });
            }
        };

        if matches!(
            decision.reason,
            ChargeReason::NotPluggedIn | ChargeReason::NotAtHome
        ) {
            // a new arrival has to prove its surplus from scratch
            self.memory.remove(&load_point.id);
            return decision;
        }

        let TargetChargeCommand::Set {
            current: Some(mut current),
            phases: Some(mut phases),
        } = decision.command
        else {
            return decision;
        };

        // an idle switchable load point starts on as few phases as the surplus needs
        let mut decision = decision;
        if !constraints.is_charging
            && constraints.min_phases < constraints.max_phases
            && let Some(voltage) = load_point.estimated_voltage
        {
            let start = self.phase.start_phases(constraints, voltage, offered_w);
            if start != phases {
                phases = start;
                current = clamp_current(
                    offered_w / (voltage * f64::from(phases)),
                    constraints.min_current,
                    constraints.max_current,
                );
                decision = TargetDecision {
                    command: TargetChargeCommand::set(current, phases),
                    reason: ChargeReason::SurplusTarget { current, phases },
                };
            }
        }

        let gated = self.gate_start_stop(
            decision,
            constraints,
            load_point,
            offered_w,
            (current, phases),
            ignore_timers,
            now,
        );

        if !constraints.is_charging || !matches!(gated.command, TargetChargeCommand::Set { .. }) {
            return gated;
        }

        let memory = self.memory.entry(load_point.id.clone()).or_default();
        match self.phase.evaluate(
            constraints,
            load_point,
            offered_w,
            memory.last_phase_switch,
            now,
        ) {
            Some(to) => {
                memory.last_phase_switch = Some(now);
                let from = load_point.actual_phases.unwrap_or(phases);
                self.load_point_logger(&load_point.id)
                    .info(&format!("Switching phases {} -> {}", from, to));
                TargetDecision {
                    command: TargetChargeCommand::Set {
                        current: None,
                        phases: Some(to),
                    },
                    reason: ChargeReason::PhaseSwitch { from, to },
                }
            }
            None => gated,
        }
    }

    /// Apply the switch-on/switch-off hysteresis to a computed `Set` target
    #[allow(clippy::too_many_arguments)]
    fn gate_start_stop(
        &mut self,
        decision: TargetDecision,
        constraints: &ChargingConstraints,
        load_point: &LoadPoint,
        offered_w: f64,
        (current, phases): (f64, u8),
        ignore_timers: bool,
        now: DateTime<Utc>,
    ) -> TargetDecision {
        let voltage = load_point.estimated_voltage.unwrap_or(0.0);
        let required_w = constraints.min_current * voltage * f64::from(phases);
        let enough = offered_w >= required_w;

        let memory = self.memory.entry(load_point.id.clone()).or_default();
        memory.should_start.update(enough, now);
        memory.should_stop.update(!enough, now);

        if constraints.is_charging {
            if enough {
                return decision;
            }
            let gate = is_relevant_and_fulfilled(
                &memory.should_stop,
                now,
                self.settings.switch_off_wait,
                &true,
            );
            if ignore_timers || gate.fulfilled {
                self.load_point_logger(&load_point.id).info(&format!(
                    "Stopping: {:.0} W offered, {:.0} W required",
                    offered_w, required_w
                ));
                return TargetDecision::stop(ChargeReason::StoppingInsufficientSurplus);
            }
            return TargetDecision {
                command: decision.command,
                reason: ChargeReason::WaitingForSwitchOff {
                    relevant_at: gate.relevant_at,
                },
            };
        }

        if !enough {
            return TargetDecision::no_change(ChargeReason::InsufficientSurplus {
                offered_w,
                required_w,
            });
        }
        if !constraints.charge_start_allowed {
            return TargetDecision::no_change(ChargeReason::StartNotAllowed);
        }
        let gate = is_relevant_and_fulfilled(
            &memory.should_start,
            now,
            self.settings.switch_on_wait,
            &true,
        );
        if ignore_timers || gate.fulfilled {
            self.load_point_logger(&load_point.id).info(&format!(
                "Starting at {:.2} A on {} phase(s)",
                current, phases
            ));
            return TargetDecision {
                command: decision.command,
                reason: ChargeReason::Starting { current, phases },
            };
        }
        TargetDecision::no_change(ChargeReason::WaitingForSwitchOn {
            relevant_at: gate.relevant_at,
        })
    }

    fn load_point_logger(&self, id: &LoadPointId) -> StructuredLogger {
        get_logger_with_context(LogContext::new("allocator").with_load_point(&id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadpoint::{ChargeMode, ChargingPriority, Governance};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    fn snapshot(name: &str, priority: u32, charging: bool, actual: f64) -> LoadPointSnapshot {
        LoadPointSnapshot {
            load_point: LoadPoint {
                id: LoadPointId::connector(name),
                plugged_in: true,
                at_home: true,
                governance: Governance::ConnectorManaged,
                priority: ChargingPriority(priority),
                mode: ChargeMode::Auto,
                actual_current: actual,
                actual_phases: Some(3),
                estimated_voltage: Some(230.0),
                vehicle_last_applied_current: None,
                connector_last_commanded_current: charging.then_some(actual),
            },
            constraints: Ok(ChargingConstraints {
                min_current: 6.0,
                max_current: 16.0,
                min_phases: 3,
                max_phases: 3,
                soc: None,
                max_soc: 100.0,
                vehicle_soc_limit: None,
                charge_start_allowed: true,
                is_charging: charging,
            }),
        }
    }

    fn allocator() -> PowerBudgetAllocator {
        PowerBudgetAllocator::new(AllocatorSettings {
            switch_on_wait: Duration::minutes(5),
            switch_off_wait: Duration::minutes(5),
            ..AllocatorSettings::default()
        })
    }

    #[test]
    fn charging_load_point_gets_target_and_shrinks_budget() {
        let mut a = allocator();
        let out = a.allocate(
            vec![snapshot("a", 0, true, 10.0)],
            PowerBudget::new(6900.0, 0.0),
            false,
            t0(),
            &CancelFlag::new(),
        );
        let e = &out.entries[0];
        assert_eq!(e.command.target_current(), Some(10.0));
        assert!((e.estimated_usage_w - 6900.0).abs() < 1e-6);
        assert!(out.leftover.remaining_controllable_power_w.abs() < 1e-6);
    }

    #[test]
    fn start_waits_for_switch_on_duration() {
        let mut a = allocator();
        let cancel = CancelFlag::new();
        let budget = PowerBudget::new(5000.0, 0.0);

        let first = a.allocate(vec![snapshot("a", 0, false, 0.0)], budget, false, t0(), &cancel);
        assert_eq!(first.entries[0].command, TargetChargeCommand::NoChange);
        assert_eq!(
            first.entries[0].reason,
            ChargeReason::WaitingForSwitchOn {
                relevant_at: Some(t0() + Duration::minutes(5))
            }
        );
        assert_eq!(first.leftover, budget);

        let later = t0() + Duration::minutes(6);
        let second = a.allocate(vec![snapshot("a", 0, false, 0.0)], budget, false, later, &cancel);
        assert!(matches!(second.entries[0].reason, ChargeReason::Starting { .. }));
        assert!(second.entries[0].command.target_current().is_some());
    }

    #[test]
    fn stop_waits_for_switch_off_duration() {
        let mut a = allocator();
        let cancel = CancelFlag::new();
        let scarce = PowerBudget::new(1000.0, 0.0);

        let first = a.allocate(vec![snapshot("a", 0, true, 6.0)], scarce, false, t0(), &cancel);
        assert_eq!(first.entries[0].command.target_current(), Some(6.0));
        assert!(matches!(
            first.entries[0].reason,
            ChargeReason::WaitingForSwitchOff { .. }
        ));

        let later = t0() + Duration::minutes(6);
        let second = a.allocate(vec![snapshot("a", 0, true, 6.0)], scarce, false, later, &cancel);
        assert_eq!(second.entries[0].command, TargetChargeCommand::Stop);
        assert_eq!(second.entries[0].estimated_usage_w, 0.0);
    }

    #[test]
    fn surplus_returning_resets_stop_timer() {
        let mut a = allocator();
        let cancel = CancelFlag::new();
        let scarce = PowerBudget::new(1000.0, 0.0);
        let plenty = PowerBudget::new(8000.0, 0.0);

        a.allocate(vec![snapshot("a", 0, true, 6.0)], scarce, false, t0(), &cancel);
        a.allocate(
            vec![snapshot("a", 0, true, 6.0)],
            plenty,
            false,
            t0() + Duration::minutes(3),
            &cancel,
        );
        let out = a.allocate(
            vec![snapshot("a", 0, true, 6.0)],
            scarce,
            false,
            t0() + Duration::minutes(6),
            &cancel,
        );
        assert!(matches!(
            out.entries[0].reason,
            ChargeReason::WaitingForSwitchOff { .. }
        ));
    }

    #[test]
    fn ignore_timers_starts_immediately() {
        let mut a = allocator();
        let out = a.allocate(
            vec![snapshot("a", 0, false, 0.0)],
            PowerBudget::new(5000.0, 0.0),
            true,
            t0(),
            &CancelFlag::new(),
        );
        assert!(matches!(out.entries[0].reason, ChargeReason::Starting { .. }));
    }

    #[test]
    fn priority_order_serves_lower_value_first() {
        let mut a = allocator();
        let out = a.allocate(
            vec![snapshot("low", 5, true, 10.0), snapshot("high", 1, true, 10.0)],
            PowerBudget::new(8000.0, 0.0),
            false,
            t0(),
            &CancelFlag::new(),
        );
        assert_eq!(out.entries[0].load_point, LoadPointId::connector("high"));
        let high = &out.entries[0];
        let low = &out.entries[1];
        assert!(low.offered_power_w <= high.offered_power_w - high.estimated_usage_w + 1e-6);
    }

    #[test]
    fn equal_priorities_keep_input_order() {
        let mut a = allocator();
        let out = a.allocate(
            vec![snapshot("first", 1, false, 0.0), snapshot("second", 1, false, 0.0)],
            PowerBudget::new(0.0, 0.0),
            false,
            t0(),
            &CancelFlag::new(),
        );
        assert_eq!(out.entries[0].load_point, LoadPointId::connector("first"));
        assert_eq!(out.entries[1].load_point, LoadPointId::connector("second"));
    }

    #[test]
    fn configuration_error_skips_only_that_load_point() {
        let mut a = allocator();
        let mut broken = snapshot("broken", 0, true, 10.0);
        broken.load_point.estimated_voltage = None;
        let out = a.allocate(
            vec![broken, snapshot("ok", 1, true, 10.0)],
            PowerBudget::new(6900.0, 0.0),
            false,
            t0(),
            &CancelFlag::new(),
        );
        assert!(matches!(
            out.entries[0].reason,
            ChargeReason::ConfigurationError { .. }
        ));
        assert_eq!(out.entries[1].command.target_current(), Some(10.0));
    }

    #[test]
    fn cancelled_cycle_reaches_nobody() {
        let mut a = allocator();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let out = a.allocate(
            vec![snapshot("a", 0, true, 10.0)],
            PowerBudget::new(6900.0, 0.0),
            false,
            t0(),
            &cancel,
        );
        assert_eq!(out.entries[0].reason, ChargeReason::Cancelled);
        assert_eq!(out.leftover, PowerBudget::new(6900.0, 0.0));
    }

    fn switchable(name: &str, priority: u32) -> LoadPointSnapshot {
        let mut s = snapshot(name, priority, false, 0.0);
        if let Ok(c) = s.constraints.as_mut() {
            c.min_phases = 1;
        }
        s
    }

    #[test]
    fn idle_switchable_starts_on_one_phase() {
        let mut a = allocator();
        let out = a.allocate(
            vec![switchable("a", 0)],
            PowerBudget::new(2500.0, 0.0),
            true,
            t0(),
            &CancelFlag::new(),
        );
        let e = &out.entries[0];
        assert!(matches!(e.reason, ChargeReason::Starting { phases: 1, .. }));
        assert_eq!(e.command.target_phases(), Some(1));
        let amps = e.command.target_current().unwrap();
        assert!((amps - 2500.0 / 230.0).abs() < 1e-9);
        assert!((e.estimated_usage_w - 2500.0).abs() < 1e-6);
    }

    #[test]
    fn idle_switchable_starts_on_three_phases_with_enough_surplus() {
        let mut a = allocator();
        let out = a.allocate(
            vec![switchable("a", 0)],
            PowerBudget::new(6000.0, 0.0),
            true,
            t0(),
            &CancelFlag::new(),
        );
        let e = &out.entries[0];
        assert_eq!(e.command.target_phases(), Some(3));
        assert!(matches!(e.reason, ChargeReason::Starting { phases: 3, .. }));
    }

    #[test]
    fn idle_switchable_below_single_phase_minimum_waits() {
        let mut a = allocator();
        let out = a.allocate(
            vec![switchable("a", 0)],
            PowerBudget::new(1000.0, 0.0),
            true,
            t0(),
            &CancelFlag::new(),
        );
        assert_eq!(
            out.entries[0].reason,
            ChargeReason::InsufficientSurplus {
                offered_w: 1000.0,
                required_w: 1380.0
            }
        );
    }

    #[test]
    fn controlled_load_point_left_alone_keeps_its_draw() {
        let mut a = allocator();
        let mut full = snapshot("full", 0, true, 10.0);
        if let Ok(c) = full.constraints.as_mut() {
            c.soc = Some(100.0);
        }
        let out = a.allocate(
            vec![full, snapshot("next", 1, false, 0.0)],
            PowerBudget::new(10_000.0, 0.0),
            false,
            t0(),
            &CancelFlag::new(),
        );
        assert!(matches!(
            out.entries[0].reason,
            ChargeReason::MaxSocReached { .. }
        ));
        assert!((out.entries[0].estimated_usage_w - 6900.0).abs() < 1e-6);
        assert!((out.entries[1].offered_power_w - 3100.0).abs() < 1e-6);
    }

    #[test]
    fn manual_load_point_draw_is_not_deducted() {
        let mut a = allocator();
        let mut manual = snapshot("manual", 0, true, 10.0);
        manual.load_point.mode = ChargeMode::Manual;
        let out = a.allocate(
            vec![manual],
            PowerBudget::new(500.0, 0.0),
            false,
            t0(),
            &CancelFlag::new(),
        );
        assert_eq!(out.entries[0].estimated_usage_w, 0.0);
        assert_eq!(out.leftover, PowerBudget::new(500.0, 0.0));
    }

    #[test]
    fn unplugging_clears_memory() {
        let mut a = allocator();
        let cancel = CancelFlag::new();
        a.allocate(
            vec![snapshot("a", 0, false, 0.0)],
            PowerBudget::new(5000.0, 0.0),
            false,
            t0(),
            &cancel,
        );
        assert!(a.memory(&LoadPointId::connector("a")).is_some());

        let mut gone = snapshot("a", 0, false, 0.0);
        gone.load_point.plugged_in = false;
        a.allocate(vec![gone], PowerBudget::new(5000.0, 0.0), false, t0(), &cancel);
        assert!(a.memory(&LoadPointId::connector("a")).is_none());
    }
}
