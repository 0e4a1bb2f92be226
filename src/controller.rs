//! Periodic charge controller
//!
//! Owns the allocator and its hysteresis memory, reads the providers once per
//! cycle, and pushes the resulting commands out fire-and-forget. Cycles never
//! overlap: each one is awaited before the next tick is taken.

use crate::allocation::{AllocatorSettings, CancelFlag, PowerBudgetAllocator};
use crate::config::{Config, LoadPointConfig};
use crate::diagnostics::CycleReport;
use crate::error::Result;
use crate::loadpoint::{
    ChargeMode, LoadPointId, LoadPointSnapshot, LoadPointTelemetry, apply_combined_current_cap,
};
use crate::logging::{LogContext, StructuredLogger, get_logger, get_logger_with_context};
use crate::telemetry::{
    ActuationRequest, ChargeActuationSink, HomeBatterySink, LoadPointStateProvider,
    PowerAvailabilityProvider, starting_budget,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior, interval};
use uuid::Uuid;

/// Commands accepted by the controller from external components
#[derive(Debug, Clone)]
pub enum ControllerCommand {
    SetMode(LoadPointId, ChargeMode),
    SetIgnoreTimers(bool),
    /// Run a cycle now instead of waiting for the next tick
    TriggerCycle,
    Shutdown,
}

/// External collaborators the controller talks to
pub struct ControllerIo {
    pub power: Arc<dyn PowerAvailabilityProvider>,
    pub load_points: Arc<dyn LoadPointStateProvider>,
    pub actuation: Arc<dyn ChargeActuationSink>,
    pub home_battery: Option<Arc<dyn HomeBatterySink>>,
}

pub struct ChargeController {
    config: Config,
    io: ControllerIo,
    allocator: PowerBudgetAllocator,
    modes: HashMap<LoadPointId, ChargeMode>,
    ignore_timers: bool,
    cancel: CancelFlag,
    commands_rx: mpsc::UnboundedReceiver<ControllerCommand>,
    report_tx: watch::Sender<Option<CycleReport>>,
    logger: StructuredLogger,
}

impl ChargeController {
    pub fn new(
        config: Config,
        io: ControllerIo,
        commands_rx: mpsc::UnboundedReceiver<ControllerCommand>,
    ) -> Result<Self> {
        config.validate()?;

        let mut modes = HashMap::new();
        for lp in &config.load_points {
            modes.insert(LoadPointId::from_config(lp)?, lp.mode);
        }

        let (report_tx, _) = watch::channel(None);
        let allocator = PowerBudgetAllocator::new(AllocatorSettings::from_config(&config.controls));

        Ok(Self {
            config,
            io,
            allocator,
            modes,
            ignore_timers: false,
            cancel: CancelFlag::new(),
            commands_rx,
            report_tx,
            logger: get_logger("controller"),
        })
    }

    /// Watch the latest cycle report
    pub fn subscribe_reports(&self) -> watch::Receiver<Option<CycleReport>> {
        self.report_tx.subscribe()
    }

    /// Handle to cancel an in-flight cycle and stop the loop
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn mode_of(&self, id: &LoadPointId) -> Option<ChargeMode> {
        self.modes.get(id).copied()
    }

    /// Run cycles until shut down
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info(&format!(
            "Starting charge controller with {} load point(s), cycle every {} ms",
            self.config.load_points.len(),
            self.config.controls.cycle_interval_ms
        ));

        let mut ticker = interval(Duration::from_millis(self.config.controls.cycle_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle_logged(Utc::now()).await;
                }
                cmd = self.commands_rx.recv() => {
                    match cmd {
                        Some(ControllerCommand::Shutdown) | None => {
                            self.cancel.cancel();
                        }
                        Some(ControllerCommand::TriggerCycle) => {
                            self.run_cycle_logged(Utc::now()).await;
                        }
                        Some(other) => self.handle_command(other),
                    }
                }
            }
        }

        self.logger.info("Charge controller stopped");
        Ok(())
    }

    /// Apply a non-loop command
    pub fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::SetMode(id, mode) => {
                if self.modes.contains_key(&id) {
                    self.logger
                        .info(&format!("Mode of {} set to {:?}", id, mode));
                    self.modes.insert(id, mode);
                } else {
                    self.logger
                        .warn(&format!("Ignoring mode change for unknown load point {}", id));
                }
            }
            ControllerCommand::SetIgnoreTimers(v) => {
                self.logger.info(&format!("Ignore timers: {}", v));
                self.ignore_timers = v;
            }
            ControllerCommand::TriggerCycle | ControllerCommand::Shutdown => {}
        }
    }

    async fn run_cycle_logged(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.run_cycle(now).await {
            if e.aborts_cycle() {
                self.logger
                    .warn(&format!("Cycle skipped, nothing charges this round: {}", e));
            } else {
                self.logger.error(&format!("Cycle failed: {}", e));
            }
        }
    }

    /// Run one allocation cycle as of `now`
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let logger = get_logger_with_context(
            LogContext::new("controller")
                .with_cycle_id(cycle_id.to_string())
                .with_field("ignore_timers", self.ignore_timers.to_string()),
        );

        let availability = self.io.power.fetch_availability().await?;
        let telemetry = self.io.load_points.fetch_load_points().await?;

        let mut snapshots = self.build_snapshots(&telemetry, &logger);
        let budget = starting_budget(
            &availability,
            &snapshots,
            &self.config.controls,
            &self.config.home_battery,
            now,
        )?;
        if let Some(cap) = self.config.controls.max_combined_current {
            apply_combined_current_cap(&mut snapshots, cap);
        }

        logger.debug(&format!(
            "Starting budget {:.0} W (+{:.0} W battery allowance)",
            budget.remaining_controllable_power_w, budget.extra_battery_discharge_allowance_w
        ));

        let outcome =
            self.allocator
                .allocate(snapshots, budget, self.ignore_timers, now, &self.cancel);

        let report = CycleReport {
            cycle_id,
            started_at: now,
            starting_budget: budget,
            leftover_budget: outcome.leftover,
            entries: outcome.entries,
        };

        for (load_point, command) in report.commands() {
            self.io.actuation.dispatch(ActuationRequest {
                load_point: load_point.clone(),
                command: *command,
                issued_at: now,
            });
        }
        if let Some(battery) = &self.io.home_battery {
            battery.hand_over(report.leftover_budget);
        }

        match serde_json::to_string(&report) {
            Ok(json) => logger.debug(&format!("Cycle report: {}", json)),
            Err(e) => logger.warn(&format!("Cannot serialize cycle report: {}", e)),
        }
        self.report_tx.send_replace(Some(report.clone()));
        Ok(report)
    }

    /// Merge configured load points with the telemetry that matches them
    fn build_snapshots(
        &self,
        telemetry: &[LoadPointTelemetry],
        logger: &StructuredLogger,
    ) -> Vec<LoadPointSnapshot> {
        let mut snapshots = Vec::with_capacity(self.config.load_points.len());
        for cfg in &self.config.load_points {
            let Ok(id) = LoadPointId::from_config(cfg) else {
                continue;
            };
            let mode = self.modes.get(&id).copied().unwrap_or(cfg.mode);
            let snapshot = match telemetry.iter().find(|t| t.id == id) {
                Some(t) => LoadPointSnapshot::build(cfg, t, mode),
                None => {
                    logger.debug(&format!("No telemetry for {}; treating as idle", id));
                    LoadPointSnapshot::build(cfg, &LoadPointTelemetry::idle(id), mode)
                }
            };
            snapshots.push(snapshot);
        }
        for t in telemetry {
            if !self.config.load_points.iter().any(|c| config_matches(c, &t.id)) {
                logger.debug(&format!("Ignoring unconfigured load point {}", t.id));
            }
        }
        snapshots
    }
}

fn config_matches(cfg: &LoadPointConfig, id: &LoadPointId) -> bool {
    LoadPointId::from_config(cfg).is_ok_and(|c| &c == id)
}

impl std::fmt::Debug for ChargeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargeController")
            .field("load_points", &self.config.load_points.len())
            .field("ignore_timers", &self.ignore_timers)
            .finish()
    }
}
