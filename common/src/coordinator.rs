use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{
    error::{TransportError, ValidationError},
    store::{ActuatorSlot, Changes, SnapshotStore, Stamped},
    thresholds::{ThresholdCommit, ThresholdValues},
    types::{Actuator, ControlMode, SyncAction, PWM_MAX},
};

pub const RESUME_PROMPT: &str = "Resume automatic mode? Manual controls will be disabled.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

/// Stamp for a local write that must order after `newest`, whatever the
/// local clock says.
fn stamp_after(now: DateTime<Utc>, newest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match newest {
        Some(newest) if newest >= now => newest + Duration::milliseconds(1),
        _ => now,
    }
}

/// Body of an actuator override, as sent to the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActuatorCommand {
    pub actuator: Actuator,
    pub state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwm: Option<u8>,
}

impl ActuatorCommand {
    pub fn parse(name: &str, state: bool, pwm: Option<i64>) -> Result<Self, ValidationError> {
        let actuator: Actuator = name.parse()?;
        let pwm = match pwm {
            None => None,
            Some(_) if !actuator.supports_pwm() => {
                return Err(ValidationError::PwmNotSupported(actuator))
            }
            Some(value) if (0..=PWM_MAX).contains(&value) => Some(value as u8),
            Some(value) => return Err(ValidationError::PwmOutOfRange { actuator, value }),
        };
        Ok(Self {
            actuator,
            state,
            pwm,
        })
    }
}

/// Handle for a command whose optimistic write is already in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub id: CommandId,
    pub command: ActuatorCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Accepted; the optimistic state stands.
    Confirmed,
    /// Failed; the optimistic write was undone.
    RolledBack,
    /// Failed, but a newer command or newer data already owns the field.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    AlreadyAuto,
    NeedsConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOutcome {
    Resumed,
    AlreadyAuto,
    Declined,
}

/// Pre-image of one optimistic actuator write.
#[derive(Debug, Clone)]
struct CommandTxn {
    id: CommandId,
    desired: ActuatorSlot,
    /// Last state known to be true on the device.
    baseline: ActuatorSlot,
    /// Superseded commands still in flight, oldest first.
    predecessors: Vec<(CommandId, ActuatorSlot)>,
}

/// Pre-image of the optimistic AUTO to MANUAL transition.
#[derive(Debug, Clone)]
struct ModeGuard {
    prior: Option<Stamped<ControlMode>>,
    optimistic: Stamped<ControlMode>,
    holders: BTreeSet<CommandId>,
}

/// AUTO/MANUAL state machine plus the optimistic-then-rollback protocol for
/// actuator commands. Holds no device state itself; everything visible lives
/// in the [`SnapshotStore`].
#[derive(Debug, Default)]
pub struct ControlCoordinator {
    next_id: u64,
    pending: HashMap<Actuator, CommandTxn>,
    mode_guard: Option<ModeGuard>,
}

impl ControlCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, actuator: Actuator) -> bool {
        self.pending.contains_key(&actuator)
    }

    /// Writes the desired state (and MANUAL, if needed) into the store ahead
    /// of the network call. The returned handle must be passed back to
    /// [`Self::complete_command`] once the collaborator answers.
    pub fn begin_command(
        &mut self,
        store: &mut SnapshotStore,
        command: ActuatorCommand,
        now: DateTime<Utc>,
    ) -> Result<PendingCommand, ValidationError> {
        let snapshot = store.get();
        let current = *snapshot
            .actuators
            .as_ref()
            .ok_or(ValidationError::NotSynced)?
            .slot(command.actuator);
        let current_mode = snapshot.mode;

        let id = CommandId(self.next_id);
        self.next_id += 1;

        let stamp = stamp_after(now, Some(current.on.at).max(current.pwm.map(|pwm| pwm.at)));
        let desired = ActuatorSlot {
            on: Stamped::new(command.state, stamp),
            pwm: command
                .pwm
                .map(|pwm| Stamped::new(pwm, stamp))
                .or(current.pwm),
        };

        let txn = match self.pending.remove(&command.actuator) {
            Some(previous) => {
                let mut predecessors = previous.predecessors;
                predecessors.push((previous.id, previous.desired));
                CommandTxn {
                    id,
                    desired,
                    baseline: previous.baseline,
                    predecessors,
                }
            }
            None => CommandTxn {
                id,
                desired,
                baseline: current,
                predecessors: Vec::new(),
            },
        };
        self.pending.insert(command.actuator, txn);

        let enter_manual = current_mode.map(|mode| mode.value) != Some(ControlMode::Manual);
        let optimistic_mode = Stamped::new(
            ControlMode::Manual,
            stamp_after(now, current_mode.map(|mode| mode.at)),
        );
        if enter_manual {
            self.mode_guard = Some(ModeGuard {
                prior: current_mode,
                optimistic: optimistic_mode,
                holders: BTreeSet::from([id]),
            });
        } else if let Some(guard) = self.mode_guard.as_mut() {
            guard.holders.insert(id);
        }

        store.mutate(|snapshot| {
            let mut changes = Changes::default();
            if let Some(map) = snapshot.actuators.as_mut() {
                let slot = map.slot_mut(command.actuator);
                if *slot != desired {
                    *slot = desired;
                    changes.actuators = true;
                }
            }
            if enter_manual {
                snapshot.mode = Some(optimistic_mode);
                changes.mode = true;
            }
            changes
        });

        Ok(PendingCommand { id, command })
    }

    /// Reconciles a command with the collaborator's answer.
    pub fn complete_command(
        &mut self,
        store: &mut SnapshotStore,
        pending: PendingCommand,
        result: &Result<(), TransportError>,
    ) -> CommandOutcome {
        let actuator = pending.command.actuator;
        let is_current = self
            .pending
            .get(&actuator)
            .is_some_and(|txn| txn.id == pending.id);

        if result.is_ok() {
            if is_current {
                self.pending.remove(&actuator);
            } else if let Some(txn) = self.pending.get_mut(&actuator) {
                // A superseded command landed: its state is now the known baseline.
                if let Some(position) = txn
                    .predecessors
                    .iter()
                    .position(|(id, _)| *id == pending.id)
                {
                    txn.baseline = txn.predecessors[position].1;
                    txn.predecessors.drain(..=position);
                }
            }
            // The device accepted an override, so MANUAL is no longer a guess.
            self.mode_guard = None;
            return CommandOutcome::Confirmed;
        }

        let restore_mode = self.release_mode_hold(pending.id);
        let rollback = if is_current {
            self.fall_back(actuator)
        } else {
            if let Some(txn) = self.pending.get_mut(&actuator) {
                txn.predecessors.retain(|(id, _)| *id != pending.id);
            }
            None
        };

        if rollback.is_none() && restore_mode.is_none() {
            return CommandOutcome::Discarded;
        }

        let changes = store.mutate(|snapshot| {
            let mut changes = Changes::default();
            if let (Some((desired, target)), Some(map)) = (&rollback, snapshot.actuators.as_mut())
            {
                let slot = map.slot_mut(actuator);
                // Only undo sub-fields nothing newer has rewritten since.
                if slot.on == desired.on && slot.on != target.on {
                    slot.on = target.on;
                    changes.actuators = true;
                }
                if slot.pwm == desired.pwm && slot.pwm != target.pwm {
                    slot.pwm = target.pwm;
                    changes.actuators = true;
                }
            }
            if let Some(guard) = &restore_mode {
                if snapshot.mode == Some(guard.optimistic) {
                    snapshot.mode = guard.prior;
                    changes.mode = true;
                }
            }
            changes
        });

        if changes.any() {
            CommandOutcome::RolledBack
        } else {
            CommandOutcome::Discarded
        }
    }

    /// Unwinds the current transaction of `actuator` after it failed. The
    /// newest superseded command still in flight takes over as current, so
    /// the slot falls back to its state; with none left it falls back to the
    /// baseline. Returns the failed write and the state to restore.
    fn fall_back(&mut self, actuator: Actuator) -> Option<(ActuatorSlot, ActuatorSlot)> {
        let mut txn = self.pending.remove(&actuator)?;
        let failed = txn.desired;
        match txn.predecessors.pop() {
            Some((id, desired)) => {
                txn.id = id;
                txn.desired = desired;
                self.pending.insert(actuator, txn);
                Some((failed, desired))
            }
            None => Some((failed, txn.baseline)),
        }
    }

    /// Drops `id` from the optimistic MANUAL hold; hands back the guard once
    /// no command issued under it is left in flight.
    fn release_mode_hold(&mut self, id: CommandId) -> Option<ModeGuard> {
        let guard = self.mode_guard.as_mut()?;
        guard.holders.remove(&id);
        if guard.holders.is_empty() {
            self.mode_guard.take()
        } else {
            None
        }
    }

    pub fn plan_resume(&self, store: &SnapshotStore) -> ResumePlan {
        if store.get().mode() == Some(ControlMode::Auto) {
            ResumePlan::AlreadyAuto
        } else {
            ResumePlan::NeedsConfirmation
        }
    }

    /// MANUAL to AUTO happens only here, after the collaborator confirmed.
    pub fn complete_resume(
        &mut self,
        store: &mut SnapshotStore,
        result: &Result<(), TransportError>,
        now: DateTime<Utc>,
    ) -> Changes {
        if result.is_err() {
            return Changes::default();
        }
        self.mode_guard = None;
        store.mutate(|snapshot| {
            if snapshot.mode() == Some(ControlMode::Auto) {
                return Changes::default();
            }
            let stamp = stamp_after(now, snapshot.mode.map(|mode| mode.at));
            snapshot.mode = Some(Stamped::new(ControlMode::Auto, stamp));
            Changes {
                mode: true,
                ..Changes::default()
            }
        })
    }

    /// Threshold commits never touch the store up front.
    pub fn prepare_threshold_commit(
        &self,
        commit: &ThresholdCommit,
    ) -> Result<ThresholdValues, ValidationError> {
        commit.validate()
    }

    /// A landed commit is followed by a full re-poll so the store picks up
    /// the backend's clamped values instead of what was sent.
    pub fn complete_threshold_commit(
        &self,
        result: &Result<(), TransportError>,
    ) -> Vec<SyncAction> {
        match result {
            Ok(()) => vec![SyncAction::RefreshThresholds],
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        store::Snapshot,
        thresholds::{ThresholdConfig, ThresholdField},
        types::{ActuatorReport, SensorReading},
    };

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, second).unwrap()
    }

    fn failure() -> Result<(), TransportError> {
        Err(TransportError::Status {
            endpoint: "/manual/control".to_string(),
            status: 500,
        })
    }

    fn synced_store(manual_override: bool) -> SnapshotStore {
        let mut store = SnapshotStore::new();
        store.apply_actuator_map(
            &ActuatorReport {
                pump_water: Some(false),
                pump_nutrient: Some(false),
                fan_exhaust: Some(false),
                peltier: Some(true),
                fan_peltier_hot: Some(true),
                fan_peltier_cold: Some(false),
                manual_override: Some(manual_override),
                pwm: Some(crate::types::PwmReport {
                    fan_exhaust: Some(0),
                    peltier: Some(200),
                }),
            },
            at(0),
        );
        store
    }

    fn command(name: &str, state: bool, pwm: Option<i64>) -> ActuatorCommand {
        ActuatorCommand::parse(name, state, pwm).unwrap()
    }

    fn actuators_and_mode(
        snapshot: &Snapshot,
    ) -> (Option<crate::store::ActuatorMap>, Option<Stamped<ControlMode>>) {
        (snapshot.actuators.clone(), snapshot.mode)
    }

    #[test]
    fn parse_validates_locally() {
        assert_eq!(
            ActuatorCommand::parse("pump_air", true, None),
            Err(ValidationError::UnknownActuator("pump_air".to_string()))
        );
        assert_eq!(
            ActuatorCommand::parse("peltier", true, Some(256)),
            Err(ValidationError::PwmOutOfRange {
                actuator: Actuator::Peltier,
                value: 256
            })
        );
        assert_eq!(
            ActuatorCommand::parse("fan_exhaust", true, Some(-1)),
            Err(ValidationError::PwmOutOfRange {
                actuator: Actuator::FanExhaust,
                value: -1
            })
        );
        assert_eq!(
            ActuatorCommand::parse("pump_water", true, Some(10)),
            Err(ValidationError::PwmNotSupported(Actuator::PumpWater))
        );
        assert_eq!(
            ActuatorCommand::parse("fan_exhaust", true, Some(255)).map(|c| c.pwm),
            Ok(Some(255))
        );
    }

    #[test]
    fn command_before_first_sync_is_rejected() {
        let mut store = SnapshotStore::new();
        let mut coordinator = ControlCoordinator::new();

        let result =
            coordinator.begin_command(&mut store, command("pump_water", true, None), at(1));

        assert_eq!(result, Err(ValidationError::NotSynced));
        assert_eq!(coordinator.pending_count(), 0);
        assert!(store.get().mode.is_none());
    }

    #[test]
    fn command_in_auto_is_optimistically_manual() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();

        let pending = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();

        let snapshot = store.get();
        assert_eq!(snapshot.mode(), Some(ControlMode::Manual));
        assert!(snapshot.actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert!(coordinator.is_pending(Actuator::PumpWater));

        let outcome = coordinator.complete_command(&mut store, pending, &Ok(()));
        assert_eq!(outcome, CommandOutcome::Confirmed);
        assert_eq!(store.get().mode(), Some(ControlMode::Manual));
        assert!(store.get().actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn failed_command_restores_exact_pre_image() {
        let mut store = synced_store(false);
        let before = actuators_and_mode(store.get());
        let mut coordinator = ControlCoordinator::new();

        let pending = coordinator
            .begin_command(&mut store, command("peltier", false, Some(40)), at(1))
            .unwrap();
        assert_eq!(store.get().actuators.as_ref().unwrap().pwm(Actuator::Peltier), Some(40));

        let outcome = coordinator.complete_command(&mut store, pending, &failure());

        assert_eq!(outcome, CommandOutcome::RolledBack);
        assert_eq!(actuators_and_mode(store.get()), before);
    }

    #[test]
    fn failed_command_in_manual_keeps_manual() {
        let mut store = synced_store(true);
        let before = actuators_and_mode(store.get());
        let mut coordinator = ControlCoordinator::new();

        let pending = coordinator
            .begin_command(&mut store, command("fan_peltier_cold", true, None), at(1))
            .unwrap();
        let outcome = coordinator.complete_command(&mut store, pending, &failure());

        assert_eq!(outcome, CommandOutcome::RolledBack);
        assert_eq!(actuators_and_mode(store.get()), before);
    }

    #[test]
    fn superseding_command_inherits_baseline() {
        let mut store = synced_store(false);
        let before = actuators_and_mode(store.get());
        let mut coordinator = ControlCoordinator::new();

        let first = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();
        let second = coordinator
            .begin_command(&mut store, command("pump_water", false, None), at(2))
            .unwrap();
        assert_eq!(coordinator.pending_count(), 1);

        // the first one's rollback obligation is gone
        assert_eq!(
            coordinator.complete_command(&mut store, first, &failure()),
            CommandOutcome::Discarded
        );
        assert_eq!(store.get().mode(), Some(ControlMode::Manual));

        assert_eq!(
            coordinator.complete_command(&mut store, second, &failure()),
            CommandOutcome::RolledBack
        );
        assert_eq!(actuators_and_mode(store.get()), before);
    }

    #[test]
    fn failed_successor_falls_back_to_pending_predecessor() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();

        let first = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();
        let second = coordinator
            .begin_command(&mut store, command("pump_water", false, None), at(2))
            .unwrap();

        assert_eq!(
            coordinator.complete_command(&mut store, second, &failure()),
            CommandOutcome::RolledBack
        );
        let snapshot = store.get();
        assert!(snapshot.actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert_eq!(snapshot.mode(), Some(ControlMode::Manual));
        assert!(coordinator.is_pending(Actuator::PumpWater));

        assert_eq!(
            coordinator.complete_command(&mut store, first, &Ok(())),
            CommandOutcome::Confirmed
        );
        let snapshot = store.get();
        assert!(snapshot.actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert_eq!(snapshot.mode(), Some(ControlMode::Manual));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn both_superseding_commands_failing_newest_first_restores_pre_image() {
        let mut store = synced_store(false);
        let before = actuators_and_mode(store.get());
        let mut coordinator = ControlCoordinator::new();

        let first = coordinator
            .begin_command(&mut store, command("fan_exhaust", true, Some(120)), at(1))
            .unwrap();
        let second = coordinator
            .begin_command(&mut store, command("fan_exhaust", true, Some(255)), at(2))
            .unwrap();

        coordinator.complete_command(&mut store, second, &failure());
        assert_eq!(store.get().actuators.as_ref().unwrap().pwm(Actuator::FanExhaust), Some(120));

        assert_eq!(
            coordinator.complete_command(&mut store, first, &failure()),
            CommandOutcome::RolledBack
        );
        assert_eq!(actuators_and_mode(store.get()), before);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn optimistic_write_orders_after_known_stamps() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();
        let lagging_clock = at(0) - Duration::seconds(5);

        coordinator
            .begin_command(&mut store, command("pump_water", true, None), lagging_clock)
            .unwrap();
        let slot = *store.get().actuators.as_ref().unwrap().slot(Actuator::PumpWater);
        assert!(slot.on.at > at(0));
        assert!(store.get().mode.unwrap().at > at(0));

        // a report already superseded by the command does not undo it
        let mut stale = ActuatorReport::default();
        stale.set_state(Actuator::PumpWater, false);
        stale.manual_override = Some(false);
        store.apply_reading(&SensorReading {
            actuators: Some(stale),
            ..SensorReading::at(at(0))
        });
        assert!(store.get().actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert_eq!(store.get().mode(), Some(ControlMode::Manual));

        let mut newer = ActuatorReport::default();
        newer.set_state(Actuator::PumpWater, false);
        store.apply_reading(&SensorReading {
            actuators: Some(newer),
            ..SensorReading::at(at(1))
        });
        assert!(!store.get().actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
    }

    #[test]
    fn confirmed_predecessor_becomes_baseline() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();

        let first = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();
        let second = coordinator
            .begin_command(&mut store, command("pump_water", false, None), at(2))
            .unwrap();

        assert_eq!(
            coordinator.complete_command(&mut store, first, &Ok(())),
            CommandOutcome::Confirmed
        );
        assert_eq!(
            coordinator.complete_command(&mut store, second, &failure()),
            CommandOutcome::RolledBack
        );

        let snapshot = store.get();
        assert!(snapshot.actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert_eq!(snapshot.mode(), Some(ControlMode::Manual));
    }

    #[test]
    fn mode_reverts_only_after_every_command_fails() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();

        let pump = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();
        let fan = coordinator
            .begin_command(&mut store, command("fan_exhaust", true, None), at(2))
            .unwrap();

        coordinator.complete_command(&mut store, pump, &failure());
        assert_eq!(store.get().mode(), Some(ControlMode::Manual));
        assert!(!store.get().actuators.as_ref().unwrap().is_on(Actuator::PumpWater));

        coordinator.complete_command(&mut store, fan, &failure());
        assert_eq!(store.get().mode(), Some(ControlMode::Auto));
    }

    #[test]
    fn any_confirmation_pins_manual() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();

        let pump = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();
        let fan = coordinator
            .begin_command(&mut store, command("fan_exhaust", true, None), at(2))
            .unwrap();

        coordinator.complete_command(&mut store, fan, &Ok(()));
        coordinator.complete_command(&mut store, pump, &failure());

        assert_eq!(store.get().mode(), Some(ControlMode::Manual));
        assert!(!store.get().actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert!(store.get().actuators.as_ref().unwrap().is_on(Actuator::FanExhaust));
    }

    #[test]
    fn rollback_leaves_newer_authoritative_data_alone() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();

        let pending = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();

        // the automation engine reports in after the command was issued
        let mut report = ActuatorReport::default();
        report.set_state(Actuator::PumpWater, true);
        report.manual_override = Some(true);
        store.apply_reading(&SensorReading {
            actuators: Some(report),
            ..SensorReading::at(at(5))
        });

        let outcome = coordinator.complete_command(&mut store, pending, &failure());

        assert_eq!(outcome, CommandOutcome::Discarded);
        let snapshot = store.get();
        assert!(snapshot.actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
        assert_eq!(snapshot.mode, Some(Stamped::new(ControlMode::Manual, at(5))));
    }

    #[test]
    fn reading_reports_mode_authoritatively() {
        let mut store = synced_store(true);
        let mut report = ActuatorReport::default();
        report.manual_override = Some(false);

        store.apply_actuator_map(&report, at(3));

        assert_eq!(store.get().mode(), Some(ControlMode::Auto));
    }

    #[test]
    fn resume_requires_manual_and_success() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();
        assert_eq!(coordinator.plan_resume(&store), ResumePlan::AlreadyAuto);

        let pending = coordinator
            .begin_command(&mut store, command("pump_nutrient", true, None), at(1))
            .unwrap();
        coordinator.complete_command(&mut store, pending, &Ok(()));
        assert_eq!(coordinator.plan_resume(&store), ResumePlan::NeedsConfirmation);

        let failed = coordinator.complete_resume(&mut store, &failure(), at(2));
        assert!(!failed.any());
        assert_eq!(store.get().mode(), Some(ControlMode::Manual));

        let resumed = coordinator.complete_resume(&mut store, &Ok(()), at(3));
        assert!(resumed.mode);
        assert_eq!(store.get().mode(), Some(ControlMode::Auto));
    }

    #[test]
    fn late_failure_after_resume_keeps_auto() {
        let mut store = synced_store(false);
        let mut coordinator = ControlCoordinator::new();

        let pending = coordinator
            .begin_command(&mut store, command("pump_water", true, None), at(1))
            .unwrap();
        coordinator.complete_resume(&mut store, &Ok(()), at(2));
        coordinator.complete_command(&mut store, pending, &failure());

        assert_eq!(store.get().mode(), Some(ControlMode::Auto));
        assert!(!store.get().actuators.as_ref().unwrap().is_on(Actuator::PumpWater));
    }

    #[test]
    fn threshold_commit_outcomes() {
        let mut store = SnapshotStore::new();
        let committed = ThresholdConfig {
            values: ThresholdValues {
                soil1: Some(35.0),
                ..ThresholdValues::default()
            },
            updated_at: Some(at(0)),
            last_synced: None,
        };
        store.apply_thresholds(&committed, at(0));
        let coordinator = ControlCoordinator::new();

        let commit = ThresholdCommit::Field {
            field: ThresholdField::Soil1,
            value: 28.0,
        };
        let body = coordinator.prepare_threshold_commit(&commit).unwrap();
        assert_eq!(body, ThresholdValues::single(ThresholdField::Soil1, 28.0));

        assert!(coordinator.complete_threshold_commit(&failure()).is_empty());
        assert_eq!(store.get().thresholds.as_ref(), Some(&committed));

        assert_eq!(
            coordinator.complete_threshold_commit(&Ok(())),
            vec![SyncAction::RefreshThresholds]
        );
    }
}
