use std::sync::Arc;

use chrono::Utc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use greenhouse_common::{
    route, ActuatorCommand, ChannelEvent, ChartWindow, CommandOutcome, ConnectivityMonitor,
    ConnectivityStatus, ControlCoordinator, Observer, PollScheduler, Pull, ResumeOutcome,
    ResumePlan, Routed, SnapshotStore, SnapshotView, SubscriptionId, SyncAction, SyncError,
    ThresholdCommit, TransportError, ValidationError, PATH_MANUAL_RESUME, RESUME_PROMPT,
};

use crate::transport::{Confirm, Transport};

/// The synchronous core. Only ever touched under the session lock, and the
/// lock is never held across a transport call.
#[derive(Debug, Default)]
struct SyncCore {
    store: SnapshotStore,
    coordinator: ControlCoordinator,
    poller: PollScheduler,
    connectivity: ConnectivityMonitor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub command: ActuatorCommand,
    pub outcome: CommandOutcome,
    pub error: Option<TransportError>,
}

/// Failed pulls from one batch. The store keeps its last-known values for
/// whatever failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    pub failures: Vec<TransportError>,
}

impl PullReport {
    pub fn first_failure(&self) -> Option<&TransportError> {
        self.failures.first()
    }
}

pub struct Session<T> {
    core: Mutex<SyncCore>,
    transport: T,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(SyncCore::default()),
            transport,
        })
    }

    pub async fn snapshot_view(&self) -> SnapshotView {
        let core = self.core.lock().await;
        core.store.get().view(core.connectivity.is_live())
    }

    pub async fn connectivity(&self) -> ConnectivityStatus {
        self.core.lock().await.connectivity.status()
    }

    pub async fn subscribe(&self, observer: Observer) -> SubscriptionId {
        self.core.lock().await.store.subscribe(observer)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.lock().await.store.unsubscribe(id)
    }

    pub async fn initial_pull(&self) -> PullReport {
        let pulls = self.core.lock().await.poller.initial_pull();
        self.run_pulls(pulls).await
    }

    pub async fn refresh_now(&self) -> PullReport {
        let pulls = self.core.lock().await.poller.refresh_now();
        self.run_pulls(pulls).await
    }

    pub async fn poll_latest(&self) -> PullReport {
        let pulls = self.core.lock().await.poller.periodic();
        self.run_pulls(pulls).await
    }

    pub async fn select_window(&self, window: ChartWindow) -> PullReport {
        let pull = {
            let mut guard = self.core.lock().await;
            let SyncCore { store, poller, .. } = &mut *guard;
            poller.select_window(store, window)
        };
        match pull {
            Some(pull) => self.run_pulls(vec![pull]).await,
            None => PullReport::default(),
        }
    }

    async fn run_pulls(&self, pulls: Vec<Pull>) -> PullReport {
        let mut report = PullReport::default();
        for pull in pulls {
            if let Err(err) = self.run_pull(pull).await {
                warn!("pull failed, keeping last known values: {err}");
                report.failures.push(err);
            }
        }
        report
    }

    async fn run_pull(&self, pull: Pull) -> Result<(), TransportError> {
        match pull {
            Pull::Latest => {
                let Some(reading) = self.transport.pull_latest().await? else {
                    debug!("backend has no reading yet");
                    return Ok(());
                };
                let mut guard = self.core.lock().await;
                let core = &mut *guard;
                core.poller.apply_latest(&mut core.store, &reading);
            }
            Pull::Thresholds => {
                let config = self.transport.pull_thresholds().await?;
                let mut guard = self.core.lock().await;
                let core = &mut *guard;
                let changes = core
                    .poller
                    .apply_thresholds(&mut core.store, &config, Utc::now());
                if !changes.thresholds {
                    debug!("threshold pull carried nothing newer");
                }
            }
            Pull::Series(request) => {
                let points = self.transport.pull_series(request.window).await?;
                let mut guard = self.core.lock().await;
                let core = &mut *guard;
                if core
                    .poller
                    .apply_series(&mut core.store, request, &points)
                    .is_none()
                {
                    debug!("dropping series for replaced window {:?}", request.window);
                }
            }
        }
        Ok(())
    }

    /// Routes one push-channel event. Follow-up actions are returned for the
    /// caller to run with [`Self::run_actions`].
    pub async fn handle_channel_event(&self, event: &ChannelEvent) -> Routed {
        let mut guard = self.core.lock().await;
        let core = &mut *guard;
        route(event, &mut core.store, &mut core.connectivity, Utc::now())
    }

    pub async fn run_actions(&self, actions: &[SyncAction]) -> PullReport {
        let pulls = actions
            .iter()
            .map(|action| match action {
                SyncAction::RefreshThresholds => Pull::Thresholds,
            })
            .collect();
        self.run_pulls(pulls).await
    }

    /// Validates and applies the command optimistically before returning.
    /// The network round trip and its reconciliation run in their own task,
    /// so dropping the returned handle does not cancel them.
    pub async fn send_command(
        self: &Arc<Self>,
        name: &str,
        state: bool,
        pwm: Option<i64>,
    ) -> Result<JoinHandle<CommandReport>, ValidationError> {
        let command = ActuatorCommand::parse(name, state, pwm)?;
        let pending = {
            let mut guard = self.core.lock().await;
            let core = &mut *guard;
            core.coordinator
                .begin_command(&mut core.store, command, Utc::now())?
        };

        let session = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let result = session.transport.push_command(command).await;
            let outcome = {
                let mut guard = session.core.lock().await;
                let core = &mut *guard;
                core.coordinator
                    .complete_command(&mut core.store, pending, &result)
            };
            match (&result, outcome) {
                (Ok(()), _) => info!("{} -> {} confirmed", command.actuator, on_off(state)),
                (Err(err), CommandOutcome::RolledBack) => {
                    warn!("{} command failed, rolled back: {err}", command.actuator)
                }
                (Err(err), _) => warn!(
                    "{} command failed, newer state kept: {err}",
                    command.actuator
                ),
            }
            CommandReport {
                command,
                outcome,
                error: result.err(),
            }
        }))
    }

    /// Nothing is written to the store up front. A landed commit is followed
    /// by a full threshold re-pull.
    pub async fn commit_thresholds(
        self: &Arc<Self>,
        commit: ThresholdCommit,
    ) -> Result<JoinHandle<Result<(), SyncError>>, ValidationError> {
        let body = self
            .core
            .lock()
            .await
            .coordinator
            .prepare_threshold_commit(&commit)?;

        let session = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let result = session.transport.push_thresholds(body).await;
            let actions = session
                .core
                .lock()
                .await
                .coordinator
                .complete_threshold_commit(&result);
            if let Err(err) = result {
                warn!("threshold commit failed, committed values untouched: {err}");
                return Err(SyncError::Transport(err));
            }

            let report = session.run_actions(&actions).await;
            match report.first_failure() {
                Some(err) => Err(SyncError::Transport(err.clone())),
                None => Ok(()),
            }
        }))
    }

    /// Waits on the operator's answer, then issues the resume call in its own
    /// task. MANUAL only ends once the backend confirms.
    pub async fn resume_automation(
        self: &Arc<Self>,
        confirm: &impl Confirm,
    ) -> Result<ResumeOutcome, TransportError> {
        let plan = {
            let core = self.core.lock().await;
            core.coordinator.plan_resume(&core.store)
        };
        if plan == ResumePlan::AlreadyAuto {
            return Ok(ResumeOutcome::AlreadyAuto);
        }
        if !confirm.confirm(RESUME_PROMPT).await {
            return Ok(ResumeOutcome::Declined);
        }

        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = session.transport.push_resume().await;
            let mut guard = session.core.lock().await;
            let core = &mut *guard;
            core.coordinator
                .complete_resume(&mut core.store, &result, Utc::now());
            result
        });
        match task.await {
            Ok(Ok(())) => {
                info!("automation resumed");
                Ok(ResumeOutcome::Resumed)
            }
            Ok(Err(err)) => {
                warn!("resume failed, staying in MANUAL: {err}");
                Err(err)
            }
            Err(err) => Err(TransportError::Request {
                endpoint: PATH_MANUAL_RESUME.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}
