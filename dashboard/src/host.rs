use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, time::MissedTickBehavior};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use greenhouse_common::{
    event_filter, Changes, ChannelEvent, ChannelSignal, ChartWindow, CommandOutcome,
    DashboardConfig, PushEvent, ResumeOutcome, Snapshot, SnapshotView, SyncError,
    ThresholdCommit, ThresholdField, ThresholdValues,
};

use crate::{
    session::{PullReport, Session},
    transport::{ConfirmFlag, HttpTransport},
};

#[derive(Clone)]
struct AppState {
    session: Arc<Session<HttpTransport>>,
    config: Arc<DashboardConfig>,
}

#[derive(Clone)]
struct ConfigStore {
    config_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct WindowRequest {
    #[serde(default)]
    date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct ActuatorRequest {
    state: bool,
    #[serde(default)]
    pwm: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FieldRequest {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct ResumeParams {
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    outcome: CommandOutcome,
    snapshot: SnapshotView,
}

#[derive(Debug, Serialize)]
struct ResumeResponse {
    outcome: ResumeOutcome,
    snapshot: SnapshotView,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load dashboard config from store: {err:#}");
        DashboardConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    let transport = HttpTransport::new(&config.api)?;
    let session = Session::new(transport);

    let mut mqtt_options = MqttOptions::new(
        config.mqtt.client_id.clone(),
        config.mqtt.host.clone(),
        config.mqtt.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    if !config.mqtt.user.is_empty() {
        mqtt_options.set_credentials(config.mqtt.user.clone(), config.mqtt.pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        session,
        config: Arc::new(config),
    };

    let change_log = app_state
        .session
        .subscribe(Box::new(|snapshot: &Snapshot, changes: Changes| {
            debug!(
                "snapshot changed {changes:?}, mode {:?}",
                snapshot.mode().map(|mode| mode.as_str())
            );
        }))
        .await;

    log_pull_failures("initial pull", &app_state.session.initial_pull().await);

    spawn_mqtt_loop(app_state.clone(), mqtt, eventloop);
    spawn_poll_loop(app_state.clone());

    let session = Arc::clone(&app_state.session);
    let web_root = app_state.config.web_root.clone();
    let port = app_state.config.http_port;
    let app = Router::new()
        .route("/api/snapshot", get(handle_get_snapshot))
        .route("/api/connectivity", get(handle_get_connectivity))
        .route("/api/refresh", post(handle_refresh))
        .route("/api/chart/window", put(handle_put_window))
        .route("/api/actuators/{name}", post(handle_actuator_command))
        .route("/api/thresholds", put(handle_put_thresholds))
        .route("/api/thresholds/{field}", put(handle_put_threshold_field))
        .route("/api/automation/resume", post(handle_resume_automation))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind dashboard server at {addr}"))?;

    info!("dashboard listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.unsubscribe(change_log).await;
    info!("dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

fn apply_env_overrides(config: &mut DashboardConfig) {
    if let Ok(url) = std::env::var("GREENHOUSE_API_URL") {
        config.api.base_url = url;
    }
    if let Ok(token) = std::env::var("GREENHOUSE_API_TOKEN") {
        config.api.token = Some(token);
    }
    if let Ok(host) = std::env::var("MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.mqtt.port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        config.mqtt.user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        config.mqtt.pass = pass;
    }
    if let Some(port) = std::env::var("DASHBOARD_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }
}

/// Push channel. Lifecycle changes feed the connectivity monitor; the
/// subscription is renewed on every ConnAck since sessions are not persisted.
fn spawn_mqtt_loop(app_state: AppState, mqtt: AsyncClient, mut eventloop: EventLoop) {
    tokio::spawn(async move {
        let prefix = app_state.config.mqtt.topic_prefix.clone();
        let filter = event_filter(&prefix);
        let retry_delay = Duration::from_millis(app_state.config.mqtt.reconnect_delay_ms);
        let mut connected = false;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    connected = true;
                    if let Err(err) = mqtt.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
                        warn!("mqtt subscribe to {filter} failed: {err}");
                    }
                    dispatch(&app_state, ChannelEvent::Lifecycle(ChannelSignal::Connected)).await;
                }
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    match PushEvent::decode(&prefix, &message.topic, &message.payload) {
                        Ok(Some(event)) => dispatch(&app_state, ChannelEvent::Push(event)).await,
                        Ok(None) => debug!("ignoring message on {}", message.topic),
                        Err(err) => warn!("dropping push event: {err}"),
                    }
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    if connected {
                        connected = false;
                        dispatch(&app_state, ChannelEvent::Lifecycle(ChannelSignal::Disconnected))
                            .await;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    if connected {
                        connected = false;
                        dispatch(&app_state, ChannelEvent::Lifecycle(ChannelSignal::Disconnected))
                            .await;
                    }
                    tokio::time::sleep(retry_delay).await;
                    dispatch(
                        &app_state,
                        ChannelEvent::Lifecycle(ChannelSignal::ReconnectAttempt),
                    )
                    .await;
                }
            }
        }
    });
}

async fn dispatch(app_state: &AppState, event: ChannelEvent) {
    let routed = app_state.session.handle_channel_event(&event).await;

    match routed.live {
        Some(true) => info!("push channel live"),
        Some(false) => warn!("push channel offline, polling continues"),
        None => {}
    }
    if let Some(name) = &routed.ignored {
        debug!("ignoring change for unknown actuator {name}");
    }

    if !routed.actions.is_empty() {
        let session = Arc::clone(&app_state.session);
        tokio::spawn(async move {
            let report = session.run_actions(&routed.actions).await;
            log_pull_failures("follow-up refresh", &report);
        });
    }
}

/// Fixed cadence, independent of push-channel health.
fn spawn_poll_loop(app_state: AppState) {
    tokio::spawn(async move {
        let period = Duration::from_millis(app_state.config.poll_interval_ms);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let report = app_state.session.poll_latest().await;
            log_pull_failures("periodic poll", &report);
        }
    });
}

fn log_pull_failures(context: &str, report: &PullReport) {
    if !report.failures.is_empty() {
        warn!(
            "{context}: {} pull(s) failed, last known values kept",
            report.failures.len()
        );
    }
}

async fn handle_get_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.snapshot_view().await)
}

async fn handle_get_connectivity(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.connectivity().await)
}

async fn handle_refresh(State(state): State<AppState>) -> Response {
    let report = state.session.refresh_now().await;
    if let Some(err) = report.first_failure() {
        return error_response(StatusCode::BAD_GATEWAY, &err.to_string());
    }
    Json(state.session.snapshot_view().await).into_response()
}

async fn handle_put_window(
    State(state): State<AppState>,
    Json(request): Json<WindowRequest>,
) -> Response {
    let today = Utc::now().date_naive();
    let window = request
        .date
        .map(|date| ChartWindow::for_date(date, today))
        .unwrap_or_default();

    let report = state.session.select_window(window).await;
    if let Some(err) = report.first_failure() {
        return error_response(StatusCode::BAD_GATEWAY, &err.to_string());
    }
    Json(state.session.snapshot_view().await).into_response()
}

async fn handle_actuator_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ActuatorRequest>,
) -> Response {
    let handle = match state
        .session
        .send_command(&name, request.state, request.pwm)
        .await
    {
        Ok(handle) => handle,
        Err(err) => return sync_error_response(&err.into()),
    };

    match handle.await {
        Ok(report) => match report.error {
            Some(err) => {
                debug!("{} command reported {:?}", report.command.actuator, report.outcome);
                sync_error_response(&err.into())
            }
            None => Json(CommandResponse {
                outcome: report.outcome,
                snapshot: state.session.snapshot_view().await,
            })
            .into_response(),
        },
        Err(err) => {
            warn!("command task for {name} ended abnormally: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Command task failed")
        }
    }
}

async fn handle_put_thresholds(
    State(state): State<AppState>,
    Json(values): Json<ThresholdValues>,
) -> Response {
    commit_thresholds(&state, ThresholdCommit::Bulk(values)).await
}

async fn handle_put_threshold_field(
    State(state): State<AppState>,
    Path(field): Path<String>,
    Json(request): Json<FieldRequest>,
) -> Response {
    let field = match field.parse::<ThresholdField>() {
        Ok(field) => field,
        Err(err) => return sync_error_response(&err.into()),
    };
    commit_thresholds(
        &state,
        ThresholdCommit::Field {
            field,
            value: request.value,
        },
    )
    .await
}

async fn commit_thresholds(state: &AppState, commit: ThresholdCommit) -> Response {
    let handle = match state.session.commit_thresholds(commit).await {
        Ok(handle) => handle,
        Err(err) => return sync_error_response(&err.into()),
    };

    match handle.await {
        Ok(Ok(())) => Json(state.session.snapshot_view().await).into_response(),
        Ok(Err(err)) => sync_error_response(&err),
        Err(err) => {
            warn!("threshold commit task ended abnormally: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Threshold commit failed")
        }
    }
}

async fn handle_resume_automation(
    State(state): State<AppState>,
    Query(params): Query<ResumeParams>,
) -> Response {
    match state
        .session
        .resume_automation(&ConfirmFlag(params.confirm))
        .await
    {
        Ok(outcome) => Json(ResumeResponse {
            outcome,
            snapshot: state.session.snapshot_view().await,
        })
        .into_response(),
        Err(err) => sync_error_response(&err.into()),
    }
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("GREENHOUSE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.greenhouse"));

        Self {
            config_path: Arc::new(data_dir.join("dashboard.json")),
        }
    }

    async fn load_config(&self) -> anyhow::Result<DashboardConfig> {
        match tokio::fs::read(self.config_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<DashboardConfig>(&raw)
                .with_context(|| format!("invalid config at {}", self.config_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DashboardConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn sync_error_response(err: &SyncError) -> Response {
    let status = match err {
        SyncError::Validation(_) => StatusCode::BAD_REQUEST,
        SyncError::Transport(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
