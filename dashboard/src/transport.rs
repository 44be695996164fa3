use std::{future::Future, time::Duration};

use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use greenhouse_common::{
    ActuatorCommand, ApiConfig, ChartWindow, SensorReading, ThresholdConfig, ThresholdValues,
    TransportError, PATH_MANUAL_CONTROL, PATH_MANUAL_RESUME, PATH_SENSORS_24H,
    PATH_SENSORS_BY_DATE, PATH_SENSORS_LATEST, PATH_THRESHOLDS,
};

/// The backend collaborator. Every call resolves eventually, with success or
/// a [`TransportError`]; the session never adds its own timeout on top.
pub trait Transport: Send + Sync + 'static {
    fn pull_latest(
        &self,
    ) -> impl Future<Output = Result<Option<SensorReading>, TransportError>> + Send;

    fn pull_series(
        &self,
        window: ChartWindow,
    ) -> impl Future<Output = Result<Vec<SensorReading>, TransportError>> + Send;

    fn pull_thresholds(&self)
        -> impl Future<Output = Result<ThresholdConfig, TransportError>> + Send;

    fn push_thresholds(
        &self,
        values: ThresholdValues,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn push_command(
        &self,
        command: ActuatorCommand,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn push_resume(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Operator yes/no decision point.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> impl Future<Output = bool> + Send;
}

/// An answer that was already given, e.g. as a request parameter.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmFlag(pub bool);

impl Confirm for ConfirmFlag {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<reqwest::Response, TransportError> {
        let response = request.send().await.map_err(|err| TransportError::Request {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_data<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, TransportError> {
        let response = self
            .execute(self.request(Method::GET, endpoint), endpoint)
            .await?;
        let envelope: Envelope<T> = response.json().await.map_err(|err| TransportError::Decode {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        })?;
        Ok(envelope.data)
    }
}

fn series_endpoint(window: ChartWindow) -> String {
    match window {
        ChartWindow::Last24Hours => PATH_SENSORS_24H.to_string(),
        ChartWindow::Day(date) => format!("{PATH_SENSORS_BY_DATE}/{date}"),
    }
}

/// Skips points that do not parse instead of failing the whole chart.
fn decode_series(endpoint: &str, points: Vec<serde_json::Value>) -> Vec<SensorReading> {
    let total = points.len();
    let readings: Vec<SensorReading> = points
        .into_iter()
        .filter_map(|point| serde_json::from_value(point).ok())
        .collect();
    if readings.len() != total {
        debug!(
            "{endpoint}: skipped {} unreadable series points",
            total - readings.len()
        );
    }
    readings
}

impl Transport for HttpTransport {
    async fn pull_latest(&self) -> Result<Option<SensorReading>, TransportError> {
        self.get_data(PATH_SENSORS_LATEST).await
    }

    async fn pull_series(&self, window: ChartWindow) -> Result<Vec<SensorReading>, TransportError> {
        let endpoint = series_endpoint(window);
        let points: Option<Vec<serde_json::Value>> = self.get_data(&endpoint).await?;
        Ok(decode_series(&endpoint, points.unwrap_or_default()))
    }

    async fn pull_thresholds(&self) -> Result<ThresholdConfig, TransportError> {
        self.get_data(PATH_THRESHOLDS).await
    }

    async fn push_thresholds(&self, values: ThresholdValues) -> Result<(), TransportError> {
        let request = self.request(Method::PUT, PATH_THRESHOLDS).json(&values);
        self.execute(request, PATH_THRESHOLDS).await.map(|_| ())
    }

    async fn push_command(&self, command: ActuatorCommand) -> Result<(), TransportError> {
        let request = self.request(Method::POST, PATH_MANUAL_CONTROL).json(&command);
        self.execute(request, PATH_MANUAL_CONTROL).await.map(|_| ())
    }

    async fn push_resume(&self) -> Result<(), TransportError> {
        let request = self.request(Method::POST, PATH_MANUAL_RESUME);
        self.execute(request, PATH_MANUAL_RESUME).await.map(|_| ())
    }
}
