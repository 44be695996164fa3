use serde::{Deserialize, Serialize};

use crate::topics::DEFAULT_EVENT_PREFIX;

pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 600_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            token: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "greenhouse-dashboard".to_string(),
            topic_prefix: DEFAULT_EVENT_PREFIX.to_string(),
            keep_alive_secs: 30,
            reconnect_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DashboardConfig {
    pub api: ApiConfig,
    pub mqtt: MqttConfig,
    pub poll_interval_ms: u64,
    pub http_port: u16,
    pub web_root: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            mqtt: MqttConfig::default(),
            poll_interval_ms: 15_000,
            http_port: 8080,
            web_root: "web".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn sanitize(&mut self) {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        self.base_url = if trimmed.is_empty() {
            Self::default().base_url
        } else {
            trimmed.to_string()
        };

        if self.token.as_deref().is_some_and(|token| token.trim().is_empty()) {
            self.token = None;
        }

        self.request_timeout_ms = self.request_timeout_ms.clamp(500, 120_000);
    }
}

impl MqttConfig {
    pub fn sanitize(&mut self) {
        if self.port == 0 {
            self.port = 1883;
        }

        let prefix = self.topic_prefix.trim().trim_matches('/');
        self.topic_prefix = if prefix.is_empty() {
            DEFAULT_EVENT_PREFIX.to_string()
        } else {
            prefix.to_string()
        };

        if self.client_id.trim().is_empty() {
            self.client_id = Self::default().client_id;
        }

        self.keep_alive_secs = self.keep_alive_secs.clamp(5, 300);
        self.reconnect_delay_ms = self.reconnect_delay_ms.clamp(250, 60_000);
    }
}

impl DashboardConfig {
    pub fn sanitize(&mut self) {
        self.api.sanitize();
        self.mqtt.sanitize();
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        if self.http_port == 0 {
            self.http_port = 8080;
        }
    }
}
