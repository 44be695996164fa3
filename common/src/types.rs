use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const PWM_MAX: i64 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actuator {
    PumpWater,
    PumpNutrient,
    FanExhaust,
    Peltier,
    FanPeltierHot,
    FanPeltierCold,
}

impl Actuator {
    pub const ALL: [Actuator; 6] = [
        Self::PumpWater,
        Self::PumpNutrient,
        Self::FanExhaust,
        Self::Peltier,
        Self::FanPeltierHot,
        Self::FanPeltierCold,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PumpWater => "pump_water",
            Self::PumpNutrient => "pump_nutrient",
            Self::FanExhaust => "fan_exhaust",
            Self::Peltier => "peltier",
            Self::FanPeltierHot => "fan_peltier_hot",
            Self::FanPeltierCold => "fan_peltier_cold",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::PumpWater => 0,
            Self::PumpNutrient => 1,
            Self::FanExhaust => 2,
            Self::Peltier => 3,
            Self::FanPeltierHot => 4,
            Self::FanPeltierCold => 5,
        }
    }

    /// Only the exhaust fan and the peltier element take a duty value.
    pub fn supports_pwm(self) -> bool {
        matches!(self, Self::FanExhaust | Self::Peltier)
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actuator {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|actuator| actuator.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownActuator(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMode {
    Auto,
    Manual,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }

    pub fn from_manual_override(manual_override: bool) -> Self {
        if manual_override {
            Self::Manual
        } else {
            Self::Auto
        }
    }
}

/// Follow-up work that routing or a commit asks the host to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    RefreshThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct NutrientReading {
    #[serde(default)]
    pub n: Option<f64>,
    #[serde(default)]
    pub p: Option<f64>,
    #[serde(default)]
    pub k: Option<f64>,
    #[serde(default)]
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PwmReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_exhaust: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peltier: Option<u8>,
}

/// Actuator block as reported by the backend. Any entry may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActuatorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pump_water: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pump_nutrient: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_exhaust: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peltier: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_peltier_hot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_peltier_cold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_override: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwm: Option<PwmReport>,
}

impl ActuatorReport {
    pub fn state(&self, actuator: Actuator) -> Option<bool> {
        match actuator {
            Actuator::PumpWater => self.pump_water,
            Actuator::PumpNutrient => self.pump_nutrient,
            Actuator::FanExhaust => self.fan_exhaust,
            Actuator::Peltier => self.peltier,
            Actuator::FanPeltierHot => self.fan_peltier_hot,
            Actuator::FanPeltierCold => self.fan_peltier_cold,
        }
    }

    pub fn set_state(&mut self, actuator: Actuator, state: bool) {
        let slot = match actuator {
            Actuator::PumpWater => &mut self.pump_water,
            Actuator::PumpNutrient => &mut self.pump_nutrient,
            Actuator::FanExhaust => &mut self.fan_exhaust,
            Actuator::Peltier => &mut self.peltier,
            Actuator::FanPeltierHot => &mut self.fan_peltier_hot,
            Actuator::FanPeltierCold => &mut self.fan_peltier_cold,
        };
        *slot = Some(state);
    }

    pub fn pwm(&self, actuator: Actuator) -> Option<u8> {
        let pwm = self.pwm?;
        match actuator {
            Actuator::FanExhaust => pwm.fan_exhaust,
            Actuator::Peltier => pwm.peltier,
            _ => None,
        }
    }

    pub fn mode(&self) -> Option<ControlMode> {
        self.manual_override.map(ControlMode::from_manual_override)
    }

    pub fn is_complete(&self) -> bool {
        Actuator::ALL
            .into_iter()
            .all(|actuator| self.state(actuator).is_some())
    }
}

/// One telemetry sample. Everything except the timestamp is optional on the
/// wire; the backend stamps either `timestamp` or `received_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReading")]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "temp", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "hum", skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npk: Option<NutrientReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actuators: Option<ActuatorReport>,
}

impl SensorReading {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            temperature: None,
            humidity: None,
            soil1: None,
            soil2: None,
            npk: None,
            actuators: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawReading {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    temp: Option<f64>,
    #[serde(default)]
    hum: Option<f64>,
    #[serde(default)]
    soil1: Option<f64>,
    #[serde(default)]
    soil2: Option<f64>,
    #[serde(default)]
    npk: Option<NutrientReading>,
    #[serde(default)]
    actuators: Option<ActuatorReport>,
}

impl TryFrom<RawReading> for SensorReading {
    type Error = String;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        let timestamp = raw
            .timestamp
            .or(raw.received_at)
            .ok_or_else(|| "reading carries neither timestamp nor received_at".to_string())?;
        Ok(Self {
            timestamp,
            temperature: raw.temp,
            humidity: raw.hum,
            soil1: raw.soil1,
            soil2: raw.soil2,
            npk: raw.npk,
            actuators: raw.actuators,
        })
    }
}

/// A chart point; only the climate series are charted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "temp")]
    pub temperature: Option<f64>,
    #[serde(rename = "hum")]
    pub humidity: Option<f64>,
    pub soil1: Option<f64>,
    pub soil2: Option<f64>,
}

impl From<&SensorReading> for SeriesPoint {
    fn from(reading: &SensorReading) -> Self {
        Self {
            timestamp: reading.timestamp,
            temperature: reading.temperature,
            humidity: reading.humidity,
            soil1: reading.soil1,
            soil2: reading.soil2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "date", rename_all = "snake_case")]
pub enum ChartWindow {
    #[default]
    Last24Hours,
    Day(NaiveDate),
}

impl ChartWindow {
    /// Today's date is the rolling live window; any other date is a fixed day.
    pub fn for_date(date: NaiveDate, today: NaiveDate) -> Self {
        if date == today {
            Self::Last24Hours
        } else {
            Self::Day(date)
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Last24Hours)
    }
}
