use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdField {
    Soil1,
    Soil2,
    TempHigh,
    TempLow,
    HumHigh,
    HumLow,
    NpkN,
    NpkP,
    NpkK,
}

impl ThresholdField {
    pub const ALL: [ThresholdField; 9] = [
        Self::Soil1,
        Self::Soil2,
        Self::TempHigh,
        Self::TempLow,
        Self::HumHigh,
        Self::HumLow,
        Self::NpkN,
        Self::NpkP,
        Self::NpkK,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soil1 => "soil1",
            Self::Soil2 => "soil2",
            Self::TempHigh => "temp_high",
            Self::TempLow => "temp_low",
            Self::HumHigh => "hum_high",
            Self::HumLow => "hum_low",
            Self::NpkN => "npk_n",
            Self::NpkP => "npk_p",
            Self::NpkK => "npk_k",
        }
    }
}

impl fmt::Display for ThresholdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdField {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownThresholdField(value.to_string()))
    }
}

/// The nine automation trigger values. Used both for the committed
/// configuration and for partial update bodies, so every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hum_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hum_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npk_n: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npk_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npk_k: Option<f64>,
}

impl ThresholdValues {
    pub fn get(&self, field: ThresholdField) -> Option<f64> {
        match field {
            ThresholdField::Soil1 => self.soil1,
            ThresholdField::Soil2 => self.soil2,
            ThresholdField::TempHigh => self.temp_high,
            ThresholdField::TempLow => self.temp_low,
            ThresholdField::HumHigh => self.hum_high,
            ThresholdField::HumLow => self.hum_low,
            ThresholdField::NpkN => self.npk_n,
            ThresholdField::NpkP => self.npk_p,
            ThresholdField::NpkK => self.npk_k,
        }
    }

    pub fn set(&mut self, field: ThresholdField, value: Option<f64>) {
        let slot = match field {
            ThresholdField::Soil1 => &mut self.soil1,
            ThresholdField::Soil2 => &mut self.soil2,
            ThresholdField::TempHigh => &mut self.temp_high,
            ThresholdField::TempLow => &mut self.temp_low,
            ThresholdField::HumHigh => &mut self.hum_high,
            ThresholdField::HumLow => &mut self.hum_low,
            ThresholdField::NpkN => &mut self.npk_n,
            ThresholdField::NpkP => &mut self.npk_p,
            ThresholdField::NpkK => &mut self.npk_k,
        };
        *slot = value;
    }

    pub fn single(field: ThresholdField, value: f64) -> Self {
        let mut values = Self::default();
        values.set(field, Some(value));
        values
    }

    pub fn missing_fields(&self) -> Vec<ThresholdField> {
        ThresholdField::ALL
            .into_iter()
            .filter(|field| self.get(*field).is_none())
            .collect()
    }

    /// Copies present fields from `incoming`. With `overwrite` unset, only
    /// gaps are filled and conflicting values resolve to the larger one, so
    /// two deliveries of the same revision converge regardless of order.
    pub(crate) fn merge_from(&mut self, incoming: &ThresholdValues, overwrite: bool) -> bool {
        let mut changed = false;
        for field in ThresholdField::ALL {
            let Some(value) = incoming.get(field) else {
                continue;
            };
            let replace = match self.get(field) {
                None => true,
                Some(current) if overwrite => current != value,
                Some(current) => value > current,
            };
            if replace {
                self.set(field, Some(value));
                changed = true;
            }
        }
        changed
    }
}

/// The automation engine's committed operating parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(flatten)]
    pub values: ThresholdValues,
    #[serde(
        rename = "lastSyncedWithArduino",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// What the operator asked to commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdCommit {
    Field { field: ThresholdField, value: f64 },
    Bulk(ThresholdValues),
}

impl ThresholdCommit {
    /// Produces the update body, or the reason it must not be sent.
    pub fn validate(&self) -> Result<ThresholdValues, ValidationError> {
        match *self {
            Self::Field { field, value } => {
                if !value.is_finite() {
                    return Err(ValidationError::NonFiniteThreshold(field));
                }
                Ok(ThresholdValues::single(field, value))
            }
            Self::Bulk(values) => {
                let missing = values.missing_fields();
                if !missing.is_empty() {
                    return Err(ValidationError::IncompleteBulk(missing));
                }
                if let Some(field) = ThresholdField::ALL
                    .into_iter()
                    .find(|field| values.get(*field).is_some_and(|value| !value.is_finite()))
                {
                    return Err(ValidationError::NonFiniteThreshold(field));
                }
                Ok(values)
            }
        }
    }
}

/// Operator edit buffer. Lives outside the snapshot store so that a failed
/// commit leaves both the draft and the committed values as they were.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdDraft {
    values: ThresholdValues,
}

impl ThresholdDraft {
    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self {
            values: config.values,
        }
    }

    pub fn value(&self, field: ThresholdField) -> Option<f64> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: ThresholdField, value: f64) {
        self.values.set(field, Some(value));
    }

    pub fn values(&self) -> &ThresholdValues {
        &self.values
    }

    pub fn changed_fields(&self, committed: &ThresholdConfig) -> Vec<ThresholdField> {
        ThresholdField::ALL
            .into_iter()
            .filter(|field| self.values.get(*field) != committed.values.get(*field))
            .collect()
    }

    pub fn field_commit(&self, field: ThresholdField) -> Option<ThresholdCommit> {
        self.values
            .get(field)
            .map(|value| ThresholdCommit::Field { field, value })
    }

    pub fn bulk_commit(&self) -> ThresholdCommit {
        ThresholdCommit::Bulk(self.values)
    }
}
