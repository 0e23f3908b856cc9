use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    EntityState, HvacMode, DEFAULT_MAX_TEMP, DEFAULT_MIN_TEMP, DEFAULT_TARGET_TEMP, NATIVE_STEP,
};

pub const PLATFORM: &str = "w100_smart_control";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{role} entity {entity_id} not found")]
    MissingEntity { role: EntityRole, entity_id: String },
    #[error("{role} entity {entity_id} is unavailable")]
    UnavailableEntity { role: EntityRole, entity_id: String },
    #[error("invalid temperature range: min {min} max {max} target {target}")]
    InvalidRange { min: f32, max: f32, target: f32 },
    #[error("invalid tolerance {0}")]
    InvalidTolerance(f32),
    #[error("device name cannot be empty")]
    EmptyDeviceName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    HeaterSwitch,
    TemperatureSensor,
    Climate,
}

impl std::fmt::Display for EntityRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::HeaterSwitch => "heater",
            Self::TemperatureSensor => "temperature sensor",
            Self::Climate => "climate",
        })
    }
}

/// Generic thermostat as requested during setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatRequest {
    pub heater_switch: String,
    pub temperature_sensor: String,
    #[serde(default = "default_min_temp")]
    pub min_temp: f32,
    #[serde(default = "default_max_temp")]
    pub max_temp: f32,
    #[serde(default = "default_target_temp")]
    pub target_temp: f32,
    #[serde(default = "default_tolerance")]
    pub cold_tolerance: f32,
    #[serde(default = "default_tolerance")]
    pub hot_tolerance: f32,
    #[serde(default = "default_precision")]
    pub precision: f32,
}

fn default_min_temp() -> f32 {
    DEFAULT_MIN_TEMP
}

fn default_max_temp() -> f32 {
    DEFAULT_MAX_TEMP
}

fn default_target_temp() -> f32 {
    DEFAULT_TARGET_TEMP
}

fn default_tolerance() -> f32 {
    0.3
}

fn default_precision() -> f32 {
    NATIVE_STEP
}

impl ThermostatRequest {
    pub fn new(heater_switch: impl Into<String>, temperature_sensor: impl Into<String>) -> Self {
        Self {
            heater_switch: heater_switch.into(),
            temperature_sensor: temperature_sensor.into(),
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
            target_temp: default_target_temp(),
            cold_tolerance: default_tolerance(),
            hot_tolerance: default_tolerance(),
            precision: default_precision(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [self.min_temp, self.max_temp, self.target_temp]
            .iter()
            .all(|value| value.is_finite());
        if !finite
            || self.min_temp >= self.max_temp
            || !(self.min_temp..=self.max_temp).contains(&self.target_temp)
        {
            return Err(ConfigError::InvalidRange {
                min: self.min_temp,
                max: self.max_temp,
                target: self.target_temp,
            });
        }
        for tolerance in [self.cold_tolerance, self.hot_tolerance] {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(ConfigError::InvalidTolerance(tolerance));
            }
        }
        Ok(())
    }
}

/// Confirms a referenced entity exists and is available.
pub fn validate_entity<'a>(
    role: EntityRole,
    entity_id: &str,
    state: Option<&'a EntityState>,
) -> Result<&'a EntityState, ConfigError> {
    match state {
        None => Err(ConfigError::MissingEntity {
            role,
            entity_id: entity_id.to_string(),
        }),
        Some(state) if !state.is_available() => Err(ConfigError::UnavailableEntity {
            role,
            entity_id: entity_id.to_string(),
        }),
        Some(state) => Ok(state),
    }
}

/// Configuration handed to the host's generic thermostat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericThermostatConfig {
    pub name: String,
    pub heater: String,
    pub target_sensor: String,
    pub min_temp: f32,
    pub max_temp: f32,
    pub target_temp: f32,
    pub cold_tolerance: f32,
    pub hot_tolerance: f32,
    pub precision: f32,
    pub initial_hvac_mode: HvacMode,
    pub unique_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatRecord {
    pub entity_id: String,
    pub device_name: String,
    pub sequence: u64,
    pub config: GenericThermostatConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionAdjusted {
    pub requested: f32,
}

impl ThermostatRecord {
    pub fn build(
        entity_id: &str,
        device_name: &str,
        sequence: u64,
        request: &ThermostatRequest,
    ) -> (Self, Option<PrecisionAdjusted>) {
        let (precision, adjusted) = normalize_precision(request.precision);
        let record = Self {
            entity_id: entity_id.to_string(),
            device_name: device_name.to_string(),
            sequence,
            config: GenericThermostatConfig {
                name: friendly_name(device_name),
                heater: request.heater_switch.clone(),
                target_sensor: request.temperature_sensor.clone(),
                min_temp: request.min_temp,
                max_temp: request.max_temp,
                target_temp: request.target_temp,
                cold_tolerance: request.cold_tolerance,
                hot_tolerance: request.hot_tolerance,
                precision,
                initial_hvac_mode: HvacMode::Off,
                unique_id: format!("{PLATFORM}_{entity_id}"),
            },
        };
        (record, adjusted)
    }

    /// Applies a new request. Returns whether the heater or sensor changed.
    pub fn apply(&mut self, request: &ThermostatRequest) -> (bool, Option<PrecisionAdjusted>) {
        let critical = self.config.heater != request.heater_switch
            || self.config.target_sensor != request.temperature_sensor;
        let (precision, adjusted) = normalize_precision(request.precision);

        self.config.heater = request.heater_switch.clone();
        self.config.target_sensor = request.temperature_sensor.clone();
        self.config.min_temp = request.min_temp;
        self.config.max_temp = request.max_temp;
        self.config.target_temp = request.target_temp;
        self.config.cold_tolerance = request.cold_tolerance;
        self.config.hot_tolerance = request.hot_tolerance;
        self.config.precision = precision;

        (critical, adjusted)
    }
}

/// The W100 display renders half degrees only.
pub fn normalize_precision(requested: f32) -> (f32, Option<PrecisionAdjusted>) {
    if requested == NATIVE_STEP {
        (NATIVE_STEP, None)
    } else {
        (NATIVE_STEP, Some(PrecisionAdjusted { requested }))
    }
}

/// Lowercase, non-alphanumerics to `_`, runs collapsed, edges trimmed.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

pub fn base_object_id(device_name: &str) -> String {
    let slug = slugify(device_name);
    if slug.is_empty() {
        "w100_thermostat".to_string()
    } else {
        format!("w100_{slug}_thermostat")
    }
}

/// `climate.<base>` for attempt 0, then `climate.<base>_<n>`.
pub fn candidate_entity_id(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("climate.{base}")
    } else {
        format!("climate.{base}_{attempt}")
    }
}

pub fn friendly_name(device_name: &str) -> String {
    let words: Vec<String> = device_name
        .replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();
    format!("W100 {} Thermostat", words.join(" "))
}
