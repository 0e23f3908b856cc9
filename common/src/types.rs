use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    FanOnly,
    Auto,
    Other(String),
}

impl HvacMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "off" => Self::Off,
            "heat" => Self::Heat,
            "cool" => Self::Cool,
            "fan_only" | "fan" => Self::FanOnly,
            "auto" | "heat_cool" => Self::Auto,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::FanOnly => "fan_only",
            Self::Auto => "auto",
            Self::Other(value) => value.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Toggle,
    Plus,
    Minus,
}

impl ButtonAction {
    /// Decodes both the short names and the zigbee2mqtt W100 action strings.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "toggle" | "double" | "double_center" => Some(Self::Toggle),
            "plus" | "single_plus" => Some(Self::Plus),
            "minus" | "single_minus" => Some(Self::Minus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::Plus => "plus",
            Self::Minus => "minus",
        }
    }
}

/// A host entity as seen through the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.state.as_str(), "unavailable" | "unknown")
    }

    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    pub fn attr_f32(&self, key: &str) -> Option<f32> {
        let value = match self.attributes.get(key)? {
            Value::Number(number) => number.as_f64().map(|value| value as f32),
            Value::String(text) => text.parse::<f32>().ok(),
            _ => None,
        };
        value.filter(|value| value.is_finite())
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn attr_strings(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text.clone()),
                        Value::Number(number) => Some(number.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The state parsed as a number, for sensor entities.
    pub fn numeric_state(&self) -> Option<f32> {
        self.state
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
    }

    /// Read-only climate view. `None` when the entity is unavailable.
    pub fn climate_snapshot(&self) -> Option<ClimateSnapshot> {
        if !self.is_available() {
            return None;
        }

        let min_temp = self.attr_f32("min_temp").unwrap_or(DEFAULT_MIN_TEMP);
        let max_temp = self.attr_f32("max_temp").unwrap_or(DEFAULT_MAX_TEMP);
        // A lone Fahrenheit bound can land on the wrong side of a Celsius default.
        let (min_temp, max_temp) = if min_temp > max_temp {
            (max_temp, min_temp)
        } else {
            (min_temp, max_temp)
        };

        Some(ClimateSnapshot {
            entity_id: self.entity_id.clone(),
            mode: HvacMode::parse(&self.state),
            hvac_modes: self
                .attr_strings("hvac_modes")
                .iter()
                .map(|mode| HvacMode::parse(mode))
                .collect(),
            target_temperature: self.attr_f32("temperature"),
            current_temperature: self.attr_f32("current_temperature"),
            min_temp,
            max_temp,
            step: self
                .attr_f32("target_temp_step")
                .filter(|step| *step > 0.0)
                .unwrap_or(NATIVE_STEP),
            fan_mode: self.attr_str("fan_mode").map(str::to_string),
            fan_modes: self.attr_strings("fan_modes"),
            swing_mode: self.attr_str("swing_mode").map(str::to_string),
        })
    }
}

pub const DEFAULT_MIN_TEMP: f32 = 7.0;
pub const DEFAULT_MAX_TEMP: f32 = 35.0;
pub const DEFAULT_TARGET_TEMP: f32 = 21.0;
/// Resolution of the W100 display.
pub const NATIVE_STEP: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateSnapshot {
    pub entity_id: String,
    pub mode: HvacMode,
    pub hvac_modes: Vec<HvacMode>,
    pub target_temperature: Option<f32>,
    pub current_temperature: Option<f32>,
    pub min_temp: f32,
    pub max_temp: f32,
    pub step: f32,
    pub fan_mode: Option<String>,
    pub fan_modes: Vec<String>,
    pub swing_mode: Option<String>,
}

impl ClimateSnapshot {
    pub fn supports(&self, mode: &HvacMode) -> bool {
        self.hvac_modes.is_empty() || self.hvac_modes.contains(mode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ClimateAction {
    SetMode(HvacMode),
    SetTemperature(f32),
    SetFanMode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateCommand {
    pub entity_id: String,
    pub action: ClimateAction,
}

impl ClimateCommand {
    pub fn set_mode(entity_id: &str, mode: HvacMode) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            action: ClimateAction::SetMode(mode),
        }
    }

    pub fn set_temperature(entity_id: &str, value: f32) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            action: ClimateAction::SetTemperature(value),
        }
    }

    pub fn set_fan_mode(entity_id: &str, fan_mode: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            action: ClimateAction::SetFanMode(fan_mode.into()),
        }
    }
}

/// Latest readings reported by the W100 itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceReadings {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub humidity: Option<f32>,
    #[serde(default)]
    pub battery: Option<f32>,
    #[serde(default)]
    pub linkquality: Option<u8>,
    #[serde(default)]
    pub voltage: Option<f32>,
}

impl DeviceReadings {
    /// Merges a newer partial report; absent fields keep their previous value.
    pub fn merge(&mut self, update: &DeviceReadings) -> bool {
        let before = self.clone();
        if update.temperature.is_some() {
            self.temperature = update.temperature;
        }
        if update.humidity.is_some() {
            self.humidity = update.humidity;
        }
        if update.battery.is_some() {
            self.battery = update.battery;
        }
        if update.linkquality.is_some() {
            self.linkquality = update.linkquality;
        }
        if update.voltage.is_some() {
            self.voltage = update.voltage;
        }
        *self != before
    }
}
