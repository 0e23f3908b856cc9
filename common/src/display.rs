use serde::{Deserialize, Serialize};

use crate::{
    config::DeviceConfig,
    types::{ClimateSnapshot, EntityState, HvacMode, DEFAULT_TARGET_TEMP},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Online,
    Offline,
}

/// Body of a `zigbee2mqtt/<device>/set` display update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warm_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swing_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beep: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beep_on_change: Option<bool>,
    pub status: DisplayStatus,
}

impl DisplayPayload {
    fn new(status: DisplayStatus) -> Self {
        Self {
            temperature: None,
            current_temperature: None,
            idle_temperature: None,
            warm_level: None,
            fan_speed: None,
            swing_mode: None,
            humidity: None,
            beep: None,
            beep_on_change: None,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Temperature,
    #[default]
    FanSpeed,
    TemperatureFan,
}

/// What the display last showed, reused when the climate target goes away.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayMemory {
    pub mode: DisplayMode,
    pub target_temperature: Option<f32>,
    pub fan_speed: Option<u8>,
    pub humidity: Option<f32>,
    pub last_mode: Option<HvacMode>,
}

/// Builds the payload for an available climate target and updates `memory`.
pub fn build_payload(
    snapshot: &ClimateSnapshot,
    device: &DeviceConfig,
    humidity: Option<f32>,
    memory: &mut DisplayMemory,
) -> DisplayPayload {
    let mut payload = DisplayPayload::new(DisplayStatus::Online);

    match snapshot.mode {
        HvacMode::Heat => {
            let target = snapshot
                .target_temperature
                .map(|value| value.min(snapshot.max_temp).max(snapshot.min_temp))
                .unwrap_or(device.heating_temperature);
            payload.temperature = Some(target);
            payload.current_temperature = snapshot.current_temperature;
            payload.warm_level = Some(device.heating_warm_level);
            memory.mode = DisplayMode::Temperature;
            memory.target_temperature = Some(target);
        }
        HvacMode::Off => {
            payload.fan_speed = Some(device.idle_fan_speed);
            payload.idle_temperature = Some(device.idle_temperature);
            payload.warm_level = Some(device.idle_warm_level);
            payload.swing_mode = Some(device.swing_mode.clone());
            memory.mode = DisplayMode::FanSpeed;
            memory.fan_speed = Some(device.idle_fan_speed);
        }
        HvacMode::FanOnly => {
            let speed = fan_speed(snapshot.fan_mode.as_deref().unwrap_or("1"));
            payload.fan_speed = Some(speed);
            payload.swing_mode = Some(
                snapshot
                    .swing_mode
                    .clone()
                    .unwrap_or_else(|| device.swing_mode.clone()),
            );
            memory.mode = DisplayMode::FanSpeed;
            memory.fan_speed = Some(speed);
        }
        HvacMode::Cool => {
            let target = snapshot.target_temperature.unwrap_or(DEFAULT_TARGET_TEMP);
            let speed = snapshot
                .fan_mode
                .as_deref()
                .and_then(|mode| mode.parse::<u8>().ok())
                .unwrap_or(3)
                .clamp(1, 9);
            payload.temperature = Some(target);
            payload.fan_speed = Some(speed);
            memory.mode = DisplayMode::TemperatureFan;
            memory.target_temperature = Some(target);
            memory.fan_speed = Some(speed);
        }
        _ => match snapshot.target_temperature {
            Some(target) => {
                payload.temperature = Some(target);
                memory.mode = DisplayMode::Temperature;
                memory.target_temperature = Some(target);
            }
            None => {
                payload.fan_speed = Some(device.idle_fan_speed);
                memory.mode = DisplayMode::FanSpeed;
                memory.fan_speed = Some(device.idle_fan_speed);
            }
        },
    }

    if let Some(humidity) = humidity {
        let humidity = humidity.clamp(0.0, 100.0);
        payload.humidity = Some(humidity);
        memory.humidity = Some(humidity);
    }

    match device.beep_mode.display_flag() {
        Some(flag) => payload.beep = Some(flag),
        None => payload.beep_on_change = Some(true),
    }

    memory.last_mode = Some(snapshot.mode.clone());
    payload
}

/// Offline payload from the last known display state.
pub fn fallback_payload(memory: &DisplayMemory, device: &DeviceConfig) -> DisplayPayload {
    let mut payload = DisplayPayload::new(DisplayStatus::Offline);
    if memory.mode == DisplayMode::Temperature {
        payload.temperature = Some(
            memory
                .target_temperature
                .unwrap_or(device.heating_temperature),
        );
    } else {
        payload.fan_speed = Some(memory.fan_speed.unwrap_or(device.idle_fan_speed));
    }
    payload.humidity = memory.humidity;
    payload.beep = Some(false);
    payload
}

/// Maps a climate fan mode onto the display's 1..=9 scale.
pub fn fan_speed(fan_mode: &str) -> u8 {
    let speed = match fan_mode.parse::<u8>() {
        Ok(speed) => speed,
        Err(_) => match fan_mode.to_ascii_lowercase().as_str() {
            "low" | "quiet" => 1,
            "high" => 6,
            "turbo" => 9,
            _ => 3,
        },
    };
    speed.clamp(1, 9)
}

/// Primary sensor, then backup, then the W100's own cached reading.
pub fn select_humidity(
    primary: Option<&EntityState>,
    backup: Option<&EntityState>,
    cached: Option<f32>,
) -> Option<f32> {
    let from_sensor = |state: Option<&EntityState>| {
        state
            .filter(|state| state.is_available())
            .and_then(EntityState::numeric_state)
    };

    from_sensor(primary)
        .or_else(|| from_sensor(backup))
        .or(cached)
        .map(|value| value.clamp(0.0, 100.0))
}
