use serde::{Deserialize, Serialize};

use crate::thermostat::ThermostatRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub same_action_window_ms: u64,
    pub toggle_guard_ms: u64,
    pub stuck_check_interval_ms: u64,
    pub stuck_after_ms: u64,
    pub stuck_delta_c: f32,
    pub corrective_off_ms: u64,
    pub display_delay_ms: u64,
    pub display_retries: u8,
    pub display_retry_delay_ms: u64,
    pub startup_delay_ms: u64,
    pub refresh_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            same_action_window_ms: 2_000,
            toggle_guard_ms: 1_000,
            stuck_check_interval_ms: 300_000,
            stuck_after_ms: 900_000,
            stuck_delta_c: 0.5,
            corrective_off_ms: 30_000,
            display_delay_ms: 1_000,
            display_retries: 3,
            display_retry_delay_ms: 1_000,
            startup_delay_ms: 5_000,
            refresh_interval_ms: 30_000,
        }
    }
}

impl ControlConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if self.stuck_check_interval_ms == 0 {
            self.stuck_check_interval_ms = defaults.stuck_check_interval_ms;
        }
        if self.stuck_after_ms == 0 {
            self.stuck_after_ms = defaults.stuck_after_ms;
        }
        if !self.stuck_delta_c.is_finite() || self.stuck_delta_c <= 0.0 {
            self.stuck_delta_c = defaults.stuck_delta_c;
        }
        if self.refresh_interval_ms == 0 {
            self.refresh_interval_ms = defaults.refresh_interval_ms;
        }
        self.display_retries = self.display_retries.clamp(1, 10);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeepMode {
    #[serde(rename = "Enable Beep")]
    Enable,
    #[serde(rename = "Disable Beep")]
    Disable,
    #[serde(rename = "On-Mode Change")]
    OnModeChange,
}

impl BeepMode {
    pub fn display_flag(self) -> Option<bool> {
        match self {
            Self::Enable => Some(true),
            Self::Disable => Some(false),
            Self::OnModeChange => None,
        }
    }

    /// Whether a button press that produced a climate command should beep.
    pub fn beeps_on_command(self) -> bool {
        !matches!(self, Self::Disable)
    }
}

/// Where a binding's climate commands go. Chosen once at setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClimateTarget {
    Existing {
        entity_id: String,
        /// Switch driving the heater, used by the stuck-heater recovery.
        #[serde(default)]
        heater_switch: Option<String>,
    },
    Generic(ThermostatRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_name: String,
    pub target: ClimateTarget,
    #[serde(default = "default_heating_temperature")]
    pub heating_temperature: f32,
    #[serde(default = "default_idle_temperature")]
    pub idle_temperature: f32,
    #[serde(default = "default_heating_warm_level")]
    pub heating_warm_level: u8,
    #[serde(default = "default_idle_warm_level")]
    pub idle_warm_level: u8,
    #[serde(default = "default_idle_fan_speed")]
    pub idle_fan_speed: u8,
    #[serde(default = "default_swing_mode")]
    pub swing_mode: String,
    #[serde(default = "default_beep_mode")]
    pub beep_mode: BeepMode,
    #[serde(default)]
    pub humidity_sensor: Option<String>,
    #[serde(default)]
    pub backup_humidity_sensor: Option<String>,
    #[serde(default)]
    pub fan_buttons: bool,
}

fn default_heating_temperature() -> f32 {
    30.0
}

fn default_idle_temperature() -> f32 {
    22.0
}

fn default_heating_warm_level() -> u8 {
    4
}

fn default_idle_warm_level() -> u8 {
    1
}

fn default_idle_fan_speed() -> u8 {
    3
}

fn default_swing_mode() -> String {
    "horizontal".to_string()
}

fn default_beep_mode() -> BeepMode {
    BeepMode::OnModeChange
}

impl DeviceConfig {
    pub fn new(device_name: impl Into<String>, target: ClimateTarget) -> Self {
        Self {
            device_name: device_name.into(),
            target,
            heating_temperature: default_heating_temperature(),
            idle_temperature: default_idle_temperature(),
            heating_warm_level: default_heating_warm_level(),
            idle_warm_level: default_idle_warm_level(),
            idle_fan_speed: default_idle_fan_speed(),
            swing_mode: default_swing_mode(),
            beep_mode: default_beep_mode(),
            humidity_sensor: None,
            backup_humidity_sensor: None,
            fan_buttons: false,
        }
    }

    pub fn sanitize(&mut self) {
        self.device_name = self.device_name.trim().to_string();
        self.heating_warm_level = self.heating_warm_level.clamp(1, 4);
        self.idle_warm_level = self.idle_warm_level.clamp(1, 4);
        self.idle_fan_speed = self.idle_fan_speed.clamp(1, 9);
        if !matches!(
            self.swing_mode.as_str(),
            "horizontal" | "vertical" | "both" | "off"
        ) {
            self.swing_mode = default_swing_mode();
        }
        if !self.heating_temperature.is_finite() {
            self.heating_temperature = default_heating_temperature();
        }
        if !self.idle_temperature.is_finite() {
            self.idle_temperature = default_idle_temperature();
        }
    }

    pub fn heater_switch(&self) -> Option<&str> {
        match &self.target {
            ClimateTarget::Existing { heater_switch, .. } => heater_switch.as_deref(),
            ClimateTarget::Generic(request) => Some(request.heater_switch.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_client_id: String,
    pub host_prefix: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_client_id: "w100-bridge".to_string(),
            host_prefix: "homeassistant".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub control: ControlConfig,
    pub network: NetworkConfig,
    pub devices: Vec<DeviceConfig>,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.control.sanitize();
        for device in &mut self.devices {
            device.sanitize();
        }
        self.devices.retain(|device| !device.device_name.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_fills_defaults() {
        let raw = r#"{
            "device_name": "Living Room",
            "target": { "type": "existing", "entity_id": "climate.living_room" }
        }"#;
        let config: DeviceConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.heating_warm_level, 4);
        assert_eq!(config.idle_fan_speed, 3);
        assert_eq!(config.beep_mode, BeepMode::OnModeChange);
        assert_eq!(config.heater_switch(), None);
    }

    #[test]
    fn sanitize_clamps_display_levels() {
        let mut config = DeviceConfig::new(
            "  Office ",
            ClimateTarget::Existing {
                entity_id: "climate.office".to_string(),
                heater_switch: Some("switch.office_heater".to_string()),
            },
        );
        config.heating_warm_level = 9;
        config.idle_fan_speed = 0;
        config.swing_mode = "diagonal".to_string();

        config.sanitize();

        assert_eq!(config.device_name, "Office");
        assert_eq!(config.heating_warm_level, 4);
        assert_eq!(config.idle_fan_speed, 1);
        assert_eq!(config.swing_mode, "horizontal");
        assert_eq!(config.heater_switch(), Some("switch.office_heater"));
    }

    #[test]
    fn runtime_sanitize_drops_unnamed_devices() {
        let mut runtime = RuntimeConfig::default();
        runtime.control.stuck_after_ms = 0;
        runtime.devices.push(DeviceConfig::new(
            "   ",
            ClimateTarget::Existing {
                entity_id: "climate.x".to_string(),
                heater_switch: None,
            },
        ));

        runtime.sanitize();

        assert!(runtime.devices.is_empty());
        assert_eq!(runtime.control.stuck_after_ms, 900_000);
    }
}
