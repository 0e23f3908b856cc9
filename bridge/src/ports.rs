use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use w100_common::{
    thermostat::PLATFORM, ClimateAction, ClimateCommand, EntityState, GenericThermostatConfig,
    ThermostatRecord,
};

use crate::error::Result;

/// Read access to the host's entity states. `None` means unavailable.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, entity_id: &str) -> Option<EntityState>;
}

#[async_trait]
pub trait ServiceCaller: Send + Sync {
    async fn call(&self, call: ServiceCall) -> Result<()>;
}

#[async_trait]
pub trait EntityRegistry: Send + Sync {
    async fn contains(&self, entity_id: &str) -> bool;
    /// Inserts or replaces the entry for `entry.entity_id`.
    async fn register(&self, entry: RegistryEntry) -> Result<()>;
    async fn remove(&self, entity_id: &str) -> Result<()>;
}

#[async_trait]
pub trait DisplayTransport: Send + Sync {
    async fn publish(&self, device_name: &str, payload: Value) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Value,
}

impl ServiceCall {
    pub fn climate(command: &ClimateCommand) -> Self {
        let (service, data) = match &command.action {
            ClimateAction::SetMode(mode) => (
                "set_hvac_mode",
                json!({ "entity_id": command.entity_id, "hvac_mode": mode.as_str() }),
            ),
            ClimateAction::SetTemperature(value) => (
                "set_temperature",
                json!({ "entity_id": command.entity_id, "temperature": value }),
            ),
            ClimateAction::SetFanMode(fan_mode) => (
                "set_fan_mode",
                json!({ "entity_id": command.entity_id, "fan_mode": fan_mode }),
            ),
        };
        Self {
            domain: "climate".to_string(),
            service: service.to_string(),
            data,
        }
    }

    pub fn switch(entity_id: &str, on: bool) -> Self {
        Self {
            domain: "switch".to_string(),
            service: if on { "turn_on" } else { "turn_off" }.to_string(),
            data: json!({ "entity_id": entity_id }),
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entity_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub entity_id: String,
    pub unique_id: String,
    pub name: String,
    pub platform: String,
    pub config: GenericThermostatConfig,
}

impl RegistryEntry {
    pub fn for_record(record: &ThermostatRecord) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            unique_id: record.config.unique_id.clone(),
            name: record.config.name.clone(),
            platform: PLATFORM.to_string(),
            config: record.config.clone(),
        }
    }
}

/// The host collaborators a coordinator needs.
#[derive(Clone)]
pub struct Ports {
    pub states: Arc<dyn StateStore>,
    pub services: Arc<dyn ServiceCaller>,
    pub registry: Arc<dyn EntityRegistry>,
    pub display: Arc<dyn DisplayTransport>,
}

impl Ports {
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: StateStore + ServiceCaller + EntityRegistry + DisplayTransport + 'static,
    {
        Self {
            states: host.clone(),
            services: host.clone(),
            registry: host.clone(),
            display: host,
        }
    }
}
