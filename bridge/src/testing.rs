use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;
use w100_common::{ControlConfig, EntityState};

use crate::{
    coordinator::Coordinator,
    error::{BridgeError, Result},
    ports::{
        DisplayTransport, EntityRegistry, Ports, RegistryEntry, ServiceCall, ServiceCaller,
        StateStore,
    },
};

/// In-memory host recording everything the bridge does to it.
#[derive(Default)]
pub struct FakeHost {
    pub states: Mutex<HashMap<String, EntityState>>,
    pub calls: Mutex<Vec<ServiceCall>>,
    pub registry: Mutex<HashMap<String, RegistryEntry>>,
    pub registry_log: Mutex<Vec<String>>,
    pub displays: Mutex<Vec<(String, Value)>>,
    pub fail_remove: Mutex<HashSet<String>>,
    pub fail_calls: Mutex<bool>,
    pub display_failures: Mutex<u32>,
    /// Write-locking this holds every service call until the guard drops.
    pub call_gate: tokio::sync::RwLock<()>,
    pub register_failures: Mutex<u32>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, state: EntityState) {
        self.states
            .lock()
            .unwrap()
            .insert(state.entity_id.clone(), state);
    }

    pub fn clear_state(&self, entity_id: &str) {
        self.states.lock().unwrap().remove(entity_id);
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn services(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| format!("{}.{}", call.domain, call.service))
            .collect()
    }

    pub fn displays(&self) -> Vec<(String, Value)> {
        self.displays.lock().unwrap().clone()
    }

    pub fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn fail_remove_of(&self, entity_id: &str) {
        self.fail_remove
            .lock()
            .unwrap()
            .insert(entity_id.to_string());
    }

    pub fn fail_next_registers(&self, count: u32) {
        *self.register_failures.lock().unwrap() = count;
    }

    pub fn fail_next_displays(&self, count: u32) {
        *self.display_failures.lock().unwrap() = count;
    }

    pub fn ports(self: &Arc<Self>) -> Ports {
        Ports::from_host(self.clone())
    }

    pub fn with_heating_setup(self: &Arc<Self>) -> Arc<Self> {
        self.set_state(EntityState::new("switch.heater", "off"));
        self.set_state(EntityState::new("sensor.temperature", "19.0"));
        self.clone()
    }
}

#[async_trait]
impl StateStore for FakeHost {
    async fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.states.lock().unwrap().get(entity_id).cloned()
    }
}

#[async_trait]
impl ServiceCaller for FakeHost {
    async fn call(&self, call: ServiceCall) -> Result<()> {
        let _open = self.call_gate.read().await;
        if *self.fail_calls.lock().unwrap() {
            return Err(BridgeError::Communication("host offline".to_string()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl EntityRegistry for FakeHost {
    async fn contains(&self, entity_id: &str) -> bool {
        self.registry.lock().unwrap().contains_key(entity_id)
    }

    async fn register(&self, entry: RegistryEntry) -> Result<()> {
        {
            let mut failures = self.register_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(BridgeError::Registry(format!("{} rejected", entry.entity_id)));
            }
        }
        self.registry_log
            .lock()
            .unwrap()
            .push(format!("register {}", entry.entity_id));
        self.registry
            .lock()
            .unwrap()
            .insert(entry.entity_id.clone(), entry);
        Ok(())
    }

    async fn remove(&self, entity_id: &str) -> Result<()> {
        if self.fail_remove.lock().unwrap().contains(entity_id) {
            return Err(BridgeError::Registry(format!("{entity_id} is locked")));
        }
        self.registry_log
            .lock()
            .unwrap()
            .push(format!("remove {entity_id}"));
        self.registry.lock().unwrap().remove(entity_id);
        Ok(())
    }
}

#[async_trait]
impl DisplayTransport for FakeHost {
    async fn publish(&self, device_name: &str, payload: Value) -> Result<()> {
        {
            let mut failures = self.display_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(BridgeError::Communication("broker unreachable".to_string()));
            }
        }
        self.displays
            .lock()
            .unwrap()
            .push((device_name.to_string(), payload));
        Ok(())
    }
}

pub fn heating_climate(entity_id: &str, target: f32, current: f32) -> EntityState {
    EntityState::new(entity_id, "heat")
        .with_attr("temperature", target)
        .with_attr("current_temperature", current)
        .with_attr("min_temp", 7.0)
        .with_attr("max_temp", 30.0)
        .with_attr("target_temp_step", 0.5)
        .with_attr("hvac_modes", serde_json::json!(["off", "heat"]))
}

pub fn coordinator(host: &Arc<FakeHost>) -> Coordinator {
    Coordinator::new(host.ports(), ControlConfig::default(), None)
}
