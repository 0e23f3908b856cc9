use std::collections::{HashMap, HashSet};

use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use w100_common::{
    device_set_topic, host_registry_topic, host_service_topic, route, EntityState, Route,
    Z2M_PREFIX,
};

use crate::{
    coordinator::Coordinator,
    error::{BridgeError, Result},
    ports::{
        DisplayTransport, EntityRegistry, RegistryEntry, ServiceCall, ServiceCaller, StateStore,
    },
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 16 * 1024;

/// Host adapter over MQTT: zigbee2mqtt for the W100, a topic bridge for the
/// home-automation host.
pub struct MqttHost {
    client: AsyncClient,
    prefix: String,
    states: RwLock<HashMap<String, EntityState>>,
    registry: RwLock<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
struct StateReport {
    state: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl MqttHost {
    pub fn new(client: AsyncClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            states: RwLock::new(HashMap::new()),
            registry: RwLock::new(HashSet::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub async fn subscribe(&self) -> anyhow::Result<()> {
        let topics = [
            format!("{Z2M_PREFIX}/+/action"),
            format!("{Z2M_PREFIX}/+"),
            format!("{}/states/#", self.prefix),
            format!("{}/registry/#", self.prefix),
        ];

        for topic in topics {
            self.client
                .subscribe(topic.as_str(), QoS::AtMostOnce)
                .await
                .with_context(|| format!("failed to subscribe to {topic}"))?;
        }
        Ok(())
    }

    /// Updates the state cache. An empty payload means the entity is gone.
    pub async fn apply_state(&self, entity_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        if payload.is_empty() {
            self.states.write().await.remove(entity_id);
            return Ok(());
        }

        let report: StateReport = serde_json::from_slice(payload)
            .with_context(|| format!("invalid state report for {entity_id}"))?;
        let state = EntityState {
            entity_id: entity_id.to_string(),
            state: report.state,
            attributes: report.attributes,
        };
        self.states
            .write()
            .await
            .insert(entity_id.to_string(), state);
        Ok(())
    }

    /// Retained registry entries seed id uniqueness; an empty payload is a removal.
    pub async fn apply_registry(&self, entity_id: &str, payload: &[u8]) {
        let mut registry = self.registry.write().await;
        if payload.is_empty() {
            registry.remove(entity_id);
        } else {
            registry.insert(entity_id.to_string());
        }
    }

    async fn publish_json(&self, topic: String, body: &Value, retain: bool) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        self.publish_raw(topic, payload, retain).await
    }

    async fn publish_raw(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|err| {
                BridgeError::Communication(format!("publish to {topic} failed: {err}"))
            })
    }
}

#[async_trait]
impl StateStore for MqttHost {
    async fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.states.read().await.get(entity_id).cloned()
    }
}

#[async_trait]
impl ServiceCaller for MqttHost {
    async fn call(&self, call: ServiceCall) -> Result<()> {
        let topic = host_service_topic(&self.prefix, &call.domain, &call.service);
        debug!(topic = %topic, data = %call.data, "calling host service");
        self.publish_json(topic, &call.data, false).await
    }
}

#[async_trait]
impl EntityRegistry for MqttHost {
    async fn contains(&self, entity_id: &str) -> bool {
        self.registry.read().await.contains(entity_id)
    }

    async fn register(&self, entry: RegistryEntry) -> Result<()> {
        let topic = host_registry_topic(&self.prefix, &entry.entity_id);
        let body = serde_json::to_value(&entry)?;
        self.publish_json(topic, &body, true)
            .await
            .map_err(|err| BridgeError::Registry(err.to_string()))?;
        self.registry.write().await.insert(entry.entity_id);
        Ok(())
    }

    async fn remove(&self, entity_id: &str) -> Result<()> {
        let topic = host_registry_topic(&self.prefix, entity_id);
        self.publish_raw(topic, Vec::new(), true)
            .await
            .map_err(|err| BridgeError::Registry(err.to_string()))?;
        self.registry.write().await.remove(entity_id);
        self.states.write().await.remove(entity_id);
        Ok(())
    }
}

#[async_trait]
impl DisplayTransport for MqttHost {
    async fn publish(&self, device_name: &str, payload: Value) -> Result<()> {
        self.publish_json(device_set_topic(device_name), &payload, false)
            .await
    }
}

/// Routes one incoming message to the state cache or the coordinator.
pub async fn handle_message(
    host: &MqttHost,
    coordinator: &Coordinator,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let Some(route) = route(host.prefix(), topic) else {
        return Ok(());
    };

    match route {
        Route::DeviceAction(device) => {
            let action = std::str::from_utf8(payload)
                .context("non utf8 action payload")?
                .to_string();
            // Commands publish through the client this loop drains; never await them here.
            let coordinator = coordinator.clone();
            let device = device.to_string();
            tokio::spawn(async move {
                let outcome = coordinator.handle_action(&device, &action).await;
                debug!(device = %device, ?outcome, "W100 action handled");
            });
        }
        Route::DeviceState(device) => {
            if payload.is_empty() {
                return Ok(());
            }
            let report: Value = serde_json::from_slice(payload)
                .with_context(|| format!("invalid W100 state on {topic}"))?;
            coordinator.record_device_state(device, &report).await;
        }
        Route::HostState(entity_id) => {
            host.apply_state(entity_id, payload).await?;
            coordinator.on_entity_changed(entity_id).await;
        }
        Route::HostRegistry(entity_id) => host.apply_registry(entity_id, payload).await,
    }
    Ok(())
}
