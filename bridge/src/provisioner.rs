use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::{info, warn};
use w100_common::{
    thermostat::{base_object_id, candidate_entity_id, validate_entity},
    ConfigError, EntityRole, PrecisionAdjusted, ThermostatRecord, ThermostatRequest,
};

use crate::{
    error::{BridgeError, Result},
    ports::{EntityRegistry, RegistryEntry, StateStore},
};

const MAX_ID_ATTEMPTS: u32 = 1_000;

/// Creates and tears down the generic thermostats the bridge owns.
///
/// Ownership and configuration live in one map keyed by entity id, so an id
/// is owned exactly when its record exists.
pub struct Provisioner {
    states: Arc<dyn StateStore>,
    registry: Arc<dyn EntityRegistry>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, ThermostatRecord>,
    next_sequence: u64,
}

impl Provisioner {
    pub fn new(states: Arc<dyn StateStore>, registry: Arc<dyn EntityRegistry>) -> Self {
        Self {
            states,
            registry,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn create(&self, device_name: &str, request: &ThermostatRequest) -> Result<String> {
        let (entity_id, _) = self.provision(device_name, request).await?;
        Ok(entity_id)
    }

    /// Creates a thermostat and reports any precision adjustment it logged.
    async fn provision(
        &self,
        device_name: &str,
        request: &ThermostatRequest,
    ) -> Result<(String, Option<PrecisionAdjusted>)> {
        if device_name.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceName.into());
        }
        request.validate()?;
        self.validate_references(request).await?;

        let mut inner = self.inner.lock().await;
        let entity_id = self.allocate_id(&inner, device_name).await?;
        let sequence = inner.next_sequence;
        let (record, adjusted) =
            ThermostatRecord::build(&entity_id, device_name, sequence, request);
        log_precision(&entity_id, adjusted);

        self.registry
            .register(RegistryEntry::for_record(&record))
            .await?;
        inner.next_sequence = sequence + 1;
        inner.records.insert(entity_id.clone(), record);

        info!(device = device_name, entity_id = %entity_id, "created thermostat");
        Ok((entity_id, adjusted))
    }

    /// Returns `Ok(false)` when the id is not owned.
    pub async fn remove(&self, entity_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.records.contains_key(entity_id) {
            warn!(entity_id, "ignoring removal of thermostat not owned by this bridge");
            return Ok(false);
        }
        self.remove_locked(&mut inner, entity_id).await?;
        Ok(true)
    }

    /// Best-effort removal of every owned thermostat. Failed ids stay owned.
    pub async fn remove_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let owned: Vec<String> = inner.records.keys().cloned().collect();
        self.remove_each(&mut inner, owned).await
    }

    pub async fn remove_for_device(&self, device_name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let owned: Vec<String> = inner
            .records
            .values()
            .filter(|record| record.device_name == device_name)
            .map(|record| record.entity_id.clone())
            .collect();
        self.remove_each(&mut inner, owned).await
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.remove_all().await
    }

    pub async fn update(&self, entity_id: &str, request: &ThermostatRequest) -> Result<()> {
        request.validate()?;
        self.validate_references(request).await?;

        let mut inner = self.inner.lock().await;
        let Some(current) = inner.records.get(entity_id) else {
            return Err(BridgeError::NotOwned(entity_id.to_string()));
        };

        let mut updated = current.clone();
        let (critical, adjusted) = updated.apply(request);
        log_precision(entity_id, adjusted);

        let previous = RegistryEntry::for_record(current);
        let entry = RegistryEntry::for_record(&updated);
        let mut removed = false;
        if critical {
            info!(entity_id, "heater or sensor changed, re-registering thermostat");
            if self.registry.contains(entity_id).await {
                self.registry.remove(entity_id).await?;
                removed = true;
            }
        }

        if let Err(err) = self.registry.register(entry).await {
            if removed {
                if let Err(restore_err) = self.registry.register(previous).await {
                    // The host no longer has the entity, so neither do we.
                    warn!(entity_id, "could not restore thermostat registration: {restore_err}");
                    inner.records.remove(entity_id);
                }
            }
            return Err(err);
        }
        inner.records.insert(entity_id.to_string(), updated);
        Ok(())
    }

    /// Adopts persisted records whose entity still exists; returns the orphans dropped.
    pub async fn restore(&self, records: Vec<ThermostatRecord>) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let mut orphans = Vec::new();

        for record in records {
            if !self.registry.contains(&record.entity_id).await {
                warn!(
                    entity_id = %record.entity_id,
                    device = %record.device_name,
                    "discarding orphaned thermostat record"
                );
                orphans.push(record.entity_id);
                continue;
            }
            inner.next_sequence = inner.next_sequence.max(record.sequence + 1);
            inner.records.insert(record.entity_id.clone(), record);
        }

        orphans
    }

    pub async fn records(&self) -> Vec<ThermostatRecord> {
        let inner = self.inner.lock().await;
        let mut records: Vec<ThermostatRecord> = inner.records.values().cloned().collect();
        records.sort_by_key(|record| record.sequence);
        records
    }

    pub async fn get(&self, entity_id: &str) -> Option<ThermostatRecord> {
        self.inner.lock().await.records.get(entity_id).cloned()
    }

    pub async fn is_owned(&self, entity_id: &str) -> bool {
        self.inner.lock().await.records.contains_key(entity_id)
    }

    /// Owned ids for one device, oldest first.
    pub async fn owned_by(&self, device_name: &str) -> Vec<String> {
        self.records()
            .await
            .into_iter()
            .filter(|record| record.device_name == device_name)
            .map(|record| record.entity_id)
            .collect()
    }

    async fn validate_references(&self, request: &ThermostatRequest) -> Result<()> {
        let heater = self.states.get(&request.heater_switch).await;
        validate_entity(EntityRole::HeaterSwitch, &request.heater_switch, heater.as_ref())?;
        let sensor = self.states.get(&request.temperature_sensor).await;
        validate_entity(
            EntityRole::TemperatureSensor,
            &request.temperature_sensor,
            sensor.as_ref(),
        )?;
        Ok(())
    }

    async fn allocate_id(&self, inner: &Inner, device_name: &str) -> Result<String> {
        let base = base_object_id(device_name);
        for attempt in 0..MAX_ID_ATTEMPTS {
            let candidate = candidate_entity_id(&base, attempt);
            if inner.records.contains_key(&candidate) || self.registry.contains(&candidate).await {
                continue;
            }
            return Ok(candidate);
        }
        Err(BridgeError::Registry(format!(
            "no free entity id for climate.{base}"
        )))
    }

    async fn remove_locked(&self, inner: &mut Inner, entity_id: &str) -> Result<()> {
        if self.registry.contains(entity_id).await {
            self.registry.remove(entity_id).await?;
        }
        inner.records.remove(entity_id);
        info!(entity_id, "removed thermostat");
        Ok(())
    }

    async fn remove_each(&self, inner: &mut Inner, entity_ids: Vec<String>) -> Result<()> {
        let mut failed = Vec::new();
        for entity_id in entity_ids {
            if let Err(err) = self.remove_locked(inner, &entity_id).await {
                warn!(entity_id = %entity_id, "failed to remove thermostat: {err}");
                failed.push((entity_id, err.to_string()));
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Cleanup { failed })
        }
    }
}

fn log_precision(entity_id: &str, adjusted: Option<PrecisionAdjusted>) {
    if let Some(PrecisionAdjusted { requested }) = adjusted {
        info!(
            entity_id,
            requested, "precision adjusted to 0.5 to match the W100 display"
        );
    }
}
