use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{oneshot, Mutex, RwLock},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};
use w100_common::{
    display::{build_payload, fallback_payload, select_humidity},
    interpreter::interpret,
    BeepMode, ButtonAction, ClimateCommand, ClimateTarget, ConfigError,
    ControlConfig, Corrective, DebounceGate, DeviceConfig, DeviceReadings, DisplayMemory,
    EntityRole, EntityState, HvacMode, InterpretOptions, MonitorState, Outcome,
    StuckHeaterMonitor, ThermostatRecord, ThermostatRequest, TickOutcome, Verdict,
};

use crate::{
    display_sync::DisplaySync,
    error::{BridgeError, Result},
    ports::{Ports, ServiceCall, ServiceCaller},
    provisioner::Provisioner,
    store::AppStore,
};

/// Owns every device binding and drives them from button, state and timer events.
#[derive(Clone)]
pub struct Coordinator {
    ports: Ports,
    control: ControlConfig,
    provisioner: Arc<Provisioner>,
    display: Arc<DisplaySync>,
    store: Option<AppStore>,
    bindings: Arc<RwLock<HashMap<String, Arc<Mutex<Binding>>>>>,
    started: Instant,
}

struct Binding {
    config: DeviceConfig,
    climate_entity: String,
    gate: DebounceGate,
    monitor: StuckHeaterMonitor,
    readings: DeviceReadings,
    last_seen: Option<DateTime<Utc>>,
    last_action: Option<LastAction>,
    memory: DisplayMemory,
    last_display_sync: Option<DateTime<Utc>>,
    climate_available: Option<bool>,
    corrective: Option<CorrectiveTask>,
}

/// A running heater cycle. Stopping it cuts the off period short; the heater
/// is always switched back on.
struct CorrectiveTask {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl CorrectiveTask {
    async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.handle.await {
            warn!("heater recovery task failed: {err}");
        }
    }
}

impl Binding {
    fn new(config: DeviceConfig, climate_entity: String, control: &ControlConfig) -> Self {
        Self {
            config,
            climate_entity,
            gate: DebounceGate::new(control),
            monitor: StuckHeaterMonitor::new(control),
            readings: DeviceReadings::default(),
            last_seen: None,
            last_action: None,
            memory: DisplayMemory::default(),
            last_display_sync: None,
            climate_available: None,
            corrective: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Payload was not a W100 button action.
    Ignored,
    UnknownDevice,
    Debounced,
    Unavailable,
    NoCommand { reason: String },
    Issued { command: ClimateCommand },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LastAction {
    pub action: ButtonAction,
    pub at: DateTime<Utc>,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceDiagnostics {
    pub device_name: String,
    pub climate_entity: String,
    pub climate_available: bool,
    pub readings: DeviceReadings,
    pub last_seen: Option<DateTime<Utc>>,
    pub monitor_state: MonitorState,
    pub stuck_trips: u32,
    pub display: DisplayMemory,
    pub display_sync_pending: bool,
    pub last_display_sync: Option<DateTime<Utc>>,
    pub last_action: Option<LastAction>,
    pub thermostats: Vec<String>,
}

impl Coordinator {
    pub fn new(ports: Ports, control: ControlConfig, store: Option<AppStore>) -> Self {
        let provisioner = Provisioner::new(ports.states.clone(), ports.registry.clone());
        let display = DisplaySync::new(ports.display.clone(), &control);
        Self {
            ports,
            control,
            provisioner: Arc::new(provisioner),
            display: Arc::new(display),
            store,
            bindings: Arc::new(RwLock::new(HashMap::new())),
            started: Instant::now(),
        }
    }

    pub fn control(&self) -> &ControlConfig {
        &self.control
    }

    pub async fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Binds a device to its climate target, provisioning a thermostat when asked to.
    pub async fn add_device(&self, mut config: DeviceConfig) -> Result<String> {
        config.sanitize();
        let name = config.device_name.clone();
        if name.is_empty() {
            return Err(ConfigError::EmptyDeviceName.into());
        }
        if self.bindings.read().await.contains_key(&name) {
            return Err(BridgeError::DeviceExists(name));
        }

        let climate_entity = match &config.target {
            ClimateTarget::Existing { entity_id, .. } => {
                if entity_id.trim().is_empty() {
                    return Err(ConfigError::MissingEntity {
                        role: EntityRole::Climate,
                        entity_id: entity_id.clone(),
                    }
                    .into());
                }
                if self.ports.states.get(entity_id).await.is_none() {
                    warn!(
                        device = %name,
                        entity_id = %entity_id,
                        "climate entity not available yet"
                    );
                }
                entity_id.clone()
            }
            ClimateTarget::Generic(request) => {
                match self.provisioner.owned_by(&name).await.into_iter().next() {
                    Some(existing) => {
                        info!(device = %name, entity_id = %existing, "reusing restored thermostat");
                        existing
                    }
                    None => {
                        let entity_id = self.provisioner.create(&name, request).await?;
                        self.persist_thermostats().await;
                        entity_id
                    }
                }
            }
        };

        {
            let mut bindings = self.bindings.write().await;
            if bindings.contains_key(&name) {
                return Err(BridgeError::DeviceExists(name));
            }
            let binding = Binding::new(config, climate_entity.clone(), &self.control);
            bindings.insert(name.clone(), Arc::new(Mutex::new(binding)));
        }

        info!(device = %name, climate_entity = %climate_entity, "device bound");
        self.request_display_sync(&name);
        Ok(climate_entity)
    }

    /// Unbinds a device and removes the thermostats it owns.
    pub async fn remove_device(&self, device_name: &str) -> Result<()> {
        let Some(binding) = self.bindings.write().await.remove(device_name) else {
            return Err(BridgeError::UnknownDevice(device_name.to_string()));
        };
        self.display.cancel(device_name);
        let corrective = binding.lock().await.corrective.take();
        if let Some(task) = corrective {
            task.finish().await;
        }

        let result = self.provisioner.remove_for_device(device_name).await;
        self.persist_thermostats().await;
        info!(device = device_name, "device removed");
        result
    }

    /// Debounce, interpret and issue one raw W100 action payload.
    pub async fn handle_action(&self, device_name: &str, raw: &str) -> ActionOutcome {
        let Some(action) = ButtonAction::parse(raw) else {
            debug!(device = device_name, action = raw, "ignoring unsupported W100 action");
            return ActionOutcome::Ignored;
        };
        let Some(binding) = self.binding(device_name).await else {
            debug!(device = device_name, "action for unbound device");
            return ActionOutcome::UnknownDevice;
        };

        let now_ms = self.now_ms();
        let (decision, beep_mode) = {
            let mut state = binding.lock().await;
            let verdict = state.gate.check(action, now_ms);
            if verdict != Verdict::Admitted {
                debug!(
                    device = device_name,
                    action = action.as_str(),
                    ?verdict,
                    "press suppressed"
                );
                return ActionOutcome::Debounced;
            }

            let snapshot = self
                .ports
                .states
                .get(&state.climate_entity)
                .await
                .and_then(|climate| climate.climate_snapshot());
            let options = InterpretOptions {
                fan_buttons: state.config.fan_buttons,
            };

            let decision = match interpret(action, snapshot.as_ref(), options) {
                Outcome::Command(command) => Ok(command),
                Outcome::Unavailable => {
                    warn!(
                        device = device_name,
                        entity_id = %state.climate_entity,
                        "climate target unavailable, dropping {}",
                        action.as_str()
                    );
                    Err(ActionOutcome::Unavailable)
                }
                Outcome::Unsupported(mode) => {
                    warn!(
                        device = device_name,
                        entity_id = %state.climate_entity,
                        "climate target does not support {} mode",
                        mode.as_str()
                    );
                    Err(ActionOutcome::NoCommand {
                        reason: format!("{} mode not supported", mode.as_str()),
                    })
                }
                Outcome::NotApplicable(mode) => {
                    debug!(
                        device = device_name,
                        "{} has no effect in {} mode",
                        action.as_str(),
                        mode.as_str()
                    );
                    Err(ActionOutcome::NoCommand {
                        reason: format!(
                            "{} has no effect in {} mode",
                            action.as_str(),
                            mode.as_str()
                        ),
                    })
                }
            };
            (decision, state.config.beep_mode)
        };

        // The binding stays unlocked while the host is called.
        let outcome = match decision {
            Ok(command) => self.issue(device_name, beep_mode, command).await,
            Err(outcome) => outcome,
        };
        binding.lock().await.last_action = Some(LastAction {
            action,
            at: Utc::now(),
            outcome: outcome.clone(),
        });

        if matches!(outcome, ActionOutcome::Issued { .. }) {
            self.request_display_sync(device_name);
        }
        outcome
    }

    /// Merges a W100 state report. Returns whether any reading changed.
    pub async fn record_device_state(&self, device_name: &str, payload: &Value) -> bool {
        let Some(binding) = self.binding(device_name).await else {
            return false;
        };
        let update: DeviceReadings = match serde_json::from_value(payload.clone()) {
            Ok(update) => update,
            Err(err) => {
                debug!(device = device_name, "unreadable W100 state payload: {err}");
                return false;
            }
        };

        let mut state = binding.lock().await;
        state.last_seen = Some(Utc::now());
        state.readings.merge(&update)
    }

    /// Queues a display sync for every device bound to `entity_id`.
    pub async fn on_entity_changed(&self, entity_id: &str) {
        for (name, binding) in self.snapshot_bindings().await {
            if binding.lock().await.climate_entity == entity_id {
                self.request_display_sync(&name);
            }
        }
    }

    /// One stuck-heater evaluation across all bindings.
    pub async fn monitor_tick(&self) -> Vec<(String, TickOutcome)> {
        let mut results = Vec::new();

        for (name, binding) in self.snapshot_bindings().await {
            let now_ms = self.now_ms();
            let mut state = binding.lock().await;

            let climate = self.ports.states.get(&state.climate_entity).await;
            let temperature = climate
                .as_ref()
                .and_then(EntityState::climate_snapshot)
                .and_then(|snapshot| snapshot.current_temperature);
            let heater_on = self.heater_on(&state, climate.as_ref()).await;

            state.monitor.observe_heater(heater_on, temperature, now_ms);
            let outcome = state.monitor.tick(temperature, now_ms);

            match &outcome {
                TickOutcome::Skipped => {
                    warn!(device = %name, "temperature unavailable, skipping stuck-heater check");
                }
                TickOutcome::BaselineReset { moved_c } => {
                    debug!(device = %name, moved_c, "temperature moved, baseline reset");
                }
                TickOutcome::Tripped {
                    moved_c,
                    heater_on_ms,
                } => {
                    warn!(
                        device = %name,
                        moved_c,
                        heater_on_min = heater_on_ms / 60_000,
                        "stuck heater detected"
                    );
                    self.start_corrective(&name, &mut state);
                }
                TickOutcome::Idle | TickOutcome::Waiting => {}
            }

            results.push((name, outcome));
        }

        results
    }

    /// Tracks climate availability and refreshes displays when it changes.
    pub async fn refresh(&self) {
        for (name, binding) in self.snapshot_bindings().await {
            let changed = {
                let mut state = binding.lock().await;
                let available = self
                    .ports
                    .states
                    .get(&state.climate_entity)
                    .await
                    .is_some_and(|climate| climate.is_available());
                let previous = state.climate_available.replace(available);

                match (previous, available) {
                    (Some(true) | None, false) => {
                        warn!(
                            device = %name,
                            entity_id = %state.climate_entity,
                            "climate target unavailable"
                        );
                    }
                    (Some(false), true) => {
                        info!(
                            device = %name,
                            entity_id = %state.climate_entity,
                            "climate target available again"
                        );
                    }
                    _ => {}
                }
                previous.is_some_and(|previous| previous != available)
            };

            if changed {
                self.request_display_sync(&name);
            }
        }
    }

    /// Builds and publishes the display payload now. Returns whether it was delivered.
    pub async fn sync_display(&self, device_name: &str) -> bool {
        let Some(binding) = self.binding(device_name).await else {
            debug!(device = device_name, "display sync for unbound device");
            return false;
        };

        let payload = {
            let mut state = binding.lock().await;
            let snapshot = self
                .ports
                .states
                .get(&state.climate_entity)
                .await
                .and_then(|climate| climate.climate_snapshot());

            match snapshot {
                Some(snapshot) => {
                    let primary = self.optional_state(&state.config.humidity_sensor).await;
                    let backup = self
                        .optional_state(&state.config.backup_humidity_sensor)
                        .await;
                    let humidity =
                        select_humidity(primary.as_ref(), backup.as_ref(), state.readings.humidity);
                    let Binding { config, memory, .. } = &mut *state;
                    build_payload(&snapshot, config, humidity, memory)
                }
                None => {
                    debug!(
                        device = device_name,
                        entity_id = %state.climate_entity,
                        "climate target unavailable, sending fallback display"
                    );
                    fallback_payload(&state.memory, &state.config)
                }
            }
        };

        match self.display.publish(device_name, &payload).await {
            Ok(()) => {
                binding.lock().await.last_display_sync = Some(Utc::now());
                true
            }
            Err(_) => false,
        }
    }

    /// Schedules a coalesced display sync.
    pub fn request_display_sync(&self, device_name: &str) {
        let coordinator = self.clone();
        let name = device_name.to_string();
        self.display.schedule(device_name, async move {
            coordinator.sync_display(&name).await;
        });
    }

    pub async fn sync_all_displays(&self) {
        for name in self.device_names().await {
            self.sync_display(&name).await;
        }
    }

    pub async fn diagnostics(&self) -> Vec<DeviceDiagnostics> {
        let mut diagnostics = Vec::new();
        for (name, binding) in self.snapshot_bindings().await {
            let thermostats = self.provisioner.owned_by(&name).await;
            let state = binding.lock().await;
            let climate_available = self
                .ports
                .states
                .get(&state.climate_entity)
                .await
                .is_some_and(|climate| climate.is_available());

            diagnostics.push(DeviceDiagnostics {
                display_sync_pending: self.display.is_pending(&name),
                device_name: name,
                climate_entity: state.climate_entity.clone(),
                climate_available,
                readings: state.readings.clone(),
                last_seen: state.last_seen,
                monitor_state: state.monitor.state(),
                stuck_trips: state.monitor.trips(),
                display: state.memory.clone(),
                last_display_sync: state.last_display_sync,
                last_action: state.last_action.clone(),
                thermostats,
            });
        }
        diagnostics
    }

    pub async fn thermostats(&self) -> Vec<ThermostatRecord> {
        self.provisioner.records().await
    }

    pub async fn thermostat(&self, entity_id: &str) -> Option<ThermostatRecord> {
        self.provisioner.get(entity_id).await
    }

    pub async fn create_thermostat(
        &self,
        device_name: &str,
        request: &ThermostatRequest,
    ) -> Result<String> {
        if self.binding(device_name).await.is_none() {
            return Err(BridgeError::UnknownDevice(device_name.to_string()));
        }
        let entity_id = self.provisioner.create(device_name, request).await?;
        self.persist_thermostats().await;
        Ok(entity_id)
    }

    pub async fn update_thermostat(
        &self,
        entity_id: &str,
        request: &ThermostatRequest,
    ) -> Result<()> {
        self.provisioner.update(entity_id, request).await?;
        self.persist_thermostats().await;
        self.on_entity_changed(entity_id).await;
        Ok(())
    }

    pub async fn remove_thermostat(&self, entity_id: &str) -> Result<bool> {
        let removed = self.provisioner.remove(entity_id).await?;
        if removed {
            self.persist_thermostats().await;
        }
        Ok(removed)
    }

    pub async fn remove_all_thermostats(&self) -> Result<()> {
        let result = self.provisioner.remove_all().await;
        self.persist_thermostats().await;
        result
    }

    /// Adopts persisted thermostats; orphaned records are dropped and persisted away.
    pub async fn restore_thermostats(&self, records: Vec<ThermostatRecord>) -> Vec<String> {
        let orphans = self.provisioner.restore(records).await;
        if !orphans.is_empty() {
            info!(count = orphans.len(), "cleaned up orphaned thermostat records");
            self.persist_thermostats().await;
        }
        orphans
    }

    /// Teardown: cancels pending work, removes every owned thermostat and unbinds all devices.
    pub async fn cleanup(&self) {
        self.stop_tasks().await;
        if let Err(err) = self.provisioner.cleanup().await {
            warn!("thermostat cleanup incomplete: {err}");
        }
        self.persist_thermostats().await;
        self.bindings.write().await.clear();
        info!("coordinator cleanup completed");
    }

    /// Process exit: cancels pending work and keeps thermostats for the next start.
    pub async fn shutdown(&self) {
        self.stop_tasks().await;
        self.persist_thermostats().await;
    }

    async fn stop_tasks(&self) {
        self.display.cancel_all();
        for (_, binding) in self.snapshot_bindings().await {
            let corrective = binding.lock().await.corrective.take();
            if let Some(task) = corrective {
                task.finish().await;
            }
        }
    }

    async fn issue(
        &self,
        device_name: &str,
        beep_mode: BeepMode,
        command: ClimateCommand,
    ) -> ActionOutcome {
        match self.ports.services.call(ServiceCall::climate(&command)).await {
            Ok(()) => {
                info!(
                    device = device_name,
                    entity_id = %command.entity_id,
                    action = ?command.action,
                    "climate command issued"
                );
                if beep_mode.beeps_on_command() {
                    if let Err(err) = self.display.beep(device_name).await {
                        warn!(device = device_name, "beep failed: {err}");
                    }
                }
                ActionOutcome::Issued { command }
            }
            Err(err) => {
                error!(
                    device = device_name,
                    entity_id = %command.entity_id,
                    "climate command failed: {err}"
                );
                ActionOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    async fn heater_on(&self, binding: &Binding, climate: Option<&EntityState>) -> bool {
        if let Some(switch) = binding.config.heater_switch() {
            if let Some(state) = self.ports.states.get(switch).await {
                if state.is_available() {
                    return state.is_on();
                }
            }
        }
        climate.is_some_and(|climate| match climate.attr_str("hvac_action") {
            Some(action) => action == "heating",
            None => climate.state == HvacMode::Heat.as_str(),
        })
    }

    fn start_corrective(&self, device_name: &str, binding: &mut Binding) {
        if binding
            .corrective
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
        {
            info!(device = device_name, "heater recovery already running");
            return;
        }

        let corrective = Corrective::for_target(
            binding.config.heater_switch(),
            &binding.climate_entity,
            self.control.corrective_off_ms,
        );
        let services = self.ports.services.clone();
        let device = device_name.to_string();
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            run_corrective(&device, services.as_ref(), corrective, stop_rx).await;
        });
        binding.corrective = Some(CorrectiveTask { handle, stop });
    }

    async fn optional_state(&self, entity_id: &Option<String>) -> Option<EntityState> {
        match entity_id {
            Some(entity_id) => self.ports.states.get(entity_id).await,
            None => None,
        }
    }

    async fn binding(&self, device_name: &str) -> Option<Arc<Mutex<Binding>>> {
        self.bindings.read().await.get(device_name).cloned()
    }

    async fn snapshot_bindings(&self) -> Vec<(String, Arc<Mutex<Binding>>)> {
        let mut bindings: Vec<(String, Arc<Mutex<Binding>>)> = self
            .bindings
            .read()
            .await
            .iter()
            .map(|(name, binding)| (name.clone(), binding.clone()))
            .collect();
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        bindings
    }

    async fn persist_thermostats(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let records = self.provisioner.records().await;
        if let Err(err) = store.save_thermostats(&records).await {
            warn!("failed to persist thermostats: {err:#}");
        }
    }

    fn now_ms(&self) -> u64 {
        self.started
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

async fn run_corrective(
    device: &str,
    services: &dyn ServiceCaller,
    corrective: Corrective,
    stop: oneshot::Receiver<()>,
) {
    let (off, on, off_ms) = match &corrective {
        Corrective::CycleSwitch { entity_id, off_ms } => (
            ServiceCall::switch(entity_id, false),
            ServiceCall::switch(entity_id, true),
            *off_ms,
        ),
        Corrective::CycleMode { entity_id, off_ms } => (
            ServiceCall::climate(&ClimateCommand::set_mode(entity_id, HvacMode::Off)),
            ServiceCall::climate(&ClimateCommand::set_mode(entity_id, HvacMode::Heat)),
            *off_ms,
        ),
    };

    info!(device, ?corrective, "cycling heater to recover from stuck state");
    if let Err(err) = services.call(off).await {
        error!(device, "stuck-heater recovery could not switch off: {err}");
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(off_ms)) => {}
        _ = stop => {
            info!(device, "stuck-heater recovery stopped early, switching heater back on");
        }
    }
    if let Err(err) = services.call(on).await {
        error!(device, "stuck-heater recovery could not switch back on: {err}");
        return;
    }
    info!(device, "stuck-heater recovery completed");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{coordinator, heating_climate, FakeHost};

    const MINUTE: Duration = Duration::from_secs(60);

    fn existing(name: &str, entity_id: &str, heater_switch: Option<&str>) -> DeviceConfig {
        DeviceConfig::new(
            name,
            ClimateTarget::Existing {
                entity_id: entity_id.to_string(),
                heater_switch: heater_switch.map(str::to_string),
            },
        )
    }

    fn generic(name: &str) -> DeviceConfig {
        DeviceConfig::new(
            name,
            ClimateTarget::Generic(ThermostatRequest::new("switch.heater", "sensor.temperature")),
        )
    }

    async fn office(host: &Arc<FakeHost>) -> Coordinator {
        host.set_state(heating_climate("climate.office", 21.0, 19.0));
        let coordinator = coordinator(host);
        coordinator
            .add_device(existing("Office", "climate.office", None))
            .await
            .unwrap();
        coordinator
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_turns_heat_off_and_beeps() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;

        let outcome = coordinator.handle_action("Office", "double").await;

        assert_eq!(
            outcome,
            ActionOutcome::Issued {
                command: ClimateCommand::set_mode("climate.office", HvacMode::Off)
            }
        );
        assert_eq!(host.services(), vec!["climate.set_hvac_mode"]);
        assert_eq!(host.calls()[0].data["hvac_mode"], "off");
        assert_eq!(host.displays()[0].1, json!({ "beep": true }));
    }

    #[tokio::test(start_paused = true)]
    async fn double_toggle_is_debounced() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;

        coordinator.handle_action("Office", "toggle").await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let second = coordinator.handle_action("Office", "toggle").await;

        assert_eq!(second, ActionOutcome::Debounced);
        assert_eq!(host.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn plus_at_max_emits_clamped_target() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;
        host.set_state(heating_climate("climate.office", 30.0, 19.0));

        coordinator.handle_action("Office", "single_plus").await;

        assert_eq!(host.calls()[0].data["temperature"], json!(30.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_target_issues_nothing() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;
        host.set_state(EntityState::new("climate.office", "unavailable"));

        let outcome = coordinator.handle_action("Office", "plus").await;

        assert_eq!(outcome, ActionOutcome::Unavailable);
        assert!(host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn service_failure_is_reported_not_raised() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;
        *host.fail_calls.lock().unwrap() = true;

        let outcome = coordinator.handle_action("Office", "minus").await;

        assert!(matches!(outcome, ActionOutcome::Failed { .. }));
        let diagnostics = coordinator.diagnostics().await;
        assert_eq!(
            diagnostics[0].last_action.as_ref().map(|last| last.action),
            Some(ButtonAction::Minus)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_payloads_and_devices_are_ignored() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;

        assert_eq!(
            coordinator.handle_action("Office", "hold_center").await,
            ActionOutcome::Ignored
        );
        assert_eq!(
            coordinator.handle_action("Garage", "plus").await,
            ActionOutcome::UnknownDevice
        );
        assert!(host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn issued_command_triggers_one_coalesced_display_sync() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        let initial = host.displays().len();

        coordinator.handle_action("Office", "plus").await;
        coordinator.handle_action("Office", "minus").await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let displays = host.displays();
        let syncs: Vec<&Value> = displays[initial..]
            .iter()
            .map(|(_, payload)| payload)
            .filter(|payload| payload.get("status").is_some())
            .collect();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0]["status"], "online");
        assert_eq!(syncs[0]["temperature"], json!(21.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_target_gets_offline_display() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;
        host.clear_state("climate.office");

        assert!(coordinator.sync_display("Office").await);

        let (device, payload) = host.displays().pop().unwrap();
        assert_eq!(device, "Office");
        assert_eq!(payload["status"], "offline");
        assert_eq!(payload["beep"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_w100_humidity_feeds_display() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;

        let changed = coordinator
            .record_device_state(
                "Office",
                &json!({ "humidity": 47.5, "temperature": 20.1, "linkquality": 120 }),
            )
            .await;
        assert!(changed);
        coordinator.sync_display("Office").await;

        let (_, payload) = host.displays().pop().unwrap();
        assert_eq!(payload["humidity"], json!(47.5));
        let diagnostics = coordinator.diagnostics().await;
        assert_eq!(diagnostics[0].readings.linkquality, Some(120));
        assert!(diagnostics[0].last_seen.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_heater_cycles_switch_once_per_window() {
        let host = FakeHost::new();
        host.set_state(EntityState::new("switch.office_heater", "on"));
        host.set_state(heating_climate("climate.office", 22.0, 18.0));
        let coordinator = coordinator(&host);
        coordinator
            .add_device(existing("Office", "climate.office", Some("switch.office_heater")))
            .await
            .unwrap();

        let mut trips = Vec::new();
        for minute in (0..=20).step_by(5) {
            if minute > 0 {
                tokio::time::sleep(5 * MINUTE).await;
            }
            let outcomes = coordinator.monitor_tick().await;
            if matches!(outcomes[0].1, TickOutcome::Tripped { .. }) {
                trips.push(minute);
            }
        }
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(trips, vec![15]);
        assert_eq!(host.services(), vec!["switch.turn_off", "switch.turn_on"]);
        assert_eq!(
            host.calls()[0].entity_id(),
            Some("switch.office_heater")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_heater_without_switch_cycles_mode() {
        let host = FakeHost::new();
        host.set_state(
            heating_climate("climate.office", 22.0, 18.0).with_attr("hvac_action", "heating"),
        );
        let coordinator = coordinator(&host);
        coordinator
            .add_device(existing("Office", "climate.office", None))
            .await
            .unwrap();

        coordinator.monitor_tick().await;
        tokio::time::sleep(15 * MINUTE).await;
        coordinator.monitor_tick().await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        let modes: Vec<Value> = host
            .calls()
            .iter()
            .map(|call| call.data["hvac_mode"].clone())
            .collect();
        assert_eq!(modes, vec![json!("off"), json!("heat")]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_recovery_restores_heat() {
        let host = FakeHost::new();
        host.set_state(
            heating_climate("climate.office", 22.0, 18.0).with_attr("hvac_action", "heating"),
        );
        let coordinator = coordinator(&host);
        coordinator
            .add_device(existing("Office", "climate.office", None))
            .await
            .unwrap();

        coordinator.monitor_tick().await;
        tokio::time::sleep(15 * MINUTE).await;
        coordinator.monitor_tick().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        coordinator.shutdown().await;

        let modes: Vec<Value> = host
            .calls()
            .iter()
            .map(|call| call.data["hvac_mode"].clone())
            .collect();
        assert_eq!(modes, vec![json!("off"), json!("heat")]);

        tokio::time::sleep(MINUTE).await;
        assert_eq!(host.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_device_during_recovery_turns_switch_back_on() {
        let host = FakeHost::new();
        host.set_state(EntityState::new("switch.office_heater", "on"));
        host.set_state(heating_climate("climate.office", 22.0, 18.0));
        let coordinator = coordinator(&host);
        coordinator
            .add_device(existing("Office", "climate.office", Some("switch.office_heater")))
            .await
            .unwrap();

        coordinator.monitor_tick().await;
        tokio::time::sleep(15 * MINUTE).await;
        coordinator.monitor_tick().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        coordinator.remove_device("Office").await.unwrap();

        assert_eq!(host.services(), vec!["switch.turn_off", "switch.turn_on"]);
    }

    #[tokio::test(start_paused = true)]
    async fn binding_stays_unlocked_while_command_is_in_flight() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;
        let held = host.call_gate.write().await;

        let pressing = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.handle_action("Office", "plus").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.on_entity_changed("climate.office"),
        )
        .await
        .expect("state change blocked behind a pending command");
        tokio::time::timeout(Duration::from_secs(1), coordinator.diagnostics())
            .await
            .expect("diagnostics blocked behind a pending command");

        drop(held);
        let outcome = pressing.await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Issued { .. }));
        let diagnostics = coordinator.diagnostics().await;
        assert!(diagnostics[0].last_action.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_temperature_skips_monitor_tick() {
        let host = FakeHost::new();
        host.set_state(EntityState::new("switch.office_heater", "on"));
        host.set_state(EntityState::new("climate.office", "heat"));
        let coordinator = coordinator(&host);
        coordinator
            .add_device(existing("Office", "climate.office", Some("switch.office_heater")))
            .await
            .unwrap();

        tokio::time::sleep(20 * MINUTE).await;
        let outcomes = coordinator.monitor_tick().await;

        assert_eq!(outcomes[0].1, TickOutcome::Skipped);
        assert!(host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn generic_target_provisions_and_removal_cleans_up() {
        let host = FakeHost::new().with_heating_setup();
        let coordinator = coordinator(&host);

        let entity_id = coordinator.add_device(generic("Living Room")).await.unwrap();
        assert_eq!(entity_id, "climate.w100_living_room_thermostat");
        assert!(matches!(
            coordinator.add_device(generic("Living Room")).await,
            Err(BridgeError::DeviceExists(_))
        ));

        coordinator.remove_device("Living Room").await.unwrap();

        assert!(host.registered().is_empty());
        assert!(coordinator.thermostats().await.is_empty());
        assert!(coordinator.device_names().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn generic_target_with_missing_heater_is_rejected() {
        let host = FakeHost::new();
        host.set_state(EntityState::new("sensor.temperature", "19.0"));
        let coordinator = coordinator(&host);

        let err = coordinator.add_device(generic("Office")).await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::Config(ConfigError::MissingEntity {
                role: EntityRole::HeaterSwitch,
                ..
            })
        ));
        assert!(coordinator.device_names().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restored_thermostat_is_reused() {
        let host = FakeHost::new().with_heating_setup();
        let first = coordinator(&host);
        let entity_id = first.add_device(generic("Office")).await.unwrap();
        let records = first.thermostats().await;
        first.shutdown().await;

        let second = coordinator(&host);
        assert!(second.restore_thermostats(records).await.is_empty());
        let reused = second.add_device(generic("Office")).await.unwrap();

        assert_eq!(reused, entity_id);
        assert_eq!(host.registered(), vec![entity_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_every_owned_thermostat() {
        let host = FakeHost::new().with_heating_setup();
        let coordinator = coordinator(&host);
        coordinator.add_device(generic("Office")).await.unwrap();
        coordinator
            .create_thermostat(
                "Office",
                &ThermostatRequest::new("switch.heater", "sensor.temperature"),
            )
            .await
            .unwrap();
        assert_eq!(coordinator.thermostats().await.len(), 2);

        coordinator.cleanup().await;

        assert!(host.registered().is_empty());
        assert!(coordinator.thermostats().await.is_empty());
        assert!(coordinator.device_names().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_resyncs_display_when_target_drops() {
        let host = FakeHost::new();
        let coordinator = office(&host).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        coordinator.refresh().await;

        host.set_state(EntityState::new("climate.office", "unavailable"));
        coordinator.refresh().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (_, payload) = host.displays().pop().unwrap();
        assert_eq!(payload["status"], "offline");
    }
}
