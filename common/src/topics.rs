pub const Z2M_PREFIX: &str = "zigbee2mqtt";

pub fn device_state_topic(device: &str) -> String {
    format!("{Z2M_PREFIX}/{device}")
}

pub fn device_action_topic(device: &str) -> String {
    format!("{Z2M_PREFIX}/{device}/action")
}

pub fn device_set_topic(device: &str) -> String {
    format!("{Z2M_PREFIX}/{device}/set")
}

pub fn host_state_topic(prefix: &str, entity_id: &str) -> String {
    format!("{prefix}/states/{entity_id}")
}

pub fn host_service_topic(prefix: &str, domain: &str, service: &str) -> String {
    format!("{prefix}/services/{domain}/{service}")
}

pub fn host_registry_topic(prefix: &str, entity_id: &str) -> String {
    format!("{prefix}/registry/{entity_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    DeviceAction(&'a str),
    DeviceState(&'a str),
    HostState(&'a str),
    HostRegistry(&'a str),
}

/// Classifies an incoming topic. Device `set` echoes and unrelated topics yield `None`.
pub fn route<'a>(prefix: &str, topic: &'a str) -> Option<Route<'a>> {
    if let Some(rest) = strip(topic, Z2M_PREFIX) {
        if let Some(device) = rest.strip_suffix("/action") {
            return (!device.is_empty()).then_some(Route::DeviceAction(device));
        }
        if rest.ends_with("/set") || rest.contains('/') || rest.is_empty() {
            return None;
        }
        return Some(Route::DeviceState(rest));
    }

    let rest = strip(topic, prefix)?;
    if let Some(entity_id) = rest.strip_prefix("states/") {
        return (!entity_id.is_empty()).then_some(Route::HostState(entity_id));
    }
    if let Some(entity_id) = rest.strip_prefix("registry/") {
        return (!entity_id.is_empty()).then_some(Route::HostRegistry(entity_id));
    }
    None
}

fn strip<'a>(topic: &'a str, prefix: &str) -> Option<&'a str> {
    topic.strip_prefix(prefix)?.strip_prefix('/')
}
