use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;
use w100_common::{RuntimeConfig, ThermostatRecord};

/// JSON files under `W100_DATA_DIR` (default `./.w100`).
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    thermostats_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("W100_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.w100"));
        Self::at(data_dir)
    }

    pub fn at(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            thermostats_path: Arc::new(data_dir.join("thermostats.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn load_thermostats(&self) -> anyhow::Result<Vec<ThermostatRecord>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.thermostats_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<Vec<ThermostatRecord>>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_thermostats(&self, records: &[ThermostatRecord]) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.thermostats_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("w100-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use w100_common::ThermostatRequest;

    use super::*;

    #[tokio::test]
    async fn missing_files_load_as_defaults() {
        let store = AppStore::at(scratch_dir("missing"));

        let runtime = store.load_runtime_config().await.unwrap();
        assert_eq!(runtime.network.http_port, 8080);
        assert!(runtime.devices.is_empty());
        assert!(store.load_thermostats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thermostats_round_trip_through_disk() {
        let dir = scratch_dir("round-trip");
        let store = AppStore::at(&dir);
        let request = ThermostatRequest::new("switch.heater", "sensor.temperature");
        let (record, _) =
            ThermostatRecord::build("climate.w100_office_thermostat", "Office", 0, &request);

        store.save_thermostats(&[record.clone()]).await.unwrap();

        assert_eq!(store.load_thermostats().await.unwrap(), vec![record]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn malformed_runtime_config_is_an_error() {
        let dir = scratch_dir("malformed");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("runtime.json"), b"{ not json").unwrap();

        assert!(AppStore::at(&dir).load_runtime_config().await.is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}
