use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use w100_common::{ControlConfig, DisplayPayload};

use crate::{error::Result, ports::DisplayTransport};

/// Delayed, coalesced display updates with retrying publish.
pub struct DisplaySync {
    transport: Arc<dyn DisplayTransport>,
    delay: Duration,
    retries: u8,
    retry_delay: Duration,
    pending: Arc<Mutex<Pending>>,
}

#[derive(Default)]
struct Pending {
    next_id: u64,
    tasks: HashMap<String, (u64, JoinHandle<()>)>,
}

impl DisplaySync {
    pub fn new(transport: Arc<dyn DisplayTransport>, control: &ControlConfig) -> Self {
        Self {
            transport,
            delay: Duration::from_millis(control.display_delay_ms),
            retries: control.display_retries.max(1),
            retry_delay: Duration::from_millis(control.display_retry_delay_ms),
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    /// Runs `job` after the coalescing delay. A newer request for the same
    /// device replaces one that has not fired yet.
    pub fn schedule<F>(&self, device_name: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pending = self.pending.clone();
        let delay = self.delay;
        let device = device_name.to_string();

        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let id = guard.next_id;
        guard.next_id += 1;

        let handle = tokio::spawn({
            let device = device.clone();
            async move {
                tokio::time::sleep(delay).await;
                {
                    let mut guard = pending.lock().unwrap_or_else(PoisonError::into_inner);
                    match guard.tasks.get(&device) {
                        Some((current, _)) if *current == id => {
                            guard.tasks.remove(&device);
                        }
                        _ => return,
                    }
                }
                job.await;
            }
        });

        if let Some((_, previous)) = guard.tasks.insert(device.clone(), (id, handle)) {
            previous.abort();
            debug!(device = %device, "replaced pending display sync");
        }
    }

    pub fn cancel(&self, device_name: &str) {
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, handle)) = guard.tasks.remove(device_name) {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, (_, handle)) in guard.tasks.drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, device_name: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .contains_key(device_name)
    }

    /// Publishes with doubling retry delay. The last error is returned.
    pub async fn publish(&self, device_name: &str, payload: &DisplayPayload) -> Result<()> {
        let body = serde_json::to_value(payload)?;
        let mut delay = self.retry_delay;
        let mut attempt = 1;

        loop {
            match self.transport.publish(device_name, body.clone()).await {
                Ok(()) => {
                    debug!(device = device_name, attempt, "display updated");
                    return Ok(());
                }
                Err(err) if attempt < self.retries => {
                    warn!(
                        device = device_name,
                        "display update failed (attempt {attempt}/{}): {err}", self.retries
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        device = device_name,
                        "display update failed after {} attempts: {err}", self.retries
                    );
                    return Err(err);
                }
            }
        }
    }

    pub async fn beep(&self, device_name: &str) -> Result<()> {
        self.transport
            .publish(device_name, json!({ "beep": true }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use w100_common::{display::fallback_payload, ClimateTarget, DeviceConfig, DisplayMemory};

    use super::*;
    use crate::testing::FakeHost;

    fn sync(host: &Arc<FakeHost>) -> DisplaySync {
        DisplaySync::new(host.clone(), &ControlConfig::default())
    }

    fn payload() -> DisplayPayload {
        let device = DeviceConfig::new(
            "Office",
            ClimateTarget::Existing {
                entity_id: "climate.office".to_string(),
                heater_switch: None,
            },
        );
        fallback_payload(&DisplayMemory::default(), &device)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_runs_once() {
        let host = FakeHost::new();
        let sync = sync(&host);
        let runs = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let runs = runs.clone();
            sync.schedule("Office", async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(sync.is_pending("Office"));

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!sync.is_pending("Office"));
    }

    #[tokio::test(start_paused = true)]
    async fn devices_coalesce_independently() {
        let host = FakeHost::new();
        let sync = sync(&host);
        let runs = Arc::new(AtomicU32::new(0));

        for device in ["Office", "Kitchen"] {
            let runs = runs.clone();
            sync.schedule(device, async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_job() {
        let host = FakeHost::new();
        let sync = sync(&host);
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        sync.schedule("Office", async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sync.cancel("Office");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_retries_with_backoff() {
        let host = FakeHost::new();
        host.fail_next_displays(2);
        let sync = sync(&host);

        let started = tokio::time::Instant::now();
        sync.publish("Office", &payload()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(3_000));
        let displays = host.displays();
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].1["status"], "offline");
    }

    #[tokio::test(start_paused = true)]
    async fn publish_gives_up_after_retries() {
        let host = FakeHost::new();
        host.fail_next_displays(5);
        let sync = sync(&host);

        assert!(sync.publish("Office", &payload()).await.is_err());
        assert!(host.displays().is_empty());
        assert_eq!(*host.display_failures.lock().unwrap(), 2);
    }
}
