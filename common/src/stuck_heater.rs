use serde::Serialize;

use crate::config::ControlConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    Idle,
    Tracking,
    Stuck,
}

/// Corrective step requested by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corrective {
    /// Turn the heater switch off, wait, turn it back on.
    CycleSwitch { entity_id: String, off_ms: u64 },
    /// Cycle the climate entity through `off` and back to `heat`.
    CycleMode { entity_id: String, off_ms: u64 },
}

impl Corrective {
    pub fn for_target(heater_switch: Option<&str>, climate_entity: &str, off_ms: u64) -> Self {
        match heater_switch {
            Some(switch) => Self::CycleSwitch {
                entity_id: switch.to_string(),
                off_ms,
            },
            None => Self::CycleMode {
                entity_id: climate_entity.to_string(),
                off_ms,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    /// Temperature reading absent; nothing evaluated.
    Skipped,
    Waiting,
    BaselineReset { moved_c: f32 },
    Tripped { moved_c: f32, heater_on_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tracker {
    heater_start_ms: u64,
    last_temp_check_ms: u64,
    last_temp_value: Option<f32>,
}

/// Watchdog for a heater that reports "on" without warming the room.
///
/// The trip clock runs from the continuous heater-on time. A temperature move
/// of at least `delta_c` only refreshes the baseline; a trip also needs the
/// baseline to have held for the full `stuck_after_ms`.
#[derive(Debug, Clone)]
pub struct StuckHeaterMonitor {
    stuck_after_ms: u64,
    delta_c: f32,
    heater_on: bool,
    state: MonitorState,
    tracker: Option<Tracker>,
    trips: u32,
}

impl StuckHeaterMonitor {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            stuck_after_ms: config.stuck_after_ms,
            delta_c: config.stuck_delta_c,
            heater_on: false,
            state: MonitorState::Idle,
            tracker: None,
            trips: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn trips(&self) -> u32 {
        self.trips
    }

    pub fn heater_start_ms(&self) -> Option<u64> {
        self.tracker.map(|tracker| tracker.heater_start_ms)
    }

    pub fn baseline(&self) -> Option<(u64, f32)> {
        let tracker = self.tracker?;
        Some((tracker.last_temp_check_ms, tracker.last_temp_value?))
    }

    /// Feeds the latest heater state. Edges drive Idle/Tracking transitions.
    pub fn observe_heater(&mut self, on: bool, temperature: Option<f32>, now_ms: u64) {
        match (self.heater_on, on) {
            (false, true) => {
                self.tracker = Some(Tracker {
                    heater_start_ms: now_ms,
                    last_temp_check_ms: now_ms,
                    last_temp_value: temperature,
                });
                self.state = MonitorState::Tracking;
            }
            (true, false) => {
                self.tracker = None;
                self.state = MonitorState::Idle;
            }
            _ => {}
        }
        self.heater_on = on;
    }

    /// Periodic evaluation. Call after `observe_heater` for the same instant.
    pub fn tick(&mut self, temperature: Option<f32>, now_ms: u64) -> TickOutcome {
        if !self.heater_on {
            return TickOutcome::Idle;
        }
        let Some(tracker) = self.tracker.as_mut() else {
            return TickOutcome::Idle;
        };
        // A trip re-arms the window, so the next tick is tracking again.
        if self.state == MonitorState::Stuck {
            self.state = MonitorState::Tracking;
        }
        let Some(current) = temperature.filter(|value| value.is_finite()) else {
            return TickOutcome::Skipped;
        };
        let Some(baseline) = tracker.last_temp_value else {
            // Heater came on while the sensor was absent; first reading becomes the baseline.
            tracker.last_temp_value = Some(current);
            tracker.last_temp_check_ms = now_ms;
            return TickOutcome::Waiting;
        };

        let moved_c = (current - baseline).abs();
        if moved_c >= self.delta_c {
            tracker.last_temp_value = Some(current);
            tracker.last_temp_check_ms = now_ms;
            self.state = MonitorState::Tracking;
            return TickOutcome::BaselineReset { moved_c };
        }

        let heater_on_ms = now_ms.saturating_sub(tracker.heater_start_ms);
        let baseline_age_ms = now_ms.saturating_sub(tracker.last_temp_check_ms);
        if heater_on_ms >= self.stuck_after_ms && baseline_age_ms >= self.stuck_after_ms {
            tracker.heater_start_ms = now_ms;
            tracker.last_temp_check_ms = now_ms;
            tracker.last_temp_value = Some(current);
            self.state = MonitorState::Stuck;
            self.trips = self.trips.saturating_add(1);
            return TickOutcome::Tripped {
                moved_c,
                heater_on_ms,
            };
        }

        TickOutcome::Waiting
    }
}
