pub mod config;
pub mod debounce;
pub mod display;
pub mod interpreter;
pub mod stuck_heater;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{
    BeepMode, ClimateTarget, ControlConfig, DeviceConfig, NetworkConfig, RuntimeConfig,
};
pub use debounce::{DebounceGate, Verdict};
pub use display::{DisplayMemory, DisplayPayload, DisplayStatus};
pub use interpreter::{InterpretOptions, Outcome};
pub use stuck_heater::{Corrective, MonitorState, StuckHeaterMonitor, TickOutcome};
pub use thermostat::{
    ConfigError, EntityRole, GenericThermostatConfig, PrecisionAdjusted, ThermostatRecord,
    ThermostatRequest,
};
pub use topics::*;
pub use types::{
    ButtonAction, ClimateAction, ClimateCommand, ClimateSnapshot, DeviceReadings, EntityState,
    HvacMode,
};
