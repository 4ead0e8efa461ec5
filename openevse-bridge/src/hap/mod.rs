//! Home-automation host surface
//!
//! `bridge` defines what the host offers; `profile` decides what the charger
//! looks like there and pushes values through the bridge.

pub mod bridge;
pub mod profile;

pub use bridge::{
    Bridge, Characteristic, CharacteristicValue, ChargingState, MemoryBridge, ServiceDescriptor,
    ServiceKind, TelemetryChannel,
};
pub use profile::{Profile, Projection, Projector, PushSummary, TelemetryPolicy, POWER_FLOOR_WATTS};
