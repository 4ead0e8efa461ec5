//! Device state model
//!
//! - `device`: charger state enumeration and the authoritative `DeviceState`
//! - `normalizer`: validates transport reports and merges them into the state

pub mod device;
pub mod normalizer;

pub use device::{ChargerState, DeviceState};
pub use normalizer::{MergeOutcome, Normalizer, StateDelta};
