//! Charger state model
//!
//! `DeviceState` holds the last known value of every tracked field. The
//! connection state is the source of truth for all derived values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::transport::UpdateSource;

/// Charger connection / activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargerState {
    /// No vehicle connected
    Disconnected,
    /// Vehicle connected, not drawing power
    Connected,
    Charging,
    /// Charging with ventilation required
    VentilationRequired,
    Sleeping,
    Error,
}

impl ChargerState {
    pub const ALL: [ChargerState; 6] = [
        ChargerState::Disconnected,
        ChargerState::Connected,
        ChargerState::Charging,
        ChargerState::VentilationRequired,
        ChargerState::Sleeping,
        ChargerState::Error,
    ];

    /// Raw number the charger reports for this state
    pub fn code(self) -> i64 {
        match self {
            ChargerState::Disconnected => 1,
            ChargerState::Connected => 2,
            ChargerState::Charging => 3,
            ChargerState::VentilationRequired => 4,
            ChargerState::Sleeping => 5,
            ChargerState::Error => 6,
        }
    }

    pub fn is_charging(self) -> bool {
        matches!(self, ChargerState::Charging | ChargerState::VentilationRequired)
    }

    /// Vehicle plugged in (charging or not)
    pub fn is_plugged_in(self) -> bool {
        matches!(
            self,
            ChargerState::Connected | ChargerState::Charging | ChargerState::VentilationRequired
        )
    }

    pub fn is_fault(self) -> bool {
        self == ChargerState::Error
    }

    /// SoC assumed when the charger does not report one
    pub fn fallback_soc(self) -> u8 {
        if self == ChargerState::Disconnected {
            0
        } else {
            100
        }
    }
}

impl TryFrom<i64> for ChargerState {
    type Error = UpdateError;

    fn try_from(code: i64) -> Result<Self, UpdateError> {
        ChargerState::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(UpdateError::UnknownState(code))
    }
}

impl fmt::Display for ChargerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChargerState::Disconnected => "Disconnected",
            ChargerState::Connected => "Connected",
            ChargerState::Charging => "Charging",
            ChargerState::VentilationRequired => "Ventilation required",
            ChargerState::Sleeping => "Sleeping",
            ChargerState::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Authoritative last-known charger state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub connection_state: ChargerState,
    /// Instantaneous real power, never negative
    pub power_watts: f64,
    /// Instantaneous current, never negative
    pub current_amps: f64,
    /// Percentage in [0, 100]
    pub state_of_charge: u8,

    /// An explicit SoC has been received at least once
    pub soc_reported: bool,

    pub last_update_source: Option<UpdateSource>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl DeviceState {
    /// Startup state: disconnected, idle, with the given initial SoC
    pub fn new(initial_soc: u8) -> Self {
        Self {
            connection_state: ChargerState::Disconnected,
            power_watts: 0.0,
            current_amps: 0.0,
            state_of_charge: initial_soc.min(100),
            soc_reported: false,
            last_update_source: None,
            last_updated: None,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.connection_state.is_charging()
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(ChargerState::Disconnected.fallback_soc())
    }
}
