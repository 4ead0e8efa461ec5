//! Presentation profiles
//!
//! A profile decides which host services the charger appears as and how
//! `DeviceState` maps onto their characteristics.
//!
//! | Profile | Services | Primary on | Power when idle |
//! |---------|----------|------------|-----------------|
//! | `Switch`  | switch, power, current | charging | forced to 0 |
//! | `Outlet`  | outlet, power | plugged in | forced to 0 |
//! | `Battery` | battery, power | n/a | reported value |

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::bridge::{
    Bridge, Characteristic, CharacteristicValue, ChargingState, ServiceDescriptor, ServiceKind,
    TelemetryChannel,
};
use crate::error::ConfigError;
use crate::state::DeviceState;

/// Service ids, stable across restarts
pub mod services {
    pub const SWITCH: &str = "switch";
    pub const OUTLET: &str = "outlet";
    pub const BATTERY: &str = "battery";
    pub const POWER: &str = "power";
    pub const CURRENT: &str = "current";
}

/// Smallest power reading shown while the sensor must stay non-zero
pub const POWER_FLOOR_WATTS: f64 = TelemetryChannel::Power.min_value();

/// How the charger is presented to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Switch,
    Battery,
    Outlet,
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "switch" => Ok(Profile::Switch),
            "battery" => Ok(Profile::Battery),
            "outlet" => Ok(Profile::Outlet),
            _ => Err(ConfigError::UnknownProfile(s.to_string())),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Profile::Switch => "switch",
            Profile::Battery => "battery",
            Profile::Outlet => "outlet",
        })
    }
}

/// Rules for exposing one telemetry channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryPolicy {
    /// Show 0 whenever the charger is not charging
    pub zero_when_idle: bool,
    /// Readings below this are raised to it
    pub floor: Option<f64>,
}

impl TelemetryPolicy {
    pub fn expose(&self, value: f64, charging: bool) -> f64 {
        if self.zero_when_idle && !charging {
            return 0.0;
        }
        match self.floor {
            Some(floor) if value < floor => floor,
            _ => value,
        }
    }
}

/// One characteristic value the profile wants on the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub service_id: &'static str,
    pub characteristic: Characteristic,
    pub value: CharacteristicValue,
}

impl Projection {
    fn new(
        service_id: &'static str,
        characteristic: Characteristic,
        value: CharacteristicValue,
    ) -> Self {
        Self {
            service_id,
            characteristic,
            value,
        }
    }
}

impl Profile {
    /// Services to register, primary first
    pub fn services(self, name: &str) -> Vec<ServiceDescriptor> {
        let power = ServiceDescriptor::new(
            services::POWER,
            ServiceKind::TelemetrySensor(TelemetryChannel::Power),
            format!("{} Power", name),
        );

        match self {
            Profile::Switch => vec![
                ServiceDescriptor::new(services::SWITCH, ServiceKind::Switch, name),
                power,
                ServiceDescriptor::new(
                    services::CURRENT,
                    ServiceKind::TelemetrySensor(TelemetryChannel::Current),
                    format!("{} Current", name),
                ),
            ],
            Profile::Outlet => vec![
                ServiceDescriptor::new(services::OUTLET, ServiceKind::Outlet, name),
                power,
            ],
            Profile::Battery => vec![
                ServiceDescriptor::new(services::BATTERY, ServiceKind::Battery, name),
                power,
            ],
        }
    }

    /// SoC before the charger has reported anything
    pub fn initial_soc(self) -> u8 {
        match self {
            Profile::Battery => 0,
            Profile::Switch | Profile::Outlet => 100,
        }
    }

    pub fn power_policy(self) -> TelemetryPolicy {
        match self {
            Profile::Switch => TelemetryPolicy {
                zero_when_idle: true,
                floor: None,
            },
            Profile::Outlet => TelemetryPolicy {
                zero_when_idle: true,
                floor: Some(POWER_FLOOR_WATTS),
            },
            Profile::Battery => TelemetryPolicy {
                zero_when_idle: false,
                floor: Some(POWER_FLOOR_WATTS),
            },
        }
    }

    /// Only the switch profile exposes current
    pub fn current_policy(self) -> Option<TelemetryPolicy> {
        match self {
            Profile::Switch => Some(TelemetryPolicy {
                zero_when_idle: true,
                floor: None,
            }),
            Profile::Outlet | Profile::Battery => None,
        }
    }

    /// Map device state onto every characteristic of the profile
    pub fn project(self, state: &DeviceState) -> Vec<Projection> {
        let charging = state.is_charging();
        let connection = state.connection_state;
        let power = Projection::new(
            services::POWER,
            Characteristic::Telemetry(TelemetryChannel::Power),
            CharacteristicValue::Float(self.power_policy().expose(state.power_watts, charging)),
        );

        let mut out = match self {
            Profile::Switch => vec![
                Projection::new(
                    services::SWITCH,
                    Characteristic::On,
                    CharacteristicValue::Bool(charging),
                ),
                power,
            ],
            Profile::Outlet => vec![
                Projection::new(
                    services::OUTLET,
                    Characteristic::On,
                    CharacteristicValue::Bool(connection.is_plugged_in()),
                ),
                Projection::new(
                    services::OUTLET,
                    Characteristic::OutletInUse,
                    CharacteristicValue::Bool(charging),
                ),
                Projection::new(
                    services::OUTLET,
                    Characteristic::StatusFault,
                    CharacteristicValue::Bool(connection.is_fault()),
                ),
                power,
            ],
            Profile::Battery => {
                let charging_state = if charging {
                    ChargingState::Charging
                } else {
                    ChargingState::NotCharging
                };
                vec![
                    Projection::new(
                        services::BATTERY,
                        Characteristic::BatteryLevel,
                        CharacteristicValue::Percent(state.state_of_charge),
                    ),
                    Projection::new(
                        services::BATTERY,
                        Characteristic::ChargingState,
                        CharacteristicValue::ChargingState(charging_state),
                    ),
                    Projection::new(
                        services::BATTERY,
                        Characteristic::StatusLowBattery,
                        CharacteristicValue::Bool(connection.is_fault()),
                    ),
                    power,
                ]
            }
        };

        if let Some(policy) = self.current_policy() {
            out.push(Projection::new(
                services::CURRENT,
                Characteristic::Telemetry(TelemetryChannel::Current),
                CharacteristicValue::Float(policy.expose(state.current_amps, charging)),
            ));
        }
        out
    }
}

/// Result of one projection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub pushed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pushes projections to the host, skipping unchanged edge-triggered values
///
/// A value is remembered only after the host accepted it, so a failed push
/// is retried on the next pass.
#[derive(Debug)]
pub struct Projector {
    profile: Profile,
    last_pushed: HashMap<(&'static str, Characteristic), CharacteristicValue>,
}

impl Projector {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            last_pushed: HashMap::new(),
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn push(&mut self, state: &DeviceState, bridge: &dyn Bridge) -> PushSummary {
        let mut summary = PushSummary::default();

        for p in self.profile.project(state) {
            let key = (p.service_id, p.characteristic);
            if p.characteristic.is_edge_triggered() && self.last_pushed.get(&key) == Some(&p.value)
            {
                summary.skipped += 1;
                continue;
            }

            match bridge.update_characteristic(p.service_id, p.characteristic, p.value) {
                Ok(()) => {
                    self.last_pushed.insert(key, p.value);
                    summary.pushed += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to push {}.{}: {}",
                        p.service_id,
                        p.characteristic.host_name(),
                        e
                    );
                    summary.failed += 1;
                }
            }
        }

        debug!("Projection pass: {:?}", summary);
        summary
    }
}
