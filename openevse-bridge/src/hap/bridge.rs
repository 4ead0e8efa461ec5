//! Host bridge interface
//!
//! The accessory only talks to the host through the `Bridge` trait, which is
//! injected at construction. Calls are synchronous and must not block.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AccessoryInfo;
use crate::error::HostError;

/// Extra numeric telemetry carried on a host sensor characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryChannel {
    Power,
    Current,
}

impl TelemetryChannel {
    pub fn unit(self) -> &'static str {
        match self {
            TelemetryChannel::Power => "W",
            TelemetryChannel::Current => "A",
        }
    }

    /// Host characteristic the channel is carried on
    pub fn host_characteristic(self) -> &'static str {
        match self {
            TelemetryChannel::Power => "CurrentAmbientLightLevel",
            TelemetryChannel::Current => "CurrentTemperature",
        }
    }

    /// Smallest value the host sensor accepts as a reading
    pub const fn min_value(self) -> f64 {
        match self {
            TelemetryChannel::Power => 0.0001,
            TelemetryChannel::Current => 0.0,
        }
    }
}

/// Characteristics this accessory can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Characteristic {
    On,
    OutletInUse,
    StatusFault,
    BatteryLevel,
    ChargingState,
    StatusLowBattery,
    Telemetry(TelemetryChannel),
}

impl Characteristic {
    /// Pushed only when the value changes
    pub fn is_edge_triggered(self) -> bool {
        !matches!(
            self,
            Characteristic::BatteryLevel | Characteristic::Telemetry(_)
        )
    }

    pub fn host_name(self) -> &'static str {
        match self {
            Characteristic::On => "On",
            Characteristic::OutletInUse => "OutletInUse",
            Characteristic::StatusFault => "StatusFault",
            Characteristic::BatteryLevel => "BatteryLevel",
            Characteristic::ChargingState => "ChargingState",
            Characteristic::StatusLowBattery => "StatusLowBattery",
            Characteristic::Telemetry(channel) => channel.host_characteristic(),
        }
    }
}

/// Battery charging state as the host models it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    NotCharging,
    Charging,
}

/// Live value of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CharacteristicValue {
    Bool(bool),
    Percent(u8),
    ChargingState(ChargingState),
    Float(f64),
}

impl fmt::Display for CharacteristicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacteristicValue::Bool(b) => write!(f, "{}", b),
            CharacteristicValue::Percent(p) => write!(f, "{}%", p),
            CharacteristicValue::ChargingState(s) => write!(f, "{:?}", s),
            CharacteristicValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Kind of capability group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    Switch,
    Outlet,
    Battery,
    TelemetrySensor(TelemetryChannel),
}

impl ServiceKind {
    pub fn characteristics(self) -> Vec<Characteristic> {
        match self {
            ServiceKind::Switch => vec![Characteristic::On],
            ServiceKind::Outlet => vec![
                Characteristic::On,
                Characteristic::OutletInUse,
                Characteristic::StatusFault,
            ],
            ServiceKind::Battery => vec![
                Characteristic::BatteryLevel,
                Characteristic::ChargingState,
                Characteristic::StatusLowBattery,
            ],
            ServiceKind::TelemetrySensor(channel) => vec![Characteristic::Telemetry(channel)],
        }
    }
}

/// One capability group registered with the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Stable id, unique within the accessory
    pub id: String,
    pub kind: ServiceKind,
    pub display_name: String,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>, kind: ServiceKind, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            display_name: display_name.into(),
        }
    }

    pub fn exposes(&self, characteristic: Characteristic) -> bool {
        self.kind.characteristics().contains(&characteristic)
    }
}

/// Narrow interface into the host's accessory object model
pub trait Bridge: Send + Sync {
    /// Register a capability group
    fn register_service(&self, service: &ServiceDescriptor) -> Result<(), HostError>;

    /// Set static descriptive properties of a registered group
    fn set_information(&self, service_id: &str, info: &AccessoryInfo) -> Result<(), HostError>;

    /// Push a live value
    fn update_characteristic(
        &self,
        service_id: &str,
        characteristic: Characteristic,
        value: CharacteristicValue,
    ) -> Result<(), HostError>;

    /// Last pushed value, for synchronous host gets
    fn read_characteristic(
        &self,
        service_id: &str,
        characteristic: Characteristic,
    ) -> Option<CharacteristicValue>;
}

#[derive(Debug)]
struct RegisteredService {
    descriptor: ServiceDescriptor,
    info: Option<AccessoryInfo>,
    values: HashMap<Characteristic, CharacteristicValue>,
    writes: HashMap<Characteristic, usize>,
}

/// In-process bridge that keeps pushed values in memory
#[derive(Debug, Default)]
pub struct MemoryBridge {
    services: RwLock<Vec<RegisteredService>>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered groups in registration order
    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.services
            .read()
            .iter()
            .map(|s| s.descriptor.clone())
            .collect()
    }

    pub fn information(&self, service_id: &str) -> Option<AccessoryInfo> {
        self.services
            .read()
            .iter()
            .find(|s| s.descriptor.id == service_id)
            .and_then(|s| s.info.clone())
    }

    /// Number of pushes a characteristic has received
    pub fn writes(&self, service_id: &str, characteristic: Characteristic) -> usize {
        self.services
            .read()
            .iter()
            .find(|s| s.descriptor.id == service_id)
            .and_then(|s| s.writes.get(&characteristic).copied())
            .unwrap_or(0)
    }

    /// Every pushed value as `(service display name, characteristic, value)`
    pub fn snapshot(&self) -> Vec<(String, Characteristic, CharacteristicValue)> {
        let services = self.services.read();
        let mut out = Vec::new();
        for service in services.iter() {
            for characteristic in service.descriptor.kind.characteristics() {
                if let Some(value) = service.values.get(&characteristic) {
                    out.push((service.descriptor.display_name.clone(), characteristic, *value));
                }
            }
        }
        out
    }
}

impl Bridge for MemoryBridge {
    fn register_service(&self, service: &ServiceDescriptor) -> Result<(), HostError> {
        let mut services = self.services.write();
        if services.iter().any(|s| s.descriptor.id == service.id) {
            return Err(HostError::DuplicateService(service.id.clone()));
        }

        info!(
            "Registered {:?} service '{}' ({})",
            service.kind, service.display_name, service.id
        );
        services.push(RegisteredService {
            descriptor: service.clone(),
            info: None,
            values: HashMap::new(),
            writes: HashMap::new(),
        });
        Ok(())
    }

    fn set_information(&self, service_id: &str, info: &AccessoryInfo) -> Result<(), HostError> {
        let mut services = self.services.write();
        let service = services
            .iter_mut()
            .find(|s| s.descriptor.id == service_id)
            .ok_or_else(|| HostError::UnknownService(service_id.to_string()))?;

        service.info = Some(info.clone());
        Ok(())
    }

    fn update_characteristic(
        &self,
        service_id: &str,
        characteristic: Characteristic,
        value: CharacteristicValue,
    ) -> Result<(), HostError> {
        let mut services = self.services.write();
        let service = services
            .iter_mut()
            .find(|s| s.descriptor.id == service_id)
            .ok_or_else(|| HostError::UnknownService(service_id.to_string()))?;

        if !service.descriptor.exposes(characteristic) {
            return Err(HostError::UnknownCharacteristic {
                service: service_id.to_string(),
                characteristic,
            });
        }

        debug!(
            "{} {} = {}",
            service.descriptor.display_name,
            characteristic.host_name(),
            value
        );
        service.values.insert(characteristic, value);
        *service.writes.entry(characteristic).or_insert(0) += 1;
        Ok(())
    }

    fn read_characteristic(
        &self,
        service_id: &str,
        characteristic: Characteristic,
    ) -> Option<CharacteristicValue> {
        self.services
            .read()
            .iter()
            .find(|s| s.descriptor.id == service_id)
            .and_then(|s| s.values.get(&characteristic).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_update() {
        let bridge = MemoryBridge::new();
        let service = ServiceDescriptor::new("switch", ServiceKind::Switch, "Garage");
        bridge.register_service(&service).unwrap();
        bridge
            .set_information("switch", &AccessoryInfo::default())
            .unwrap();

        bridge
            .update_characteristic("switch", Characteristic::On, CharacteristicValue::Bool(true))
            .unwrap();

        assert_eq!(
            bridge.read_characteristic("switch", Characteristic::On),
            Some(CharacteristicValue::Bool(true))
        );
        assert_eq!(bridge.writes("switch", Characteristic::On), 1);
        assert_eq!(bridge.information("switch").unwrap().manufacturer, "OpenEVSE");
    }

    #[test]
    fn test_rejects_unknown_targets() {
        let bridge = MemoryBridge::new();
        let service = ServiceDescriptor::new("switch", ServiceKind::Switch, "Garage");
        bridge.register_service(&service).unwrap();

        assert_eq!(
            bridge.register_service(&service),
            Err(HostError::DuplicateService("switch".into()))
        );
        assert_eq!(
            bridge.update_characteristic(
                "battery",
                Characteristic::BatteryLevel,
                CharacteristicValue::Percent(50)
            ),
            Err(HostError::UnknownService("battery".into()))
        );
        assert!(matches!(
            bridge.update_characteristic(
                "switch",
                Characteristic::OutletInUse,
                CharacteristicValue::Bool(true)
            ),
            Err(HostError::UnknownCharacteristic { .. })
        ));
        assert!(bridge
            .read_characteristic("switch", Characteristic::On)
            .is_none());
    }

    #[test]
    fn test_telemetry_translation() {
        let power = Characteristic::Telemetry(TelemetryChannel::Power);
        let current = Characteristic::Telemetry(TelemetryChannel::Current);

        assert_eq!(power.host_name(), "CurrentAmbientLightLevel");
        assert_eq!(current.host_name(), "CurrentTemperature");
        assert_eq!(TelemetryChannel::Power.unit(), "W");
        assert!(!power.is_edge_triggered());
        assert!(Characteristic::On.is_edge_triggered());
        assert!(Characteristic::ChargingState.is_edge_triggered());
        assert!(!Characteristic::BatteryLevel.is_edge_triggered());
    }
}
