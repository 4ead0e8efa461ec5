//! # OpenEVSE Bridge
//!
//! Keeps a home-automation host in sync with an OpenEVSE charger.
//!
//! The charger is polled over HTTP (`GET /status`), watched over MQTT
//! (`<base>/state`, `<base>/amp`, `<base>/watt`), or both. Every report is
//! merged into a single device state and projected onto the host as a
//! switch, an outlet or a battery, plus power telemetry.
//!
//! ## Architecture
//!
//! ```text
//! OpenEVSE charger
//!   │ HTTP /status        │ MQTT topics
//!   ▼                     ▼
//! ┌────────────┐   ┌────────────────┐
//! │ HttpPoller │   │ MqttSubscriber │
//! └─────┬──────┘   └───────┬────────┘
//!       │ SourcedReport    │
//!       └───────┬──────────┘
//!               ▼ mpsc
//! ┌─────────────────────────────────┐
//! │    Accessory                    │
//! │  ┌────────────┐  ┌───────────┐  │
//! │  │ Normalizer │─►│ Projector │  │
//! │  │ + state    │  │ (profile) │  │
//! │  └────────────┘  └─────┬─────┘  │
//! └────────────────────────┼────────┘
//!                          │ dyn Bridge
//!                          ▼
//!                 Home-automation host
//! ```
//!
//! ## State Mapping
//!
//! | Code | State | Charging | Fallback SoC |
//! |------|-------|----------|--------------|
//! | 1 | Disconnected | No | 0 |
//! | 2 | Connected | No | 100 |
//! | 3 | Charging | Yes | 100 |
//! | 4 | Ventilation required | Yes | 100 |
//! | 5 | Sleeping | No | 100 |
//! | 6 | Error | No | 100 |
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use openevse_bridge::{Accessory, BridgeConfig, HttpConfig, MemoryBridge, Profile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::new("Garage Charger")
//!         .with_http(HttpConfig::new("192.168.1.50"))
//!         .with_profile(Profile::Outlet);
//!
//!     let bridge = Arc::new(MemoryBridge::new());
//!     let accessory = Accessory::new(config, bridge)?;
//!
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     accessory.run(shutdown_rx).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod accessory;
pub mod config;
pub mod error;
pub mod hap;
pub mod state;
pub mod transport;

pub use accessory::Accessory;
pub use config::{AccessoryInfo, BridgeConfig, HttpConfig, MqttConfig};
pub use error::{ConfigError, Error, HostError, Result, TransportError, UpdateError};

// Re-export key types
pub use hap::{Bridge, Characteristic, CharacteristicValue, MemoryBridge, Profile};
pub use state::{ChargerState, DeviceState};
pub use transport::{SourcedReport, StatusReport, UpdateSource};
