//! Transports that obtain raw charger telemetry
//!
//! - `report`: partial update records shared by both transports
//! - `http`: periodic `GET /status` poller
//! - `mqtt`: subscriber for `<base>/{state,amp,watt}`
//!
//! Neither transport knows which capability profile is exposed; both only
//! push `SourcedReport`s into the accessory's update queue.

pub mod report;
pub mod http;
pub mod mqtt;

pub use report::{SourcedReport, StatusReport, UpdateSource};
pub use http::{parse_status_body, HttpPoller};
pub use mqtt::MqttSubscriber;
