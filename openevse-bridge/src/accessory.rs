//! Charger accessory
//!
//! Owns the device state and is its only writer. Transports run as separate
//! tasks and hand their reports over a channel; each report is merged and
//! projected in one synchronous step, so the host never observes a
//! half-applied update.
//!
//! ## Update Flow
//!
//! 1. HTTP poller or MQTT subscriber produces a `SourcedReport`
//! 2. The normalizer validates it and merges it into `DeviceState`
//! 3. If anything changed, the projector pushes the profile's values to the host
//! 4. Values the host refused are pushed again with the next accepted report

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{Result, UpdateError};
use crate::hap::{Bridge, Characteristic, CharacteristicValue, Profile, Projector, PushSummary};
use crate::state::{DeviceState, MergeOutcome, Normalizer};
use crate::transport::{HttpPoller, MqttSubscriber, SourcedReport};

/// Depth of the report channel between transports and the accessory
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// One OpenEVSE charger exposed to the host
pub struct Accessory {
    config: BridgeConfig,
    bridge: Arc<dyn Bridge>,
    normalizer: Normalizer,
    projector: Projector,
    state: DeviceState,
    /// The last projection pass had pushes the host refused
    push_pending: bool,
}

impl Accessory {
    /// Validate the config, register services with the host and push the
    /// initial projection
    pub fn new(config: BridgeConfig, bridge: Arc<dyn Bridge>) -> Result<Self> {
        config.validate()?;

        for service in config.profile.services(&config.name) {
            bridge.register_service(&service)?;
            bridge.set_information(&service.id, &config.info)?;
        }

        let mut accessory = Self {
            normalizer: Normalizer::new(config.sticky_soc),
            projector: Projector::new(config.profile),
            state: DeviceState::new(config.profile.initial_soc()),
            config,
            bridge,
            push_pending: false,
        };

        let summary = accessory.project();
        info!(
            "Accessory '{}' ready as {} ({} values pushed)",
            accessory.config.name, accessory.config.profile, summary.pushed
        );

        Ok(accessory)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn profile(&self) -> Profile {
        self.config.profile
    }

    /// Current device state snapshot
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Value the host sees for a characteristic
    pub fn read(&self, service_id: &str, characteristic: Characteristic) -> Option<CharacteristicValue> {
        self.bridge.read_characteristic(service_id, characteristic)
    }

    /// Merge one report and project the result
    ///
    /// A rejected report leaves the state untouched and pushes nothing. A
    /// projection pass runs when the state changed or when the host refused
    /// part of the previous pass.
    pub fn apply(&mut self, update: SourcedReport) -> std::result::Result<MergeOutcome, UpdateError> {
        let outcome = self
            .normalizer
            .merge(&mut self.state, update.source, &update.report)?;

        if let Some((from, to)) = outcome.transition {
            debug!("{}: {} -> {}", self.config.name, from, to);
            if from.is_charging() != to.is_charging() {
                let label = if to.is_charging() { "Charging" } else { "Idle" };
                info!("{} → {}", self.config.name, label);
            }
        }

        if outcome.changed || self.push_pending {
            self.project();
        }

        Ok(outcome)
    }

    fn project(&mut self) -> PushSummary {
        let summary = self.projector.push(&self.state, self.bridge.as_ref());
        self.push_pending = summary.failed > 0;
        summary
    }

    /// Apply a report from the update channel
    fn handle(&mut self, update: SourcedReport) {
        let source = update.source;
        match self.apply(update) {
            Ok(outcome) => debug!("Applied {} update: {:?}", source, outcome),
            Err(e) => warn!("Ignoring {} update: {}", source, e),
        }
    }

    /// Start the configured transports and apply their reports until
    /// shutdown is signalled; returns the final state
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<DeviceState> {
        let (tx, mut rx) = mpsc::channel::<SourcedReport>(UPDATE_CHANNEL_CAPACITY);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if let Some(http) = &self.config.http {
            let poller = HttpPoller::new(http.clone())?;
            tasks.push(tokio::spawn(poller.run(tx.clone(), shutdown.clone())));
        }

        if let Some(mqtt) = &self.config.mqtt {
            let subscriber = MqttSubscriber::new(mqtt.clone());
            tasks.push(tokio::spawn(subscriber.run(tx.clone(), shutdown.clone())));
        }

        drop(tx);
        info!("Accessory '{}' main loop started", self.config.name);

        loop {
            tokio::select! {
                Some(update) = rx.recv() => self.handle(update),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Shutting down accessory '{}'", self.config.name);
        drop(rx);
        for task in tasks {
            if let Err(e) = task.await {
                error!("Transport task failed: {}", e);
            }
        }

        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::config::HttpConfig;
    use crate::error::{Error, HostError};
    use crate::hap::{MemoryBridge, ServiceDescriptor, TelemetryChannel};
    use crate::state::ChargerState;
    use crate::transport::{StatusReport, UpdateSource};

    const POWER: Characteristic = Characteristic::Telemetry(TelemetryChannel::Power);

    fn config(profile: Profile) -> BridgeConfig {
        BridgeConfig::new("Garage")
            .with_http(HttpConfig::new("192.168.1.50"))
            .with_profile(profile)
    }

    fn http(report: StatusReport) -> SourcedReport {
        SourcedReport::new(UpdateSource::Http, report)
    }

    #[test]
    fn test_new_registers_and_pushes_initial_state() {
        let bridge = Arc::new(MemoryBridge::new());
        let accessory = Accessory::new(config(Profile::Battery), bridge.clone()).unwrap();

        let ids: Vec<String> = bridge.services().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["battery", "power"]);
        assert_eq!(bridge.information("battery").unwrap().model, "WiFi Charger");

        assert_eq!(accessory.state().state_of_charge, 0);
        assert_eq!(
            accessory.read("battery", Characteristic::BatteryLevel),
            Some(CharacteristicValue::Percent(0))
        );
    }

    #[test]
    fn test_new_rejects_config_without_transport() {
        let bridge = Arc::new(MemoryBridge::new());
        let result = Accessory::new(BridgeConfig::new("Garage"), bridge.clone());

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(bridge.services().is_empty());
    }

    #[test]
    fn test_apply_switch_charging() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut accessory = Accessory::new(config(Profile::Switch), bridge.clone()).unwrap();

        let outcome = accessory
            .apply(http(
                StatusReport::default()
                    .with_state(3)
                    .with_watts(1200.0)
                    .with_amps(5.2),
            ))
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(accessory.state().connection_state, ChargerState::Charging);
        assert_eq!(accessory.state().state_of_charge, 100);
        assert_eq!(
            accessory.read("switch", Characteristic::On),
            Some(CharacteristicValue::Bool(true))
        );
        assert_eq!(
            accessory.read("power", POWER),
            Some(CharacteristicValue::Float(1200.0))
        );
    }

    #[test]
    fn test_apply_rejected_report_changes_nothing() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut accessory = Accessory::new(config(Profile::Switch), bridge.clone()).unwrap();
        accessory
            .apply(http(StatusReport::default().with_state(3).with_watts(900.0)))
            .unwrap();
        let before = accessory.state().clone();
        let writes = bridge.writes("power", POWER);

        let result = accessory.apply(http(StatusReport::default().with_state(9).with_watts(5.0)));

        assert_eq!(result, Err(UpdateError::UnknownState(9)));
        assert_eq!(accessory.state(), &before);
        assert_eq!(bridge.writes("power", POWER), writes);
    }

    /// Accepts registration, refuses pushes while `refusing` is set
    struct FlakyHost {
        inner: MemoryBridge,
        refusing: AtomicBool,
    }

    impl FlakyHost {
        fn new(refusing: bool) -> Self {
            Self {
                inner: MemoryBridge::new(),
                refusing: AtomicBool::new(refusing),
            }
        }

        fn set_refusing(&self, refusing: bool) {
            self.refusing.store(refusing, Ordering::SeqCst);
        }
    }

    impl Bridge for FlakyHost {
        fn register_service(&self, service: &ServiceDescriptor) -> std::result::Result<(), HostError> {
            self.inner.register_service(service)
        }

        fn set_information(
            &self,
            service_id: &str,
            info: &crate::config::AccessoryInfo,
        ) -> std::result::Result<(), HostError> {
            self.inner.set_information(service_id, info)
        }

        fn update_characteristic(
            &self,
            service_id: &str,
            characteristic: Characteristic,
            value: CharacteristicValue,
        ) -> std::result::Result<(), HostError> {
            if self.refusing.load(Ordering::SeqCst) {
                return Err(HostError::Unavailable("host busy".into()));
            }
            self.inner.update_characteristic(service_id, characteristic, value)
        }

        fn read_characteristic(
            &self,
            service_id: &str,
            characteristic: Characteristic,
        ) -> Option<CharacteristicValue> {
            self.inner.read_characteristic(service_id, characteristic)
        }
    }

    #[test]
    fn test_push_failures_do_not_stop_updates() {
        let host = Arc::new(FlakyHost::new(true));
        let mut accessory = Accessory::new(config(Profile::Outlet), host).unwrap();

        accessory
            .apply(http(StatusReport::default().with_state(2)))
            .unwrap();
        accessory
            .apply(http(StatusReport::default().with_state(3).with_watts(700.0)))
            .unwrap();

        assert_eq!(accessory.state().connection_state, ChargerState::Charging);
        assert_eq!(accessory.state().power_watts, 700.0);
        assert!(accessory.read("outlet", Characteristic::On).is_none());
    }

    #[test]
    fn test_refused_push_retried_on_unchanged_report() {
        let host = Arc::new(FlakyHost::new(false));
        let mut accessory = Accessory::new(config(Profile::Switch), host.clone()).unwrap();
        assert_eq!(
            accessory.read("switch", Characteristic::On),
            Some(CharacteristicValue::Bool(false))
        );

        let charging = || http(StatusReport::default().with_state(3).with_watts(1000.0));

        host.set_refusing(true);
        let outcome = accessory.apply(charging()).unwrap();
        assert!(outcome.changed);
        assert_eq!(
            accessory.read("switch", Characteristic::On),
            Some(CharacteristicValue::Bool(false))
        );

        host.set_refusing(false);
        let outcome = accessory.apply(charging()).unwrap();
        assert!(!outcome.changed);
        assert_eq!(
            accessory.read("switch", Characteristic::On),
            Some(CharacteristicValue::Bool(true))
        );
        assert_eq!(
            accessory.read("power", POWER),
            Some(CharacteristicValue::Float(1000.0))
        );

        // Nothing left to retry
        let writes = host.inner.writes("switch", Characteristic::On);
        accessory.apply(charging()).unwrap();
        assert_eq!(host.inner.writes("switch", Characteristic::On), writes);
    }

    #[test]
    fn test_apply_non_integer_state_rejected() {
        let bridge = Arc::new(MemoryBridge::new());
        let mut accessory = Accessory::new(config(Profile::Switch), bridge.clone()).unwrap();
        let before = accessory.state().clone();

        let report = crate::transport::parse_status_body(r#"{"state":"charging","watt":500}"#).unwrap();
        let result = accessory.apply(http(report));

        assert_eq!(result, Err(UpdateError::InvalidState("\"charging\"".into())));
        assert_eq!(accessory.state(), &before);
        assert_eq!(bridge.writes("power", POWER), 1);
    }

    #[tokio::test]
    async fn test_run_polls_until_shutdown() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"state":3,"watt":1200,"amp":5.2}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let host_with_port = server.host_with_port();
        let (host, port) = host_with_port.rsplit_once(':').unwrap();
        let mut http = HttpConfig::new(host);
        http.port = port.parse().unwrap();

        let bridge = Arc::new(MemoryBridge::new());
        let accessory = Accessory::new(
            BridgeConfig::new("Garage").with_http(http),
            bridge.clone(),
        )
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(accessory.run(shutdown_rx));

        let charging = async {
            while bridge.read_characteristic("switch", Characteristic::On)
                != Some(CharacteristicValue::Bool(true))
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), charging)
            .await
            .unwrap();

        shutdown_tx.send(true).unwrap();
        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(state.connection_state, ChargerState::Charging);
        assert_eq!(state.power_watts, 1200.0);
        assert_eq!(state.current_amps, 5.2);
        assert_eq!(state.last_update_source, Some(UpdateSource::Http));
    }
}
