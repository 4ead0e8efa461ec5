//! MQTT status subscriber
//!
//! Subscribes to `<base>/state`, `<base>/amp` and `<base>/watt`. Each message
//! carries one scalar and becomes a single-field report. Handles:
//! - Reconnection with a fixed delay, retried forever
//! - Re-subscribing after every (re)connect
//! - Dropping malformed payloads without disturbing the subscription

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::report::{SourcedReport, StatusReport, UpdateSource};
use crate::config::MqttConfig;
use crate::error::TransportError;

/// Topic suffixes under the base topic
pub mod topics {
    pub const STATE: &str = "state";
    pub const AMP: &str = "amp";
    pub const WATT: &str = "watt";
}

/// Request queue depth between the client handle and the event loop
const REQUEST_CAPACITY: usize = 16;

/// Subscribes to the charger's MQTT status topics
#[derive(Debug, Clone)]
pub struct MqttSubscriber {
    config: MqttConfig,
    client_id: String,
}

impl MqttSubscriber {
    pub fn new(config: MqttConfig) -> Self {
        let client_id = format!("openevse-{}", Uuid::new_v4());
        Self { config, client_id }
    }

    /// Full names of the subscribed topics
    pub fn topics(&self) -> [String; 3] {
        [topics::STATE, topics::AMP, topics::WATT]
            .map(|t| format!("{}/{}", self.config.topic_base(), t))
    }

    /// Convert one message into a single-field report
    pub fn parse_message(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<StatusReport, TransportError> {
        let field = topic
            .strip_prefix(self.config.topic_base())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;

        let invalid = || TransportError::InvalidPayload {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        };
        let text = std::str::from_utf8(payload).map_err(|_| invalid())?.trim();

        let report = StatusReport::default();
        match field {
            topics::STATE => Ok(report.with_state(parse_integer(text).ok_or_else(invalid)?)),
            topics::AMP => Ok(report.with_amps(parse_float(text).ok_or_else(invalid)?)),
            topics::WATT => Ok(report.with_watts(parse_integer(text).ok_or_else(invalid)? as f64)),
            _ => Err(TransportError::UnknownTopic(topic.to_string())),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);

        if let Some((user, pass)) = self.config.credentials() {
            options.set_credentials(user, pass);
        }
        options
    }

    /// Subscribe, receive and reconnect until shutdown is signalled
    pub async fn run(self, tx: mpsc::Sender<SourcedReport>, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.config.host, self.config.port, self.client_id
        );

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected to {}:{}", self.config.host, self.config.port);
                        self.subscribe_all(&client).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.forward(&publish.topic, &publish.payload, &tx).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            "{}; reconnecting in {:?}",
                            TransportError::from(e),
                            self.config.reconnect_delay
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        close(&client, &mut eventloop).await;
        info!("MQTT subscriber stopped");
    }

    async fn subscribe_all(&self, client: &AsyncClient) {
        for topic in self.topics() {
            match client.subscribe(&topic, QoS::AtMostOnce).await {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => error!("Failed to subscribe to {}: {}", topic, TransportError::from(e)),
            }
        }
    }

    async fn forward(&self, topic: &str, payload: &[u8], tx: &mpsc::Sender<SourcedReport>) {
        match self.parse_message(topic, payload) {
            Ok(report) => {
                debug!("MQTT {}: {:?}", topic, report);
                if tx
                    .send(SourcedReport::new(UpdateSource::Mqtt, report))
                    .await
                    .is_err()
                {
                    debug!("Update channel closed, dropping MQTT message");
                }
            }
            Err(e @ TransportError::UnknownTopic(_)) => debug!("{}", e),
            Err(e) => warn!("{}", e),
        }
    }
}

/// Send DISCONNECT and drive the event loop until it is flushed
async fn close(client: &AsyncClient, eventloop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }

    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    if tokio::time::timeout(Duration::from_secs(1), flush).await.is_err() {
        debug!("MQTT disconnect not flushed before timeout");
    }
}

/// Integer payload; a decimal value is truncated toward zero
fn parse_integer(text: &str) -> Option<i64> {
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}

fn parse_float(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|f| f.is_finite())
}
