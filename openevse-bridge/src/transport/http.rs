//! HTTP status poller
//!
//! Issues `GET /status` against the charger on a fixed period. Every tick
//! spawns its own request, so a slow response never delays the next poll and
//! overlapping requests are possible. Responses are merged in arrival order.

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::report::{SourcedReport, StatusReport, UpdateSource};
use crate::config::HttpConfig;
use crate::error::TransportError;

/// Polls the charger's status endpoint
#[derive(Debug, Clone)]
pub struct HttpPoller {
    config: HttpConfig,
    client: Client,
    url: String,
}

impl HttpPoller {
    /// Create a poller; the request timeout is enforced by the client
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let url = config.status_url();

        Ok(Self {
            config,
            client,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and parse one status response
    pub async fn fetch(&self) -> Result<StatusReport, TransportError> {
        let mut request = self.client.get(&self.url).header(ACCEPT, "application/json");

        if let Some((user, pass)) = self.config.credentials() {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(classify)?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let body = response.text().await.map_err(classify)?;
        parse_status_body(&body)
    }

    /// Poll until shutdown is signalled
    pub async fn run(self, tx: mpsc::Sender<SourcedReport>, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        info!("Polling {} every {:?}", self.url, self.config.poll_interval);

        // First tick fires immediately
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let poller = self.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        poller.poll_once(&tx).await;
                    });
                }
                _ = shutdown.changed() => {
                    info!("HTTP poller stopped");
                    break;
                }
            }
        }
    }

    /// One request; all errors end here
    async fn poll_once(&self, tx: &mpsc::Sender<SourcedReport>) {
        match self.fetch().await {
            Ok(report) if report.is_empty() => {
                debug!("Status response carried no recognized fields");
            }
            Ok(report) => {
                debug!("HTTP status: {:?}", report);
                if tx
                    .send(SourcedReport::new(UpdateSource::Http, report))
                    .await
                    .is_err()
                {
                    debug!("Update channel closed, dropping HTTP status");
                }
            }
            Err(TransportError::Timeout) => {
                warn!("Request timeout");
            }
            Err(e) => {
                error!("{}", e);
            }
        }
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(e)
    }
}

/// Parse a `/status` body into a partial report
///
/// Only fields present in the body end up in the report. `stat` is accepted
/// as an alias of `state`; `watt`/`watts` and `amp`/`amps` are interchangeable.
/// A malformed numeric field is dropped on its own, except `state`, which is
/// kept as `invalid_state` so the whole report gets rejected.
pub fn parse_status_body(body: &str) -> Result<StatusReport, TransportError> {
    let value: Value = serde_json::from_str(body)?;
    let obj = value.as_object().ok_or(TransportError::NotAnObject)?;

    // A state that is present but unreadable invalidates the whole report
    let (state, invalid_state) = match first_present(obj, &["state", "stat"]) {
        None => (None, None),
        Some((_, value)) => match integer_value(value) {
            Some(code) => (Some(code), None),
            None => (None, Some(value.to_string())),
        },
    };

    Ok(StatusReport {
        state,
        invalid_state,
        watts: number_field(obj, &["watt", "watts"]),
        amps: number_field(obj, &["amp", "amps"]),
        soc: integer_field(obj, &["soc"]),
    })
}

/// First non-null value among `keys`
fn first_present<'a>(
    obj: &'a Map<String, Value>,
    keys: &[&'static str],
) -> Option<(&'static str, &'a Value)> {
    keys.iter()
        .find_map(|key| obj.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
}

fn number_field(obj: &Map<String, Value>, keys: &[&'static str]) -> Option<f64> {
    let (key, value) = first_present(obj, keys)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    if parsed.is_none() {
        warn!("Ignoring non-numeric status field {}: {}", key, value);
    }
    parsed
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer_field(obj: &Map<String, Value>, keys: &[&'static str]) -> Option<i64> {
    let (key, value) = first_present(obj, keys)?;
    let parsed = integer_value(value);

    if parsed.is_none() {
        warn!("Ignoring non-integer status field {}: {}", key, value);
    }
    parsed
}
