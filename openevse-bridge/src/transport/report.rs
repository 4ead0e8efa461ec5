//! Partial status reports produced by the transports
//!
//! A report only carries the fields its transport actually observed. An absent
//! field means "not reported", which is different from a field reported as 0.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport that produced an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSource {
    Http,
    Mqtt,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSource::Http => f.write_str("http"),
            UpdateSource::Mqtt => f.write_str("mqtt"),
        }
    }
}

/// Raw partial update, values exactly as the charger reported them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Raw charger state number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<i64>,
    /// A state was reported but is not an integer; the report is unusable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soc: Option<i64>,
}

impl StatusReport {
    pub fn with_state(mut self, state: i64) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_invalid_state(mut self, raw: impl Into<String>) -> Self {
        self.invalid_state = Some(raw.into());
        self
    }

    pub fn with_watts(mut self, watts: f64) -> Self {
        self.watts = Some(watts);
        self
    }

    pub fn with_amps(mut self, amps: f64) -> Self {
        self.amps = Some(amps);
        self
    }

    pub fn with_soc(mut self, soc: i64) -> Self {
        self.soc = Some(soc);
        self
    }

    /// True when the report carries no field at all
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.invalid_state.is_none()
            && self.watts.is_none()
            && self.amps.is_none()
            && self.soc.is_none()
    }
}

/// A report tagged with the transport it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedReport {
    pub source: UpdateSource,
    pub report: StatusReport,
}

impl SourcedReport {
    pub fn new(source: UpdateSource, report: StatusReport) -> Self {
        Self { source, report }
    }
}
