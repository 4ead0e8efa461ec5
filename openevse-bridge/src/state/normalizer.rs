//! Update normalizer
//!
//! Turns a raw `StatusReport` from either transport into a validated
//! `StateDelta` and merges it into `DeviceState` in one step. Fields merge
//! last-write-wins; there is no ordering between transports.
//!
//! | Report field | Rule |
//! |--------------|------|
//! | `state` | must be an integer mapping to a `ChargerState`, otherwise the whole report is dropped |
//! | `soc`   | clamped to 0..=100, overrides the SoC fallback of the same report |
//! | `watts` | negative clamped to 0, non-finite dropped |
//! | `amps`  | negative clamped to 0, non-finite dropped |

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::device::{ChargerState, DeviceState};
use crate::error::UpdateError;
use crate::transport::{StatusReport, UpdateSource};

/// Validated, transport-agnostic partial update
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDelta {
    pub connection_state: Option<ChargerState>,
    pub power_watts: Option<f64>,
    pub current_amps: Option<f64>,
    pub state_of_charge: Option<u8>,
}

/// What a merge did to the device state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// At least one stored field changed value
    pub changed: bool,
    /// Connection state transition `(from, to)`
    pub transition: Option<(ChargerState, ChargerState)>,
    /// The SoC was derived from the new connection state
    pub soc_fallback: bool,
}

/// Validates reports and merges them into `DeviceState`
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    sticky_soc: bool,
}

impl Normalizer {
    pub fn new(sticky_soc: bool) -> Self {
        Self { sticky_soc }
    }

    /// Validate a raw report
    pub fn normalize(&self, report: &StatusReport) -> Result<StateDelta, UpdateError> {
        if let Some(raw) = &report.invalid_state {
            return Err(UpdateError::InvalidState(raw.clone()));
        }
        let connection_state = report.state.map(ChargerState::try_from).transpose()?;

        Ok(StateDelta {
            connection_state,
            power_watts: report.watts.and_then(|w| non_negative("watt", w)),
            current_amps: report.amps.and_then(|a| non_negative("amp", a)),
            state_of_charge: report.soc.map(|soc| soc.clamp(0, 100) as u8),
        })
    }

    /// Merge a report into the device state
    ///
    /// A report with an unknown state leaves the device state untouched.
    pub fn merge(
        &self,
        state: &mut DeviceState,
        source: UpdateSource,
        report: &StatusReport,
    ) -> Result<MergeOutcome, UpdateError> {
        let delta = self.normalize(report)?;
        let mut outcome = MergeOutcome::default();

        if let Some(next) = delta.connection_state {
            let prev = state.connection_state;
            if next != prev {
                state.connection_state = next;
                outcome.transition = Some((prev, next));
                outcome.changed = true;

                let sticky = self.sticky_soc && state.soc_reported;
                if delta.state_of_charge.is_none() && !sticky {
                    state.state_of_charge = next.fallback_soc();
                    outcome.soc_fallback = true;
                }
            }
        }

        if let Some(soc) = delta.state_of_charge {
            state.soc_reported = true;
            outcome.changed |= replace(&mut state.state_of_charge, soc);
        }

        if let Some(watts) = delta.power_watts {
            outcome.changed |= replace(&mut state.power_watts, watts);
        }

        if let Some(amps) = delta.current_amps {
            outcome.changed |= replace(&mut state.current_amps, amps);
        }

        if outcome.changed {
            state.last_update_source = Some(source);
            state.last_updated = Some(Utc::now());
        }

        debug!("Merged {} update: {:?}", source, outcome);
        Ok(outcome)
    }
}

fn non_negative(field: &str, value: f64) -> Option<f64> {
    if !value.is_finite() {
        warn!("Dropping non-finite {} value", field);
        return None;
    }
    if value < 0.0 {
        debug!("Clamping negative {} value {} to 0", field, value);
        return Some(0.0);
    }
    Some(value)
}

/// Store `value`, returning whether it differed
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(normalizer: &Normalizer, state: &mut DeviceState, report: StatusReport) -> MergeOutcome {
        normalizer.merge(state, UpdateSource::Http, &report).unwrap()
    }

    #[test]
    fn test_state_sets_fallback_soc() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);

        let outcome = merge(&normalizer, &mut state, StatusReport::default().with_state(2));
        assert_eq!(state.connection_state, ChargerState::Connected);
        assert_eq!(state.state_of_charge, 100);
        assert!(outcome.soc_fallback);
        assert_eq!(
            outcome.transition,
            Some((ChargerState::Disconnected, ChargerState::Connected))
        );

        merge(&normalizer, &mut state, StatusReport::default().with_state(1));
        assert_eq!(state.state_of_charge, 0);
    }

    #[test]
    fn test_explicit_soc_beats_fallback() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);

        let outcome = merge(
            &normalizer,
            &mut state,
            StatusReport::default().with_state(2).with_soc(42),
        );
        assert_eq!(state.connection_state, ChargerState::Connected);
        assert_eq!(state.state_of_charge, 42);
        assert!(!outcome.soc_fallback);
        assert!(state.soc_reported);
    }

    #[test]
    fn test_fallback_only_on_transition() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);

        merge(&normalizer, &mut state, StatusReport::default().with_state(3).with_soc(55));
        let outcome = merge(&normalizer, &mut state, StatusReport::default().with_state(3));

        assert_eq!(state.state_of_charge, 55);
        assert!(!outcome.changed);
        assert!(outcome.transition.is_none());
    }

    #[test]
    fn test_sticky_soc() {
        let normalizer = Normalizer::new(true);
        let mut state = DeviceState::new(0);

        // No explicit SoC yet: fallback still applies
        merge(&normalizer, &mut state, StatusReport::default().with_state(2));
        assert_eq!(state.state_of_charge, 100);

        merge(&normalizer, &mut state, StatusReport::default().with_soc(42));
        merge(&normalizer, &mut state, StatusReport::default().with_state(1));
        assert_eq!(state.connection_state, ChargerState::Disconnected);
        assert_eq!(state.state_of_charge, 42);
    }

    #[test]
    fn test_unknown_state_leaves_everything() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);
        merge(
            &normalizer,
            &mut state,
            StatusReport::default().with_state(3).with_soc(60).with_watts(900.0),
        );
        let before = state.clone();

        let result = normalizer.merge(
            &mut state,
            UpdateSource::Mqtt,
            &StatusReport::default().with_state(7).with_watts(100.0),
        );

        assert_eq!(result, Err(UpdateError::UnknownState(7)));
        assert_eq!(state, before);
        assert!(state.is_charging());
    }

    #[test]
    fn test_non_integer_state_rejects_report() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);
        let before = state.clone();

        let result = normalizer.merge(
            &mut state,
            UpdateSource::Http,
            &StatusReport::default()
                .with_invalid_state("\"charging\"")
                .with_watts(500.0),
        );

        assert_eq!(
            result,
            Err(UpdateError::InvalidState("\"charging\"".into()))
        );
        assert_eq!(state, before);
        assert_eq!(state.power_watts, 0.0);
        assert!(state.last_update_source.is_none());
    }

    #[test]
    fn test_numeric_clamping() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);
        merge(&normalizer, &mut state, StatusReport::default().with_watts(500.0));

        merge(
            &normalizer,
            &mut state,
            StatusReport::default()
                .with_watts(f64::NAN)
                .with_amps(-3.0)
                .with_soc(250),
        );

        assert_eq!(state.power_watts, 500.0);
        assert_eq!(state.current_amps, 0.0);
        assert_eq!(state.state_of_charge, 100);
    }

    #[test]
    fn test_source_and_timestamp_only_on_change() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);

        let outcome = normalizer
            .merge(&mut state, UpdateSource::Mqtt, &StatusReport::default().with_watts(0.0))
            .unwrap();
        assert!(!outcome.changed);
        assert!(state.last_update_source.is_none());

        normalizer
            .merge(&mut state, UpdateSource::Mqtt, &StatusReport::default().with_amps(5.2))
            .unwrap();
        assert_eq!(state.last_update_source, Some(UpdateSource::Mqtt));
        assert!(state.last_updated.is_some());
    }

    #[test]
    fn test_last_write_wins_across_sources() {
        let normalizer = Normalizer::default();
        let mut state = DeviceState::new(0);

        normalizer
            .merge(&mut state, UpdateSource::Mqtt, &StatusReport::default().with_watts(800.0))
            .unwrap();
        // A delayed HTTP response still overwrites
        normalizer
            .merge(&mut state, UpdateSource::Http, &StatusReport::default().with_watts(650.0))
            .unwrap();

        assert_eq!(state.power_watts, 650.0);
        assert_eq!(state.last_update_source, Some(UpdateSource::Http));
    }
}
