pub mod history;

pub use history::SessionHistoryTracker;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{ChargerEvent, ChargerState, StateTransition};
use crate::error::CoreError;

/// Transitions kept for the host platform to inspect.
const TRANSITION_LOG_CAPACITY: usize = 32;

/// Event-driven charger lifecycle tracker. One event is consumed at a
/// time; two transitions never interleave for the same charger because
/// the owner serializes access. The first observed upstream state seeds
/// the machine - there is no assumed default.
#[derive(Debug, Default)]
pub struct ChargerStateMachine {
    state: Option<ChargerState>,
    transitions: Vec<StateTransition>,
}

impl ChargerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<ChargerState> {
        self.state
    }

    pub fn last_transition(&self) -> Option<StateTransition> {
        self.transitions.last().copied()
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Consume one event. `Ok(Some(_))` reports a state change,
    /// `Ok(None)` means the event was absorbed without one, and
    /// `Err(InvalidCommand)` rejects the event with the state untouched.
    pub fn apply(
        &mut self,
        event: ChargerEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<StateTransition>, CoreError> {
        use ChargerState::*;

        let current = self.state;
        let next = match (&event, current) {
            // A successful read always wins; the first one seeds the
            // machine directly from the upstream snapshot.
            (ChargerEvent::Observed(observed), _) => Some(*observed),

            (ChargerEvent::ReadFailed, _) => Some(Unknown),

            (ChargerEvent::CarUnplugged, _) => Some(Disconnected),
            (ChargerEvent::CarPlugged, Some(Disconnected | Unknown) | None) => Some(Connected),
            // Redundant plug signal while already connected.
            (ChargerEvent::CarPlugged, Some(_)) => current,

            (ChargerEvent::WindowStarted, Some(Connected)) => Some(SmartControl),
            // Boost overrides the smart plan; a window start elsewhere is noise.
            (ChargerEvent::WindowStarted, _) => current,

            (ChargerEvent::BoostStarted, Some(Connected | SmartControl)) => Some(BoostCharging),
            (ChargerEvent::BoostStarted, Some(BoostCharging)) => current,
            (ChargerEvent::BoostStarted, state) => {
                return Err(CoreError::InvalidCommand(format!(
                    "cannot start boost while {}",
                    state_name(state)
                )));
            }

            (ChargerEvent::BoostEnded, Some(BoostCharging)) => Some(Connected),
            (ChargerEvent::BoostEnded, state) => {
                return Err(CoreError::InvalidCommand(format!(
                    "cannot stop boost while {}",
                    state_name(state)
                )));
            }

            (ChargerEvent::SessionCompleted, Some(SmartControl | BoostCharging)) => Some(Stopped),
            (ChargerEvent::SessionCompleted, state) => {
                warn!(state = %state_name(state), "session completion outside an active session");
                current
            }
        };

        match next {
            Some(next) if current != Some(next) => {
                let transition =
                    StateTransition { previous: current.unwrap_or(Unknown), next, at };
                debug!(
                    previous = %transition.previous,
                    next = %transition.next,
                    "charger state transition"
                );
                self.transitions.push(transition);
                if self.transitions.len() > TRANSITION_LOG_CAPACITY {
                    self.transitions.remove(0);
                }
                self.state = Some(next);
                Ok(Some(transition))
            }
            _ => Ok(None),
        }
    }
}

fn state_name(state: Option<ChargerState>) -> String {
    state.map_or_else(|| "unobserved".to_string(), |s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn machine_in(state: ChargerState) -> ChargerStateMachine {
        let mut m = ChargerStateMachine::new();
        m.apply(ChargerEvent::Observed(state), now()).unwrap();
        m
    }

    #[test]
    fn first_observation_seeds_the_state() {
        let mut m = ChargerStateMachine::new();
        assert_eq!(m.state(), None);
        let t = m.apply(ChargerEvent::Observed(ChargerState::Connected), now()).unwrap().unwrap();
        assert_eq!(t.previous, ChargerState::Unknown);
        assert_eq!(t.next, ChargerState::Connected);
        assert_eq!(m.state(), Some(ChargerState::Connected));
    }

    #[test]
    fn plug_and_unplug_lifecycle() {
        let mut m = machine_in(ChargerState::Disconnected);
        m.apply(ChargerEvent::CarPlugged, now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::Connected));
        m.apply(ChargerEvent::WindowStarted, now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::SmartControl));
        // Unplug supersedes everything.
        m.apply(ChargerEvent::CarUnplugged, now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::Disconnected));
    }

    #[test]
    fn boost_from_connected_and_back() {
        let mut m = machine_in(ChargerState::Connected);
        m.apply(ChargerEvent::BoostStarted, now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::BoostCharging));
        m.apply(ChargerEvent::BoostEnded, now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::Connected));
    }

    #[test]
    fn boost_while_disconnected_is_rejected_without_state_change() {
        let mut m = machine_in(ChargerState::Disconnected);
        let err = m.apply(ChargerEvent::BoostStarted, now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));
        assert_eq!(m.state(), Some(ChargerState::Disconnected));
    }

    #[test]
    fn stop_boost_while_not_boosting_is_rejected() {
        let mut m = machine_in(ChargerState::Connected);
        let err = m.apply(ChargerEvent::BoostEnded, now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));
        assert_eq!(m.state(), Some(ChargerState::Connected));
    }

    #[test]
    fn session_completion_stops_an_active_session() {
        let mut m = machine_in(ChargerState::SmartControl);
        let t = m.apply(ChargerEvent::SessionCompleted, now()).unwrap().unwrap();
        assert_eq!(t.next, ChargerState::Stopped);

        let mut m = machine_in(ChargerState::BoostCharging);
        m.apply(ChargerEvent::SessionCompleted, now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::Stopped));
    }

    #[test]
    fn session_completion_elsewhere_is_absorbed() {
        let mut m = machine_in(ChargerState::Connected);
        assert!(m.apply(ChargerEvent::SessionCompleted, now()).unwrap().is_none());
        assert_eq!(m.state(), Some(ChargerState::Connected));
    }

    #[test]
    fn read_failure_marks_unknown_until_a_successful_read() {
        let mut m = machine_in(ChargerState::SmartControl);
        m.apply(ChargerEvent::ReadFailed, now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::Unknown));
        m.apply(ChargerEvent::Observed(ChargerState::Connected), now()).unwrap();
        assert_eq!(m.state(), Some(ChargerState::Connected));
    }

    #[test]
    fn transitions_are_recorded_with_timestamps() {
        let mut m = machine_in(ChargerState::Disconnected);
        m.apply(ChargerEvent::CarPlugged, now()).unwrap();
        let last = m.last_transition().unwrap();
        assert_eq!(last.previous, ChargerState::Disconnected);
        assert_eq!(last.next, ChargerState::Connected);
        assert_eq!(last.at, now());
        assert_eq!(m.transitions().len(), 2);
    }

    #[test]
    fn transition_log_is_bounded() {
        let mut m = machine_in(ChargerState::Disconnected);
        for _ in 0..40 {
            m.apply(ChargerEvent::CarPlugged, now()).unwrap();
            m.apply(ChargerEvent::CarUnplugged, now()).unwrap();
        }
        assert!(m.transitions().len() <= TRANSITION_LOG_CAPACITY);
    }
}
