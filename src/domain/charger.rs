use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Charger lifecycle state. `Stopped` is transient between a session
/// completion and the next upstream read; `Unknown` is entered on a read
/// failure and left only by a successful one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChargerState {
    Disconnected,
    Connected,
    SmartControl,
    BoostCharging,
    Stopped,
    Unknown,
}

impl ChargerState {
    /// Whether a car is plugged in for this state. `Stopped` keeps the
    /// car plugged; `Unknown` confirms nothing.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::SmartControl | Self::BoostCharging | Self::Stopped)
    }

    pub fn is_boosting(&self) -> bool {
        matches!(self, Self::BoostCharging)
    }

    /// Map the upstream device-state vocabulary onto the machine's states.
    pub fn from_upstream(raw: &str) -> Option<Self> {
        match raw {
            "SMART_CONTROL_NOT_AVAILABLE" => Some(Self::Disconnected),
            "SMART_CONTROL_CAPABLE" => Some(Self::Connected),
            "SMART_CONTROL_IN_PROGRESS" => Some(Self::SmartControl),
            "BOOSTING" => Some(Self::BoostCharging),
            _ => None,
        }
    }
}

/// Inputs consumed by the state machine, one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargerEvent {
    /// Car-plugged signal (upstream or explicit host command).
    CarPlugged,
    /// Car-unplugged signal; supersedes every other state.
    CarUnplugged,
    /// A planned charging window began while connected.
    WindowStarted,
    /// Start-boost command acknowledged upstream.
    BoostStarted,
    /// Stop-boost acknowledged, or upstream reported boost over.
    BoostEnded,
    /// Upstream reported the running session complete.
    SessionCompleted,
    /// Upstream read failed; connection status unconfirmed.
    ReadFailed,
    /// Successful upstream read reporting this state.
    Observed(ChargerState),
}

/// A recorded state change, exposed as data for the host platform to
/// render notifications from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub previous: ChargerState,
    pub next: ChargerState,
    pub at: DateTime<Utc>,
}

/// Kind tag on an upstream charging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    Smart,
    Boost,
    Public,
}

/// Upstream summary of a finished charging session. Energy and span are
/// taken verbatim; the cost is derived locally from the price schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub energy_added_kwh: f64,
    pub state_of_charge_final: Option<f64>,
    pub kind: SessionType,
}

/// Immutable record of a completed session, appended to the bounded
/// history when the machine reaches `Stopped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeSessionRecord {
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub energy_added_kwh: f64,
    pub cost_eur: f64,
    pub state_of_charge_final: Option<f64>,
    pub kind: SessionType,
}

/// Charging preferences mirrored from upstream and settable by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerPreferences {
    pub max_percentage: u8,
    pub target_time: NaiveTime,
    pub mode: String,
    pub unit: String,
}

impl Default for ChargerPreferences {
    fn default() -> Self {
        Self {
            max_percentage: 95,
            target_time: NaiveTime::from_hms_opt(10, 30, 0).expect("valid time"),
            mode: "CHARGE".to_string(),
            unit: "PERCENTAGE".to_string(),
        }
    }
}
