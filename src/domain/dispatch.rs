use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

/// A raw planned-dispatch record as the upstream charger API reports it.
/// Timestamps stay strings here: one unparseable record must drop alone,
/// not poison the whole refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedDispatch {
    pub start: String,
    pub end: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A canonical half-open charging window, owned by the planner for one
/// refresh cycle and replaced wholesale on the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl ChargingWindow {
    /// Non-zero intersection with `[start, end)`.
    pub fn overlaps(&self, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> bool {
        self.start < end && start < self.end
    }

    pub fn contains(&self, at: DateTime<FixedOffset>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
