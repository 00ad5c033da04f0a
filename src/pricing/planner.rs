use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use chrono_tz::Tz;
use itertools::Itertools;
use tracing::warn;

use super::builder::resolve_local;
use crate::domain::{ChargingWindow, PlannedDispatch};
use crate::error::CoreError;

/// Normalizes the raw planned-dispatch records for one day into a sorted,
/// non-overlapping set of charging windows. Records separated by less
/// than `merge_gap` are fused, absorbing upstream re-planning
/// fragmentation; a full interval of idle time keeps windows apart.
/// Windows crossing midnight are clipped, contributing their portion to
/// each day.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPlanner {
    tz: Tz,
    merge_gap: Duration,
}

impl DispatchPlanner {
    pub fn new(tz: Tz, merge_gap_minutes: i64) -> Self {
        Self { tz, merge_gap: Duration::minutes(merge_gap_minutes) }
    }

    pub fn plan(&self, raw: &[PlannedDispatch], day: NaiveDate) -> Vec<ChargingWindow> {
        let day_start = self.day_boundary(day);
        let day_end = self.day_boundary(day + Duration::days(1));

        let parsed = raw.iter().filter_map(|record| match parse_record(record) {
            Ok(window) => Some(window),
            Err(e) => {
                warn!(error = %e, "dropping dispatch record");
                None
            }
        });

        parsed
            .sorted_by_key(|w| w.start)
            .coalesce(|a, b| {
                if b.start - a.end < self.merge_gap {
                    Ok(ChargingWindow { start: a.start, end: a.end.max(b.end) })
                } else {
                    Err((a, b))
                }
            })
            .filter(|w| w.overlaps(day_start, day_end))
            .map(|w| ChargingWindow { start: w.start.max(day_start), end: w.end.min(day_end) })
            .collect()
    }

    fn day_boundary(&self, day: NaiveDate) -> DateTime<FixedOffset> {
        resolve_local(self.tz, day.and_hms_opt(0, 0, 0).expect("midnight exists"))
    }
}

fn parse_record(record: &PlannedDispatch) -> Result<ChargingWindow, CoreError> {
    let start = DateTime::parse_from_rfc3339(&record.start)
        .map_err(|e| CoreError::MalformedDispatch(format!("start {:?}: {e}", record.start)))?;
    let end = DateTime::parse_from_rfc3339(&record.end)
        .map_err(|e| CoreError::MalformedDispatch(format!("end {:?}: {e}", record.end)))?;
    if end <= start {
        return Err(CoreError::MalformedDispatch(format!(
            "empty span {} .. {}",
            record.start, record.end
        )));
    }
    Ok(ChargingWindow { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Madrid;

    fn dispatch(start: &str, end: &str) -> PlannedDispatch {
        PlannedDispatch { start: start.to_string(), end: end.to_string(), kind: "SMART".to_string() }
    }

    fn planner() -> DispatchPlanner {
        DispatchPlanner::new(Madrid, 30)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn empty_input_yields_empty_plan() {
        assert!(planner().plan(&[], day()).is_empty());
    }

    #[test]
    fn small_gap_merges_large_gap_does_not() {
        let windows = planner().plan(
            &[
                dispatch("2025-01-15T10:00:00+01:00", "2025-01-15T10:30:00+01:00"),
                dispatch("2025-01-15T10:35:00+01:00", "2025-01-15T11:00:00+01:00"),
            ],
            day(),
        );
        assert_eq!(windows.len(), 1);
        assert_eq!((windows[0].end - windows[0].start).num_minutes(), 60);

        let windows = planner().plan(
            &[
                dispatch("2025-01-15T10:00:00+01:00", "2025-01-15T10:30:00+01:00"),
                dispatch("2025-01-15T11:00:00+01:00", "2025-01-15T11:30:00+01:00"),
            ],
            day(),
        );
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn unsorted_and_duplicated_input_is_normalized() {
        let windows = planner().plan(
            &[
                dispatch("2025-01-15T04:00:00+01:00", "2025-01-15T05:00:00+01:00"),
                dispatch("2025-01-15T02:00:00+01:00", "2025-01-15T03:00:00+01:00"),
                dispatch("2025-01-15T02:00:00+01:00", "2025-01-15T03:00:00+01:00"),
            ],
            day(),
        );
        assert_eq!(windows.len(), 2);
        assert!(windows[0].start < windows[1].start);
    }

    #[test]
    fn malformed_records_drop_alone() {
        let windows = planner().plan(
            &[
                dispatch("not-a-timestamp", "2025-01-15T03:00:00+01:00"),
                dispatch("2025-01-15T05:00:00+01:00", "2025-01-15T04:00:00+01:00"),
                dispatch("2025-01-15T02:00:00+01:00", "2025-01-15T03:00:00+01:00"),
            ],
            day(),
        );
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn midnight_crossing_window_is_clipped_not_dropped() {
        let raw = [dispatch("2025-01-15T23:00:00+01:00", "2025-01-16T01:00:00+01:00")];

        let today = planner().plan(&raw, day());
        assert_eq!(today.len(), 1);
        assert_eq!((today[0].end - today[0].start).num_minutes(), 60);

        let tomorrow = planner().plan(&raw, day() + Duration::days(1));
        assert_eq!(tomorrow.len(), 1);
        assert_eq!((tomorrow[0].end - tomorrow[0].start).num_minutes(), 60);
    }

    #[test]
    fn window_outside_the_day_is_dropped() {
        let windows = planner().plan(
            &[dispatch("2025-01-17T02:00:00+01:00", "2025-01-17T03:00:00+01:00")],
            day(),
        );
        assert!(windows.is_empty());
    }
}
