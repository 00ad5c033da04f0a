use chrono::{DateTime, FixedOffset, NaiveDate};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tariff::Band;

/// Fixed interval width of the published schedules.
pub const INTERVAL_MINUTES: i64 = 30;
/// Half-hour intervals covering 00:00-24:00.
pub const INTERVALS_PER_DAY: usize = 48;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("day schedule must hold {INTERVALS_PER_DAY} intervals, got {0}")]
    WrongLength(usize),
    #[error("interval {index} starts at {start} but the previous one ends at {previous_end}")]
    Discontinuity {
        index: usize,
        start: DateTime<FixedOffset>,
        previous_end: DateTime<FixedOffset>,
    },
}

/// One half-open half-hour price slot. `value` is absent when the rate
/// for the slot's band was missing upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInterval {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub band: Band,
    pub value: Option<f64>,
}

impl PriceInterval {
    pub fn contains(&self, at: DateTime<FixedOffset>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Aggregates computed once per schedule over the present values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAggregates {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_price: Option<f64>,
}

pub(crate) fn aggregate(values: impl Iterator<Item = f64>) -> ScheduleAggregates {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return ScheduleAggregates::default();
    }
    let min = values.iter().copied().map(OrderedFloat).min().map(|v| v.0);
    let max = values.iter().copied().map(OrderedFloat).max().map(|v| v.0);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    ScheduleAggregates { min_price: min, max_price: max, avg_price: Some(avg) }
}

/// A gap-free, overlap-free sequence of 48 half-hour price intervals for
/// one calendar day. The invariant is checked at construction; the
/// builder is the only producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub intervals: Vec<PriceInterval>,
    pub aggregates: ScheduleAggregates,
}

impl DaySchedule {
    pub fn new(date: NaiveDate, intervals: Vec<PriceInterval>) -> Result<Self, ScheduleError> {
        check_contiguous(intervals.iter().map(|i| (i.start, i.end)))?;
        let aggregates = aggregate(intervals.iter().filter_map(|i| i.value));
        Ok(Self { date, intervals, aggregates })
    }

    /// The interval whose `[start, end)` contains `at`, if any.
    pub fn active_at(&self, at: DateTime<FixedOffset>) -> Option<&PriceInterval> {
        self.intervals.iter().find(|i| i.contains(at))
    }
}

/// `PriceInterval` with the EV-discount overlay applied. Boundaries match
/// the base interval 1:1; `value` is the fixed EV rate when
/// `is_ev_discount` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvPriceInterval {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub band: Band,
    pub value: Option<f64>,
    pub is_ev_discount: bool,
}

impl EvPriceInterval {
    pub fn contains(&self, at: DateTime<FixedOffset>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvScheduleAggregates {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_price: Option<f64>,
    /// Intervals carrying the EV rate.
    pub discount_intervals: usize,
    /// Distinct charging windows represented in the overlay.
    pub charging_windows: usize,
    /// Sum of (base value - EV rate) over discounted intervals.
    pub savings: f64,
}

/// The EV-discount view of a day, 1:1 with its base schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvDaySchedule {
    pub date: NaiveDate,
    pub intervals: Vec<EvPriceInterval>,
    pub aggregates: EvScheduleAggregates,
}

impl EvDaySchedule {
    pub fn active_at(&self, at: DateTime<FixedOffset>) -> Option<&EvPriceInterval> {
        self.intervals.iter().find(|i| i.contains(at))
    }
}

fn check_contiguous(
    bounds: impl ExactSizeIterator<Item = (DateTime<FixedOffset>, DateTime<FixedOffset>)>,
) -> Result<(), ScheduleError> {
    if bounds.len() != INTERVALS_PER_DAY {
        return Err(ScheduleError::WrongLength(bounds.len()));
    }
    let mut previous_end: Option<DateTime<FixedOffset>> = None;
    for (index, (start, end)) in bounds.enumerate() {
        if let Some(prev) = previous_end {
            if start != prev {
                return Err(ScheduleError::Discontinuity { index, start, previous_end: prev });
            }
        }
        previous_end = Some(end);
    }
    Ok(())
}
