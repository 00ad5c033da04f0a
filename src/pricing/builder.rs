use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use tracing::warn;

use crate::domain::{
    DaySchedule, PriceInterval, ScheduleError, TariffCalendar, TariffKind, TariffRates,
    INTERVALS_PER_DAY, INTERVAL_MINUTES,
};
use crate::error::CoreError;

/// Builds the 48-interval day schedule for a wall-clock day in one
/// timezone. Interval boundaries are the local half-hour labels
/// 00:00-24:00 resolved individually, so each interval carries its own
/// UTC offset across a DST transition: the spring-forward gap collapses
/// onto zero-width instants and fall-back labels resolve to their
/// earliest occurrence, keeping the instants contiguous either way.
#[derive(Debug, Clone, Copy)]
pub struct IntervalPriceBuilder {
    tz: Tz,
}

impl IntervalPriceBuilder {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn build(
        &self,
        day: NaiveDate,
        rates: &TariffRates,
        kind: TariffKind,
    ) -> Result<DaySchedule, ScheduleError> {
        for band in rates.missing_bands() {
            warn!(error = %CoreError::IncompleteTariffData(band), date = %day, "degrading schedule");
        }

        let mut intervals = Vec::with_capacity(INTERVALS_PER_DAY);
        let day_start = day.and_hms_opt(0, 0, 0).expect("midnight exists");
        for slot in 0..INTERVALS_PER_DAY as i64 {
            let label_start = day_start + Duration::minutes(slot * INTERVAL_MINUTES);
            let label_end = day_start + Duration::minutes((slot + 1) * INTERVAL_MINUTES);
            let midpoint = label_start + Duration::minutes(INTERVAL_MINUTES / 2);
            let band = TariffCalendar::classify_local(midpoint, kind);
            intervals.push(PriceInterval {
                start: resolve_local(self.tz, label_start),
                end: resolve_local(self.tz, label_end),
                band,
                value: rates.rate_for(band),
            });
        }

        DaySchedule::new(day, intervals)
    }
}

/// Resolve a wall-clock label to an offset-aware instant. Labels inside a
/// spring-forward gap map to the first instant after it; ambiguous
/// fall-back labels take their earliest occurrence.
pub(crate) fn resolve_local(tz: Tz, label: NaiveDateTime) -> DateTime<FixedOffset> {
    if let Some(dt) = tz.from_local_datetime(&label).earliest() {
        return dt.fixed_offset();
    }
    let mut probe = label;
    loop {
        probe += Duration::minutes(INTERVAL_MINUTES);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return dt.fixed_offset();
        }
    }
}
