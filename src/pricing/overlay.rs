use crate::domain::schedule::aggregate;
use crate::domain::{
    ChargingWindow, DaySchedule, EvDaySchedule, EvPriceInterval, EvScheduleAggregates,
};

/// Derive the EV-discount view of a day schedule. Pure function over its
/// inputs, recomputed wholesale whenever windows or connection state
/// change - a shrinking window must retract discounts it granted earlier.
///
/// A disconnected charger never receives the discount, whatever the
/// windows say; with no fixed EV rate on the contract there is nothing to
/// overlay and the base values pass through.
pub fn apply_ev_overlay(
    schedule: &DaySchedule,
    windows: &[ChargingWindow],
    charger_connected: bool,
    ev_rate: Option<f64>,
) -> EvDaySchedule {
    let mut intervals = Vec::with_capacity(schedule.intervals.len());
    let mut discount_intervals = 0usize;
    let mut savings = 0.0f64;

    for base in &schedule.intervals {
        let discounted = charger_connected
            && ev_rate.is_some()
            && windows.iter().any(|w| w.overlaps(base.start, base.end));
        let value = if discounted { ev_rate } else { base.value };
        if discounted {
            discount_intervals += 1;
            if let (Some(base_value), Some(ev)) = (base.value, ev_rate) {
                savings += base_value - ev;
            }
        }
        intervals.push(EvPriceInterval {
            start: base.start,
            end: base.end,
            band: base.band,
            value,
            is_ev_discount: discounted,
        });
    }

    let price_aggregates = aggregate(intervals.iter().filter_map(|i| i.value));
    EvDaySchedule {
        date: schedule.date,
        intervals,
        aggregates: EvScheduleAggregates {
            min_price: price_aggregates.min_price,
            max_price: price_aggregates.max_price,
            avg_price: price_aggregates.avg_price,
            discount_intervals,
            charging_windows: windows.len(),
            savings,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TariffKind, TariffRates};
    use crate::pricing::IntervalPriceBuilder;
    use chrono::{DateTime, FixedOffset, NaiveDate};
    use chrono_tz::Europe::Madrid;

    fn rates() -> TariffRates {
        TariffRates {
            rate_peak: Some(0.197),
            rate_standard: Some(0.122),
            rate_offpeak: Some(0.084),
            rate_ev: Some(0.068),
        }
    }

    fn weekday_schedule() -> DaySchedule {
        IntervalPriceBuilder::new(Madrid)
            .build(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(), &rates(), TariffKind::Variable)
            .unwrap()
    }

    fn t(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn night_window() -> ChargingWindow {
        ChargingWindow {
            start: t("2025-01-15T02:00:00+01:00"),
            end: t("2025-01-15T04:00:00+01:00"),
        }
    }

    #[test]
    fn disconnected_charger_passes_base_values_through() {
        let schedule = weekday_schedule();
        let overlay = apply_ev_overlay(&schedule, &[night_window()], false, Some(0.068));
        assert!(overlay.intervals.iter().all(|i| !i.is_ev_discount));
        for (base, ev) in schedule.intervals.iter().zip(&overlay.intervals) {
            assert_eq!(base.value, ev.value);
        }
        assert_eq!(overlay.aggregates.discount_intervals, 0);
        assert_eq!(overlay.aggregates.savings, 0.0);
    }

    #[test]
    fn connected_charger_gets_ev_rate_inside_the_window() {
        let schedule = weekday_schedule();
        let overlay = apply_ev_overlay(&schedule, &[night_window()], true, Some(0.068));

        // 01:30-02:00 stays offpeak, 02:00 through 04:00 discounted.
        assert_eq!(overlay.intervals[3].value, Some(0.084));
        assert!(!overlay.intervals[3].is_ev_discount);
        for slot in 4..8 {
            assert_eq!(overlay.intervals[slot].value, Some(0.068), "slot {slot}");
            assert!(overlay.intervals[slot].is_ev_discount, "slot {slot}");
        }
        assert!(!overlay.intervals[8].is_ev_discount);

        assert_eq!(overlay.aggregates.discount_intervals, 4);
        assert_eq!(overlay.aggregates.charging_windows, 1);
        assert!((overlay.aggregates.savings - 0.064).abs() < 1e-9);
    }

    #[test]
    fn partial_overlap_counts_as_inside() {
        let schedule = weekday_schedule();
        let sliver = ChargingWindow {
            start: t("2025-01-15T02:10:00+01:00"),
            end: t("2025-01-15T02:20:00+01:00"),
        };
        let overlay = apply_ev_overlay(&schedule, &[sliver], true, Some(0.068));
        assert!(overlay.intervals[4].is_ev_discount);
        assert_eq!(overlay.aggregates.discount_intervals, 1);
    }

    #[test]
    fn overlay_is_idempotent() {
        let schedule = weekday_schedule();
        let windows = [night_window()];
        let a = apply_ev_overlay(&schedule, &windows, true, Some(0.068));
        let b = apply_ev_overlay(&schedule, &windows, true, Some(0.068));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_ev_rate_disables_the_overlay() {
        let schedule = weekday_schedule();
        let overlay = apply_ev_overlay(&schedule, &[night_window()], true, None);
        assert!(overlay.intervals.iter().all(|i| !i.is_ev_discount));
        assert_eq!(overlay.aggregates.discount_intervals, 0);
    }
}
