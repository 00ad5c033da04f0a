use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Weekday};

use super::tariff::{Band, TariffKind};

/// Static band calendar for the Spanish time-of-use tariff, local
/// wall-clock time. Interval starts are inclusive, ends exclusive: a
/// boundary instant belongs to the band starting at it.
///
/// Weekdays: offpeak 00-08, standard 08-10 / 14-18 / 22-24,
/// peak 10-14 / 18-22. Weekends: offpeak all day.
pub struct TariffCalendar;

impl TariffCalendar {
    /// Classify a local wall-clock time.
    pub fn classify_local(local: NaiveDateTime, _kind: TariffKind) -> Band {
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Band::Offpeak;
        }
        match local.hour() {
            0..=7 => Band::Offpeak,
            8..=9 | 14..=17 | 22..=23 => Band::Standard,
            _ => Band::Peak,
        }
    }

    /// Classify an offset-aware instant by its wall-clock reading.
    pub fn classify<Tz: TimeZone>(at: &DateTime<Tz>, kind: TariffKind) -> Band {
        Self::classify_local(at.naive_local(), kind)
    }
}
