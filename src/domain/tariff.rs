use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Time-of-use classification for a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Band {
    Peak,
    Standard,
    Offpeak,
}

/// Contracted tariff classification. Both follow the same regulated
/// weekday/weekend calendar; they differ upstream in how the rate values
/// themselves are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TariffKind {
    #[default]
    Variable,
    Indexed,
}

/// Per-band contracted rates in EUR/kWh, taken verbatim from upstream.
/// A missing rate degrades the affected band's intervals, it never fails
/// the schedule. The expected `offpeak <= standard <= peak` ordering is
/// not enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TariffRates {
    pub rate_peak: Option<f64>,
    pub rate_standard: Option<f64>,
    pub rate_offpeak: Option<f64>,
    /// Fixed EV rate applied inside planned charging windows.
    pub rate_ev: Option<f64>,
}

impl TariffRates {
    pub fn rate_for(&self, band: Band) -> Option<f64> {
        match band {
            Band::Peak => self.rate_peak,
            Band::Standard => self.rate_standard,
            Band::Offpeak => self.rate_offpeak,
        }
    }

    /// All three band rates present.
    pub fn is_complete(&self) -> bool {
        self.rate_peak.is_some() && self.rate_standard.is_some() && self.rate_offpeak.is_some()
    }

    pub fn missing_bands(&self) -> Vec<Band> {
        [Band::Peak, Band::Standard, Band::Offpeak]
            .into_iter()
            .filter(|b| self.rate_for(*b).is_none())
            .collect()
    }
}
