use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::charger::{ChargerPreferences, SessionSummary};
use super::dispatch::PlannedDispatch;
use super::tariff::{TariffKind, TariffRates};

/// Account ledger as upstream reports it; balances arrive in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub ledger_type: String,
    pub balance_cents: i64,
}

impl Ledger {
    pub fn balance_eur(&self) -> f64 {
        self.balance_cents as f64 / 100.0
    }
}

/// Everything the upstream account service reported about the charger in
/// one read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerSnapshot {
    pub device_id: String,
    pub name: String,
    /// Raw upstream state string (SMART_CONTROL_* vocabulary).
    pub raw_state: String,
    pub connected: bool,
    pub suspended: bool,
    pub planned_dispatches: Vec<PlannedDispatch>,
    pub preferences: Option<ChargerPreferences>,
    pub last_session: Option<SessionSummary>,
}

/// One refresh's worth of upstream truth, handed to the core as a value.
/// The core never fetches; the data collaborator owns the I/O and its
/// cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_number: String,
    pub taken_at: DateTime<Utc>,
    pub tariff_kind: TariffKind,
    pub rates: TariffRates,
    pub ledgers: Vec<Ledger>,
    pub charger: Option<ChargerSnapshot>,
}
