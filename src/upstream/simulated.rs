use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AccountDataSource, SourceError};
use crate::domain::{
    AccountSnapshot, ChargerPreferences, ChargerSnapshot, ChargerState, Ledger, PlannedDispatch,
    SessionSummary, TariffKind, TariffRates,
};

/// Simulated account/charger source for development and testing.
#[derive(Debug, Clone)]
pub struct SimulatedAccountSource {
    state: Arc<RwLock<SimState>>,
}

#[derive(Debug)]
struct SimState {
    account_number: String,
    tariff_kind: TariffKind,
    rates: TariffRates,
    ledgers: Vec<Ledger>,
    device_id: String,
    device_name: String,
    raw_state: String,
    dispatches: Vec<PlannedDispatch>,
    preferences: ChargerPreferences,
    last_session: Option<SessionSummary>,
    fail_next_fetch: bool,
}

impl SimulatedAccountSource {
    pub fn new(account_number: &str, rates: TariffRates) -> Self {
        Self {
            state: Arc::new(RwLock::new(SimState {
                account_number: account_number.to_string(),
                tariff_kind: TariffKind::Variable,
                rates,
                ledgers: vec![Ledger {
                    ledger_type: "SPAIN_ELECTRICITY_LEDGER".to_string(),
                    balance_cents: -2350,
                }],
                device_id: "sim-charge-point".to_string(),
                device_name: "Simulated Charge Point".to_string(),
                raw_state: "SMART_CONTROL_NOT_AVAILABLE".to_string(),
                dispatches: Vec::new(),
                preferences: ChargerPreferences::default(),
                last_session: None,
                fail_next_fetch: false,
            })),
        }
    }

    pub fn default_account() -> Self {
        Self::new(
            "ES-SIM-001",
            TariffRates {
                rate_peak: Some(0.197),
                rate_standard: Some(0.122),
                rate_offpeak: Some(0.084),
                rate_ev: Some(0.068),
            },
        )
    }

    /// Simulate a car plugging in.
    pub async fn simulate_connect(&self) {
        self.state.write().await.raw_state = "SMART_CONTROL_CAPABLE".to_string();
    }

    /// Simulate a car unplugging.
    pub async fn simulate_disconnect(&self) {
        let mut st = self.state.write().await;
        st.raw_state = "SMART_CONTROL_NOT_AVAILABLE".to_string();
        st.dispatches.clear();
    }

    /// Simulate the smart plan starting a scheduled charge.
    pub async fn simulate_smart_charge(&self) {
        self.state.write().await.raw_state = "SMART_CONTROL_IN_PROGRESS".to_string();
    }

    /// Queue a planned dispatch as the upstream planner would.
    pub async fn plan_dispatch(&self, start: &str, end: &str) {
        self.state.write().await.dispatches.push(PlannedDispatch {
            start: start.to_string(),
            end: end.to_string(),
            kind: "SMART".to_string(),
        });
    }

    pub async fn clear_dispatches(&self) {
        self.state.write().await.dispatches.clear();
    }

    /// Report a finished session and drop back to plain connected.
    pub async fn complete_session(&self, summary: SessionSummary) {
        let mut st = self.state.write().await;
        st.last_session = Some(summary);
        st.raw_state = "SMART_CONTROL_CAPABLE".to_string();
    }

    /// Make the next fetch fail, as a network outage would.
    pub async fn fail_next_fetch(&self) {
        self.state.write().await.fail_next_fetch = true;
    }

    pub async fn set_rates(&self, rates: TariffRates) {
        self.state.write().await.rates = rates;
    }

    pub async fn preferences(&self) -> ChargerPreferences {
        self.state.read().await.preferences.clone()
    }

    pub async fn raw_state(&self) -> String {
        self.state.read().await.raw_state.clone()
    }
}

#[async_trait]
impl AccountDataSource for SimulatedAccountSource {
    async fn fetch_snapshot(&self) -> Result<AccountSnapshot, SourceError> {
        let mut st = self.state.write().await;
        if st.fail_next_fetch {
            st.fail_next_fetch = false;
            return Err(SourceError::Request("simulated outage".to_string()));
        }
        let connected =
            ChargerState::from_upstream(&st.raw_state).is_some_and(|s| s.is_connected());
        Ok(AccountSnapshot {
            account_number: st.account_number.clone(),
            taken_at: Utc::now(),
            tariff_kind: st.tariff_kind,
            rates: st.rates,
            ledgers: st.ledgers.clone(),
            charger: Some(ChargerSnapshot {
                device_id: st.device_id.clone(),
                name: st.device_name.clone(),
                raw_state: st.raw_state.clone(),
                connected,
                suspended: false,
                planned_dispatches: st.dispatches.clone(),
                preferences: Some(st.preferences.clone()),
                last_session: st.last_session.clone(),
            }),
        })
    }

    async fn start_boost(&self, device_id: &str) -> Result<(), SourceError> {
        let mut st = self.state.write().await;
        if st.device_id != device_id {
            return Err(SourceError::Protocol(format!("unknown device {device_id}")));
        }
        if st.raw_state == "SMART_CONTROL_NOT_AVAILABLE" {
            return Err(SourceError::Request("no vehicle connected".to_string()));
        }
        st.raw_state = "BOOSTING".to_string();
        Ok(())
    }

    async fn stop_boost(&self, device_id: &str) -> Result<(), SourceError> {
        let mut st = self.state.write().await;
        if st.device_id != device_id {
            return Err(SourceError::Protocol(format!("unknown device {device_id}")));
        }
        st.raw_state = "SMART_CONTROL_CAPABLE".to_string();
        Ok(())
    }

    async fn set_preferences(
        &self,
        device_id: &str,
        preferences: &ChargerPreferences,
    ) -> Result<(), SourceError> {
        let mut st = self.state.write().await;
        if st.device_id != device_id {
            return Err(SourceError::Protocol(format!("unknown device {device_id}")));
        }
        st.preferences = preferences.clone();
        Ok(())
    }
}
