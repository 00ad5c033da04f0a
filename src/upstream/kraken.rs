use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{AccountDataSource, SourceError};
use crate::config::UpstreamConfig;
use crate::domain::{
    AccountSnapshot, ChargerPreferences, ChargerSnapshot, ChargerState, Ledger, PlannedDispatch,
    SessionSummary, SessionType, TariffKind, TariffRates,
};

const LOGIN_MUTATION: &str = r"
    mutation obtainKrakenToken($input: ObtainJSONWebTokenInput!) {
        obtainKrakenToken(input: $input) { token }
    }";

const ACCOUNTS_QUERY: &str = r"
    query GetAccountList {
        viewer { accounts { number } }
    }";

const LEDGERS_QUERY: &str = r"
    query GetLedgers($accountNumber: String!) {
        account(accountNumber: $accountNumber) {
            ledgers { ledgerType balance }
        }
    }";

const TARIFF_QUERY: &str = r"
    query GetAccountTariff($accountNumber: String!) {
        account(accountNumber: $accountNumber) {
            electricityAgreements(active: true) {
                tariff {
                    peakRate standardRate offPeakRate evRate
                }
            }
        }
    }";

const DEVICES_QUERY: &str = r"
    query GetSmartFlexDevices($accountNumber: String!) {
        devices(accountNumber: $accountNumber) {
            __typename
            id
            name
            status { current currentState isSuspended }
            preferences { mode unit schedules { max time } }
        }
    }";

const DISPATCHES_QUERY: &str = r"
    query FlexPlannedDispatches($deviceId: String!) {
        flexPlannedDispatches(deviceId: $deviceId) { start end type }
    }";

const CHARGE_HISTORY_QUERY: &str = r"
    query GetSmartFlexChargeHistory($accountNumber: String!, $deviceId: String, $last: Int) {
        devices(deviceId: $deviceId, accountNumber: $accountNumber) {
            __typename
            id
            ... on SmartFlexChargePoint {
                chargePointChargingSession: chargingSessions(last: $last) {
                    edges {
                        node {
                            start end type stateOfChargeFinal
                            energyAdded { value unit }
                        }
                    }
                }
            }
        }
    }";

const BOOST_MUTATION: &str = r"
    mutation FlexUpdateBoostCharge($input: UpdateBoostChargeInput!) {
        updateBoostCharge(input: $input) { id }
    }";

const PREFERENCES_MUTATION: &str = r"
    mutation SetDevicePreferences($input: SmartFlexDevicePreferencesInput!) {
        setDevicePreferences(input: $input) { id }
    }";

/// GraphQL client for the Kraken account/charger API. Owns the HTTP
/// timeout; retry policy belongs to whoever calls the coordinator.
pub struct KrakenClient {
    base_url: String,
    client: reqwest::Client,
    email: String,
    password: String,
    account_override: Option<String>,
    token: RwLock<Option<String>>,
}

impl KrakenClient {
    pub fn new(cfg: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("smart-flex-bridge/0.3"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_seconds))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url: cfg.base_url.clone(),
            client,
            email: cfg.email.clone(),
            password: cfg.password.clone(),
            account_override: cfg.account_number.clone(),
            token: RwLock::new(None),
        })
    }

    async fn login(&self) -> Result<(), SourceError> {
        let variables = json!({ "input": { "email": self.email, "password": self.password } });
        let data = self.post(LOGIN_MUTATION, variables, None).await?;
        let token = data
            .pointer("/obtainKrakenToken/token")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Auth("login response carried no token".to_string()))?;
        *self.token.write().await = Some(token.to_string());
        debug!("kraken token obtained");
        Ok(())
    }

    async fn ensure_token(&self) -> Result<String, SourceError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await?;
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| SourceError::Auth("no token after login".to_string()))
    }

    async fn execute(&self, query: &str, variables: Value) -> Result<Value, SourceError> {
        let token = self.ensure_token().await?;
        self.post(query, variables, Some(&token)).await
    }

    async fn post(
        &self,
        query: &str,
        variables: Value,
        token: Option<&str>,
    ) -> Result<Value, SourceError> {
        let mut request = self
            .client
            .post(&self.base_url)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = token {
            request = request.header("Authorization", token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Request(format!("POST failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Protocol(format!("non-JSON response: {e}")))?;
        if !status.is_success() {
            return Err(SourceError::Request(format!("HTTP {status}: {body}")));
        }
        if let Some(errors) = body.get("errors").filter(|e| !e.as_array().map_or(true, Vec::is_empty)) {
            let text = errors.to_string();
            if text.to_lowercase().contains("auth") {
                return Err(SourceError::Auth(text));
            }
            return Err(SourceError::Protocol(format!("GraphQL errors: {text}")));
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| SourceError::Protocol("response carried no data".to_string()))
    }

    async fn account_number(&self) -> Result<String, SourceError> {
        if let Some(number) = &self.account_override {
            return Ok(number.clone());
        }
        let data = self.execute(ACCOUNTS_QUERY, json!({})).await?;
        data.pointer("/viewer/accounts/0/number")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::Protocol("login owns no accounts".to_string()))
    }

    async fn fetch_ledgers(&self, account: &str) -> Result<Vec<Ledger>, SourceError> {
        let data = self.execute(LEDGERS_QUERY, json!({ "accountNumber": account })).await?;
        let ledgers = data
            .pointer("/account/ledgers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(ledgers
            .iter()
            .filter_map(|l| {
                Some(Ledger {
                    ledger_type: l.get("ledgerType")?.as_str()?.to_string(),
                    balance_cents: l.get("balance")?.as_i64()?,
                })
            })
            .collect())
    }

    async fn fetch_rates(&self, account: &str) -> Result<TariffRates, SourceError> {
        let data = self.execute(TARIFF_QUERY, json!({ "accountNumber": account })).await?;
        let tariff = data.pointer("/account/electricityAgreements/0/tariff");
        let rate = |key: &str| tariff.and_then(|t| t.get(key)).and_then(Value::as_f64);
        Ok(TariffRates {
            rate_peak: rate("peakRate"),
            rate_standard: rate("standardRate"),
            rate_offpeak: rate("offPeakRate"),
            rate_ev: rate("evRate"),
        })
    }

    async fn fetch_charge_point(
        &self,
        account: &str,
    ) -> Result<Option<ChargerSnapshot>, SourceError> {
        let data = self.execute(DEVICES_QUERY, json!({ "accountNumber": account })).await?;
        let devices = data.get("devices").and_then(Value::as_array).cloned().unwrap_or_default();
        let Some(device) = devices
            .iter()
            .find(|d| d.get("__typename").and_then(Value::as_str) == Some("SmartFlexChargePoint"))
        else {
            return Ok(None);
        };

        let device_id = device
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Protocol("charge point without id".to_string()))?
            .to_string();
        let raw_state = device
            .pointer("/status/currentState")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let dispatches = self.fetch_dispatches(&device_id).await.unwrap_or_else(|e| {
            warn!(error = %e, device_id = %device_id, "planned dispatches unavailable");
            Vec::new()
        });
        let last_session = match self.fetch_last_session(account, &device_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, device_id = %device_id, "charge history unavailable");
                None
            }
        };

        Ok(Some(ChargerSnapshot {
            connected: ChargerState::from_upstream(&raw_state)
                .is_some_and(|s| s.is_connected()),
            device_id,
            name: device.get("name").and_then(Value::as_str).unwrap_or("EV Charger").to_string(),
            raw_state,
            suspended: device
                .pointer("/status/isSuspended")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            planned_dispatches: dispatches,
            preferences: parse_preferences(device.get("preferences")),
            last_session,
        }))
    }

    async fn fetch_dispatches(
        &self,
        device_id: &str,
    ) -> Result<Vec<PlannedDispatch>, SourceError> {
        let data = self.execute(DISPATCHES_QUERY, json!({ "deviceId": device_id })).await?;
        let dispatches = data
            .get("flexPlannedDispatches")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(dispatches)
            .map_err(|e| SourceError::Protocol(format!("dispatch list malformed: {e}")))
    }

    async fn fetch_last_session(
        &self,
        account: &str,
        device_id: &str,
    ) -> Result<Option<SessionSummary>, SourceError> {
        let data = self
            .execute(
                CHARGE_HISTORY_QUERY,
                json!({ "accountNumber": account, "deviceId": device_id, "last": 1 }),
            )
            .await?;
        let node = data.pointer("/devices/0/chargePointChargingSession/edges/0/node");
        Ok(node.and_then(parse_session))
    }
}

fn parse_session(node: &Value) -> Option<SessionSummary> {
    let parse_ts = |key: &str| -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(node.get(key)?.as_str()?)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    };
    let kind = node
        .get("type")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<SessionType>().ok())
        .unwrap_or(SessionType::Smart);
    Some(SessionSummary {
        started_at: parse_ts("start")?,
        ended_at: parse_ts("end")?,
        energy_added_kwh: node
            .pointer("/energyAdded/value")
            .and_then(value_as_f64)
            .unwrap_or(0.0),
        state_of_charge_final: node.get("stateOfChargeFinal").and_then(value_as_f64),
        kind,
    })
}

/// Kraken reports numbers both as JSON numbers and as decimal strings.
fn value_as_f64(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn parse_preferences(value: Option<&Value>) -> Option<ChargerPreferences> {
    let prefs = value?;
    let schedule = prefs.pointer("/schedules/0");
    let defaults = ChargerPreferences::default();
    Some(ChargerPreferences {
        max_percentage: schedule
            .and_then(|s| s.get("max"))
            .and_then(Value::as_u64)
            .map_or(defaults.max_percentage, |v| v.min(100) as u8),
        target_time: schedule
            .and_then(|s| s.get("time"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.target_time),
        mode: prefs
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or(&defaults.mode)
            .to_string(),
        unit: prefs
            .get("unit")
            .and_then(Value::as_str)
            .unwrap_or(&defaults.unit)
            .to_string(),
    })
}

#[async_trait]
impl AccountDataSource for KrakenClient {
    async fn fetch_snapshot(&self) -> Result<AccountSnapshot, SourceError> {
        let account = self.account_number().await?;
        let ledgers = self.fetch_ledgers(&account).await?;
        let rates = self.fetch_rates(&account).await?;
        let charger = self.fetch_charge_point(&account).await?;
        Ok(AccountSnapshot {
            account_number: account,
            taken_at: Utc::now(),
            tariff_kind: TariffKind::Variable,
            rates,
            ledgers,
            charger,
        })
    }

    async fn start_boost(&self, device_id: &str) -> Result<(), SourceError> {
        let variables = json!({ "input": { "deviceId": device_id, "action": "BOOST" } });
        self.execute(BOOST_MUTATION, variables).await.map(|_| ())
    }

    async fn stop_boost(&self, device_id: &str) -> Result<(), SourceError> {
        let variables = json!({ "input": { "deviceId": device_id, "action": "CANCEL" } });
        self.execute(BOOST_MUTATION, variables).await.map(|_| ())
    }

    async fn set_preferences(
        &self,
        device_id: &str,
        preferences: &ChargerPreferences,
    ) -> Result<(), SourceError> {
        let variables = json!({
            "input": {
                "deviceId": device_id,
                "mode": preferences.mode,
                "unit": preferences.unit,
                "schedules": weekly_schedules(preferences),
            }
        });
        self.execute(PREFERENCES_MUTATION, variables).await.map(|_| ())
    }
}

/// One schedule entry per day of week, as the upstream mutation expects.
fn weekly_schedules(preferences: &ChargerPreferences) -> Vec<Value> {
    const DAYS: [&str; 7] =
        ["MONDAY", "TUESDAY", "WEDNESDAY", "THURSDAY", "FRIDAY", "SATURDAY", "SUNDAY"];
    DAYS.iter()
        .map(|day| {
            json!({
                "dayOfWeek": day,
                "max": preferences.max_percentage,
                "time": preferences.target_time.format("%H:%M").to_string(),
            })
        })
        .collect()
}
