use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    auth::AuthBearer,
    coordinator::{AppState, ChargerView, PricingView},
    domain::{ChargeSessionRecord, ChargerPreferences, DaySchedule, EvDaySchedule, EvPriceInterval, Ledger, PriceInterval},
};

use super::error::ApiError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/schedule", get(get_schedule))
        .route("/schedule/ev", get(get_ev_schedule))
        .route("/charger", get(get_charger))
        .route("/charger/sessions", get(get_sessions))
        .route("/charger/boost", post(start_boost))
        .route("/charger/boost/stop", post(stop_boost))
        .route("/charger/connected", post(mark_connected))
        .route("/charger/disconnected", post(mark_disconnected))
        .route("/charger/preferences", put(set_preferences))
        .route("/refresh", post(refresh_now))
        .with_state(state)
}

async fn current_view(state: &AppState) -> Result<Arc<PricingView>, ApiError> {
    state
        .coordinator
        .view()
        .await
        .ok_or_else(|| ApiError::ServiceUnavailable("no snapshot derived yet".to_string()))
}

#[derive(Debug, Serialize)]
pub struct LedgerBalance {
    pub ledger_type: String,
    pub balance_eur: f64,
}

impl From<&Ledger> for LedgerBalance {
    fn from(ledger: &Ledger) -> Self {
        Self { ledger_type: ledger.ledger_type.clone(), balance_eur: ledger.balance_eur() }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub account_number: String,
    pub generation: u64,
    pub generated_at: chrono::DateTime<Utc>,
    pub ledgers: Vec<LedgerBalance>,
    pub charger_state: Option<String>,
}

async fn get_status(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<StatusResponse>, ApiError> {
    let view = current_view(&state).await?;
    Ok(Json(StatusResponse {
        account_number: view.account_number.clone(),
        generation: view.generation,
        generated_at: view.generated_at,
        ledgers: view.ledgers.iter().map(LedgerBalance::from).collect(),
        charger_state: view.charger.as_ref().map(|c| c.state.to_string()),
    }))
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub generation: u64,
    pub today: DaySchedule,
    pub tomorrow: Option<DaySchedule>,
    /// The interval containing "now", with its bounds and value.
    pub current: Option<PriceInterval>,
}

async fn get_schedule(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let view = current_view(&state).await?;
    let now = Utc::now().fixed_offset();
    Ok(Json(ScheduleResponse {
        generation: view.generation,
        current: view.today.active_at(now).cloned(),
        today: view.today.clone(),
        tomorrow: view.tomorrow.clone(),
    }))
}

#[derive(Debug, Serialize)]
pub struct EvScheduleResponse {
    pub generation: u64,
    pub today: EvDaySchedule,
    pub tomorrow: Option<EvDaySchedule>,
    pub current: Option<EvPriceInterval>,
}

async fn get_ev_schedule(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<EvScheduleResponse>, ApiError> {
    let view = current_view(&state).await?;
    let now = Utc::now().fixed_offset();
    Ok(Json(EvScheduleResponse {
        generation: view.generation,
        current: view.today_ev.active_at(now).cloned(),
        today: view.today_ev.clone(),
        tomorrow: view.tomorrow_ev.clone(),
    }))
}

async fn get_charger(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<ChargerView>, ApiError> {
    let view = current_view(&state).await?;
    view.charger
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("account has no charger".to_string()))
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<ChargeSessionRecord>,
}

async fn get_sessions(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<SessionsResponse>, ApiError> {
    // Newest first; bounded by the configured history capacity.
    Ok(Json(SessionsResponse { sessions: state.coordinator.sessions() }))
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub charger: Option<ChargerView>,
}

async fn command_response(state: &AppState) -> CommandResponse {
    let charger = state.coordinator.view().await.and_then(|v| v.charger.clone());
    CommandResponse { success: true, charger }
}

async fn start_boost(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<CommandResponse>, ApiError> {
    state.coordinator.start_boost().await?;
    Ok(Json(command_response(&state).await))
}

async fn stop_boost(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<CommandResponse>, ApiError> {
    state.coordinator.stop_boost().await?;
    Ok(Json(command_response(&state).await))
}

async fn mark_connected(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<CommandResponse>, ApiError> {
    state.coordinator.mark_connected().await?;
    Ok(Json(command_response(&state).await))
}

async fn mark_disconnected(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<CommandResponse>, ApiError> {
    state.coordinator.mark_disconnected().await?;
    Ok(Json(command_response(&state).await))
}

#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub max_percentage: Option<u8>,
    pub target_time: Option<NaiveTime>,
}

async fn set_preferences(
    State(state): State<AppState>,
    _auth: AuthBearer,
    Json(req): Json<PreferencesRequest>,
) -> Result<Json<ChargerPreferences>, ApiError> {
    let updated =
        state.coordinator.set_preferences(req.max_percentage, req.target_time).await?;
    Ok(Json(updated))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub generation: u64,
}

async fn refresh_now(
    State(state): State<AppState>,
    _auth: AuthBearer,
) -> Result<Json<RefreshResponse>, ApiError> {
    let generation = state.coordinator.refresh().await?;
    Ok(Json(RefreshResponse { generation }))
}
