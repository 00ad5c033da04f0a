use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::charger::{ChargerStateMachine, SessionHistoryTracker};
use crate::config::Config;
use crate::domain::{
    AccountSnapshot, ChargeSessionRecord, ChargerEvent, ChargerPreferences, ChargerState,
    ChargingWindow, DaySchedule, EvDaySchedule, Ledger, SessionSummary, StateTransition,
};
use crate::error::CoreError;
use crate::pricing::{apply_ev_overlay, IntervalPriceBuilder, DispatchPlanner};
use crate::upstream::AccountDataSource;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub coordinator: Arc<AccountCoordinator>,
}

impl AppState {
    pub fn new(cfg: Config) -> Result<Self> {
        #[cfg(feature = "sim")]
        let source: Arc<dyn AccountDataSource> =
            Arc::new(crate::upstream::simulated::SimulatedAccountSource::default_account());
        #[cfg(not(feature = "sim"))]
        let source: Arc<dyn AccountDataSource> =
            Arc::new(crate::upstream::kraken::KrakenClient::new(&cfg.upstream)?);

        let coordinator = Arc::new(AccountCoordinator::new(source, &cfg)?);
        Ok(Self { cfg, coordinator })
    }
}

pub fn spawn_refresh_task(state: &AppState) {
    let coordinator = state.coordinator.clone();
    let poll_seconds = state.cfg.refresh.poll_seconds.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_seconds));
        loop {
            interval.tick().await;
            match coordinator.refresh().await {
                Ok(generation) => info!(generation, "refresh complete"),
                Err(e) => warn!(error = %e, "refresh failed, keeping last-known-good view"),
            }
        }
    });
}

/// Charger portion of the published snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ChargerView {
    pub device_id: String,
    pub name: String,
    pub state: ChargerState,
    pub raw_state: String,
    pub connected: bool,
    pub boost_active: bool,
    pub suspended: bool,
    pub preferences: ChargerPreferences,
    pub windows_today: Vec<ChargingWindow>,
    pub windows_tomorrow: Vec<ChargingWindow>,
    pub last_transition: Option<StateTransition>,
    /// Bounded transition log, oldest first.
    pub recent_transitions: Vec<StateTransition>,
    pub last_session: Option<ChargeSessionRecord>,
}

/// One refresh's derived output, swapped in as a unit. The host platform
/// reads this; it never mutates pricing state directly.
#[derive(Debug, Clone, Serialize)]
pub struct PricingView {
    pub generation: u64,
    pub generated_at: DateTime<Utc>,
    pub account_number: String,
    pub ledgers: Vec<Ledger>,
    pub today: DaySchedule,
    pub tomorrow: Option<DaySchedule>,
    pub today_ev: EvDaySchedule,
    pub tomorrow_ev: Option<EvDaySchedule>,
    pub charger: Option<ChargerView>,
}

/// Per-account orchestrator. Refreshes are serialized through one gate
/// and every derived structure is rebuilt wholesale from the latest
/// snapshot - a half-updated view is never observable.
pub struct AccountCoordinator {
    source: Arc<dyn AccountDataSource>,
    tz: Tz,
    builder: IntervalPriceBuilder,
    planner: DispatchPlanner,
    publish_tomorrow_after_hour: u32,
    machine: parking_lot::Mutex<ChargerStateMachine>,
    history: parking_lot::Mutex<SessionHistoryTracker>,
    published: RwLock<Option<Arc<PricingView>>>,
    refresh_gate: Mutex<()>,
    generation: AtomicU64,
}

impl AccountCoordinator {
    pub fn new(source: Arc<dyn AccountDataSource>, cfg: &Config) -> Result<Self> {
        let tz = cfg.tariff.tz()?;
        Ok(Self {
            source,
            tz,
            builder: IntervalPriceBuilder::new(tz),
            planner: DispatchPlanner::new(tz, cfg.tariff.dispatch_merge_minutes),
            publish_tomorrow_after_hour: cfg.tariff.publish_tomorrow_after_hour,
            machine: parking_lot::Mutex::new(ChargerStateMachine::new()),
            history: parking_lot::Mutex::new(SessionHistoryTracker::new(
                cfg.refresh.session_history_capacity,
            )),
            published: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub async fn view(&self) -> Option<Arc<PricingView>> {
        self.published.read().await.clone()
    }

    /// Recorded sessions, newest first.
    pub fn sessions(&self) -> Vec<ChargeSessionRecord> {
        self.history.lock().all()
    }

    /// Fetch a fresh snapshot and swap in the derived view. At most one
    /// rebuild is in flight; a caller that waited through someone else's
    /// rebuild reuses its result instead of fetching again.
    pub async fn refresh(&self) -> Result<u64, CoreError> {
        self.refresh_inner(false).await
    }

    async fn refresh_inner(&self, force: bool) -> Result<u64, CoreError> {
        let requested_at = Utc::now();
        let _gate = self.refresh_gate.lock().await;

        if !force {
            if let Some(view) = self.published.read().await.as_ref() {
                if view.generated_at > requested_at {
                    return Ok(view.generation);
                }
            }
        }

        let snapshot = match self.source.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.mark_unknown().await;
                return Err(CoreError::UpstreamUnavailable(e.to_string()));
            }
        };

        let view = Arc::new(self.rebuild(snapshot));
        let generation = view.generation;
        *self.published.write().await = Some(view);
        Ok(generation)
    }

    /// Connection status could not be confirmed: keep the last-known-good
    /// schedules, mark only the charger state unknown.
    async fn mark_unknown(&self) {
        let transition = {
            let mut machine = self.machine.lock();
            machine.apply(ChargerEvent::ReadFailed, Utc::now()).ok().flatten()
        };
        let mut guard = self.published.write().await;
        if let Some(view) = guard.as_ref().filter(|v| v.charger.is_some()) {
            let mut updated = (**view).clone();
            if let Some(charger_view) = updated.charger.as_mut() {
                charger_view.state = ChargerState::Unknown;
                charger_view.connected = false;
                charger_view.boost_active = false;
                if let Some(t) = transition {
                    charger_view.last_transition = Some(t);
                    charger_view.recent_transitions.push(t);
                }
            }
            *guard = Some(Arc::new(updated));
        }
    }

    /// Pure recomputation from one snapshot. Synchronous on purpose: no
    /// I/O happens past this point, so the machine and history locks are
    /// never held across an await.
    fn rebuild(&self, snapshot: AccountSnapshot) -> PricingView {
        let now_utc = Utc::now();
        let now_local = now_utc.with_timezone(&self.tz);
        let today = now_local.date_naive();
        let tomorrow = today + Duration::days(1);

        let (windows_today, windows_tomorrow) = match &snapshot.charger {
            Some(charger) => (
                self.planner.plan(&charger.planned_dispatches, today),
                self.planner.plan(&charger.planned_dispatches, tomorrow),
            ),
            None => (Vec::new(), Vec::new()),
        };

        let (state, last_transition, completed_session) =
            self.advance_machine(&snapshot, &windows_today, now_utc);
        let recent_transitions = self.machine.lock().transitions().to_vec();

        let connected = state.map_or(false, |s| s.is_connected());
        let today_schedule = self.build_day(today, &snapshot);
        let tomorrow_schedule = (self.publish_tomorrow_after_hour == 0
            || now_local.time().hour() >= self.publish_tomorrow_after_hour)
            .then(|| self.build_day(tomorrow, &snapshot));

        let today_ev =
            apply_ev_overlay(&today_schedule, &windows_today, connected, snapshot.rates.rate_ev);
        let tomorrow_ev = tomorrow_schedule
            .as_ref()
            .map(|s| apply_ev_overlay(s, &windows_tomorrow, connected, snapshot.rates.rate_ev));

        if let Some(summary) = completed_session {
            let mut schedules: Vec<&EvDaySchedule> = vec![&today_ev];
            if let Some(ev) = &tomorrow_ev {
                schedules.push(ev);
            }
            // Overnight sessions reach back before today's schedule; cost
            // that part against yesterday's base prices.
            let yesterday_ev;
            if summary.started_at.with_timezone(&self.tz).date_naive() < today {
                let base = self.build_day(today - Duration::days(1), &snapshot);
                yesterday_ev = apply_ev_overlay(&base, &[], connected, snapshot.rates.rate_ev);
                schedules.push(&yesterday_ev);
            }
            self.history.lock().record(&summary, &schedules);
        }

        let charger = snapshot.charger.as_ref().map(|c| ChargerView {
            device_id: c.device_id.clone(),
            name: c.name.clone(),
            state: state.unwrap_or(ChargerState::Unknown),
            raw_state: c.raw_state.clone(),
            connected,
            boost_active: state.map_or(false, |s| s.is_boosting()),
            suspended: c.suspended,
            preferences: c.preferences.clone().unwrap_or_default(),
            windows_today: windows_today.clone(),
            windows_tomorrow: windows_tomorrow.clone(),
            last_transition,
            recent_transitions,
            last_session: self.history.lock().latest().cloned(),
        });

        PricingView {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            generated_at: now_utc,
            account_number: snapshot.account_number.clone(),
            ledgers: snapshot.ledgers.clone(),
            today: today_schedule,
            tomorrow: tomorrow_schedule,
            today_ev,
            tomorrow_ev,
            charger,
        }
    }

    fn build_day(&self, day: NaiveDate, snapshot: &AccountSnapshot) -> DaySchedule {
        self.builder
            .build(day, &snapshot.rates, snapshot.tariff_kind)
            .expect("48 half-hour labels are contiguous by construction")
    }

    /// Feed this refresh's observations through the state machine, one
    /// event at a time: session completion first (it must see the state
    /// that ran the session), then the reported state, then a window
    /// start derived from the fresh plan.
    fn advance_machine(
        &self,
        snapshot: &AccountSnapshot,
        windows_today: &[ChargingWindow],
        now_utc: DateTime<Utc>,
    ) -> (Option<ChargerState>, Option<StateTransition>, Option<SessionSummary>) {
        let Some(charger) = &snapshot.charger else {
            let machine = self.machine.lock();
            return (machine.state(), machine.last_transition(), None);
        };

        let mut machine = self.machine.lock();
        let mut completed = None;

        if let Some(session) = &charger.last_session {
            let is_new = self
                .history
                .lock()
                .latest()
                .map_or(true, |r| session.ended_at > r.completed_at);
            if is_new {
                if matches!(
                    machine.state(),
                    Some(ChargerState::SmartControl | ChargerState::BoostCharging)
                ) {
                    let _ = machine.apply(ChargerEvent::SessionCompleted, now_utc);
                    completed = Some(session.clone());
                } else if machine.state().is_none() {
                    // First snapshot after startup: surface the session the
                    // upstream already finished without forcing a transition.
                    completed = Some(session.clone());
                }
            }
        }

        match ChargerState::from_upstream(&charger.raw_state) {
            Some(observed) => {
                let window_active = windows_today.iter().any(|w| {
                    w.contains(now_utc.with_timezone(&self.tz).fixed_offset())
                });
                let keep_smart_control = observed == ChargerState::Connected
                    && machine.state() == Some(ChargerState::SmartControl)
                    && window_active;
                if !keep_smart_control {
                    let _ = machine.apply(ChargerEvent::Observed(observed), now_utc);
                }
                if machine.state() == Some(ChargerState::Connected) && window_active {
                    let _ = machine.apply(ChargerEvent::WindowStarted, now_utc);
                }
            }
            None => {
                warn!(raw_state = %charger.raw_state, "unrecognized upstream charger state");
                let _ = machine.apply(ChargerEvent::ReadFailed, now_utc);
            }
        }

        (machine.state(), machine.last_transition(), completed)
    }

    async fn device_id(&self) -> Result<String, CoreError> {
        if let Some(view) = self.view().await {
            if let Some(charger) = &view.charger {
                return Ok(charger.device_id.clone());
            }
            return Err(CoreError::InvalidCommand("account has no charger".to_string()));
        }
        self.refresh().await?;
        match self.view().await.as_ref().and_then(|v| v.charger.as_ref()) {
            Some(charger) => Ok(charger.device_id.clone()),
            None => Err(CoreError::InvalidCommand("account has no charger".to_string())),
        }
    }

    pub async fn start_boost(&self) -> Result<(), CoreError> {
        let device_id = self.device_id().await?;
        {
            let machine = self.machine.lock();
            match machine.state() {
                Some(ChargerState::Connected | ChargerState::SmartControl) => {}
                Some(ChargerState::BoostCharging) => {
                    return Err(CoreError::InvalidCommand("boost already active".to_string()));
                }
                other => {
                    return Err(CoreError::InvalidCommand(format!(
                        "cannot start boost while {}",
                        other.map_or_else(|| "unobserved".to_string(), |s| s.to_string())
                    )));
                }
            }
        }
        self.source
            .start_boost(&device_id)
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
        if let Err(e) = self.machine.lock().apply(ChargerEvent::BoostStarted, Utc::now()) {
            warn!(error = %e, "boost acknowledged upstream but not locally");
        }
        self.refresh_after_command().await;
        Ok(())
    }

    pub async fn stop_boost(&self) -> Result<(), CoreError> {
        let device_id = self.device_id().await?;
        if self.machine.lock().state() != Some(ChargerState::BoostCharging) {
            return Err(CoreError::InvalidCommand(
                "cannot stop boost: boost is not active".to_string(),
            ));
        }
        self.source
            .stop_boost(&device_id)
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
        if let Err(e) = self.machine.lock().apply(ChargerEvent::BoostEnded, Utc::now()) {
            warn!(error = %e, "boost stop acknowledged upstream but not locally");
        }
        self.refresh_after_command().await;
        Ok(())
    }

    pub async fn mark_connected(&self) -> Result<(), CoreError> {
        if let Err(e) = self.machine.lock().apply(ChargerEvent::CarPlugged, Utc::now()) {
            return Err(e);
        }
        self.refresh_after_command().await;
        Ok(())
    }

    pub async fn mark_disconnected(&self) -> Result<(), CoreError> {
        if let Err(e) = self.machine.lock().apply(ChargerEvent::CarUnplugged, Utc::now()) {
            return Err(e);
        }
        self.refresh_after_command().await;
        Ok(())
    }

    pub async fn set_preferences(
        &self,
        max_percentage: Option<u8>,
        target_time: Option<chrono::NaiveTime>,
    ) -> Result<ChargerPreferences, CoreError> {
        if let Some(pct) = max_percentage {
            if !(10..=100).contains(&pct) {
                return Err(CoreError::InvalidCommand(format!(
                    "max percentage {pct} outside 10..=100"
                )));
            }
        }
        let device_id = self.device_id().await?;
        let current = self
            .view()
            .await
            .as_ref()
            .and_then(|v| v.charger.as_ref().map(|c| c.preferences.clone()))
            .unwrap_or_default();
        let updated = ChargerPreferences {
            max_percentage: max_percentage.unwrap_or(current.max_percentage),
            target_time: target_time.unwrap_or(current.target_time),
            ..current
        };
        self.source
            .set_preferences(&device_id, &updated)
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
        self.refresh_after_command().await;
        Ok(updated)
    }

    /// Commands mirror the host integration: after the upstream accepts,
    /// pull a fresh snapshot so the published view reflects it. Best
    /// effort - the command itself already succeeded.
    async fn refresh_after_command(&self) {
        if let Err(e) = self.refresh_inner(true).await {
            warn!(error = %e, "post-command refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthConfig, RefreshConfig, ServerConfig, TariffConfig, UpstreamConfig,
    };
    use crate::domain::{SessionType, TariffKind, INTERVALS_PER_DAY};
    use crate::upstream::simulated::SimulatedAccountSource;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                enable_cors: false,
                request_timeout_secs: 5,
            },
            auth: AuthConfig { token: "testtoken".to_string() },
            upstream: UpstreamConfig {
                base_url: "http://localhost".to_string(),
                email: String::new(),
                password: String::new(),
                http_timeout_seconds: 5,
                account_number: None,
            },
            tariff: TariffConfig {
                timezone: "Europe/Madrid".to_string(),
                kind: TariffKind::Variable,
                dispatch_merge_minutes: 30,
                publish_tomorrow_after_hour: 0,
            },
            refresh: RefreshConfig { poll_seconds: 120, session_history_capacity: 50 },
        }
    }

    fn coordinator_with(source: &SimulatedAccountSource) -> AccountCoordinator {
        AccountCoordinator::new(Arc::new(source.clone()), &test_config()).unwrap()
    }

    #[tokio::test]
    async fn refresh_publishes_a_complete_view() {
        let source = SimulatedAccountSource::default_account();
        let coordinator = coordinator_with(&source);

        let generation = coordinator.refresh().await.unwrap();
        assert_eq!(generation, 1);

        let view = coordinator.view().await.unwrap();
        assert_eq!(view.today.intervals.len(), INTERVALS_PER_DAY);
        assert_eq!(view.today_ev.intervals.len(), INTERVALS_PER_DAY);
        assert!(view.tomorrow.is_some());
        assert_eq!(view.account_number, "ES-SIM-001");
        let charger = view.charger.as_ref().unwrap();
        assert_eq!(charger.state, ChargerState::Disconnected);
        assert!(!charger.connected);
    }

    #[tokio::test]
    async fn each_refresh_bumps_the_generation() {
        let source = SimulatedAccountSource::default_account();
        let coordinator = coordinator_with(&source);
        let first = coordinator.refresh().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = coordinator.refresh().await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn outage_keeps_last_known_good_and_marks_unknown() {
        let source = SimulatedAccountSource::default_account();
        let coordinator = coordinator_with(&source);
        coordinator.refresh().await.unwrap();

        source.fail_next_fetch().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamUnavailable(_)));

        let view = coordinator.view().await.unwrap();
        // Schedules survive, only the charger state degrades.
        assert_eq!(view.today.intervals.len(), INTERVALS_PER_DAY);
        assert_eq!(view.charger.as_ref().unwrap().state, ChargerState::Unknown);
    }

    #[tokio::test]
    async fn boost_commands_validate_against_the_machine() {
        let source = SimulatedAccountSource::default_account();
        let coordinator = coordinator_with(&source);
        coordinator.refresh().await.unwrap();

        // Disconnected: both commands refused, state untouched.
        let err = coordinator.start_boost().await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));
        let err = coordinator.stop_boost().await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));

        source.simulate_connect().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        coordinator.refresh().await.unwrap();
        let view = coordinator.view().await.unwrap();
        assert_eq!(view.charger.as_ref().unwrap().state, ChargerState::Connected);

        // Stop-boost while merely connected stays rejected.
        let err = coordinator.stop_boost().await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));

        coordinator.start_boost().await.unwrap();
        let view = coordinator.view().await.unwrap();
        let charger = view.charger.as_ref().unwrap();
        assert_eq!(charger.state, ChargerState::BoostCharging);
        assert!(charger.boost_active);

        coordinator.stop_boost().await.unwrap();
        let view = coordinator.view().await.unwrap();
        assert_eq!(view.charger.as_ref().unwrap().state, ChargerState::Connected);
    }

    #[tokio::test]
    async fn completed_session_lands_in_history() {
        let source = SimulatedAccountSource::default_account();
        let coordinator = coordinator_with(&source);
        source.simulate_connect().await;
        coordinator.refresh().await.unwrap();
        coordinator.start_boost().await.unwrap();

        let now = Utc::now();
        source
            .complete_session(SessionSummary {
                started_at: now - Duration::hours(2),
                ended_at: now,
                energy_added_kwh: 9.0,
                state_of_charge_final: Some(95.0),
                kind: SessionType::Boost,
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        coordinator.refresh().await.unwrap();

        let view = coordinator.view().await.unwrap();
        let charger = view.charger.as_ref().unwrap();
        let record = charger.last_session.as_ref().unwrap();
        assert_eq!(record.energy_added_kwh, 9.0);
        assert_eq!(record.duration_seconds, 7200);
        assert_eq!(record.kind, SessionType::Boost);
        // Machine settled back to connected after the stop.
        assert_eq!(charger.state, ChargerState::Connected);
    }

    #[tokio::test]
    async fn preferences_round_trip_to_the_source() {
        let source = SimulatedAccountSource::default_account();
        let coordinator = coordinator_with(&source);
        coordinator.refresh().await.unwrap();

        let updated = coordinator
            .set_preferences(Some(80), chrono::NaiveTime::from_hms_opt(8, 0, 0))
            .await
            .unwrap();
        assert_eq!(updated.max_percentage, 80);
        assert_eq!(source.preferences().await.max_percentage, 80);

        let err = coordinator.set_preferences(Some(5), None).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn mark_connected_and_disconnected_drive_the_machine() {
        let source = SimulatedAccountSource::default_account();
        let coordinator = coordinator_with(&source);
        coordinator.refresh().await.unwrap();

        // The explicit host command advances the machine; the simulated
        // upstream still reports disconnected, so the next refresh wins.
        source.simulate_connect().await;
        coordinator.mark_connected().await.unwrap();
        let view = coordinator.view().await.unwrap();
        let charger = view.charger.as_ref().unwrap();
        assert_eq!(charger.state, ChargerState::Connected);
        assert!(charger.connected);

        source.simulate_disconnect().await;
        coordinator.mark_disconnected().await.unwrap();
        let view = coordinator.view().await.unwrap();
        assert_eq!(view.charger.as_ref().unwrap().state, ChargerState::Disconnected);
    }
}
