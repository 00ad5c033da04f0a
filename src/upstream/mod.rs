pub mod kraken;
#[cfg(any(feature = "sim", test))]
pub mod simulated;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AccountSnapshot, ChargerPreferences};

/// Errors from the account/charger data collaborator. Retry and backoff
/// policy live with the caller of the collaborator, not here.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// The account/charger data collaborator. The core consumes snapshots as
/// values and forwards commands; all network I/O, timeouts and
/// cancellation belong behind this trait.
#[async_trait]
pub trait AccountDataSource: Send + Sync {
    /// One consistent read of account + charger state.
    async fn fetch_snapshot(&self) -> Result<AccountSnapshot, SourceError>;

    async fn start_boost(&self, device_id: &str) -> Result<(), SourceError>;

    async fn stop_boost(&self, device_id: &str) -> Result<(), SourceError>;

    async fn set_preferences(
        &self,
        device_id: &str,
        preferences: &ChargerPreferences,
    ) -> Result<(), SourceError>;
}
