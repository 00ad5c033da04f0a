use thiserror::Error;

use crate::domain::Band;

/// Failures the core classifies and reports. None of these abort the
/// process: the service degrades to the best schedule/state computable
/// from the data it has.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("tariff data incomplete: missing {0} rate")]
    IncompleteTariffData(Band),

    #[error("malformed dispatch record: {0}")]
    MalformedDispatch(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
