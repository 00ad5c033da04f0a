pub mod calendar;
pub mod charger;
pub mod dispatch;
pub mod schedule;
pub mod snapshot;
pub mod tariff;

pub use calendar::*;
pub use charger::*;
pub use dispatch::*;
pub use schedule::*;
pub use snapshot::*;
pub use tariff::*;
