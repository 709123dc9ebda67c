mod part;
mod schedule;
mod transport;

pub use part::{PartConfig, ScheduledPart};
pub use schedule::{DEFAULT_MAX_EVENTS, Schedule, ScheduledEvent};
pub use transport::{Transport, TransportState};
