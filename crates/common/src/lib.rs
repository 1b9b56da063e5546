//! Shared primitives used across the workspace: strongly typed identifiers
//! and an injectable clock.

pub mod clock;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use types::{CorrelationId, EventId, IdError};

