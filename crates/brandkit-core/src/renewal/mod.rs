//! Access token renewal.
//!
//! - `SingleFlightRenewer`: reactive renewal, at most one refresh call in
//!   flight per context
//! - `RenewalScheduler`: proactive renewal on a timer shortly before expiry

pub mod error;
pub mod scheduler;
pub mod single_flight;

pub use error::RenewalError;
pub use scheduler::{RenewalScheduler, DEFAULT_RENEWAL_MARGIN_SECS, MIN_RENEWAL_INTERVAL};
pub use single_flight::{RenewalState, SingleFlightRenewer};
