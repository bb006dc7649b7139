//! Booking payment escrow and caregiver payout engine
//!
//! Governs the money movement of a care-services marketplace: capturing a
//! family's payment at booking confirmation, holding it in escrow, verifying
//! the caregiver's payout-eligibility state, releasing funds on a 24h delay
//! after job completion, splitting the platform fee, and retrying failed
//! releases without ever double-paying or losing a booking's funds.

pub mod engine;
pub mod error;
pub mod executor;
pub mod fees;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod processor;
pub mod registry;
pub mod scheduler;

use error::PayoutError;

/// Result type alias for payout operations
pub type PayoutResult<T> = Result<T, PayoutError>;
