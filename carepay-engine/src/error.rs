//! Error types for the payout engine
//!
//! Covers validation at the API boundary, payout-account readiness,
//! external processor failures (split into transient and permanent),
//! and invariant/state-machine violations inside the escrow ledger.

use thiserror::Error;

/// Main error type for booking payment and payout operations
#[derive(Error, Debug)]
pub enum PayoutError {
    /// Bad amounts/ids, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced booking or payout account does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The external processor rejected account creation or onboarding
    #[error("Account creation error: {0}")]
    AccountCreation(String),

    /// Transfer attempted while the payout account is not eligible;
    /// recoverable, retried automatically once the account connects
    #[error("Payout account not ready: {0}")]
    AccountNotReady(String),

    /// Retryable processor failure (network, rate limit, 5xx)
    #[error("Transient processor error: {0}")]
    TransientProcessor(String),

    /// Fatal processor failure for this booking (account closed, compliance block)
    #[error("Permanent processor error: {0}")]
    PermanentProcessor(String),

    /// CAS observed an unexpected state or a fee split failed to reconcile;
    /// never swallowed, halts that booking for manual review
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// State machine transition errors
    #[error("Invalid state transition: {from_status} -> {to_status}: {reason}")]
    StateTransition {
        from_status: String,
        to_status: String,
        reason: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PayoutError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an account creation error
    pub fn account_creation<S: Into<String>>(msg: S) -> Self {
        Self::AccountCreation(msg.into())
    }

    /// Create an account-not-ready error
    pub fn account_not_ready<S: Into<String>>(msg: S) -> Self {
        Self::AccountNotReady(msg.into())
    }

    /// Create a transient processor error
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::TransientProcessor(msg.into())
    }

    /// Create a permanent processor error
    pub fn permanent<S: Into<String>>(msg: S) -> Self {
        Self::PermanentProcessor(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a state transition error
    pub fn state_transition<S: Into<String>>(from_status: S, to_status: S, reason: S) -> Self {
        Self::StateTransition {
            from_status: from_status.into(),
            to_status: to_status.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}
