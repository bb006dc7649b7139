//! Core data models for the booking payment and payout system
//!
//! Contains the booking payment record and its state machine, the payout
//! account record, and the append-only transfer attempt audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PayoutError;
use crate::PayoutResult;

/// Booking payment state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentStatus {
    /// Payment authorized but not yet captured
    Authorized,
    /// Family's payment captured at booking confirmation
    Captured,
    /// Capture settled; funds held in escrow awaiting release
    Held,
    /// Selected for release, transfer in flight
    Releasing,
    /// Funds transferred to the caregiver
    Released,
    /// Funds returned to the family
    Refunded,
    /// Release exhausted retries or hit a permanent failure; manual review
    ReleaseFailed,
}

impl BookingPaymentStatus {
    /// Check if this is a terminal state (immutable thereafter)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    /// Check if a refund is allowed from this state
    pub fn can_refund(&self) -> bool {
        matches!(self, Self::Captured | Self::Held)
    }

    /// Check if this state allows selection for release
    pub fn can_begin_release(&self) -> bool {
        matches!(self, Self::Held)
    }
}

/// Payout account onboarding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutAccountStatus {
    /// Caregiver has not started onboarding
    NotConnected,
    /// Onboarding begun, requirements outstanding at the processor
    Pending,
    /// Fully onboarded; transfers allowed
    Connected,
}

/// Coarse status shown to families and caregivers; internal error
/// detail never crosses this boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicPaymentStatus {
    Pending,
    Processing,
    Paid,
    Refunded,
    NeedsAttention,
}

/// Outcome of a single transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Transfer settled; funds left escrow
    Success,
    /// Retryable failure (network, rate limit, processor 5xx)
    TransientFailure,
    /// Fatal failure for this booking (account closed, compliance block)
    PermanentFailure,
}

/// Authoritative booking payment record, one per booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingPayment {
    pub booking_id: String,
    pub caregiver_id: String,

    // Amounts in integer minor currency units
    pub total_amount: i64,
    pub platform_fee_amount: i64,
    pub caregiver_amount: i64,

    // Owned exclusively by the escrow ledger
    pub status: BookingPaymentStatus,

    // Release scheduling
    pub completed_at: Option<DateTime<Utc>>,
    pub release_eligible_at: Option<DateTime<Utc>>,
    pub releasing_since: Option<DateTime<Utc>>,

    // Failure tracking
    pub release_attempts: u32,
    pub last_error: Option<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingPayment {
    /// Validate a state transition against the transition graph
    pub fn validate_transition(&self, to_status: BookingPaymentStatus) -> PayoutResult<()> {
        use BookingPaymentStatus::*;

        let valid = match (self.status, to_status) {
            (Authorized, Captured) => true,
            (Captured, Held) => true,
            (Held, Releasing) => true,
            (Releasing, Released) => true,
            // Re-entering Held is only allowed via explicit failure handling
            (Releasing, Held) => true,
            (Releasing, ReleaseFailed) => true,
            (_, Refunded) => self.status.can_refund(),
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(PayoutError::state_transition(
                format!("{:?}", self.status),
                format!("{:?}", to_status),
                "transition not in the booking payment state graph".to_string(),
            ))
        }
    }

    /// Fee split must reconcile exactly at all times
    pub fn check_amount_invariant(&self) -> PayoutResult<()> {
        if self.platform_fee_amount + self.caregiver_amount != self.total_amount {
            return Err(PayoutError::invariant(format!(
                "fee split does not reconcile for booking {}: {} + {} != {}",
                self.booking_id,
                self.platform_fee_amount,
                self.caregiver_amount,
                self.total_amount
            )));
        }
        Ok(())
    }

    /// Coarse status for external consumers
    pub fn public_status(&self) -> PublicPaymentStatus {
        match self.status {
            BookingPaymentStatus::Authorized
            | BookingPaymentStatus::Captured
            | BookingPaymentStatus::Held => PublicPaymentStatus::Pending,
            BookingPaymentStatus::Releasing => PublicPaymentStatus::Processing,
            BookingPaymentStatus::Released => PublicPaymentStatus::Paid,
            BookingPaymentStatus::Refunded => PublicPaymentStatus::Refunded,
            BookingPaymentStatus::ReleaseFailed => PublicPaymentStatus::NeedsAttention,
        }
    }
}

/// Payout account record, one per caregiver; created lazily on first
/// onboarding request, never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub caregiver_id: String,
    /// Reference into the external processor; None until onboarding begins
    pub external_account_ref: Option<String>,
    pub status: PayoutAccountStatus,
    /// Processor-reported requirements still blocking payouts
    pub outstanding_requirements: Vec<String>,
    /// Last time the status was confirmed against the processor
    pub checked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutAccount {
    /// Create a fresh, unconnected payout account
    pub fn new(caregiver_id: String, now: DateTime<Utc>) -> Self {
        Self {
            caregiver_id,
            external_account_ref: None,
            status: PayoutAccountStatus::NotConnected,
            outstanding_requirements: Vec::new(),
            checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A transfer may only be attempted when connected with no
    /// outstanding requirements
    pub fn is_transfer_eligible(&self) -> bool {
        self.status == PayoutAccountStatus::Connected && self.outstanding_requirements.is_empty()
    }
}

/// One row per release try; append-only audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub id: Uuid,
    pub booking_id: String,
    pub attempt_number: u32,
    pub outcome: TransferOutcome,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}
