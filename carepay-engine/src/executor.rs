//! Transfer executor - settles claimed releases against the processor
//!
//! Runs exactly one transfer attempt for a booking the scheduler has
//! already claimed (`Releasing`). Eligibility of the payout account is
//! rechecked at call time rather than trusted from an earlier read, and
//! each attempt is all-or-nothing from the ledger's perspective.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    error::PayoutError,
    ledger::EscrowLedger,
    models::{BookingPaymentStatus, TransferOutcome},
    processor::{PaymentProcessor, ProcessorError},
    registry::PayoutAccountRegistry,
    PayoutResult,
};

/// Result of one executor invocation for a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Released,
    /// Transient failure or exhausted cap; the ledger decided which
    Failed(TransferOutcome),
    /// Payout account ineligible at call time; booking returned to escrow
    /// untouched and retried automatically once the account connects
    AccountNotReady,
}

/// Executes transfers for bookings in `Releasing`
pub struct TransferExecutor {
    ledger: Arc<EscrowLedger>,
    registry: Arc<PayoutAccountRegistry>,
    processor: Arc<dyn PaymentProcessor>,
}

impl TransferExecutor {
    pub fn new(
        ledger: Arc<EscrowLedger>,
        registry: Arc<PayoutAccountRegistry>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        Self {
            ledger,
            registry,
            processor,
        }
    }

    /// Attempt settlement for a booking already claimed for release.
    ///
    /// Exactly `caregiver_amount` moves, or nothing does; the outcome is
    /// reported to the ledger which owns the resulting transition.
    pub async fn attempt_transfer(
        &self,
        booking_id: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<AttemptResult> {
        let payment = self.ledger.get(booking_id).await?;
        if payment.status != BookingPaymentStatus::Releasing {
            return Err(PayoutError::invariant(format!(
                "transfer attempted for booking {} in state {:?}",
                booking_id, payment.status
            )));
        }
        payment.check_amount_invariant()?;

        // Recheck at call time on a freshness-bounded read
        if !self
            .registry
            .is_transfer_eligible(&payment.caregiver_id, now)
            .await?
        {
            warn!(
                %booking_id,
                caregiver_id = %payment.caregiver_id,
                "payout account not ready, returning booking to escrow"
            );
            self.ledger
                .abort_release(booking_id, "payout account not ready", now)
                .await?;
            return Ok(AttemptResult::AccountNotReady);
        }

        let account = self.registry.get(&payment.caregiver_id).await?;
        let account_ref = account.external_account_ref.ok_or_else(|| {
            PayoutError::account_not_ready(format!(
                "caregiver {} has no external account",
                payment.caregiver_id
            ))
        })?;

        match self
            .processor
            .create_transfer(&account_ref, payment.caregiver_amount, booking_id)
            .await
        {
            Ok(receipt) => {
                if receipt.amount != payment.caregiver_amount {
                    // The processor settled a different amount than escrow
                    // holds for the caregiver; halt this booking for review
                    let detail = format!(
                        "processor settled {} but caregiver amount is {}",
                        receipt.amount, payment.caregiver_amount
                    );
                    error!(%booking_id, %detail, "transfer amount mismatch");
                    self.ledger
                        .complete_release(
                            booking_id,
                            TransferOutcome::PermanentFailure,
                            Some(detail.clone()),
                            now,
                        )
                        .await?;
                    return Err(PayoutError::invariant(detail));
                }

                info!(
                    %booking_id,
                    transfer_ref = %receipt.transfer_ref,
                    amount = receipt.amount,
                    "transfer settled"
                );
                self.ledger
                    .complete_release(booking_id, TransferOutcome::Success, None, now)
                    .await?;
                Ok(AttemptResult::Released)
            }
            Err(ProcessorError::Transient(detail)) => {
                warn!(%booking_id, %detail, "transient transfer failure");
                self.ledger
                    .complete_release(
                        booking_id,
                        TransferOutcome::TransientFailure,
                        Some(detail),
                        now,
                    )
                    .await?;
                Ok(AttemptResult::Failed(TransferOutcome::TransientFailure))
            }
            Err(ProcessorError::Permanent(detail)) => {
                error!(%booking_id, %detail, "permanent transfer failure");
                self.ledger
                    .complete_release(
                        booking_id,
                        TransferOutcome::PermanentFailure,
                        Some(detail),
                        now,
                    )
                    .await?;
                Ok(AttemptResult::Failed(TransferOutcome::PermanentFailure))
            }
        }
    }
}
