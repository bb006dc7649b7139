//! Escrow ledger - authoritative booking payment records and transitions
//!
//! The ledger exclusively owns `BookingPayment.status`. Every mutation goes
//! through a transition function here, each transition is validated against
//! the state graph, and the `Held -> Releasing` step is a compare-and-swap
//! under a single write lock so concurrent scheduler passes can never both
//! win the release of the same booking.
//!
//! Time-sensitive operations take an explicit `now` so callers control the
//! clock; the engine facade passes `Utc::now()`.

use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::PayoutError,
    fees,
    models::{BookingPayment, BookingPaymentStatus, TransferAttempt, TransferOutcome},
    notify::{PaymentEvent, PaymentEventSink},
    PayoutResult,
};

/// Configuration for the escrow ledger
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Holdback window between job completion and release eligibility
    pub holdback_secs: i64,
    /// Attempt cap before a booking lands in `ReleaseFailed`
    pub max_release_attempts: u32,
    /// Base delay for exponential retry backoff
    pub backoff_base_secs: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            holdback_secs: 86_400, // 24h, Airbnb-style delay after completion
            max_release_attempts: 5,
            backoff_base_secs: 60,
        }
    }
}

/// Authoritative store for booking payments and the transfer audit trail
pub struct EscrowLedger {
    config: LedgerConfig,
    /// In-memory payment storage keyed by booking id
    payments: Arc<RwLock<HashMap<String, BookingPayment>>>,
    /// Append-only transfer attempt rows
    attempts: Arc<RwLock<Vec<TransferAttempt>>>,
    /// Outbound event hook
    sink: Arc<dyn PaymentEventSink>,
}

impl EscrowLedger {
    /// Create a new ledger
    pub fn new(config: LedgerConfig, sink: Arc<dyn PaymentEventSink>) -> Self {
        Self {
            config,
            payments: Arc::new(RwLock::new(HashMap::new())),
            attempts: Arc::new(RwLock::new(Vec::new())),
            sink,
        }
    }

    /// Record a captured booking payment and its fee split
    pub async fn capture_payment(
        &self,
        booking_id: &str,
        caregiver_id: &str,
        total_amount: i64,
        fee_rate_percent: u32,
        now: DateTime<Utc>,
    ) -> PayoutResult<BookingPayment> {
        if booking_id.trim().is_empty() {
            return Err(PayoutError::validation("booking id cannot be empty"));
        }
        if caregiver_id.trim().is_empty() {
            return Err(PayoutError::validation("caregiver id cannot be empty"));
        }
        if total_amount <= 0 {
            return Err(PayoutError::validation(format!(
                "total amount must be positive, got {}",
                total_amount
            )));
        }

        let split = fees::compute_split(total_amount, fee_rate_percent)?;

        let payment = BookingPayment {
            booking_id: booking_id.to_string(),
            caregiver_id: caregiver_id.to_string(),
            total_amount,
            platform_fee_amount: split.platform_fee_amount,
            caregiver_amount: split.caregiver_amount,
            status: BookingPaymentStatus::Captured,
            completed_at: None,
            release_eligible_at: None,
            releasing_since: None,
            release_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        payment.check_amount_invariant()?;

        {
            let mut payments = self.payments.write().await;
            if payments.contains_key(booking_id) {
                return Err(PayoutError::validation(format!(
                    "booking {} already has a payment record",
                    booking_id
                )));
            }
            payments.insert(booking_id.to_string(), payment.clone());
        }

        info!(%booking_id, total_amount, "captured booking payment");
        self.emit(
            booking_id,
            BookingPaymentStatus::Authorized,
            BookingPaymentStatus::Captured,
            now,
        )
        .await;

        Ok(payment)
    }

    /// Move a captured payment into escrow once the capture settles
    pub async fn mark_held(&self, booking_id: &str, now: DateTime<Utc>) -> PayoutResult<BookingPayment> {
        let (old_status, payment) = {
            let mut payments = self.payments.write().await;
            let payment = Self::get_mut(&mut payments, booking_id)?;
            payment.validate_transition(BookingPaymentStatus::Held)?;
            let old_status = payment.status;
            payment.status = BookingPaymentStatus::Held;
            payment.updated_at = now;
            (old_status, payment.clone())
        };

        self.emit(booking_id, old_status, BookingPaymentStatus::Held, now)
            .await;
        Ok(payment)
    }

    /// Stamp job completion and schedule release eligibility
    pub async fn mark_completed(
        &self,
        booking_id: &str,
        completed_at: DateTime<Utc>,
    ) -> PayoutResult<BookingPayment> {
        let mut payments = self.payments.write().await;
        let payment = Self::get_mut(&mut payments, booking_id)?;

        if payment.status != BookingPaymentStatus::Held {
            return Err(PayoutError::validation(format!(
                "booking {} cannot be completed while {:?}",
                booking_id, payment.status
            )));
        }
        if payment.completed_at.is_some() {
            return Err(PayoutError::validation(format!(
                "booking {} is already marked completed",
                booking_id
            )));
        }

        let eligible_at = completed_at + Duration::seconds(self.config.holdback_secs);
        payment.completed_at = Some(completed_at);
        payment.release_eligible_at = Some(eligible_at);
        payment.updated_at = completed_at;

        info!(
            %booking_id,
            release_eligible_at = %eligible_at,
            "booking completed, release scheduled"
        );
        Ok(payment.clone())
    }

    /// Atomically claim a booking for release.
    ///
    /// Succeeds only when the row is `Held` and past its eligibility
    /// threshold; exactly one of N concurrent callers observes `true`.
    pub async fn try_begin_release(
        &self,
        booking_id: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<bool> {
        let old_status = {
            let mut payments = self.payments.write().await;
            let payment = Self::get_mut(&mut payments, booking_id)?;

            if !payment.status.can_begin_release() {
                return Ok(false);
            }
            match payment.release_eligible_at {
                Some(eligible_at) if eligible_at <= now => {}
                _ => return Ok(false),
            }

            payment.validate_transition(BookingPaymentStatus::Releasing)?;
            let old_status = payment.status;
            payment.status = BookingPaymentStatus::Releasing;
            payment.releasing_since = Some(now);
            payment.updated_at = now;
            old_status
        };

        self.emit(booking_id, old_status, BookingPaymentStatus::Releasing, now)
            .await;
        Ok(true)
    }

    /// Finish a release attempt with the transfer outcome.
    ///
    /// Success settles to `Released`. A transient failure returns the row
    /// to `Held` with exponential backoff pushed into the eligibility time,
    /// until the attempt cap moves it to `ReleaseFailed`. Permanent failures
    /// go straight to `ReleaseFailed`. Every call appends one audit row.
    pub async fn complete_release(
        &self,
        booking_id: &str,
        outcome: TransferOutcome,
        error_detail: Option<String>,
        now: DateTime<Utc>,
    ) -> PayoutResult<BookingPayment> {
        let (old_status, payment) = {
            let mut payments = self.payments.write().await;
            let payment = Self::get_mut(&mut payments, booking_id)?;

            if payment.status != BookingPaymentStatus::Releasing {
                return Err(PayoutError::invariant(format!(
                    "complete_release on booking {} in unexpected state {:?}",
                    booking_id, payment.status
                )));
            }

            let old_status = payment.status;
            let attempt_number = payment.release_attempts + 1;
            payment.release_attempts = attempt_number;

            match outcome {
                TransferOutcome::Success => {
                    payment.validate_transition(BookingPaymentStatus::Released)?;
                    payment.status = BookingPaymentStatus::Released;
                    payment.releasing_since = None;
                    payment.last_error = None;
                }
                TransferOutcome::TransientFailure
                    if attempt_number < self.config.max_release_attempts =>
                {
                    payment.validate_transition(BookingPaymentStatus::Held)?;
                    payment.status = BookingPaymentStatus::Held;
                    payment.releasing_since = None;
                    payment.last_error = error_detail.clone();
                    // Exponential backoff, realized through the eligibility
                    // time so the retry cadence survives restarts
                    let backoff_secs =
                        self.config.backoff_base_secs << (attempt_number - 1).min(16);
                    payment.release_eligible_at = Some(now + Duration::seconds(backoff_secs));
                }
                TransferOutcome::TransientFailure | TransferOutcome::PermanentFailure => {
                    payment.validate_transition(BookingPaymentStatus::ReleaseFailed)?;
                    payment.status = BookingPaymentStatus::ReleaseFailed;
                    payment.releasing_since = None;
                    payment.last_error = error_detail.clone();
                }
            }
            payment.updated_at = now;
            payment.check_amount_invariant()?;

            self.attempts.write().await.push(TransferAttempt {
                id: Uuid::new_v4(),
                booking_id: booking_id.to_string(),
                attempt_number,
                outcome,
                error_detail,
                created_at: now,
            });

            (old_status, payment.clone())
        };

        if payment.status == BookingPaymentStatus::ReleaseFailed {
            warn!(
                %booking_id,
                attempts = payment.release_attempts,
                error = payment.last_error.as_deref().unwrap_or(""),
                "release failed, booking needs manual review"
            );
        }
        self.emit(booking_id, old_status, payment.status, now).await;
        Ok(payment)
    }

    /// Return an in-flight release to `Held` without consuming an attempt.
    ///
    /// Used when the payout account turns out to be ineligible at transfer
    /// time: no processor call was made, so nothing lands in the audit trail
    /// and the booking is retried automatically once the account connects.
    pub async fn abort_release(
        &self,
        booking_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<BookingPayment> {
        let (old_status, payment) = {
            let mut payments = self.payments.write().await;
            let payment = Self::get_mut(&mut payments, booking_id)?;

            if payment.status != BookingPaymentStatus::Releasing {
                return Err(PayoutError::invariant(format!(
                    "abort_release on booking {} in unexpected state {:?}",
                    booking_id, payment.status
                )));
            }

            let old_status = payment.status;
            payment.status = BookingPaymentStatus::Held;
            payment.releasing_since = None;
            payment.last_error = Some(reason.to_string());
            payment.updated_at = now;
            (old_status, payment.clone())
        };

        info!(%booking_id, reason, "release aborted, returned to escrow");
        self.emit(booking_id, old_status, BookingPaymentStatus::Held, now)
            .await;
        Ok(payment)
    }

    /// Refund a booking that has not yet paid out.
    ///
    /// Refunding a `Released` booking is an invariant violation: the funds
    /// already left escrow.
    pub async fn refund(
        &self,
        booking_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<BookingPayment> {
        let (old_status, payment) = {
            let mut payments = self.payments.write().await;
            let payment = Self::get_mut(&mut payments, booking_id)?;

            if payment.status == BookingPaymentStatus::Released {
                return Err(PayoutError::invariant(format!(
                    "cannot refund booking {}: funds already released to caregiver",
                    booking_id
                )));
            }
            payment.validate_transition(BookingPaymentStatus::Refunded)?;

            let old_status = payment.status;
            payment.status = BookingPaymentStatus::Refunded;
            payment.last_error = None;
            payment.updated_at = now;
            (old_status, payment.clone())
        };

        info!(%booking_id, reason, "booking payment refunded");
        self.emit(booking_id, old_status, BookingPaymentStatus::Refunded, now)
            .await;
        Ok(payment)
    }

    /// Held rows past their eligibility threshold
    pub async fn due_for_release(&self, now: DateTime<Utc>) -> Vec<BookingPayment> {
        self.payments
            .read()
            .await
            .values()
            .filter(|p| {
                p.status == BookingPaymentStatus::Held
                    && matches!(p.release_eligible_at, Some(t) if t <= now)
            })
            .cloned()
            .collect()
    }

    /// Releasing rows with no terminal outcome after `timeout`; input to
    /// the crash-recovery sweep
    pub async fn stale_releasing(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.payments
            .read()
            .await
            .values()
            .filter(|p| {
                p.status == BookingPaymentStatus::Releasing
                    && matches!(p.releasing_since, Some(t) if now - t >= timeout)
            })
            .map(|p| p.booking_id.clone())
            .collect()
    }

    /// Get a booking payment by id
    pub async fn get(&self, booking_id: &str) -> PayoutResult<BookingPayment> {
        self.payments
            .read()
            .await
            .get(booking_id)
            .cloned()
            .ok_or_else(|| {
                PayoutError::not_found(format!("no payment record for booking {}", booking_id))
            })
    }

    /// Audit trail for a booking
    pub async fn attempts_for(&self, booking_id: &str) -> Vec<TransferAttempt> {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.booking_id == booking_id)
            .cloned()
            .collect()
    }

    fn get_mut<'a>(
        payments: &'a mut HashMap<String, BookingPayment>,
        booking_id: &str,
    ) -> PayoutResult<&'a mut BookingPayment> {
        payments.get_mut(booking_id).ok_or_else(|| {
            PayoutError::not_found(format!("no payment record for booking {}", booking_id))
        })
    }

    async fn emit(
        &self,
        booking_id: &str,
        old_status: BookingPaymentStatus,
        new_status: BookingPaymentStatus,
        at: DateTime<Utc>,
    ) {
        self.sink
            .publish(PaymentEvent::BookingPaymentStateChanged {
                booking_id: booking_id.to_string(),
                old_status,
                new_status,
                at,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogEventSink;

    fn ledger() -> Arc<EscrowLedger> {
        Arc::new(EscrowLedger::new(
            LedgerConfig::default(),
            Arc::new(LogEventSink),
        ))
    }

    async fn held_booking(ledger: &EscrowLedger, now: DateTime<Utc>) -> BookingPayment {
        ledger
            .capture_payment("bk_1", "cg_1", 24000, 10, now)
            .await
            .unwrap();
        ledger.mark_held("bk_1", now).await.unwrap();
        ledger.mark_completed("bk_1", now).await.unwrap()
    }

    #[tokio::test]
    async fn capture_computes_split_and_holds() {
        let ledger = ledger();
        let now = Utc::now();
        let payment = ledger
            .capture_payment("bk_1", "cg_1", 24000, 10, now)
            .await
            .unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::Captured);
        assert_eq!(payment.platform_fee_amount, 2400);
        assert_eq!(payment.caregiver_amount, 21600);

        let payment = ledger.mark_held("bk_1", now).await.unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::Held);
    }

    #[tokio::test]
    async fn capture_rejects_bad_amounts_and_duplicates() {
        let ledger = ledger();
        let now = Utc::now();
        assert!(matches!(
            ledger
                .capture_payment("bk_1", "cg_1", 0, 10, now)
                .await
                .unwrap_err(),
            PayoutError::Validation(_)
        ));
        ledger
            .capture_payment("bk_1", "cg_1", 100, 10, now)
            .await
            .unwrap();
        assert!(ledger
            .capture_payment("bk_1", "cg_1", 100, 10, now)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn release_respects_eligibility_boundary() {
        let ledger = ledger();
        let completed_at = Utc::now();
        let payment = held_booking(&ledger, completed_at).await;
        let eligible_at = payment.release_eligible_at.unwrap();

        // One second early: no claim
        assert!(!ledger
            .try_begin_release("bk_1", eligible_at - Duration::seconds(1))
            .await
            .unwrap());
        // Exactly at the threshold: claim succeeds
        assert!(ledger.try_begin_release("bk_1", eligible_at).await.unwrap());

        // Reset and test one second late on a fresh booking
        let ledger = self::ledger();
        let payment = held_booking(&ledger, completed_at).await;
        let eligible_at = payment.release_eligible_at.unwrap();
        assert!(ledger
            .try_begin_release("bk_1", eligible_at + Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn not_completed_bookings_are_never_due() {
        let ledger = ledger();
        let now = Utc::now();
        ledger
            .capture_payment("bk_1", "cg_1", 5000, 10, now)
            .await
            .unwrap();
        ledger.mark_held("bk_1", now).await.unwrap();

        assert!(!ledger.try_begin_release("bk_1", now).await.unwrap());
        assert!(ledger
            .due_for_release(now + Duration::days(365))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_release_claims_have_one_winner() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let claim_at = now + Duration::seconds(86_401);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.try_begin_release("bk_1", claim_at).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one claim must win the CAS");
    }

    #[tokio::test]
    async fn successful_release_is_terminal() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let claim_at = now + Duration::seconds(86_400);
        assert!(ledger.try_begin_release("bk_1", claim_at).await.unwrap());

        let payment = ledger
            .complete_release("bk_1", TransferOutcome::Success, None, claim_at)
            .await
            .unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::Released);
        assert_eq!(payment.release_attempts, 1);

        // Terminal: no further claims, no refund
        assert!(!ledger
            .try_begin_release("bk_1", claim_at + Duration::days(1))
            .await
            .unwrap());
        assert!(matches!(
            ledger.refund("bk_1", "cancelled", claim_at).await.unwrap_err(),
            PayoutError::InvariantViolation(_)
        ));
    }

    #[tokio::test]
    async fn transient_failure_backs_off_then_exhausts_to_failed() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let mut at = now + Duration::seconds(86_400);

        for attempt in 1..5u32 {
            assert!(ledger.try_begin_release("bk_1", at).await.unwrap());
            let payment = ledger
                .complete_release(
                    "bk_1",
                    TransferOutcome::TransientFailure,
                    Some("rate limited".to_string()),
                    at,
                )
                .await
                .unwrap();
            assert_eq!(payment.status, BookingPaymentStatus::Held);
            assert_eq!(payment.release_attempts, attempt);

            let eligible_at = payment.release_eligible_at.unwrap();
            assert!(eligible_at > at, "backoff must push eligibility forward");
            // Not due again until the backoff elapses
            assert!(!ledger.try_begin_release("bk_1", at).await.unwrap());
            at = eligible_at;
        }

        // Fifth transient failure hits the cap
        assert!(ledger.try_begin_release("bk_1", at).await.unwrap());
        let payment = ledger
            .complete_release(
                "bk_1",
                TransferOutcome::TransientFailure,
                Some("still down".to_string()),
                at,
            )
            .await
            .unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::ReleaseFailed);
        assert_eq!(payment.release_attempts, 5);
        assert_eq!(payment.last_error.as_deref(), Some("still down"));

        // Halted: repeated scheduler passes see nothing to do
        assert!(!ledger
            .try_begin_release("bk_1", at + Duration::days(1))
            .await
            .unwrap());
        assert!(ledger
            .due_for_release(at + Duration::days(1))
            .await
            .is_empty());
        assert_eq!(ledger.attempts_for("bk_1").await.len(), 5);
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let at = now + Duration::seconds(86_400);
        assert!(ledger.try_begin_release("bk_1", at).await.unwrap());

        let payment = ledger
            .complete_release(
                "bk_1",
                TransferOutcome::PermanentFailure,
                Some("account closed".to_string()),
                at,
            )
            .await
            .unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::ReleaseFailed);
        assert_eq!(payment.release_attempts, 1);
    }

    #[tokio::test]
    async fn complete_release_rejects_unexpected_state() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;

        assert!(matches!(
            ledger
                .complete_release("bk_1", TransferOutcome::Success, None, now)
                .await
                .unwrap_err(),
            PayoutError::InvariantViolation(_)
        ));
    }

    #[tokio::test]
    async fn abort_release_returns_to_held_without_attempt() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let at = now + Duration::seconds(86_400);
        assert!(ledger.try_begin_release("bk_1", at).await.unwrap());

        let payment = ledger
            .abort_release("bk_1", "payout account not ready", at)
            .await
            .unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::Held);
        assert_eq!(payment.release_attempts, 0);
        assert!(ledger.attempts_for("bk_1").await.is_empty());
    }

    #[tokio::test]
    async fn refund_from_captured_succeeds() {
        let ledger = ledger();
        let now = Utc::now();
        ledger
            .capture_payment("bk_1", "cg_1", 100, 10, now)
            .await
            .unwrap();
        let payment = ledger.refund("bk_1", "booking cancelled", now).await.unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn refund_from_held_succeeds() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let payment = ledger.refund("bk_1", "disputed", now).await.unwrap();
        assert_eq!(payment.status, BookingPaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn refund_rejected_mid_release() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let at = now + Duration::seconds(86_400);
        assert!(ledger.try_begin_release("bk_1", at).await.unwrap());
        assert!(matches!(
            ledger.refund("bk_1", "cancelled", at).await.unwrap_err(),
            PayoutError::StateTransition { .. }
        ));
    }

    #[tokio::test]
    async fn stale_releasing_rows_are_reported() {
        let ledger = ledger();
        let now = Utc::now();
        held_booking(&ledger, now).await;
        let at = now + Duration::seconds(86_400);
        assert!(ledger.try_begin_release("bk_1", at).await.unwrap());

        let timeout = Duration::minutes(15);
        assert!(ledger.stale_releasing(at, timeout).await.is_empty());
        assert!(ledger
            .stale_releasing(at + Duration::minutes(14), timeout)
            .await
            .is_empty());
        let stale = ledger
            .stale_releasing(at + Duration::minutes(15), timeout)
            .await;
        assert_eq!(stale, vec!["bk_1".to_string()]);
    }
}
