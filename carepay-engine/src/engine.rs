//! Payout engine - high-level API over the escrow components
//!
//! Wires the ledger, payout account registry, transfer executor and
//! release scheduler together and exposes the operations the HTTP layer
//! calls. Presentation layers consume this read-only; all authoritative
//! state lives behind it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::{
    executor::TransferExecutor,
    fees::DEFAULT_FEE_RATE_PERCENT,
    ledger::{EscrowLedger, LedgerConfig},
    models::{BookingPayment, PayoutAccount, PublicPaymentStatus, TransferAttempt},
    notify::PaymentEventSink,
    processor::{OnboardingProfile, PaymentProcessor},
    registry::{OnboardingHandle, PayoutAccountRegistry, RegistryConfig},
    scheduler::{CycleStats, ReleaseScheduler, SchedulerConfig},
    PayoutResult,
};

/// Configuration for the payout engine
#[derive(Debug, Clone)]
pub struct PayoutEngineConfig {
    /// Platform fee rate in whole percent
    pub fee_rate_percent: u32,
    /// Escrow ledger configuration
    pub ledger: LedgerConfig,
    /// Payout account registry configuration
    pub registry: RegistryConfig,
    /// Release scheduler configuration
    pub scheduler: SchedulerConfig,
}

impl Default for PayoutEngineConfig {
    fn default() -> Self {
        Self {
            fee_rate_percent: DEFAULT_FEE_RATE_PERCENT,
            ledger: LedgerConfig::default(),
            registry: RegistryConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Coarse booking payment view for families and caregivers
#[derive(Debug, Clone, serde::Serialize)]
pub struct BookingPaymentView {
    pub booking_id: String,
    pub status: PublicPaymentStatus,
    pub total_amount: i64,
}

/// Main engine coordinating all payout components
pub struct PayoutEngine {
    config: PayoutEngineConfig,
    ledger: Arc<EscrowLedger>,
    registry: Arc<PayoutAccountRegistry>,
    scheduler: Arc<ReleaseScheduler>,
}

impl PayoutEngine {
    /// Create a new engine with all components wired
    pub fn new(
        config: PayoutEngineConfig,
        processor: Arc<dyn PaymentProcessor>,
        sink: Arc<dyn PaymentEventSink>,
    ) -> Self {
        info!("initializing payout engine");

        let ledger = Arc::new(EscrowLedger::new(config.ledger.clone(), sink.clone()));
        let registry = Arc::new(PayoutAccountRegistry::new(
            config.registry.clone(),
            processor.clone(),
            sink,
        ));
        let executor = Arc::new(TransferExecutor::new(
            ledger.clone(),
            registry.clone(),
            processor,
        ));
        let scheduler = Arc::new(ReleaseScheduler::new(
            config.scheduler.clone(),
            ledger.clone(),
            registry.clone(),
            executor,
        ));

        Self {
            config,
            ledger,
            registry,
            scheduler,
        }
    }

    /// Scheduler handle for spawning the periodic loop
    pub fn scheduler(&self) -> Arc<ReleaseScheduler> {
        self.scheduler.clone()
    }

    /// Record a confirmed booking's captured payment and move it into escrow
    pub async fn capture_payment(
        &self,
        booking_id: &str,
        caregiver_id: &str,
        total_amount: i64,
    ) -> PayoutResult<BookingPayment> {
        let now = Utc::now();
        self.ledger
            .capture_payment(
                booking_id,
                caregiver_id,
                total_amount,
                self.config.fee_rate_percent,
                now,
            )
            .await?;
        self.ledger.mark_held(booking_id, now).await
    }

    /// Job-completion event from the booking workflow; starts the holdback
    pub async fn mark_job_completed(
        &self,
        booking_id: &str,
        completed_at: Option<DateTime<Utc>>,
    ) -> PayoutResult<BookingPayment> {
        self.ledger
            .mark_completed(booking_id, completed_at.unwrap_or_else(Utc::now))
            .await
    }

    /// Refund a cancelled or disputed booking
    pub async fn refund(&self, booking_id: &str, reason: &str) -> PayoutResult<BookingPayment> {
        self.ledger.refund(booking_id, reason, Utc::now()).await
    }

    /// Coarse status for UI widgets; never exposes internal error detail
    pub async fn booking_status(&self, booking_id: &str) -> PayoutResult<BookingPaymentView> {
        let payment = self.ledger.get(booking_id).await?;
        Ok(BookingPaymentView {
            booking_id: payment.booking_id.clone(),
            status: payment.public_status(),
            total_amount: payment.total_amount,
        })
    }

    /// Full audit trail for a booking (admin surface)
    pub async fn booking_audit_trail(&self, booking_id: &str) -> PayoutResult<Vec<TransferAttempt>> {
        // Ensure the booking exists so unknown ids 404 instead of []
        self.ledger.get(booking_id).await?;
        Ok(self.ledger.attempts_for(booking_id).await)
    }

    /// Begin or resume payout onboarding for a caregiver
    pub async fn begin_onboarding(
        &self,
        caregiver_id: &str,
        profile: &OnboardingProfile,
    ) -> PayoutResult<OnboardingHandle> {
        self.registry
            .begin_onboarding(caregiver_id, profile, Utc::now())
            .await
    }

    /// Current payout account state (local row)
    pub async fn account_status(&self, caregiver_id: &str) -> PayoutResult<PayoutAccount> {
        self.registry.get(caregiver_id).await
    }

    /// Force a re-query of the processor for a caregiver's account
    pub async fn refresh_account(&self, caregiver_id: &str) -> PayoutResult<PayoutAccount> {
        self.registry.refresh_status(caregiver_id, Utc::now()).await
    }

    /// Inbound processor webhook for account updates
    pub async fn handle_account_webhook(
        &self,
        caregiver_id: &str,
        external_account_ref: &str,
        status: crate::models::PayoutAccountStatus,
        outstanding_requirements: Vec<String>,
    ) -> PayoutResult<PayoutAccount> {
        self.registry
            .handle_account_updated(
                caregiver_id,
                external_account_ref,
                status,
                outstanding_requirements,
                Utc::now(),
            )
            .await
    }

    /// Manually trigger one release cycle; same idempotency guarantees as
    /// the periodic run
    pub async fn run_release_cycle(&self) -> PayoutResult<CycleStats> {
        self.scheduler.run_cycle().await
    }
}
