//! Release scheduler - periodic escrow release driver
//!
//! Scans for held bookings past their eligibility threshold, claims each
//! through the ledger CAS, and hands winners to the transfer executor.
//! The periodic loop and the admin-triggered manual run are the same
//! `run_cycle_at`, so concurrent invocation from either source is safe:
//! both just race the CAS.
//!
//! Each cycle opens with a recovery sweep: rows stuck in `Releasing`
//! longer than the timeout (a crashed cycle, a hung processor call) are
//! returned to escrow so funds are never permanently stranded.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{
    executor::{AttemptResult, TransferExecutor},
    ledger::EscrowLedger,
    models::TransferOutcome,
    registry::PayoutAccountRegistry,
    PayoutResult,
};

/// Configuration for the release scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between periodic cycles
    pub interval_secs: u64,
    /// How long a row may sit in `Releasing` before the recovery sweep
    /// reclaims it
    pub releasing_timeout_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300, // 5 minutes
            releasing_timeout_secs: 900,
        }
    }
}

/// Counters for one scheduler cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Stale `Releasing` rows reclaimed by the recovery sweep
    pub swept: usize,
    /// Transfers settled this cycle
    pub released: usize,
    /// Transient failures queued for a later retry
    pub retried: usize,
    /// Bookings that landed in `ReleaseFailed`
    pub failed: usize,
    /// Due bookings skipped: ineligible payout account, or the CAS was
    /// lost to a concurrent run
    pub skipped: usize,
    /// Bookings whose pass errored (status lookup down, unexpected ledger
    /// state); left for a later cycle
    pub errored: usize,
}

/// Periodic driver for escrow releases
pub struct ReleaseScheduler {
    config: SchedulerConfig,
    ledger: Arc<EscrowLedger>,
    registry: Arc<PayoutAccountRegistry>,
    executor: Arc<TransferExecutor>,
}

impl ReleaseScheduler {
    pub fn new(
        config: SchedulerConfig,
        ledger: Arc<EscrowLedger>,
        registry: Arc<PayoutAccountRegistry>,
        executor: Arc<TransferExecutor>,
    ) -> Self {
        Self {
            config,
            ledger,
            registry,
            executor,
        }
    }

    /// Run cycles forever on the configured interval
    pub async fn run(&self) {
        let mut ticker = interval(std::time::Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval_secs,
            "release scheduler started"
        );
        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(stats) if stats == CycleStats::default() => {}
                Ok(stats) => info!(?stats, "release cycle finished"),
                Err(e) => error!(error = %e, "release cycle failed"),
            }
        }
    }

    /// Run one cycle at the current time
    pub async fn run_cycle(&self) -> PayoutResult<CycleStats> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle at an explicit time
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> PayoutResult<CycleStats> {
        let mut stats = CycleStats::default();

        // Recovery sweep: reclaim releases a crashed or hung cycle left
        // behind. Counts as a transient attempt so a repeatedly crashing
        // transfer still hits the cap instead of looping forever.
        let timeout = Duration::seconds(self.config.releasing_timeout_secs);
        for booking_id in self.ledger.stale_releasing(now, timeout).await {
            warn!(%booking_id, "reclaiming stale release");
            match self
                .ledger
                .complete_release(
                    &booking_id,
                    TransferOutcome::TransientFailure,
                    Some("release timed out with no outcome".to_string()),
                    now,
                )
                .await
            {
                Ok(_) => stats.swept += 1,
                Err(e) => {
                    error!(%booking_id, error = %e, "failed to reclaim stale release");
                    stats.errored += 1;
                }
            }
        }

        // One booking's failure never blocks the rest of the cycle; its
        // row is still Held (or recoverable Releasing) for the next pass.
        for payment in self.ledger.due_for_release(now).await {
            let booking_id = payment.booking_id;
            match self
                .release_one(&booking_id, &payment.caregiver_id, now)
                .await
            {
                Ok(None) => stats.skipped += 1,
                Ok(Some(AttemptResult::Released)) => stats.released += 1,
                Ok(Some(AttemptResult::Failed(TransferOutcome::TransientFailure))) => {
                    stats.retried += 1
                }
                Ok(Some(AttemptResult::Failed(_))) => stats.failed += 1,
                Ok(Some(AttemptResult::AccountNotReady)) => stats.skipped += 1,
                Err(e) => {
                    warn!(%booking_id, error = %e, "release pass errored, leaving for next cycle");
                    stats.errored += 1;
                }
            }
        }

        Ok(stats)
    }

    /// One booking's pass: pre-filter, CAS claim, transfer. `None` means
    /// the booking was not claimed (ineligible caregiver or a concurrent
    /// run won the CAS).
    async fn release_one(
        &self,
        booking_id: &str,
        caregiver_id: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<Option<AttemptResult>> {
        // Cheap pre-filter: don't claim a booking whose caregiver cannot
        // be paid yet. The executor rechecks after the CAS.
        if !self.registry.is_transfer_eligible(caregiver_id, now).await? {
            return Ok(None);
        }
        if !self.ledger.try_begin_release(booking_id, now).await? {
            return Ok(None);
        }
        Ok(Some(self.executor.attempt_transfer(booking_id, now).await?))
    }
}
