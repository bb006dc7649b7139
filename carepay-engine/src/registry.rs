//! Payout account registry - caregiver onboarding state
//!
//! Tracks each caregiver's external-settlement onboarding state and
//! exclusively owns `PayoutAccount.status`. Local rows are a bounded-
//! staleness cache over the processor: any read that feeds a release
//! decision refreshes rows older than the freshness window first.

use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    error::PayoutError,
    models::{PayoutAccount, PayoutAccountStatus},
    notify::{PaymentEvent, PaymentEventSink},
    processor::{OnboardingProfile, PaymentProcessor, ProcessorAccount, ProcessorError},
    PayoutResult,
};

/// Configuration for the payout account registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum age of a cached account status feeding a transfer decision
    pub freshness_window_secs: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 300,
        }
    }
}

/// Result of beginning or resuming onboarding
#[derive(Debug, Clone)]
pub struct OnboardingHandle {
    pub external_account_ref: String,
    /// Hosted onboarding URL, opaque to this core
    pub onboarding_url: Option<String>,
}

/// Registry of caregiver payout accounts
pub struct PayoutAccountRegistry {
    config: RegistryConfig,
    /// In-memory account storage keyed by caregiver id
    accounts: Arc<RwLock<HashMap<String, PayoutAccount>>>,
    processor: Arc<dyn PaymentProcessor>,
    sink: Arc<dyn PaymentEventSink>,
}

impl PayoutAccountRegistry {
    /// Create a new registry
    pub fn new(
        config: RegistryConfig,
        processor: Arc<dyn PaymentProcessor>,
        sink: Arc<dyn PaymentEventSink>,
    ) -> Self {
        Self {
            config,
            accounts: Arc::new(RwLock::new(HashMap::new())),
            processor,
            sink,
        }
    }

    /// Begin or resume onboarding for a caregiver.
    ///
    /// Idempotent per caregiver: a second call resumes against the existing
    /// external account instead of creating a duplicate.
    pub async fn begin_onboarding(
        &self,
        caregiver_id: &str,
        profile: &OnboardingProfile,
        now: DateTime<Utc>,
    ) -> PayoutResult<OnboardingHandle> {
        if caregiver_id.trim().is_empty() {
            return Err(PayoutError::validation("caregiver id cannot be empty"));
        }

        let existing_ref = {
            let accounts = self.accounts.read().await;
            accounts
                .get(caregiver_id)
                .and_then(|a| a.external_account_ref.clone())
        };

        let remote = match existing_ref {
            // Resume: re-query for a fresh onboarding link
            Some(ref account_ref) => self.processor.account_status(account_ref).await,
            None => self.processor.create_account(caregiver_id, profile).await,
        }
        .map_err(|e| match e {
            ProcessorError::Transient(msg) => PayoutError::transient(msg),
            ProcessorError::Permanent(msg) => PayoutError::account_creation(msg),
        })?;

        self.store_remote(caregiver_id, &remote, now).await;
        info!(
            %caregiver_id,
            account_ref = %remote.account_ref,
            "payout onboarding begun"
        );

        Ok(OnboardingHandle {
            external_account_ref: remote.account_ref,
            onboarding_url: remote.onboarding_url,
        })
    }

    /// Re-query the processor and update the local row
    pub async fn refresh_status(
        &self,
        caregiver_id: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<PayoutAccount> {
        let account = self.get(caregiver_id).await?;

        let account_ref = match account.external_account_ref {
            Some(ref r) => r.clone(),
            // Nothing to refresh until onboarding begins
            None => return Ok(account),
        };

        let remote = self
            .processor
            .account_status(&account_ref)
            .await
            .map_err(|e| match e {
                ProcessorError::Transient(msg) => PayoutError::transient(msg),
                ProcessorError::Permanent(msg) => PayoutError::permanent(msg),
            })?;

        Ok(self.store_remote(caregiver_id, &remote, now).await)
    }

    /// True only when the account is `Connected` with no outstanding
    /// requirements. Rows older than the freshness window are refreshed
    /// before answering; a release decision never rides a stale read.
    pub async fn is_transfer_eligible(
        &self,
        caregiver_id: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<bool> {
        let account = match self.accounts.read().await.get(caregiver_id) {
            Some(a) => a.clone(),
            None => return Ok(false),
        };

        let fresh_enough = matches!(
            account.checked_at,
            Some(t) if now - t < Duration::seconds(self.config.freshness_window_secs)
        );

        let account = if fresh_enough || account.external_account_ref.is_none() {
            account
        } else {
            self.refresh_status(caregiver_id, now).await?
        };

        Ok(account.is_transfer_eligible())
    }

    /// Webhook-style inbound update from the processor, decoupled from
    /// the polling refresh. Creates the row lazily if the webhook races
    /// ahead of local onboarding state.
    pub async fn handle_account_updated(
        &self,
        caregiver_id: &str,
        external_account_ref: &str,
        status: PayoutAccountStatus,
        outstanding_requirements: Vec<String>,
        now: DateTime<Utc>,
    ) -> PayoutResult<PayoutAccount> {
        let account = {
            let mut accounts = self.accounts.write().await;
            let account = accounts
                .entry(caregiver_id.to_string())
                .or_insert_with(|| PayoutAccount::new(caregiver_id.to_string(), now));
            account.external_account_ref = Some(external_account_ref.to_string());
            account.status = status;
            account.outstanding_requirements = outstanding_requirements;
            account.checked_at = Some(now);
            account.updated_at = now;
            account.clone()
        };

        info!(%caregiver_id, status = ?account.status, "payout account webhook applied");
        self.sink
            .publish(PaymentEvent::PayoutAccountUpdated {
                caregiver_id: caregiver_id.to_string(),
                status: account.status,
                at: now,
            })
            .await;
        Ok(account)
    }

    /// Get the local payout account row
    pub async fn get(&self, caregiver_id: &str) -> PayoutResult<PayoutAccount> {
        self.accounts
            .read()
            .await
            .get(caregiver_id)
            .cloned()
            .ok_or_else(|| {
                PayoutError::not_found(format!(
                    "no payout account for caregiver {}",
                    caregiver_id
                ))
            })
    }

    async fn store_remote(
        &self,
        caregiver_id: &str,
        remote: &ProcessorAccount,
        now: DateTime<Utc>,
    ) -> PayoutAccount {
        let (old_status, account) = {
            let mut accounts = self.accounts.write().await;
            let account = accounts
                .entry(caregiver_id.to_string())
                .or_insert_with(|| PayoutAccount::new(caregiver_id.to_string(), now));
            let old_status = account.status;
            account.external_account_ref = Some(remote.account_ref.clone());
            account.status = remote.status;
            account.outstanding_requirements = remote.outstanding_requirements.clone();
            account.checked_at = Some(now);
            account.updated_at = now;
            (old_status, account.clone())
        };

        if old_status != account.status {
            self.sink
                .publish(PaymentEvent::PayoutAccountUpdated {
                    caregiver_id: caregiver_id.to_string(),
                    status: account.status,
                    at: now,
                })
                .await;
        }
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogEventSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted processor double: serves a fixed account state and counts calls
    struct ScriptedProcessor {
        status: RwLock<PayoutAccountStatus>,
        requirements: RwLock<Vec<String>>,
        create_calls: AtomicU32,
        status_calls: AtomicU32,
    }

    impl ScriptedProcessor {
        fn new(status: PayoutAccountStatus) -> Self {
            Self {
                status: RwLock::new(status),
                requirements: RwLock::new(Vec::new()),
                create_calls: AtomicU32::new(0),
                status_calls: AtomicU32::new(0),
            }
        }

        async fn account(&self) -> ProcessorAccount {
            ProcessorAccount {
                account_ref: "acct_test".to_string(),
                status: *self.status.read().await,
                outstanding_requirements: self.requirements.read().await.clone(),
                onboarding_url: Some("https://processor.test/onboard/acct_test".to_string()),
            }
        }
    }

    #[async_trait]
    impl PaymentProcessor for ScriptedProcessor {
        async fn create_account(
            &self,
            _caregiver_id: &str,
            _profile: &OnboardingProfile,
        ) -> Result<ProcessorAccount, ProcessorError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.account().await)
        }

        async fn account_status(
            &self,
            _account_ref: &str,
        ) -> Result<ProcessorAccount, ProcessorError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.account().await)
        }

        async fn create_transfer(
            &self,
            _account_ref: &str,
            amount: i64,
            booking_id: &str,
        ) -> Result<crate::processor::TransferReceipt, ProcessorError> {
            Ok(crate::processor::TransferReceipt {
                transfer_ref: format!("tr_{booking_id}"),
                amount,
            })
        }
    }

    fn profile() -> OnboardingProfile {
        OnboardingProfile {
            legal_name: "Test Caregiver".to_string(),
            email: "caregiver@example.com".to_string(),
            country: "AU".to_string(),
        }
    }

    fn registry(processor: Arc<ScriptedProcessor>) -> PayoutAccountRegistry {
        PayoutAccountRegistry::new(RegistryConfig::default(), processor, Arc::new(LogEventSink))
    }

    #[tokio::test]
    async fn onboarding_is_idempotent_per_caregiver() {
        let processor = Arc::new(ScriptedProcessor::new(PayoutAccountStatus::Pending));
        let registry = registry(Arc::clone(&processor));
        let now = Utc::now();

        let first = registry
            .begin_onboarding("cg_1", &profile(), now)
            .await
            .unwrap();
        let second = registry
            .begin_onboarding("cg_1", &profile(), now)
            .await
            .unwrap();

        assert_eq!(first.external_account_ref, second.external_account_ref);
        assert_eq!(processor.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn processor_rejection_surfaces_as_account_creation_error() {
        struct RejectingProcessor;

        #[async_trait]
        impl PaymentProcessor for RejectingProcessor {
            async fn create_account(
                &self,
                _caregiver_id: &str,
                _profile: &OnboardingProfile,
            ) -> Result<ProcessorAccount, ProcessorError> {
                Err(ProcessorError::Permanent(
                    "identity data rejected".to_string(),
                ))
            }
            async fn account_status(
                &self,
                _account_ref: &str,
            ) -> Result<ProcessorAccount, ProcessorError> {
                unreachable!()
            }
            async fn create_transfer(
                &self,
                _account_ref: &str,
                _amount: i64,
                _booking_id: &str,
            ) -> Result<crate::processor::TransferReceipt, ProcessorError> {
                unreachable!()
            }
        }

        let registry = PayoutAccountRegistry::new(
            RegistryConfig::default(),
            Arc::new(RejectingProcessor),
            Arc::new(LogEventSink),
        );
        assert!(matches!(
            registry
                .begin_onboarding("cg_1", &profile(), Utc::now())
                .await
                .unwrap_err(),
            PayoutError::AccountCreation(_)
        ));
    }

    #[tokio::test]
    async fn eligibility_requires_connected_with_no_requirements() {
        let processor = Arc::new(ScriptedProcessor::new(PayoutAccountStatus::Pending));
        let registry = registry(Arc::clone(&processor));
        let now = Utc::now();

        // Unknown caregiver: not eligible, not an error
        assert!(!registry.is_transfer_eligible("cg_1", now).await.unwrap());

        registry
            .begin_onboarding("cg_1", &profile(), now)
            .await
            .unwrap();
        assert!(!registry.is_transfer_eligible("cg_1", now).await.unwrap());

        *processor.status.write().await = PayoutAccountStatus::Connected;
        *processor.requirements.write().await = vec!["bank_account".to_string()];
        let account = registry.refresh_status("cg_1", now).await.unwrap();
        assert_eq!(account.status, PayoutAccountStatus::Connected);
        assert!(!registry.is_transfer_eligible("cg_1", now).await.unwrap());

        processor.requirements.write().await.clear();
        registry.refresh_status("cg_1", now).await.unwrap();
        assert!(registry.is_transfer_eligible("cg_1", now).await.unwrap());
    }

    #[tokio::test]
    async fn stale_rows_are_refreshed_before_a_release_decision() {
        let processor = Arc::new(ScriptedProcessor::new(PayoutAccountStatus::Pending));
        let registry = registry(Arc::clone(&processor));
        let now = Utc::now();

        registry
            .begin_onboarding("cg_1", &profile(), now)
            .await
            .unwrap();
        let calls_after_onboard = processor.status_calls.load(Ordering::SeqCst);

        // Account connects at the processor; local row is now wrong
        *processor.status.write().await = PayoutAccountStatus::Connected;

        // Within the freshness window the cached Pending answer stands
        assert!(!registry
            .is_transfer_eligible("cg_1", now + Duration::seconds(10))
            .await
            .unwrap());
        assert_eq!(
            processor.status_calls.load(Ordering::SeqCst),
            calls_after_onboard
        );

        // Past the window the registry re-queries and sees Connected
        assert!(registry
            .is_transfer_eligible("cg_1", now + Duration::seconds(301))
            .await
            .unwrap());
        assert_eq!(
            processor.status_calls.load(Ordering::SeqCst),
            calls_after_onboard + 1
        );
    }

    #[tokio::test]
    async fn webhook_update_applies_without_polling() {
        let processor = Arc::new(ScriptedProcessor::new(PayoutAccountStatus::Pending));
        let registry = registry(processor);
        let now = Utc::now();

        let account = registry
            .handle_account_updated(
                "cg_9",
                "acct_webhook",
                PayoutAccountStatus::Connected,
                Vec::new(),
                now,
            )
            .await
            .unwrap();
        assert_eq!(account.status, PayoutAccountStatus::Connected);
        assert!(registry.is_transfer_eligible("cg_9", now).await.unwrap());
    }
}
