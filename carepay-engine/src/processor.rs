//! External payment processor client
//!
//! The processor owns the actual money movement: connected payout accounts,
//! onboarding links, and transfers out of escrow. Everything behind the
//! [`PaymentProcessor`] trait is partially trusted and asynchronous, so
//! errors are classified up front as transient (worth retrying) or
//! permanent (fatal for that booking).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::PayoutAccountStatus;

/// Processor failure classification, decided at the integration boundary
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Network problems, rate limits, processor 5xx; safe to retry
    #[error("transient processor failure: {0}")]
    Transient(String),

    /// Account closed, compliance block, malformed request; do not retry
    #[error("permanent processor failure: {0}")]
    Permanent(String),
}

/// Identity and bank details forwarded verbatim to the processor during
/// onboarding; opaque to the escrow core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingProfile {
    pub legal_name: String,
    pub email: String,
    pub country: String,
}

/// Processor view of a payout account
#[derive(Debug, Clone)]
pub struct ProcessorAccount {
    pub account_ref: String,
    pub status: PayoutAccountStatus,
    pub outstanding_requirements: Vec<String>,
    /// Hosted onboarding URL, present while requirements are outstanding
    pub onboarding_url: Option<String>,
}

/// Settlement confirmation for a completed transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_ref: String,
    pub amount: i64,
}

/// Client interface to the external payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a payout account and hosted onboarding session for a caregiver
    async fn create_account(
        &self,
        caregiver_id: &str,
        profile: &OnboardingProfile,
    ) -> Result<ProcessorAccount, ProcessorError>;

    /// Fetch the current onboarding state for an existing account
    async fn account_status(&self, account_ref: &str) -> Result<ProcessorAccount, ProcessorError>;

    /// Move `amount` minor units from escrow to the caregiver's account.
    /// All-or-nothing; a returned receipt means the full amount settled.
    async fn create_transfer(
        &self,
        account_ref: &str,
        amount: i64,
        booking_id: &str,
    ) -> Result<TransferReceipt, ProcessorError>;
}

/// HTTP client for a JSON payment-processor API
pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct CreateAccountRequest<'a> {
    caregiver_id: &'a str,
    profile: &'a OnboardingProfile,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account_ref: String,
    status: String,
    #[serde(default)]
    outstanding_requirements: Vec<String>,
    #[serde(default)]
    onboarding_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateTransferRequest<'a> {
    account_ref: &'a str,
    amount: i64,
    /// Processor-side idempotency key; one transfer per booking per attempt
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    transfer_ref: String,
    amount: i64,
}

impl HttpPaymentProcessor {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Map an HTTP response into the transient/permanent taxonomy
    async fn check<T: for<'de> Deserialize<'de>>(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, ProcessorError> {
        let response = match response {
            Ok(r) => r,
            Err(e) => return Err(ProcessorError::Transient(format!("transport error: {e}"))),
        };

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ProcessorError::Transient(format!("malformed response body: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            warn!(%status, "processor returned retryable status");
            Err(ProcessorError::Transient(format!("{status}: {body}")))
        } else {
            Err(ProcessorError::Permanent(format!("{status}: {body}")))
        }
    }

    fn parse_status(raw: &str) -> PayoutAccountStatus {
        match raw {
            "connected" => PayoutAccountStatus::Connected,
            "pending" => PayoutAccountStatus::Pending,
            _ => PayoutAccountStatus::NotConnected,
        }
    }

    fn into_account(response: AccountResponse) -> ProcessorAccount {
        ProcessorAccount {
            status: Self::parse_status(&response.status),
            account_ref: response.account_ref,
            outstanding_requirements: response.outstanding_requirements,
            onboarding_url: response.onboarding_url,
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_account(
        &self,
        caregiver_id: &str,
        profile: &OnboardingProfile,
    ) -> Result<ProcessorAccount, ProcessorError> {
        let request = CreateAccountRequest {
            caregiver_id,
            profile,
        };
        let response = self
            .client
            .post(self.endpoint("/v1/accounts"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await;

        Self::check::<AccountResponse>(response)
            .await
            .map(Self::into_account)
    }

    async fn account_status(&self, account_ref: &str) -> Result<ProcessorAccount, ProcessorError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/v1/accounts/{account_ref}")))
            .bearer_auth(&self.api_key)
            .send()
            .await;

        Self::check::<AccountResponse>(response)
            .await
            .map(Self::into_account)
    }

    async fn create_transfer(
        &self,
        account_ref: &str,
        amount: i64,
        booking_id: &str,
    ) -> Result<TransferReceipt, ProcessorError> {
        let request = CreateTransferRequest {
            account_ref,
            amount,
            reference: booking_id,
        };
        let response = self
            .client
            .post(self.endpoint("/v1/transfers"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await;

        let transfer = Self::check::<TransferResponse>(response).await?;
        Ok(TransferReceipt {
            transfer_ref: transfer.transfer_ref,
            amount: transfer.amount,
        })
    }
}
