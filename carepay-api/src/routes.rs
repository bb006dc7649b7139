//! HTTP routes for the booking payment and payout surface

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use carepay_engine::engine::{BookingPaymentView, PayoutEngine};
use carepay_engine::models::{PayoutAccountStatus, TransferAttempt};
use carepay_engine::processor::OnboardingProfile;
use carepay_engine::scheduler::CycleStats;

use crate::error::ApiError;

pub fn router(engine: Arc<PayoutEngine>) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route(
            "/bookings/:booking_id/capture-payment",
            post(capture_payment),
        )
        .route("/bookings/:booking_id/complete", post(complete_booking))
        .route("/bookings/:booking_id/refund", post(refund_booking))
        .route("/bookings/:booking_id/payment-status", get(payment_status))
        .route(
            "/payout-accounts/:caregiver_id/onboard",
            post(begin_onboarding),
        )
        .route(
            "/payout-accounts/:caregiver_id/status",
            get(account_status),
        )
        .route(
            "/payout-accounts/:caregiver_id/refresh",
            post(refresh_account),
        )
        .route(
            "/payout-accounts/:caregiver_id/account-updated",
            post(account_updated),
        )
        .route("/admin/release-payments", post(release_payments))
        .route(
            "/admin/bookings/:booking_id/attempts",
            get(booking_attempts),
        )
        .with_state(engine)
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct CapturePaymentRequest {
    pub caregiver_id: String,
    /// Integer minor currency units
    pub total_amount: i64,
}

#[derive(Debug, Serialize)]
pub struct CapturePaymentResponse {
    pub booking_id: String,
    pub total_amount: i64,
    pub platform_fee_amount: i64,
    pub caregiver_amount: i64,
}

async fn capture_payment(
    State(engine): State<Arc<PayoutEngine>>,
    Path(booking_id): Path<String>,
    Json(req): Json<CapturePaymentRequest>,
) -> Result<Json<CapturePaymentResponse>, ApiError> {
    let payment = engine
        .capture_payment(&booking_id, &req.caregiver_id, req.total_amount)
        .await?;
    Ok(Json(CapturePaymentResponse {
        booking_id: payment.booking_id,
        total_amount: payment.total_amount,
        platform_fee_amount: payment.platform_fee_amount,
        caregiver_amount: payment.caregiver_amount,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteBookingRequest {
    /// Defaults to now when the completion event carries no timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CompleteBookingResponse {
    pub booking_id: String,
    pub release_eligible_at: Option<DateTime<Utc>>,
}

async fn complete_booking(
    State(engine): State<Arc<PayoutEngine>>,
    Path(booking_id): Path<String>,
    Json(req): Json<CompleteBookingRequest>,
) -> Result<Json<CompleteBookingResponse>, ApiError> {
    let payment = engine
        .mark_job_completed(&booking_id, req.completed_at)
        .await?;
    Ok(Json(CompleteBookingResponse {
        booking_id: payment.booking_id,
        release_eligible_at: payment.release_eligible_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

async fn refund_booking(
    State(engine): State<Arc<PayoutEngine>>,
    Path(booking_id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<BookingPaymentView>, ApiError> {
    engine.refund(&booking_id, &req.reason).await?;
    Ok(Json(engine.booking_status(&booking_id).await?))
}

async fn payment_status(
    State(engine): State<Arc<PayoutEngine>>,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingPaymentView>, ApiError> {
    Ok(Json(engine.booking_status(&booking_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct OnboardRequest {
    pub legal_name: String,
    pub email: String,
    pub country: String,
}

#[derive(Debug, Serialize)]
pub struct OnboardResponse {
    pub external_account_ref: String,
    pub onboarding_url: Option<String>,
}

async fn begin_onboarding(
    State(engine): State<Arc<PayoutEngine>>,
    Path(caregiver_id): Path<String>,
    Json(req): Json<OnboardRequest>,
) -> Result<Json<OnboardResponse>, ApiError> {
    let profile = OnboardingProfile {
        legal_name: req.legal_name,
        email: req.email,
        country: req.country,
    };
    let handle = engine.begin_onboarding(&caregiver_id, &profile).await?;
    Ok(Json(OnboardResponse {
        external_account_ref: handle.external_account_ref,
        onboarding_url: handle.onboarding_url,
    }))
}

#[derive(Debug, Serialize)]
pub struct AccountStatusResponse {
    pub caregiver_id: String,
    pub status: PayoutAccountStatus,
    pub outstanding_requirements: Vec<String>,
}

async fn account_status(
    State(engine): State<Arc<PayoutEngine>>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<AccountStatusResponse>, ApiError> {
    let account = engine.account_status(&caregiver_id).await?;
    Ok(Json(AccountStatusResponse {
        caregiver_id: account.caregiver_id,
        status: account.status,
        outstanding_requirements: account.outstanding_requirements,
    }))
}

async fn refresh_account(
    State(engine): State<Arc<PayoutEngine>>,
    Path(caregiver_id): Path<String>,
) -> Result<Json<AccountStatusResponse>, ApiError> {
    let account = engine.refresh_account(&caregiver_id).await?;
    Ok(Json(AccountStatusResponse {
        caregiver_id: account.caregiver_id,
        status: account.status,
        outstanding_requirements: account.outstanding_requirements,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AccountUpdatedRequest {
    pub external_account_ref: String,
    pub status: PayoutAccountStatus,
    #[serde(default)]
    pub outstanding_requirements: Vec<String>,
}

async fn account_updated(
    State(engine): State<Arc<PayoutEngine>>,
    Path(caregiver_id): Path<String>,
    Json(req): Json<AccountUpdatedRequest>,
) -> Result<Json<AccountStatusResponse>, ApiError> {
    let account = engine
        .handle_account_webhook(
            &caregiver_id,
            &req.external_account_ref,
            req.status,
            req.outstanding_requirements,
        )
        .await?;
    Ok(Json(AccountStatusResponse {
        caregiver_id: account.caregiver_id,
        status: account.status,
        outstanding_requirements: account.outstanding_requirements,
    }))
}

#[derive(Debug, Serialize)]
pub struct ReleasePaymentsResponse {
    pub released_count: usize,
    pub stats: CycleStats,
}

async fn release_payments(
    State(engine): State<Arc<PayoutEngine>>,
) -> Result<Json<ReleasePaymentsResponse>, ApiError> {
    let stats = engine.run_release_cycle().await?;
    Ok(Json(ReleasePaymentsResponse {
        released_count: stats.released,
        stats,
    }))
}

async fn booking_attempts(
    State(engine): State<Arc<PayoutEngine>>,
    Path(booking_id): Path<String>,
) -> Result<Json<Vec<TransferAttempt>>, ApiError> {
    Ok(Json(engine.booking_audit_trail(&booking_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use carepay_engine::engine::PayoutEngineConfig;
    use carepay_engine::models::PublicPaymentStatus;
    use carepay_engine::notify::LogEventSink;
    use carepay_engine::processor::{
        PaymentProcessor, ProcessorAccount, ProcessorError, TransferReceipt,
    };

    struct StubProcessor;

    #[async_trait]
    impl PaymentProcessor for StubProcessor {
        async fn create_account(
            &self,
            _caregiver_id: &str,
            _profile: &OnboardingProfile,
        ) -> Result<ProcessorAccount, ProcessorError> {
            Ok(ProcessorAccount {
                account_ref: "acct_stub".to_string(),
                status: PayoutAccountStatus::Pending,
                outstanding_requirements: vec!["bank_account".to_string()],
                onboarding_url: Some("https://processor.test/onboard".to_string()),
            })
        }

        async fn account_status(
            &self,
            _account_ref: &str,
        ) -> Result<ProcessorAccount, ProcessorError> {
            self.create_account("", &OnboardingProfile {
                legal_name: String::new(),
                email: String::new(),
                country: String::new(),
            })
            .await
        }

        async fn create_transfer(
            &self,
            _account_ref: &str,
            amount: i64,
            booking_id: &str,
        ) -> Result<TransferReceipt, ProcessorError> {
            Ok(TransferReceipt {
                transfer_ref: format!("tr_{booking_id}"),
                amount,
            })
        }
    }

    fn engine() -> Arc<PayoutEngine> {
        Arc::new(PayoutEngine::new(
            PayoutEngineConfig::default(),
            Arc::new(StubProcessor),
            Arc::new(LogEventSink),
        ))
    }

    #[tokio::test]
    async fn capture_then_status_round_trip() {
        let engine = engine();
        let Json(captured) = capture_payment(
            State(engine.clone()),
            Path("bk_7".to_string()),
            Json(CapturePaymentRequest {
                caregiver_id: "cg_7".to_string(),
                total_amount: 24200,
            }),
        )
        .await
        .expect("capture succeeds");

        assert_eq!(captured.platform_fee_amount, 2420);
        assert_eq!(captured.caregiver_amount, 21780);

        let Json(view) = payment_status(State(engine), Path("bk_7".to_string()))
            .await
            .expect("status exists");
        assert_eq!(view.status, PublicPaymentStatus::Pending);
    }

    #[tokio::test]
    async fn capture_rejects_zero_amount() {
        let engine = engine();
        let result = capture_payment(
            State(engine),
            Path("bk_7".to_string()),
            Json(CapturePaymentRequest {
                caregiver_id: "cg_7".to_string(),
                total_amount: 0,
            }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let engine = engine();
        assert!(payment_status(State(engine), Path("nope".to_string()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn onboarding_returns_hosted_url() {
        let engine = engine();
        let Json(resp) = begin_onboarding(
            State(engine.clone()),
            Path("cg_1".to_string()),
            Json(OnboardRequest {
                legal_name: "Test Caregiver".to_string(),
                email: "cg@example.com".to_string(),
                country: "AU".to_string(),
            }),
        )
        .await
        .expect("onboarding begins");
        assert_eq!(resp.external_account_ref, "acct_stub");
        assert!(resp.onboarding_url.is_some());

        let Json(status) = account_status(State(engine), Path("cg_1".to_string()))
            .await
            .expect("account exists");
        assert_eq!(status.status, PayoutAccountStatus::Pending);
        assert_eq!(status.outstanding_requirements, vec!["bank_account"]);
    }

    #[tokio::test]
    async fn manual_release_reports_counts() {
        let engine = engine();
        let Json(resp) = release_payments(State(engine)).await.expect("cycle runs");
        assert_eq!(resp.released_count, 0);
        assert_eq!(resp.stats, CycleStats::default());
    }
}
