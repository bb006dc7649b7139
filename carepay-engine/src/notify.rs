//! Notification hook for booking payment and payout account events
//!
//! The engine publishes state changes through [`PaymentEventSink`]; the
//! email/SMS senders and observability pipelines consume them from the
//! other side of this interface. Publishing never fails a transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{BookingPaymentStatus, PayoutAccountStatus};
use crate::PayoutResult;

/// Outbound event emitted on every authoritative state change
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    BookingPaymentStateChanged {
        booking_id: String,
        old_status: BookingPaymentStatus,
        new_status: BookingPaymentStatus,
        at: DateTime<Utc>,
    },
    PayoutAccountUpdated {
        caregiver_id: String,
        status: PayoutAccountStatus,
        at: DateTime<Utc>,
    },
}

impl PaymentEvent {
    /// JSON body handed to downstream webhook and queue consumers
    pub fn to_json(&self) -> PayoutResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Consumer interface for outbound payment events
#[async_trait]
pub trait PaymentEventSink: Send + Sync {
    async fn publish(&self, event: PaymentEvent);
}

/// Default sink that writes structured log events
pub struct LogEventSink;

#[async_trait]
impl PaymentEventSink for LogEventSink {
    async fn publish(&self, event: PaymentEvent) {
        // Same JSON body a webhook consumer would receive
        match event.to_json() {
            Ok(payload) => info!(%payload, "payment event"),
            Err(e) => warn!(error = %e, "failed to encode payment event"),
        }
    }
}
