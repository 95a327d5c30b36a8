//! Payment processor contract and the sandbox processor used for demos and tests.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::workflows::enrollment::domain::{SelectionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    RequiresPayment,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentState {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentState::RequiresPayment => "requires_payment",
            PaymentState::Processing => "processing",
            PaymentState::Succeeded => "succeeded",
            PaymentState::Failed => "failed",
            PaymentState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub user_id: UserId,
    pub selection_id: SelectionId,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub state: PaymentState,
}

/// Processor-side view of a payment, fetched at confirmation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub reference: String,
    pub user_id: UserId,
    pub state: PaymentState,
    pub amount: Decimal,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("unknown payment reference '{0}'")]
    UnknownReference(String),
    #[error("payment amount must be positive (got {0})")]
    InvalidAmount(Decimal),
    #[error("payment provider error: {0}")]
    Provider(String),
}

pub trait PaymentProcessor: Send + Sync {
    fn create_intent(&self, request: PaymentRequest) -> Result<PaymentIntent, PaymentError>;
    fn retrieve(&self, reference: &str) -> Result<PaymentConfirmation, PaymentError>;
}

/// In-memory processor. With `auto_capture` every intent succeeds immediately; otherwise the
/// test or demo drives it with [`SandboxPaymentProcessor::capture`] and
/// [`SandboxPaymentProcessor::fail`].
#[derive(Debug, Default)]
pub struct SandboxPaymentProcessor {
    payments: DashMap<String, PaymentConfirmation>,
    auto_capture: bool,
}

impl SandboxPaymentProcessor {
    pub fn new(auto_capture: bool) -> Self {
        Self {
            payments: DashMap::new(),
            auto_capture,
        }
    }

    pub fn capture(&self, reference: &str) -> Result<PaymentConfirmation, PaymentError> {
        self.settle(reference, PaymentState::Succeeded)
    }

    pub fn fail(&self, reference: &str) -> Result<PaymentConfirmation, PaymentError> {
        self.settle(reference, PaymentState::Failed)
    }

    fn settle(
        &self,
        reference: &str,
        state: PaymentState,
    ) -> Result<PaymentConfirmation, PaymentError> {
        let mut entry = self
            .payments
            .get_mut(reference)
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))?;
        entry.state = state;
        entry.updated_at = Utc::now();
        info!(reference, state = state.label(), "sandbox payment settled");
        Ok(entry.clone())
    }
}

impl PaymentProcessor for SandboxPaymentProcessor {
    fn create_intent(&self, request: PaymentRequest) -> Result<PaymentIntent, PaymentError> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(request.amount));
        }

        let reference = format!("pi_sandbox_{}", Uuid::new_v4().simple());
        let state = if self.auto_capture {
            PaymentState::Succeeded
        } else {
            PaymentState::RequiresPayment
        };
        self.payments.insert(
            reference.clone(),
            PaymentConfirmation {
                reference: reference.clone(),
                user_id: request.user_id,
                state,
                amount: request.amount,
                currency: request.currency.clone(),
                updated_at: Utc::now(),
            },
        );

        Ok(PaymentIntent {
            reference,
            amount: request.amount,
            currency: request.currency,
            state,
        })
    }

    fn retrieve(&self, reference: &str) -> Result<PaymentConfirmation, PaymentError> {
        self.payments
            .get(reference)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))
    }
}
