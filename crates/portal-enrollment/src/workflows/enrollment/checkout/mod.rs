//! Ranked multi-program selection, quoting, payment, and all-or-nothing confirmation.

pub mod payment;
pub mod selection;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{Actor, Enrollment, EnrollmentStatus, ProgramId, SelectionId};
use super::eligibility::{EligibilityGate, EligibilityReport};
use super::lifecycle::dispatch;
use super::repository::{
    BatchCommit, CheckoutBatch, PaymentRecord, PortalBackend, RejectedProgram, RepositoryError,
    TransitionEvent, TransitionPublisher,
};
use crate::config::EnrollmentConfig;

pub use payment::{
    PaymentConfirmation, PaymentError, PaymentIntent, PaymentProcessor, PaymentRequest,
    PaymentState, SandboxPaymentProcessor,
};
pub use selection::{Selection, SelectionCache, SelectionError, SelectionItem, SelectionPick};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteLine {
    pub program_id: ProgramId,
    pub name: String,
    pub rank: u32,
    pub fee: Decimal,
    /// The user already holds an enrollment here; the fee is left out of the total.
    pub already_enrolled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutQuote {
    pub selection_id: SelectionId,
    pub lines: Vec<QuoteLine>,
    pub total: Decimal,
    pub currency: String,
    pub payment_required: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutReceipt {
    pub selection_id: SelectionId,
    pub created: Vec<Enrollment>,
    pub already_enrolled: Vec<Enrollment>,
    pub payment_reference: Option<String>,
    pub total: Decimal,
    /// True when the payment reference had been consumed by an earlier confirmation.
    pub replayed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("enrollment prerequisites are not met")]
    Ineligible(EligibilityReport),
    #[error(transparent)]
    InvalidSelection(#[from] SelectionError),
    #[error("selection belongs to another user")]
    SelectionOwnerMismatch,
    #[error("selection expired; select your programs again")]
    SelectionExpired,
    #[error("some programs cannot take enrollments")]
    RejectedBatch(Vec<RejectedProgram>),
    #[error("this selection does not require payment")]
    PaymentNotRequired,
    #[error("a payment reference is required to confirm this selection")]
    PaymentRequired,
    #[error("payment has not succeeded (state: {0})")]
    PaymentNotSucceeded(PaymentState),
    #[error("payment amount {received} does not match the quoted total {expected}")]
    PaymentAmountMismatch { expected: Decimal, received: Decimal },
    #[error("payment reference belongs to another user")]
    PaymentReferenceMismatch,
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Turns a user's ranked selection into pending enrollments.
pub struct CheckoutOrchestrator<B, Pay, P> {
    store: Arc<B>,
    gate: EligibilityGate<B, B>,
    payments: Arc<Pay>,
    publisher: Arc<P>,
    selection_ttl: Duration,
    currency: String,
}

impl<B, Pay, P> CheckoutOrchestrator<B, Pay, P>
where
    B: PortalBackend,
    Pay: PaymentProcessor,
    P: TransitionPublisher,
{
    pub fn new(
        store: Arc<B>,
        payments: Arc<Pay>,
        publisher: Arc<P>,
        config: &EnrollmentConfig,
    ) -> Self {
        let gate = EligibilityGate::new(Arc::clone(&store), Arc::clone(&store));
        Self {
            store,
            gate,
            payments,
            publisher,
            selection_ttl: config.selection_ttl(),
            currency: config.currency.clone(),
        }
    }

    /// Validates the picks and builds a selection; every program must be open right now.
    pub fn select(
        &self,
        actor: &Actor,
        picks: Vec<SelectionPick>,
    ) -> Result<Selection, CheckoutError> {
        self.ensure_eligible(actor)?;

        let now = Utc::now();
        let selection = Selection::new(actor.id(), picks, now, self.selection_ttl)?;

        let rejected = self.unavailable(&selection)?;
        if !rejected.is_empty() {
            return Err(CheckoutError::RejectedBatch(rejected));
        }

        debug!(
            selection_id = %selection.id,
            user_id = %selection.user_id,
            programs = selection.items.len(),
            "selection created"
        );
        Ok(selection)
    }

    /// Prices the selection. Programs the user already holds are listed but not charged.
    pub fn quote(&self, actor: &Actor, selection: &Selection) -> Result<CheckoutQuote, CheckoutError> {
        let mut lines = Vec::with_capacity(selection.items.len());
        let mut missing = Vec::new();
        for item in &selection.items {
            match self.store.fetch_program(&item.program_id)? {
                Some(program) => lines.push(QuoteLine {
                    already_enrolled: self
                        .store
                        .find_enrollment(&actor.id(), &program.id)?
                        .is_some(),
                    program_id: program.id,
                    name: program.name,
                    rank: item.rank,
                    fee: program.fee,
                }),
                None => missing.push(RejectedProgram {
                    program_id: item.program_id,
                    name: None,
                    reason: super::domain::UnavailableReason::Missing,
                }),
            }
        }
        if !missing.is_empty() {
            return Err(CheckoutError::RejectedBatch(missing));
        }

        let total: Decimal = lines
            .iter()
            .filter(|line| !line.already_enrolled)
            .map(|line| line.fee)
            .sum();
        Ok(CheckoutQuote {
            selection_id: selection.id,
            lines,
            total,
            currency: self.currency.clone(),
            payment_required: actor.capabilities().pays_for_enrollment && total > Decimal::ZERO,
            expires_at: selection.expires_at,
        })
    }

    pub fn begin_payment(
        &self,
        actor: &Actor,
        selection: &Selection,
    ) -> Result<PaymentIntent, CheckoutError> {
        self.ensure_usable(actor, selection, Utc::now())?;
        let quote = self.quote(actor, selection)?;
        if !quote.payment_required {
            return Err(CheckoutError::PaymentNotRequired);
        }

        let intent = self.payments.create_intent(PaymentRequest {
            user_id: actor.id(),
            selection_id: selection.id,
            amount: quote.total,
            currency: quote.currency,
        })?;
        info!(
            selection_id = %selection.id,
            reference = %intent.reference,
            amount = %intent.amount,
            "payment intent created"
        );
        Ok(intent)
    }

    /// Commits every program of the selection as pending enrollments, or none of them.
    pub fn confirm(
        &self,
        actor: &Actor,
        selection: &Selection,
        payment_reference: Option<&str>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let now = Utc::now();
        let payment_reference = payment_reference
            .map(str::trim)
            .filter(|reference| !reference.is_empty());

        if selection.user_id != actor.id() {
            return Err(CheckoutError::SelectionOwnerMismatch);
        }
        // A consumed reference answers with the original receipt, even after expiry.
        if let Some(reference) = payment_reference {
            if let Some(record) = self.store.payment_record(reference)? {
                return self.replay(actor, selection, record);
            }
        }

        self.ensure_usable(actor, selection, now)?;
        self.ensure_eligible(actor)?;
        let quote = self.quote(actor, selection)?;

        let payment = if quote.payment_required {
            let reference = payment_reference.ok_or(CheckoutError::PaymentRequired)?;
            Some(self.verified_payment(actor, selection, reference, &quote, now)?)
        } else {
            if payment_reference.is_some() {
                debug!(selection_id = %selection.id, "ignoring payment reference for unpaid checkout");
            }
            None
        };

        let reference = payment.as_ref().map(|record| record.reference.clone());
        let rows = selection
            .items
            .iter()
            .map(|item| Enrollment::pending(actor.id(), item.program_id, Some(item.rank), now))
            .collect();
        let batch = CheckoutBatch {
            user_id: actor.id(),
            rows,
            payment,
        };

        match self.store.commit_checkout(batch) {
            Ok(BatchCommit::Committed {
                created,
                already_enrolled,
            }) => {
                info!(
                    selection_id = %selection.id,
                    user_id = %actor.id(),
                    created = created.len(),
                    already_enrolled = already_enrolled.len(),
                    total = %quote.total,
                    "checkout confirmed"
                );
                for row in &created {
                    dispatch(
                        self.publisher.as_ref(),
                        TransitionEvent {
                            enrollment_id: row.id,
                            user_id: row.user_id,
                            program_id: row.program_id,
                            previous: None,
                            next: Some(EnrollmentStatus::Pending),
                            actor_id: actor.id(),
                            at: now,
                            enrolled_after: None,
                            drift_detected: false,
                        },
                    );
                }
                Ok(CheckoutReceipt {
                    selection_id: selection.id,
                    created,
                    already_enrolled,
                    payment_reference: reference,
                    total: quote.total,
                    replayed: false,
                })
            }
            Ok(BatchCommit::Replayed { record, .. }) => self.replay(actor, selection, record),
            Ok(BatchCommit::Rejected(rejected)) => {
                info!(
                    selection_id = %selection.id,
                    rejected = rejected.len(),
                    "checkout rejected; no enrollments created"
                );
                Err(CheckoutError::RejectedBatch(rejected))
            }
            Err(RepositoryError::Conflict) if quote.payment_required => {
                Err(CheckoutError::PaymentReferenceMismatch)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn verified_payment(
        &self,
        actor: &Actor,
        selection: &Selection,
        reference: &str,
        quote: &CheckoutQuote,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, CheckoutError> {
        let confirmation = self.payments.retrieve(reference)?;
        if confirmation.user_id != actor.id() {
            return Err(CheckoutError::PaymentReferenceMismatch);
        }
        if confirmation.state != PaymentState::Succeeded {
            return Err(CheckoutError::PaymentNotSucceeded(confirmation.state));
        }
        if confirmation.amount != quote.total
            || !confirmation.currency.eq_ignore_ascii_case(&quote.currency)
        {
            return Err(CheckoutError::PaymentAmountMismatch {
                expected: quote.total,
                received: confirmation.amount,
            });
        }

        Ok(PaymentRecord {
            reference: confirmation.reference,
            user_id: actor.id(),
            selection_id: selection.id,
            amount: confirmation.amount,
            currency: confirmation.currency,
            enrollment_ids: Vec::new(),
            recorded_at: now,
        })
    }

    /// Answers with the receipt of the confirmation that consumed the reference, under that
    /// confirmation's selection id.
    fn replay(
        &self,
        actor: &Actor,
        selection: &Selection,
        record: PaymentRecord,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        if record.user_id != actor.id() {
            return Err(CheckoutError::PaymentReferenceMismatch);
        }

        let mut created = Vec::with_capacity(record.enrollment_ids.len());
        for id in &record.enrollment_ids {
            if let Some(enrollment) = self.store.fetch_enrollment(id)? {
                created.push(enrollment);
            }
        }
        info!(
            selection_id = %selection.id,
            original_selection_id = %record.selection_id,
            reference = %record.reference,
            "payment reference replayed; returning original receipt"
        );
        Ok(CheckoutReceipt {
            selection_id: record.selection_id,
            created,
            already_enrolled: Vec::new(),
            payment_reference: Some(record.reference),
            total: record.amount,
            replayed: true,
        })
    }

    fn ensure_eligible(&self, actor: &Actor) -> Result<(), CheckoutError> {
        let report = self.gate.evaluate(actor.account())?;
        if report.allowed {
            Ok(())
        } else {
            Err(CheckoutError::Ineligible(report))
        }
    }

    fn ensure_usable(
        &self,
        actor: &Actor,
        selection: &Selection,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutError> {
        if selection.user_id != actor.id() {
            return Err(CheckoutError::SelectionOwnerMismatch);
        }
        if selection.is_expired(now) {
            return Err(CheckoutError::SelectionExpired);
        }
        Ok(())
    }

    fn unavailable(&self, selection: &Selection) -> Result<Vec<RejectedProgram>, CheckoutError> {
        let mut rejected = Vec::new();
        for program_id in selection.program_ids() {
            match self.store.fetch_program(&program_id)? {
                Some(program) => {
                    if let Some(reason) = program.unavailability() {
                        rejected.push(RejectedProgram {
                            program_id,
                            name: Some(program.name),
                            reason,
                        });
                    }
                }
                None => rejected.push(RejectedProgram {
                    program_id,
                    name: None,
                    reason: super::domain::UnavailableReason::Missing,
                }),
            }
        }
        Ok(rejected)
    }
}
