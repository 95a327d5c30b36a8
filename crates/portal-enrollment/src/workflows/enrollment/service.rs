use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use super::attendance::{
    AttendanceBook, AttendanceDay, AttendanceEntry, AttendanceError, AttendanceOverview,
    AttendanceSheet,
};
use super::buddies::{AssignmentOutcome, BuddyError, BuddyRegistry};
use super::checkout::{
    CheckoutError, CheckoutOrchestrator, CheckoutQuote, CheckoutReceipt, PaymentIntent,
    PaymentProcessor, Selection, SelectionCache, SelectionPick,
};
use super::domain::{
    Actor, AttendanceRecord, EnrollmentId, EnrollmentSettings, EnrollmentStatus, NewProgram, Program, ProgramId,
    ProgramUpdate, Role, RoleRequirement, SelectionId, SurveyRef, UserId,
};
use super::eligibility::{EligibilityGate, EligibilityReport};
use super::ledger::{CapacityLedger, ProgramAvailability, ReconciliationReport};
use super::lifecycle::{
    AdmitOutcome, DeletionOutcome, EnrollmentStateMachine, TransitionError, TransitionOutcome,
};
use super::repository::{PortalBackend, RepositoryError, TransitionPublisher};
use super::roster::{ProgramRoster, RosterError, RosterViews, UserEnrollmentOverview};
use crate::config::EnrollmentConfig;

/// Staff input for a role's prerequisites.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequirementInput {
    pub role: Role,
    #[serde(default)]
    pub required_surveys: Vec<SurveyRef>,
    #[serde(default)]
    pub require_profile_completion: bool,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

/// Facade composing the gate, lifecycle, ledger, buddy registry, checkout, rosters and
/// attendance over one backend.
pub struct EnrollmentPortal<B, Pay, P> {
    backend: Arc<B>,
    gate: EligibilityGate<B, B>,
    lifecycle: EnrollmentStateMachine<B, P>,
    ledger: CapacityLedger<B>,
    buddies: BuddyRegistry<B>,
    checkout: CheckoutOrchestrator<B, Pay, P>,
    roster: RosterViews<B>,
    attendance: AttendanceBook<B>,
    selections: SelectionCache,
}

impl<B, Pay, P> EnrollmentPortal<B, Pay, P>
where
    B: PortalBackend + 'static,
    Pay: PaymentProcessor + 'static,
    P: TransitionPublisher + 'static,
{
    pub fn new(
        backend: Arc<B>,
        payments: Arc<Pay>,
        publisher: Arc<P>,
        config: &EnrollmentConfig,
    ) -> Self {
        Self {
            gate: EligibilityGate::new(Arc::clone(&backend), Arc::clone(&backend)),
            lifecycle: EnrollmentStateMachine::new(Arc::clone(&backend), Arc::clone(&publisher)),
            ledger: CapacityLedger::new(Arc::clone(&backend)),
            buddies: BuddyRegistry::new(Arc::clone(&backend)),
            checkout: CheckoutOrchestrator::new(Arc::clone(&backend), payments, publisher, config),
            roster: RosterViews::new(Arc::clone(&backend)),
            attendance: AttendanceBook::new(Arc::clone(&backend)),
            selections: SelectionCache::new(),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn ledger(&self) -> &CapacityLedger<B> {
        &self.ledger
    }

    /// Looks the caller up once; its capabilities travel with it from here on.
    pub fn resolve_actor(&self, user_id: &UserId) -> Result<Actor, PortalError> {
        self.backend
            .fetch_user(user_id)?
            .map(Actor::new)
            .ok_or(PortalError::Unauthenticated)
    }

    pub fn check_eligibility(&self, actor: &Actor) -> Result<EligibilityReport, PortalError> {
        Ok(self.gate.evaluate(actor.account())?)
    }

    pub fn list_programs(
        &self,
        actor: &Actor,
        include_archived: bool,
    ) -> Result<Vec<Program>, PortalError> {
        if include_archived && !actor.capabilities().manage_programs {
            return Err(PortalError::Forbidden);
        }
        Ok(self.backend.list_programs(include_archived)?)
    }

    pub fn program(&self, program_id: &ProgramId) -> Result<Program, PortalError> {
        self.backend
            .fetch_program(program_id)?
            .ok_or(PortalError::NotFound("program"))
    }

    pub fn create_program(&self, actor: &Actor, input: NewProgram) -> Result<Program, PortalError> {
        require(actor.capabilities().manage_programs)?;
        validate_name(&input.name)?;
        validate_fee(input.fee)?;

        let program = self.backend.insert_program(input.into_program(Utc::now()))?;
        info!(program_id = %program.id, name = %program.name, "program created");
        Ok(program)
    }

    pub fn update_program(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        update: ProgramUpdate,
    ) -> Result<Program, PortalError> {
        require(actor.capabilities().manage_programs)?;
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(fee) = update.fee {
            validate_fee(fee)?;
        }

        let program = self
            .backend
            .update_program(program_id, update, Utc::now())
            .map_err(not_found("program"))?;
        info!(
            program_id = %program.id,
            archived = program.archived,
            accepting = program.accepting_enrollments,
            "program updated"
        );
        Ok(program)
    }

    pub fn availability(&self, program_id: &ProgramId) -> Result<ProgramAvailability, PortalError> {
        self.ledger
            .availability(program_id)
            .map_err(not_found("program"))
    }

    pub fn reconcile(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
    ) -> Result<ReconciliationReport, PortalError> {
        require(actor.capabilities().manage_programs)?;
        self.ledger
            .reconcile(program_id)
            .map_err(not_found("program"))
    }

    pub fn reconcile_all(&self, actor: &Actor) -> Result<Vec<ReconciliationReport>, PortalError> {
        require(actor.capabilities().manage_programs)?;
        Ok(self.ledger.reconcile_all()?)
    }

    pub fn program_roster(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
    ) -> Result<ProgramRoster, PortalError> {
        Ok(self.roster.program_roster(actor, program_id)?)
    }

    pub fn my_enrollments(&self, actor: &Actor) -> Result<UserEnrollmentOverview, PortalError> {
        Ok(self.roster.my_enrollments(actor)?)
    }

    pub fn attendance_sheet(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        date: NaiveDate,
    ) -> Result<AttendanceSheet, PortalError> {
        Ok(self.attendance.sheet(actor, program_id, date)?)
    }

    pub fn record_attendance(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        date: NaiveDate,
        entries: Vec<AttendanceEntry>,
    ) -> Result<Vec<AttendanceRecord>, PortalError> {
        Ok(self.attendance.record(actor, program_id, date, entries)?)
    }

    pub fn attendance_days(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
    ) -> Result<Vec<AttendanceDay>, PortalError> {
        Ok(self.attendance.days(actor, program_id)?)
    }

    pub fn delete_attendance_day(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        date: NaiveDate,
    ) -> Result<usize, PortalError> {
        Ok(self.attendance.delete_day(actor, program_id, date)?)
    }

    pub fn my_attendance(&self, actor: &Actor) -> Result<AttendanceOverview, PortalError> {
        Ok(self.attendance.my_attendance(actor)?)
    }

    pub fn admit(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        user_id: &UserId,
        notes: Option<String>,
    ) -> Result<AdmitOutcome, PortalError> {
        require(actor.capabilities().review_enrollments)?;
        if self.backend.fetch_user(user_id)?.is_none() {
            return Err(PortalError::NotFound("user"));
        }
        Ok(self.lifecycle.admit(actor, program_id, user_id, notes)?)
    }

    pub fn transition(
        &self,
        actor: &Actor,
        enrollment_id: &EnrollmentId,
        target: EnrollmentStatus,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, PortalError> {
        Ok(self
            .lifecycle
            .transition(actor, enrollment_id, target, notes)?)
    }

    pub fn withdraw(
        &self,
        actor: &Actor,
        enrollment_id: &EnrollmentId,
    ) -> Result<TransitionOutcome, PortalError> {
        Ok(self.lifecycle.withdraw(actor, enrollment_id)?)
    }

    pub fn delete_enrollment(
        &self,
        actor: &Actor,
        enrollment_id: &EnrollmentId,
    ) -> Result<DeletionOutcome, PortalError> {
        Ok(self.lifecycle.delete(actor, enrollment_id)?)
    }

    pub fn assign_buddy(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        member_id: &UserId,
        volunteer_id: &UserId,
    ) -> Result<AssignmentOutcome, PortalError> {
        Ok(self
            .buddies
            .assign(actor, program_id, member_id, volunteer_id)?)
    }

    pub fn unassign_buddy(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        member_id: &UserId,
    ) -> Result<bool, PortalError> {
        Ok(self.buddies.unassign(actor, program_id, member_id)?)
    }

    /// Staff may look up any pairing; a member may look up their own.
    pub fn lookup_buddy(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        member_id: &UserId,
    ) -> Result<Option<UserId>, PortalError> {
        require(actor.capabilities().manage_programs || actor.id() == *member_id)?;
        Ok(self.buddies.lookup(program_id, member_id)?)
    }

    pub fn toggle_lead(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        volunteer_id: &UserId,
    ) -> Result<bool, PortalError> {
        Ok(self.buddies.toggle_lead(actor, program_id, volunteer_id)?)
    }

    pub fn select(&self, actor: &Actor, picks: Vec<SelectionPick>) -> Result<Selection, PortalError> {
        let selection = self.checkout.select(actor, picks)?;
        self.selections.insert(selection.clone(), Utc::now());
        Ok(selection)
    }

    pub fn quote(
        &self,
        actor: &Actor,
        selection_id: &SelectionId,
    ) -> Result<CheckoutQuote, PortalError> {
        let selection = self.owned_selection(actor, selection_id)?;
        Ok(self.checkout.quote(actor, &selection)?)
    }

    pub fn begin_payment(
        &self,
        actor: &Actor,
        selection_id: &SelectionId,
    ) -> Result<PaymentIntent, PortalError> {
        let selection = self.owned_selection(actor, selection_id)?;
        self.checkout
            .begin_payment(actor, &selection)
            .map_err(|error| self.forget_expired(selection_id, error))
    }

    /// The selection stays cached after confirmation so a retried request can replay its receipt.
    pub fn confirm(
        &self,
        actor: &Actor,
        selection_id: &SelectionId,
        payment_reference: Option<&str>,
    ) -> Result<CheckoutReceipt, PortalError> {
        let selection = self.owned_selection(actor, selection_id)?;
        self.checkout
            .confirm(actor, &selection, payment_reference)
            .map_err(|error| self.forget_expired(selection_id, error))
    }

    pub fn enrollment_settings(&self) -> Result<EnrollmentSettings, PortalError> {
        Ok(self.backend.enrollment_settings()?)
    }

    /// Flips registration open/closed. The reason is kept only while closed.
    pub fn toggle_enrollment(
        &self,
        actor: &Actor,
        expected_version: u64,
        closure_reason: Option<String>,
    ) -> Result<EnrollmentSettings, PortalError> {
        require(actor.capabilities().manage_settings)?;
        let current = self.backend.enrollment_settings()?;
        let change = current
            .toggled(expected_version, closure_reason, actor.id(), Utc::now())
            .ok_or(RepositoryError::VersionConflict {
                expected: expected_version,
                current: current.version,
            })?;

        let settings = self
            .backend
            .replace_enrollment_settings(expected_version, change)?;
        info!(
            version = settings.version,
            open = settings.enrollment_open,
            "enrollment settings changed"
        );
        Ok(settings)
    }

    pub fn requirements(&self, actor: &Actor) -> Result<Vec<RoleRequirement>, PortalError> {
        require(actor.capabilities().manage_settings)?;
        Ok(self.backend.requirements()?)
    }

    pub fn upsert_requirement(
        &self,
        actor: &Actor,
        input: RequirementInput,
    ) -> Result<RoleRequirement, PortalError> {
        require(actor.capabilities().manage_settings)?;

        let mut seen = HashSet::new();
        let mut required_surveys = Vec::with_capacity(input.required_surveys.len());
        for survey in input.required_surveys {
            if survey.title.trim().is_empty() {
                return Err(PortalError::Validation(
                    "survey titles must not be empty".to_string(),
                ));
            }
            if seen.insert(survey.id) {
                required_surveys.push(survey);
            }
        }

        let requirement = self.backend.upsert_requirement(RoleRequirement {
            role: input.role,
            required_surveys,
            require_profile_completion: input.require_profile_completion,
            active: input.active,
            updated_at: Utc::now(),
        })?;
        info!(
            role = requirement.role.label(),
            surveys = requirement.required_surveys.len(),
            active = requirement.active,
            "role requirement saved"
        );
        Ok(requirement)
    }

    fn owned_selection(
        &self,
        actor: &Actor,
        selection_id: &SelectionId,
    ) -> Result<Selection, PortalError> {
        let selection = self
            .selections
            .get(selection_id)
            .ok_or(PortalError::NotFound("selection"))?;
        if selection.user_id != actor.id() {
            return Err(CheckoutError::SelectionOwnerMismatch.into());
        }
        Ok(selection)
    }

    fn forget_expired(&self, selection_id: &SelectionId, error: CheckoutError) -> PortalError {
        if matches!(error, CheckoutError::SelectionExpired) {
            self.selections.remove(selection_id);
        }
        error.into()
    }
}

fn require(allowed: bool) -> Result<(), PortalError> {
    if allowed {
        Ok(())
    } else {
        Err(PortalError::Forbidden)
    }
}

fn validate_name(name: &str) -> Result<(), PortalError> {
    if name.trim().is_empty() {
        return Err(PortalError::Validation(
            "program name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_fee(fee: Decimal) -> Result<(), PortalError> {
    if fee.is_sign_negative() || fee.scale() > 2 {
        return Err(PortalError::Validation(
            "fee must be a non-negative amount with at most two decimal places".to_string(),
        ));
    }
    Ok(())
}

fn not_found(what: &'static str) -> impl Fn(RepositoryError) -> PortalError {
    move |error| match error {
        RepositoryError::NotFound => PortalError::NotFound(what),
        other => PortalError::Repository(other),
    }
}

/// Error raised by the portal facade.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("not allowed")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Buddy(#[from] BuddyError),
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
