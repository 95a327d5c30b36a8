//! Enrollment lifecycle: allowed transitions, attribution, and the occupancy counter updates
//! committed together with each status write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{
    Actor, BuddyAssignment, Enrollment, EnrollmentId, EnrollmentStatus, ProgramId, UserId,
};
use super::repository::{
    BuddyCascade, CommittedChange, CounterAdjustment, CounterDelta, EnrollmentRemoval,
    EnrollmentStore, RepositoryError, StatusChange, TransitionEvent, TransitionPublisher,
};

/// Attempts made when the compare-and-set status write loses a race.
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

impl EnrollmentStatus {
    /// Whether `self -> next` is a legal move. Same-status requests are handled as no-ops
    /// before this is consulted.
    pub const fn can_transition_to(self, next: EnrollmentStatus) -> bool {
        use EnrollmentStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Waitlisted | Rejected | Withdrawn)
                | (Approved, Waitlisted | Rejected | Withdrawn)
                | (Waitlisted | Rejected, Approved | Withdrawn)
        )
    }

    pub const fn counter_delta(self, next: EnrollmentStatus) -> Option<CounterDelta> {
        match (self.is_approved(), next.is_approved()) {
            (false, true) => Some(CounterDelta::Increment),
            (true, false) => Some(CounterDelta::Decrement),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, EnrollmentStatus::Withdrawn)
    }
}

/// Links to release when an enrollment moves from `previous` to `next`. Pairings only hold
/// between approved enrollments, so leaving `approved` drops both sides.
fn cascade_for(previous: EnrollmentStatus, next: EnrollmentStatus) -> BuddyCascade {
    let leaving_approved = previous.is_approved() && !next.is_approved();
    BuddyCascade {
        as_volunteer: leaving_approved,
        as_member: leaving_approved || matches!(next, EnrollmentStatus::Withdrawn),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub enrollment: Enrollment,
    pub previous: EnrollmentStatus,
    /// False when the enrollment already held the requested status.
    pub changed: bool,
    pub counter: Option<CounterAdjustment>,
    pub released_buddies: Vec<BuddyAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "enrollment", rename_all = "snake_case")]
pub enum AdmitOutcome {
    Created(Enrollment),
    AlreadyEnrolled(Enrollment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    pub enrollment: Enrollment,
    pub counter: Option<CounterAdjustment>,
    pub released_buddies: Vec<BuddyAssignment>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("enrollment not found")]
    NotFound,
    #[error("program not found")]
    ProgramNotFound,
    #[error("actor is not allowed to change this enrollment")]
    Forbidden,
    #[error("cannot move an enrollment from {from} to {to}")]
    InvalidTransition {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },
    #[error("enrollment kept changing concurrently after {attempts} attempts")]
    Contention { attempts: usize },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Owns status changes for single enrollments.
pub struct EnrollmentStateMachine<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
}

impl<S, P> Clone for EnrollmentStateMachine<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<S, P> EnrollmentStateMachine<S, P>
where
    S: EnrollmentStore,
    P: TransitionPublisher,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
        Self { store, publisher }
    }

    /// Moves an enrollment to `target`. Staff with the review capability may apply any legal
    /// move; owners may only withdraw.
    pub fn transition(
        &self,
        actor: &Actor,
        enrollment_id: &EnrollmentId,
        target: EnrollmentStatus,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, TransitionError> {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let current = self
                .store
                .fetch_enrollment(enrollment_id)?
                .ok_or(TransitionError::NotFound)?;
            authorize(actor, &current, target)?;

            let previous = current.status;
            if previous == target {
                debug!(
                    enrollment_id = %current.id,
                    status = previous.label(),
                    "status unchanged; skipping write"
                );
                return Ok(TransitionOutcome {
                    enrollment: current,
                    previous,
                    changed: false,
                    counter: None,
                    released_buddies: Vec::new(),
                });
            }
            if !previous.can_transition_to(target) {
                return Err(TransitionError::InvalidTransition {
                    from: previous,
                    to: target,
                });
            }

            let at = Utc::now();
            let change = StatusChange {
                enrollment_id: current.id,
                expected: previous,
                next: target,
                counter: previous.counter_delta(target),
                assigned_by: actor.id(),
                assigned_at: at,
                notes: notes.clone(),
                cascade: cascade_for(previous, target),
            };

            match self.store.commit_status_change(change) {
                Ok(committed) => {
                    info!(
                        enrollment_id = %committed.enrollment.id,
                        program_id = %committed.enrollment.program_id,
                        from = previous.label(),
                        to = target.label(),
                        enrolled = committed.counter.map(|counter| counter.enrolled),
                        released = committed.released.len(),
                        "enrollment transition committed"
                    );
                    self.publish(event_for(&committed, Some(previous), actor.id(), at));
                    return Ok(TransitionOutcome {
                        enrollment: committed.enrollment,
                        previous,
                        changed: true,
                        counter: committed.counter,
                        released_buddies: committed.released,
                    });
                }
                Err(RepositoryError::StaleWrite) => {
                    debug!(enrollment_id = %enrollment_id, "status changed underneath; re-deciding");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(TransitionError::Contention {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    pub fn withdraw(
        &self,
        actor: &Actor,
        enrollment_id: &EnrollmentId,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.transition(actor, enrollment_id, EnrollmentStatus::Withdrawn, None)
    }

    /// Staff admission: a pending row attributed to the acting staff member.
    pub fn admit(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        user_id: &UserId,
        notes: Option<String>,
    ) -> Result<AdmitOutcome, TransitionError> {
        if !actor.capabilities().review_enrollments {
            return Err(TransitionError::Forbidden);
        }
        if self.store.fetch_program(program_id)?.is_none() {
            return Err(TransitionError::ProgramNotFound);
        }

        let at = Utc::now();
        let mut enrollment = Enrollment::pending(*user_id, *program_id, None, at);
        enrollment.assigned_by = Some(actor.id());
        enrollment.assigned_at = Some(at);
        enrollment.assignment_notes = notes.unwrap_or_default();

        match self.store.insert_enrollment(enrollment) {
            Ok(created) => {
                info!(
                    enrollment_id = %created.id,
                    program_id = %created.program_id,
                    user_id = %created.user_id,
                    "staff admitted user"
                );
                self.publish(TransitionEvent {
                    enrollment_id: created.id,
                    user_id: created.user_id,
                    program_id: created.program_id,
                    previous: None,
                    next: Some(created.status),
                    actor_id: actor.id(),
                    at,
                    enrolled_after: None,
                    drift_detected: false,
                });
                Ok(AdmitOutcome::Created(created))
            }
            Err(RepositoryError::Conflict) => self
                .store
                .find_enrollment(user_id, program_id)?
                .map(AdmitOutcome::AlreadyEnrolled)
                .ok_or(TransitionError::Repository(RepositoryError::Conflict)),
            Err(error) => Err(error.into()),
        }
    }

    /// Administrative deletion. An approved row gives its seat back in the same unit of work.
    pub fn delete(
        &self,
        actor: &Actor,
        enrollment_id: &EnrollmentId,
    ) -> Result<DeletionOutcome, TransitionError> {
        if !actor.capabilities().review_enrollments {
            return Err(TransitionError::Forbidden);
        }

        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let current = self
                .store
                .fetch_enrollment(enrollment_id)?
                .ok_or(TransitionError::NotFound)?;
            let approved = current.status.is_approved();
            let removal = EnrollmentRemoval {
                enrollment_id: current.id,
                expected: current.status,
                counter: approved.then_some(CounterDelta::Decrement),
                cascade: BuddyCascade {
                    as_volunteer: approved,
                    as_member: true,
                },
            };

            match self.store.remove_enrollment(removal) {
                Ok(Some(committed)) => {
                    let at = Utc::now();
                    info!(
                        enrollment_id = %committed.enrollment.id,
                        program_id = %committed.enrollment.program_id,
                        status = current.status.label(),
                        "enrollment deleted"
                    );
                    let mut event = event_for(&committed, Some(current.status), actor.id(), at);
                    event.next = None;
                    self.publish(event);
                    return Ok(DeletionOutcome {
                        enrollment: committed.enrollment,
                        counter: committed.counter,
                        released_buddies: committed.released,
                    });
                }
                Ok(None) => return Err(TransitionError::NotFound),
                Err(RepositoryError::StaleWrite) => continue,
                Err(error) => return Err(error.into()),
            }
        }

        Err(TransitionError::Contention {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    fn publish(&self, event: TransitionEvent) {
        dispatch(self.publisher.as_ref(), event);
    }
}

/// Hands a committed transition to the publisher. Failures are logged; the write stands.
pub(crate) fn dispatch<P>(publisher: &P, event: TransitionEvent)
where
    P: TransitionPublisher + ?Sized,
{
    let enrollment_id = event.enrollment_id;
    if event.drift_detected {
        warn!(
            enrollment_id = %enrollment_id,
            program_id = %event.program_id,
            "transition clamped the occupancy counter; run reconciliation"
        );
    }
    if let Err(error) = publisher.publish(event) {
        warn!(enrollment_id = %enrollment_id, %error, "transition publisher failed");
    }
}

fn authorize(
    actor: &Actor,
    enrollment: &Enrollment,
    target: EnrollmentStatus,
) -> Result<(), TransitionError> {
    let owner_withdrawing =
        actor.id() == enrollment.user_id && matches!(target, EnrollmentStatus::Withdrawn);
    if actor.capabilities().review_enrollments || owner_withdrawing {
        Ok(())
    } else {
        Err(TransitionError::Forbidden)
    }
}

fn event_for(
    committed: &CommittedChange,
    previous: Option<EnrollmentStatus>,
    actor_id: UserId,
    at: DateTime<Utc>,
) -> TransitionEvent {
    TransitionEvent {
        enrollment_id: committed.enrollment.id,
        user_id: committed.enrollment.user_id,
        program_id: committed.enrollment.program_id,
        previous,
        next: Some(committed.enrollment.status),
        actor_id,
        at,
        enrolled_after: committed.counter.map(|counter| counter.enrolled),
        drift_detected: committed.counter.map(|counter| counter.clamped).unwrap_or(false),
    }
}
