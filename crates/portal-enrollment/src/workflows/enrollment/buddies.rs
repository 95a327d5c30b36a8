use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::domain::{Actor, BuddyAssignment, ProgramId, Role, UserId};
use super::repository::{EnrollmentStore, RepositoryError, UserDirectory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Created {
        assignment: BuddyAssignment,
    },
    Replaced {
        assignment: BuddyAssignment,
        previous_volunteer: UserId,
    },
}

impl AssignmentOutcome {
    pub fn assignment(&self) -> &BuddyAssignment {
        match self {
            AssignmentOutcome::Created { assignment }
            | AssignmentOutcome::Replaced { assignment, .. } => assignment,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuddyError {
    #[error("only staff who manage programs may change buddy pairings")]
    Forbidden,
    #[error("program not found")]
    ProgramNotFound,
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("buddies can only be assigned to members (user has role {0:?})")]
    NotAMember(Role),
    #[error("member must hold an approved enrollment in this program")]
    MemberNotApproved,
    #[error("volunteer must hold an approved enrollment in this program")]
    VolunteerNotApproved,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Volunteer-to-member pairings scoped to one program.
pub struct BuddyRegistry<S> {
    store: Arc<S>,
}

impl<S> Clone for BuddyRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> BuddyRegistry<S>
where
    S: EnrollmentStore + UserDirectory,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn assign(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        member_id: &UserId,
        volunteer_id: &UserId,
    ) -> Result<AssignmentOutcome, BuddyError> {
        self.authorize(actor)?;
        if self.store.fetch_program(program_id)?.is_none() {
            return Err(BuddyError::ProgramNotFound);
        }

        let member = self
            .store
            .fetch_user(member_id)?
            .ok_or(BuddyError::UserNotFound(*member_id))?;
        if member.role != Role::Member {
            return Err(BuddyError::NotAMember(member.role));
        }

        if !self.approved(member_id, program_id)? {
            return Err(BuddyError::MemberNotApproved);
        }
        if !self.approved(volunteer_id, program_id)? {
            return Err(BuddyError::VolunteerNotApproved);
        }

        let now = Utc::now();
        let assignment = BuddyAssignment {
            program_id: *program_id,
            member_id: *member_id,
            volunteer_id: *volunteer_id,
            created_at: now,
            updated_at: now,
        };
        let upsert = match self.store.upsert_buddy(assignment) {
            Ok(upsert) => upsert,
            // One side left `approved` after the checks above.
            Err(RepositoryError::PreconditionFailed(_)) => {
                return Err(if self.approved(member_id, program_id)? {
                    BuddyError::VolunteerNotApproved
                } else {
                    BuddyError::MemberNotApproved
                });
            }
            Err(error) => return Err(error.into()),
        };

        info!(
            program_id = %program_id,
            member_id = %member_id,
            volunteer_id = %volunteer_id,
            replaced = upsert.replaced.is_some(),
            "buddy assigned"
        );

        let assignment = upsert.stored;
        Ok(match upsert.replaced {
            Some(previous) => AssignmentOutcome::Replaced {
                assignment,
                previous_volunteer: previous.volunteer_id,
            },
            None => AssignmentOutcome::Created { assignment },
        })
    }

    /// Removing a pairing that does not exist succeeds; the flag reports whether one did.
    pub fn unassign(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        member_id: &UserId,
    ) -> Result<bool, BuddyError> {
        self.authorize(actor)?;
        let removed = self.store.remove_buddy(program_id, member_id)?;
        if removed.is_some() {
            info!(program_id = %program_id, member_id = %member_id, "buddy unassigned");
        }
        Ok(removed.is_some())
    }

    pub fn lookup(
        &self,
        program_id: &ProgramId,
        member_id: &UserId,
    ) -> Result<Option<UserId>, RepositoryError> {
        Ok(self
            .store
            .fetch_buddy(program_id, member_id)?
            .map(|link| link.volunteer_id))
    }

    /// member -> volunteer for one program, read once for roster merges.
    pub fn buddy_map(&self, program_id: &ProgramId) -> Result<HashMap<UserId, UserId>, RepositoryError> {
        Ok(self
            .store
            .buddies_for_program(program_id)?
            .into_iter()
            .map(|link| (link.member_id, link.volunteer_id))
            .collect())
    }

    pub fn toggle_lead(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        volunteer_id: &UserId,
    ) -> Result<bool, BuddyError> {
        self.authorize(actor)?;
        let lead = self
            .store
            .toggle_lead(program_id, volunteer_id)
            .map_err(|error| match error {
                RepositoryError::NotFound => BuddyError::ProgramNotFound,
                other => other.into(),
            })?;
        info!(program_id = %program_id, volunteer_id = %volunteer_id, lead, "volunteer lead toggled");
        Ok(lead)
    }

    fn approved(&self, user_id: &UserId, program_id: &ProgramId) -> Result<bool, RepositoryError> {
        Ok(self
            .store
            .find_enrollment(user_id, program_id)?
            .map(|enrollment| enrollment.status.is_approved())
            .unwrap_or(false))
    }

    fn authorize(&self, actor: &Actor) -> Result<(), BuddyError> {
        if actor.capabilities().manage_programs {
            Ok(())
        } else {
            Err(BuddyError::Forbidden)
        }
    }
}
