use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{
    Actor, Enrollment, EnrollmentId, EnrollmentStatus, Program, ProgramId, Role, UserAccount,
    UserId,
};
use super::ledger::ProgramAvailability;
use super::repository::{EnrollmentStore, RepositoryError, UserDirectory};

const UNKNOWN_USER: &str = "Unknown user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonRef {
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub enrollment_id: EnrollmentId,
    pub user_id: UserId,
    pub name: String,
    pub role: Option<Role>,
    pub status: EnrollmentStatus,
    pub preference_order: Option<u32>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assignment_notes: String,
    /// Volunteer paired with this member.
    pub buddy: Option<PersonRef>,
    /// Members paired with this volunteer.
    pub paired_members: Vec<PersonRef>,
    pub is_lead: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusGroups {
    pub approved: Vec<RosterEntry>,
    pub pending: Vec<RosterEntry>,
    pub waitlisted: Vec<RosterEntry>,
    pub rejected: Vec<RosterEntry>,
    pub withdrawn: Vec<RosterEntry>,
}

impl StatusGroups {
    fn push(&mut self, entry: RosterEntry) {
        let group = match entry.status {
            EnrollmentStatus::Approved => &mut self.approved,
            EnrollmentStatus::Pending => &mut self.pending,
            EnrollmentStatus::Waitlisted => &mut self.waitlisted,
            EnrollmentStatus::Rejected => &mut self.rejected,
            EnrollmentStatus::Withdrawn => &mut self.withdrawn,
        };
        group.push(entry);
    }

    fn sort(&mut self) {
        self.approved
            .sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        self.pending.sort_by_key(|entry| entry.enrolled_at);
        self.waitlisted.sort_by_key(|entry| entry.enrolled_at);
        self.rejected.sort_by_key(|entry| Reverse(entry.updated_at));
        self.withdrawn.sort_by_key(|entry| Reverse(entry.updated_at));
    }

    pub fn len(&self) -> usize {
        self.approved.len()
            + self.pending.len()
            + self.waitlisted.len()
            + self.rejected.len()
            + self.withdrawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramRoster {
    pub program: Program,
    pub availability: ProgramAvailability,
    pub members: StatusGroups,
    pub volunteers: StatusGroups,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentSummary {
    pub enrollment_id: EnrollmentId,
    pub program_id: ProgramId,
    pub program_name: String,
    pub fee: Decimal,
    pub status: EnrollmentStatus,
    pub preference_order: Option<u32>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserEnrollmentOverview {
    pub approved: Vec<EnrollmentSummary>,
    pub pending: Vec<EnrollmentSummary>,
    pub waitlisted: Vec<EnrollmentSummary>,
    /// Rejected and withdrawn enrollments.
    pub inactive: Vec<EnrollmentSummary>,
    pub approved_total_fee: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("only staff may view program rosters")]
    Forbidden,
    #[error("program not found")]
    ProgramNotFound,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Read models for staff rosters and the "my enrollments" page.
pub struct RosterViews<S> {
    store: Arc<S>,
}

impl<S> Clone for RosterViews<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> RosterViews<S>
where
    S: EnrollmentStore + UserDirectory,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn program_roster(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
    ) -> Result<ProgramRoster, RosterError> {
        if !actor.capabilities().review_enrollments {
            return Err(RosterError::Forbidden);
        }
        let program = self
            .store
            .fetch_program(program_id)?
            .ok_or(RosterError::ProgramNotFound)?;

        let enrollments = self.store.enrollments_for_program(program_id)?;
        let buddies: HashMap<UserId, UserId> = self
            .store
            .buddies_for_program(program_id)?
            .into_iter()
            .map(|link| (link.member_id, link.volunteer_id))
            .collect();
        let leads: HashSet<UserId> = self.store.leads_for_program(program_id)?.into_iter().collect();

        let mut accounts: HashMap<UserId, UserAccount> = HashMap::new();
        for user_id in enrollments
            .iter()
            .map(|enrollment| enrollment.user_id)
            .chain(buddies.values().copied())
        {
            if accounts.contains_key(&user_id) {
                continue;
            }
            if let Some(account) = self.store.fetch_user(&user_id)? {
                accounts.insert(user_id, account);
            }
        }
        let person = |user_id: UserId| PersonRef {
            user_id,
            name: accounts
                .get(&user_id)
                .map(|account| account.profile.name.clone())
                .unwrap_or_else(|| UNKNOWN_USER.to_string()),
        };

        let mut members = StatusGroups::default();
        let mut volunteers = StatusGroups::default();
        for enrollment in enrollments {
            let role = accounts.get(&enrollment.user_id).map(|account| account.role);
            let mut paired_members: Vec<PersonRef> = buddies
                .iter()
                .filter(|(_, volunteer)| **volunteer == enrollment.user_id)
                .map(|(member, _)| person(*member))
                .collect();
            paired_members.sort_by(|a, b| a.name.cmp(&b.name));

            let entry = RosterEntry {
                enrollment_id: enrollment.id,
                user_id: enrollment.user_id,
                name: person(enrollment.user_id).name,
                role,
                status: enrollment.status,
                preference_order: enrollment.preference_order,
                enrolled_at: enrollment.enrolled_at,
                updated_at: enrollment.updated_at,
                assignment_notes: enrollment.assignment_notes,
                buddy: buddies.get(&enrollment.user_id).map(|volunteer| person(*volunteer)),
                paired_members,
                is_lead: leads.contains(&enrollment.user_id),
            };

            match role {
                Some(role) if role.serves_as_volunteer() => volunteers.push(entry),
                _ => members.push(entry),
            }
        }
        members.sort();
        volunteers.sort();

        Ok(ProgramRoster {
            availability: ProgramAvailability::of(&program),
            program,
            members,
            volunteers,
        })
    }

    pub fn my_enrollments(&self, actor: &Actor) -> Result<UserEnrollmentOverview, RepositoryError> {
        let mut overview = UserEnrollmentOverview::default();
        for enrollment in self.store.enrollments_for_user(&actor.id())? {
            let Some(program) = self.store.fetch_program(&enrollment.program_id)? else {
                continue;
            };
            let summary = summarize(enrollment, &program);
            match summary.status {
                EnrollmentStatus::Approved => {
                    overview.approved_total_fee += summary.fee;
                    overview.approved.push(summary);
                }
                EnrollmentStatus::Pending => overview.pending.push(summary),
                EnrollmentStatus::Waitlisted => overview.waitlisted.push(summary),
                EnrollmentStatus::Rejected | EnrollmentStatus::Withdrawn => {
                    overview.inactive.push(summary)
                }
            }
        }
        Ok(overview)
    }
}

fn summarize(enrollment: Enrollment, program: &Program) -> EnrollmentSummary {
    EnrollmentSummary {
        enrollment_id: enrollment.id,
        program_id: program.id,
        program_name: program.name.clone(),
        fee: program.fee,
        status: enrollment.status,
        preference_order: enrollment.preference_order,
        enrolled_at: enrollment.enrolled_at,
        updated_at: enrollment.updated_at,
    }
}
