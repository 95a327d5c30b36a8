//! Per-session attendance for approved participants, and the volunteer hours it adds up to.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    Actor, AttendanceId, AttendanceRecord, AttendanceStatus, EnrollmentStatus, ProgramId, Role,
    UserId,
};
use super::repository::{AttendanceStore, EnrollmentStore, RepositoryError, UserDirectory};

/// Hours offered for a volunteer-side participant who has no record yet.
pub fn default_volunteer_hours() -> Decimal {
    Decimal::new(150, 2)
}

fn max_hours() -> Decimal {
    Decimal::new(99_999, 2)
}

/// Staff input for one participant on one date.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttendanceEntry {
    pub user_id: UserId,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub hours: Option<Decimal>,
    #[serde(default)]
    pub notes: String,
}

/// A row of the attendance sheet; `recorded` is false while the defaults are shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceLine {
    pub user_id: UserId,
    pub name: String,
    pub role: Option<Role>,
    pub is_volunteer: bool,
    pub status: AttendanceStatus,
    pub hours: Option<Decimal>,
    pub notes: String,
    pub recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceSheet {
    pub program_id: ProgramId,
    pub program_name: String,
    pub date: NaiveDate,
    pub participants: Vec<AttendanceLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceDay {
    pub date: NaiveDate,
    pub participant_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub program_id: ProgramId,
    pub program_name: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub hours: Option<Decimal>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceOverview {
    pub records: Vec<AttendanceSummary>,
    /// Hours only add up for volunteer-side roles.
    pub counts_hours: bool,
    pub total_hours: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("only staff may manage attendance")]
    Forbidden,
    #[error("program not found")]
    ProgramNotFound,
    #[error("user {0} has no approved enrollment in this program")]
    NotApproved(UserId),
    #[error("{0}")]
    InvalidEntry(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Attendance sheets per program and date.
pub struct AttendanceBook<S> {
    store: Arc<S>,
}

impl<S> Clone for AttendanceBook<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> AttendanceBook<S>
where
    S: EnrollmentStore + AttendanceStore + UserDirectory,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every approved participant with the record for `date`, or the defaults when none exists.
    pub fn sheet(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        date: NaiveDate,
    ) -> Result<AttendanceSheet, AttendanceError> {
        authorize(actor)?;
        let program = self
            .store
            .fetch_program(program_id)?
            .ok_or(AttendanceError::ProgramNotFound)?;

        let recorded: HashMap<UserId, AttendanceRecord> = self
            .store
            .attendance_on(program_id, date)?
            .into_iter()
            .map(|record| (record.user_id, record))
            .collect();

        let mut participants = Vec::new();
        for enrollment in self.store.enrollments_for_program(program_id)? {
            if enrollment.status != EnrollmentStatus::Approved {
                continue;
            }
            let account = self.store.fetch_user(&enrollment.user_id)?;
            let role = account.as_ref().map(|account| account.role);
            let is_volunteer = role.map(Role::serves_as_volunteer).unwrap_or(false);
            let name = account
                .map(|account| account.profile.name)
                .unwrap_or_else(|| "Unknown user".to_string());

            participants.push(match recorded.get(&enrollment.user_id) {
                Some(record) => AttendanceLine {
                    user_id: enrollment.user_id,
                    name,
                    role,
                    is_volunteer,
                    status: record.status,
                    hours: record.hours,
                    notes: record.notes.clone(),
                    recorded: true,
                },
                None => AttendanceLine {
                    user_id: enrollment.user_id,
                    name,
                    role,
                    is_volunteer,
                    status: AttendanceStatus::Present,
                    hours: is_volunteer.then(default_volunteer_hours),
                    notes: String::new(),
                    recorded: false,
                },
            });
        }
        participants.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        Ok(AttendanceSheet {
            program_id: program.id,
            program_name: program.name,
            date,
            participants,
        })
    }

    /// Saves the entries for `date` as one unit; a re-submitted participant is overwritten.
    pub fn record(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        date: NaiveDate,
        entries: Vec<AttendanceEntry>,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        authorize(actor)?;
        if self.store.fetch_program(program_id)?.is_none() {
            return Err(AttendanceError::ProgramNotFound);
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.user_id) {
                return Err(AttendanceError::InvalidEntry(format!(
                    "user {} appears more than once",
                    entry.user_id
                )));
            }
            validate_hours(entry.hours)?;
            if let Some(user_id) = self.first_unapproved(program_id, [entry.user_id])? {
                return Err(AttendanceError::NotApproved(user_id));
            }
        }

        let now = Utc::now();
        let user_ids: Vec<UserId> = entries.iter().map(|entry| entry.user_id).collect();
        let records = entries
            .into_iter()
            .map(|entry| AttendanceRecord {
                id: AttendanceId::new(),
                program_id: *program_id,
                user_id: entry.user_id,
                date,
                status: entry.status,
                hours: entry.hours,
                notes: entry.notes.trim().to_string(),
                created_at: now,
                updated_at: now,
            })
            .collect();

        let stored = match self.store.record_attendance(program_id, records) {
            Ok(stored) => stored,
            Err(RepositoryError::PreconditionFailed(detail)) => {
                return Err(match self.first_unapproved(program_id, user_ids)? {
                    Some(user_id) => AttendanceError::NotApproved(user_id),
                    None => RepositoryError::PreconditionFailed(detail).into(),
                });
            }
            Err(RepositoryError::NotFound) => return Err(AttendanceError::ProgramNotFound),
            Err(error) => return Err(error.into()),
        };
        info!(
            program_id = %program_id,
            %date,
            participants = stored.len(),
            "attendance recorded"
        );
        Ok(stored)
    }

    /// Dates with records, newest first.
    pub fn days(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
    ) -> Result<Vec<AttendanceDay>, AttendanceError> {
        authorize(actor)?;
        if self.store.fetch_program(program_id)?.is_none() {
            return Err(AttendanceError::ProgramNotFound);
        }

        let mut participants: HashMap<NaiveDate, HashSet<UserId>> = HashMap::new();
        for record in self.store.attendance_for_program(program_id)? {
            participants
                .entry(record.date)
                .or_default()
                .insert(record.user_id);
        }
        let mut days: Vec<AttendanceDay> = participants
            .into_iter()
            .map(|(date, users)| AttendanceDay {
                date,
                participant_count: users.len(),
            })
            .collect();
        days.sort_by_key(|day| Reverse(day.date));
        Ok(days)
    }

    pub fn delete_day(
        &self,
        actor: &Actor,
        program_id: &ProgramId,
        date: NaiveDate,
    ) -> Result<usize, AttendanceError> {
        authorize(actor)?;
        if self.store.fetch_program(program_id)?.is_none() {
            return Err(AttendanceError::ProgramNotFound);
        }
        let removed = self.store.delete_attendance_on(program_id, date)?;
        info!(program_id = %program_id, %date, removed, "attendance deleted");
        Ok(removed)
    }

    pub fn my_attendance(&self, actor: &Actor) -> Result<AttendanceOverview, RepositoryError> {
        let counts_hours = actor.role().serves_as_volunteer();
        let mut names: HashMap<ProgramId, String> = HashMap::new();
        let mut records = Vec::new();
        let mut total_hours = Decimal::ZERO;

        for record in self.store.attendance_for_user(&actor.id())? {
            if !names.contains_key(&record.program_id) {
                let name = self
                    .store
                    .fetch_program(&record.program_id)?
                    .map(|program| program.name)
                    .unwrap_or_default();
                names.insert(record.program_id, name);
            }
            if counts_hours {
                total_hours += record.hours.unwrap_or(Decimal::ZERO);
            }
            records.push(AttendanceSummary {
                program_id: record.program_id,
                program_name: names
                    .get(&record.program_id)
                    .cloned()
                    .unwrap_or_default(),
                date: record.date,
                status: record.status,
                hours: record.hours,
                notes: record.notes,
            });
        }
        records.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.program_name.cmp(&b.program_name))
        });

        Ok(AttendanceOverview {
            records,
            counts_hours,
            total_hours,
        })
    }

    fn first_unapproved(
        &self,
        program_id: &ProgramId,
        user_ids: impl IntoIterator<Item = UserId>,
    ) -> Result<Option<UserId>, RepositoryError> {
        for user_id in user_ids {
            let approved = self
                .store
                .find_enrollment(&user_id, program_id)?
                .map(|enrollment| enrollment.status.is_approved())
                .unwrap_or(false);
            if !approved {
                return Ok(Some(user_id));
            }
        }
        Ok(None)
    }
}

fn authorize(actor: &Actor) -> Result<(), AttendanceError> {
    if actor.capabilities().review_enrollments {
        Ok(())
    } else {
        Err(AttendanceError::Forbidden)
    }
}

fn validate_hours(hours: Option<Decimal>) -> Result<(), AttendanceError> {
    match hours {
        Some(hours) if hours.is_sign_negative() || hours.scale() > 2 || hours > max_hours() => {
            Err(AttendanceError::InvalidEntry(
                "hours must be between 0 and 999.99 with at most two decimal places".to_string(),
            ))
        }
        _ => Ok(()),
    }
}
