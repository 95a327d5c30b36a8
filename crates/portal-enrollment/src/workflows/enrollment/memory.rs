//! In-process backend used by the API service, the demo and the test-suite.
//!
//! Occupancy counters live in `AtomicU32`s and are only touched with `fetch_add` /
//! `fetch_update`, the in-memory equivalent of `UPDATE programs SET enrolled = enrolled + 1`.
//! Writes that span several rows take the table write lock for their whole unit of work.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use tracing::warn;

use super::domain::{
    AttendanceRecord, BuddyAssignment, Enrollment, EnrollmentId, EnrollmentSettings, EnrollmentStatus, Program,
    ProgramId, ProgramUpdate, Role, RoleRequirement, SettingsChange, SurveyId,
    UnavailableReason, UserAccount, UserId,
};
use super::repository::{
    AttendanceStore, BatchCommit, BuddyCascade, BuddyUpsert, CheckoutBatch, CommittedChange, CounterAdjustment,
    CounterDelta,
    EnrollmentRemoval, EnrollmentStore, PaymentRecord, RejectedProgram, RepositoryError,
    RequirementStore, StatusChange, SurveyResponses, UserDirectory,
};

#[derive(Debug)]
struct ProgramRow {
    program: Program,
    enrolled: AtomicU32,
}

impl ProgramRow {
    fn new(program: Program) -> Self {
        let enrolled = AtomicU32::new(program.enrolled);
        Self { program, enrolled }
    }

    fn snapshot(&self) -> Program {
        let mut program = self.program.clone();
        program.enrolled = self.enrolled.load(Ordering::Acquire);
        program
    }

    fn adjust(&self, delta: CounterDelta) -> CounterAdjustment {
        let (enrolled, clamped) = match delta {
            CounterDelta::Increment => {
                let previous = self.enrolled.fetch_add(1, Ordering::AcqRel);
                (previous.saturating_add(1), false)
            }
            CounterDelta::Decrement => match self.enrolled.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |current| current.checked_sub(1),
            ) {
                Ok(previous) => (previous - 1, false),
                Err(_) => (0, true),
            },
        };

        if clamped {
            warn!(
                program_id = %self.program.id,
                "occupancy counter decrement clamped at zero; counter had drifted"
            );
        }

        CounterAdjustment {
            program_id: self.program.id,
            delta,
            enrolled,
            clamped,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    programs: HashMap<ProgramId, ProgramRow>,
    enrollments: HashMap<EnrollmentId, Enrollment>,
    by_pair: HashMap<(UserId, ProgramId), EnrollmentId>,
    payments: HashMap<String, PaymentRecord>,
    leads: HashSet<(ProgramId, UserId)>,
    attendance: HashMap<(ProgramId, UserId, NaiveDate), AttendanceRecord>,
}

impl Tables {
    fn approved(&self, user: &UserId, program: &ProgramId) -> bool {
        self.by_pair
            .get(&(*user, *program))
            .and_then(|id| self.enrollments.get(id))
            .map(|enrollment| enrollment.status.is_approved())
            .unwrap_or(false)
    }

    fn rejection(&self, program_id: &ProgramId) -> Option<RejectedProgram> {
        match self.programs.get(program_id) {
            None => Some(RejectedProgram {
                program_id: *program_id,
                name: None,
                reason: UnavailableReason::Missing,
            }),
            Some(row) => row
                .program
                .unavailability()
                .map(|reason| RejectedProgram {
                    program_id: *program_id,
                    name: Some(row.program.name.clone()),
                    reason,
                }),
        }
    }
}

/// Backend implementing every storage and collaborator trait in memory.
#[derive(Debug)]
pub struct InMemoryPortalStore {
    tables: RwLock<Tables>,
    buddies: DashMap<(ProgramId, UserId), BuddyAssignment>,
    requirements: DashMap<Role, RoleRequirement>,
    settings: RwLock<EnrollmentSettings>,
    completions: DashSet<(UserId, SurveyId)>,
    users: DashMap<UserId, UserAccount>,
}

impl Default for InMemoryPortalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPortalStore {
    pub fn new() -> Self {
        Self::with_settings(EnrollmentSettings::initial())
    }

    pub fn with_settings(settings: EnrollmentSettings) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            buddies: DashMap::new(),
            requirements: DashMap::new(),
            settings: RwLock::new(settings),
            completions: DashSet::new(),
            users: DashMap::new(),
        }
    }

    /// Mirrors an account from the identity provider.
    pub fn register_user(&self, account: UserAccount) {
        self.users.insert(account.id, account);
    }

    /// Mirrors a completed response from the survey store.
    pub fn record_completion(&self, user: UserId, survey: SurveyId) {
        self.completions.insert((user, survey));
    }

    fn release_buddies(
        &self,
        program: ProgramId,
        user: UserId,
        cascade: BuddyCascade,
    ) -> Vec<BuddyAssignment> {
        if cascade.is_empty() {
            return Vec::new();
        }

        let mut keys: Vec<(ProgramId, UserId)> = Vec::new();
        if cascade.as_volunteer {
            keys.extend(
                self.buddies
                    .iter()
                    .filter(|entry| {
                        entry.key().0 == program && entry.value().volunteer_id == user
                    })
                    .map(|entry| *entry.key()),
            );
        }
        if cascade.as_member {
            keys.push((program, user));
        }

        keys.into_iter()
            .filter_map(|key| self.buddies.remove(&key).map(|(_, link)| link))
            .collect()
    }
}

impl EnrollmentStore for InMemoryPortalStore {
    fn insert_program(&self, program: Program) -> Result<Program, RepositoryError> {
        let mut tables = self.tables.write();
        if tables.programs.contains_key(&program.id) {
            return Err(RepositoryError::Conflict);
        }
        let row = ProgramRow::new(program);
        let snapshot = row.snapshot();
        tables.programs.insert(snapshot.id, row);
        Ok(snapshot)
    }

    fn update_program(
        &self,
        id: &ProgramId,
        update: ProgramUpdate,
        at: DateTime<Utc>,
    ) -> Result<Program, RepositoryError> {
        let mut tables = self.tables.write();
        let row = tables
            .programs
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        update.apply(&mut row.program, at);
        Ok(row.snapshot())
    }

    fn fetch_program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError> {
        Ok(self.tables.read().programs.get(id).map(ProgramRow::snapshot))
    }

    fn list_programs(&self, include_archived: bool) -> Result<Vec<Program>, RepositoryError> {
        let tables = self.tables.read();
        let mut programs: Vec<Program> = tables
            .programs
            .values()
            .filter(|row| include_archived || !row.program.archived)
            .map(ProgramRow::snapshot)
            .collect();
        programs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(programs)
    }

    fn count_approved(&self, id: &ProgramId) -> Result<u32, RepositoryError> {
        let tables = self.tables.read();
        if !tables.programs.contains_key(id) {
            return Err(RepositoryError::NotFound);
        }
        let count = tables
            .enrollments
            .values()
            .filter(|enrollment| enrollment.program_id == *id && enrollment.status.is_approved())
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn fetch_enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, RepositoryError> {
        Ok(self.tables.read().enrollments.get(id).cloned())
    }

    fn find_enrollment(
        &self,
        user: &UserId,
        program: &ProgramId,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .by_pair
            .get(&(*user, *program))
            .and_then(|id| tables.enrollments.get(id))
            .cloned())
    }

    fn enrollments_for_program(&self, id: &ProgramId) -> Result<Vec<Enrollment>, RepositoryError> {
        let tables = self.tables.read();
        let mut rows: Vec<Enrollment> = tables
            .enrollments
            .values()
            .filter(|enrollment| enrollment.program_id == *id)
            .cloned()
            .collect();
        rows.sort_by_key(|enrollment| (enrollment.enrolled_at, enrollment.id));
        Ok(rows)
    }

    fn enrollments_for_user(&self, id: &UserId) -> Result<Vec<Enrollment>, RepositoryError> {
        let tables = self.tables.read();
        let mut rows: Vec<Enrollment> = tables
            .enrollments
            .values()
            .filter(|enrollment| enrollment.user_id == *id)
            .cloned()
            .collect();
        rows.sort_by_key(|enrollment| {
            (
                enrollment.preference_order.unwrap_or(u32::MAX),
                enrollment.enrolled_at,
            )
        });
        Ok(rows)
    }

    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError> {
        let mut tables = self.tables.write();
        let tables = &mut *tables;
        let pair = (enrollment.user_id, enrollment.program_id);
        if tables.by_pair.contains_key(&pair) || tables.enrollments.contains_key(&enrollment.id) {
            return Err(RepositoryError::Conflict);
        }
        let row = tables
            .programs
            .get(&enrollment.program_id)
            .ok_or(RepositoryError::NotFound)?;
        if enrollment.status.is_approved() {
            row.adjust(CounterDelta::Increment);
        }
        tables.by_pair.insert(pair, enrollment.id);
        tables.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }

    fn commit_status_change(&self, change: StatusChange) -> Result<CommittedChange, RepositoryError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let enrollment = tables
            .enrollments
            .get_mut(&change.enrollment_id)
            .ok_or(RepositoryError::NotFound)?;
        if enrollment.status != change.expected {
            return Err(RepositoryError::StaleWrite);
        }
        let row = tables
            .programs
            .get(&enrollment.program_id)
            .ok_or(RepositoryError::NotFound)?;

        enrollment.status = change.next;
        enrollment.updated_at = change.assigned_at;
        enrollment.assigned_by = Some(change.assigned_by);
        enrollment.assigned_at = Some(change.assigned_at);
        if let Some(notes) = change.notes {
            enrollment.assignment_notes = notes;
        }

        let counter = change.counter.map(|delta| row.adjust(delta));
        let enrollment = enrollment.clone();
        let released =
            self.release_buddies(enrollment.program_id, enrollment.user_id, change.cascade);

        Ok(CommittedChange {
            enrollment,
            counter,
            released,
        })
    }

    fn remove_enrollment(
        &self,
        removal: EnrollmentRemoval,
    ) -> Result<Option<CommittedChange>, RepositoryError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let Some(current) = tables.enrollments.get(&removal.enrollment_id) else {
            return Ok(None);
        };
        if current.status != removal.expected {
            return Err(RepositoryError::StaleWrite);
        }

        let counter = match (removal.counter, tables.programs.get(&current.program_id)) {
            (Some(delta), Some(row)) => Some(row.adjust(delta)),
            _ => None,
        };

        let enrollment = tables
            .enrollments
            .remove(&removal.enrollment_id)
            .ok_or(RepositoryError::NotFound)?;
        tables
            .by_pair
            .remove(&(enrollment.user_id, enrollment.program_id));
        let released =
            self.release_buddies(enrollment.program_id, enrollment.user_id, removal.cascade);

        Ok(Some(CommittedChange {
            enrollment,
            counter,
            released,
        }))
    }

    fn commit_checkout(&self, batch: CheckoutBatch) -> Result<BatchCommit, RepositoryError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        if let Some(payment) = &batch.payment {
            if let Some(record) = tables.payments.get(&payment.reference) {
                if record.user_id != batch.user_id {
                    return Err(RepositoryError::Conflict);
                }
                let enrollments = record
                    .enrollment_ids
                    .iter()
                    .filter_map(|id| tables.enrollments.get(id).cloned())
                    .collect();
                return Ok(BatchCommit::Replayed {
                    record: record.clone(),
                    enrollments,
                });
            }
        }

        let rejected: Vec<RejectedProgram> = batch
            .rows
            .iter()
            .filter_map(|row| tables.rejection(&row.program_id))
            .collect();
        if !rejected.is_empty() {
            return Ok(BatchCommit::Rejected(rejected));
        }

        let reference = batch.payment.as_ref().map(|payment| payment.reference.clone());
        let mut created = Vec::new();
        let mut already_enrolled = Vec::new();
        for mut row in batch.rows {
            let pair = (row.user_id, row.program_id);
            if let Some(existing) = tables
                .by_pair
                .get(&pair)
                .and_then(|id| tables.enrollments.get(id))
            {
                already_enrolled.push(existing.clone());
                continue;
            }
            row.payment_reference = reference.clone();
            tables.by_pair.insert(pair, row.id);
            tables.enrollments.insert(row.id, row.clone());
            created.push(row);
        }

        if let Some(mut payment) = batch.payment {
            payment.enrollment_ids = created.iter().map(|row| row.id).collect();
            tables.payments.insert(payment.reference.clone(), payment);
        }

        Ok(BatchCommit::Committed {
            created,
            already_enrolled,
        })
    }

    fn payment_record(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        Ok(self.tables.read().payments.get(reference).cloned())
    }

    fn upsert_buddy(
        &self,
        mut assignment: BuddyAssignment,
    ) -> Result<BuddyUpsert, RepositoryError> {
        // Held across the write so a concurrent status change cannot slip in between.
        let tables = self.tables.read();
        if !tables.approved(&assignment.member_id, &assignment.program_id) {
            return Err(RepositoryError::PreconditionFailed(
                "member enrollment is not approved".to_string(),
            ));
        }
        if !tables.approved(&assignment.volunteer_id, &assignment.program_id) {
            return Err(RepositoryError::PreconditionFailed(
                "volunteer enrollment is not approved".to_string(),
            ));
        }

        let key = (assignment.program_id, assignment.member_id);
        if let Some(existing) = self.buddies.get(&key) {
            assignment.created_at = existing.created_at;
        }
        let replaced = self.buddies.insert(key, assignment.clone());
        Ok(BuddyUpsert {
            stored: assignment,
            replaced,
        })
    }

    fn remove_buddy(
        &self,
        program: &ProgramId,
        member: &UserId,
    ) -> Result<Option<BuddyAssignment>, RepositoryError> {
        Ok(self
            .buddies
            .remove(&(*program, *member))
            .map(|(_, link)| link))
    }

    fn fetch_buddy(
        &self,
        program: &ProgramId,
        member: &UserId,
    ) -> Result<Option<BuddyAssignment>, RepositoryError> {
        Ok(self
            .buddies
            .get(&(*program, *member))
            .map(|entry| entry.value().clone()))
    }

    fn buddies_for_program(
        &self,
        id: &ProgramId,
    ) -> Result<Vec<BuddyAssignment>, RepositoryError> {
        Ok(self
            .buddies
            .iter()
            .filter(|entry| entry.key().0 == *id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn toggle_lead(&self, program: &ProgramId, volunteer: &UserId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write();
        if !tables.programs.contains_key(program) {
            return Err(RepositoryError::NotFound);
        }
        let key = (*program, *volunteer);
        if tables.leads.remove(&key) {
            Ok(false)
        } else {
            tables.leads.insert(key);
            Ok(true)
        }
    }

    fn leads_for_program(&self, id: &ProgramId) -> Result<Vec<UserId>, RepositoryError> {
        let tables = self.tables.read();
        let mut leads: Vec<UserId> = tables
            .leads
            .iter()
            .filter(|(program, _)| program == id)
            .map(|(_, volunteer)| *volunteer)
            .collect();
        leads.sort();
        Ok(leads)
    }
}

impl RequirementStore for InMemoryPortalStore {
    fn requirement_for(&self, role: Role) -> Result<Option<RoleRequirement>, RepositoryError> {
        Ok(self
            .requirements
            .get(&role)
            .map(|entry| entry.value().clone()))
    }

    fn requirements(&self) -> Result<Vec<RoleRequirement>, RepositoryError> {
        let mut all: Vec<RoleRequirement> = self
            .requirements
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|requirement| requirement.role);
        Ok(all)
    }

    fn upsert_requirement(
        &self,
        requirement: RoleRequirement,
    ) -> Result<RoleRequirement, RepositoryError> {
        self.requirements
            .insert(requirement.role, requirement.clone());
        Ok(requirement)
    }

    fn enrollment_settings(&self) -> Result<EnrollmentSettings, RepositoryError> {
        Ok(self.settings.read().clone())
    }

    fn replace_enrollment_settings(
        &self,
        expected_version: u64,
        change: SettingsChange,
    ) -> Result<EnrollmentSettings, RepositoryError> {
        let mut settings = self.settings.write();
        if settings.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                current: settings.version,
            });
        }

        *settings = EnrollmentSettings {
            version: settings.version + 1,
            enrollment_open: change.enrollment_open,
            closure_reason: change.closure_reason,
            updated_by: Some(change.updated_by),
            updated_at: Some(change.updated_at),
        };
        Ok(settings.clone())
    }
}

impl AttendanceStore for InMemoryPortalStore {
    fn record_attendance(
        &self,
        program: &ProgramId,
        records: Vec<AttendanceRecord>,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        if !tables.programs.contains_key(program) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(record) = records
            .iter()
            .find(|record| record.program_id != *program || !tables.approved(&record.user_id, program))
        {
            return Err(RepositoryError::PreconditionFailed(format!(
                "user {} has no approved enrollment in the program",
                record.user_id
            )));
        }

        let mut stored = Vec::with_capacity(records.len());
        for mut record in records {
            let key = (record.program_id, record.user_id, record.date);
            if let Some(existing) = tables.attendance.get(&key) {
                record.id = existing.id;
                record.created_at = existing.created_at;
            }
            tables.attendance.insert(key, record.clone());
            stored.push(record);
        }
        Ok(stored)
    }

    fn attendance_on(
        &self,
        program: &ProgramId,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .attendance
            .values()
            .filter(|record| record.program_id == *program && record.date == date)
            .cloned()
            .collect())
    }

    fn attendance_for_program(
        &self,
        program: &ProgramId,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .attendance
            .values()
            .filter(|record| record.program_id == *program)
            .cloned()
            .collect())
    }

    fn attendance_for_user(&self, user: &UserId) -> Result<Vec<AttendanceRecord>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .attendance
            .values()
            .filter(|record| record.user_id == *user)
            .cloned()
            .collect())
    }

    fn delete_attendance_on(
        &self,
        program: &ProgramId,
        date: NaiveDate,
    ) -> Result<usize, RepositoryError> {
        let mut tables = self.tables.write();
        let before = tables.attendance.len();
        tables
            .attendance
            .retain(|(record_program, _, record_date), _| {
                record_program != program || *record_date != date
            });
        Ok(before - tables.attendance.len())
    }
}

impl SurveyResponses for InMemoryPortalStore {
    fn has_completed(&self, user: &UserId, survey: &SurveyId) -> Result<bool, RepositoryError> {
        Ok(self.completions.contains(&(*user, *survey)))
    }
}

impl UserDirectory for InMemoryPortalStore {
    fn fetch_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError> {
        Ok(self.users.get(id).map(|entry| entry.value().clone()))
    }
}
