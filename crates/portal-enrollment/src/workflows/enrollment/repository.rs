//! Storage and collaborator contracts consumed by the enrollment components.
//!
//! Every write that must be atomic is expressed as one method taking a complete unit of work
//! (`StatusChange`, `EnrollmentRemoval`, `CheckoutBatch`) so a SQL backend can map it onto a
//! single transaction and the in-memory backend onto a single lock scope.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{
    AttendanceRecord, BuddyAssignment, Enrollment, EnrollmentId, EnrollmentSettings, EnrollmentStatus, Program,
    ProgramId, ProgramUpdate, Role, RoleRequirement, SelectionId, SettingsChange, SurveyId,
    UnavailableReason, UserAccount, UserId,
};

/// Direction of a single occupancy counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterDelta {
    Increment,
    Decrement,
}

/// Counter value after an atomic update. `clamped` marks a decrement that hit zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAdjustment {
    pub program_id: ProgramId,
    pub delta: CounterDelta,
    pub enrolled: u32,
    pub clamped: bool,
}

/// Compare-and-set status write plus the counter update and buddy cascade it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub enrollment_id: EnrollmentId,
    pub expected: EnrollmentStatus,
    pub next: EnrollmentStatus,
    pub counter: Option<CounterDelta>,
    pub assigned_by: UserId,
    pub assigned_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub cascade: BuddyCascade,
}

/// Buddy links to drop together with a status change or deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuddyCascade {
    /// Links naming the enrollment's user as volunteer in the program.
    pub as_volunteer: bool,
    /// The link keyed by the enrollment's user as member in the program.
    pub as_member: bool,
}

impl BuddyCascade {
    pub const NONE: Self = Self {
        as_volunteer: false,
        as_member: false,
    };

    pub fn is_empty(&self) -> bool {
        !self.as_volunteer && !self.as_member
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedChange {
    pub enrollment: Enrollment,
    pub counter: Option<CounterAdjustment>,
    pub released: Vec<BuddyAssignment>,
}

/// Administrative deletion, guarded by the status the caller observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRemoval {
    pub enrollment_id: EnrollmentId,
    pub expected: EnrollmentStatus,
    pub counter: Option<CounterDelta>,
    pub cascade: BuddyCascade,
}

/// A program that blocked a checkout batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedProgram {
    pub program_id: ProgramId,
    pub name: Option<String>,
    pub reason: UnavailableReason,
}

/// Proof of a consumed payment; the reference is unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub reference: String,
    pub user_id: UserId,
    /// Selection whose confirmation consumed the reference.
    pub selection_id: SelectionId,
    pub amount: Decimal,
    pub currency: String,
    pub enrollment_ids: Vec<EnrollmentId>,
    pub recorded_at: DateTime<Utc>,
}

/// All rows of one confirmed selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutBatch {
    pub user_id: UserId,
    pub rows: Vec<Enrollment>,
    pub payment: Option<PaymentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchCommit {
    Committed {
        created: Vec<Enrollment>,
        already_enrolled: Vec<Enrollment>,
    },
    /// The payment reference was consumed earlier by the same user.
    Replayed {
        record: PaymentRecord,
        enrollments: Vec<Enrollment>,
    },
    Rejected(Vec<RejectedProgram>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyUpsert {
    pub stored: BuddyAssignment,
    pub replaced: Option<BuddyAssignment>,
}

/// Programs, enrollments, buddy links, volunteer leads and payment records.
pub trait EnrollmentStore: Send + Sync {
    fn insert_program(&self, program: Program) -> Result<Program, RepositoryError>;
    fn update_program(
        &self,
        id: &ProgramId,
        update: ProgramUpdate,
        at: DateTime<Utc>,
    ) -> Result<Program, RepositoryError>;
    fn fetch_program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError>;
    fn list_programs(&self, include_archived: bool) -> Result<Vec<Program>, RepositoryError>;
    /// True count of approved rows, independent of the stored counter.
    fn count_approved(&self, id: &ProgramId) -> Result<u32, RepositoryError>;

    fn fetch_enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, RepositoryError>;
    fn find_enrollment(
        &self,
        user: &UserId,
        program: &ProgramId,
    ) -> Result<Option<Enrollment>, RepositoryError>;
    fn enrollments_for_program(&self, id: &ProgramId) -> Result<Vec<Enrollment>, RepositoryError>;
    fn enrollments_for_user(&self, id: &UserId) -> Result<Vec<Enrollment>, RepositoryError>;
    /// Fails with `Conflict` when the (user, program) pair already exists.
    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError>;
    /// Applies the status, the counter delta (`enrolled = enrolled ± 1`, floored at zero) and
    /// the buddy cascade as one unit. Fails with `StaleWrite` if the stored status differs from
    /// `expected`.
    fn commit_status_change(&self, change: StatusChange) -> Result<CommittedChange, RepositoryError>;
    /// Returns `None` when the row is already gone.
    fn remove_enrollment(
        &self,
        removal: EnrollmentRemoval,
    ) -> Result<Option<CommittedChange>, RepositoryError>;
    /// Re-validates program availability and inserts every row, or none.
    fn commit_checkout(&self, batch: CheckoutBatch) -> Result<BatchCommit, RepositoryError>;
    fn payment_record(&self, reference: &str) -> Result<Option<PaymentRecord>, RepositoryError>;

    /// Upserts the (program, member) link and returns the stored row with the one it replaced.
    /// Fails with `PreconditionFailed` unless both the member's and the volunteer's enrollments
    /// are approved at write time.
    fn upsert_buddy(
        &self,
        assignment: BuddyAssignment,
    ) -> Result<BuddyUpsert, RepositoryError>;
    fn remove_buddy(
        &self,
        program: &ProgramId,
        member: &UserId,
    ) -> Result<Option<BuddyAssignment>, RepositoryError>;
    fn fetch_buddy(
        &self,
        program: &ProgramId,
        member: &UserId,
    ) -> Result<Option<BuddyAssignment>, RepositoryError>;
    fn buddies_for_program(&self, id: &ProgramId)
        -> Result<Vec<BuddyAssignment>, RepositoryError>;

    /// Flips the lead flag and returns the new value.
    fn toggle_lead(&self, program: &ProgramId, volunteer: &UserId) -> Result<bool, RepositoryError>;
    fn leads_for_program(&self, id: &ProgramId) -> Result<Vec<UserId>, RepositoryError>;
}

/// Role requirements and the versioned settings value.
pub trait RequirementStore: Send + Sync {
    fn requirement_for(&self, role: Role) -> Result<Option<RoleRequirement>, RepositoryError>;
    fn requirements(&self) -> Result<Vec<RoleRequirement>, RepositoryError>;
    fn upsert_requirement(
        &self,
        requirement: RoleRequirement,
    ) -> Result<RoleRequirement, RepositoryError>;
    /// The one accessor for the settings value; backends initialize it on construction.
    fn enrollment_settings(&self) -> Result<EnrollmentSettings, RepositoryError>;
    /// Fails with `VersionConflict` unless the stored version equals `expected_version`.
    fn replace_enrollment_settings(
        &self,
        expected_version: u64,
        change: SettingsChange,
    ) -> Result<EnrollmentSettings, RepositoryError>;
}

/// Attendance records keyed by (program, user, date).
pub trait AttendanceStore: Send + Sync {
    /// Upserts every record or none, keeping the id and `created_at` of a replaced row. Fails
    /// with `PreconditionFailed` unless each user's enrollment in the program is approved at
    /// write time.
    fn record_attendance(
        &self,
        program: &ProgramId,
        records: Vec<AttendanceRecord>,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError>;
    fn attendance_on(
        &self,
        program: &ProgramId,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError>;
    fn attendance_for_program(
        &self,
        program: &ProgramId,
    ) -> Result<Vec<AttendanceRecord>, RepositoryError>;
    fn attendance_for_user(&self, user: &UserId) -> Result<Vec<AttendanceRecord>, RepositoryError>;
    /// Returns how many records were removed.
    fn delete_attendance_on(
        &self,
        program: &ProgramId,
        date: NaiveDate,
    ) -> Result<usize, RepositoryError>;
}

/// Survey/response collaborator.
pub trait SurveyResponses: Send + Sync {
    fn has_completed(&self, user: &UserId, survey: &SurveyId) -> Result<bool, RepositoryError>;
}

/// Identity collaborator.
pub trait UserDirectory: Send + Sync {
    fn fetch_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError>;
}

/// Everything the portal facade needs from one backend.
pub trait PortalBackend:
    EnrollmentStore + RequirementStore + AttendanceStore + SurveyResponses + UserDirectory
{
}

impl<T> PortalBackend for T where
    T: EnrollmentStore + RequirementStore + AttendanceStore + SurveyResponses + UserDirectory
{
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently")]
    StaleWrite,
    #[error("settings version {expected} is stale (current {current})")]
    VersionConflict { expected: u64, current: u64 },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Committed status change handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub enrollment_id: EnrollmentId,
    pub user_id: UserId,
    pub program_id: ProgramId,
    pub previous: Option<EnrollmentStatus>,
    pub next: Option<EnrollmentStatus>,
    pub actor_id: UserId,
    pub at: DateTime<Utc>,
    pub enrolled_after: Option<u32>,
    pub drift_detected: bool,
}

/// Trait describing outbound transition hooks (documents, notifications).
pub trait TransitionPublisher: Send + Sync {
    fn publish(&self, event: TransitionEvent) -> Result<(), PublishError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("transition transport unavailable: {0}")]
    Transport(String),
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl TransitionPublisher for NoopPublisher {
    fn publish(&self, _event: TransitionEvent) -> Result<(), PublishError> {
        Ok(())
    }
}
