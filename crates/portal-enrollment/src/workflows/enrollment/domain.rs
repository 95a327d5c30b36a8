use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(raw.trim()).map(Self)
            }
        }
    };
}

identifier!(
    /// Account identifier issued by the identity provider.
    UserId
);
identifier!(ProgramId);
identifier!(EnrollmentId);
identifier!(SurveyId);
identifier!(AttendanceId);
identifier!(
    /// Identifier of a short-lived ranked selection.
    SelectionId
);

/// Organizational role carried on every account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Volunteer,
    PersonCenteredManager,
    Manager,
}

impl Role {
    pub const fn all() -> [Self; 4] {
        [
            Self::Member,
            Self::Volunteer,
            Self::PersonCenteredManager,
            Self::Manager,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Volunteer => "volunteer",
            Role::PersonCenteredManager => "person_centered_manager",
            Role::Manager => "manager",
        }
    }

    /// Volunteers, person-centered managers and managers all serve on the volunteer side.
    pub const fn serves_as_volunteer(self) -> bool {
        !matches!(self, Role::Member)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|role| role.label().eq_ignore_ascii_case(raw.trim()))
    }
}

/// What an actor may do, derived once per request from their role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub manage_programs: bool,
    pub review_enrollments: bool,
    pub manage_settings: bool,
    pub pays_for_enrollment: bool,
}

impl Capabilities {
    pub const fn for_role(role: Role) -> Self {
        let staff = matches!(role, Role::Manager);
        Self {
            manage_programs: staff,
            review_enrollments: staff,
            manage_settings: staff,
            pays_for_enrollment: matches!(role, Role::Member),
        }
    }
}

/// Profile fields that the completeness rule inspects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub age: Option<u16>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub emergency_contact_name: Option<String>,
}

impl UserProfile {
    /// Name, email, phone and age are required, plus at least one contact person.
    pub fn is_complete(&self) -> bool {
        let filled = |value: &Option<String>| {
            value
                .as_deref()
                .map(|text| !text.trim().is_empty())
                .unwrap_or(false)
        };

        !self.name.trim().is_empty()
            && filled(&self.email)
            && filled(&self.phone)
            && self.age.is_some()
            && (filled(&self.guardian_name) || filled(&self.emergency_contact_name))
    }
}

/// Account snapshot supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub role: Role,
    pub profile: UserProfile,
}

/// Authenticated caller of an operation with its capability predicate already evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    account: UserAccount,
    capabilities: Capabilities,
}

impl Actor {
    pub fn new(account: UserAccount) -> Self {
        let capabilities = Capabilities::for_role(account.role);
        Self {
            account,
            capabilities,
        }
    }

    pub fn id(&self) -> UserId {
        self.account.id
    }

    pub fn role(&self) -> Role {
        self.account.role
    }

    pub fn account(&self) -> &UserAccount {
        &self.account
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// A capacity-limited offering. `enrolled` is only ever moved by the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub fee: Decimal,
    pub capacity: Option<u32>,
    pub enrolled: u32,
    pub archived: bool,
    pub accepting_enrollments: bool,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    /// Whether new enrollment rows may reference this program right now.
    pub fn unavailability(&self) -> Option<UnavailableReason> {
        if self.archived {
            Some(UnavailableReason::Archived)
        } else if !self.accepting_enrollments {
            Some(UnavailableReason::NotAcceptingEnrollments)
        } else {
            None
        }
    }
}

/// Staff input for a new program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProgram {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default = "accepting_by_default")]
    pub accepting_enrollments: bool,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn accepting_by_default() -> bool {
    true
}

impl NewProgram {
    pub fn into_program(self, now: DateTime<Utc>) -> Program {
        Program {
            id: ProgramId::new(),
            name: self.name,
            description: self.description,
            fee: self.fee,
            capacity: self.capacity,
            enrolled: 0,
            archived: false,
            accepting_enrollments: self.accepting_enrollments,
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial program edit. There is deliberately no way to set `enrolled`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fee: Option<Decimal>,
    /// `Some(None)` clears the capacity (unlimited).
    #[serde(default, with = "double_option")]
    pub capacity: Option<Option<u32>>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default)]
    pub accepting_enrollments: Option<bool>,
    #[serde(default, with = "double_option")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, with = "double_option")]
    pub end_date: Option<Option<NaiveDate>>,
}

impl ProgramUpdate {
    pub fn apply(self, program: &mut Program, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            program.name = name;
        }
        if let Some(description) = self.description {
            program.description = description;
        }
        if let Some(fee) = self.fee {
            program.fee = fee;
        }
        if let Some(capacity) = self.capacity {
            program.capacity = capacity;
        }
        if let Some(archived) = self.archived {
            program.archived = archived;
        }
        if let Some(accepting) = self.accepting_enrollments {
            program.accepting_enrollments = accepting;
        }
        if let Some(start_date) = self.start_date {
            program.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            program.end_date = end_date;
        }
        program.updated_at = now;
    }
}

/// Distinguishes "field absent" from "field explicitly null" in JSON patches.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// Why a program cannot take new enrollment rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    Missing,
    Archived,
    NotAcceptingEnrollments,
}

impl UnavailableReason {
    pub const fn label(self) -> &'static str {
        match self {
            UnavailableReason::Missing => "no longer exists",
            UnavailableReason::Archived => "archived",
            UnavailableReason::NotAcceptingEnrollments => "not accepting enrollments",
        }
    }
}

/// Lifecycle state of one enrollment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Approved,
    Waitlisted,
    Rejected,
    Withdrawn,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Approved => "approved",
            EnrollmentStatus::Waitlisted => "waitlisted",
            EnrollmentStatus::Rejected => "rejected",
            EnrollmentStatus::Withdrawn => "withdrawn",
        }
    }

    pub const fn is_approved(self) -> bool {
        matches!(self, EnrollmentStatus::Approved)
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One user's request/status record for one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub program_id: ProgramId,
    pub status: EnrollmentStatus,
    pub preference_order: Option<u32>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_by: Option<UserId>,
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignment_notes: String,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

impl Enrollment {
    pub fn pending(
        user_id: UserId,
        program_id: ProgramId,
        preference_order: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EnrollmentId::new(),
            user_id,
            program_id,
            status: EnrollmentStatus::Pending,
            preference_order,
            enrolled_at: now,
            updated_at: now,
            assigned_by: None,
            assigned_at: None,
            assignment_notes: String::new(),
            payment_reference: None,
        }
    }
}

/// Survey that a role must have completed before enrolling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyRef {
    pub id: SurveyId,
    pub title: String,
}

/// Per-role prerequisite configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRequirement {
    pub role: Role,
    pub required_surveys: Vec<SurveyRef>,
    pub require_profile_completion: bool,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Global enrollment switch, versioned so writers can detect stale reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentSettings {
    pub version: u64,
    pub enrollment_open: bool,
    pub closure_reason: Option<String>,
    pub updated_by: Option<UserId>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_CLOSURE_MESSAGE: &str = "Registration is currently closed.";

impl EnrollmentSettings {
    pub fn initial() -> Self {
        Self {
            version: 1,
            enrollment_open: true,
            closure_reason: None,
            updated_by: None,
            updated_at: None,
        }
    }

    pub fn closure_message(&self) -> String {
        self.closure_reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(DEFAULT_CLOSURE_MESSAGE)
            .to_string()
    }

    /// The change that flips registration relative to this value, or `None` when the caller
    /// last saw a different version. The reason is kept only while closed.
    pub fn toggled(
        &self,
        expected_version: u64,
        closure_reason: Option<String>,
        updated_by: UserId,
        updated_at: DateTime<Utc>,
    ) -> Option<SettingsChange> {
        if self.version != expected_version {
            return None;
        }
        let enrollment_open = !self.enrollment_open;
        let closure_reason = if enrollment_open {
            None
        } else {
            closure_reason
                .map(|reason| reason.trim().to_string())
                .filter(|reason| !reason.is_empty())
        };
        Some(SettingsChange {
            enrollment_open,
            closure_reason,
            updated_by,
            updated_at,
        })
    }
}

/// Requested change to the settings value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsChange {
    pub enrollment_open: bool,
    pub closure_reason: Option<String>,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
}

/// Pairing of one approved volunteer to one member within a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuddyAssignment {
    pub program_id: ProgramId,
    pub member_id: UserId,
    pub volunteer_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a participant showed up for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Tardy,
    /// Absent with notice.
    Informed,
    /// Absent without notice.
    Uninformed,
}

impl AttendanceStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Tardy => "tardy",
            AttendanceStatus::Informed => "informed",
            AttendanceStatus::Uninformed => "uninformed",
        }
    }
}

/// One participant's attendance on one date; unique per (program, user, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: AttendanceId,
    pub program_id: ProgramId,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    /// Volunteer hours, two decimal places.
    pub hours: Option<Decimal>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
