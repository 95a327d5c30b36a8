//! Program enrollment: prerequisite gate, lifecycle with occupancy counters, buddy pairing,
//! multi-program checkout, and the roster and attendance views built on top of them.

pub mod attendance;
pub mod buddies;
pub mod checkout;
pub mod domain;
pub mod eligibility;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod repository;
pub mod roster;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use attendance::{
    AttendanceBook, AttendanceDay, AttendanceEntry, AttendanceError, AttendanceLine,
    AttendanceOverview, AttendanceSheet, AttendanceSummary,
};
pub use buddies::{AssignmentOutcome, BuddyError, BuddyRegistry};
pub use checkout::{
    CheckoutError, CheckoutOrchestrator, CheckoutQuote, CheckoutReceipt, PaymentConfirmation,
    PaymentError, PaymentIntent, PaymentProcessor, PaymentState, SandboxPaymentProcessor,
    Selection, SelectionCache, SelectionPick,
};
pub use domain::{
    Actor, AttendanceId, AttendanceRecord, AttendanceStatus, BuddyAssignment, Capabilities,
    Enrollment, EnrollmentId, EnrollmentSettings, EnrollmentStatus, NewProgram, Program,
    ProgramId, ProgramUpdate, Role, RoleRequirement, SelectionId, SurveyId, SurveyRef,
    UserAccount, UserId, UserProfile,
};
pub use eligibility::{EligibilityGate, EligibilityReport};
pub use ledger::{Availability, CapacityLedger, ProgramAvailability, ReconciliationReport};
pub use lifecycle::{
    AdmitOutcome, DeletionOutcome, EnrollmentStateMachine, TransitionError, TransitionOutcome,
};
pub use memory::InMemoryPortalStore;
pub use repository::{
    AttendanceStore, EnrollmentStore, NoopPublisher, PortalBackend, PublishError, RepositoryError,
    RequirementStore, SurveyResponses, TransitionEvent, TransitionPublisher, UserDirectory,
};
pub use roster::{
    EnrollmentSummary, PersonRef, ProgramRoster, RosterEntry, RosterError, RosterViews,
    StatusGroups, UserEnrollmentOverview,
};
pub use router::{enrollment_router, ACTOR_HEADER};
pub use service::{EnrollmentPortal, PortalError, RequirementInput};
