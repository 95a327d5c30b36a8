use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::EnrollmentConfig;
use crate::workflows::enrollment::domain::{
    Actor, Enrollment, EnrollmentStatus, NewProgram, Program, ProgramId, Role, RoleRequirement,
    SurveyId, SurveyRef, UserAccount, UserId, UserProfile,
};
use crate::workflows::enrollment::repository::{
    EnrollmentStore, PublishError, RequirementStore, TransitionEvent, TransitionPublisher,
};
use crate::workflows::enrollment::{
    enrollment_router, EnrollmentPortal, InMemoryPortalStore, SandboxPaymentProcessor,
};

pub(super) type TestPortal =
    EnrollmentPortal<InMemoryPortalStore, SandboxPaymentProcessor, MemoryPublisher>;

#[derive(Default)]
pub(super) struct MemoryPublisher {
    pub(super) events: Mutex<Vec<TransitionEvent>>,
}

impl MemoryPublisher {
    pub(super) fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TransitionPublisher for MemoryPublisher {
    fn publish(&self, event: TransitionEvent) -> Result<(), PublishError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub(super) struct FailingPublisher;

impl TransitionPublisher for FailingPublisher {
    fn publish(&self, _event: TransitionEvent) -> Result<(), PublishError> {
        Err(PublishError::Transport("document service offline".to_string()))
    }
}

pub(super) struct Fixture {
    pub(super) store: Arc<InMemoryPortalStore>,
    pub(super) payments: Arc<SandboxPaymentProcessor>,
    pub(super) publisher: Arc<MemoryPublisher>,
    pub(super) portal: Arc<TestPortal>,
}

pub(super) fn fixture() -> Fixture {
    fixture_with_config(EnrollmentConfig::default())
}

pub(super) fn fixture_with_config(config: EnrollmentConfig) -> Fixture {
    let store = Arc::new(InMemoryPortalStore::new());
    let payments = Arc::new(SandboxPaymentProcessor::new(false));
    let publisher = Arc::new(MemoryPublisher::default());
    let portal = Arc::new(EnrollmentPortal::new(
        Arc::clone(&store),
        Arc::clone(&payments),
        Arc::clone(&publisher),
        &config,
    ));

    Fixture {
        store,
        payments,
        publisher,
        portal,
    }
}

impl Fixture {
    pub(super) fn router(&self) -> Router {
        enrollment_router(Arc::clone(&self.portal))
    }

    pub(super) fn user(&self, role: Role, name: &str) -> Actor {
        let account = UserAccount {
            id: UserId::new(),
            role,
            profile: complete_profile(name),
        };
        self.store.register_user(account.clone());
        Actor::new(account)
    }

    pub(super) fn manager(&self) -> Actor {
        self.user(Role::Manager, "Morgan Manager")
    }

    pub(super) fn member(&self, name: &str) -> Actor {
        self.user(Role::Member, name)
    }

    pub(super) fn volunteer(&self, name: &str) -> Actor {
        self.user(Role::Volunteer, name)
    }

    pub(super) fn program(&self, name: &str, fee: Decimal, capacity: Option<u32>) -> Program {
        self.store
            .insert_program(
                NewProgram {
                    name: name.to_string(),
                    description: format!("{name} sessions"),
                    fee,
                    capacity,
                    accepting_enrollments: true,
                    start_date: None,
                    end_date: None,
                }
                .into_program(Utc::now()),
            )
            .expect("program inserts")
    }

    pub(super) fn pending(&self, user: &Actor, program: &Program) -> Enrollment {
        self.store
            .insert_enrollment(Enrollment::pending(user.id(), program.id, None, Utc::now()))
            .expect("enrollment inserts")
    }

    pub(super) fn approved(&self, staff: &Actor, user: &Actor, program: &Program) -> Enrollment {
        let enrollment = self.pending(user, program);
        self.portal
            .transition(staff, &enrollment.id, EnrollmentStatus::Approved, None)
            .expect("approval succeeds")
            .enrollment
    }

    pub(super) fn enrolled(&self, program_id: &ProgramId) -> u32 {
        self.store
            .fetch_program(program_id)
            .expect("store readable")
            .expect("program exists")
            .enrolled
    }

    pub(super) fn require_surveys(&self, role: Role, titles: &[&str]) -> Vec<SurveyRef> {
        let surveys: Vec<SurveyRef> = titles
            .iter()
            .map(|title| SurveyRef {
                id: SurveyId::new(),
                title: title.to_string(),
            })
            .collect();
        self.store
            .upsert_requirement(RoleRequirement {
                role,
                required_surveys: surveys.clone(),
                require_profile_completion: true,
                active: true,
                updated_at: Utc::now(),
            })
            .expect("requirement saved");
        surveys
    }
}

pub(super) fn complete_profile(name: &str) -> UserProfile {
    UserProfile {
        name: name.to_string(),
        email: Some(format!(
            "{}@example.org",
            name.to_lowercase().replace(' ', ".")
        )),
        phone: Some("555-0100".to_string()),
        age: Some(16),
        guardian_name: Some("Casey Guardian".to_string()),
        emergency_contact_name: None,
    }
}

pub(super) fn dollars(amount: i64) -> Decimal {
    Decimal::new(amount * 100, 2)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("valid json body")
}

pub(super) fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "unexpected status for response"
    );
}
