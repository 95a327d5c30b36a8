use metrics_exporter_prometheus::PrometheusHandle;
use portal_enrollment::config::EnrollmentConfig;
use portal_enrollment::workflows::enrollment::{
    Actor, EnrollmentPortal, InMemoryPortalStore, NewProgram, PortalError, Program, PublishError,
    Role, RoleRequirement, SandboxPaymentProcessor, SurveyId, SurveyRef, TransitionEvent,
    TransitionPublisher, UserAccount, UserId, UserProfile,
};
use portal_enrollment::workflows::enrollment::RequirementStore;
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

pub(crate) type ServicePortal =
    EnrollmentPortal<InMemoryPortalStore, SandboxPaymentProcessor, LoggingPublisher>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Publisher that records transition events in the service log and keeps the latest ones
/// around for the demo walkthrough.
#[derive(Default, Clone)]
pub(crate) struct LoggingPublisher {
    events: Arc<Mutex<Vec<TransitionEvent>>>,
}

impl TransitionPublisher for LoggingPublisher {
    fn publish(&self, event: TransitionEvent) -> Result<(), PublishError> {
        info!(
            enrollment_id = %event.enrollment_id,
            program_id = %event.program_id,
            previous = event.previous.map(|status| status.label()),
            next = event.next.map(|status| status.label()),
            enrolled_after = event.enrolled_after,
            drift_detected = event.drift_detected,
            "enrollment transition"
        );
        let mut guard = self
            .events
            .lock()
            .map_err(|_| PublishError::Transport("event buffer poisoned".to_string()))?;
        guard.push(event);
        Ok(())
    }
}

impl LoggingPublisher {
    pub(crate) fn events(&self) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

pub(crate) struct PortalHandles {
    pub(crate) store: Arc<InMemoryPortalStore>,
    pub(crate) payments: Arc<SandboxPaymentProcessor>,
    pub(crate) publisher: Arc<LoggingPublisher>,
    pub(crate) portal: Arc<ServicePortal>,
}

pub(crate) fn build_portal(config: &EnrollmentConfig) -> PortalHandles {
    let store = Arc::new(InMemoryPortalStore::new());
    let payments = Arc::new(SandboxPaymentProcessor::new(config.auto_capture_payments));
    let publisher = Arc::new(LoggingPublisher::default());
    let portal = Arc::new(EnrollmentPortal::new(
        Arc::clone(&store),
        Arc::clone(&payments),
        Arc::clone(&publisher),
        config,
    ));

    PortalHandles {
        store,
        payments,
        publisher,
        portal,
    }
}

/// Accounts and programs loaded into a fresh in-memory store.
pub(crate) struct SeedData {
    pub(crate) manager: Actor,
    pub(crate) member: Actor,
    pub(crate) volunteer: Actor,
    pub(crate) intake_survey: SurveyRef,
    pub(crate) programs: Vec<Program>,
}

pub(crate) fn seed(handles: &PortalHandles) -> Result<SeedData, PortalError> {
    let manager = register(&handles.store, Role::Manager, "Morgan Reyes", None);
    let member = register(&handles.store, Role::Member, "Ada Okafor", Some(14));
    let volunteer = register(&handles.store, Role::Volunteer, "Vic Lindqvist", Some(24));

    let intake_survey = SurveyRef {
        id: SurveyId::new(),
        title: "Member intake".to_string(),
    };
    handles.store.upsert_requirement(RoleRequirement {
        role: Role::Member,
        required_surveys: vec![intake_survey.clone()],
        require_profile_completion: true,
        active: true,
        updated_at: chrono::Utc::now(),
    })?;

    let catalog = [
        ("Robotics Club", Decimal::new(4000, 2), Some(12)),
        ("Art Studio", Decimal::new(1550, 2), Some(2)),
        ("Saturday Hikes", Decimal::ZERO, None),
    ];
    let mut programs = Vec::with_capacity(catalog.len());
    for (name, fee, capacity) in catalog {
        programs.push(handles.portal.create_program(
            &manager,
            NewProgram {
                name: name.to_string(),
                description: format!("{name} for the current term"),
                fee,
                capacity,
                accepting_enrollments: true,
                start_date: None,
                end_date: None,
            },
        )?);
    }

    info!(
        manager = %manager.id(),
        member = %member.id(),
        volunteer = %volunteer.id(),
        programs = programs.len(),
        "seeded in-memory portal"
    );

    Ok(SeedData {
        manager,
        member,
        volunteer,
        intake_survey,
        programs,
    })
}

fn register(store: &InMemoryPortalStore, role: Role, name: &str, age: Option<u16>) -> Actor {
    let account = UserAccount {
        id: UserId::new(),
        role,
        profile: UserProfile {
            name: name.to_string(),
            email: Some(format!(
                "{}@example.org",
                name.to_ascii_lowercase().replace(' ', ".")
            )),
            phone: Some("555-0175".to_string()),
            age,
            guardian_name: age.filter(|age| *age < 18).map(|_| "Jo Okafor".to_string()),
            emergency_contact_name: Some("Sam Rivera".to_string()),
        },
    };
    store.register_user(account.clone());
    Actor::new(account)
}
