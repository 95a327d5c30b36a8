//! Concurrency tests for enrollment transitions.
//!
//! Approvals racing on one program must each land on the occupancy counter exactly once, and
//! staff flipping the same row back and forth must leave the counter matching the final status.

use std::sync::Arc;
use std::thread;

use portal_enrollment::config::EnrollmentConfig;
use portal_enrollment::workflows::enrollment::{
    Actor, AdmitOutcome, Enrollment, EnrollmentPortal, EnrollmentStatus, EnrollmentStore,
    InMemoryPortalStore, NewProgram, NoopPublisher, PortalError, Program, Role,
    SandboxPaymentProcessor, TransitionError, UserAccount, UserId, UserProfile,
};
use rust_decimal::Decimal;

type Portal = EnrollmentPortal<InMemoryPortalStore, SandboxPaymentProcessor, NoopPublisher>;

struct World {
    store: Arc<InMemoryPortalStore>,
    portal: Arc<Portal>,
    staff: Actor,
}

fn world() -> World {
    let store = Arc::new(InMemoryPortalStore::new());
    let portal = Arc::new(EnrollmentPortal::new(
        Arc::clone(&store),
        Arc::new(SandboxPaymentProcessor::new(true)),
        Arc::new(NoopPublisher),
        &EnrollmentConfig::default(),
    ));
    let staff = register(&store, Role::Manager, "Morgan Manager");
    World {
        store,
        portal,
        staff,
    }
}

fn register(store: &InMemoryPortalStore, role: Role, name: &str) -> Actor {
    let account = UserAccount {
        id: UserId::new(),
        role,
        profile: UserProfile {
            name: name.to_string(),
            email: None,
            phone: None,
            age: None,
            guardian_name: None,
            emergency_contact_name: None,
        },
    };
    store.register_user(account.clone());
    Actor::new(account)
}

impl World {
    fn program(&self, capacity: Option<u32>) -> Program {
        self.portal
            .create_program(
                &self.staff,
                NewProgram {
                    name: "Camp".to_string(),
                    description: String::new(),
                    fee: Decimal::ZERO,
                    capacity,
                    accepting_enrollments: true,
                    start_date: None,
                    end_date: None,
                },
            )
            .expect("program created")
    }

    fn pending_row(&self, program: &Program, name: &str) -> Enrollment {
        let member = register(&self.store, Role::Member, name);
        match self
            .portal
            .admit(&self.staff, &program.id, &member.id(), None)
            .expect("admission")
        {
            AdmitOutcome::Created(row) | AdmitOutcome::AlreadyEnrolled(row) => row,
        }
    }
}

#[test]
fn simultaneous_approvals_all_count() {
    let world = world();
    let program = world.program(Some(2));
    let rows: Vec<Enrollment> = ["Ada", "Ben", "Cy"]
        .iter()
        .map(|name| world.pending_row(&program, name))
        .collect();

    thread::scope(|scope| {
        for row in &rows {
            let portal = Arc::clone(&world.portal);
            let staff = world.staff.clone();
            scope.spawn(move || {
                portal
                    .transition(&staff, &row.id, EnrollmentStatus::Approved, None)
                    .expect("approval is never blocked by capacity");
            });
        }
    });

    let availability = world.portal.availability(&program.id).expect("availability");
    assert_eq!(availability.enrolled, 3);
    assert_eq!(availability.available_spots, Some(0));
    assert!(world
        .portal
        .reconcile(&world.staff, &program.id)
        .expect("reconcile")
        .is_consistent());
}

#[test]
fn racing_flips_on_one_row_keep_counter_consistent() {
    let world = world();
    let program = world.program(None);
    let row = world.pending_row(&program, "Ada");

    thread::scope(|scope| {
        for worker in 0..8 {
            let portal = Arc::clone(&world.portal);
            let staff = world.staff.clone();
            let row_id = row.id;
            scope.spawn(move || {
                for round in 0..50 {
                    let target = if (worker + round) % 2 == 0 {
                        EnrollmentStatus::Approved
                    } else {
                        EnrollmentStatus::Rejected
                    };
                    match portal.transition(&staff, &row_id, target, None) {
                        Ok(_) => {}
                        Err(PortalError::Transition(TransitionError::Contention { .. })) => {}
                        Err(PortalError::Transition(TransitionError::InvalidTransition { .. })) => {}
                        Err(other) => panic!("unexpected failure: {other}"),
                    }
                }
            });
        }
    });

    let status = world
        .store
        .fetch_enrollment(&row.id)
        .expect("store readable")
        .expect("row present")
        .status;
    let expected = u32::from(status == EnrollmentStatus::Approved);
    assert_eq!(
        world.portal.availability(&program.id).unwrap().enrolled,
        expected
    );
}

#[test]
fn concurrent_admissions_for_one_user_do_not_duplicate_rows() {
    let world = world();
    let program = world.program(None);
    let member = register(&world.store, Role::Volunteer, "Vic Helper");

    thread::scope(|scope| {
        for _ in 0..4 {
            let portal = Arc::clone(&world.portal);
            let staff = world.staff.clone();
            let member_id = member.id();
            let program_id = program.id;
            scope.spawn(move || {
                let _ = portal.admit(&staff, &program_id, &member_id, None);
            });
        }
    });

    let rows = world
        .store
        .enrollments_for_user(&member.id())
        .expect("store readable");
    assert_eq!(rows.len(), 1);
}
