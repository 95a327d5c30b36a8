use super::common::*;
use std::sync::Arc;

use crate::workflows::enrollment::domain::{EnrollmentStatus, Role};
use crate::workflows::enrollment::lifecycle::{
    AdmitOutcome, EnrollmentStateMachine, TransitionError,
};
use crate::workflows::enrollment::repository::{CounterDelta, EnrollmentStore};
use crate::workflows::enrollment::PortalError;

#[test]
fn approval_increments_once_and_reapproval_is_a_noop() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), Some(10));
    let enrollment = fixture.pending(&member, &program);

    let outcome = fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Approved, Some("welcome".into()))
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.previous, EnrollmentStatus::Pending);
    assert_eq!(outcome.counter.map(|counter| counter.delta), Some(CounterDelta::Increment));
    assert_eq!(outcome.enrollment.assigned_by, Some(staff.id()));
    assert_eq!(outcome.enrollment.assignment_notes, "welcome");
    assert_eq!(fixture.enrolled(&program.id), 1);

    let again = fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Approved, None)
        .unwrap();
    assert!(!again.changed);
    assert!(again.counter.is_none());
    assert_eq!(fixture.enrolled(&program.id), 1);

    let events = fixture.publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous, Some(EnrollmentStatus::Pending));
    assert_eq!(events[0].next, Some(EnrollmentStatus::Approved));
    assert_eq!(events[0].enrolled_after, Some(1));
    assert!(!events[0].drift_detected);
}

#[test]
fn leaving_and_reentering_approved_moves_counter_both_ways() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), Some(10));
    let enrollment = fixture.approved(&staff, &member, &program);
    assert_eq!(fixture.enrolled(&program.id), 1);

    fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Waitlisted, None)
        .unwrap();
    assert_eq!(fixture.enrolled(&program.id), 0);

    fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Approved, None)
        .unwrap();
    assert_eq!(fixture.enrolled(&program.id), 1);

    fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Rejected, None)
        .unwrap();
    assert_eq!(fixture.enrolled(&program.id), 0);
}

#[test]
fn withdrawn_cannot_be_reapproved() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), None);
    let enrollment = fixture.pending(&member, &program);

    fixture.portal.withdraw(&member, &enrollment.id).unwrap();
    let result = fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Approved, None);

    assert!(matches!(
        result,
        Err(PortalError::Transition(TransitionError::InvalidTransition {
            from: EnrollmentStatus::Withdrawn,
            to: EnrollmentStatus::Approved,
        }))
    ));
    assert_eq!(fixture.enrolled(&program.id), 0);
}

#[test]
fn waitlisted_cannot_jump_to_rejected() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), None);
    let enrollment = fixture.pending(&member, &program);
    fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Waitlisted, None)
        .unwrap();

    let result = fixture
        .portal
        .transition(&staff, &enrollment.id, EnrollmentStatus::Rejected, None);

    assert!(matches!(
        result,
        Err(PortalError::Transition(TransitionError::InvalidTransition { .. }))
    ));
}

#[test]
fn owners_may_only_withdraw_their_own_enrollment() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let other = fixture.member("Oli Other");
    let program = fixture.program("Robotics", dollars(40), None);
    let enrollment = fixture.pending(&member, &program);

    let self_approval =
        fixture
            .portal
            .transition(&member, &enrollment.id, EnrollmentStatus::Approved, None);
    assert!(matches!(
        self_approval,
        Err(PortalError::Transition(TransitionError::Forbidden))
    ));

    let foreign_withdrawal = fixture.portal.withdraw(&other, &enrollment.id);
    assert!(matches!(
        foreign_withdrawal,
        Err(PortalError::Transition(TransitionError::Forbidden))
    ));

    let outcome = fixture.portal.withdraw(&member, &enrollment.id).unwrap();
    assert_eq!(outcome.enrollment.status, EnrollmentStatus::Withdrawn);
    assert_eq!(outcome.enrollment.assigned_by, Some(member.id()));
}

#[test]
fn publisher_failure_keeps_the_committed_transition() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), Some(1));
    let enrollment = fixture.pending(&member, &program);
    let machine = EnrollmentStateMachine::new(Arc::clone(&fixture.store), Arc::new(FailingPublisher));

    let outcome = machine
        .transition(&staff, &enrollment.id, EnrollmentStatus::Approved, None)
        .expect("publisher errors are swallowed");

    assert!(outcome.changed);
    assert_eq!(fixture.enrolled(&program.id), 1);
}

#[test]
fn unknown_enrollment_is_not_found() {
    let fixture = fixture();
    let staff = fixture.manager();

    let result = fixture.portal.transition(
        &staff,
        &crate::workflows::enrollment::EnrollmentId::new(),
        EnrollmentStatus::Approved,
        None,
    );

    assert!(matches!(
        result,
        Err(PortalError::Transition(TransitionError::NotFound))
    ));
}

#[test]
fn staff_admission_is_attributed_and_idempotent() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), None);

    let first = fixture
        .portal
        .admit(&staff, &program.id, &member.id(), Some("walk-in".into()))
        .unwrap();
    let created = match first {
        AdmitOutcome::Created(enrollment) => enrollment,
        other => panic!("expected a new enrollment, got {other:?}"),
    };
    assert_eq!(created.status, EnrollmentStatus::Pending);
    assert_eq!(created.assigned_by, Some(staff.id()));
    assert_eq!(created.assignment_notes, "walk-in");

    let second = fixture
        .portal
        .admit(&staff, &program.id, &member.id(), None)
        .unwrap();
    assert_eq!(second, AdmitOutcome::AlreadyEnrolled(created));

    let pcm = fixture.user(Role::PersonCenteredManager, "Pat Coordinator");
    assert!(matches!(
        fixture.portal.admit(&pcm, &program.id, &member.id(), None),
        Err(PortalError::Forbidden)
    ));
}

#[test]
fn deleting_an_approved_enrollment_returns_the_seat() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), Some(3));
    let enrollment = fixture.approved(&staff, &member, &program);

    let outcome = fixture.portal.delete_enrollment(&staff, &enrollment.id).unwrap();

    assert_eq!(outcome.counter.map(|counter| counter.enrolled), Some(0));
    assert_eq!(fixture.enrolled(&program.id), 0);
    assert!(fixture.store.fetch_enrollment(&enrollment.id).unwrap().is_none());
    assert_eq!(fixture.publisher.events().last().and_then(|event| event.next), None);

    assert!(matches!(
        fixture.portal.delete_enrollment(&staff, &enrollment.id),
        Err(PortalError::Transition(TransitionError::NotFound))
    ));
}
