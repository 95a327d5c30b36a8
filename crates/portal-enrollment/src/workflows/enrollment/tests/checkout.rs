use super::common::*;

use std::sync::Arc;

use crate::config::EnrollmentConfig;
use crate::workflows::enrollment::checkout::{
    CheckoutError, CheckoutOrchestrator, PaymentState, SelectionError, SelectionPick,
};
use crate::workflows::enrollment::domain::{
    EnrollmentStatus, ProgramUpdate, SettingsChange, UnavailableReason, UserId,
};
use crate::workflows::enrollment::repository::{EnrollmentStore, RequirementStore};
use crate::workflows::enrollment::PortalError;

fn picks(programs: &[&crate::workflows::enrollment::Program]) -> Vec<SelectionPick> {
    programs
        .iter()
        .enumerate()
        .map(|(index, program)| SelectionPick {
            program_id: program.id,
            rank: index as u32 + 1,
        })
        .collect()
}

#[test]
fn unpaid_roles_confirm_directly_into_pending_rows() {
    let fixture = fixture();
    let volunteer = fixture.volunteer("Vic Helper");
    let art = fixture.program("Art", dollars(25), Some(10));
    let music = fixture.program("Music", dollars(15), None);

    let selection = fixture
        .portal
        .select(&volunteer, picks(&[&art, &music]))
        .unwrap();
    let quote = fixture.portal.quote(&volunteer, &selection.id).unwrap();
    assert_eq!(quote.total, dollars(40));
    assert!(!quote.payment_required);

    let receipt = fixture
        .portal
        .confirm(&volunteer, &selection.id, None)
        .unwrap();

    assert_eq!(receipt.created.len(), 2);
    assert!(receipt
        .created
        .iter()
        .all(|row| row.status == EnrollmentStatus::Pending));
    let ranks: Vec<Option<u32>> = receipt.created.iter().map(|row| row.preference_order).collect();
    assert_eq!(ranks, vec![Some(1), Some(2)]);
    assert_eq!(fixture.enrolled(&art.id), 0);
}

#[test]
fn archiving_one_program_rejects_the_whole_batch() {
    let fixture = fixture();
    let staff = fixture.manager();
    let volunteer = fixture.volunteer("Vic Helper");
    let first = fixture.program("Art", dollars(0), None);
    let second = fixture.program("Music", dollars(0), None);
    let selection = fixture
        .portal
        .select(&volunteer, picks(&[&first, &second]))
        .unwrap();

    fixture
        .portal
        .update_program(
            &staff,
            &second.id,
            ProgramUpdate {
                archived: Some(true),
                ..ProgramUpdate::default()
            },
        )
        .unwrap();
    let result = fixture.portal.confirm(&volunteer, &selection.id, None);

    match result {
        Err(PortalError::Checkout(CheckoutError::RejectedBatch(rejected))) => {
            assert_eq!(rejected.len(), 1);
            assert_eq!(rejected[0].program_id, second.id);
            assert_eq!(rejected[0].reason, UnavailableReason::Archived);
        }
        other => panic!("expected rejected batch, got {other:?}"),
    }
    assert!(fixture.store.enrollments_for_program(&first.id).unwrap().is_empty());
    assert!(fixture.store.enrollments_for_program(&second.id).unwrap().is_empty());
}

#[test]
fn select_rejects_programs_closed_to_enrollment() {
    let fixture = fixture();
    let staff = fixture.manager();
    let volunteer = fixture.volunteer("Vic Helper");
    let program = fixture.program("Art", dollars(0), None);
    fixture
        .portal
        .update_program(
            &staff,
            &program.id,
            ProgramUpdate {
                accepting_enrollments: Some(false),
                ..ProgramUpdate::default()
            },
        )
        .unwrap();

    let result = fixture.portal.select(&volunteer, picks(&[&program]));

    assert!(matches!(
        result,
        Err(PortalError::Checkout(CheckoutError::RejectedBatch(ref rejected)))
            if rejected[0].reason == UnavailableReason::NotAcceptingEnrollments
    ));
}

#[test]
fn select_validates_picks_and_eligibility() {
    let fixture = fixture();
    let volunteer = fixture.volunteer("Vic Helper");
    let program = fixture.program("Art", dollars(0), None);

    let duplicate = vec![
        SelectionPick {
            program_id: program.id,
            rank: 1,
        },
        SelectionPick {
            program_id: program.id,
            rank: 2,
        },
    ];
    assert!(matches!(
        fixture.portal.select(&volunteer, duplicate),
        Err(PortalError::Checkout(CheckoutError::InvalidSelection(
            SelectionError::DuplicateProgram(_)
        )))
    ));

    fixture
        .store
        .replace_enrollment_settings(
            1,
            SettingsChange {
                enrollment_open: false,
                closure_reason: Some("Closed for the holidays".to_string()),
                updated_by: UserId::new(),
                updated_at: chrono::Utc::now(),
            },
        )
        .unwrap();
    match fixture.portal.select(&volunteer, picks(&[&program])) {
        Err(PortalError::Checkout(CheckoutError::Ineligible(report))) => {
            assert_eq!(report.missing_items, vec!["Closed for the holidays".to_string()]);
        }
        other => panic!("expected ineligible, got {other:?}"),
    }
}

#[test]
fn members_pay_before_rows_exist_and_replays_are_idempotent() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), Some(12));
    let selection = fixture.portal.select(&member, picks(&[&program])).unwrap();

    assert!(matches!(
        fixture.portal.confirm(&member, &selection.id, None),
        Err(PortalError::Checkout(CheckoutError::PaymentRequired))
    ));

    let intent = fixture.portal.begin_payment(&member, &selection.id).unwrap();
    assert_eq!(intent.amount, dollars(40));
    assert_eq!(intent.state, PaymentState::RequiresPayment);

    assert!(matches!(
        fixture
            .portal
            .confirm(&member, &selection.id, Some(&intent.reference)),
        Err(PortalError::Checkout(CheckoutError::PaymentNotSucceeded(
            PaymentState::RequiresPayment
        )))
    ));
    assert!(fixture.store.enrollments_for_user(&member.id()).unwrap().is_empty());

    fixture.payments.capture(&intent.reference).unwrap();
    let receipt = fixture
        .portal
        .confirm(&member, &selection.id, Some(&intent.reference))
        .unwrap();
    assert_eq!(receipt.created.len(), 1);
    assert!(!receipt.replayed);
    assert_eq!(
        receipt.created[0].payment_reference.as_deref(),
        Some(intent.reference.as_str())
    );

    let replay = fixture
        .portal
        .confirm(&member, &selection.id, Some(&intent.reference))
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.created, receipt.created);
    assert_eq!(fixture.store.enrollments_for_user(&member.id()).unwrap().len(), 1);
}

#[test]
fn failed_payment_creates_nothing() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), None);
    let selection = fixture.portal.select(&member, picks(&[&program])).unwrap();
    let intent = fixture.portal.begin_payment(&member, &selection.id).unwrap();
    fixture.payments.fail(&intent.reference).unwrap();

    let result = fixture
        .portal
        .confirm(&member, &selection.id, Some(&intent.reference));

    assert!(matches!(
        result,
        Err(PortalError::Checkout(CheckoutError::PaymentNotSucceeded(
            PaymentState::Failed
        )))
    ));
    assert!(fixture.store.enrollments_for_program(&program.id).unwrap().is_empty());
}

#[test]
fn another_users_payment_cannot_be_reused() {
    let fixture = fixture();
    let payer = fixture.member("Pat Payer");
    let freeloader = fixture.member("Fred Loader");
    let program = fixture.program("Robotics", dollars(40), None);

    let paid = fixture.portal.select(&payer, picks(&[&program])).unwrap();
    let intent = fixture.portal.begin_payment(&payer, &paid.id).unwrap();
    fixture.payments.capture(&intent.reference).unwrap();

    let selection = fixture
        .portal
        .select(&freeloader, picks(&[&program]))
        .unwrap();
    assert!(matches!(
        fixture
            .portal
            .confirm(&freeloader, &selection.id, Some(&intent.reference)),
        Err(PortalError::Checkout(CheckoutError::PaymentReferenceMismatch))
    ));

    fixture
        .portal
        .confirm(&payer, &paid.id, Some(&intent.reference))
        .unwrap();
    assert!(matches!(
        fixture
            .portal
            .confirm(&freeloader, &selection.id, Some(&intent.reference)),
        Err(PortalError::Checkout(CheckoutError::PaymentReferenceMismatch))
    ));
}

#[test]
fn fee_change_after_payment_is_an_amount_mismatch() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), None);
    let selection = fixture.portal.select(&member, picks(&[&program])).unwrap();
    let intent = fixture.portal.begin_payment(&member, &selection.id).unwrap();
    fixture.payments.capture(&intent.reference).unwrap();

    fixture
        .portal
        .update_program(
            &staff,
            &program.id,
            ProgramUpdate {
                fee: Some(dollars(55)),
                ..ProgramUpdate::default()
            },
        )
        .unwrap();

    match fixture
        .portal
        .confirm(&member, &selection.id, Some(&intent.reference))
    {
        Err(PortalError::Checkout(CheckoutError::PaymentAmountMismatch { expected, received })) => {
            assert_eq!(expected, dollars(55));
            assert_eq!(received, dollars(40));
        }
        other => panic!("expected amount mismatch, got {other:?}"),
    }
}

#[test]
fn free_selection_needs_no_payment_even_for_members() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Open Gym", dollars(0), None);
    let selection = fixture.portal.select(&member, picks(&[&program])).unwrap();

    assert!(matches!(
        fixture.portal.begin_payment(&member, &selection.id),
        Err(PortalError::Checkout(CheckoutError::PaymentNotRequired))
    ));
    let receipt = fixture.portal.confirm(&member, &selection.id, None).unwrap();
    assert_eq!(receipt.created.len(), 1);
    assert_eq!(receipt.payment_reference, None);
}

#[test]
fn existing_enrollments_are_reported_not_duplicated() {
    let fixture = fixture();
    let volunteer = fixture.volunteer("Vic Helper");
    let art = fixture.program("Art", dollars(0), None);
    let music = fixture.program("Music", dollars(0), None);
    let existing = fixture.pending(&volunteer, &art);

    let selection = fixture
        .portal
        .select(&volunteer, picks(&[&art, &music]))
        .unwrap();
    let receipt = fixture
        .portal
        .confirm(&volunteer, &selection.id, None)
        .unwrap();

    assert_eq!(receipt.created.len(), 1);
    assert_eq!(receipt.created[0].program_id, music.id);
    assert_eq!(receipt.already_enrolled, vec![existing]);
}

#[test]
fn expired_selections_are_rejected_and_forgotten() {
    let fixture = fixture_with_config(EnrollmentConfig {
        selection_ttl_minutes: 0,
        ..EnrollmentConfig::default()
    });
    let volunteer = fixture.volunteer("Vic Helper");
    let program = fixture.program("Art", dollars(0), None);
    let selection = fixture.portal.select(&volunteer, picks(&[&program])).unwrap();

    assert!(matches!(
        fixture.portal.confirm(&volunteer, &selection.id, None),
        Err(PortalError::Checkout(CheckoutError::SelectionExpired))
    ));
    assert!(matches!(
        fixture.portal.quote(&volunteer, &selection.id),
        Err(PortalError::NotFound("selection"))
    ));
    assert!(fixture.store.enrollments_for_program(&program.id).unwrap().is_empty());
}

#[test]
fn selections_belong_to_their_owner() {
    let fixture = fixture();
    let owner = fixture.volunteer("Vic Helper");
    let other = fixture.volunteer("Val Helper");
    let program = fixture.program("Art", dollars(0), None);
    let selection = fixture.portal.select(&owner, picks(&[&program])).unwrap();

    assert!(matches!(
        fixture.portal.confirm(&other, &selection.id, None),
        Err(PortalError::Checkout(CheckoutError::SelectionOwnerMismatch))
    ));
}

#[test]
fn programs_already_held_are_listed_but_not_charged() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let art = fixture.program("Art", dollars(40), None);
    let music = fixture.program("Music", dollars(15), None);
    let existing = fixture.pending(&member, &art);

    let selection = fixture
        .portal
        .select(&member, picks(&[&art, &music]))
        .unwrap();
    let quote = fixture.portal.quote(&member, &selection.id).unwrap();
    let held: Vec<bool> = quote.lines.iter().map(|line| line.already_enrolled).collect();
    assert_eq!(held, vec![true, false]);
    assert_eq!(quote.total, dollars(15));
    assert!(quote.payment_required);

    let intent = fixture.portal.begin_payment(&member, &selection.id).unwrap();
    assert_eq!(intent.amount, dollars(15));
    fixture.payments.capture(&intent.reference).unwrap();

    let receipt = fixture
        .portal
        .confirm(&member, &selection.id, Some(&intent.reference))
        .unwrap();
    assert_eq!(receipt.total, dollars(15));
    assert_eq!(receipt.created.len(), 1);
    assert_eq!(receipt.created[0].program_id, music.id);
    assert_eq!(receipt.already_enrolled, vec![existing]);
}

#[test]
fn selection_of_only_held_programs_needs_no_payment() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let art = fixture.program("Art", dollars(40), None);
    let existing = fixture.pending(&member, &art);
    let selection = fixture.portal.select(&member, picks(&[&art])).unwrap();

    let quote = fixture.portal.quote(&member, &selection.id).unwrap();
    assert_eq!(quote.total, dollars(0));
    assert!(!quote.payment_required);
    assert!(matches!(
        fixture.portal.begin_payment(&member, &selection.id),
        Err(PortalError::Checkout(CheckoutError::PaymentNotRequired))
    ));

    let receipt = fixture.portal.confirm(&member, &selection.id, None).unwrap();
    assert!(receipt.created.is_empty());
    assert_eq!(receipt.already_enrolled, vec![existing]);
}

#[test]
fn confirmed_rows_publish_one_event_each() {
    let fixture = fixture();
    let volunteer = fixture.volunteer("Vic Helper");
    let art = fixture.program("Art", dollars(0), None);
    let music = fixture.program("Music", dollars(0), None);
    fixture.pending(&volunteer, &art);

    let selection = fixture
        .portal
        .select(&volunteer, picks(&[&art, &music]))
        .unwrap();
    let receipt = fixture
        .portal
        .confirm(&volunteer, &selection.id, None)
        .unwrap();

    let events = fixture.publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].enrollment_id, receipt.created[0].id);
    assert_eq!(events[0].program_id, music.id);
    assert_eq!(events[0].previous, None);
    assert_eq!(events[0].next, Some(EnrollmentStatus::Pending));
    assert_eq!(events[0].actor_id, volunteer.id());
}

#[test]
fn publisher_failure_does_not_undo_a_checkout() {
    let fixture = fixture();
    let volunteer = fixture.volunteer("Vic Helper");
    let art = fixture.program("Art", dollars(0), None);
    let orchestrator = CheckoutOrchestrator::new(
        Arc::clone(&fixture.store),
        Arc::clone(&fixture.payments),
        Arc::new(FailingPublisher),
        &EnrollmentConfig::default(),
    );

    let selection = orchestrator.select(&volunteer, picks(&[&art])).unwrap();
    let receipt = orchestrator
        .confirm(&volunteer, &selection, None)
        .expect("publisher errors are swallowed");

    assert_eq!(receipt.created.len(), 1);
    assert_eq!(
        fixture.store.enrollments_for_program(&art.id).unwrap().len(),
        1
    );
}

#[test]
fn replay_from_another_selection_returns_the_original_selection() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let program = fixture.program("Robotics", dollars(40), None);
    let first = fixture.portal.select(&member, picks(&[&program])).unwrap();
    let intent = fixture.portal.begin_payment(&member, &first.id).unwrap();
    fixture.payments.capture(&intent.reference).unwrap();
    let receipt = fixture
        .portal
        .confirm(&member, &first.id, Some(&intent.reference))
        .unwrap();

    let second = fixture.portal.select(&member, picks(&[&program])).unwrap();
    let replay = fixture
        .portal
        .confirm(&member, &second.id, Some(&intent.reference))
        .unwrap();

    assert!(replay.replayed);
    assert_eq!(replay.selection_id, first.id);
    assert_eq!(replay.created, receipt.created);
}
