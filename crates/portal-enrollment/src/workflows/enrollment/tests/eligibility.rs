use super::common::*;
use std::sync::Arc;

use chrono::Utc;

use crate::workflows::enrollment::domain::{
    Actor, Role, RoleRequirement, SettingsChange, UserAccount, UserId, DEFAULT_CLOSURE_MESSAGE,
};
use crate::workflows::enrollment::eligibility::{EligibilityGate, INCOMPLETE_PROFILE_ITEM};
use crate::workflows::enrollment::repository::RequirementStore;

fn close_registration(fixture: &Fixture, reason: Option<&str>) {
    fixture
        .store
        .replace_enrollment_settings(
            1,
            SettingsChange {
                enrollment_open: false,
                closure_reason: reason.map(str::to_string),
                updated_by: UserId::new(),
                updated_at: Utc::now(),
            },
        )
        .expect("settings replaced");
}

#[test]
fn allows_roles_without_requirements() {
    let fixture = fixture();
    let volunteer = fixture.volunteer("Vic Helper");

    let report = fixture.portal.check_eligibility(&volunteer).unwrap();

    assert!(report.allowed);
    assert!(report.missing_items.is_empty());
}

#[test]
fn inactive_requirement_is_ignored() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    fixture.require_surveys(Role::Member, &["Intake"]);
    let mut requirement = fixture
        .store
        .requirement_for(Role::Member)
        .unwrap()
        .expect("requirement stored");
    requirement.active = false;
    fixture.store.upsert_requirement(requirement).unwrap();

    let report = fixture.portal.check_eligibility(&member).unwrap();

    assert!(report.allowed);
}

#[test]
fn closed_registration_reports_reason_or_default() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");

    close_registration(&fixture, None);
    let report = fixture.portal.check_eligibility(&member).unwrap();
    assert!(!report.allowed);
    assert_eq!(report.missing_items, vec![DEFAULT_CLOSURE_MESSAGE.to_string()]);

    let fixture = super::common::fixture();
    let member = fixture.member("Mia Member");
    close_registration(&fixture, Some("Summer term is full"));
    let report = fixture.portal.check_eligibility(&member).unwrap();
    assert_eq!(report.missing_items, vec!["Summer term is full".to_string()]);
}

#[test]
fn lists_profile_first_then_surveys_in_order() {
    let fixture = fixture();
    let surveys = fixture.require_surveys(Role::Member, &["Medical form", "Photo consent"]);
    let mut account = UserAccount {
        id: UserId::new(),
        role: Role::Member,
        profile: complete_profile("Nia Newcomer"),
    };
    account.profile.phone = None;
    fixture.store.register_user(account.clone());

    let gate = EligibilityGate::new(Arc::clone(&fixture.store), Arc::clone(&fixture.store));
    let report = gate.evaluate(&account).unwrap();

    assert!(!report.allowed);
    assert_eq!(
        report.missing_items,
        vec![
            INCOMPLETE_PROFILE_ITEM.to_string(),
            "Complete survey: Medical form".to_string(),
            "Complete survey: Photo consent".to_string(),
        ]
    );

    fixture.store.record_completion(account.id, surveys[0].id);
    let report = gate.evaluate(&account).unwrap();
    assert_eq!(
        report.missing_items,
        vec![
            INCOMPLETE_PROFILE_ITEM.to_string(),
            "Complete survey: Photo consent".to_string(),
        ]
    );
}

#[test]
fn satisfied_requirement_allows_enrollment() {
    let fixture = fixture();
    let member = fixture.member("Mia Member");
    let surveys = fixture.require_surveys(Role::Member, &["Intake"]);
    fixture.store.record_completion(member.id(), surveys[0].id);

    let report = fixture.portal.check_eligibility(&member).unwrap();

    assert!(report.allowed);
    assert!(report.missing_items.is_empty());
}

#[test]
fn profile_rule_only_applies_when_required() {
    let fixture = fixture();
    fixture
        .store
        .upsert_requirement(RoleRequirement {
            role: Role::Volunteer,
            required_surveys: Vec::new(),
            require_profile_completion: false,
            active: true,
            updated_at: Utc::now(),
        })
        .unwrap();
    let mut account = UserAccount {
        id: UserId::new(),
        role: Role::Volunteer,
        profile: complete_profile("Val Volunteer"),
    };
    account.profile.email = None;
    let actor = Actor::new(account);

    let report = fixture.portal.check_eligibility(&actor).unwrap();

    assert!(report.allowed);
}
