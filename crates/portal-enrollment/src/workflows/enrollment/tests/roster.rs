use super::common::*;

use crate::workflows::enrollment::domain::Role;
use crate::workflows::enrollment::PortalError;
use crate::workflows::enrollment::RosterError;

#[test]
fn roster_groups_by_role_and_status_with_buddies_and_leads() {
    let fixture = fixture();
    let staff = fixture.manager();
    let program = fixture.program("Camp", dollars(30), Some(5));
    let zoe = fixture.member("Zoe Zimmer");
    let ada = fixture.member("Ada Archer");
    let ben = fixture.member("Ben Baker");
    let vic = fixture.volunteer("Vic Helper");
    let pat = fixture.user(Role::PersonCenteredManager, "Pat Coordinator");

    fixture.approved(&staff, &zoe, &program);
    fixture.approved(&staff, &ada, &program);
    fixture.pending(&ben, &program);
    fixture.approved(&staff, &vic, &program);
    fixture.pending(&pat, &program);
    fixture
        .portal
        .assign_buddy(&staff, &program.id, &ada.id(), &vic.id())
        .unwrap();
    fixture
        .portal
        .toggle_lead(&staff, &program.id, &vic.id())
        .unwrap();

    let roster = fixture.portal.program_roster(&staff, &program.id).unwrap();

    assert_eq!(roster.availability.enrolled, 3);
    assert_eq!(roster.availability.available_spots, Some(2));

    let approved: Vec<&str> = roster
        .members
        .approved
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert_eq!(approved, vec!["Ada Archer", "Zoe Zimmer"]);
    assert_eq!(
        roster.members.approved[0]
            .buddy
            .as_ref()
            .map(|buddy| buddy.name.as_str()),
        Some("Vic Helper")
    );
    assert_eq!(roster.members.pending.len(), 1);

    let volunteer = &roster.volunteers.approved[0];
    assert!(volunteer.is_lead);
    assert_eq!(volunteer.paired_members.len(), 1);
    assert_eq!(volunteer.paired_members[0].user_id, ada.id());
    assert_eq!(roster.volunteers.pending[0].role, Some(Role::PersonCenteredManager));
    assert_eq!(roster.volunteers.len(), 2);
}

#[test]
fn roster_is_staff_only() {
    let fixture = fixture();
    let member = fixture.member("Ada Archer");
    let program = fixture.program("Camp", dollars(30), None);

    assert!(matches!(
        fixture.portal.program_roster(&member, &program.id),
        Err(PortalError::Roster(RosterError::Forbidden))
    ));
}

#[test]
fn my_enrollments_groups_by_status_and_totals_approved_fees() {
    let fixture = fixture();
    let staff = fixture.manager();
    let member = fixture.member("Ada Archer");
    let art = fixture.program("Art", dollars(25), None);
    let music = fixture.program("Music", dollars(10), None);
    let drama = fixture.program("Drama", dollars(7), None);
    let chess = fixture.program("Chess", dollars(3), None);

    fixture.approved(&staff, &member, &art);
    fixture.approved(&staff, &member, &chess);
    fixture.pending(&member, &music);
    let dropped = fixture.pending(&member, &drama);
    fixture.portal.withdraw(&member, &dropped.id).unwrap();

    let overview = fixture.portal.my_enrollments(&member).unwrap();

    assert_eq!(overview.approved.len(), 2);
    assert_eq!(overview.pending.len(), 1);
    assert_eq!(overview.pending[0].program_name, "Music");
    assert!(overview.waitlisted.is_empty());
    assert_eq!(overview.inactive.len(), 1);
    assert_eq!(overview.approved_total_fee, dollars(28));
}
