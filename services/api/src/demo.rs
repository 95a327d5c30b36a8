use crate::infra::{build_portal, seed, PortalHandles, SeedData};
use chrono::Utc;
use clap::Args;
use portal_enrollment::config::EnrollmentConfig;
use portal_enrollment::error::AppError;
use portal_enrollment::workflows::enrollment::{
    Actor, AttendanceEntry, AttendanceStatus, CheckoutError, EnrollmentStatus, PaymentState,
    PortalError, Program, RosterEntry, SelectionPick,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Let the sandbox processor settle payment intents immediately.
    #[arg(long)]
    pub(crate) auto_capture: bool,
    /// Minutes a program selection stays valid before checkout must restart.
    #[arg(long)]
    pub(crate) selection_ttl_minutes: Option<i64>,
    /// Print the final program roster as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        auto_capture,
        selection_ttl_minutes,
        json,
    } = args;

    let mut config = EnrollmentConfig {
        auto_capture_payments: auto_capture,
        ..EnrollmentConfig::default()
    };
    if let Some(minutes) = selection_ttl_minutes.filter(|minutes| *minutes > 0) {
        config.selection_ttl_minutes = minutes;
    }

    let handles = build_portal(&config);
    let seeded = seed(&handles)?;
    let SeedData {
        manager,
        member,
        volunteer,
        intake_survey,
        programs,
    } = &seeded;

    println!("Program enrollment demo");
    println!("Catalog:");
    for program in programs {
        println!(
            "  - {} | fee {} {} | capacity {}",
            program.name,
            program.fee,
            config.currency,
            program
                .capacity
                .map(|capacity| capacity.to_string())
                .unwrap_or_else(|| "unlimited".to_string())
        );
    }

    let robotics = find(programs, "Robotics Club")?;
    let hikes = find(programs, "Saturday Hikes")?;

    println!("\nEligibility for {}", member.account().profile.name);
    let report = handles.portal.check_eligibility(member)?;
    if report.allowed {
        println!("  - eligible");
    } else {
        for item in &report.missing_items {
            println!("  - missing: {item}");
        }
    }
    handles.store.record_completion(member.id(), intake_survey.id);
    let report = handles.portal.check_eligibility(member)?;
    println!(
        "  After completing '{}': allowed = {}",
        intake_survey.title, report.allowed
    );

    println!("\nMember checkout");
    let selection = handles.portal.select(member, picks(&[robotics, hikes]))?;
    let quote = handles.portal.quote(member, &selection.id)?;
    for line in &quote.lines {
        println!("  #{} {} -> {}", line.rank, line.name, line.fee);
    }
    println!(
        "  Total {} {} (payment required: {})",
        quote.total, quote.currency, quote.payment_required
    );

    let intent = handles.portal.begin_payment(member, &selection.id)?;
    println!("  Payment intent {} -> {}", intent.reference, intent.state);
    if intent.state != PaymentState::Succeeded {
        let settled = handles
            .payments
            .capture(&intent.reference)
            .map_err(|err| PortalError::from(CheckoutError::from(err)))?;
        println!("  Sandbox capture -> {}", settled.state);
    }

    let receipt = handles
        .portal
        .confirm(member, &selection.id, Some(&intent.reference))?;
    println!(
        "  Confirmed {} enrollment(s), {} already present",
        receipt.created.len(),
        receipt.already_enrolled.len()
    );
    let replay = handles
        .portal
        .confirm(member, &selection.id, Some(&intent.reference))?;
    println!(
        "  Retried confirmation replayed = {} ({} row(s))",
        replay.replayed,
        replay.created.len()
    );

    println!("\nVolunteer checkout");
    let volunteer_selection = handles.portal.select(volunteer, picks(&[hikes]))?;
    let volunteer_receipt = handles
        .portal
        .confirm(volunteer, &volunteer_selection.id, None)?;
    println!(
        "  {} requested {} program(s) without payment",
        volunteer.account().profile.name,
        volunteer_receipt.created.len()
    );

    println!("\nStaff review");
    for row in receipt.created.iter().chain(&volunteer_receipt.created) {
        let outcome =
            handles
                .portal
                .transition(manager, &row.id, EnrollmentStatus::Approved, None)?;
        println!(
            "  - {} -> {} (enrolled now {})",
            outcome.previous,
            outcome.enrollment.status,
            outcome
                .counter
                .map(|counter| counter.enrolled.to_string())
                .unwrap_or_else(|| "unchanged".to_string())
        );
    }
    let availability = handles.portal.availability(&robotics.id)?;
    println!(
        "  {} spots left: {}",
        robotics.name,
        availability
            .available_spots
            .map(|spots| spots.to_string())
            .unwrap_or_else(|| "unlimited".to_string())
    );

    println!("\nBuddy pairing in {}", hikes.name);
    let assignment = handles
        .portal
        .assign_buddy(manager, &hikes.id, &member.id(), &volunteer.id())?;
    println!(
        "  {} paired with {}",
        member.account().profile.name,
        assignment.assignment().volunteer_id
    );
    let is_lead = handles.portal.toggle_lead(manager, &hikes.id, &volunteer.id())?;
    println!("  {} lead volunteer: {}", volunteer.account().profile.name, is_lead);
    print_roster(&handles, manager, hikes, json)?;

    println!("\nAttendance for {}", hikes.name);
    let today = Utc::now().date_naive();
    let sheet = handles.portal.attendance_sheet(manager, &hikes.id, today)?;
    let entries = sheet
        .participants
        .iter()
        .map(|line| AttendanceEntry {
            user_id: line.user_id,
            status: AttendanceStatus::Present,
            hours: line.hours,
            notes: String::new(),
        })
        .collect();
    let recorded = handles
        .portal
        .record_attendance(manager, &hikes.id, today, entries)?;
    println!("  {} participant(s) marked present on {today}", recorded.len());
    let hours = handles.portal.my_attendance(volunteer)?;
    println!(
        "  {} volunteer hours: {}",
        volunteer.account().profile.name,
        hours.total_hours
    );

    println!("\nVolunteer withdraws");
    let volunteer_row = volunteer_receipt
        .created
        .first()
        .ok_or(PortalError::NotFound("enrollment"))?;
    let withdrawal = handles.portal.withdraw(volunteer, &volunteer_row.id)?;
    println!(
        "  {} -> {} | released {} buddy link(s)",
        withdrawal.previous,
        withdrawal.enrollment.status,
        withdrawal.released_buddies.len()
    );
    let buddy = handles.portal.lookup_buddy(member, &hikes.id, &member.id())?;
    println!(
        "  {}'s buddy: {}",
        member.account().profile.name,
        buddy
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unassigned".to_string())
    );

    println!("\nLedger reconciliation");
    for entry in handles.portal.reconcile_all(manager)? {
        println!(
            "  - {}: recorded {} | actual {} | {}",
            entry.program_name,
            entry.recorded,
            entry.actual,
            if entry.is_consistent() {
                "consistent".to_string()
            } else {
                format!("drift {}", entry.drift)
            }
        );
    }

    let overview = handles.portal.my_enrollments(member)?;
    println!(
        "\n{} holds {} approved enrollment(s) totalling {} {}",
        member.account().profile.name,
        overview.approved.len(),
        overview.approved_total_fee,
        config.currency
    );
    println!(
        "Transition events dispatched: {}",
        handles.publisher.events().len()
    );

    Ok(())
}

fn find<'a>(programs: &'a [Program], name: &str) -> Result<&'a Program, PortalError> {
    programs
        .iter()
        .find(|program| program.name == name)
        .ok_or(PortalError::NotFound("program"))
}

fn picks(programs: &[&Program]) -> Vec<SelectionPick> {
    programs
        .iter()
        .zip(1u32..)
        .map(|(program, rank)| SelectionPick {
            program_id: program.id,
            rank,
        })
        .collect()
}

fn print_roster(
    handles: &PortalHandles,
    staff: &Actor,
    program: &Program,
    json: bool,
) -> Result<(), PortalError> {
    let roster = handles.portal.program_roster(staff, &program.id)?;
    if json {
        match serde_json::to_string_pretty(&roster) {
            Ok(body) => println!("  Roster payload:\n{body}"),
            Err(err) => println!("  Roster payload unavailable: {err}"),
        }
        return Ok(());
    }

    let describe = |entry: &RosterEntry| {
        let mut line = format!("{} ({})", entry.name, entry.status);
        if let Some(buddy) = &entry.buddy {
            line.push_str(&format!(" buddy: {}", buddy.name));
        }
        if !entry.paired_members.is_empty() {
            let names: Vec<&str> = entry
                .paired_members
                .iter()
                .map(|person| person.name.as_str())
                .collect();
            line.push_str(&format!(" paired with: {}", names.join(", ")));
        }
        if entry.is_lead {
            line.push_str(" [lead]");
        }
        line
    };
    println!("  Members:");
    for entry in &roster.members.approved {
        println!("    - {}", describe(entry));
    }
    println!("  Volunteers:");
    for entry in &roster.volunteers.approved {
        println!("    - {}", describe(entry));
    }
    Ok(())
}
