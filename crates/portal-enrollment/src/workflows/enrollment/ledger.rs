use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::domain::{Program, ProgramId};
use super::repository::{EnrollmentStore, RepositoryError};

/// Remaining seats for a program. Capacity is advisory and never blocks an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "remaining", rename_all = "snake_case")]
pub enum Availability {
    Unlimited,
    Limited(u32),
}

impl Availability {
    pub fn for_program(program: &Program) -> Self {
        match program.capacity {
            Some(capacity) => Availability::Limited(capacity.saturating_sub(program.enrolled)),
            None => Availability::Unlimited,
        }
    }

    pub fn remaining(self) -> Option<u32> {
        match self {
            Availability::Unlimited => None,
            Availability::Limited(remaining) => Some(remaining),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramAvailability {
    pub program_id: ProgramId,
    pub capacity: Option<u32>,
    pub enrolled: u32,
    pub available_spots: Option<u32>,
    pub at_capacity: bool,
}

impl ProgramAvailability {
    pub fn of(program: &Program) -> Self {
        let available_spots = Availability::for_program(program).remaining();
        Self {
            program_id: program.id,
            capacity: program.capacity,
            enrolled: program.enrolled,
            available_spots,
            at_capacity: available_spots == Some(0),
        }
    }
}

/// Stored counter compared with the true number of approved rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub program_id: ProgramId,
    pub program_name: String,
    pub recorded: u32,
    pub actual: u32,
    pub drift: i64,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.drift == 0
    }
}

/// Read side of the occupancy counters.
pub struct CapacityLedger<S> {
    store: Arc<S>,
}

impl<S> Clone for CapacityLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> CapacityLedger<S>
where
    S: EnrollmentStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn available_spots(&self, program_id: &ProgramId) -> Result<Availability, RepositoryError> {
        let program = self.program(program_id)?;
        Ok(Availability::for_program(&program))
    }

    pub fn availability(
        &self,
        program_id: &ProgramId,
    ) -> Result<ProgramAvailability, RepositoryError> {
        let program = self.program(program_id)?;
        Ok(ProgramAvailability::of(&program))
    }

    /// Recounts approved rows. Drift is reported and logged; the counter is left alone.
    pub fn reconcile(&self, program_id: &ProgramId) -> Result<ReconciliationReport, RepositoryError> {
        let program = self.program(program_id)?;
        self.report(program)
    }

    pub fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>, RepositoryError> {
        self.store
            .list_programs(true)?
            .into_iter()
            .map(|program| self.report(program))
            .collect()
    }

    fn report(&self, program: Program) -> Result<ReconciliationReport, RepositoryError> {
        let actual = self.store.count_approved(&program.id)?;
        let report = ReconciliationReport {
            program_id: program.id,
            recorded: program.enrolled,
            actual,
            drift: i64::from(program.enrolled) - i64::from(actual),
            program_name: program.name,
        };

        if !report.is_consistent() {
            warn!(
                program_id = %report.program_id,
                recorded = report.recorded,
                actual = report.actual,
                drift = report.drift,
                "occupancy counter drift detected"
            );
        }
        Ok(report)
    }

    fn program(&self, program_id: &ProgramId) -> Result<Program, RepositoryError> {
        self.store
            .fetch_program(program_id)?
            .ok_or(RepositoryError::NotFound)
    }
}
