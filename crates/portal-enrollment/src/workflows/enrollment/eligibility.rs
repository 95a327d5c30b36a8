use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::UserAccount;
use super::repository::{RepositoryError, RequirementStore, SurveyResponses};

pub const INCOMPLETE_PROFILE_ITEM: &str = "Complete your profile";

/// Outcome of a gate check; `missing_items` is empty whenever `allowed` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub allowed: bool,
    pub missing_items: Vec<String>,
}

impl EligibilityReport {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            missing_items: Vec::new(),
        }
    }

    fn blocked(missing_items: Vec<String>) -> Self {
        Self {
            allowed: false,
            missing_items,
        }
    }
}

/// Read-only prerequisite check run before any enrollment attempt.
pub struct EligibilityGate<R, Q> {
    requirements: Arc<R>,
    responses: Arc<Q>,
}

impl<R, Q> Clone for EligibilityGate<R, Q> {
    fn clone(&self) -> Self {
        Self {
            requirements: Arc::clone(&self.requirements),
            responses: Arc::clone(&self.responses),
        }
    }
}

impl<R, Q> EligibilityGate<R, Q>
where
    R: RequirementStore,
    Q: SurveyResponses,
{
    pub fn new(requirements: Arc<R>, responses: Arc<Q>) -> Self {
        Self {
            requirements,
            responses,
        }
    }

    /// Closed registration wins over everything else; otherwise the role's active requirement
    /// decides, profile first and then surveys in their configured order.
    pub fn evaluate(&self, user: &UserAccount) -> Result<EligibilityReport, RepositoryError> {
        let settings = self.requirements.enrollment_settings()?;
        if !settings.enrollment_open {
            return Ok(EligibilityReport::blocked(vec![settings.closure_message()]));
        }

        let requirement = match self.requirements.requirement_for(user.role)? {
            Some(requirement) if requirement.active => requirement,
            _ => return Ok(EligibilityReport::allowed()),
        };

        let mut missing_items = Vec::new();
        if requirement.require_profile_completion && !user.profile.is_complete() {
            missing_items.push(INCOMPLETE_PROFILE_ITEM.to_string());
        }
        for survey in &requirement.required_surveys {
            if !self.responses.has_completed(&user.id, &survey.id)? {
                missing_items.push(format!("Complete survey: {}", survey.title));
            }
        }

        if missing_items.is_empty() {
            Ok(EligibilityReport::allowed())
        } else {
            debug!(
                user_id = %user.id,
                role = user.role.label(),
                missing = missing_items.len(),
                "eligibility prerequisites unmet"
            );
            Ok(EligibilityReport::blocked(missing_items))
        }
    }
}
