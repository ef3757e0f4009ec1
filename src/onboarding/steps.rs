//! Step scoping: which operations each onboarding state exposes.
//!
//! Authorization happens once, here, at the boundary between parsed tool
//! calls and executors.

use std::collections::HashMap;

use crate::tools::OperationId;

use super::model::UserRole;
use super::state::{OnboardingState, StateEvent};

/// Why a requested operation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not an operation this service knows.
    Unknown { name: String },
    /// Known, but not exposed in the current step.
    NotInStep {
        operation: OperationId,
        state: OnboardingState,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown { name } => write!(f, "'{name}' is not available in this step"),
            Self::NotInStep { operation, state } => {
                write!(f, "'{operation}' is not available in the {state} step")
            }
        }
    }
}

/// State → permitted operations.
#[derive(Debug, Clone)]
pub struct StepAllowList {
    allowed: HashMap<OnboardingState, Vec<OperationId>>,
}

impl Default for StepAllowList {
    fn default() -> Self {
        let mut allowed = HashMap::new();
        allowed.insert(OnboardingState::ProfilePending, vec![OperationId::UpdateProfile]);
        allowed.insert(
            OnboardingState::BoatPending,
            vec![OperationId::FetchReferenceDetails, OperationId::CreateVessel],
        );
        allowed.insert(OnboardingState::JourneyPending, vec![OperationId::GenerateRoute]);
        Self { allowed }
    }
}

impl StepAllowList {
    /// Operations permitted in `state`. Empty for steps without operations.
    pub fn allowed(&self, state: OnboardingState) -> &[OperationId] {
        self.allowed.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a requested operation name against the step.
    pub fn authorize(&self, state: OnboardingState, name: &str) -> Result<OperationId, Rejection> {
        let operation = name.parse::<OperationId>().map_err(|_| Rejection::Unknown {
            name: name.to_string(),
        })?;
        if self.allowed(state).contains(&operation) {
            Ok(operation)
        } else {
            Err(Rejection::NotInStep { operation, state })
        }
    }
}

/// The operation whose success completes `state`.
pub fn expected_operation(state: OnboardingState) -> Option<OperationId> {
    match state {
        OnboardingState::ProfilePending => Some(OperationId::UpdateProfile),
        OnboardingState::BoatPending => Some(OperationId::CreateVessel),
        OnboardingState::JourneyPending => Some(OperationId::GenerateRoute),
        _ => None,
    }
}

/// Whether the session has already moved past the step `operation`
/// completes, so its result is on record from an earlier turn.
pub fn step_completed(role: UserRole, state: OnboardingState, operation: OperationId) -> bool {
    let step = match operation {
        OperationId::UpdateProfile => OnboardingState::ProfilePending,
        OperationId::CreateVessel if role == UserRole::Owner => OnboardingState::BoatPending,
        OperationId::GenerateRoute if role == UserRole::Owner => OnboardingState::JourneyPending,
        _ => return false,
    };
    state != OnboardingState::Deleted && state.rank() > step.rank()
}

/// The state event an operation's success (or duplicate) produces.
pub fn completion_event(operation: OperationId) -> Option<StateEvent> {
    match operation {
        OperationId::UpdateProfile => Some(StateEvent::ProfileSaved),
        OperationId::CreateVessel => Some(StateEvent::VesselCreated),
        OperationId::GenerateRoute => Some(StateEvent::JourneyCreated),
        OperationId::FetchReferenceDetails => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [OnboardingState; 7] = [
        OnboardingState::SignupPending,
        OnboardingState::ConsentPending,
        OnboardingState::ProfilePending,
        OnboardingState::BoatPending,
        OnboardingState::JourneyPending,
        OnboardingState::Completed,
        OnboardingState::Deleted,
    ];

    #[test]
    fn every_operation_outside_its_step_is_rejected() {
        let list = StepAllowList::default();
        for state in ALL_STATES {
            for op in OperationId::ALL {
                let result = list.authorize(state, op.as_str());
                if list.allowed(state).contains(&op) {
                    assert_eq!(result, Ok(op));
                } else {
                    assert_eq!(
                        result,
                        Err(Rejection::NotInStep {
                            operation: op,
                            state
                        })
                    );
                }
            }
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let list = StepAllowList::default();
        assert!(matches!(
            list.authorize(OnboardingState::BoatPending, "delete_everything"),
            Err(Rejection::Unknown { .. })
        ));
    }

    #[test]
    fn expected_operation_is_allowed_in_its_step() {
        let list = StepAllowList::default();
        for state in ALL_STATES {
            if let Some(op) = expected_operation(state) {
                assert!(list.allowed(state).contains(&op));
                assert!(completion_event(op).is_some());
            }
        }
    }

    #[test]
    fn steps_behind_the_session_count_as_completed() {
        use OnboardingState::*;
        assert!(step_completed(UserRole::Owner, JourneyPending, OperationId::CreateVessel));
        assert!(step_completed(UserRole::Owner, JourneyPending, OperationId::UpdateProfile));
        assert!(!step_completed(UserRole::Owner, JourneyPending, OperationId::GenerateRoute));
        assert!(!step_completed(UserRole::Owner, BoatPending, OperationId::CreateVessel));
        assert!(step_completed(UserRole::Owner, Completed, OperationId::GenerateRoute));
        assert!(!step_completed(UserRole::Owner, Deleted, OperationId::UpdateProfile));

        // Prospects never make a boat or a journey.
        assert!(step_completed(UserRole::Prospect, Completed, OperationId::UpdateProfile));
        assert!(!step_completed(UserRole::Prospect, Completed, OperationId::CreateVessel));
        assert!(!step_completed(UserRole::Owner, Completed, OperationId::FetchReferenceDetails));
    }

    #[test]
    fn boat_step_exposes_lookup_and_create() {
        let list = StepAllowList::default();
        assert_eq!(
            list.allowed(OnboardingState::BoatPending),
            &[OperationId::FetchReferenceDetails, OperationId::CreateVessel]
        );
        assert!(list.allowed(OnboardingState::SignupPending).is_empty());
    }
}
