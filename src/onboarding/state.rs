//! Onboarding state machine: tracks which step a session is in.

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

use super::model::UserRole;

/// The steps of onboarding.
///
/// Owners progress SignupPending → ConsentPending → ProfilePending →
/// BoatPending → JourneyPending → Completed. Prospects skip the two asset
/// steps: ProfilePending → Completed. Deleted is reached only by declining
/// the optional AI-processing acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingState {
    SignupPending,
    ConsentPending,
    ProfilePending,
    BoatPending,
    JourneyPending,
    Completed,
    Deleted,
}

/// What moved the session forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEvent {
    Authenticated,
    ConsentAccepted,
    ConsentRejected,
    ProfileSaved,
    VesselCreated,
    JourneyCreated,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authenticated => "authenticated",
            Self::ConsentAccepted => "consent_accepted",
            Self::ConsentRejected => "consent_rejected",
            Self::ProfileSaved => "profile_saved",
            Self::VesselCreated => "vessel_created",
            Self::JourneyCreated => "journey_created",
        };
        write!(f, "{s}")
    }
}

impl OnboardingState {
    /// Position in the progression order. Deleted sorts last: it is terminal
    /// and nothing may follow it.
    pub fn rank(&self) -> u8 {
        match self {
            Self::SignupPending => 0,
            Self::ConsentPending => 1,
            Self::ProfilePending => 2,
            Self::BoatPending => 3,
            Self::JourneyPending => 4,
            Self::Completed => 5,
            Self::Deleted => 6,
        }
    }

    /// Check if a transition from `self` to `target` is legal for `role`.
    pub fn can_transition_to(&self, target: OnboardingState, role: UserRole) -> bool {
        use OnboardingState::*;
        let common = matches!(
            (self, target),
            (SignupPending, ConsentPending)
                | (ConsentPending, ProfilePending)
                | (SignupPending, Deleted)
                | (ConsentPending, Deleted)
        );
        let role_specific = match role {
            UserRole::Owner => matches!(
                (self, target),
                (ProfilePending, BoatPending)
                    | (BoatPending, JourneyPending)
                    | (JourneyPending, Completed)
            ),
            UserRole::Prospect => matches!((self, target), (ProfilePending, Completed)),
        };
        common || role_specific
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Deleted)
    }

    /// The state an event leads to from here, if the event applies at all.
    pub fn on_event(&self, role: UserRole, event: StateEvent) -> Option<OnboardingState> {
        use OnboardingState::*;
        let target = match (self, event) {
            (SignupPending, StateEvent::Authenticated) => ConsentPending,
            (ConsentPending, StateEvent::ConsentAccepted) => ProfilePending,
            (SignupPending | ConsentPending, StateEvent::ConsentRejected) => Deleted,
            (ProfilePending, StateEvent::ProfileSaved) => match role {
                UserRole::Owner => BoatPending,
                UserRole::Prospect => Completed,
            },
            (BoatPending, StateEvent::VesselCreated) => JourneyPending,
            (JourneyPending, StateEvent::JourneyCreated) => Completed,
            _ => return None,
        };
        self.can_transition_to(target, role).then_some(target)
    }

    /// Apply an event, failing if it does not apply in this state.
    pub fn apply(&self, role: UserRole, event: StateEvent) -> Result<OnboardingState, TransitionError> {
        self.on_event(role, event)
            .ok_or_else(|| TransitionError::NotApplicable {
                role: role.to_string(),
                state: self.to_string(),
                event: event.to_string(),
            })
    }
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self::SignupPending
    }
}

impl std::fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SignupPending => "signup_pending",
            Self::ConsentPending => "consent_pending",
            Self::ProfilePending => "profile_pending",
            Self::BoatPending => "boat_pending",
            Self::JourneyPending => "journey_pending",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OnboardingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup_pending" => Ok(Self::SignupPending),
            "consent_pending" => Ok(Self::ConsentPending),
            "profile_pending" => Ok(Self::ProfilePending),
            "boat_pending" => Ok(Self::BoatPending),
            "journey_pending" => Ok(Self::JourneyPending),
            "completed" => Ok(Self::Completed),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown onboarding state: {other}")),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: OnboardingState,
    pub to: OnboardingState,
    pub event: StateEvent,
}
