//! Pure transition validator for the approval lifecycle.
//!
//! The gateway authorizes only the human-in-the-loop segment. Downstream
//! states (fills, settlement) are reported by other systems and are never
//! reachable through this table.

use crate::error::HitlError;
use crate::models::ApprovalStatus;

/// Full lifecycle as seen by the gateway. `Pending` exists only between
/// signal arrival and persistence; stored rows always start at
/// `AwaitingApproval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Pending,
    AwaitingApproval,
    Accepted,
    Rejected,
}

impl From<ApprovalStatus> for LifecycleState {
    fn from(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::AwaitingApproval => LifecycleState::AwaitingApproval,
            ApprovalStatus::Accepted => LifecycleState::Accepted,
            ApprovalStatus::Rejected => LifecycleState::Rejected,
        }
    }
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Pending => "PENDING",
            LifecycleState::AwaitingApproval => "AWAITING_APPROVAL",
            LifecycleState::Accepted => "ACCEPTED",
            LifecycleState::Rejected => "REJECTED",
        }
    }
}

/// Validate a transition, returning the target state untouched on success.
///
/// Allowed:
///   PENDING            -> AWAITING_APPROVAL
///   AWAITING_APPROVAL  -> ACCEPTED | REJECTED
///
/// Everything else leaves the record unchanged and surfaces `SEC-030`.
pub fn validate_transition(
    from: LifecycleState,
    to: LifecycleState,
) -> Result<LifecycleState, HitlError> {
    let allowed = matches!(
        (from, to),
        (LifecycleState::Pending, LifecycleState::AwaitingApproval)
            | (
                LifecycleState::AwaitingApproval,
                LifecycleState::Accepted | LifecycleState::Rejected
            )
    );

    if allowed {
        Ok(to)
    } else {
        Err(HitlError::InvalidTransition {
            from: from.as_str().to_string(),
            action: to.as_str().to_string(),
        })
    }
}

/// Legal successors of a state; empty for terminal states.
pub fn successors(from: LifecycleState) -> &'static [LifecycleState] {
    match from {
        LifecycleState::Pending => &[LifecycleState::AwaitingApproval],
        LifecycleState::AwaitingApproval => {
            &[LifecycleState::Accepted, LifecycleState::Rejected]
        }
        LifecycleState::Accepted | LifecycleState::Rejected => &[],
    }
}
