//! Approval gate: who authorizes a selected action.
//!
//! Rules evaluate in order, first match wins:
//! 1. runbook demands approval,
//! 2. blast level HIGH/CRITICAL,
//! 3. irreversible action,
//! 4. daily auto budget consumed,
//! 5. otherwise auto-approve.
//!
//! At 80% of the auto budget a warning is recorded but auto execution still
//! proceeds; only a fully consumed budget forces the operator route.

use crate::runbook::AllowedAction;
use crate::types::{BlastLevel, RiskProfile};

use super::rate_limit::RateLimitState;

/// Gate verdict for one proposed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub approval_required: bool,
    /// Rule that decided the routing; stable strings used in timelines and
    /// API bodies.
    pub reason: &'static str,
    /// Budget warning: auto allowed but >= 80% consumed.
    pub budget_warning: bool,
}

/// Decide the approval routing for a selected action.
pub fn decide(
    allowed: &AllowedAction,
    blast_level: BlastLevel,
    profile: &RiskProfile,
    rate_state: RateLimitState,
) -> GateDecision {
    let budget_warning = rate_state == RateLimitState::Approaching;

    if allowed.approval_required {
        return GateDecision {
            approval_required: true,
            reason: "runbook_policy",
            budget_warning,
        };
    }
    if matches!(blast_level, BlastLevel::High | BlastLevel::Critical) {
        return GateDecision {
            approval_required: true,
            reason: "blast_radius",
            budget_warning,
        };
    }
    if !profile.reversible {
        return GateDecision {
            approval_required: true,
            reason: "irreversible",
            budget_warning,
        };
    }
    if rate_state == RateLimitState::Exhausted {
        return GateDecision {
            approval_required: true,
            reason: "rate_limited_approaching",
            budget_warning,
        };
    }
    GateDecision {
        approval_required: false,
        reason: "auto",
        budget_warning,
    }
}
