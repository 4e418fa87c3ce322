//! Prompt construction for the reasoning model.
//!
//! Prompts are deterministic for a given incident state so the response
//! cache key (hash of prompt + model + temperature) is stable across
//! retries. The model receives incident facts, the metrics snapshot, a
//! names-only list of runbook categories, and the service's dependency
//! neighborhood — never runbook contents or action details.

use crate::types::Incident;

/// System prompt: role, rules, and the exact output contract.
pub fn system_prompt() -> String {
    let mut p = String::new();
    p.push_str(
        "You are a site-reliability root-cause analyst. Given one production \
         incident, propose ranked root-cause hypotheses.\n\
         Rules:\n\
         - Propose between 2 and 5 hypotheses.\n\
         - Each hypothesis references only evidence identifiers listed in the \
           incident (affected components or metrics snapshot keys).\n\
         - Do NOT assign scores or probabilities; scoring is not your job.\n\
         - Respond with a single JSON document and nothing else:\n",
    );
    p.push_str(
        r#"{"hypotheses": [{"description": "...", "category": "...", "evidence_refs": ["..."], "reasoning": "..."}]}"#,
    );
    p.push('\n');
    p
}

/// User prompt for one incident.
pub fn user_prompt(
    incident: &Incident,
    runbook_categories: &[String],
    neighborhood: &str,
) -> String {
    let mut p = String::new();
    p.push_str("INCIDENT\n");
    p.push_str(&format!("service: {}\n", incident.service));
    p.push_str(&format!("severity: {}\n", incident.severity));
    p.push_str(&format!("detected_at: {}\n", incident.detected_at.to_rfc3339()));
    p.push_str(&format!("duplicate_count: {}\n", incident.duplicate_count));

    p.push_str("\nAFFECTED COMPONENTS\n");
    for component in &incident.affected_components {
        p.push_str(component);
        p.push('\n');
    }

    p.push_str("\nMETRICS SNAPSHOT\n");
    for (metric, value) in &incident.metrics_snapshot {
        p.push_str(&format!("{metric} = {value}\n"));
    }

    if !incident.context.is_empty() {
        p.push_str("\nCONTEXT\n");
        for (key, value) in &incident.context {
            p.push_str(&format!("{key}: {value}\n"));
        }
    }

    p.push_str("\nDEPENDENCY NEIGHBORHOOD\n");
    p.push_str(neighborhood);
    p.push('\n');

    p.push_str("\nKNOWN RUNBOOK CATEGORIES (names only)\n");
    p.push_str(&runbook_categories.join(", "));
    p.push('\n');

    p
}
