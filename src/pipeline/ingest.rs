//! Signal ingest loop: dedup -> correlation -> incident create/merge.
//!
//! Owns the correlator (single consumer of the signal channel). Candidates
//! either create a new incident and kick off analysis, or merge into a live
//! incident with the same fingerprint — a merge is an info-level event, not
//! an error.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::correlation::{Correlator, IncidentCandidate};
use crate::types::{Incident, IncidentStatus, Signal, TimelineEvent};

use super::{spawn_analysis, PipelineContext};

/// Drain-and-batch size per loop turn; keeps same-tick candidates together
/// so the lexicographic emission order applies.
const INGEST_BATCH: usize = 64;

/// Run the ingest loop until the channel closes or cancellation.
pub async fn run_ingest_loop(
    ctx: PipelineContext,
    mut correlator: Correlator,
    mut rx: mpsc::Receiver<Signal>,
) {
    info!("signal ingest loop started");
    loop {
        let first = tokio::select! {
            () = ctx.cancel.cancelled() => return,
            received = rx.recv() => match received {
                Some(signal) => signal,
                None => return,
            },
        };

        // Batch whatever arrived in the same tick.
        let mut admitted = Vec::with_capacity(INGEST_BATCH);
        for signal in std::iter::once(first)
            .chain(std::iter::from_fn(|| rx.try_recv().ok()))
            .take(INGEST_BATCH)
        {
            if let Some(s) = ctx.dedup.admit(signal) {
                admitted.push(s);
            }
        }

        let candidates = correlator.ingest_batch(admitted);
        for candidate in candidates {
            handle_candidate(&ctx, candidate);
        }
    }
}

/// Create a new incident from a candidate, or merge it into a live one.
pub fn handle_candidate(ctx: &PipelineContext, candidate: IncidentCandidate) {
    if let Some(existing_id) = ctx.store.find_live_by_fingerprint(&candidate.fingerprint) {
        merge_into(ctx, existing_id, &candidate);
        return;
    }

    // Signals swallowed by dedup still count toward the incident.
    let suppressed: u32 = candidate
        .signals
        .iter()
        .map(|s| ctx.dedup.duplicates_for(s))
        .sum();

    let incident = Incident {
        id: Uuid::new_v4(),
        service: candidate.service.clone(),
        severity: candidate.severity,
        status: IncidentStatus::Detected,
        detected_at: Utc::now(),
        resolved_at: None,
        detection_source: "correlation".to_string(),
        affected_components: candidate.affected_components.clone(),
        metrics_snapshot: candidate.metrics_snapshot.clone(),
        context: Default::default(),
        fingerprint: candidate.fingerprint.clone(),
        duplicate_count: suppressed,
        reasoning_degraded: false,
        terminal_cause: None,
        timeline: vec![TimelineEvent::now(
            "created",
            format!(
                "correlated {} signal(s), composite confidence {:.2}",
                candidate.signals.len(),
                candidate.composite_confidence
            ),
        )],
    };
    let incident_id = incident.id;

    if let Err(e) = ctx.store.create_incident(incident) {
        warn!(error = %e, "incident creation failed");
        return;
    }
    ctx.stats.bump(&ctx.stats.incidents_created);
    info!(
        incident_id = %incident_id,
        service = %candidate.service,
        severity = %candidate.severity,
        "incident created"
    );

    spawn_analysis(ctx.clone(), incident_id, candidate.signals);
}

/// Merge new evidence into a live incident: escalate severity monotonically,
/// union evidence, bump the duplicate count. Never re-creates.
fn merge_into(ctx: &PipelineContext, incident_id: Uuid, candidate: &IncidentCandidate) {
    let merged = ctx.store.update_incident(incident_id, &mut |incident| {
        incident.duplicate_count += 1;
        incident.escalate_severity(candidate.severity);
        incident
            .affected_components
            .extend(candidate.affected_components.iter().cloned());
        for (metric, value) in &candidate.metrics_snapshot {
            incident.metrics_snapshot.insert(metric.clone(), *value);
        }
        incident.timeline.push(TimelineEvent::now(
            "duplicate_merged",
            format!(
                "{} new signal(s) merged, duplicate_count={}",
                candidate.signals.len(),
                incident.duplicate_count
            ),
        ));
        Ok(())
    });

    match merged {
        Ok(incident) => {
            ctx.stats.bump(&ctx.stats.incidents_merged);
            info!(
                incident_id = %incident_id,
                duplicate_count = incident.duplicate_count,
                severity = %incident.severity,
                "duplicate evidence merged into live incident"
            );
        }
        Err(e) => warn!(incident_id = %incident_id, error = %e, "duplicate merge failed"),
    }
}
