//! Deterministic hypothesis confidence scoring.
//!
//! The reasoning model supplies ideas; this module supplies the numbers.
//! Confidence is a pure function of the category prior, evidence quality,
//! anomaly strength, and the dependency-graph context:
//!
//! ```text
//! confidence = clip(0.40*base + 0.35*evidence + 0.25*anomaly + dep_boost,
//!                   0.01, 0.99)
//! ```
//!
//! All four components are persisted on the hypothesis so any downstream
//! process can audit the arithmetic.

mod priors;

pub use priors::CategoryPriors;

use std::collections::BTreeSet;

use crate::config::defaults::{
    CONFIDENCE_MAX, CONFIDENCE_MIN, DEP_BOOST_DIRECT_UPSTREAM, DEP_BOOST_TRANSITIVE_UPSTREAM,
    DEP_PENALTY_DOWNSTREAM_ONLY, SCORING_WEIGHT_ANOMALY, SCORING_WEIGHT_BASE,
    SCORING_WEIGHT_EVIDENCE,
};
use crate::types::{Hypothesis, Incident, RawHypothesis, Signal};

/// Live-incident context from the dependency graph, relative to the
/// incident's service.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyContext {
    /// A directly-upstream service has a live incident.
    pub direct_upstream_live: bool,
    /// A transitively-upstream service has a live incident.
    pub transitive_upstream_live: bool,
    /// Some downstream service has a live incident.
    pub downstream_live: bool,
}

impl DependencyContext {
    /// Additive confidence adjustment. Direct upstream dominates transitive;
    /// the downstream penalty applies only when nothing upstream is live.
    pub fn boost(self) -> f64 {
        if self.direct_upstream_live {
            DEP_BOOST_DIRECT_UPSTREAM
        } else if self.transitive_upstream_live {
            DEP_BOOST_TRANSITIVE_UPSTREAM
        } else if self.downstream_live {
            DEP_PENALTY_DOWNSTREAM_ONLY
        } else {
            0.0
        }
    }
}

/// The four audit components before blending.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceBreakdown {
    pub base: f64,
    pub evidence: f64,
    pub anomaly: f64,
    pub dep_boost: f64,
}

impl ConfidenceBreakdown {
    /// Blend and clip to the mandated range.
    pub fn confidence(self) -> f64 {
        (SCORING_WEIGHT_BASE * self.base
            + SCORING_WEIGHT_EVIDENCE * self.evidence
            + SCORING_WEIGHT_ANOMALY * self.anomaly
            + self.dep_boost)
            .clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
    }
}

/// Score one raw hypothesis against its incident's evidence.
///
/// `signals` are the contributing signals still held by the analysis worker
/// (stages 1-5 share the growing incident on one worker).
pub fn score_hypothesis(
    raw: &RawHypothesis,
    incident: &Incident,
    signals: &[Signal],
    priors: &CategoryPriors,
    dep: DependencyContext,
) -> ConfidenceBreakdown {
    ConfidenceBreakdown {
        base: priors.get(raw.category),
        evidence: evidence_term(raw, incident, signals),
        anomaly: anomaly_term(raw, signals),
        dep_boost: dep.boost(),
    }
}

/// Score, order, and rank a batch of raw hypotheses for an incident.
///
/// Rank is confidence descending; ties break by category prior, then by
/// description lexicographic. Rank 1 is the top hypothesis.
pub fn score_and_rank(
    raws: Vec<RawHypothesis>,
    incident: &Incident,
    signals: &[Signal],
    priors: &CategoryPriors,
    dep: DependencyContext,
) -> Vec<Hypothesis> {
    let mut scored: Vec<(RawHypothesis, ConfidenceBreakdown)> = raws
        .into_iter()
        .map(|raw| {
            let breakdown = score_hypothesis(&raw, incident, signals, priors, dep);
            (raw, breakdown)
        })
        .collect();

    scored.sort_by(|(a_raw, a_bd), (b_raw, b_bd)| {
        b_bd.confidence()
            .partial_cmp(&a_bd.confidence())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                priors
                    .get(b_raw.category)
                    .partial_cmp(&priors.get(a_raw.category))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a_raw.description.cmp(&b_raw.description))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(idx, (raw, breakdown))| Hypothesis {
            incident_id: incident.id,
            rank: idx as u32 + 1,
            description: raw.description,
            category: raw.category,
            confidence: breakdown.confidence(),
            base_confidence: breakdown.base,
            evidence_quality: breakdown.evidence,
            anomaly_strength: breakdown.anomaly,
            dependency_boost: breakdown.dep_boost,
            supporting_signals: raw.evidence_refs,
            reasoning: raw.reasoning,
            model_suggested_score: raw.model_suggested_score,
        })
        .collect()
}

/// Evidence term:
/// `0.6*avg_relevance + min(0.15, 0.05*#sources) + min(0.10, 0.03*#items)`.
///
/// Relevance per item is 1 when the ref is in the incident's anomalous set,
/// else 0; sources are the distinct origins of signals backing the refs.
fn evidence_term(raw: &RawHypothesis, incident: &Incident, signals: &[Signal]) -> f64 {
    if raw.evidence_refs.is_empty() {
        return 0.0;
    }

    let relevant = raw
        .evidence_refs
        .iter()
        .filter(|r| incident.affected_components.contains(*r))
        .count();
    let avg_relevance = relevant as f64 / raw.evidence_refs.len() as f64;

    let distinct_sources = matching_signals(raw, signals)
        .map(|s| s.source)
        .collect::<BTreeSet<_>>()
        .len();

    0.6 * avg_relevance
        + (0.05 * distinct_sources as f64).min(0.15)
        + (0.03 * raw.evidence_refs.len() as f64).min(0.10)
}

/// Anomaly term:
/// `0.7*avg_signal_anomaly_confidence + 0.3*clip(avg|z|/6, 0, 1)`.
///
/// Uses the signals backing this hypothesis's evidence refs; when none
/// match, the incident's full signal set stands in.
fn anomaly_term(raw: &RawHypothesis, signals: &[Signal]) -> f64 {
    let matching: Vec<&Signal> = matching_signals(raw, signals).collect();
    let pool: Vec<&Signal> = if matching.is_empty() {
        signals.iter().collect()
    } else {
        matching
    };
    if pool.is_empty() {
        return 0.0;
    }

    let avg_conf = pool
        .iter()
        .map(|s| s.severity().anomaly_confidence())
        .sum::<f64>()
        / pool.len() as f64;
    let avg_z = pool
        .iter()
        .map(|s| s.deviation_sigma.abs())
        .sum::<f64>()
        / pool.len() as f64;

    0.7 * avg_conf + 0.3 * (avg_z / 6.0).clamp(0.0, 1.0)
}

fn matching_signals<'a>(
    raw: &'a RawHypothesis,
    signals: &'a [Signal],
) -> impl Iterator<Item = &'a Signal> {
    signals
        .iter()
        .filter(|s| raw.evidence_refs.iter().any(|r| *r == s.metric_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HypothesisCategory, IncidentStatus, Severity, SignalSource};
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    fn make_incident(components: &[&str]) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            service: "payment-service".to_string(),
            severity: Severity::High,
            status: IncidentStatus::Analyzing,
            detected_at: Utc::now(),
            resolved_at: None,
            detection_source: "correlation".to_string(),
            affected_components: components.iter().map(|c| (*c).to_string()).collect(),
            metrics_snapshot: components.iter().map(|c| ((*c).to_string(), 1.0)).collect(),
            context: BTreeMap::new(),
            fingerprint: "fp".to_string(),
            duplicate_count: 0,
            reasoning_degraded: false,
            terminal_cause: None,
            timeline: Vec::new(),
        }
    }

    fn make_signal(metric: &str, sigma: f64, source: SignalSource) -> Signal {
        Signal {
            service: "payment-service".to_string(),
            metric_name: metric.to_string(),
            value: 8e9,
            baseline: 2e9,
            deviation_sigma: sigma,
            timestamp: Utc::now(),
            source,
            labels: BTreeMap::new(),
        }
    }

    fn make_raw(category: HypothesisCategory, refs: &[&str], description: &str) -> RawHypothesis {
        RawHypothesis {
            description: description.to_string(),
            category,
            evidence_refs: refs.iter().map(|r| (*r).to_string()).collect(),
            reasoning: String::new(),
            model_suggested_score: None,
        }
    }

    /// Memory-leak scenario: sigma 5.2, one metric signal, no dep context.
    /// Expected confidence lands in [0.70, 0.85].
    #[test]
    fn memory_leak_confidence_in_expected_band() {
        let incident = make_incident(&["container_memory_usage_bytes"]);
        let signals = vec![make_signal(
            "container_memory_usage_bytes",
            5.2,
            SignalSource::Metric,
        )];
        let raw = make_raw(
            HypothesisCategory::MemoryLeak,
            &["container_memory_usage_bytes"],
            "Heap growth",
        );
        let bd = score_hypothesis(
            &raw,
            &incident,
            &signals,
            &CategoryPriors::defaults(),
            DependencyContext::default(),
        );
        let confidence = bd.confidence();
        assert!(
            (0.70..=0.85).contains(&confidence),
            "expected band [0.70, 0.85], got {confidence}"
        );
        // The persisted components reproduce the total.
        let reproduced = (0.40 * bd.base + 0.35 * bd.evidence + 0.25 * bd.anomaly + bd.dep_boost)
            .clamp(0.01, 0.99);
        assert!((reproduced - confidence).abs() < 1e-9);
    }

    #[test]
    fn direct_upstream_boost_strictly_increases_confidence() {
        let incident = make_incident(&["error_rate"]);
        let signals = vec![make_signal("error_rate", 4.0, SignalSource::Metric)];
        let raw = make_raw(
            HypothesisCategory::DependencyFailure,
            &["error_rate"],
            "Upstream failure",
        );
        let priors = CategoryPriors::defaults();

        let without = score_hypothesis(
            &raw,
            &incident,
            &signals,
            &priors,
            DependencyContext::default(),
        )
        .confidence();
        let with = score_hypothesis(
            &raw,
            &incident,
            &signals,
            &priors,
            DependencyContext {
                direct_upstream_live: true,
                ..Default::default()
            },
        )
        .confidence();

        assert!(with > without);
        assert!((with - without - 0.15).abs() < 1e-9);
    }

    #[test]
    fn direct_upstream_dominates_transitive_and_downstream() {
        let all = DependencyContext {
            direct_upstream_live: true,
            transitive_upstream_live: true,
            downstream_live: true,
        };
        assert_eq!(all.boost(), 0.15);

        let transitive = DependencyContext {
            transitive_upstream_live: true,
            downstream_live: true,
            ..Default::default()
        };
        assert_eq!(transitive.boost(), 0.08);

        let downstream_only = DependencyContext {
            downstream_live: true,
            ..Default::default()
        };
        assert_eq!(downstream_only.boost(), -0.05);
    }

    #[test]
    fn confidence_is_clipped_to_range() {
        let incident = make_incident(&["m"]);
        // No signals, empty evidence -> tiny raw value, clipped up to 0.01.
        let raw = make_raw(HypothesisCategory::Other, &[], "nothing");
        let bd = score_hypothesis(
            &raw,
            &incident,
            &[],
            &CategoryPriors::defaults(),
            DependencyContext {
                downstream_live: true,
                ..Default::default()
            },
        );
        assert!(bd.confidence() >= 0.01);
        assert!(bd.confidence() <= 0.99);
    }

    #[test]
    fn ranking_is_stable_with_tiebreaks() {
        let incident = make_incident(&["error_rate"]);
        let signals = vec![make_signal("error_rate", 4.5, SignalSource::Metric)];
        // Same evidence/anomaly for all three; priors and descriptions differ.
        let raws = vec![
            make_raw(HypothesisCategory::Other, &["error_rate"], "zeta idea"),
            make_raw(HypothesisCategory::ErrorSpike, &["error_rate"], "beta idea"),
            make_raw(HypothesisCategory::Other, &["error_rate"], "alpha idea"),
        ];
        let ranked = score_and_rank(
            raws,
            &incident,
            &signals,
            &CategoryPriors::defaults(),
            DependencyContext::default(),
        );

        assert_eq!(ranked[0].category, HypothesisCategory::ErrorSpike);
        assert_eq!(ranked[0].rank, 1);
        // Equal confidence + equal prior -> lexicographic by description.
        assert_eq!(ranked[1].description, "alpha idea");
        assert_eq!(ranked[2].description, "zeta idea");
        assert_eq!(ranked[2].rank, 3);
    }
}
