//! Category priors: spec defaults, overridable by learned success rates.

use std::collections::HashMap;

use crate::config::defaults::PRIOR_OVERRIDE_MIN_OUTCOMES;
use crate::types::HypothesisCategory;

/// Prior table used as the base term of hypothesis confidence.
///
/// Starts from the built-in defaults; a category's long-run success rate
/// from the learning store replaces the default only once that category has
/// accumulated enough outcomes.
#[derive(Debug, Clone, Default)]
pub struct CategoryPriors {
    learned: HashMap<HypothesisCategory, f64>,
}

impl CategoryPriors {
    /// Defaults only, no learned overrides.
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Build priors from learned (success_rate, outcome_count) pairs.
    ///
    /// Categories below the outcome minimum keep their default. Learned
    /// rates are clamped away from 0/1 so a cold streak cannot zero a
    /// category out of consideration.
    pub fn with_learned(rates: &HashMap<HypothesisCategory, (f64, usize)>) -> Self {
        let mut learned = HashMap::new();
        for (category, (rate, count)) in rates {
            if *count >= PRIOR_OVERRIDE_MIN_OUTCOMES {
                learned.insert(*category, rate.clamp(0.05, 0.95));
            }
        }
        Self { learned }
    }

    pub fn get(&self, category: HypothesisCategory) -> f64 {
        self.learned
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_prior())
    }

    /// Number of categories running on learned priors.
    pub fn learned_count(&self) -> usize {
        self.learned.len()
    }
}
