//! Assignment algorithms.
//!
//! A closed enumeration of chooser variants, selected by the tag persisted
//! in the experiment's config hash. Unknown tags fail fast at load time
//! instead of surfacing mid-assignment.

use crate::alternative::Alternative;
use crate::experiment::Experiment;
use crate::{Error, Result};
use rand::Rng;
use rustc_hash::FxHasher;
use serde::Deserialize;
use std::hash::{Hash, Hasher};

/// Strategy for picking one alternative for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Draw proportional to each alternative's weight. Not deterministic per
    /// subject.
    #[default]
    WeightedRandom,
    /// Stable per (experiment, subject): the subject id is hashed onto the
    /// cumulative weight line, so repeat calls agree without any stored
    /// assignment.
    DeterministicHash,
}

impl Algorithm {
    /// Parse a persisted tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownAlgorithm`] for any unrecognized tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "weighted_random" => Ok(Self::WeightedRandom),
            "deterministic_hash" => Ok(Self::DeterministicHash),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }

    /// The tag written to the experiment's config hash.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::WeightedRandom => "weighted_random",
            Self::DeterministicHash => "deterministic_hash",
        }
    }

    /// Pick one alternative for a subject.
    ///
    /// # Errors
    ///
    /// Fails only if the experiment has no alternatives, which `validate`
    /// rejects before any save.
    pub fn choose_alternative(self, experiment: &Experiment, subject_id: &str) -> Result<Alternative> {
        let point = match self {
            Self::WeightedRandom => rand::thread_rng().gen::<f64>(),
            Self::DeterministicHash => hash_point(experiment.name(), subject_id),
        };
        pick_weighted(experiment.alternatives(), point).cloned().ok_or_else(|| {
            Error::InvalidAlternative(format!(
                "experiment '{}' has no alternatives to choose from",
                experiment.name()
            ))
        })
    }

    /// Pick `n` alternatives, one per draw.
    ///
    /// # Errors
    ///
    /// Fails only if the experiment has no alternatives.
    pub fn choose_alternatives(
        self,
        experiment: &Experiment,
        n: usize,
    ) -> Result<Vec<Alternative>> {
        let mut chosen = Vec::with_capacity(n);
        for i in 0..n {
            let point = match self {
                Self::WeightedRandom => rand::thread_rng().gen::<f64>(),
                Self::DeterministicHash => hash_point(experiment.name(), &i.to_string()),
            };
            let alternative =
                pick_weighted(experiment.alternatives(), point).cloned().ok_or_else(|| {
                    Error::InvalidAlternative(format!(
                        "experiment '{}' has no alternatives to choose from",
                        experiment.name()
                    ))
                })?;
            chosen.push(alternative);
        }
        Ok(chosen)
    }
}

/// Map (experiment, subject) to a stable point in [0, 1).
fn hash_point(experiment_name: &str, subject_id: &str) -> f64 {
    let mut hasher = FxHasher::default();
    experiment_name.hash(&mut hasher);
    subject_id.hash(&mut hasher);
    #[allow(clippy::cast_precision_loss)]
    let fraction = (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64;
    fraction
}

/// Walk the cumulative weight line and return the alternative covering
/// `point` (a fraction of the total weight).
fn pick_weighted(alternatives: &[Alternative], point: f64) -> Option<&Alternative> {
    let total: f64 = alternatives.iter().map(Alternative::weight).sum();
    if total <= 0.0 {
        return alternatives.first();
    }

    let mut cumulative = 0.0;
    for alternative in alternatives {
        cumulative += alternative.weight() / total;
        if point < cumulative {
            return Some(alternative);
        }
    }
    alternatives.last()
}
