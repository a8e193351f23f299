//! One assignable variant of an experiment and its durable counters.
//!
//! Counters live in the store hash keyed `experiment:alternative` and are
//! only ever mutated through atomic single-field increments; the in-memory
//! struct carries just the identity (name, owning experiment, weight).

use crate::significance::{z_score, Significance};
use crate::store::Store;
use crate::{Error, Result};
use serde::{de, Deserialize, Deserializer};
use std::collections::HashMap;

/// Explicit tagged definition of an alternative: a bare name (weight 1) or a
/// (name, weight) pair. Anything else is rejected at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum AlternativeSpec {
    /// Bare name; assignment weight defaults to 1.
    Name(String),
    /// Name with an explicit relative weight.
    Weighted(String, f64),
}

impl AlternativeSpec {
    /// The alternative's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Weighted(name, _) => name,
        }
    }

    /// The assignment weight (1 for a bare name).
    #[must_use]
    pub const fn weight(&self) -> f64 {
        match self {
            Self::Name(_) => 1.0,
            Self::Weighted(_, weight) => *weight,
        }
    }
}

impl From<&str> for AlternativeSpec {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for AlternativeSpec {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<(&str, f64)> for AlternativeSpec {
    fn from((name, weight): (&str, f64)) -> Self {
        Self::Weighted(name.to_string(), weight)
    }
}

impl<'de> Deserialize<'de> for AlternativeSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Weighted(HashMap<String, f64>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Name(name) => Ok(Self::Name(name)),
            Raw::Weighted(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((name, weight)), None) => Ok(Self::Weighted(name, weight)),
                    _ => Err(de::Error::custom(
                        "weighted alternative must be a single name-to-weight entry",
                    )),
                }
            }
        }
    }
}

/// One variant of an experiment.
///
/// Holds identity only; all counts are read from and written to the store on
/// demand so that concurrent callers observe a single authoritative value.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    name: String,
    experiment_name: String,
    weight: f64,
}

impl Alternative {
    /// Create an alternative for the named experiment.
    pub fn new(spec: impl Into<AlternativeSpec>, experiment_name: impl Into<String>) -> Self {
        let spec = spec.into();
        Self {
            name: spec.name().to_string(),
            experiment_name: experiment_name.into(),
            weight: spec.weight(),
        }
    }

    /// The alternative's name, unique within its experiment.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning experiment (looked up by name, never held).
    #[must_use]
    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Relative assignment weight.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Reject empty names and non-positive or non-finite weights.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAlternative`] on a bad definition.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidAlternative(
                "alternative name must not be empty".to_string(),
            ));
        }
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(Error::InvalidAlternative(format!(
                "alternative '{}' weight must be a positive number, got {}",
                self.name, self.weight
            )));
        }
        Ok(())
    }

    /// Store hash key holding this alternative's counters.
    #[must_use]
    pub fn counter_key(&self) -> String {
        format!("{}:{}", self.experiment_name, self.name)
    }

    fn completion_field(goal: Option<&str>, unique: bool) -> String {
        let base = if unique {
            "unique_completed_count"
        } else {
            "completed_count"
        };
        match goal {
            Some(goal) => format!("{base}:{goal}"),
            None => base.to_string(),
        }
    }

    async fn read_count<S: Store>(&self, store: &S, field: &str) -> Result<u64> {
        let raw = store.hash_get(&self.counter_key(), field).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Number of subjects assigned to this alternative.
    pub async fn participant_count<S: Store>(&self, store: &S) -> Result<u64> {
        self.read_count(store, "participant_count").await
    }

    /// Raw completion events for one goal dimension (`None` is the base,
    /// un-suffixed dimension). Always a non-negative integer.
    pub async fn completed_count<S: Store>(&self, store: &S, goal: Option<&str>) -> Result<u64> {
        self.read_count(store, &Self::completion_field(goal, false))
            .await
    }

    /// Unique completing subjects for one goal dimension.
    pub async fn unique_completed_count<S: Store>(
        &self,
        store: &S,
        goal: Option<&str>,
    ) -> Result<u64> {
        self.read_count(store, &Self::completion_field(goal, true))
            .await
    }

    /// Base completion count plus every per-goal completion count.
    ///
    /// Callers reporting on an experiment with goals must use this instead
    /// of also reading the base count separately, or they double-count.
    pub async fn all_completed_count<S: Store>(&self, store: &S, goals: &[String]) -> Result<u64> {
        let mut total = self.completed_count(store, None).await?;
        for goal in goals {
            total += self.completed_count(store, Some(goal)).await?;
        }
        Ok(total)
    }

    /// Participants who have not completed any goal dimension.
    pub async fn unfinished_count<S: Store>(&self, store: &S, goals: &[String]) -> Result<u64> {
        let participants = self.participant_count(store).await?;
        let completed = self.all_completed_count(store, goals).await?;
        Ok(participants.saturating_sub(completed))
    }

    /// Completions over participants for one goal dimension; 0 when no
    /// subject has participated yet.
    pub async fn conversion_rate<S: Store>(&self, store: &S, goal: Option<&str>) -> Result<f64> {
        let participants = self.participant_count(store).await?;
        if participants == 0 {
            return Ok(0.0);
        }
        let completed = self.completed_count(store, goal).await?;
        #[allow(clippy::cast_precision_loss)]
        Ok(completed as f64 / participants as f64)
    }

    /// Atomically count one assignment.
    pub async fn increment_participation<S: Store>(&self, store: &S) -> Result<()> {
        store
            .hash_incr_by(&self.counter_key(), "participant_count", 1)
            .await?;
        Ok(())
    }

    /// Atomically count one completion event for a goal dimension.
    pub async fn increment_completion<S: Store>(&self, store: &S, goal: Option<&str>) -> Result<()> {
        store
            .hash_incr_by(&self.counter_key(), &Self::completion_field(goal, false), 1)
            .await?;
        Ok(())
    }

    /// Atomically count one first-time completion for a goal dimension.
    pub async fn increment_unique_completion<S: Store>(
        &self,
        store: &S,
        goal: Option<&str>,
    ) -> Result<()> {
        store
            .hash_incr_by(&self.counter_key(), &Self::completion_field(goal, true), 1)
            .await?;
        Ok(())
    }

    /// z-score of this alternative's conversion rate against the control's.
    ///
    /// Comparing the control against itself yields
    /// [`Significance::NotApplicable`], as does any degenerate input.
    pub async fn z_score<S: Store>(
        &self,
        store: &S,
        control: &Alternative,
        goal: Option<&str>,
    ) -> Result<Significance> {
        if control.name == self.name {
            return Ok(Significance::NotApplicable);
        }

        let p_a = self.conversion_rate(store, goal).await?;
        let p_c = control.conversion_rate(store, goal).await?;
        let n_a = self.participant_count(store).await?;
        let n_c = control.participant_count(store).await?;

        Ok(z_score(p_a, n_a, p_c, n_c))
    }

    /// Initialize counters without clobbering existing values. Re-saving is
    /// idempotent.
    pub async fn save<S: Store>(&self, store: &S) -> Result<()> {
        let key = self.counter_key();
        store.hash_set_nx(&key, "participant_count", "0").await?;
        store.hash_set_nx(&key, "completed_count", "0").await?;
        Ok(())
    }

    /// Zero every counter, per-goal and unique fields included.
    pub async fn reset<S: Store>(&self, store: &S, goals: &[String]) -> Result<()> {
        let key = self.counter_key();
        store.hash_set(&key, "participant_count", "0").await?;
        store.hash_set(&key, "completed_count", "0").await?;
        store.hash_set(&key, "unique_completed_count", "0").await?;
        for goal in goals {
            store
                .hash_set(&key, &Self::completion_field(Some(goal), false), "0")
                .await?;
            store
                .hash_set(&key, &Self::completion_field(Some(goal), true), "0")
                .await?;
        }
        Ok(())
    }

    /// Remove the counter record entirely.
    pub async fn delete<S: Store>(&self, store: &S) -> Result<()> {
        store.delete(&self.counter_key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_spec_from_name() {
        let spec = AlternativeSpec::from("red");
        assert_eq!(spec.name(), "red");
        assert!((spec.weight() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_spec_from_pair() {
        let spec = AlternativeSpec::from(("blue", 0.25));
        assert_eq!(spec.name(), "blue");
        assert!((spec.weight() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_spec_deserialize_bare_and_weighted() {
        let spec: AlternativeSpec = serde_json::from_str("\"red\"").unwrap();
        assert_eq!(spec, AlternativeSpec::Name("red".to_string()));

        let spec: AlternativeSpec = serde_json::from_str("{\"blue\": 2.0}").unwrap();
        assert_eq!(spec, AlternativeSpec::Weighted("blue".to_string(), 2.0));
    }

    #[test]
    fn test_spec_deserialize_rejects_multi_entry_map() {
        let result: std::result::Result<AlternativeSpec, _> =
            serde_json::from_str("{\"a\": 1.0, \"b\": 2.0}");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_weight() {
        assert!(Alternative::new(("red", 0.0), "exp").validate().is_err());
        assert!(Alternative::new(("red", -1.0), "exp").validate().is_err());
        assert!(Alternative::new(("red", f64::NAN), "exp").validate().is_err());
        assert!(Alternative::new(("red", 2.0), "exp").validate().is_ok());
    }

    #[test]
    fn test_completion_field_naming() {
        assert_eq!(Alternative::completion_field(None, false), "completed_count");
        assert_eq!(
            Alternative::completion_field(Some("signup"), false),
            "completed_count:signup"
        );
        assert_eq!(
            Alternative::completion_field(Some("signup"), true),
            "unique_completed_count:signup"
        );
    }

    #[tokio::test]
    async fn test_conversion_rate_zero_without_participants() {
        let store = MemoryStore::new();
        let alt = Alternative::new("red", "exp");

        assert!((alt.conversion_rate(&store, None).await.unwrap()).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let store = MemoryStore::new();
        let alt = Alternative::new("red", "exp");

        alt.save(&store).await.unwrap();
        alt.increment_participation(&store).await.unwrap();
        alt.save(&store).await.unwrap();

        assert_eq!(alt.participant_count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_all_completed_count_sums_goal_dimensions() {
        let store = MemoryStore::new();
        let alt = Alternative::new("red", "exp");
        let goals = vec!["a".to_string(), "b".to_string()];

        alt.increment_completion(&store, None).await.unwrap();
        alt.increment_completion(&store, Some("a")).await.unwrap();
        alt.increment_completion(&store, Some("a")).await.unwrap();
        alt.increment_completion(&store, Some("b")).await.unwrap();

        assert_eq!(alt.all_completed_count(&store, &goals).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_reset_zeroes_per_goal_fields() {
        let store = MemoryStore::new();
        let alt = Alternative::new("red", "exp");
        let goals = vec!["signup".to_string()];

        alt.increment_participation(&store).await.unwrap();
        alt.increment_completion(&store, Some("signup")).await.unwrap();
        alt.increment_unique_completion(&store, Some("signup")).await.unwrap();

        alt.reset(&store, &goals).await.unwrap();

        assert_eq!(alt.participant_count(&store).await.unwrap(), 0);
        assert_eq!(alt.completed_count(&store, Some("signup")).await.unwrap(), 0);
        assert_eq!(
            alt.unique_completed_count(&store, Some("signup")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_z_score_self_comparison_not_applicable() {
        let store = MemoryStore::new();
        let control = Alternative::new("red", "exp");

        let sig = control.z_score(&store, &control, None).await.unwrap();
        assert_eq!(sig, Significance::NotApplicable);
    }
}
