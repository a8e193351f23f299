//! The experiment aggregate: versioned definition, durable counters,
//! participant/finished bookkeeping, and lifecycle.
//!
//! Every store-touching operation takes the store handle explicitly; an
//! `Experiment` instance holds only the definition plus two short-lived
//! read-through caches over the store's set-membership facts. Those caches
//! are private to the instance and go stale the moment another caller
//! records an event, so instances must not be shared across concurrent
//! callers without re-validation.
//!
//! ## Versioned keys
//!
//! The alternative list and the participant/finished sets are namespaced by
//! the experiment's version once it is greater than zero. A structural
//! change (different alternative names or goals on re-save) resets counters
//! and bumps the version, abandoning the old-version keys rather than
//! mutating them in place; concurrent readers see either the fully-old or
//! the fully-new state.

use crate::algorithm::Algorithm;
use crate::alternative::{Alternative, AlternativeSpec};
use crate::config::{Config, ExperimentConfig};
use crate::store::Store;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

const REGISTRY_KEY: &str = "experiments";
const WINNER_KEY: &str = "experiment_winner";
const START_TIMES_KEY: &str = "experiment_start_times";
const END_TIMES_KEY: &str = "experiment_end_times";
const GC_INDEX_KEY: &str = "gc:index";

/// Read-through cache over set-membership facts for one experiment
/// instance. Never authoritative on a cold key: the first lookup goes to
/// the store, and `warm` populates many entries from one batch read.
#[derive(Debug, Default, Clone)]
struct MembershipCache {
    entries: HashMap<(String, Option<String>), bool>,
}

impl MembershipCache {
    fn get(&self, subject_id: &str, goal: Option<&str>) -> Option<bool> {
        self.entries
            .get(&(subject_id.to_string(), goal.map(str::to_string)))
            .copied()
    }

    fn warm(&mut self, subject_id: &str, goal: Option<&str>, value: bool) {
        self.entries
            .insert((subject_id.to_string(), goal.map(str::to_string)), value);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A named, versioned set of alternatives competing for assignment.
///
/// The first alternative is always the control; order is significant and
/// persisted.
#[derive(Debug, Clone)]
pub struct Experiment {
    name: String,
    alternatives: Vec<Alternative>,
    goals: Vec<String>,
    resettable: bool,
    algorithm: Algorithm,
    max_participant_count: Option<u64>,
    version: Option<i64>,
    has_winner: Option<bool>,
    participating: MembershipCache,
    finished: MembershipCache,
}

impl Experiment {
    /// Build an experiment from explicit definitions. Bad alternative specs
    /// (empty name, non-positive weight) are rejected here, not deep inside
    /// a later validation pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAlternative`] on a bad spec.
    pub fn new(
        name: impl Into<String>,
        alternatives: Vec<AlternativeSpec>,
        goals: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let alternatives: Vec<Alternative> = alternatives
            .into_iter()
            .map(|spec| Alternative::new(spec, name.clone()))
            .collect();
        for alternative in &alternatives {
            alternative.validate()?;
        }
        Ok(Self {
            name,
            alternatives,
            goals,
            resettable: true,
            algorithm: Algorithm::default(),
            max_participant_count: None,
            version: None,
            has_winner: None,
            participating: MembershipCache::default(),
            finished: MembershipCache::default(),
        })
    }

    /// Build from a static configuration definition.
    ///
    /// # Errors
    ///
    /// Fails fast on a bad alternative spec.
    pub fn from_config(name: &str, definition: &ExperimentConfig, config: &Config) -> Result<Self> {
        let mut experiment = Self::new(
            name,
            definition.alternatives.clone(),
            definition.goals.clone(),
        )?;
        experiment.resettable = definition.resettable;
        experiment.algorithm = definition
            .algorithm
            .unwrap_or_else(|| config.default_algorithm());
        experiment.max_participant_count = definition.max_participant_count;
        Ok(experiment)
    }

    fn shell(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alternatives: Vec::new(),
            goals: Vec::new(),
            resettable: true,
            algorithm: Algorithm::default(),
            max_participant_count: None,
            version: None,
            has_winner: None,
            participating: MembershipCache::default(),
            finished: MembershipCache::default(),
        }
    }

    /// Look up an experiment: the persisted definition wins, then the static
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExperimentNotFound`] when neither exists.
    pub async fn find<S: Store>(store: &S, config: &Config, name: &str) -> Result<Self> {
        let mut experiment = Self::shell(name);
        let key = experiment.key(store).await?;
        if store.exists(&key).await? {
            experiment.load_from_store(store).await?;
            Ok(experiment)
        } else if let Some(definition) = config.experiment_for(name) {
            Self::from_config(name, definition, config)
        } else {
            Err(Error::ExperimentNotFound(name.to_string()))
        }
    }

    /// Find the named experiment or create (and save) it from the supplied
    /// definition. With no explicit alternatives, falls back to the
    /// persisted or configured definition.
    pub async fn find_or_create<S: Store>(
        store: &S,
        config: &Config,
        name: &str,
        alternatives: Vec<AlternativeSpec>,
        goals: Vec<String>,
    ) -> Result<Self> {
        let mut experiment = if alternatives.is_empty() {
            Self::find(store, config, name).await?
        } else {
            let mut experiment = Self::new(name, alternatives, goals)?;
            experiment.algorithm = config.default_algorithm();
            experiment
        };
        experiment.save(store, config).await?;
        Ok(experiment)
    }

    /// Every registered experiment, by name order.
    pub async fn all<S: Store>(store: &S, config: &Config) -> Result<Vec<Self>> {
        let mut names = store.set_members(REGISTRY_KEY).await?;
        names.sort();
        let mut experiments = Vec::with_capacity(names.len());
        for name in &names {
            experiments.push(Self::find(store, config, name).await?);
        }
        Ok(experiments)
    }

    /// The experiment's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered alternatives; the first is the control.
    #[must_use]
    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Goal dimensions tracked for completions.
    #[must_use]
    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    /// Whether a completion clears the subject for re-assignment.
    #[must_use]
    pub const fn resettable(&self) -> bool {
        self.resettable
    }

    /// The configured assignment algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Set the assignment algorithm.
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = algorithm;
    }

    /// Participant ceiling, if any.
    #[must_use]
    pub const fn max_participant_count(&self) -> Option<u64> {
        self.max_participant_count
    }

    /// Set the participant ceiling.
    pub fn set_max_participant_count(&mut self, max: Option<u64>) {
        self.max_participant_count = max;
    }

    /// The control alternative (first in definition order).
    #[must_use]
    pub fn control(&self) -> Option<&Alternative> {
        self.alternatives.first()
    }

    /// Look up an alternative by name.
    #[must_use]
    pub fn alternative_named(&self, name: &str) -> Option<&Alternative> {
        self.alternatives.iter().find(|a| a.name() == name)
    }

    /// Reject empty definitions, bad alternatives, and empty goal names.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`] on an empty alternative list (the name
    /// resolved to no definition at all), [`Error::InvalidAlternative`] /
    /// [`Error::InvalidGoals`] otherwise.
    pub fn validate(&self) -> Result<()> {
        if self.alternatives.is_empty() {
            return Err(Error::ExperimentNotFound(self.name.clone()));
        }
        for alternative in &self.alternatives {
            alternative.validate()?;
        }
        for goal in &self.goals {
            if goal.is_empty() {
                return Err(Error::InvalidGoals(format!(
                    "experiment '{}' has an empty goal name",
                    self.name
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    /// Active key for the alternative list; version-namespaced once the
    /// version is positive.
    pub async fn key<S: Store>(&mut self, store: &S) -> Result<String> {
        let version = self.version(store).await?;
        Ok(if version > 0 {
            format!("{}:{version}", self.name)
        } else {
            self.name.clone()
        })
    }

    fn goals_key(&self) -> String {
        format!("{}:goals", self.name)
    }

    fn config_key(&self) -> String {
        format!("experiment_configurations/{}", self.name)
    }

    async fn participants_key<S: Store>(&mut self, store: &S) -> Result<String> {
        Ok(format!("{}:participants", self.key(store).await?))
    }

    async fn finished_key<S: Store>(&mut self, store: &S, goal: Option<&str>) -> Result<String> {
        let base = format!("{}:finished", self.key(store).await?);
        Ok(match goal {
            Some(goal) => format!("{base}:{goal}"),
            None => base,
        })
    }

    // ------------------------------------------------------------------
    // Version
    // ------------------------------------------------------------------

    /// Current version, read once from the store and cached on the
    /// instance.
    pub async fn version<S: Store>(&mut self, store: &S) -> Result<i64> {
        if let Some(version) = self.version {
            return Ok(version);
        }
        let version = store
            .counter_get(&format!("{}:version", self.name))
            .await?
            .unwrap_or(0);
        self.version = Some(version);
        Ok(version)
    }

    /// Atomically bump the version and re-read the authoritative value.
    pub async fn increment_version<S: Store>(&mut self, store: &S) -> Result<i64> {
        let version = store.counter_incr(&format!("{}:version", self.name)).await?;
        self.version = Some(version);
        debug!(experiment = %self.name, version, "bumped experiment version");
        Ok(version)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Whether the experiment has never been persisted under its active key.
    pub async fn is_new_record<S: Store>(&mut self, store: &S) -> Result<bool> {
        let key = self.key(store).await?;
        Ok(!store.exists(&key).await?)
    }

    /// Validate and persist the definition.
    ///
    /// First save registers the experiment, records a start timestamp
    /// (unless configured for manual start), and creates the alternative
    /// and goal lists. Re-save compares the stored name/goal sequences with
    /// the in-memory definition: a mismatch is a structural change and
    /// triggers a full reset (counters dropped, version bumped, lists
    /// re-created); an identical definition leaves counters and version
    /// untouched. The config hash is always rewritten.
    pub async fn save<S: Store>(&mut self, store: &S, config: &Config) -> Result<()> {
        self.validate()?;

        let key = self.key(store).await?;
        if !store.exists(&key).await? {
            debug!(experiment = %self.name, "saving new experiment");
            store.set_add(REGISTRY_KEY, &[self.name.clone()]).await?;
            if !config.start_manually() {
                self.start(store).await?;
            }
            self.write_definition(store).await?;
        } else {
            let existing_alternatives = store.list_range(&key).await?;
            let existing_goals = store.list_range(&self.goals_key()).await?;
            let names: Vec<String> = self
                .alternatives
                .iter()
                .map(|a| a.name().to_string())
                .collect();
            if existing_alternatives != names || existing_goals != self.goals {
                debug!(experiment = %self.name, "definition changed structurally; resetting");
                self.reset(store, config).await?;
                for alternative in &self.alternatives {
                    alternative.delete(store).await?;
                }
                store.delete(&self.goals_key()).await?;
                store.delete(&key).await?;
                self.write_definition(store).await?;
            }
        }

        let config_key = self.config_key();
        store
            .hash_set(&config_key, "resettable", &self.resettable.to_string())
            .await?;
        store
            .hash_set(&config_key, "algorithm", self.algorithm.tag())
            .await?;
        match self.max_participant_count {
            Some(max) => {
                store
                    .hash_set(&config_key, "max_participant_count", &max.to_string())
                    .await?;
            }
            None => store.hash_del(&config_key, "max_participant_count").await?,
        }
        Ok(())
    }

    async fn write_definition<S: Store>(&mut self, store: &S) -> Result<()> {
        let key = self.key(store).await?;
        for alternative in &self.alternatives {
            store.list_push(&key, alternative.name()).await?;
        }
        for goal in &self.goals {
            store.list_push(&self.goals_key(), goal).await?;
        }
        for alternative in &self.alternatives {
            alternative.save(store).await?;
        }
        Ok(())
    }

    /// Re-read definition and config from the store, replacing in-memory
    /// state.
    pub async fn load_from_store<S: Store>(&mut self, store: &S) -> Result<()> {
        let key = self.key(store).await?;
        let stored = store.hash_get_all(&self.config_key()).await?;
        if let Some(raw) = stored.get("resettable") {
            self.resettable = raw == "true";
        }
        if let Some(tag) = stored.get("algorithm") {
            self.algorithm = Algorithm::from_tag(tag)?;
        }
        self.max_participant_count = stored
            .get("max_participant_count")
            .and_then(|raw| raw.parse().ok());
        let names = store.list_range(&key).await?;
        self.alternatives = names
            .into_iter()
            .map(|name| Alternative::new(name, self.name.clone()))
            .collect();
        self.goals = store.list_range(&self.goals_key()).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Start / end times
    // ------------------------------------------------------------------

    /// Record the start timestamp. Assignment treats a missing start time
    /// as "not started" and serves the control.
    pub async fn start<S: Store>(&self, store: &S) -> Result<()> {
        store
            .hash_set(
                START_TIMES_KEY,
                &self.name,
                &Utc::now().timestamp().to_string(),
            )
            .await
    }

    /// When the experiment started, if it has.
    pub async fn start_time<S: Store>(&self, store: &S) -> Result<Option<DateTime<Utc>>> {
        let raw = store.hash_get(START_TIMES_KEY, &self.name).await?;
        Ok(raw
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    async fn set_end_time<S: Store>(&self, store: &S, config: &Config) -> Result<()> {
        store
            .hash_set(
                END_TIMES_KEY,
                &self.name,
                &Utc::now().timestamp().to_string(),
            )
            .await?;
        config.notify_experiment_end(&self.name);
        Ok(())
    }

    /// When the experiment ended (winner declared), if it has.
    pub async fn end_time<S: Store>(&self, store: &S) -> Result<Option<DateTime<Utc>>> {
        let raw = store.hash_get(END_TIMES_KEY, &self.name).await?;
        Ok(raw
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    // ------------------------------------------------------------------
    // Winner
    // ------------------------------------------------------------------

    /// The declared winner, if any. Also refreshes the instance's
    /// has-winner memo.
    pub async fn winner<S: Store>(&mut self, store: &S) -> Result<Option<Alternative>> {
        let raw = store.hash_get(WINNER_KEY, &self.name).await?;
        self.has_winner = Some(raw.is_some());
        Ok(raw.map(|name| Alternative::new(name, self.name.clone())))
    }

    /// Whether a winner has been declared (memoized per instance).
    pub async fn has_winner<S: Store>(&mut self, store: &S) -> Result<bool> {
        if let Some(has_winner) = self.has_winner {
            return Ok(has_winner);
        }
        Ok(self.winner(store).await?.is_some())
    }

    /// Declare a winner: assignment becomes deterministic, the end time is
    /// stamped, the end hook fires, and the participant/finished sets are
    /// retired via the GC rename pattern. Each alternative's counters are
    /// re-asserted so finals are materialized without clobbering.
    pub async fn set_winner<S: Store>(
        &mut self,
        store: &S,
        config: &Config,
        winner_name: &str,
    ) -> Result<()> {
        store.hash_set(WINNER_KEY, &self.name, winner_name).await?;
        self.has_winner = Some(true);
        self.set_end_time(store, config).await?;
        self.delete_participants(store, config).await?;
        self.delete_finished(store, config).await?;
        self.participating.clear();
        self.finished.clear();
        for alternative in &self.alternatives {
            alternative.save(store).await?;
        }
        Ok(())
    }

    /// Clear the declared winner, re-opening assignment.
    pub async fn reset_winner<S: Store>(&mut self, store: &S) -> Result<()> {
        store.hash_del(WINNER_KEY, &self.name).await?;
        self.has_winner = Some(false);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Pick the alternative for a subject: the winner if one is declared,
    /// the control for a single-alternative experiment, otherwise the
    /// configured algorithm.
    pub async fn random_alternative<S: Store>(
        &mut self,
        store: &S,
        subject_id: &str,
    ) -> Result<Alternative> {
        if let Some(winner) = self.winner(store).await? {
            return Ok(winner);
        }
        if self.alternatives.len() == 1 {
            return Ok(self.alternatives[0].clone());
        }
        self.algorithm.choose_alternative(self, subject_id)
    }

    /// Pick `n` alternatives; all the winner once one is declared.
    pub async fn random_alternatives<S: Store>(
        &mut self,
        store: &S,
        n: usize,
    ) -> Result<Vec<Alternative>> {
        if let Some(winner) = self.winner(store).await? {
            return Ok(vec![winner; n]);
        }
        self.algorithm.choose_alternatives(self, n)
    }

    // ------------------------------------------------------------------
    // Participation / completion bookkeeping
    // ------------------------------------------------------------------

    /// Total participants across all alternatives.
    pub async fn participant_count<S: Store>(&self, store: &S) -> Result<u64> {
        let mut total = 0;
        for alternative in &self.alternatives {
            total += alternative.participant_count(store).await?;
        }
        Ok(total)
    }

    /// Whether the configured participant ceiling has been reached. Never
    /// enough when no ceiling is configured.
    pub async fn has_enough_participants<S: Store>(&self, store: &S) -> Result<bool> {
        match self.max_participant_count {
            None => Ok(false),
            Some(max) => Ok(self.participant_count(store).await? >= max),
        }
    }

    /// Record one or many subjects in the participant set and warm the
    /// participation cache. A subject recorded here never causes
    /// `increment_participation` to fire again while the current version is
    /// active.
    pub async fn participate<S: Store>(&mut self, store: &S, subject_ids: &[String]) -> Result<()> {
        if subject_ids.is_empty() {
            return Ok(());
        }
        let key = self.participants_key(store).await?;
        store.set_add(&key, subject_ids).await?;
        for subject_id in subject_ids {
            self.participating.warm(subject_id, None, true);
        }
        Ok(())
    }

    /// Cache-first participation lookup; a cold lookup reads the store and
    /// warms the cache.
    pub async fn participating<S: Store>(&mut self, store: &S, subject_id: &str) -> Result<bool> {
        if let Some(value) = self.participating.get(subject_id, None) {
            return Ok(value);
        }
        let key = self.participants_key(store).await?;
        let value = store.set_contains(&key, subject_id).await?;
        self.participating.warm(subject_id, None, value);
        Ok(value)
    }

    /// Record a subject in the (optionally goal-scoped) finished set and
    /// warm the finished cache.
    pub async fn finish<S: Store>(
        &mut self,
        store: &S,
        subject_id: &str,
        goal: Option<&str>,
    ) -> Result<()> {
        let key = self.finished_key(store, goal).await?;
        store.set_add(&key, &[subject_id.to_string()]).await?;
        self.finished.warm(subject_id, goal, true);
        Ok(())
    }

    /// Cache-first finished lookup for one (subject, goal) pair.
    pub async fn finished<S: Store>(
        &mut self,
        store: &S,
        subject_id: &str,
        goal: Option<&str>,
    ) -> Result<bool> {
        if let Some(value) = self.finished.get(subject_id, goal) {
            return Ok(value);
        }
        let key = self.finished_key(store, goal).await?;
        let value = store.set_contains(&key, subject_id).await?;
        self.finished.warm(subject_id, goal, value);
        Ok(value)
    }

    /// Warm every (experiment, subject) participation cache entry from one
    /// pipelined batch of membership probes, instead of
    /// experiments × subjects sequential round trips.
    pub async fn preload_participating<S: Store>(
        store: &S,
        experiments: &mut [Self],
        subject_ids: &[String],
    ) -> Result<()> {
        let mut probes = Vec::new();
        let mut targets = Vec::new();
        for (index, experiment) in experiments.iter_mut().enumerate() {
            let key = experiment.participants_key(store).await?;
            for subject_id in subject_ids {
                probes.push((key.clone(), subject_id.clone()));
                targets.push((index, subject_id.clone()));
            }
        }
        if probes.is_empty() {
            return Ok(());
        }
        let results = store.set_contains_batch(&probes).await?;
        for ((index, subject_id), value) in targets.into_iter().zip(results) {
            experiments[index].participating.warm(&subject_id, None, value);
        }
        Ok(())
    }

    /// Warm every (experiment, subject, goal) finished cache entry from one
    /// pipelined batch of membership probes.
    pub async fn preload_finished<S: Store>(
        store: &S,
        experiments: &mut [Self],
        goals: &[String],
        subject_ids: &[String],
    ) -> Result<()> {
        let mut probes = Vec::new();
        let mut targets = Vec::new();
        for goal in goals {
            for (index, experiment) in experiments.iter_mut().enumerate() {
                let key = experiment.finished_key(store, Some(goal)).await?;
                for subject_id in subject_ids {
                    probes.push((key.clone(), subject_id.clone()));
                    targets.push((index, goal.clone(), subject_id.clone()));
                }
            }
        }
        if probes.is_empty() {
            return Ok(());
        }
        let results = store.set_contains_batch(&probes).await?;
        for ((index, goal, subject_id), value) in targets.into_iter().zip(results) {
            experiments[index]
                .finished
                .warm(&subject_id, Some(&goal), value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reset / delete / garbage collection
    // ------------------------------------------------------------------

    /// Zero every alternative's counters, clear the winner, retire the
    /// participant/finished sets, notify the reset hook, bump the version,
    /// and trigger the configuration-reload hook.
    pub async fn reset<S: Store>(&mut self, store: &S, config: &Config) -> Result<()> {
        debug!(experiment = %self.name, "resetting experiment");
        let goals = self.goals.clone();
        for alternative in &self.alternatives {
            alternative.reset(store, &goals).await?;
        }
        self.reset_winner(store).await?;
        self.delete_participants(store, config).await?;
        self.delete_finished(store, config).await?;
        config.notify_experiment_reset(&self.name);
        self.increment_version(store).await?;
        config.notify_reload();
        self.participating.clear();
        self.finished.clear();
        Ok(())
    }

    /// Like `reset`, but also removes the experiment from the registry and
    /// deletes the raw alternative/goal lists.
    pub async fn delete<S: Store>(&mut self, store: &S, config: &Config) -> Result<()> {
        debug!(experiment = %self.name, "deleting experiment");
        let key = self.key(store).await?;
        for alternative in &self.alternatives {
            alternative.delete(store).await?;
        }
        self.reset_winner(store).await?;
        store.set_remove(REGISTRY_KEY, &self.name).await?;
        self.delete_participants(store, config).await?;
        self.delete_finished(store, config).await?;
        store.delete(&self.goals_key()).await?;
        store.delete(&key).await?;
        config.notify_experiment_delete(&self.name);
        self.increment_version(store).await?;
        config.notify_reload();
        self.participating.clear();
        self.finished.clear();
        Ok(())
    }

    /// Retire a live set under a uniquely-numbered `gc:lists:` key instead
    /// of deleting it, so in-flight adds against the old name can't resurrect
    /// reclaimed storage, and notify the sweeper hook.
    async fn gc_retire<S: Store>(&self, store: &S, config: &Config, key: &str) -> Result<()> {
        if !store.exists(key).await? {
            return Ok(());
        }
        let index = store.counter_incr(GC_INDEX_KEY).await?;
        let retired = format!("gc:lists:{index}");
        if store.rename(key, &retired).await? {
            debug!(from = key, to = %retired, "retired key for garbage collection");
            config.notify_garbage_collection(&retired);
        }
        Ok(())
    }

    async fn delete_participants<S: Store>(&mut self, store: &S, config: &Config) -> Result<()> {
        let key = self.participants_key(store).await?;
        self.gc_retire(store, config, &key).await
    }

    async fn delete_finished<S: Store>(&mut self, store: &S, config: &Config) -> Result<()> {
        let base = self.finished_key(store, None).await?;
        self.gc_retire(store, config, &base).await?;
        let goals = self.goals.clone();
        for goal in &goals {
            let key = self.finished_key(store, Some(goal)).await?;
            self.gc_retire(store, config, &key).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Reportable snapshot: version, algorithm, resettable, start/end
    /// timestamps.
    pub async fn summary<S: Store>(&mut self, store: &S) -> Result<serde_json::Value> {
        let version = self.version(store).await?;
        let started_at = self.start_time(store).await?.map(|t| t.timestamp());
        let ended_at = self.end_time(store).await?.map(|t| t.timestamp());
        Ok(serde_json::json!({
            "version": version,
            "algorithm": self.algorithm.tag(),
            "resettable": self.resettable,
            "started_at": started_at,
            "ended_at": ended_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn experiment(alternatives: &[&str], goals: &[&str]) -> Experiment {
        Experiment::new(
            "button_color",
            alternatives.iter().map(|&a| a.into()).collect(),
            goals.iter().map(|&g| g.to_string()).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_new_record_registers_and_starts() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);

        exp.save(&store, &config).await.unwrap();

        assert!(store.set_contains("experiments", "button_color").await.unwrap());
        assert_eq!(
            store.list_range("button_color").await.unwrap(),
            vec!["red", "blue"]
        );
        assert!(exp.start_time(&store).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_manual_start_records_no_start_time() {
        let store = MemoryStore::new();
        let config = Config::builder().start_manually(true).build();
        let mut exp = experiment(&["red", "blue"], &[]);

        exp.save(&store, &config).await.unwrap();

        assert!(exp.start_time(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_empty_definition_fails() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&[], &[]);

        let err = exp.save(&store, &config).await.unwrap_err();
        assert!(matches!(err, Error::ExperimentNotFound(_)));
    }

    #[tokio::test]
    async fn test_identical_resave_leaves_counters_and_version_untouched() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);

        exp.save(&store, &config).await.unwrap();
        exp.alternatives()[1].increment_participation(&store).await.unwrap();

        let mut again = experiment(&["red", "blue"], &[]);
        again.save(&store, &config).await.unwrap();

        assert_eq!(again.version(&store).await.unwrap(), 0);
        assert_eq!(
            again.alternatives()[1].participant_count(&store).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_structural_change_resets_counters_and_bumps_version() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);

        exp.save(&store, &config).await.unwrap();
        exp.alternatives()[0].increment_participation(&store).await.unwrap();

        let mut changed = experiment(&["red", "blue", "green"], &[]);
        changed.save(&store, &config).await.unwrap();

        assert_eq!(changed.version(&store).await.unwrap(), 1);
        assert_eq!(
            changed.alternatives()[0].participant_count(&store).await.unwrap(),
            0
        );
        // New definition lives under the versioned key.
        assert_eq!(
            store.list_range("button_color:1").await.unwrap(),
            vec!["red", "blue", "green"]
        );
    }

    #[tokio::test]
    async fn test_goal_change_is_structural() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &["signup"]);
        exp.save(&store, &config).await.unwrap();

        let mut changed = experiment(&["red", "blue"], &["signup", "purchase"]);
        changed.save(&store, &config).await.unwrap();

        assert_eq!(changed.version(&store).await.unwrap(), 1);
        assert_eq!(
            store.list_range("button_color:goals").await.unwrap(),
            vec!["signup", "purchase"]
        );
    }

    #[tokio::test]
    async fn test_find_loads_persisted_definition() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &["signup"]);
        exp.set_max_participant_count(Some(100));
        exp.save(&store, &config).await.unwrap();

        let found = Experiment::find(&store, &config, "button_color").await.unwrap();

        assert_eq!(
            found.alternatives().iter().map(Alternative::name).collect::<Vec<_>>(),
            vec!["red", "blue"]
        );
        assert_eq!(found.goals(), ["signup"]);
        assert_eq!(found.max_participant_count(), Some(100));
    }

    #[tokio::test]
    async fn test_find_unknown_name_is_not_found() {
        let store = MemoryStore::new();
        let config = Config::default();

        let err = Experiment::find(&store, &config, "nope").await.unwrap_err();
        assert!(matches!(err, Error::ExperimentNotFound(_)));
    }

    #[tokio::test]
    async fn test_find_falls_back_to_configuration() {
        let store = MemoryStore::new();
        let config = Config::builder()
            .experiment(
                "button_color",
                crate::config::ExperimentConfig {
                    alternatives: vec!["red".into(), "blue".into()],
                    goals: vec!["signup".to_string()],
                    resettable: false,
                    algorithm: Some(Algorithm::DeterministicHash),
                    max_participant_count: None,
                },
            )
            .build();

        let found = Experiment::find(&store, &config, "button_color").await.unwrap();

        assert!(!found.resettable());
        assert_eq!(found.algorithm(), Algorithm::DeterministicHash);
        assert_eq!(found.goals(), ["signup"]);
    }

    #[tokio::test]
    async fn test_participate_is_cached_and_durable() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);
        exp.save(&store, &config).await.unwrap();

        assert!(!exp.participating(&store, "u1").await.unwrap());
        exp.participate(&store, &["u1".to_string()]).await.unwrap();
        assert!(exp.participating(&store, "u1").await.unwrap());

        // A fresh instance sees the durable fact.
        let mut fresh = Experiment::find(&store, &config, "button_color").await.unwrap();
        assert!(fresh.participating(&store, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_finished_tracks_goal_dimensions_independently() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &["signup", "purchase"]);
        exp.save(&store, &config).await.unwrap();

        exp.finish(&store, "u1", Some("signup")).await.unwrap();

        assert!(exp.finished(&store, "u1", Some("signup")).await.unwrap());
        assert!(!exp.finished(&store, "u1", Some("purchase")).await.unwrap());
        assert!(!exp.finished(&store, "u1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_preload_participating_warms_from_one_batch() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut a = experiment(&["red", "blue"], &[]);
        a.save(&store, &config).await.unwrap();
        a.participate(&store, &["u1".to_string()]).await.unwrap();

        let mut b = Experiment::new("other", vec!["x".into(), "y".into()], vec![]).unwrap();
        b.save(&store, &config).await.unwrap();

        let mut experiments = vec![
            Experiment::find(&store, &config, "button_color").await.unwrap(),
            Experiment::find(&store, &config, "other").await.unwrap(),
        ];
        let subjects = vec!["u1".to_string(), "u2".to_string()];
        Experiment::preload_participating(&store, &mut experiments, &subjects)
            .await
            .unwrap();

        assert!(experiments[0].participating.get("u1", None).unwrap());
        assert!(!experiments[0].participating.get("u2", None).unwrap());
        assert!(!experiments[1].participating.get("u1", None).unwrap());
    }

    #[tokio::test]
    async fn test_preload_finished_warms_goal_entries() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &["signup"]);
        exp.save(&store, &config).await.unwrap();
        exp.finish(&store, "u1", Some("signup")).await.unwrap();

        let mut experiments =
            vec![Experiment::find(&store, &config, "button_color").await.unwrap()];
        let goals = vec!["signup".to_string()];
        let subjects = vec!["u1".to_string(), "u2".to_string()];
        Experiment::preload_finished(&store, &mut experiments, &goals, &subjects)
            .await
            .unwrap();

        assert!(experiments[0].finished.get("u1", Some("signup")).unwrap());
        assert!(!experiments[0].finished.get("u2", Some("signup")).unwrap());
    }

    #[tokio::test]
    async fn test_winner_freezes_assignment() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);
        exp.save(&store, &config).await.unwrap();

        exp.set_winner(&store, &config, "blue").await.unwrap();

        for i in 0..20 {
            let alt = exp.random_alternative(&store, &format!("u{i}")).await.unwrap();
            assert_eq!(alt.name(), "blue");
        }
        let many = exp.random_alternatives(&store, 5).await.unwrap();
        assert!(many.iter().all(|a| a.name() == "blue"));
        assert!(exp.end_time(&store).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_winner_retires_participant_sets() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);
        exp.save(&store, &config).await.unwrap();
        exp.participate(&store, &["u1".to_string()]).await.unwrap();

        exp.set_winner(&store, &config, "blue").await.unwrap();

        assert!(!store.exists("button_color:participants").await.unwrap());
        assert!(store.set_contains("gc:lists:1", "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_winner_invalidates_membership_caches_on_same_instance() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &["signup"]);
        exp.save(&store, &config).await.unwrap();
        exp.participate(&store, &["u1".to_string()]).await.unwrap();
        exp.finish(&store, "u1", Some("signup")).await.unwrap();

        exp.set_winner(&store, &config, "blue").await.unwrap();

        // The sets were retired, so the very instance that warmed its caches
        // must re-read the store and see the membership gone.
        assert!(!exp.participating(&store, "u1").await.unwrap());
        assert!(!exp.finished(&store, "u1", Some("signup")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_winner_reopens_assignment() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);
        exp.save(&store, &config).await.unwrap();
        exp.set_winner(&store, &config, "blue").await.unwrap();

        exp.reset_winner(&store).await.unwrap();

        assert!(!exp.has_winner(&store).await.unwrap());
        assert!(exp.winner(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_has_enough_participants() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);
        exp.save(&store, &config).await.unwrap();

        // Never enough without a configured ceiling.
        assert!(!exp.has_enough_participants(&store).await.unwrap());

        exp.set_max_participant_count(Some(2));
        assert!(!exp.has_enough_participants(&store).await.unwrap());

        exp.alternatives()[0].increment_participation(&store).await.unwrap();
        exp.alternatives()[1].increment_participation(&store).await.unwrap();
        assert!(exp.has_enough_participants(&store).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_registry_entry_and_lists() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &["signup"]);
        exp.save(&store, &config).await.unwrap();

        exp.delete(&store, &config).await.unwrap();

        assert!(!store.set_contains("experiments", "button_color").await.unwrap());
        assert!(!store.exists("button_color").await.unwrap());
        assert!(!store.exists("button_color:goals").await.unwrap());
        assert_eq!(exp.version(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_all_lists_registered_experiments() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut a = Experiment::new("a", vec!["x".into(), "y".into()], vec![]).unwrap();
        a.save(&store, &config).await.unwrap();
        let mut b = Experiment::new("b", vec!["x".into(), "y".into()], vec![]).unwrap();
        b.save(&store, &config).await.unwrap();

        let all = Experiment::all(&store, &config).await.unwrap();
        let names: Vec<&str> = all.iter().map(Experiment::name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_summary_reports_version_and_times() {
        let store = MemoryStore::new();
        let config = Config::default();
        let mut exp = experiment(&["red", "blue"], &[]);
        exp.save(&store, &config).await.unwrap();

        let summary = exp.summary(&store).await.unwrap();
        assert_eq!(summary["version"], 0);
        assert_eq!(summary["algorithm"], "weighted_random");
        assert_eq!(summary["resettable"], true);
        assert!(summary["started_at"].is_i64());
        assert!(summary["ended_at"].is_null());
    }
}
