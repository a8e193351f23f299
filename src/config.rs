//! Static configuration: experiment definitions, global toggles, and
//! notification hooks.
//!
//! A [`Config`] is passed explicitly into every operation that needs it;
//! there is no process-wide global. Definitions are `serde`-deserializable
//! so callers can load them from JSON.

use crate::algorithm::Algorithm;
use crate::alternative::AlternativeSpec;
use crate::error::Error;
use crate::trial::TrialEvent;
use serde::Deserialize;
use std::collections::HashMap;

/// Hook receiving an experiment name.
pub type ExperimentHook = Box<dyn Fn(&str) + Send + Sync>;
/// Hook receiving a retired store key.
pub type KeyHook = Box<dyn Fn(&str) + Send + Sync>;
/// Hook receiving a trial event.
pub type TrialHook = Box<dyn Fn(&TrialEvent) + Send + Sync>;
/// Hook receiving a backend error under failover.
pub type ErrorHook = Box<dyn Fn(&Error) + Send + Sync>;
/// Hook receiving no arguments.
pub type ReloadHook = Box<dyn Fn() + Send + Sync>;

/// Static definition of one experiment, consulted by name when a caller
/// supplies no explicit alternatives.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    /// Ordered alternatives; the first is the control.
    pub alternatives: Vec<AlternativeSpec>,
    /// Goal dimensions tracked independently.
    #[serde(default)]
    pub goals: Vec<String>,
    /// Whether a completion clears the subject for re-assignment.
    #[serde(default = "default_resettable")]
    pub resettable: bool,
    /// Assignment algorithm; the configured default applies when absent.
    /// Unknown tags are rejected at deserialization.
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
    /// Stop counting new participants past this total.
    #[serde(default)]
    pub max_participant_count: Option<u64>,
}

const fn default_resettable() -> bool {
    true
}

/// Fire-and-forget notification hooks toward the integration layer.
#[derive(Default)]
pub struct Hooks {
    /// A trial recorded a subject's first participation.
    pub on_trial_choose: Option<TrialHook>,
    /// A trial recorded a completion.
    pub on_trial_complete: Option<TrialHook>,
    /// An experiment's counters were reset.
    pub on_experiment_reset: Option<ExperimentHook>,
    /// An experiment was deleted.
    pub on_experiment_delete: Option<ExperimentHook>,
    /// A winner was declared.
    pub on_experiment_end: Option<ExperimentHook>,
    /// A participant/finished set was retired under a `gc:lists:` key.
    pub on_garbage_collection: Option<KeyHook>,
    /// The backend failed while failover was enabled.
    pub on_db_error: Option<ErrorHook>,
    /// Experiment definitions should be re-read after a reset/delete.
    pub on_reload: Option<ReloadHook>,
}

/// Engine configuration.
pub struct Config {
    enabled: bool,
    start_manually: bool,
    db_failover: bool,
    db_failover_allow_parameter_override: bool,
    default_algorithm: Algorithm,
    experiments: HashMap<String, ExperimentConfig>,
    hooks: Hooks,
}

impl Config {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Whether assignment is enabled at all; when disabled every decision
    /// returns the control.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether experiments wait for an explicit `start` before assigning.
    #[must_use]
    pub const fn start_manually(&self) -> bool {
        self.start_manually
    }

    /// Whether backend failures degrade to the control instead of
    /// propagating.
    #[must_use]
    pub const fn db_failover(&self) -> bool {
        self.db_failover
    }

    /// Whether a caller-supplied override still wins under failover.
    #[must_use]
    pub const fn db_failover_allow_parameter_override(&self) -> bool {
        self.db_failover_allow_parameter_override
    }

    /// Algorithm applied when neither caller nor definition names one.
    #[must_use]
    pub const fn default_algorithm(&self) -> Algorithm {
        self.default_algorithm
    }

    /// Look up a static experiment definition by name.
    #[must_use]
    pub fn experiment_for(&self, name: &str) -> Option<&ExperimentConfig> {
        self.experiments.get(name)
    }

    pub(crate) fn notify_trial_choose(&self, event: &TrialEvent) {
        if let Some(hook) = &self.hooks.on_trial_choose {
            hook(event);
        }
    }

    pub(crate) fn notify_trial_complete(&self, event: &TrialEvent) {
        if let Some(hook) = &self.hooks.on_trial_complete {
            hook(event);
        }
    }

    pub(crate) fn notify_experiment_reset(&self, name: &str) {
        if let Some(hook) = &self.hooks.on_experiment_reset {
            hook(name);
        }
    }

    pub(crate) fn notify_experiment_delete(&self, name: &str) {
        if let Some(hook) = &self.hooks.on_experiment_delete {
            hook(name);
        }
    }

    pub(crate) fn notify_experiment_end(&self, name: &str) {
        if let Some(hook) = &self.hooks.on_experiment_end {
            hook(name);
        }
    }

    pub(crate) fn notify_garbage_collection(&self, retired_key: &str) {
        if let Some(hook) = &self.hooks.on_garbage_collection {
            hook(retired_key);
        }
    }

    pub(crate) fn notify_db_error(&self, error: &Error) {
        if let Some(hook) = &self.hooks.on_db_error {
            hook(error);
        }
    }

    pub(crate) fn notify_reload(&self) {
        if let Some(hook) = &self.hooks.on_reload {
            hook();
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    enabled: Option<bool>,
    start_manually: bool,
    db_failover: bool,
    db_failover_allow_parameter_override: bool,
    default_algorithm: Algorithm,
    experiments: HashMap<String, ExperimentConfig>,
    hooks: Hooks,
}

impl ConfigBuilder {
    /// Disable assignment entirely; every decision returns the control.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Require an explicit `start` before an experiment assigns anyone.
    #[must_use]
    pub const fn start_manually(mut self, start_manually: bool) -> Self {
        self.start_manually = start_manually;
        self
    }

    /// Degrade to the control on backend failure instead of propagating.
    #[must_use]
    pub const fn db_failover(mut self, db_failover: bool) -> Self {
        self.db_failover = db_failover;
        self
    }

    /// Let a caller-supplied override win even under failover.
    #[must_use]
    pub const fn db_failover_allow_parameter_override(mut self, allow: bool) -> Self {
        self.db_failover_allow_parameter_override = allow;
        self
    }

    /// Algorithm applied when a definition names none.
    #[must_use]
    pub const fn default_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.default_algorithm = algorithm;
        self
    }

    /// Register a static experiment definition.
    #[must_use]
    pub fn experiment(mut self, name: impl Into<String>, definition: ExperimentConfig) -> Self {
        self.experiments.insert(name.into(), definition);
        self
    }

    /// Register many definitions at once (e.g. deserialized from JSON).
    #[must_use]
    pub fn experiments(mut self, definitions: HashMap<String, ExperimentConfig>) -> Self {
        self.experiments.extend(definitions);
        self
    }

    /// Hook fired on a subject's first participation in a trial.
    #[must_use]
    pub fn on_trial_choose(mut self, hook: impl Fn(&TrialEvent) + Send + Sync + 'static) -> Self {
        self.hooks.on_trial_choose = Some(Box::new(hook));
        self
    }

    /// Hook fired when a trial records a completion.
    #[must_use]
    pub fn on_trial_complete(mut self, hook: impl Fn(&TrialEvent) + Send + Sync + 'static) -> Self {
        self.hooks.on_trial_complete = Some(Box::new(hook));
        self
    }

    /// Hook fired after an experiment reset.
    #[must_use]
    pub fn on_experiment_reset(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_experiment_reset = Some(Box::new(hook));
        self
    }

    /// Hook fired after an experiment delete.
    #[must_use]
    pub fn on_experiment_delete(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_experiment_delete = Some(Box::new(hook));
        self
    }

    /// Hook fired when a winner is declared.
    #[must_use]
    pub fn on_experiment_end(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_experiment_end = Some(Box::new(hook));
        self
    }

    /// Hook fired with each retired `gc:lists:` key.
    #[must_use]
    pub fn on_garbage_collection(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_garbage_collection = Some(Box::new(hook));
        self
    }

    /// Hook fired with the backend error when failover swallows it.
    #[must_use]
    pub fn on_db_error(mut self, hook: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.hooks.on_db_error = Some(Box::new(hook));
        self
    }

    /// Hook fired when definitions should be re-read after reset/delete.
    #[must_use]
    pub fn on_reload(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_reload = Some(Box::new(hook));
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            enabled: self.enabled.unwrap_or(true),
            start_manually: self.start_manually,
            db_failover: self.db_failover,
            db_failover_allow_parameter_override: self.db_failover_allow_parameter_override,
            default_algorithm: self.default_algorithm,
            experiments: self.experiments,
            hooks: self.hooks,
        }
    }
}
