//! Decision front-door: create-or-find an experiment, resolve an
//! assignment for a subject, and record completions.
//!
//! This is the surface the integration layer calls on every request. Under
//! a backend outage with failover enabled, assignment silently degrades to
//! the control variant (or a caller override, when permitted) so serving
//! never blocks on the store.

use crate::alternative::AlternativeSpec;
use crate::config::Config;
use crate::experiment::Experiment;
use crate::store::Store;
use crate::trial::Trial;
use crate::{Error, Result};
use tracing::warn;

/// Resolve the alternative name a subject should see.
///
/// The experiment is defined by the explicit `alternatives`/`goals` (first
/// alternative is the control) or, when `alternatives` is empty, by the
/// static configuration entry for `name`. The definition is saved
/// (create-or-find with structural-change detection) before deciding.
///
/// Decision order: caller override naming a live alternative, then a
/// declared winner, then the control for a not-yet-started experiment,
/// then the trial's assignment with at-most-once participation counting.
/// The choose hook fires only on a subject's first participation.
///
/// # Errors
///
/// [`Error::ExperimentNotFound`] when no definition can be derived;
/// [`Error::Unavailable`] propagates unless failover is enabled.
pub async fn assign<S: Store>(
    store: &S,
    config: &Config,
    name: &str,
    alternatives: Vec<AlternativeSpec>,
    goals: Vec<String>,
    subject_id: &str,
    override_alternative: Option<&str>,
) -> Result<String> {
    let mut experiment = if alternatives.is_empty() {
        match config.experiment_for(name) {
            Some(definition) => Experiment::from_config(name, definition, config)?,
            None => return Err(Error::ExperimentNotFound(name.to_string())),
        }
    } else {
        let mut experiment = Experiment::new(name, alternatives, goals)?;
        experiment.set_algorithm(config.default_algorithm());
        experiment
    };

    let control = experiment
        .control()
        .ok_or_else(|| Error::ExperimentNotFound(name.to_string()))?
        .name()
        .to_string();

    if !config.enabled() {
        return Ok(control);
    }

    match assign_inner(store, config, &mut experiment, &control, subject_id, override_alternative)
        .await
    {
        Ok(choice) => Ok(choice),
        Err(error @ Error::Unavailable(_)) if config.db_failover() => {
            warn!(experiment = name, %error, "store unavailable; failing over");
            config.notify_db_error(&error);
            if config.db_failover_allow_parameter_override() {
                if let Some(choice) = override_alternative {
                    return Ok(choice.to_string());
                }
            }
            Ok(control)
        }
        Err(error) => Err(error),
    }
}

async fn assign_inner<S: Store>(
    store: &S,
    config: &Config,
    experiment: &mut Experiment,
    control: &str,
    subject_id: &str,
    override_alternative: Option<&str>,
) -> Result<String> {
    experiment.save(store, config).await?;

    if let Some(choice) = override_alternative {
        if experiment.alternative_named(choice).is_some() {
            return Ok(choice.to_string());
        }
    }
    if let Some(winner) = experiment.winner(store).await? {
        return Ok(winner.name().to_string());
    }
    if experiment.start_time(store).await?.is_none() {
        return Ok(control.to_string());
    }

    let was_participating = experiment.participating(store, subject_id).await?;
    let mut trial = Trial::new(experiment, subject_id);
    let alternative = trial.choose(store).await?;
    if !was_participating {
        if let Some(event) = trial.event() {
            config.notify_trial_choose(&event);
        }
    }
    Ok(alternative.name().to_string())
}

/// Record a completion for a subject against zero-or-more goals.
///
/// A no-op while assignment is disabled or once a winner is declared; a
/// disabled window must not let completion counters drift away from the
/// participation counts `assign` stopped recording. Under failover, backend
/// failures are reported to the db-error hook and swallowed.
///
/// # Errors
///
/// [`Error::ExperimentNotFound`] for an unknown experiment;
/// [`Error::Unavailable`] propagates unless failover is enabled.
pub async fn complete<S: Store>(
    store: &S,
    config: &Config,
    name: &str,
    subject_id: &str,
    goals: Vec<String>,
) -> Result<()> {
    if !config.enabled() {
        return Ok(());
    }
    match complete_inner(store, config, name, subject_id, goals).await {
        Ok(()) => Ok(()),
        Err(error @ Error::Unavailable(_)) if config.db_failover() => {
            warn!(experiment = name, %error, "store unavailable; dropping completion");
            config.notify_db_error(&error);
            Ok(())
        }
        Err(error) => Err(error),
    }
}

async fn complete_inner<S: Store>(
    store: &S,
    config: &Config,
    name: &str,
    subject_id: &str,
    goals: Vec<String>,
) -> Result<()> {
    let mut experiment = Experiment::find(store, config, name).await?;
    if experiment.has_winner(store).await? {
        return Ok(());
    }
    let mut trial = Trial::new(&mut experiment, subject_id).with_goals(goals);
    trial.complete(store).await?;
    if let Some(event) = trial.event() {
        config.notify_trial_complete(&event);
    }
    Ok(())
}
