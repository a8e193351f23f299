//! A single assignment decision tying a subject to an experiment.
//!
//! A trial is ephemeral and in-memory only: it resolves exactly one chosen
//! alternative (memoized for its lifetime) and drives the two durable
//! events, participation and completion. The "check membership, then
//! increment, then mark" sequences here are not cross-key transactions: two
//! fully concurrent completions for the same (subject, goal) can both pass
//! the unique check. Near-exclusivity, not exact exclusivity.

use crate::alternative::Alternative;
use crate::experiment::Experiment;
use crate::store::Store;
use crate::Result;

/// Progress of a trial through its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrialStatus {
    /// No alternative resolved yet.
    #[default]
    Unassigned,
    /// Alternative resolved but participation not recorded.
    Assigned,
    /// Participation recorded in the experiment's participant set.
    Participated,
    /// All requested goal completions recorded.
    Completed,
}

/// Snapshot of a trial handed to notification hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialEvent {
    /// Experiment name.
    pub experiment: String,
    /// Subject the decision was made for.
    pub subject_id: String,
    /// The chosen alternative's name.
    pub alternative: String,
    /// Goal dimensions the trial carries.
    pub goals: Vec<String>,
}

/// One per-decision state machine over a borrowed experiment.
#[derive(Debug)]
pub struct Trial<'a> {
    experiment: &'a mut Experiment,
    subject_id: String,
    goals: Vec<String>,
    alternative: Option<Alternative>,
    status: TrialStatus,
}

impl<'a> Trial<'a> {
    /// Start a trial for a subject.
    pub fn new(experiment: &'a mut Experiment, subject_id: impl Into<String>) -> Self {
        Self {
            experiment,
            subject_id: subject_id.into(),
            goals: Vec::new(),
            alternative: None,
            status: TrialStatus::Unassigned,
        }
    }

    /// Attach the goal dimensions this trial completes against.
    #[must_use]
    pub fn with_goals(mut self, goals: Vec<String>) -> Self {
        self.goals = goals;
        self
    }

    /// The subject this trial decides for.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Goal dimensions carried by this trial.
    #[must_use]
    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    /// Current progress.
    #[must_use]
    pub const fn status(&self) -> TrialStatus {
        self.status
    }

    /// Snapshot for notification hooks; `None` until an alternative has
    /// been resolved.
    #[must_use]
    pub fn event(&self) -> Option<TrialEvent> {
        self.alternative.as_ref().map(|alternative| TrialEvent {
            experiment: self.experiment.name().to_string(),
            subject_id: self.subject_id.clone(),
            alternative: alternative.name().to_string(),
            goals: self.goals.clone(),
        })
    }

    /// Resolve the chosen alternative, memoized for the trial's lifetime.
    ///
    /// A declared winner bypasses the algorithm in every case, including
    /// for subjects seeing the experiment for the first time.
    pub async fn alternative<S: Store>(&mut self, store: &S) -> Result<Alternative> {
        if let Some(alternative) = &self.alternative {
            return Ok(alternative.clone());
        }
        let alternative = self
            .experiment
            .random_alternative(store, &self.subject_id)
            .await?;
        self.alternative = Some(alternative.clone());
        if self.status == TrialStatus::Unassigned {
            self.status = TrialStatus::Assigned;
        }
        Ok(alternative)
    }

    /// Resolve the alternative and record participation, at most once per
    /// subject: repeated calls for the same subject never inflate
    /// `participant_count` while the experiment's version is unchanged.
    pub async fn choose<S: Store>(&mut self, store: &S) -> Result<Alternative> {
        let alternative = self.alternative(store).await?;
        if !self
            .experiment
            .participating(store, &self.subject_id)
            .await?
        {
            alternative.increment_participation(store).await?;
            self.experiment
                .participate(store, &[self.subject_id.clone()])
                .await?;
        }
        self.status = TrialStatus::Participated;
        Ok(alternative)
    }

    /// Record completions for every goal dimension of the trial (the single
    /// "no goal" dimension when none are attached).
    ///
    /// Each dimension keeps two permanently distinct statistics: the plain
    /// completion count grows on every call, the unique count at most once
    /// per (subject, goal) via the finished set.
    pub async fn complete<S: Store>(&mut self, store: &S) -> Result<()> {
        let alternative = self.alternative(store).await?;
        let dimensions: Vec<Option<String>> = if self.goals.is_empty() {
            vec![None]
        } else {
            self.goals.iter().cloned().map(Some).collect()
        };

        for goal in &dimensions {
            let goal = goal.as_deref();
            if !self
                .experiment
                .finished(store, &self.subject_id, goal)
                .await?
            {
                alternative.increment_unique_completion(store, goal).await?;
                self.experiment
                    .finish(store, &self.subject_id, goal)
                    .await?;
            }
            alternative.increment_completion(store, goal).await?;
        }
        self.status = TrialStatus::Completed;
        Ok(())
    }
}
