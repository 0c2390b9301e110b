//! Promotion of the best ledger entry to the active model

use super::active::{ActiveModel, ModelPointer};
use crate::error::{ChurnError, Result};
use crate::tracking::{ArtifactStore, ExperimentLedger, RankingKey, TrainingRun};
use crate::training::ModelArtifact;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a promotion attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    /// The pointer now references a new run
    Promoted(Arc<ActiveModel>),
    /// The candidate did not beat the incumbent by the margin
    Retained(Arc<ActiveModel>),
}

impl PromotionOutcome {
    pub fn active(&self) -> &Arc<ActiveModel> {
        match self {
            PromotionOutcome::Promoted(a) | PromotionOutcome::Retained(a) => a,
        }
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self, PromotionOutcome::Promoted(_))
    }
}

/// Moves the active pointer to the best run when it is clearly better
pub struct Promoter {
    pointer: Arc<ModelPointer>,
    store: Arc<dyn ArtifactStore>,
    ranking: RankingKey,
    min_improvement_margin: f64,
}

impl Promoter {
    pub fn new(pointer: Arc<ModelPointer>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            pointer,
            store,
            ranking: RankingKey::default(),
            min_improvement_margin: 0.0,
        }
    }

    pub fn with_ranking(mut self, ranking: RankingKey) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_min_improvement_margin(mut self, margin: f64) -> Result<Self> {
        if !margin.is_finite() || margin < 0.0 {
            return Err(ChurnError::ConfigError(format!(
                "min_improvement_margin must be >= 0, got {}",
                margin
            )));
        }
        self.min_improvement_margin = margin;
        Ok(self)
    }

    pub fn pointer(&self) -> &Arc<ModelPointer> {
        &self.pointer
    }

    /// Promote the ledger's best run if it beats the incumbent
    ///
    /// The candidate's artifact is read back and decoded before the swap;
    /// any failure leaves the current pointer untouched.
    pub fn promote(&self, ledger: &ExperimentLedger) -> Result<PromotionOutcome> {
        let candidate = ledger.best(&self.ranking)?;
        let score = self.ranking.score(&candidate).ok_or_else(|| {
            ChurnError::IncompleteMetricsError(format!("{} has no `{}`", candidate.run_id, self.ranking.metric))
        })?;

        let _promotion = self.pointer.lock_promotion();
        let incumbent = self.pointer.current();

        if let Some(current) = &incumbent {
            if current.run_id == candidate.run_id {
                return Ok(PromotionOutcome::Retained(Arc::clone(current)));
            }
            if let Some(current_score) = self.incumbent_score(ledger, current) {
                if score <= current_score + self.min_improvement_margin {
                    info!(
                        candidate = %candidate.run_id,
                        active = %current.run_id,
                        candidate_score = score,
                        active_score = current_score,
                        margin = self.min_improvement_margin,
                        "Keeping active model"
                    );
                    return Ok(PromotionOutcome::Retained(Arc::clone(current)));
                }
            }
        }

        self.verify_artifact(&candidate)?;
        let reference = candidate
            .artifact
            .clone()
            .ok_or_else(|| ChurnError::InvalidState(format!("{} has no artifact", candidate.run_id)))?;

        let next = ActiveModel {
            run_id: candidate.run_id,
            metric: self.ranking.metric,
            score: candidate.metric(self.ranking.metric.as_str()).unwrap_or(score),
            artifact: reference,
            version: self.pointer.version() + 1,
            promoted_at: Utc::now(),
        };
        let active = self.pointer.swap(next)?;
        info!(
            run_id = %active.run_id,
            version = active.version,
            metric = %active.metric,
            score = active.score,
            "Promoted model"
        );
        Ok(PromotionOutcome::Promoted(active))
    }

    /// Incumbent's score under the current ranking, oriented higher-is-better
    fn incumbent_score(&self, ledger: &ExperimentLedger, current: &ActiveModel) -> Option<f64> {
        if let Ok(run) = ledger.get(current.run_id) {
            return self.ranking.score(&run);
        }
        if current.metric == self.ranking.metric {
            let s = current.score;
            return Some(if current.metric.higher_is_better() { s } else { -s });
        }
        warn!(active = %current.run_id, "Active model cannot be scored under the current ranking");
        None
    }

    fn verify_artifact(&self, run: &TrainingRun) -> Result<()> {
        let reference = run
            .artifact
            .as_ref()
            .ok_or_else(|| ChurnError::InvalidState(format!("{} has no artifact", run.run_id)))?;
        let bytes = self.store.get(reference)?;
        let artifact = ModelArtifact::from_bytes(&bytes)?;
        if artifact.run_id != run.run_id {
            return Err(ChurnError::ArtifactError(format!(
                "artifact at {} belongs to {}, not {}",
                reference.location, artifact.run_id, run.run_id
            )));
        }
        Ok(())
    }
}
