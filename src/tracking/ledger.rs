//! Append-only experiment ledger

use super::ranking::RankingKey;
use super::run::{RunFilter, RunId, RunIdGenerator, RunStatus, TrainingRun};
use super::storage::{JsonlStorage, LedgerStorage};
use crate::error::{ChurnError, Result};
use crate::evaluation::ensure_complete;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct LedgerInner {
    runs: Vec<TrainingRun>,
    index: HashMap<RunId, usize>,
    storage: Option<Box<dyn LedgerStorage>>,
}

/// Immutable record of every terminal trial
///
/// Appends take the write lock; lookups share the read lock. Entries are
/// never modified once appended.
pub struct ExperimentLedger {
    inner: RwLock<LedgerInner>,
    run_ids: Arc<RunIdGenerator>,
}

impl Default for ExperimentLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for ExperimentLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ExperimentLedger")
            .field("runs", &inner.runs.len())
            .field("storage", &inner.storage.as_ref().map(|s| s.location()))
            .finish()
    }
}

impl ExperimentLedger {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
            run_ids: Arc::new(RunIdGenerator::default()),
        }
    }

    /// Open a JSON-lines ledger, replaying existing entries
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let storage = JsonlStorage::open(path.as_ref())?;
        Self::with_storage(Box::new(storage))
    }

    pub fn with_storage(storage: Box<dyn LedgerStorage>) -> Result<Self> {
        let run_ids = Arc::new(RunIdGenerator::default());
        let mut inner = LedgerInner::default();

        for run in storage.load()? {
            if inner.index.contains_key(&run.run_id) {
                return Err(ChurnError::DuplicateRunError(run.run_id));
            }
            run_ids.observe(run.run_id);
            inner.index.insert(run.run_id, inner.runs.len());
            inner.runs.push(run);
        }
        info!(location = %storage.location(), runs = inner.runs.len(), "Opened experiment ledger");
        inner.storage = Some(storage);

        Ok(Self {
            inner: RwLock::new(inner),
            run_ids,
        })
    }

    /// Run id allocator for this ledger
    pub fn run_ids(&self) -> Arc<RunIdGenerator> {
        Arc::clone(&self.run_ids)
    }

    /// Record a terminal run exactly once
    pub fn append(&self, run: TrainingRun) -> Result<()> {
        check_terminal(&run)?;

        let mut inner = self.inner.write();
        if inner.index.contains_key(&run.run_id) {
            return Err(ChurnError::DuplicateRunError(run.run_id));
        }
        if let Some(storage) = inner.storage.as_mut() {
            storage.append(&run)?;
        }

        debug!(run_id = %run.run_id, status = %run.status, "Appended run");
        self.run_ids.observe(run.run_id);
        let position = inner.runs.len();
        inner.index.insert(run.run_id, position);
        inner.runs.push(run);
        Ok(())
    }

    pub fn get(&self, run_id: RunId) -> Result<TrainingRun> {
        let inner = self.inner.read();
        inner
            .index
            .get(&run_id)
            .map(|&i| inner.runs[i].clone())
            .ok_or(ChurnError::RunNotFound(run_id))
    }

    /// Best succeeded run under the ranking key
    pub fn best(&self, key: &RankingKey) -> Result<TrainingRun> {
        let inner = self.inner.read();
        key.best(inner.runs.iter().filter(|r| r.is_succeeded()))
            .cloned()
            .ok_or(ChurnError::NoSuccessfulRunError)
    }

    /// Matching runs in append order
    pub fn list(&self, filter: &RunFilter) -> Vec<TrainingRun> {
        let inner = self.inner.read();
        let matching = inner.runs.iter().filter(|r| filter.matches(r)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().runs.is_empty()
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.inner.read().runs.iter().filter(|r| r.status == status).count()
    }
}

fn check_terminal(run: &TrainingRun) -> Result<()> {
    match run.status {
        RunStatus::Running => Err(ChurnError::InvalidState(format!(
            "{} is still running; only terminal runs are recorded",
            run.run_id
        ))),
        RunStatus::Succeeded => {
            if run.artifact.is_none() {
                return Err(ChurnError::InvalidState(format!(
                    "{} succeeded without an artifact",
                    run.run_id
                )));
            }
            ensure_complete(&run.metrics)
        }
        RunStatus::Failed => match run.failure_reason.as_deref() {
            Some(reason) if !reason.is_empty() => Ok(()),
            _ => Err(ChurnError::InvalidState(format!(
                "{} failed without a reason",
                run.run_id
            ))),
        },
    }
}
