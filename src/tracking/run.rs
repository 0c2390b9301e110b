//! Training run records

use super::artifacts::ArtifactRef;
use crate::error::{ChurnError, Result};
use crate::evaluation::Metrics;
use crate::optimizer::TrialParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic run identifier, rendered as `run-000042`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RunId(u64);

impl RunId {
    pub fn new(value: u64) -> Self {
        RunId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{:06}", self.0)
    }
}

impl FromStr for RunId {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix("run-")
            .and_then(|n| n.parse::<u64>().ok())
            .map(RunId)
            .ok_or_else(|| ChurnError::SerializationError(format!("invalid run id `{}`", s)))
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RunId {
    type Error = ChurnError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Allocates run ids; shared by everything that creates runs for one ledger
#[derive(Debug)]
pub struct RunIdGenerator {
    next: AtomicU64,
}

impl Default for RunIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl RunIdGenerator {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> RunId {
        RunId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Make sure ids handed out later are greater than `id`
    pub fn observe(&self, id: RunId) {
        self.next.fetch_max(id.0 + 1, Ordering::SeqCst);
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(ChurnError::ConfigError(format!("unknown run status `{}`", other))),
        }
    }
}

/// One trial: configuration, outcome, and where its artifact lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_id: Option<String>,
    pub config: TrialParams,
    pub artifact: Option<ArtifactRef>,
    pub metrics: Metrics,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrainingRun {
    pub fn started(run_id: RunId, config: TrialParams) -> Self {
        Self {
            run_id,
            search_id: None,
            config,
            artifact: None,
            metrics: Metrics::new(),
            status: RunStatus::Running,
            failure_reason: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_search_id(mut self, search_id: impl Into<String>) -> Self {
        self.search_id = Some(search_id.into());
        self
    }

    pub fn succeed(mut self, artifact: ArtifactRef, metrics: Metrics) -> Self {
        self.artifact = Some(artifact);
        self.metrics = metrics;
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.failure_reason = Some(if reason.is_empty() { "unknown failure".to_string() } else { reason });
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Wall-clock duration, for finished runs
    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.created_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Query over ledger entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub search_id: Option<String>,
    /// Keep runs whose metric is at least this value
    pub min_metric: Option<(String, f64)>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_search_id(mut self, search_id: impl Into<String>) -> Self {
        self.search_id = Some(search_id.into());
        self
    }

    pub fn with_min_metric(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.min_metric = Some((metric.into(), value));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, run: &TrainingRun) -> bool {
        if self.status.is_some_and(|s| s != run.status) {
            return false;
        }
        if let Some(search_id) = &self.search_id {
            if run.search_id.as_ref() != Some(search_id) {
                return false;
            }
        }
        if let Some((metric, min)) = &self.min_metric {
            if !run.metric(metric).is_some_and(|v| v >= *min) {
                return false;
            }
        }
        true
    }
}
