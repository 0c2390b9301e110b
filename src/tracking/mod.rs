//! Experiment tracking
//!
//! Runs, the append-only ledger that records them, the ranking used to
//! pick the best one, and the write-once store holding their artifacts.

mod artifacts;
mod ledger;
mod ranking;
mod run;
mod storage;

pub use artifacts::{compute_sha256, ArtifactRef, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use ledger::ExperimentLedger;
pub use ranking::{RankingKey, DEFAULT_TIE_EPSILON};
pub use run::{RunFilter, RunId, RunIdGenerator, RunStatus, TrainingRun};
pub use storage::{JsonlStorage, LedgerStorage};
