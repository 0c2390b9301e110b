//! Storage backend for the experiment ledger
//!
//! Runs are appended as JSON lines; replaying the file rebuilds the ledger.

use super::run::TrainingRun;
use crate::error::{ChurnError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Storage backend trait
pub trait LedgerStorage: Send + Sync {
    /// Durably record one terminal run
    fn append(&mut self, run: &TrainingRun) -> Result<()>;

    /// All previously recorded runs, in append order
    fn load(&self) -> Result<Vec<TrainingRun>>;

    fn location(&self) -> String;
}

/// Append-only JSON-lines file
#[derive(Debug)]
pub struct JsonlStorage {
    path: PathBuf,
    file: File,
}

impl JsonlStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        drop_partial_tail(&path, &file)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStorage for JsonlStorage {
    fn append(&mut self, run: &TrainingRun) -> Result<()> {
        let mut line = serde_json::to_vec(run)?;
        line.push(b'\n');
        append_whole(&mut self.file, &line)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<TrainingRun>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut runs = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let run = serde_json::from_str::<TrainingRun>(&line).map_err(|e| {
                ChurnError::SerializationError(format!("{} line {}: {}", self.path.display(), i + 1, e))
            })?;
            runs.push(run);
        }
        Ok(runs)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Append target that can be cut back to an earlier length
trait Truncate: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write one entry, or nothing: a failed write is rolled back to the
/// previous end so later appends start on a line boundary
fn append_whole<W: Truncate>(sink: &mut W, line: &[u8]) -> Result<()> {
    let offset = sink.size()?;
    if let Err(err) = sink.write_all(line) {
        if let Err(cut) = sink.truncate(offset) {
            warn!(error = %cut, offset, "Could not roll back partial ledger entry");
        }
        return Err(err.into());
    }
    Ok(())
}

/// Cut off an entry left incomplete by an interrupted write
fn drop_partial_tail(path: &Path, file: &File) -> Result<()> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "Dropping partially written ledger entry"
    );
    file.set_len(keep as u64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::TrialParams;
    use crate::tracking::RunId;

    #[test]
    fn test_append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        {
            let mut storage = JsonlStorage::open(&path).unwrap();
            for id in 1..=3 {
                let run = TrainingRun::started(RunId::new(id), TrialParams::new()).fail("boom");
                storage.append(&run).unwrap();
            }
        }
        let storage = JsonlStorage::open(&path).unwrap();
        let runs = storage.load().unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[2].run_id, RunId::new(3));
    }

    /// Accepts `budget` bytes, then fails mid-write
    struct FlakySink {
        data: std::cell::RefCell<Vec<u8>>,
        budget: usize,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let data = self.data.get_mut();
            if data.len() >= self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget - data.len());
            data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for FlakySink {
        fn size(&self) -> io::Result<u64> {
            Ok(self.data.borrow().len() as u64)
        }

        fn truncate(&self, len: u64) -> io::Result<()> {
            self.data.borrow_mut().truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_no_torn_line() {
        let mut sink = FlakySink {
            data: std::cell::RefCell::new(Vec::new()),
            budget: 16,
        };
        append_whole(&mut sink, b"{\"a\":1}\n").unwrap();

        let err = append_whole(&mut sink, b"{\"b\":\"a long entry\"}\n").unwrap_err();
        assert!(matches!(err, ChurnError::IoError(_)));
        assert_eq!(sink.data.borrow().as_slice(), b"{\"a\":1}\n");

        sink.budget = 1024;
        append_whole(&mut sink, b"{\"c\":3}\n").unwrap();
        assert_eq!(sink.data.borrow().as_slice(), b"{\"a\":1}\n{\"c\":3}\n");
    }

    #[test]
    fn test_partial_tail_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        {
            let mut storage = JsonlStorage::open(&path).unwrap();
            let run = TrainingRun::started(RunId::new(1), TrialParams::new()).fail("boom");
            storage.append(&run).unwrap();
        }
        let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(b"{\"run_id\":\"run-0000").unwrap();
        drop(raw);

        let mut storage = JsonlStorage::open(&path).unwrap();
        assert_eq!(storage.load().unwrap().len(), 1);
        let run = TrainingRun::started(RunId::new(2), TrialParams::new()).fail("boom");
        storage.append(&run).unwrap();
        assert_eq!(storage.load().unwrap().len(), 2);
    }
}
