//! Append-only progress and result sinks.
//!
//! The driver reports one block per epoch (training) and one block per test
//! run through an injected [`ProgressSink`] rather than writing files
//! directly. The default file sink opens, appends, and closes on every call
//! so a crash mid-run loses at most the current block. Two runs sharing one
//! file can interleave blocks; deployments that care should hand each run
//! its own sink.

use crate::error::HorizonError;
use crate::metrics::MetricReport;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Destination for human-readable progress blocks.
pub trait ProgressSink: Send + Sync {
    /// Append one block. A trailing blank line separates blocks.
    fn append(&self, block: &str) -> Result<(), HorizonError>;
}

/// Append-only file sink. The file handle is not held between calls.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProgressSink for FileSink {
    fn append(&self, block: &str) -> Result<(), HorizonError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{block}")?;
        writeln!(file)?;
        Ok(())
    }
}

/// In-memory sink that records blocks for inspection. Test seam.
#[derive(Default)]
pub struct MemorySink {
    blocks: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks appended so far, in order.
    pub fn blocks(&self) -> Vec<String> {
        self.blocks.lock().expect("sink lock poisoned").clone()
    }
}

impl ProgressSink for MemorySink {
    fn append(&self, block: &str) -> Result<(), HorizonError> {
        self.blocks
            .lock()
            .expect("sink lock poisoned")
            .push(block.to_string());
        Ok(())
    }
}

/// One training-progress block: run id, epoch index, wall time, and the
/// three per-epoch MSE values.
#[derive(Debug, Clone)]
pub struct EpochRecord {
    pub run_id: String,
    pub epoch: usize,
    pub steps: usize,
    pub cost_secs: f64,
    pub train_mse: f64,
    pub vali_mse: f64,
    pub test_mse: f64,
}

impl std::fmt::Display for EpochRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.run_id)?;
        writeln!(f, "Epoch: {} cost time: {:.3}s", self.epoch, self.cost_secs)?;
        write!(
            f,
            "Epoch: {}, Steps: {} | Train MSE: {:.4} Vali MSE: {:.4} Test MSE: {:.4}",
            self.epoch, self.steps, self.train_mse, self.vali_mse, self.test_mse
        )
    }
}

/// One test-result block: run id plus the four aggregate error metrics.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub run_id: String,
    pub report: MetricReport,
}

impl std::fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.run_id)?;
        write!(f, "{}", self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_sink_appends_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.txt");
        let sink = FileSink::new(&path);
        sink.append("block one").unwrap();
        sink.append("block two").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "block one\n\nblock two\n\n");
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.append("a").unwrap();
        sink.append("b").unwrap();
        assert_eq!(sink.blocks(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_epoch_record_format() {
        let record = EpochRecord {
            run_id: "dlinear_s96_p24".into(),
            epoch: 3,
            steps: 17,
            cost_secs: 1.25,
            train_mse: 0.1234,
            vali_mse: 0.2345,
            test_mse: 0.3456,
        };
        let text = record.to_string();
        assert!(text.starts_with("dlinear_s96_p24\n"));
        assert!(text.contains("Train MSE: 0.1234"));
        assert!(text.contains("Steps: 17"));
    }
}
