//! Append-only learning store.
//!
//! Confidence outcomes and operator feedback are line-delimited JSON files —
//! one record per line, never rewritten, rotated by size or date. Outcomes
//! buffer in memory and a 5-second flusher drains them; feedback writes
//! through immediately. Aggregation (calibration, learned priors) is the
//! read path and is recomputed from the files, cached per N new records.

mod calibration;

pub use calibration::{summarize, CalibrationBin, CalibrationSummary};

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::{
    CALIBRATION_CACHE_RECORDS, LEARNING_ROTATE_BYTES, OUTCOME_FLUSH_INTERVAL_SECONDS,
};
use crate::error::PipelineError;
use crate::scoring::CategoryPriors;
use crate::types::{ConfidenceOutcomeRecord, OperatorFeedback};

const OUTCOMES_FILE: &str = "confidence_outcomes.jsonl";
const FEEDBACK_FILE: &str = "operator_feedback.jsonl";

/// Append-only store for outcomes and feedback, plus cached aggregates.
pub struct LearningStore {
    dir: PathBuf,
    pending: Mutex<Vec<ConfidenceOutcomeRecord>>,
    cache: Mutex<Option<(usize, CalibrationSummary)>>,
}

impl LearningStore {
    pub fn open(dir: &Path) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            PipelineError::Configuration(format!("learning dir {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            pending: Mutex::new(Vec::new()),
            cache: Mutex::new(None),
        })
    }

    /// Queue one outcome record; the flusher writes it out.
    pub fn append_outcome(&self, record: ConfidenceOutcomeRecord) {
        #[allow(clippy::unwrap_used)] // poisoned learning lock is unrecoverable
        self.pending.lock().unwrap().push(record);
    }

    /// Drain the pending queue to disk. Returns how many records were
    /// written.
    pub fn flush(&self) -> usize {
        let drained: Vec<ConfidenceOutcomeRecord> = {
            #[allow(clippy::unwrap_used)]
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return 0;
        }

        let path = self.dir.join(OUTCOMES_FILE);
        rotate_if_needed(&path);

        match append_lines(&path, &drained) {
            Ok(()) => drained.len(),
            Err(e) => {
                // Put the records back; losing calibration data is worse than
                // a duplicate flush attempt.
                warn!(error = %e, "outcome flush failed — requeueing");
                #[allow(clippy::unwrap_used)]
                let mut pending = self.pending.lock().unwrap();
                let mut restored = drained;
                restored.extend(pending.drain(..));
                *pending = restored;
                0
            }
        }
    }

    /// Write one feedback record through immediately.
    pub fn append_feedback(&self, feedback: &OperatorFeedback) -> Result<(), PipelineError> {
        let path = self.dir.join(FEEDBACK_FILE);
        rotate_if_needed(&path);
        append_lines(&path, std::slice::from_ref(feedback))
    }

    /// All outcome records on disk plus any still pending, oldest first.
    /// Tolerates torn or foreign lines (skipped).
    pub fn read_outcomes(&self) -> Vec<ConfidenceOutcomeRecord> {
        let mut records = Vec::new();
        for path in self.outcome_files() {
            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                match serde_json::from_str::<ConfidenceOutcomeRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => debug!(error = %e, "skipping unreadable outcome line"),
                }
            }
        }
        {
            #[allow(clippy::unwrap_used)]
            let pending = self.pending.lock().unwrap();
            records.extend(pending.iter().cloned());
        }
        records.sort_by_key(|r| r.recorded_at);
        records
    }

    /// All feedback records on disk.
    pub fn read_feedback(&self) -> Vec<OperatorFeedback> {
        let Ok(file) = std::fs::File::open(self.dir.join(FEEDBACK_FILE)) else {
            return Vec::new();
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }

    /// Calibration aggregates, recomputed when enough new records arrived.
    pub fn calibration(&self) -> CalibrationSummary {
        let records = self.read_outcomes();
        {
            #[allow(clippy::unwrap_used)]
            let cache = self.cache.lock().unwrap();
            if let Some((cached_at, ref summary)) = *cache {
                if records.len() < cached_at + CALIBRATION_CACHE_RECORDS {
                    return summary.clone();
                }
            }
        }
        let summary = summarize(&records);
        #[allow(clippy::unwrap_used)]
        let mut cache = self.cache.lock().unwrap();
        *cache = Some((records.len(), summary.clone()));
        summary
    }

    /// Priors for confidence scoring, with learned overrides applied.
    pub fn priors(&self) -> CategoryPriors {
        CategoryPriors::with_learned(&self.calibration().per_category)
    }

    /// Current and rotated outcome files, oldest first.
    fn outcome_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("confidence_outcomes") && n.ends_with(".jsonl"))
            })
            .collect();
        files.sort();
        files
    }
}

/// Rotate a JSONL file once it crosses the size threshold. The rotated name
/// carries the date and a timestamp so rotated files sort after each other
/// and are never rewritten.
fn rotate_if_needed(path: &Path) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.len() < LEARNING_ROTATE_BYTES {
        return;
    }
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return;
    };
    let rotated = path.with_file_name(format!(
        "{stem}-{}.jsonl",
        Utc::now().format("%Y%m%dT%H%M%S")
    ));
    if let Err(e) = std::fs::rename(path, &rotated) {
        warn!(error = %e, "learning file rotation failed — continuing on current file");
    } else {
        info!(rotated = %rotated.display(), "learning file rotated");
    }
}

/// Append serialized records, one per line.
fn append_lines<T: serde::Serialize>(path: &Path, records: &[T]) -> Result<(), PipelineError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PipelineError::Configuration(format!("open {}: {e}", path.display())))?;
    let mut buf = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| PipelineError::DataIntegrity(format!("serialize record: {e}")))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())
        .map_err(|e| PipelineError::Configuration(format!("append {}: {e}", path.display())))?;
    Ok(())
}

/// Flusher loop: drain pending outcomes every few seconds until cancelled,
/// with a final flush on shutdown.
pub async fn run_outcome_flusher(store: std::sync::Arc<LearningStore>, cancel: CancellationToken) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(OUTCOME_FLUSH_INTERVAL_SECONDS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let written = store.flush();
                if written > 0 {
                    info!(written, "final outcome flush on shutdown");
                }
                return;
            }
            _ = ticker.tick() => {
                let written = store.flush();
                if written > 0 {
                    debug!(written, "outcome records flushed");
                }
            }
        }
    }
}
