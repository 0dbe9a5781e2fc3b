//! Indexing progress events and the workspace progress log.
//!
//! Every run appends one JSON object per line to a per-workspace file in
//! the system temp directory, so the console (and anything else watching
//! the file) can follow a run without holding a connection to the engine.
//! The log is truncated when the reporter is created; appends never fail
//! the run — a broken log produces a single warning and is then ignored.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

/// Minimum spacing between `progress` lines in the log. Terminal events
/// are never throttled.
const MIN_LOG_INTERVAL: Duration = Duration::from_millis(500);

/// Counters carried by a `progress` event.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProgressUpdate {
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub total_files: usize,
    pub completed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_for_rate_limit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
}

impl ProgressUpdate {
    /// Fill in `percentage` from the chunk counters: `floor(100·done/total)`,
    /// zero when nothing is planned.
    pub fn with_percentage(mut self) -> Self {
        self.percentage = Some(if self.total_chunks == 0 {
            0
        } else {
            ((self.completed_chunks * 100) / self.total_chunks) as u8
        });
        self
    }
}

/// One event in the lifecycle of an index run. Consumers dispatch
/// exhaustively; unknown fields in the serialized form must be tolerated
/// by readers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Start {
        total_files: usize,
        total_chunks: usize,
    },
    Progress(ProgressUpdate),
    Complete {
        completed_chunks: usize,
        total_chunks: usize,
        completed_files: usize,
    },
    Cancelled {
        completed_chunks: usize,
        total_chunks: usize,
        is_cancelled: bool,
    },
    Error {
        message: String,
    },
    Warning {
        message: String,
    },
}

impl ProgressEvent {
    /// Terminal and warning events always reach the log; only the chatty
    /// `progress` stream is throttled.
    fn is_throttleable(&self) -> bool {
        matches!(self, ProgressEvent::Progress(_))
    }
}

/// Callback handed to the index engine; invoked alongside the log append.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a ProgressEvent,
}

struct ReporterInner {
    file: Option<std::fs::File>,
    last_progress_write: Option<Instant>,
}

/// Append-only JSON-lines progress log, scoped to one workspace.
pub struct ProgressReporter {
    path: PathBuf,
    inner: Mutex<ReporterInner>,
    warned: AtomicBool,
}

/// Well-known per-workspace log location in the system temp directory.
pub fn log_path(workspace_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("semdex-{workspace_id}.progress.jsonl"))
}

impl ProgressReporter {
    /// Create the reporter, truncating any previous run's log so each run
    /// has a clean record.
    pub fn new(workspace_id: &str) -> Self {
        let path = log_path(workspace_id);
        let file = std::fs::File::create(&path)
            .map_err(|e| warn!(path = %path.display(), "cannot open progress log: {e}"))
            .ok();
        ProgressReporter {
            path,
            inner: Mutex::new(ReporterInner {
                file,
                last_progress_write: None,
            }),
            warned: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append an event. Throttles `progress` lines to one per 500 ms and
    /// swallows write failures after warning once.
    pub fn append(&self, event: &ProgressEvent) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        if event.is_throttleable() {
            if let Some(last) = inner.last_progress_write {
                if last.elapsed() < MIN_LOG_INTERVAL {
                    return;
                }
            }
            inner.last_progress_write = Some(Instant::now());
        }

        let line = LogLine {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        };
        let serialized = match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(_) => return,
        };

        if let Some(file) = inner.file.as_mut() {
            if writeln!(file, "{serialized}").is_err() && !self.warned.swap(true, Ordering::Relaxed)
            {
                warn!(path = %self.path.display(), "progress log append failed; suppressing further warnings");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_floored() {
        let update = ProgressUpdate {
            completed_chunks: 1,
            total_chunks: 3,
            ..Default::default()
        }
        .with_percentage();
        assert_eq!(update.percentage, Some(33));
    }

    #[test]
    fn percentage_zero_when_no_chunks() {
        let update = ProgressUpdate::default().with_percentage();
        assert_eq!(update.percentage, Some(0));
    }

    #[test]
    fn events_serialize_as_type_plus_data() {
        let event = ProgressEvent::Complete {
            completed_chunks: 5,
            total_chunks: 5,
            completed_files: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["data"]["completed_chunks"], 5);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = ProgressEvent::Progress(ProgressUpdate {
            completed_chunks: 1,
            total_chunks: 2,
            ..Default::default()
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("waiting_for_rate_limit"));
        assert!(!json.contains("current_file"));
    }

    #[test]
    fn log_lines_carry_timestamps_and_throttle_progress() {
        let reporter = ProgressReporter::new("test-throttle-ws");
        reporter.append(&ProgressEvent::Start {
            total_files: 1,
            total_chunks: 4,
        });
        for i in 0..10 {
            reporter.append(&ProgressEvent::Progress(ProgressUpdate {
                completed_chunks: i,
                total_chunks: 4,
                ..Default::default()
            }));
        }
        reporter.append(&ProgressEvent::Complete {
            completed_chunks: 4,
            total_chunks: 4,
            completed_files: 1,
        });

        let content = std::fs::read_to_string(reporter.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        // start + first progress + complete; the rapid-fire progress events
        // inside the 500 ms window are dropped.
        assert_eq!(lines.len(), 3);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v["timestamp"].is_string());
            assert!(v["type"].is_string());
        }
        let _ = std::fs::remove_file(reporter.path());
    }
}
