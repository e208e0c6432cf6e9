//! Audit recorder: durable trail of every execution.
//!
//! For each (code, session, result) triple the recorder writes two files
//! into the configured directory:
//!
//! - `<utc-timestamp>_<sequence>_<session-id>.code` -- the submitted code
//! - `<utc-timestamp>_<sequence>_<session-id>.result` -- a small JSON
//!   record of status, output, and optional error
//!
//! The sequence is a per-process atomic counter whose only job is to
//! disambiguate timestamp collisions. Writes happen on a detached thread;
//! a failed write is logged and never disturbs the execution path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::interpreter::ExecutionResult;

#[derive(Debug, Serialize)]
struct ResultRecord<'a> {
    success: bool,
    output: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Process-wide audit recorder. Exists iff a record directory is
/// configured; owned by the broker for its lifetime.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    dir: Arc<PathBuf>,
    sequence: Arc<AtomicU64>,
}

impl AuditRecorder {
    /// Creates the recorder, making sure the directory exists.
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Arc::new(dir),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Offers one execution to the trail. Returns immediately; the files
    /// are written on a detached thread in offer order.
    pub fn record(&self, code: &str, session_id: &str, result: &ExecutionResult) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let stem = format!("{timestamp}_{sequence:06}_{session_id}");

        let record = ResultRecord {
            success: result.success,
            output: &result.output,
            error: result.error.as_deref(),
        };
        let rendered = match serde_json::to_string_pretty(&record) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("audit record serialization failed: {e}");
                return;
            }
        };

        let dir = self.dir.clone();
        let code = code.to_string();
        std::thread::spawn(move || {
            let code_path = dir.join(format!("{stem}.code"));
            if let Err(e) = std::fs::write(&code_path, code) {
                tracing::warn!("audit write failed for {}: {e}", code_path.display());
            }
            let result_path = dir.join(format!("{stem}.result"));
            if let Err(e) = std::fs::write(&result_path, rendered) {
                tracing::warn!("audit write failed for {}: {e}", result_path.display());
            }
        });
    }
}
