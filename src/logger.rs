use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::protocol::ResponseOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLogMode {
    /// Parameters plus the raw response body.
    Full,
    /// Parameters plus the classified outcome.
    Summary,
}

pub(crate) struct CallLogger {
    mode: CallLogMode,
    file: File,
}

impl CallLogger {
    pub fn new(mode: CallLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { mode, file })
    }

    pub fn log_init(&mut self, url: &str, http_session_id: Option<&str>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "init",
            "url": url,
            "httpSessionId": http_session_id,
        });
        self.write_line(&entry);
    }

    pub fn log_call(
        &mut self,
        batch_id: u64,
        method: &str,
        params: &[(String, String)],
        body: &str,
        outcome: &ResponseOutcome,
    ) {
        let params: Map<String, Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "call",
            "batchId": batch_id,
            "method": method,
            "params": params,
            "outcome": outcome_label(outcome),
        });
        if self.mode == CallLogMode::Full {
            entry["body"] = Value::String(body.to_string());
        }
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write call log entry: {e}");
        }
    }
}

fn outcome_label(outcome: &ResponseOutcome) -> &'static str {
    match outcome {
        ResponseOutcome::Success => "success",
        ResponseOutcome::AuthenticationExpired => "authentication_expired",
        ResponseOutcome::CommandFailed(_) => "command_failed",
        ResponseOutcome::ProtocolMismatch => "protocol_mismatch",
    }
}
