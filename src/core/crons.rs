#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::classify::schedule_label;
use crate::core::fsio;
use crate::core::source::Source;
use crate::error::McError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CronState {
    pub next_run_at_ms: Option<i64>,
    pub last_run_at_ms: Option<i64>,
    pub last_status: Option<String>,
    pub consecutive_errors: Option<u32>,
}

/// A job as written by the external scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: CronSchedule,
    #[serde(default)]
    pub session_target: Option<String>,
    #[serde(default)]
    pub state: Option<CronState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CronView {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule_label: String,
    pub last_run_ms: Option<i64>,
    pub next_run_ms: Option<i64>,
    pub status: String,
    pub consecutive_errors: u32,
}

impl From<&CronJob> for CronView {
    fn from(job: &CronJob) -> Self {
        let state = job.state.clone().unwrap_or_default();
        let fallback = if job.enabled { "pending" } else { "disabled" };
        let status = state.last_status.unwrap_or_else(|| fallback.to_owned());
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            enabled: job.enabled,
            schedule_label: schedule_label(&job.schedule),
            last_run_ms: state.last_run_at_ms,
            next_run_ms: state.next_run_at_ms,
            status,
            consecutive_errors: state.consecutive_errors.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CronStore {
    path: PathBuf,
}

impl CronStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_jobs(&self) -> Source<Vec<CronJob>> {
        Source::read_with(&self.path, |raw| parse_jobs(&self.path, raw))
    }

    /// Jobs ordered by last run, oldest first. A missing jobs file is an empty
    /// list; an unreadable one is an error.
    pub fn list(&self) -> Result<Vec<CronView>, McError> {
        let jobs = self.read_jobs().into_result()?.unwrap_or_default();
        Ok(project(&jobs))
    }

    /// Flips `enabled` on one job, leaving every other field of the document
    /// as the scheduler wrote it.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<CronView, McError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(McError::NotFound("Cron not found".to_owned()));
            }
            Err(e) => return Err(McError::io(&self.path, e)),
        };
        let mut doc: Value =
            serde_json::from_str(&raw).map_err(|e| McError::parse(&self.path, e))?;

        let entries = match &mut doc {
            Value::Array(items) => items,
            Value::Object(map) => match map.get_mut("jobs") {
                Some(Value::Array(items)) => items,
                _ => return Err(McError::NotFound("Cron not found".to_owned())),
            },
            _ => return Err(McError::parse(&self.path, "expected an array or {jobs: [...]}")),
        };
        let entry = entries
            .iter_mut()
            .find(|e| e.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| McError::NotFound("Cron not found".to_owned()))?;
        let Value::Object(fields) = entry else {
            return Err(McError::parse(&self.path, format!("job '{id}' is not an object")));
        };
        fields.insert("enabled".to_owned(), Value::Bool(enabled));
        let job: CronJob =
            serde_json::from_value(entry.clone()).map_err(|e| McError::parse(&self.path, e))?;

        fsio::write_json_pretty(&self.path, &doc)?;
        tracing::info!(id, enabled, "cron job toggled");
        Ok(CronView::from(&job))
    }
}

fn parse_jobs(path: &Path, raw: &str) -> Result<Vec<CronJob>, McError> {
    let doc: Value = serde_json::from_str(raw).map_err(|e| McError::parse(path, e))?;
    let entries = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("jobs") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => return Err(McError::parse(path, "expected an array or {jobs: [...]}")),
    };

    let mut jobs = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<CronJob>(entry) {
            Ok(job) => jobs.push(job),
            Err(e) => tracing::debug!(error = %e, "skipping malformed cron entry"),
        }
    }
    Ok(jobs)
}

#[must_use]
pub fn project(jobs: &[CronJob]) -> Vec<CronView> {
    let mut sorted: Vec<&CronJob> = jobs.iter().collect();
    sorted.sort_by_key(|j| j.state.as_ref().and_then(|s| s.last_run_at_ms).unwrap_or(0));
    sorted.into_iter().map(CronView::from).collect()
}
