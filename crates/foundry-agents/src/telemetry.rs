//! Run telemetry.
//!
//! One JSON line per `run`/`resolve` call, appended to the configured
//! `.jsonl` file. Failures to write are logged and never fail the run.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use coordination::workflow::{RunReport, Status, WorkflowError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Metrics for a single engine call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub thread_id: String,
    /// `run`, `resolve:approve` or `resolve:edit`.
    pub trigger: String,
    /// Status after the call. `None` when the call failed before loading state.
    pub status: Option<Status>,
    pub revisions: u32,
    pub steps: u32,
    pub oracle_calls: u32,
    pub budget_exhausted: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empathy_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_category: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl RunMetrics {
    pub fn from_report(trigger: &str, report: &RunReport) -> Self {
        let state = &report.state;
        Self {
            thread_id: state.thread_id.clone(),
            trigger: trigger.to_string(),
            status: Some(state.status),
            revisions: state.revision_count,
            steps: report.steps,
            oracle_calls: report.oracle_calls,
            budget_exhausted: report.budget_exhausted,
            duration_ms: report.duration_ms,
            safety_score: state.scores.safety,
            empathy_score: state.scores.empathy,
            clarity_score: state.scores.clarity,
            error: None,
            retry_category: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn from_error(thread_id: &str, trigger: &str, err: &WorkflowError, duration_ms: u64) -> Self {
        let snapshot = err.snapshot();
        Self {
            thread_id: thread_id.to_string(),
            trigger: trigger.to_string(),
            status: snapshot.map(|s| s.status),
            revisions: snapshot.map_or(0, |s| s.revision_count),
            steps: 0,
            oracle_calls: 0,
            budget_exhausted: false,
            duration_ms,
            safety_score: snapshot.and_then(|s| s.scores.safety),
            empathy_score: snapshot.and_then(|s| s.scores.empathy),
            clarity_score: snapshot.and_then(|s| s.scores.clarity),
            error: Some(err.to_string()),
            retry_category: Some(err.retry_category().to_string()),
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Append run metrics to a JSONL file.
pub fn append_telemetry(metrics: &RunMetrics, path: &Path) {
    match serde_json::to_string(metrics) {
        Ok(json) => {
            use std::io::Write;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("Failed to create telemetry directory: {e}");
                    return;
                }
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), thread_id = %metrics.thread_id, "Appended run telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}

/// Milliseconds since `started`, saturating at `u64::MAX`.
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Aggregate statistics across recorded runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub total_runs: usize,
    pub failures: usize,
    pub waiting_approval: usize,
    pub approved: usize,
    pub revision_limit: usize,
    pub average_revisions: f64,
    pub average_oracle_calls: f64,
    pub average_duration_ms: f64,
}

/// Reader for telemetry JSONL files.
pub struct TelemetryReader {
    runs: Vec<RunMetrics>,
}

impl TelemetryReader {
    /// Read runs from a JSONL file. Blank lines are skipped.
    pub fn read_from_file(path: &Path) -> std::io::Result<Self> {
        use std::fs::File;
        use std::io::{BufRead, BufReader};

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut runs = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let run: RunMetrics = serde_json::from_str(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            runs.push(run);
        }

        Ok(Self { runs })
    }

    pub fn runs(&self) -> &[RunMetrics] {
        &self.runs
    }

    /// Runs recorded for one thread, oldest first.
    pub fn for_thread<'a>(&'a self, thread_id: &'a str) -> impl Iterator<Item = &'a RunMetrics> {
        self.runs.iter().filter(move |r| r.thread_id == thread_id)
    }

    pub fn summary(&self) -> TelemetrySummary {
        summarize(self.runs.iter())
    }

    /// Summary restricted to one thread's runs.
    pub fn thread_summary(&self, thread_id: &str) -> TelemetrySummary {
        summarize(self.for_thread(thread_id))
    }
}

fn summarize<'a>(runs: impl Iterator<Item = &'a RunMetrics>) -> TelemetrySummary {
    let runs: Vec<&RunMetrics> = runs.collect();
    let total_runs = runs.len();
    let count = |status: Status| {
        runs.iter()
            .filter(|r| r.succeeded() && r.status == Some(status))
            .count()
    };
    let average = |f: &dyn Fn(&RunMetrics) -> f64| {
        if total_runs == 0 {
            0.0
        } else {
            runs.iter().map(|r| f(r)).sum::<f64>() / total_runs as f64
        }
    };

    TelemetrySummary {
        total_runs,
        failures: runs.iter().filter(|r| !r.succeeded()).count(),
        waiting_approval: count(Status::WaitingApproval),
        approved: count(Status::Approved),
        revision_limit: count(Status::MaxRevisionsExceeded),
        average_revisions: average(&|r| r.revisions as f64),
        average_oracle_calls: average(&|r| r.oracle_calls as f64),
        average_duration_ms: average(&|r| r.duration_ms as f64),
    }
}

impl std::fmt::Display for TelemetrySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "runs:              {}", self.total_runs)?;
        writeln!(f, "failures:          {}", self.failures)?;
        writeln!(f, "waiting approval:  {}", self.waiting_approval)?;
        writeln!(f, "approved:          {}", self.approved)?;
        writeln!(f, "revision limit:    {}", self.revision_limit)?;
        writeln!(f, "avg revisions:     {:.1}", self.average_revisions)?;
        writeln!(f, "avg oracle calls:  {:.1}", self.average_oracle_calls)?;
        write!(f, "avg duration:      {:.0} ms", self.average_duration_ms)
    }
}
