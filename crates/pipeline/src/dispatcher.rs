//! Submission and optional polling of one job's payload.
//!
//! Every iteration is submitted independently with a fresh client ID.
//! A failed iteration is recorded and the remaining iterations still go
//! out. Polling, when enabled, watches only the first accepted prompt and
//! ends at a deadline without touching the recorded submissions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shotq_comfyui::history::{history_state, HistoryState};
use shotq_core::job_compiler::JobDescriptor;
use shotq_core::job_family::JobFamily;
use tokio::time::Instant;

use crate::gateway::WorkerGateway;
use crate::template::Payload;

/// History polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

/// What polling learned about the first accepted prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Completed { prompt_id: String, outputs: usize },
    Failed { prompt_id: String, errors: Vec<String> },
    /// Deadline passed with no verdict; the outcome is unknown.
    TimedOut { prompt_id: String, waited_ms: u64 },
}

/// Per-descriptor record used for the run summary and status annotation.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub job: String,
    pub family: JobFamily,
    pub sequence: String,
    pub shot: String,
    pub subshot: String,
    pub host: String,
    pub prompt_ids: Vec<String>,
    pub errors: Vec<String>,
    pub poll: Option<PollOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DispatchResult {
    fn start(job: &JobDescriptor, host: &str) -> Self {
        let now = Utc::now();
        Self {
            job: job.key(),
            family: job.family,
            sequence: job.sequence.clone(),
            shot: job.shot.clone(),
            subshot: job.subshot.clone(),
            host: host.to_string(),
            prompt_ids: Vec::new(),
            errors: Vec::new(),
            poll: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Result for a job that never reached submission.
    pub fn rejected(job: &JobDescriptor, host: &str, error: impl ToString) -> Self {
        let mut result = Self::start(job, host);
        result.errors.push(error.to_string());
        result
    }

    /// Every iteration was accepted and polling, if any, saw no failure.
    pub fn success(&self) -> bool {
        !self.prompt_ids.is_empty()
            && self.errors.is_empty()
            && !matches!(self.poll, Some(PollOutcome::Failed { .. }))
    }

    /// All recorded errors joined into one message.
    pub fn error(&self) -> Option<String> {
        let mut messages = self.errors.clone();
        if let Some(PollOutcome::Failed { errors, .. }) = &self.poll {
            messages.extend(errors.iter().cloned());
        }
        (!messages.is_empty()).then(|| messages.join("; "))
    }
}

pub struct Dispatcher<G> {
    gateway: G,
    poll: Option<PollConfig>,
}

impl<G: WorkerGateway> Dispatcher<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway, poll: None }
    }

    pub fn with_polling(mut self, config: PollConfig) -> Self {
        self.poll = Some(config);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Submit every iteration of `payload` to `host`.
    pub async fn dispatch(&self, job: &JobDescriptor, host: &str, payload: &Payload) -> DispatchResult {
        let mut result = DispatchResult::start(job, host);
        let total = payload.iterations;

        for i in 0..total {
            let workflow = payload.iteration(i);
            let client_id = uuid::Uuid::new_v4().to_string();
            match self.gateway.submit(host, &workflow, &client_id).await {
                Ok(prompt_id) => {
                    tracing::info!(
                        job = %result.job,
                        host,
                        iteration = i + 1,
                        total,
                        prompt_id = %prompt_id,
                        "Queued prompt"
                    );
                    result.prompt_ids.push(prompt_id);
                }
                Err(e) => {
                    tracing::warn!(
                        job = %result.job,
                        host,
                        iteration = i + 1,
                        total,
                        error = %e,
                        "Submission failed"
                    );
                    result.errors.push(format!("iteration {}: {e}", i + 1));
                }
            }
        }

        if let (Some(config), Some(first)) = (self.poll, result.prompt_ids.first().cloned()) {
            result.poll = Some(self.poll_history(host, &first, config).await);
        }
        result.finished_at = Utc::now();
        result
    }

    async fn poll_history(&self, host: &str, prompt_id: &str, config: PollConfig) -> PollOutcome {
        let started = Instant::now();
        let deadline = started + config.timeout;
        loop {
            tokio::time::sleep(config.interval).await;
            match self.gateway.history(host, prompt_id).await {
                Ok(history) => match history_state(&history, prompt_id) {
                    Ok(HistoryState::Completed { outputs }) => {
                        tracing::info!(host, prompt_id, outputs, "Prompt completed");
                        return PollOutcome::Completed {
                            prompt_id: prompt_id.to_string(),
                            outputs,
                        };
                    }
                    Ok(HistoryState::Failed { errors }) => {
                        tracing::warn!(host, prompt_id, ?errors, "Prompt failed on worker");
                        return PollOutcome::Failed {
                            prompt_id: prompt_id.to_string(),
                            errors,
                        };
                    }
                    Ok(HistoryState::Pending) => {
                        tracing::debug!(
                            host,
                            prompt_id,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Prompt still running"
                        );
                    }
                    Err(e) => tracing::warn!(host, prompt_id, error = %e, "Unreadable history response"),
                },
                Err(e) => tracing::warn!(host, prompt_id, error = %e, "History request failed"),
            }

            if Instant::now() >= deadline {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(host, prompt_id, waited_ms, "Polling timed out");
                return PollOutcome::TimedOut {
                    prompt_id: prompt_id.to_string(),
                    waited_ms,
                };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
