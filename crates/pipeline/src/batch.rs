//! One full run: parse, compile, expand frames, route, build, dispatch,
//! annotate.
//!
//! Each run builds its own [`HostRouter`], so the rotation restarts with
//! every batch and concurrent runs never share queues.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use shotq_core::config_parser::{ConfigModel, ParseOptions};
use shotq_core::frames::expand_frame_jobs;
use shotq_core::host_router::{normalize_host, HostRouter};
use shotq_core::job_compiler::{compile_jobs, CompileFilter, JobDescriptor};
use shotq_core::job_family::HostGroup;

use crate::dispatcher::{DispatchResult, Dispatcher};
use crate::error::PipelineError;
use crate::gateway::WorkerGateway;
use crate::store::ConfigStore;
use crate::template::{build_payload, TemplateSet};

/// Knobs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub filter: CompileFilter,
    /// Root holding `{project}/{sequence}/{shot}` output directories.
    pub output_root: PathBuf,
    /// Resubmit frames whose outputs already exist.
    pub regenerate: bool,
    /// Abort on any parse warning.
    pub strict: bool,
    /// Pools that replace the configured ones for this run only.
    pub host_overrides: BTreeMap<HostGroup, Vec<String>>,
    /// Write `STATUS_*=run` for successful results.
    pub annotate: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub results: Vec<DispatchResult>,
    pub annotated: usize,
}

impl RunSummary {
    pub fn executions(&self) -> usize {
        self.results.len()
    }

    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchResult> {
        self.results.iter().filter(|r| !r.success())
    }
}

/// Router for one run: configured pools, then command-line overrides.
pub fn build_router(model: &ConfigModel, overrides: &BTreeMap<HostGroup, Vec<String>>) -> HostRouter {
    let mut router = HostRouter::from_model(model);
    for (group, hosts) in overrides {
        let hosts: Vec<String> = hosts
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(normalize_host)
            .collect();
        tracing::info!(group = ?group, hosts = ?hosts, "Overriding host pool");
        router.set_pool(*group, hosts);
    }
    router
}

/// Compile and frame-expand without dispatching.
pub fn plan_jobs(model: &ConfigModel, request: &RunRequest) -> Result<Vec<JobDescriptor>, PipelineError> {
    let jobs = compile_jobs(model, &request.filter)?;
    let jobs = expand_frame_jobs(jobs, &request.output_root, request.regenerate)?;
    Ok(jobs)
}

/// Route, build and dispatch `jobs` in order.
///
/// Every template the batch needs is read up front; an unreadable one
/// aborts before anything is submitted. Per-job template contract errors
/// are recorded as rejected results and the batch continues.
pub async fn run_batch<G: WorkerGateway>(
    jobs: &[JobDescriptor],
    router: &mut HostRouter,
    templates: &mut TemplateSet,
    dispatcher: &Dispatcher<G>,
) -> Result<Vec<DispatchResult>, PipelineError> {
    templates.preload(jobs.iter().map(|j| j.family))?;

    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        let host = router.next_host(job.family);
        let built = templates.get(job.family).and_then(|t| build_payload(t, job));
        let result = match built {
            Ok(payload) => dispatcher.dispatch(job, &host, &payload).await,
            Err(e) => {
                tracing::error!(job = %job.key(), host = %host, error = %e, "Job rejected");
                DispatchResult::rejected(job, &host, e)
            }
        };
        results.push(result);
    }
    Ok(results)
}

/// Full run against the config held by `store`.
pub async fn run<G: WorkerGateway>(
    store: &ConfigStore,
    request: &RunRequest,
    templates: &mut TemplateSet,
    dispatcher: &Dispatcher<G>,
) -> Result<RunSummary, PipelineError> {
    let outcome = store
        .load(ParseOptions {
            strict: request.strict,
        })
        .await?;
    for warning in &outcome.warnings {
        tracing::warn!(%warning, "Config warning");
    }
    let model = if request.strict {
        outcome.into_clean()?
    } else {
        outcome.model
    };

    let jobs = plan_jobs(&model, request)?;
    if jobs.is_empty() {
        tracing::info!("No jobs to queue");
        return Ok(RunSummary::default());
    }

    let mut router = build_router(&model, &request.host_overrides);
    let results = run_batch(&jobs, &mut router, templates, dispatcher).await?;

    let annotated = if request.annotate {
        store.annotate_results(&results).await?
    } else {
        0
    };
    let summary = RunSummary { results, annotated };
    tracing::info!(
        executions = summary.executions(),
        successes = summary.successes(),
        annotated = summary.annotated,
        "Run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use shotq_core::config_parser::parse;
    use shotq_core::job_family::JobFamily;

    use super::*;

    #[test]
    fn overrides_replace_configured_pools() {
        let model = parse("FLUX_HOST=f1,f2\nWAN_HOST=w1\n");
        let overrides = BTreeMap::from([(HostGroup::Flux, vec!["gpu-9:8188".to_string(), " ".to_string()])]);
        let mut router = build_router(&model, &overrides);
        assert_eq!(router.next_host(JobFamily::FluxT2i), "http://gpu-9:8188");
        assert_eq!(router.next_host(JobFamily::FluxT2i), "http://gpu-9:8188");
        assert_eq!(router.next_host(JobFamily::Wan25s), "http://w1");
    }

    #[test]
    fn plan_jobs_expands_frames() {
        let root = tempfile::tempdir().unwrap();
        let shot_dir = root.path().join("Demo/s1/0001");
        std::fs::create_dir_all(&shot_dir).unwrap();
        std::fs::write(shot_dir.join("heroA__00001_.png"), b"").unwrap();
        std::fs::write(shot_dir.join("heroA__00002_.png"), b"").unwrap();

        let model = parse("PROJECT=Demo\n!---------\nSEQUENCE=s1\nSHOT=0001\nNAME=heroA\nJOBTYPE=ct_wan2_5s\n");
        let request = RunRequest {
            output_root: root.path().to_path_buf(),
            ..RunRequest::default()
        };
        let jobs = plan_jobs(&model, &request).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.input_frame.is_some()));
    }

    #[test]
    fn summary_counts() {
        let summary = RunSummary::default();
        assert_eq!((summary.executions(), summary.successes()), (0, 0));
        assert_eq!(summary.failures().count(), 0);
    }
}
