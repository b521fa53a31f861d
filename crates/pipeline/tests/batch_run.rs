//! End-to-end run against an in-memory worker gateway.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use shotq_comfyui::api::ComfyUIApiError;
use shotq_core::job_compiler::CompileFilter;
use shotq_core::job_family::JobFamily;
use shotq_pipeline::batch::{run, RunRequest};
use shotq_pipeline::dispatcher::{Dispatcher, PollConfig, PollOutcome};
use shotq_pipeline::store::ConfigStore;
use shotq_pipeline::template::TemplateSet;

const CONFIG: &str = "\
PROJECT=Demo
SEED_START=10
GRAPHICAL_STYLE=ink
FLUX_HOST=gpu-a:8188,gpu-b:8188
!---------
SEQUENCE=s1
SHOT=0001
NAME=heroA
JOBTYPE=ct_flux_t2i,ct_qwen_i2i
POSITIVE_PROMPT=a castle
FLUX_ITERATIONS=2
!---------
SEQUENCE=s1
SHOT=0002
NAME=heroB
JOBTYPE=ct_flux_t2i
POSITIVE_PROMPT=a \"tower\"
!---------
SEQUENCE=s1
SHOT=0003
NAME=heroC
JOBTYPE=ct_flux_t2i
DISABLED=yes
";

const FLUX_TEMPLATE: &str = r#"{
    "1": {"class_type": "WorkflowTrigger", "inputs": {"workflow_json": "REPLACETEXT", "seed_start": 0}},
    "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "out"}}
}"#;

/// No sampler node, so every qwen i2i job is rejected before submission.
const BROKEN_QWEN_TEMPLATE: &str = r#"{"4": {"class_type": "LoadImage", "inputs": {"image": ""}}}"#;

#[derive(Default)]
struct MemoryGateway {
    submitted: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl shotq_pipeline::gateway::WorkerGateway for MemoryGateway {
    async fn submit(&self, host: &str, workflow: &Value, _client_id: &str) -> Result<String, ComfyUIApiError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push((host.to_string(), workflow.clone()));
        Ok(format!("prompt-{}", submitted.len()))
    }

    async fn history(&self, _host: &str, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let entry = serde_json::json!({
            "outputs": {"9": {"images": [{"filename": "out_00001_.png"}]}},
            "status": {"status_str": "success", "completed": true}
        });
        let mut history = serde_json::Map::new();
        history.insert(prompt_id.to_string(), entry);
        Ok(Value::Object(history))
    }
}

fn setup() -> (tempfile::TempDir, ConfigStore, TemplateSet) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.txt");
    std::fs::write(&path, CONFIG).unwrap();

    let mut templates = TemplateSet::new(dir.path().join("workflows"));
    templates.insert(JobFamily::FluxT2i, FLUX_TEMPLATE);
    templates.insert(JobFamily::QwenI2i, BROKEN_QWEN_TEMPLATE);
    (dir, ConfigStore::new(path), templates)
}

fn request(dir: &tempfile::TempDir) -> RunRequest {
    RunRequest {
        output_root: dir.path().join("output"),
        annotate: true,
        ..RunRequest::default()
    }
}

#[tokio::test]
async fn full_run_routes_submits_and_annotates() {
    let (dir, store, mut templates) = setup();
    let dispatcher = Dispatcher::new(MemoryGateway::default());

    let summary = run(&store, &request(&dir), &mut templates, &dispatcher)
        .await
        .unwrap();

    assert_eq!(summary.executions(), 3);
    assert_eq!(summary.successes(), 2);
    assert_eq!(summary.annotated, 2);

    let rejected: Vec<_> = summary.failures().collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].family, JobFamily::QwenI2i);
    assert_eq!(rejected[0].host, "http://127.0.0.1:8188");
    assert!(rejected[0].prompt_ids.is_empty());

    let submitted = dispatcher.gateway().submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 3);

    // heroA iterates twice on the first flux host, heroB takes the second.
    let hosts: Vec<&str> = submitted.iter().map(|(h, _)| h.as_str()).collect();
    assert_eq!(hosts, ["http://gpu-a:8188", "http://gpu-a:8188", "http://gpu-b:8188"]);

    let seeds: Vec<u64> = submitted
        .iter()
        .map(|(_, w)| w["1"]["inputs"]["seed_start"].as_u64().unwrap())
        .collect();
    assert_eq!(seeds, [10, 11, 11]);

    assert_eq!(submitted[0].1["1"]["inputs"]["workflow_json"], "a castle, ink");
    assert_eq!(submitted[2].1["1"]["inputs"]["workflow_json"], "a \"tower\", ink");
    assert_eq!(submitted[2].1["9"]["inputs"]["filename_prefix"], "Demo/s1/0002/heroB_");

    let model = store.load_model().await.unwrap();
    let hero_a = model.subshot("Demo", "s1", "0001", "heroA").unwrap();
    assert_eq!(hero_a["STATUS_CTFLUXT2I"], "run");
    assert!(hero_a.get("STATUS_CTQWENI2I").is_none());
    assert_eq!(
        model.subshot("Demo", "s1", "0002", "heroB").unwrap()["STATUS_CTFLUXT2I"],
        "run"
    );
    assert!(model
        .subshot("Demo", "s1", "0003", "heroC")
        .unwrap()
        .get("STATUS_CTFLUXT2I")
        .is_none());
}

#[tokio::test]
async fn filtered_run_without_annotation_leaves_config_alone() {
    let (dir, store, mut templates) = setup();
    let dispatcher = Dispatcher::new(MemoryGateway::default());
    let request = RunRequest {
        filter: CompileFilter {
            families: Some(vec![JobFamily::FluxT2i]),
            shot: Some("0002".into()),
            ..CompileFilter::default()
        },
        annotate: false,
        ..request(&dir)
    };

    let summary = run(&store, &request, &mut templates, &dispatcher).await.unwrap();

    assert_eq!(summary.executions(), 1);
    assert_eq!(summary.successes(), 1);
    assert_eq!(summary.results[0].subshot, "heroB");
    assert_eq!(store.read_text().await.unwrap(), CONFIG);
}

#[tokio::test]
async fn polling_records_completion() {
    let (dir, store, mut templates) = setup();
    let dispatcher = Dispatcher::new(MemoryGateway::default()).with_polling(PollConfig {
        interval: std::time::Duration::from_millis(1),
        timeout: std::time::Duration::from_millis(50),
    });
    let request = RunRequest {
        filter: CompileFilter {
            families: Some(vec![JobFamily::FluxT2i]),
            ..CompileFilter::default()
        },
        ..request(&dir)
    };

    let summary = run(&store, &request, &mut templates, &dispatcher).await.unwrap();

    assert_eq!(summary.successes(), 2);
    for result in &summary.results {
        assert!(matches!(
            result.poll,
            Some(PollOutcome::Completed { outputs: 1, .. })
        ));
    }
}

#[tokio::test]
async fn unreadable_template_aborts_before_submission() {
    let (dir, store, _) = setup();
    let mut templates = TemplateSet::new(dir.path().join("missing"));
    let dispatcher = Dispatcher::new(MemoryGateway::default());

    let outcome = run(&store, &request(&dir), &mut templates, &dispatcher).await;

    assert!(matches!(
        outcome,
        Err(shotq_pipeline::error::PipelineError::TemplateRead { .. })
    ));
    assert!(dispatcher.gateway().submitted.lock().unwrap().is_empty());
    assert_eq!(store.read_text().await.unwrap(), CONFIG);
}
