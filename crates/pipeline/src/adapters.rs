//! Per-family node contracts.
//!
//! Each family's base template exposes a fixed set of node IDs. An
//! adapter checks that the required nodes exist with the right class,
//! writes the job's parameters into them and registers the inputs that
//! vary per iteration. Selection is by [`JobFamily`] variant.

use serde_json::Value;
use shotq_core::camera_mode::CameraMode;
use shotq_core::job_compiler::JobDescriptor;
use shotq_core::job_family::JobFamily;

use crate::camera;
use crate::error::PipelineError;
use crate::template::{class_type, nodes_of_class, save_node_ids, set_input, InputRef, NodeMap, Payload};

/// Host the flux trigger node posts its inner workflow to, relative to the worker.
pub const TRIGGER_LOCAL_HOST: &str = "127.0.0.1:8188";

pub const FLUX_LORA_SLOTS: usize = 8;

pub trait FamilyAdapter: Send + Sync {
    fn family(&self) -> JobFamily;

    /// Patch `payload` for `job`. A missing required node is an error.
    fn apply(&self, payload: &mut Payload, job: &JobDescriptor) -> Result<(), PipelineError>;
}

pub fn adapter_for(family: JobFamily) -> &'static dyn FamilyAdapter {
    match family {
        JobFamily::FluxT2i => &FluxAdapter,
        JobFamily::QwenCameraTransform => &CameraTransformAdapter,
        JobFamily::QwenI2i => &QwenI2iAdapter,
        JobFamily::Wan25s => &WanAdapter,
    }
}

fn require_node(
    nodes: &NodeMap,
    family: JobFamily,
    node_id: &str,
    class: &str,
) -> Result<(), PipelineError> {
    if class_type(nodes, node_id) == Some(class) {
        Ok(())
    } else {
        Err(PipelineError::MissingNode {
            family,
            node_id: node_id.to_string(),
            class_type: class.to_string(),
        })
    }
}

fn input_frame_path(job: &JobDescriptor) -> Result<String, PipelineError> {
    job.input_frame
        .as_ref()
        .map(|f| f.path.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::MissingInputFrame(job.key()))
}

fn optional_seed_slot(payload: &mut Payload, node_id: &str, input: &str) {
    if payload.prompt.contains_key(node_id) {
        payload.seed_slots.push(InputRef::new(node_id, input));
    }
}

// ---------------------------------------------------------------------------
// Flux
// ---------------------------------------------------------------------------

pub struct FluxAdapter;

impl FluxAdapter {
    const TRIGGER: &'static str = "1";
}

impl FamilyAdapter for FluxAdapter {
    fn family(&self) -> JobFamily {
        JobFamily::FluxT2i
    }

    fn apply(&self, payload: &mut Payload, job: &JobDescriptor) -> Result<(), PipelineError> {
        let nodes = &mut payload.prompt;
        require_node(nodes, self.family(), Self::TRIGGER, "WorkflowTrigger")?;

        let inputs: [(&str, Value); 10] = [
            ("workflow_json", Value::from(job.prompt_text())),
            ("host", Value::from(TRIGGER_LOCAL_HOST)),
            ("width", Value::from(job.width)),
            ("height", Value::from(job.height)),
            ("json_file", Value::from("")),
            // Iterations are fanned out by the dispatcher, one trigger run each.
            ("num_jobs", Value::from(1)),
            ("project", Value::from(job.project.as_str())),
            ("sequence", Value::from(job.sequence.as_str())),
            ("shot", Value::from(job.shot.as_str())),
            ("name", Value::from(job.subshot.as_str())),
        ];
        for (key, value) in inputs {
            set_input(nodes, Self::TRIGGER, key, value);
        }

        for i in 1..=FLUX_LORA_SLOTS {
            let file = job.field(&format!("FLUX_LORA{i}")).map(str::trim).unwrap_or("");
            let strength = job
                .field(&format!("FLUX_LORA{i}_STRENGTH"))
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(1.0);
            set_input(nodes, Self::TRIGGER, &format!("lora_{i}"), Value::from(file));
            set_input(nodes, Self::TRIGGER, &format!("lora_{i}_strength"), Value::from(strength));
        }

        payload.seed_slots.push(InputRef::new(Self::TRIGGER, "seed_start"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wan image-to-video
// ---------------------------------------------------------------------------

pub struct WanAdapter;

impl WanAdapter {
    const LOAD_IMAGE: &'static str = "15";
    const NEGATIVE_PROMPT: &'static str = "11";
    const SAMPLERS: [&'static str; 2] = ["9:235", "9:236"];
}

impl FamilyAdapter for WanAdapter {
    fn family(&self) -> JobFamily {
        JobFamily::Wan25s
    }

    fn apply(&self, payload: &mut Payload, job: &JobDescriptor) -> Result<(), PipelineError> {
        require_node(&payload.prompt, self.family(), Self::LOAD_IMAGE, "LoadImage")?;
        let image = input_frame_path(job)?;
        let nodes = &mut payload.prompt;
        set_input(nodes, Self::LOAD_IMAGE, "image", Value::from(image));

        for id in nodes_of_class(nodes, "ImageResize+") {
            set_input(nodes, &id, "width", Value::from(job.width));
            set_input(nodes, &id, "height", Value::from(job.height));
        }

        if let Some(negative) = job.field("NEGATIVE_PROMPT").filter(|n| !n.trim().is_empty()) {
            set_input(nodes, Self::NEGATIVE_PROMPT, "text", Value::from(negative.trim()));
        }

        for sampler in Self::SAMPLERS {
            optional_seed_slot(payload, sampler, "noise_seed");
        }
        payload.iterations = 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Qwen image-to-image (generic sampler workflow)
// ---------------------------------------------------------------------------

pub struct QwenI2iAdapter;

impl FamilyAdapter for QwenI2iAdapter {
    fn family(&self) -> JobFamily {
        JobFamily::QwenI2i
    }

    fn apply(&self, payload: &mut Payload, job: &JobDescriptor) -> Result<(), PipelineError> {
        let samplers = nodes_of_class(&payload.prompt, "KSampler");
        if samplers.is_empty() {
            return Err(PipelineError::MissingNode {
                family: self.family(),
                node_id: "*".to_string(),
                class_type: "KSampler".to_string(),
            });
        }

        let nodes = &mut payload.prompt;
        let primitives: Vec<String> = ["PrimitiveInt", "Int"]
            .iter()
            .flat_map(|class| nodes_of_class(nodes, class))
            .collect();
        for id in primitives {
            let lower = id.to_lowercase();
            if lower.contains("width") {
                set_input(nodes, &id, "value", Value::from(job.width));
            }
            if lower.contains("height") {
                set_input(nodes, &id, "value", Value::from(job.height));
            }
        }

        for id in samplers {
            payload.seed_slots.push(InputRef::new(id, "seed"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Qwen multi-angle camera transform
// ---------------------------------------------------------------------------

pub struct CameraTransformAdapter;

impl CameraTransformAdapter {
    const LOAD_IMAGE: &'static str = "8";
    const CAMERA: &'static str = "4";
    const SAMPLER: &'static str = "2:105";
}

impl FamilyAdapter for CameraTransformAdapter {
    fn family(&self) -> JobFamily {
        JobFamily::QwenCameraTransform
    }

    fn apply(&self, payload: &mut Payload, job: &JobDescriptor) -> Result<(), PipelineError> {
        require_node(&payload.prompt, self.family(), Self::LOAD_IMAGE, "LoadImage")?;
        require_node(
            &payload.prompt,
            self.family(),
            Self::CAMERA,
            "QwenMultiangleCameraNode",
        )?;
        let image = input_frame_path(job)?;
        let mode = CameraMode::from_fields(&job.fields)?;
        // The descriptor's iteration count already accounts for the mode.
        let angles: Vec<_> = camera::angles(mode, job.seed)
            .into_iter()
            .take(payload.iterations as usize)
            .collect();

        let nodes = &mut payload.prompt;
        set_input(nodes, Self::LOAD_IMAGE, "image", Value::from(image));
        set_input(nodes, Self::CAMERA, "default_prompts", Value::from(false));

        let prefix = job.output_prefix();
        let save_nodes = save_node_ids(nodes);
        payload.variations = angles
            .iter()
            .enumerate()
            .map(|(index, angle)| {
                let mut variation = vec![
                    (InputRef::new(Self::CAMERA, "horizontal_angle"), Value::from(angle.horizontal)),
                    (InputRef::new(Self::CAMERA, "vertical_angle"), Value::from(angle.vertical)),
                    (InputRef::new(Self::CAMERA, "zoom"), Value::from(angle.zoom)),
                ];
                let view_prefix = format!("{prefix}_c{:03}_", index + 1);
                variation.extend(
                    save_nodes
                        .iter()
                        .map(|id| (InputRef::new(id.as_str(), "filename_prefix"), Value::from(view_prefix.as_str()))),
                );
                variation
            })
            .collect();
        payload.iterations = angles.len().max(1) as u32;
        optional_seed_slot(payload, Self::SAMPLER, "seed");
        tracing::debug!(job = %job.key(), mode = %mode, views = angles.len(), "Planned camera views");
        Ok(())
    }
}
