//! Workflow template engine.
//!
//! A base template is loaded as text, the [`PLACEHOLDER`] token is
//! replaced with the job's escaped prompt, and the result is parsed into
//! an API-format node map. Family adapters then patch nodes by ID and
//! declare the inputs that change per iteration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use shotq_core::job_compiler::JobDescriptor;
use shotq_core::job_family::JobFamily;

use crate::adapters::adapter_for;
use crate::error::PipelineError;

/// Reserved token replaced verbatim with the escaped prompt.
pub const PLACEHOLDER: &str = "REPLACETEXT";

/// Node classes whose `filename_prefix` input decides where outputs land.
pub const SAVE_NODE_CLASSES: [&str; 2] = ["SaveImage", "SaveVideo"];

/// API-format workflow: node ID to `{"class_type", "inputs"}`.
pub type NodeMap = Map<String, Value>;

/// Base templates read from one directory, cached per family.
#[derive(Debug, Default)]
pub struct TemplateSet {
    dir: PathBuf,
    cache: HashMap<JobFamily, String>,
}

impl TemplateSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register template text directly, bypassing the filesystem.
    pub fn insert(&mut self, family: JobFamily, text: impl Into<String>) {
        self.cache.insert(family, text.into());
    }

    /// Raw template text for `family`. An unreadable file is fatal for the run.
    pub fn get(&mut self, family: JobFamily) -> Result<&str, PipelineError> {
        if !self.cache.contains_key(&family) {
            let path = self.dir.join(family.template_file());
            let text = std::fs::read_to_string(&path)
                .map_err(|source| PipelineError::TemplateRead { path: path.clone(), source })?;
            tracing::debug!(family = %family, path = %path.display(), "Loaded base template");
            self.cache.insert(family, text);
        }
        Ok(self.cache.get(&family).map(String::as_str).unwrap_or_default())
    }

    /// Read every template the given families need before any submission.
    pub fn preload(&mut self, families: impl IntoIterator<Item = JobFamily>) -> Result<(), PipelineError> {
        for family in families {
            self.get(family)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Substitution and format normalization
// ---------------------------------------------------------------------------

pub fn substitute_placeholder(template: &str, escaped_prompt: &str) -> String {
    template.replace(PLACEHOLDER, escaped_prompt)
}

/// Parse template text in API, wrapped (`{"prompt": {...}}`) or UI
/// (`{"nodes": [...], "links": [...]}`) layout into an API node map.
pub fn parse_nodes(family: JobFamily, text: &str) -> Result<NodeMap, PipelineError> {
    let value: Value =
        serde_json::from_str(text).map_err(|source| PipelineError::TemplateParse { family, source })?;
    let Value::Object(mut root) = value else {
        return Err(PipelineError::TemplateFormat(format!(
            "{family} template root is not an object"
        )));
    };

    if root.get("nodes").is_some_and(Value::is_array) {
        return ui_to_api(&root);
    }
    match root.remove("prompt") {
        Some(Value::Object(prompt)) => Ok(prompt),
        Some(other) => {
            root.insert("prompt".to_string(), other);
            Ok(root)
        }
        None => Ok(root),
    }
}

/// Fallback inputs for UI nodes whose widget values are missing.
fn node_defaults(class_type: &str) -> &'static [(&'static str, DefaultValue)] {
    match class_type {
        "KSampler" => &[
            ("steps", DefaultValue::Int(20)),
            ("cfg", DefaultValue::Float(8.0)),
            ("sampler_name", DefaultValue::Str("euler")),
            ("scheduler", DefaultValue::Str("normal")),
            ("denoise", DefaultValue::Float(1.0)),
            ("seed", DefaultValue::Int(0)),
        ],
        "FluxGuidance" | "CLIPTextEncodeFlux" => &[("guidance", DefaultValue::Float(3.5))],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy)]
enum DefaultValue {
    Int(i64),
    Float(f64),
    Str(&'static str),
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            DefaultValue::Int(i) => Value::from(i),
            DefaultValue::Float(f) => Value::from(f),
            DefaultValue::Str(s) => Value::from(s),
        }
    }
}

/// Convert a UI-format workflow into an API node map.
///
/// Each node's declared inputs are zipped with its `widgets_values` by
/// position, link targets are replaced with `[from_node, from_slot]`,
/// and known class defaults fill inputs that are still null.
pub fn ui_to_api(ui: &Map<String, Value>) -> Result<NodeMap, PipelineError> {
    let nodes = ui
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::TemplateFormat("UI workflow without nodes".into()))?;
    let links = ui.get("links").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut api = NodeMap::new();
    for node in nodes {
        let id = match node.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(PipelineError::TemplateFormat("UI node without id".into())),
        };
        let class_type = node
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::TemplateFormat(format!("UI node {id} without type")))?;

        let input_names: Vec<&str> = node
            .get("inputs")
            .and_then(Value::as_array)
            .map(|defs| defs.iter().filter_map(|d| d.get("name").and_then(Value::as_str)).collect())
            .unwrap_or_default();
        let widgets = node
            .get("widgets_values")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut inputs = Map::new();
        for (i, name) in input_names.iter().enumerate() {
            inputs.insert(name.to_string(), widgets.get(i).cloned().unwrap_or(Value::Null));
        }

        for link in &links {
            let Some(parts) = link.as_array().filter(|p| p.len() >= 5) else {
                continue;
            };
            let to_node = match &parts[3] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let Some(to_slot) = parts[4].as_u64().map(|s| s as usize) else {
                continue;
            };
            if to_node != id {
                continue;
            }
            let Some(name) = input_names.get(to_slot) else {
                continue;
            };
            let from_node = match &parts[1] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let from_slot = parts[2].as_i64().unwrap_or(0);
            inputs.insert(name.to_string(), serde_json::json!([from_node, from_slot]));
        }

        for (key, default) in node_defaults(class_type) {
            let missing = inputs.get(*key).is_none_or(Value::is_null);
            if missing {
                inputs.insert(key.to_string(), default.to_value());
            }
        }

        api.insert(
            id,
            serde_json::json!({ "class_type": class_type, "inputs": inputs }),
        );
    }
    Ok(api)
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Address of one node input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRef {
    pub node_id: String,
    pub input: String,
}

impl InputRef {
    pub fn new(node_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input: input.into(),
        }
    }
}

/// Inputs overwritten for one iteration.
pub type Variation = Vec<(InputRef, Value)>;

/// Patched workflow plus what changes between iterations.
#[derive(Debug, Clone)]
pub struct Payload {
    pub prompt: NodeMap,
    /// Inputs that receive `base_seed + i` on iteration `i`.
    pub seed_slots: Vec<InputRef>,
    pub base_seed: u32,
    /// Per-iteration overrides, cycled when shorter than `iterations`.
    pub variations: Vec<Variation>,
    pub iterations: u32,
}

impl Payload {
    /// Deep copy of the node map for iteration `i`.
    pub fn iteration(&self, i: u32) -> Value {
        let mut nodes = self.prompt.clone();
        let seed = self.base_seed.wrapping_add(i);
        for slot in &self.seed_slots {
            set_input(&mut nodes, &slot.node_id, &slot.input, Value::from(seed));
        }
        if !self.variations.is_empty() {
            let variation = &self.variations[i as usize % self.variations.len()];
            for (slot, value) in variation {
                set_input(&mut nodes, &slot.node_id, &slot.input, value.clone());
            }
        }
        Value::Object(nodes)
    }
}

/// Set `nodes[node_id].inputs[input]`, creating `inputs` when absent.
/// Returns `false` when the node does not exist.
pub fn set_input(nodes: &mut NodeMap, node_id: &str, input: &str, value: Value) -> bool {
    let Some(Value::Object(node)) = nodes.get_mut(node_id) else {
        return false;
    };
    let inputs = node
        .entry("inputs")
        .or_insert_with(|| Value::Object(Map::new()));
    if !inputs.is_object() {
        *inputs = Value::Object(Map::new());
    }
    if let Value::Object(inputs) = inputs {
        inputs.insert(input.to_string(), value);
    }
    true
}

pub fn class_type<'a>(nodes: &'a NodeMap, node_id: &str) -> Option<&'a str> {
    nodes.get(node_id)?.get("class_type")?.as_str()
}

/// IDs of every node of `class`, in map order.
pub fn nodes_of_class(nodes: &NodeMap, class: &str) -> Vec<String> {
    nodes
        .iter()
        .filter(|(_, node)| node.get("class_type").and_then(Value::as_str) == Some(class))
        .map(|(id, _)| id.clone())
        .collect()
}

pub fn has_input(nodes: &NodeMap, node_id: &str, input: &str) -> bool {
    nodes
        .get(node_id)
        .and_then(|n| n.get("inputs"))
        .is_some_and(|inputs| inputs.get(input).is_some())
}

/// Save nodes that declare a `filename_prefix` input.
pub fn save_node_ids(nodes: &NodeMap) -> Vec<String> {
    SAVE_NODE_CLASSES
        .iter()
        .flat_map(|class| nodes_of_class(nodes, class))
        .filter(|id| has_input(nodes, id, "filename_prefix"))
        .collect()
}

/// Point every save node that declares a `filename_prefix` at `prefix`.
pub fn apply_output_prefix(nodes: &mut NodeMap, prefix: &str) -> Vec<String> {
    let targets = save_node_ids(nodes);
    for id in &targets {
        set_input(nodes, id, "filename_prefix", Value::from(prefix));
    }
    targets
}

/// Build the submission payload for `job` from its base template text.
pub fn build_payload(template: &str, job: &JobDescriptor) -> Result<Payload, PipelineError> {
    let text = substitute_placeholder(template, &job.prompt);
    let mut nodes = parse_nodes(job.family, &text)?;
    let prefix = job.output_prefix();
    apply_output_prefix(&mut nodes, &prefix);

    let mut payload = Payload {
        prompt: nodes,
        seed_slots: Vec::new(),
        base_seed: job.seed,
        variations: Vec::new(),
        iterations: job.iterations.max(1),
    };
    adapter_for(job.family).apply(&mut payload, job)?;
    tracing::debug!(
        job = %job.key(),
        nodes = payload.prompt.len(),
        iterations = payload.iterations,
        prefix = %prefix,
        "Built payload"
    );
    Ok(payload)
}
