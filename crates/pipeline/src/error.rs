use std::path::PathBuf;

use shotq_comfyui::api::ComfyUIApiError;
use shotq_core::error::CoreError;
use shotq_core::job_family::JobFamily;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to read template {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template for {family} is not valid JSON after substitution: {source}")]
    TemplateParse {
        family: JobFamily,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported template layout: {0}")]
    TemplateFormat(String),

    #[error("{family} template has no node '{node_id}' of class {class_type}")]
    MissingNode {
        family: JobFamily,
        node_id: String,
        class_type: String,
    },

    #[error("Job {0} needs an input frame but has none")]
    MissingInputFrame(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Gateway(#[from] ComfyUIApiError),
}
