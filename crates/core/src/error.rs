use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan output directory {path}: {source}")]
    ScanDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Project '{0}' not found")]
    UnknownProject(String),

    #[error("Shot {sequence}/{shot} not found in config")]
    ShotNotFound { sequence: String, shot: String },

    #[error("Strict parse produced {0} warning(s)")]
    StrictParse(usize),

    #[error("Invalid value '{value}' for {key}")]
    InvalidField { key: String, value: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}
