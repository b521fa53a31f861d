//! Configuration compiler for shot-based render pipelines.
//!
//! Parses the line-oriented shot config grammar into a hierarchical
//! model, indexes shot blocks by line range for in-place edits, and
//! compiles the model into ordered job descriptors routed across
//! per-family worker pools. Everything here is synchronous and free of
//! network access.

pub mod annotation;
pub mod camera_mode;
pub mod config_parser;
pub mod error;
pub mod frames;
pub mod host_router;
pub mod job_compiler;
pub mod job_family;
pub mod shot_range;
pub mod types;
