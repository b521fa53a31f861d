//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper for workflow submission and history
//! retrieval, plus typed interpretation of history responses.

pub mod api;
pub mod history;
