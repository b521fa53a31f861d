//! Turns compiled job descriptors into worker submissions.
//!
//! Templates are loaded and patched per family, payloads are routed to a
//! worker host and submitted through a [`gateway::WorkerGateway`], and
//! successful results are written back into the config through the
//! single-writer [`store::ConfigStore`].

pub mod adapters;
pub mod batch;
pub mod camera;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod store;
pub mod template;
