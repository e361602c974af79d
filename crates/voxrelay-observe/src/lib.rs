//! Observability plumbing: tracing-subscriber initialization and the OTel
//! GenAI semantic-convention attribute names used when instrumenting model
//! calls.

pub mod genai_attrs;
pub mod tracing_setup;
