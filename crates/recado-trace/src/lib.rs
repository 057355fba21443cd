//! Hierarchical interaction tracing: traces, spans, and quality scores.
//!
//! The recorder is best-effort by contract — it logs failures and never
//! raises into the pipeline. Parent links between spans are threaded as
//! opaque ids through function parameters, never as pointers, so the tree
//! stays acyclic across task boundaries.

pub mod context;
pub mod recorder;

pub use context::TraceContext;
pub use recorder::{SpanHandle, TraceRecorder};
