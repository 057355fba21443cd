use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::warn;

use recado_core::config::TracingConfig;
use recado_core::types::{SpanId, TraceId};
use recado_memory::types::{ScoreSource, SpanKind, TraceMessageType, TraceStatus};
use recado_memory::MemoryStore;

use crate::context::{truncate_payload, TraceContext};

/// Span payloads are truncated to this many characters before storage.
const PAYLOAD_MAX: usize = 500;

/// Handle for an open span. Finishing consumes it, so a span cannot be
/// closed twice; the recorder backfills any handle dropped without finishing
/// as best-effort only (the row simply stays in `started`).
#[derive(Debug)]
pub struct SpanHandle {
    pub id: SpanId,
    started: Instant,
}

/// Dual-sink interaction recorder: SQLite rows plus an optional JSONL
/// mirror for external observability tooling.
///
/// Process-wide singleton, attached to application state at startup.
/// Every method swallows its own errors — tracing never blocks the
/// pipeline.
pub struct TraceRecorder {
    store: Arc<MemoryStore>,
    export: Option<Mutex<std::fs::File>>,
    enabled: bool,
    sample_rate: f64,
}

impl TraceRecorder {
    pub fn new(store: Arc<MemoryStore>, cfg: &TracingConfig) -> Self {
        let export = cfg.export_path.as_ref().and_then(|path| {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => Some(Mutex::new(f)),
                Err(e) => {
                    warn!(error = %e, path, "trace export sink unavailable");
                    None
                }
            }
        });
        Self {
            store,
            export,
            enabled: cfg.enabled,
            sample_rate: cfg.sample_rate,
        }
    }

    /// Open a trace root. Returns `None` when tracing is disabled or the
    /// trace falls outside the sample — callers treat `None` as "don't
    /// record anything for this interaction".
    pub fn start_trace(
        &self,
        handle: &str,
        input: &str,
        message_type: TraceMessageType,
        metadata: serde_json::Value,
    ) -> Option<TraceContext> {
        if !self.enabled {
            return None;
        }
        let trace_id = TraceId::new();
        if !self.sampled(trace_id.as_str()) {
            return None;
        }
        let input = truncate_payload(input, PAYLOAD_MAX);
        if let Err(e) = self.store.save_trace(
            trace_id.as_str(),
            handle,
            &input,
            message_type,
            &metadata,
        ) {
            warn!(error = %e, "trace root write failed");
            return None;
        }
        self.mirror(serde_json::json!({
            "event": "trace_start",
            "trace_id": trace_id.as_str(),
            "handle": handle,
            "message_type": message_type,
            "metadata": metadata,
        }));
        Some(TraceContext::new(trace_id))
    }

    pub fn finish_trace(
        &self,
        ctx: &TraceContext,
        status: TraceStatus,
        output: Option<&str>,
        external_message_id: Option<&str>,
    ) {
        let output = output.map(|o| truncate_payload(o, PAYLOAD_MAX));
        if let Err(e) = self.store.finish_trace(
            ctx.trace_id.as_str(),
            status,
            output.as_deref(),
            external_message_id,
        ) {
            warn!(error = %e, trace = %ctx.trace_id, "trace finish failed");
        }
        self.mirror(serde_json::json!({
            "event": "trace_finish",
            "trace_id": ctx.trace_id.as_str(),
            "status": status,
            "external_message_id": external_message_id,
        }));
    }

    /// Open a child span. `parent` is the explicit parent span id, `None`
    /// for phase spans directly under the trace root.
    pub fn start_span(
        &self,
        ctx: &TraceContext,
        parent: Option<&SpanId>,
        name: &str,
        kind: SpanKind,
        input: Option<&str>,
    ) -> SpanHandle {
        let id = SpanId::new();
        let input = input.map(|i| truncate_payload(i, PAYLOAD_MAX));
        if let Err(e) = self.store.save_trace_span(
            id.as_str(),
            ctx.trace_id.as_str(),
            parent.map(|p| p.as_str()),
            name,
            kind,
            input.as_deref(),
        ) {
            warn!(error = %e, span = %name, "span open failed");
        }
        SpanHandle {
            id,
            started: Instant::now(),
        }
    }

    /// Close a span with its output and metadata. Duration is measured from
    /// the handle's creation.
    pub fn finish_span(
        &self,
        handle: SpanHandle,
        status: TraceStatus,
        output: Option<&str>,
        metadata: serde_json::Value,
    ) {
        let duration_ms = handle.started.elapsed().as_millis() as i64;
        let output = output.map(|o| truncate_payload(o, PAYLOAD_MAX));
        if let Err(e) = self.store.finish_trace_span(
            handle.id.as_str(),
            status,
            output.as_deref(),
            duration_ms,
            &metadata,
        ) {
            warn!(error = %e, span = %handle.id, "span finish failed");
        }
        self.mirror(serde_json::json!({
            "event": "span",
            "span_id": handle.id.as_str(),
            "status": status,
            "duration_ms": duration_ms,
            "metadata": metadata,
        }));
    }

    /// Attach a quality score to a trace (and optionally a span).
    pub fn score(
        &self,
        ctx: &TraceContext,
        span_id: Option<&SpanId>,
        name: &str,
        value: f64,
        source: ScoreSource,
        comment: Option<&str>,
    ) {
        if let Err(e) = self.store.save_trace_score(
            ctx.trace_id.as_str(),
            span_id.map(|s| s.as_str()),
            name,
            value,
            source,
            comment,
        ) {
            warn!(error = %e, score = %name, "score write failed");
        }
    }

    /// Deterministic per-trace sampling: hash the id into [0,1).
    fn sampled(&self, trace_id: &str) -> bool {
        if self.sample_rate >= 1.0 {
            return true;
        }
        if self.sample_rate <= 0.0 {
            return false;
        }
        let mut h = DefaultHasher::new();
        trace_id.hash(&mut h);
        let fraction = (h.finish() % 10_000) as f64 / 10_000.0;
        fraction < self.sample_rate
    }

    /// Append one line to the JSONL mirror; failures are logged once per
    /// call and otherwise ignored.
    fn mirror(&self, value: serde_json::Value) {
        if let Some(file) = &self.export {
            let mut f = file.lock().unwrap();
            if let Err(e) = writeln!(f, "{value}") {
                warn!(error = %e, "trace mirror write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recado_core::config::TracingConfig;

    fn recorder_with(cfg: TracingConfig) -> (TraceRecorder, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        (TraceRecorder::new(Arc::clone(&store), &cfg), store)
    }

    #[test]
    fn disabled_recorder_returns_no_context() {
        let cfg = TracingConfig {
            enabled: false,
            ..TracingConfig::default()
        };
        let (rec, _) = recorder_with(cfg);
        assert!(rec
            .start_trace("h", "x", TraceMessageType::Text, serde_json::json!({}))
            .is_none());
    }

    #[test]
    fn span_tree_persists_with_parent_links() {
        let (rec, store) = recorder_with(TracingConfig::default());
        let ctx = rec
            .start_trace("h", "hola", TraceMessageType::Text, serde_json::json!({}))
            .unwrap();
        let phase = rec.start_span(&ctx, None, "tool_loop", SpanKind::Span, None);
        let phase_id = phase.id.clone();
        let child = rec.start_span(&ctx, Some(&phase_id), "llm:iteration_1", SpanKind::Generation, None);
        rec.finish_span(child, TraceStatus::Completed, Some("ok"), serde_json::json!({}));
        rec.finish_span(phase, TraceStatus::Completed, None, serde_json::json!({}));
        rec.finish_trace(&ctx, TraceStatus::Completed, Some("done"), Some("wamid.1"));

        assert_eq!(
            store.get_trace_id_by_external_id("wamid.1").unwrap().as_deref(),
            Some(ctx.trace_id.as_str())
        );
    }

    #[test]
    fn zero_sample_rate_drops_everything() {
        let cfg = TracingConfig {
            sample_rate: 0.0,
            ..TracingConfig::default()
        };
        let (rec, _) = recorder_with(cfg);
        assert!(rec
            .start_trace("h", "x", TraceMessageType::Text, serde_json::json!({}))
            .is_none());
    }

    #[test]
    fn jsonl_mirror_receives_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        let cfg = TracingConfig {
            export_path: Some(path.to_string_lossy().into_owned()),
            ..TracingConfig::default()
        };
        let (rec, _) = recorder_with(cfg);
        let ctx = rec
            .start_trace("h", "x", TraceMessageType::Text, serde_json::json!({}))
            .unwrap();
        rec.finish_trace(&ctx, TraceStatus::Completed, None, None);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
