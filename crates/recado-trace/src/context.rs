use recado_core::types::TraceId;

/// Lightweight handle to an open trace, cloned freely across tasks.
///
/// Holds only opaque ids. The immediate parent span is NOT carried here —
/// context propagation loses it across loop iterations, so callers thread
/// an explicit `parent_span_id` parameter instead.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: TraceId,
}

impl TraceContext {
    pub fn new(trace_id: TraceId) -> Self {
        Self { trace_id }
    }
}

/// Vendor-neutral generation metadata for LLM spans.
pub fn generation_metadata(input_tokens: u32, output_tokens: u32, model: &str) -> serde_json::Value {
    serde_json::json!({
        "gen_ai.usage.input_tokens": input_tokens,
        "gen_ai.usage.output_tokens": output_tokens,
        "gen_ai.request.model": model,
    })
}

/// Truncate span input/output payloads for storage.
pub fn truncate_payload(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "ñandú".repeat(200);
        let t = truncate_payload(&s, 500);
        assert!(t.len() <= 504);
        assert!(t.ends_with('…'));
    }

    #[test]
    fn short_payload_is_unchanged() {
        assert_eq!(truncate_payload("hola", 500), "hola");
    }

    #[test]
    fn generation_metadata_uses_vendor_neutral_keys() {
        let m = generation_metadata(10, 20, "qwen3:8b");
        assert_eq!(m["gen_ai.usage.input_tokens"], 10);
        assert_eq!(m["gen_ai.usage.output_tokens"], 20);
        assert_eq!(m["gen_ai.request.model"], "qwen3:8b");
    }
}
