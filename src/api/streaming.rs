//! Server-Sent-Events pass-through for streamed completions.
//!
//! Once the upstream status is OK the response is committed: bytes are copied
//! to the client exactly as received, with no rewriting and no buffering
//! beyond the copy itself. A side channel accumulates a UTF-8 view of the
//! stream, splits it on newlines, and best-effort parses `data:` frames to
//! observe token usage and tool-call markers for the route record. Parse
//! failures are silent; the raw bytes have already been forwarded.

use crate::core::catalog::{self, Tier};
use crate::core::route_log::{RouteLog, RouteRecord};
use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::services::executor::{HEADER_ESCALATED, HEADER_MODEL, HEADER_TIER};

/// Everything the pump needs to emit the route record at stream end.
pub struct StreamContext {
    /// Prefilled by the executor; token counts and timing land here.
    pub record: RouteRecord,
    pub route_log: Arc<RouteLog>,
    pub started: Instant,
    /// Tier actually served, for the response header.
    pub tier: Tier,
}

/// Emits the route record exactly once, whether the stream ends naturally,
/// errors out, or the client disconnects and the body is dropped mid-flight.
struct RecordGuard {
    record: Option<RouteRecord>,
    route_log: Arc<RouteLog>,
    started: Instant,
    usage_input: Option<u64>,
    usage_output: Option<u64>,
    had_tool_calls: bool,
    chunk_count: u64,
}

impl RecordGuard {
    fn finalize(&mut self) {
        let mut record = match self.record.take() {
            Some(record) => record,
            None => return,
        };

        if let Some(input) = self.usage_input {
            record.input_tokens = input;
        }
        // Without observed usage, estimate output from chunk volume.
        record.output_tokens = self
            .usage_output
            .unwrap_or_else(|| (self.chunk_count * 3).div_ceil(2));
        record.had_tool_calls = self.had_tool_calls;
        record.response_time_ms = self.started.elapsed().as_millis() as u64;
        record.original_cost_usd = catalog::cost(
            &record.original_model,
            record.input_tokens,
            record.output_tokens,
        );
        record.actual_cost_usd = catalog::cost(
            &record.actual_model,
            record.input_tokens,
            record.output_tokens,
        );
        record.savings_usd = (record.original_cost_usd - record.actual_cost_usd).max(0.0);

        tracing::debug!(
            request_id = %record.request_id,
            chunks = self.chunk_count,
            output_tokens = record.output_tokens,
            "stream finished"
        );
        self.route_log.record(record);
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Keep at most this much unterminated SSE text for the side-channel parse.
/// Forwarded bytes are unaffected.
const MAX_PARSE_BUFFER: usize = 256 * 1024;

struct PumpState {
    upstream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    line_buffer: String,
    done_emitted: bool,
    guard: RecordGuard,
}

impl PumpState {
    /// Side-channel observation of a forwarded chunk.
    fn observe(&mut self, bytes: &Bytes) {
        self.guard.chunk_count += 1;
        self.line_buffer
            .push_str(&String::from_utf8_lossy(bytes));

        while let Some(newline) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=newline).collect();
            let line = line.trim();
            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            if payload == "[DONE]" {
                continue;
            }
            let Ok(frame) = serde_json::from_str::<Value>(payload) else {
                continue;
            };
            self.observe_frame(&frame);
        }

        if self.line_buffer.len() > MAX_PARSE_BUFFER {
            self.line_buffer.clear();
        }
    }

    fn observe_frame(&mut self, frame: &Value) {
        if let Some(usage) = frame.get("usage") {
            let prompt = usage.get("prompt_tokens").and_then(|t| t.as_u64());
            let completion = usage.get("completion_tokens").and_then(|t| t.as_u64());
            if prompt.unwrap_or(0) > 0 || completion.unwrap_or(0) > 0 {
                self.guard.usage_input = prompt.or(self.guard.usage_input);
                self.guard.usage_output = completion.or(self.guard.usage_output);
            }
        }
        if let Some(choices) = frame.get("choices").and_then(|c| c.as_array()) {
            for choice in choices {
                let tool_calls = choice
                    .get("delta")
                    .and_then(|d| d.get("tool_calls"))
                    .and_then(|t| t.as_array());
                if tool_calls.map(|t| !t.is_empty()).unwrap_or(false) {
                    self.guard.had_tool_calls = true;
                }
            }
        }
    }
}

/// Build the client-facing SSE response over a committed upstream stream.
pub fn sse_response(upstream: reqwest::Response, ctx: StreamContext) -> Response {
    let StreamContext {
        record,
        route_log,
        started,
        tier,
    } = ctx;

    let actual_model = record.actual_model.clone();
    let escalated = record.escalated;

    let state = PumpState {
        upstream: Box::pin(upstream.bytes_stream()),
        line_buffer: String::new(),
        done_emitted: false,
        guard: RecordGuard {
            record: Some(record),
            route_log,
            started,
            usage_input: None,
            usage_output: None,
            had_tool_calls: false,
            chunk_count: 0,
        },
    };

    let byte_stream = futures::stream::unfold(state, |mut state| async move {
        match state.upstream.next().await {
            Some(Ok(bytes)) => {
                state.observe(&bytes);
                Some((Ok::<Bytes, std::io::Error>(bytes), state))
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "upstream stream error, closing with [DONE]");
                // The upstream died mid-stream. Give the client a clean SSE
                // terminator; no retry is possible once bytes have flowed.
                state.upstream = Box::pin(futures::stream::empty());
                if state.done_emitted {
                    None
                } else {
                    state.done_emitted = true;
                    Some((Ok(Bytes::from_static(b"data: [DONE]\n\n")), state))
                }
            }
            None => None,
        }
    });

    Response::builder()
        .status(200)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .header(HEADER_MODEL, actual_model)
        .header(HEADER_TIER, tier.as_str())
        .header(HEADER_ESCALATED, if escalated { "true" } else { "false" })
        .body(Body::from_stream(byte_stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
