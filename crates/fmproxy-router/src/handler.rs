use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use fmproxy_protocol::openai::ChatCompletionMessage;
use fmproxy_protocol::sse::{format_data_event, DONE_EVENT};
use fmproxy_protocol::{ChatCompletion, ChatCompletionChoice, ChatCompletionChunk, ChatCompletionChunkChoice, ChatRequest, ChunkDelta, ModelListing, ModelsList};
use fmproxy_core::{PipelineError, PipelineOutcome, StreamChunk};
use tracing::{info, warn};
use uuid::Uuid;

use crate::RouterState;

pub async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn models_handler(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let data = state
        .router
        .list()
        .map(|config| ModelListing {
            id: config.name.clone(),
            object: "model",
            created: now_unix(),
            owned_by: "fmproxy",
        })
        .collect();
    Json(ModelsList { object: "list", data })
}

pub async fn chat_completions_handler(State(state): State<Arc<RouterState>>, body: Bytes) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let started_at = Instant::now();

    if body.len() > state.max_request_size {
        return error_response(&trace_id, PipelineError::payload_too_large(format!(
            "request body of {} bytes exceeds the {}-byte limit",
            body.len(),
            state.max_request_size
        )));
    }

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&trace_id, PipelineError::validation(format!("invalid JSON body: {err}")));
        }
    };

    let model = request.model.clone();
    let wants_stream = request.is_stream();
    info!(event = "downstream_received", trace_id = %trace_id, op = "chat.completions", model = %model, is_stream = wants_stream);

    match state.pipeline.dispatch(request).await {
        Ok(PipelineOutcome::Buffered(unified)) => {
            let vision_failure = !unified.success;
            let completion = ChatCompletion {
                id: format!("chatcmpl-{trace_id}"),
                object: "chat.completion",
                created: now_unix(),
                model,
                choices: vec![ChatCompletionChoice {
                    index: 0,
                    message: ChatCompletionMessage {
                        role: "assistant",
                        content: unified.text,
                    },
                    finish_reason: "stop",
                }],
                usage: unified.usage,
            };
            info!(
                event = "downstream_responded", trace_id = %trace_id, status = 200u16,
                elapsed_ms = started_at.elapsed().as_millis(), is_stream = false, vision_failure
            );
            let mut response = Json(completion).into_response();
            // Vision-failure detection (pipeline.rs's VISION_FAILURE_PHRASES) only
            // flags the response; whether to retry on another model is left to
            // the caller (spec.md §4.7 step 6), so the flag is surfaced here
            // rather than acted on.
            if vision_failure {
                response
                    .headers_mut()
                    .insert("X-Vision-Failure", "true".parse().expect("static header value is valid"));
            }
            response
        }
        Ok(PipelineOutcome::Streamed { chunks }) => {
            info!(event = "downstream_responded", trace_id = %trace_id, status = 200u16, elapsed_ms = started_at.elapsed().as_millis(), is_stream = true);
            stream_response(trace_id, format!("chatcmpl-{}", Uuid::new_v4()), model, chunks)
        }
        Err(err) => {
            warn!(event = "downstream_responded", trace_id = %trace_id, status = err.status(), error_code = %err.code, elapsed_ms = started_at.elapsed().as_millis());
            error_response(&trace_id, err)
        }
    }
}

fn stream_response(
    trace_id: String,
    id: String,
    model: String,
    chunks: std::pin::Pin<Box<dyn futures_util::Stream<Item = StreamChunk> + Send>>,
) -> Response {
    let created = now_unix();
    let mut sent_role = false;

    let body_stream = chunks.map(move |chunk| {
        let wire = ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk",
            created,
            model: model.clone(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: if sent_role { None } else { Some("assistant") },
                    content: if chunk.delta.is_empty() { None } else { Some(chunk.delta) },
                },
                finish_reason: if chunk.finished { Some("stop") } else { None },
            }],
            usage: chunk.usage,
        };
        sent_role = true;
        let json = serde_json::to_string(&wire).unwrap_or_default();
        let mut frame = format_data_event(&json);
        if wire.choices[0].finish_reason.is_some() {
            frame.push_str(DONE_EVENT);
        }
        Ok::<Bytes, std::convert::Infallible>(Bytes::from(frame))
    });

    let _ = &trace_id;
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .body(Body::from_stream(body_stream))
        .expect("static response headers are always valid")
}

fn error_response(trace_id: &str, err: PipelineError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let _ = trace_id;
    let mut response = (status, [("content-type", "application/json")], err.body()).into_response();
    if let Some(secs) = err.retry_after_secs {
        response
            .headers_mut()
            .insert("Retry-After", secs.to_string().parse().expect("integer seconds is a valid header value"));
    }
    response
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
