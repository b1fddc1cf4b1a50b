//! Streaming Adapter (spec.md §4.8): presents the client a uniform chunk
//! sequence regardless of whether the upstream dialect streams natively.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use fmproxy_protocol::{sse::SseParser, Usage};

use crate::dialect::{parse_stream_delta, parse_stream_usage, UsageDelta};
use crate::model_table::Dialect;

pub const SYNTHESIZED_CHUNK_CHARS: usize = 10;
pub const SYNTHESIZED_INTER_CHUNK_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
    pub finished: bool,
    pub usage: Option<Usage>,
}

/// Streaming capability for a model, probed once at startup and cached.
/// `ViaUpstream` means native SSE through the platform's own inference
/// endpoint; `Direct` means a direct-dialect API key is configured and
/// native streaming goes straight to the model family's own endpoint;
/// `None` means the dialect must be synthesized from a buffered call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingCapability {
    ViaUpstream,
    Direct,
    None,
}

/// Caches the result of a one-time startup probe per model. Probe errors
/// mark the capability as `None` rather than leaving the model unclassified
/// (spec.md §4.8), so lookups are always a cheap, infallible read.
pub struct StreamingDetector {
    capabilities: RwLock<HashMap<String, StreamingCapability>>,
}

impl StreamingDetector {
    pub fn new() -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Classifies a model's streaming capability from its dialect and
    /// whether a direct-dialect API key is configured for that family, and
    /// caches the result.
    pub fn probe(&self, model: &str, dialect: Dialect, supports_streaming: bool, has_direct_api_key: bool) -> StreamingCapability {
        let capability = if has_direct_api_key {
            StreamingCapability::Direct
        } else if supports_streaming && matches!(dialect, Dialect::Openai | Dialect::Anthropic | Dialect::Gemini) {
            StreamingCapability::ViaUpstream
        } else {
            StreamingCapability::None
        };
        self.capabilities
            .write()
            .expect("streaming detector lock poisoned")
            .insert(model.to_string(), capability);
        capability
    }

    pub fn capability(&self, model: &str) -> StreamingCapability {
        self.capabilities
            .read()
            .expect("streaming detector lock poisoned")
            .get(model)
            .copied()
            .unwrap_or(StreamingCapability::None)
    }
}

impl Default for StreamingDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunks a buffered response by a small fixed character budget, yielding a
/// terminal chunk carrying usage once the text is exhausted. Used whenever
/// the upstream doesn't stream natively, or a vision-bearing request falls
/// back from native streaming (spec.md §4.8's vision carve-out).
pub fn synthesize_stream(
    text: String,
    usage: Usage,
    chunk_chars: usize,
) -> Pin<Box<dyn Stream<Item = StreamChunk> + Send>> {
    let chars: Vec<char> = text.chars().collect();
    let state = (chars, 0usize, usage, false);

    let stream = futures_util::stream::unfold(state, move |(chars, offset, usage, done)| async move {
        if done {
            return None;
        }
        if offset >= chars.len() {
            return Some((
                StreamChunk {
                    delta: String::new(),
                    finished: true,
                    usage: Some(usage.clone()),
                },
                (chars, offset, usage, true),
            ));
        }

        tokio::time::sleep(SYNTHESIZED_INTER_CHUNK_DELAY).await;
        let end = (offset + chunk_chars).min(chars.len());
        let delta: String = chars[offset..end].iter().collect();
        Some((
            StreamChunk {
                delta,
                finished: false,
                usage: None,
            },
            (chars, end, usage, false),
        ))
    });
    Box::pin(stream)
}

/// Parses an upstream byte stream (as forwarded by [`crate::upstream_client`]) as
/// server-sent events and yields one chunk per content-delta event, per the
/// dialect's event shape. Usage is accumulated across events as the
/// dialect's own usage fields arrive (`parse_stream_usage`) and surfaced on
/// the terminal chunk, rather than a value fixed ahead of time — a dialect
/// that never reports usage over the wire still yields a terminal chunk,
/// just with zeroed usage fields. Cancellation: dropping the returned
/// stream (the client disconnecting) drops the underlying `mpsc::Receiver`,
/// which promptly unblocks the forwarding task in `WreqUpstreamClient::send`
/// on its next send.
pub fn true_stream(mut upstream: mpsc::Receiver<Bytes>, dialect: Dialect) -> Pin<Box<dyn Stream<Item = StreamChunk> + Send>> {
    let (tx, rx) = mpsc::channel::<StreamChunk>(16);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut usage = Usage::default();
        while let Some(bytes) = upstream.recv().await {
            for event in parser.push_bytes(&bytes) {
                if event.data == "[DONE]" {
                    let _ = tx
                        .send(StreamChunk {
                            delta: String::new(),
                            finished: true,
                            usage: Some(usage.clone()),
                        })
                        .await;
                    return;
                }
                if let Some(delta) = parse_stream_usage(dialect, &event.data) {
                    merge_usage(&mut usage, delta);
                }
                if let Some(delta) = parse_stream_delta(dialect, &event.data) {
                    if tx
                        .send(StreamChunk {
                            delta,
                            finished: false,
                            usage: None,
                        })
                        .await
                        .is_err()
                    {
                        // Receiver dropped: client disconnected. Stop reading
                        // from `upstream` and let it (and the connection it
                        // holds) drop with this task.
                        return;
                    }
                }
            }
        }
        let _ = tx
            .send(StreamChunk {
                delta: String::new(),
                finished: true,
                usage: Some(usage),
            })
            .await;
    });
    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

/// Folds one event's partial usage into the running total: fields the event
/// actually carries overwrite the running value (dialects report revised,
/// not incremental, counts); `total_tokens` is recomputed from prompt +
/// completion when the event doesn't report a total of its own.
fn merge_usage(usage: &mut Usage, delta: UsageDelta) {
    if let Some(prompt) = delta.prompt_tokens {
        usage.prompt_tokens = prompt;
    }
    if let Some(completion) = delta.completion_tokens {
        usage.completion_tokens = completion;
    }
    usage.total_tokens = delta.total_tokens.unwrap_or(usage.prompt_tokens + usage.completion_tokens);
}
