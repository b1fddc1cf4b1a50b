//! Exercises the Streaming Adapter (spec.md §4.8) as a black box: the
//! synthesized path's fixed-character-budget chunking and the true-stream
//! path's SSE-to-chunk translation and disconnect handling.

use bytes::Bytes;
use fmproxy_core::model_table::Dialect;
use fmproxy_core::streaming::{synthesize_stream, true_stream, StreamingCapability, StreamingDetector};
use fmproxy_protocol::Usage;
use futures_util::StreamExt;
use tokio::sync::mpsc;

fn usage(total: u32) -> Usage {
    Usage {
        prompt_tokens: total / 2,
        completion_tokens: total - total / 2,
        total_tokens: total,
    }
}

#[tokio::test]
async fn synthesized_stream_chunks_forty_characters_into_at_least_four_deltas() {
    let text = "this response is exactly forty characters.".to_string();
    assert_eq!(text.chars().count(), 44);

    let chunks: Vec<_> = synthesize_stream(text, usage(12), 10).collect().await;
    let data_chunks: Vec<_> = chunks.iter().filter(|c| !c.finished).collect();

    assert!(data_chunks.len() >= 4, "expected >= 4 delta chunks, got {}", data_chunks.len());
    let terminal = chunks.last().unwrap();
    assert!(terminal.finished);
    assert_eq!(terminal.usage.as_ref().unwrap().total_tokens, 12);

    let reassembled: String = data_chunks.iter().map(|c| c.delta.as_str()).collect();
    assert_eq!(reassembled, "this response is exactly forty characters.");
}

#[tokio::test]
async fn true_stream_forwards_anthropic_deltas_and_aggregates_usage_until_done() {
    let (tx, rx) = mpsc::channel::<Bytes>(8);
    tokio::spawn(async move {
        let _ = tx
            .send(Bytes::from_static(
                b"event: message_start\ndata: {\"message\":{\"usage\":{\"input_tokens\":5,\"output_tokens\":0}}}\n\n",
            ))
            .await;
        let _ = tx
            .send(Bytes::from_static(
                b"event: content_block_delta\ndata: {\"delta\":{\"text\":\"red\"}}\n\n",
            ))
            .await;
        let _ = tx
            .send(Bytes::from_static(
                b"data: {\"delta\":{\"text\":\" fox\"}}\n\n",
            ))
            .await;
        let _ = tx
            .send(Bytes::from_static(
                b"event: message_delta\ndata: {\"usage\":{\"output_tokens\":3}}\n\n",
            ))
            .await;
        let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await;
    });

    let chunks: Vec<_> = true_stream(rx, Dialect::Anthropic).collect().await;
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].delta, "red");
    assert_eq!(chunks[1].delta, " fox");
    assert!(chunks[2].finished);
    let usage = chunks[2].usage.as_ref().unwrap();
    assert_eq!(usage.prompt_tokens, 5);
    assert_eq!(usage.completion_tokens, 3);
    assert_eq!(usage.total_tokens, 8);
}

#[tokio::test]
async fn true_stream_terminates_cleanly_when_upstream_closes_without_done() {
    let (tx, rx) = mpsc::channel::<Bytes>(8);
    tokio::spawn(async move {
        let _ = tx
            .send(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
            ))
            .await;
        // Upstream connection drops without a [DONE] sentinel.
    });

    let chunks: Vec<_> = true_stream(rx, Dialect::Openai).collect().await;
    assert_eq!(chunks.len(), 2, "must still emit a terminal chunk after upstream close");
    assert!(chunks.last().unwrap().finished);
}

#[tokio::test]
async fn dropping_the_client_stream_releases_the_upstream_receiver() {
    let (tx, rx) = mpsc::channel::<Bytes>(4);
    let stream = true_stream(rx, Dialect::Openai);
    drop(stream);

    // This first send unblocks the forwarding task's `upstream.recv()`;
    // parsing the delta then tries to write to the (now-dropped) internal
    // channel, which fails and makes the task return — dropping `upstream`
    // with it. This is the cancellation path spec.md §4.8 requires: the
    // client disconnecting promptly releases the upstream connection.
    let _ = tx
        .send(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
        ))
        .await;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let result = tx.send(Bytes::from_static(b"data: {}\n\n")).await;
    assert!(result.is_err(), "upstream receiver should have been dropped after the client disconnected");
}

#[test]
fn detector_prefers_direct_key_then_native_then_none() {
    let detector = StreamingDetector::new();

    assert_eq!(
        detector.probe("gemini-model", Dialect::Gemini, true, false),
        StreamingCapability::ViaUpstream
    );
    assert_eq!(
        detector.probe("gemini-model", Dialect::Gemini, true, true),
        StreamingCapability::Direct
    );
    assert_eq!(
        detector.probe("no-stream-model", Dialect::Openai, false, false),
        StreamingCapability::None
    );
}
