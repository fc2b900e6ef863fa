use std::time::Duration;

use bytes::Bytes;
use gemrelay_protocol::gemini::response::GenerateContentResponse;
use gemrelay_protocol::openai::stream::ChatCompletionChunk;
use gemrelay_protocol::sse::SseScanner;
use gemrelay_transform::response::to_chat_completion;
use gemrelay_transform::stream::StreamState;
use serde_json::{Value as JsonValue, json};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ProxyError;
use crate::orchestrator::{
    CallMode, CallSuccess, Orchestrator, RequestContext, completion_id, now_unix,
};

pub(crate) const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Reassembles the upstream SSE byte stream, maps each event through the
/// stream translator, and emits client frames. The `[DONE]` sentinel is
/// always appended exactly once.
pub fn pump(mut upstream: mpsc::Receiver<Bytes>, mut state: StreamState) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut scanner = SseScanner::new();
        while let Some(bytes) = upstream.recv().await {
            for payload in scanner.push_bytes(&bytes) {
                if forward_event(&tx, &mut state, &payload).await.is_err() {
                    return;
                }
            }
        }
        if let Some(payload) = scanner.finish()
            && forward_event(&tx, &mut state, &payload).await.is_err()
        {
            return;
        }
        if let Some(chunk) = state.finalize()
            && send_chunk(&tx, &chunk).await.is_err()
        {
            return;
        }
        let _ = tx.send(Bytes::from_static(DONE_FRAME)).await;
    });
    rx
}

async fn forward_event(
    tx: &mpsc::Sender<Bytes>,
    state: &mut StreamState,
    payload: &str,
) -> Result<(), ()> {
    if payload.trim() == "[DONE]" {
        return Ok(());
    }
    match serde_json::from_str::<GenerateContentResponse>(payload) {
        Ok(event) => {
            if let Some(chunk) = state.next_chunk(&event) {
                return send_chunk(tx, &chunk).await;
            }
            Ok(())
        }
        Err(err) => {
            warn!(event = "stream_event_unparsable", error = %err);
            Ok(())
        }
    }
}

/// Keepalive mode: one buffered upstream call behind an immediately-started
/// heartbeat ticker, collapsed into a single full-answer delta at the end.
/// Both exits drop the ticker before the stream closes.
pub(crate) fn keepalive(orchestrator: Orchestrator, ctx: RequestContext) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let id = completion_id();
        let created = now_unix();
        let mut state = StreamState::new(id.clone(), ctx.model.clone(), created);

        let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
        ticker.tick().await;
        if send_chunk(&tx, &state.heartbeat()).await.is_err() {
            return;
        }

        let call = orchestrator.call_with_retries(&ctx, CallMode::Buffered { retry_empty: true });
        tokio::pin!(call);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if send_chunk(&tx, &state.heartbeat()).await.is_err() {
                        return;
                    }
                }
                result = &mut call => {
                    match result {
                        Ok(CallSuccess::Buffered(response)) => {
                            let completion =
                                to_chat_completion(&response, id, &ctx.model, created);
                            let chunk = state.chunk_from_completion(&completion);
                            if send_chunk(&tx, &chunk).await.is_err() {
                                return;
                            }
                        }
                        Ok(CallSuccess::Streaming(_)) => {
                            warn!(event = "keepalive_unexpected_stream");
                        }
                        Err(error) => {
                            if tx.send(error_frame(&error)).await.is_err() {
                                return;
                            }
                        }
                    }
                    break;
                }
            }
        }
        let _ = tx.send(Bytes::from_static(DONE_FRAME)).await;
    });
    rx
}

async fn send_chunk(tx: &mpsc::Sender<Bytes>, chunk: &ChatCompletionChunk) -> Result<(), ()> {
    let frame = match serde_json::to_string(chunk) {
        Ok(encoded) => Bytes::from(format!("data: {encoded}\n\n")),
        Err(err) => {
            warn!(event = "chunk_encode_failed", error = %err);
            return Ok(());
        }
    };
    tx.send(frame).await.map_err(|_| ())
}

/// Errors inside an already-started stream travel as one compact data line.
/// Upstream bodies can be pretty-printed, so re-encode before framing.
fn error_frame(error: &ProxyError) -> Bytes {
    let body = error.to_body();
    let value: JsonValue = serde_json::from_slice(&body).unwrap_or_else(|_| {
        json!({
            "error": {
                "message": String::from_utf8_lossy(&body),
                "type": error.error_type(),
            }
        })
    });
    Bytes::from(format!("data: {value}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(bytes) = rx.recv().await {
            frames.push(String::from_utf8(bytes.to_vec()).unwrap());
        }
        frames
    }

    fn feed(chunks: Vec<&'static str>) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Bytes::from_static(chunk.as_bytes())).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    fn state() -> StreamState {
        StreamState::new("chatcmpl-t".to_owned(), "gemini-2.5-flash".to_owned(), 1)
    }

    const EVENTS: &str = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}],\"role\":\"model\"}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}\n\n",
    );

    #[tokio::test]
    async fn split_chunks_match_single_chunk_delivery() {
        let whole = collect(pump(feed(vec![EVENTS]), state())).await;

        // Split at awkward byte positions, including mid-token.
        let (a, rest) = EVENTS.split_at(7);
        let (b, c) = rest.split_at(55);
        let split = collect(pump(feed(vec![a, b, c]), state())).await;

        assert_eq!(whole, split);
        assert_eq!(whole.last().unwrap(), "data: [DONE]\n\n");
        assert!(whole[0].contains("\"content\":\"Hel\""));
        assert!(whole[1].contains("\"finish_reason\":\"stop\""));
    }

    #[tokio::test]
    async fn done_sentinel_is_appended_once_even_if_upstream_sent_it() {
        let frames = collect(pump(
            feed(vec![EVENTS, "data: [DONE]\n\n"]),
            state(),
        ))
        .await;
        let done_count = frames
            .iter()
            .filter(|frame| frame.contains("[DONE]"))
            .count();
        assert_eq!(done_count, 1);
    }

    #[tokio::test]
    async fn missing_finish_is_synthesized() {
        let frames = collect(pump(
            feed(vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}],\"role\":\"model\"}}]}\n\n",
            ]),
            state(),
        ))
        .await;
        assert!(frames[frames.len() - 2].contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn unparsable_events_are_skipped() {
        let frames = collect(pump(
            feed(vec!["data: not-json\n\n", EVENTS]),
            state(),
        ))
        .await;
        assert!(frames[0].contains("\"content\":\"Hel\""));
    }

    #[tokio::test]
    async fn unterminated_final_event_is_flushed() {
        let frames = collect(pump(
            feed(vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"tail\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}",
            ]),
            state(),
        ))
        .await;
        assert!(frames[0].contains("\"content\":\"tail\""));
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }
}
