//! The streamer: a thin adapter turning a sub-process's stdout into
//! the `text_message_start` / `text_message_content` / `text_message_end`
//! triple the wire taxonomy expects. Exactly one start, zero or more
//! content chunks, one end, all sharing a `message_id` and `source`.

use agentctl_core::{Event, RunId};
use tokio::sync::mpsc;

pub const SOURCE: &str = "claude";

/// Emits the start/content*/end triple for one sub-process invocation's
/// stdout, identified by `message_id`. `chunks` is consumed in order;
/// returns once it's exhausted or the hub-bound channel closes.
pub async fn stream_output(
    run_id: RunId,
    message_id: String,
    mut chunks: mpsc::Receiver<String>,
    tx: mpsc::Sender<Event>,
) {
    if tx.send(Event::text_message_start(run_id.clone(), message_id.clone(), SOURCE)).await.is_err() {
        return;
    }

    while let Some(chunk) = chunks.recv().await {
        if chunk.is_empty() {
            continue;
        }
        if tx.send(Event::text_message_content(run_id.clone(), message_id.clone(), SOURCE, chunk)).await.is_err() {
            return;
        }
    }

    let _ = tx.send(Event::text_message_end(run_id, message_id, SOURCE)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentctl_core::EventType;

    #[tokio::test]
    async fn emits_start_then_content_then_end_in_order() {
        let run_id = RunId::new();
        let (chunk_tx, chunk_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);

        chunk_tx.send("hello ".to_string()).await.unwrap();
        chunk_tx.send("world".to_string()).await.unwrap();
        drop(chunk_tx);

        stream_output(run_id, "m1".to_string(), chunk_rx, event_tx).await;

        let start = event_rx.recv().await.unwrap();
        assert_eq!(start.event_type, EventType::TextMessageStart);
        let first = event_rx.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::TextMessageContent);
        assert_eq!(first.content.as_deref(), Some("hello "));
        let second = event_rx.recv().await.unwrap();
        assert_eq!(second.content.as_deref(), Some("world"));
        let end = event_rx.recv().await.unwrap();
        assert_eq!(end.event_type, EventType::TextMessageEnd);
        assert_eq!(end.complete, Some(true));
        assert!(event_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn empty_chunk_stream_still_emits_start_and_end() {
        let run_id = RunId::new();
        let (chunk_tx, chunk_rx) = mpsc::channel::<String>(1);
        drop(chunk_tx);
        let (event_tx, mut event_rx) = mpsc::channel(8);

        stream_output(run_id, "m2".to_string(), chunk_rx, event_tx).await;

        assert_eq!(event_rx.recv().await.unwrap().event_type, EventType::TextMessageStart);
        assert_eq!(event_rx.recv().await.unwrap().event_type, EventType::TextMessageEnd);
        assert!(event_rx.recv().await.is_none());
    }
}
