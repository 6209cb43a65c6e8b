//! Per-session tailer of an assistant's transcript file.
//!
//! Transcripts interleave JSON and non-JSON lines; only records with
//! `type == "assistant"` that the session's adapter can parse become
//! events. Repeated `requestId`s (streamed message revisions) are
//! suppressed.

use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use cab_tail::{LineTailer, TailEvent, TailerOptions};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapter::AgentAdapter;
use crate::events::{AgentEvent, ContentBlock, EventKind};

/// An assistant message attributed to a bridge session, sent to the
/// supervisor for broadcast.
#[derive(Debug, Clone)]
pub struct TranscriptUpdate {
    pub session_id: Uuid,
    pub event: AgentEvent,
}

/// A message is a preamble when it contains no tool invocations and every
/// text block is blank after trimming. Consumers may hide them.
pub fn is_preamble(content: &[ContentBlock]) -> bool {
    content.iter().all(|block| match block {
        ContentBlock::ToolUse { .. } => false,
        ContentBlock::Text { text } => text.trim().is_empty(),
        ContentBlock::Thinking { .. } => true,
    })
}

pub struct TranscriptReader {
    tailer: Option<LineTailer>,
    task: JoinHandle<()>,
}

impl TranscriptReader {
    /// Start tailing `path` from end-of-file on behalf of `session_id`.
    pub fn spawn(
        session_id: Uuid,
        agent_session_id: String,
        cwd: Option<String>,
        adapter: Arc<dyn AgentAdapter>,
        path: PathBuf,
        tx: mpsc::Sender<TranscriptUpdate>,
    ) -> Self {
        let (tailer, rx) = LineTailer::spawn(path, TailerOptions::default());
        let task = tokio::spawn(pump(session_id, agent_session_id, cwd, adapter, rx, tx));
        Self {
            tailer: Some(tailer),
            task,
        }
    }

    /// Stop the underlying tailer and await the pump's completion.
    pub async fn stop(mut self) {
        if let Some(tailer) = self.tailer.take() {
            tailer.stop();
        }
        let _ = self.task.await;
    }
}

async fn pump(
    session_id: Uuid,
    agent_session_id: String,
    cwd: Option<String>,
    adapter: Arc<dyn AgentAdapter>,
    mut rx: mpsc::Receiver<TailEvent>,
    tx: mpsc::Sender<TranscriptUpdate>,
) {
    let mut seen_request_ids: HashSet<String> = HashSet::new();

    while let Some(event) = rx.recv().await {
        match event {
            TailEvent::Line(line) => {
                let Some(message) = parse_line(&line, adapter.as_ref()) else {
                    continue;
                };
                if let Some(request_id) = &message.request_id {
                    if !seen_request_ids.insert(request_id.clone()) {
                        continue;
                    }
                }

                let preamble = is_preamble(&message.content);
                let mut event = AgentEvent::new(
                    adapter.name(),
                    EventKind::AssistantMessage {
                        content: message.content,
                        request_id: message.request_id,
                        is_preamble: preamble,
                    },
                );
                event.session_id = Some(session_id.to_string());
                event.agent_session_id = Some(agent_session_id.clone());
                event.cwd = cwd.clone();

                if tx.send(TranscriptUpdate { session_id, event }).await.is_err() {
                    return;
                }
            }
            TailEvent::Error(e) => {
                tracing::debug!(session = %session_id, error = %e, "transcript tailer error");
            }
            TailEvent::Ready => {}
            TailEvent::Closed => return,
        }
    }
}

fn parse_line(line: &str, adapter: &dyn AgentAdapter) -> Option<crate::adapter::TranscriptMessage> {
    // Transcripts may interleave non-JSON; those lines are silently skipped.
    let entry: Value = serde_json::from_str(line).ok()?;
    if entry.get("type").and_then(Value::as_str) != Some("assistant") {
        return None;
    }
    adapter.parse_transcript_entry(&entry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude::ClaudeAdapter;
    use std::io::Write;
    use std::time::Duration;

    fn assistant_line(request_id: &str, text: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "requestId": request_id,
            "message": {"content": [{"type": "text", "text": text}]},
        })
        .to_string()
    }

    // ── is_preamble ──────────────────────────────────────────────────

    #[test]
    fn preamble_when_all_text_blank() {
        let content = vec![
            ContentBlock::Text {
                text: "   ".to_string(),
            },
            ContentBlock::Text {
                text: "\n".to_string(),
            },
        ];
        assert!(is_preamble(&content));
    }

    #[test]
    fn preamble_allows_thinking_blocks() {
        let content = vec![
            ContentBlock::Thinking {
                text: "planning".to_string(),
            },
            ContentBlock::Text {
                text: "".to_string(),
            },
        ];
        assert!(is_preamble(&content));
    }

    #[test]
    fn not_preamble_with_real_text() {
        let content = vec![ContentBlock::Text {
            text: "here is the fix".to_string(),
        }];
        assert!(!is_preamble(&content));
    }

    #[test]
    fn not_preamble_with_tool_use() {
        let content = vec![ContentBlock::ToolUse {
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({}),
            tool_use_id: None,
        }];
        assert!(!is_preamble(&content));
    }

    #[test]
    fn empty_content_is_preamble() {
        assert!(is_preamble(&[]));
    }

    // ── parse_line ───────────────────────────────────────────────────

    #[test]
    fn parse_line_skips_non_json() {
        let adapter = ClaudeAdapter;
        assert!(parse_line("not json at all", &adapter).is_none());
    }

    #[test]
    fn parse_line_skips_non_assistant() {
        let adapter = ClaudeAdapter;
        let line = serde_json::json!({"type": "user", "message": {"content": []}}).to_string();
        assert!(parse_line(&line, &adapter).is_none());
    }

    #[test]
    fn parse_line_accepts_assistant() {
        let adapter = ClaudeAdapter;
        let line = assistant_line("req_1", "hello");
        let msg = parse_line(&line, &adapter).unwrap();
        assert_eq!(msg.request_id.as_deref(), Some("req_1"));
    }

    // ── live reader ──────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread")]
    async fn reader_emits_assistant_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let session_id = Uuid::new_v4();
        let reader = TranscriptReader::spawn(
            session_id,
            "A".to_string(),
            Some("/tmp/proj".to_string()),
            Arc::new(ClaudeAdapter),
            path.clone(),
            tx,
        );

        // Let the tailer record its starting offset before appending.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", assistant_line("req_1", "working on it")).unwrap();
        writeln!(file, "plain log line that is not json").unwrap();
        drop(file);

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(update.session_id, session_id);
        assert_eq!(update.event.agent, "claude");
        match &update.event.kind {
            EventKind::AssistantMessage {
                request_id,
                is_preamble,
                ..
            } => {
                assert_eq!(request_id.as_deref(), Some("req_1"));
                assert!(!is_preamble);
            }
            other => panic!("expected AssistantMessage, got {:?}", other),
        }

        reader.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_request_ids_are_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let reader = TranscriptReader::spawn(
            Uuid::new_v4(),
            "A".to_string(),
            None,
            Arc::new(ClaudeAdapter),
            path.clone(),
            tx,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", assistant_line("req_dup", "first")).unwrap();
        writeln!(file, "{}", assistant_line("req_dup", "second revision")).unwrap();
        writeln!(file, "{}", assistant_line("req_other", "different")).unwrap();
        drop(file);

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        let ids: Vec<_> = [&first, &second]
            .iter()
            .map(|u| match &u.event.kind {
                EventKind::AssistantMessage { request_id, .. } => {
                    request_id.clone().unwrap_or_default()
                }
                _ => String::new(),
            })
            .collect();
        assert_eq!(ids, vec!["req_dup", "req_other"]);

        // No third message should arrive.
        let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(extra.is_err(), "duplicate requestId was not suppressed");

        reader.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn preamble_messages_are_flagged_but_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let reader = TranscriptReader::spawn(
            Uuid::new_v4(),
            "A".to_string(),
            None,
            Arc::new(ClaudeAdapter),
            path.clone(),
            tx,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", assistant_line("req_blank", "   ")).unwrap();
        drop(file);

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            update.event.kind,
            EventKind::AssistantMessage {
                is_preamble: true,
                ..
            }
        ));

        reader.stop().await;
    }
}
