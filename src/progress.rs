//! Progress streaming for long-running operations
//!
//! Installs and removals report each step as one JSON line. Failures use
//! `{"status": "error", "data": {"message", "name", "code"}}`; the stream ends
//! with exactly one terminal `success` or `error` line.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// A single progress line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProgressMessage {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            data: None,
        }
    }

    pub fn with_data(status: impl Into<String>, data: Value) -> Self {
        Self {
            status: status.into(),
            data: Some(data),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_data("success", Value::String(message.into()))
    }

    pub fn error(message: impl Into<String>, name: impl Into<String>, code: Option<u16>) -> Self {
        Self::with_data(
            "error",
            json!({
                "message": message.into(),
                "name": name.into(),
                "code": code,
            }),
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status == "success" || self.status == "error"
    }

    /// Serialize as one NDJSON line (newline included)
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","data":{"message":"unserializable progress"}}"#.to_string()
        });
        line.push('\n');
        line
    }
}

/// Sending half of a progress stream; a detached sender drops every message
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressMessage>>,
}

impl ProgressSender {
    /// Sender that discards progress (background removals)
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, message: ProgressMessage) {
        debug!("progress: {}", message.status);
        if let Some(tx) = &self.tx {
            // receiver gone means the caller disconnected; keep working
            let _ = tx.send(message);
        }
    }

    pub fn status(&self, status: impl Into<String>) {
        self.send(ProgressMessage::status(status));
    }
}

/// Create a progress stream
pub fn channel() -> (ProgressSender, mpsc::UnboundedReceiver<ProgressMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_shape() {
        let msg = ProgressMessage::error("Insufficient RAM", "AdmissionError", None);
        let value: Value = serde_json::from_str(msg.to_line().trim()).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["data"]["message"], "Insufficient RAM");
        assert_eq!(value["data"]["name"], "AdmissionError");
        assert!(msg.is_terminal());
    }

    #[test]
    fn test_status_line_omits_data() {
        let line = ProgressMessage::status("Pulling image").to_line();
        assert_eq!(line, "{\"status\":\"Pulling image\"}\n");
        assert!(!ProgressMessage::status("Pulling image").is_terminal());
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (tx, mut rx) = channel();
        tx.status("one");
        tx.send(ProgressMessage::success("done"));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().status, "one");
        assert_eq!(rx.recv().await.unwrap().status, "success");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_detached_sender_is_silent() {
        let tx = ProgressSender::detached();
        tx.status("ignored");
    }
}
