//! Just enough of the Realtime (Phoenix channels) protocol to receive `INSERT`s on one table.

use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::backend::BackendError;
use crate::data_model::Message;
use crate::supabase::SupabaseConfig;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// `https://abc.supabase.co` -> `wss://abc.supabase.co/realtime/v1/websocket?apikey=...&vsn=1.0.0`
pub fn websocket_url(supabase_url: &str, anon_key: &str) -> String {
    let base = supabase_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

#[derive(Debug)]
pub(crate) enum Inbound {
    Insert(Message),
    Ignored,
    Failed(String),
    Closed,
}

pub(crate) fn classify(frame: &Frame) -> Inbound {
    match frame.event.as_str() {
        "postgres_changes" => {
            let record = &frame.payload["data"]["record"];
            match serde_json::from_value::<Message>(record.clone()) {
                Ok(message) => Inbound::Insert(message),
                Err(e) => Inbound::Failed(format!("Undecodable record `{record}`: {e}")),
            }
        }
        "phx_reply" if frame.payload["status"] == "error" => {
            Inbound::Failed(frame.payload["response"].to_string())
        }
        "system" if frame.payload["status"] == "error" => {
            Inbound::Failed(frame.payload["message"].to_string())
        }
        "phx_error" => Inbound::Failed(frame.payload.to_string()),
        "phx_close" => Inbound::Closed,
        _ => Inbound::Ignored,
    }
}

pub(crate) struct RealtimeChannel {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    topic: String,
    heartbeat: Interval,
    next_ref: u64,
}

impl RealtimeChannel {
    pub async fn join(
        config: &SupabaseConfig,
        access_token: &str,
        table: &str,
    ) -> Result<Self, BackendError> {
        let url = websocket_url(&config.supabase_url, &config.supabase_anon_key);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BackendError::Transport(format!("{e:?}")))?;

        let mut channel = Self {
            socket,
            topic: format!("realtime:public:{table}"),
            heartbeat: tokio::time::interval_at(
                Instant::now() + HEARTBEAT_INTERVAL,
                HEARTBEAT_INTERVAL,
            ),
            next_ref: 0,
        };

        let topic = channel.topic.clone();
        channel
            .send(
                topic,
                "phx_join",
                json!({
                    "config": {
                        "broadcast": { "ack": false, "self": false },
                        "presence": { "key": "" },
                        "postgres_changes": [
                            { "event": "INSERT", "schema": "public", "table": table }
                        ],
                        "private": false
                    },
                    "access_token": access_token
                }),
            )
            .await?;

        log::info!("Joined {}", channel.topic);
        Ok(channel)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Message, BackendError>> {
        futures::stream::unfold(self, |mut channel| async move {
            let next = channel.next_insert().await?;
            Some((next, channel))
        })
    }

    /// Wait for the next inserted row, sending heartbeats while idle. `None` once the socket is closed.
    async fn next_insert(&mut self) -> Option<Result<Message, BackendError>> {
        loop {
            tokio::select! {
                _ = self.heartbeat.tick() => {
                    if let Err(e) = self.send("phoenix".to_string(), "heartbeat", json!({})).await {
                        return Some(Err(e));
                    }
                }
                incoming = self.socket.next() => {
                    let text = match incoming? {
                        Ok(WsMessage::Text(text)) => text,
                        Ok(WsMessage::Close(_)) => return None,
                        Ok(_) => continue,
                        Err(e) => return Some(Err(BackendError::Transport(format!("{e:?}")))),
                    };

                    let frame: Frame = match serde_json::from_str(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => return Some(Err(e.into())),
                    };
                    if frame.topic != self.topic {
                        continue;
                    }
                    match classify(&frame) {
                        Inbound::Insert(message) => return Some(Ok(message)),
                        Inbound::Ignored => continue,
                        Inbound::Failed(reason) => return Some(Err(BackendError::Rejected(reason))),
                        Inbound::Closed => {
                            log::info!("{} closed by server", self.topic);
                            return None;
                        }
                    }
                }
            }
        }
    }

    async fn send(
        &mut self,
        topic: String,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), BackendError> {
        self.next_ref += 1;
        let frame = Frame {
            topic,
            event: event.to_string(),
            payload,
            reference: Some(self.next_ref.to_string()),
        };
        let text = serde_json::to_string(&frame)?;
        self.socket
            .send(WsMessage::text(text))
            .await
            .map_err(|e| BackendError::Transport(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(raw: &str) -> Frame {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("https://abc.supabase.co/", "key"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        assert_eq!(
            websocket_url("http://localhost:54321", "key"),
            "ws://localhost:54321/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
    }

    #[test]
    fn test_insert_frame() {
        let raw = r#"{
            "topic": "realtime:public:messages",
            "event": "postgres_changes",
            "payload": {
                "ids": [123],
                "data": {
                    "type": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "commit_timestamp": "2024-05-01T12:00:00.000Z",
                    "errors": null,
                    "record": {"id": 5, "owner": "bob", "body": "yo", "created_at": "2024-05-01T12:00:00+00:00"}
                }
            },
            "ref": null
        }"#;
        match classify(&frame(raw)) {
            Inbound::Insert(message) => {
                assert_eq!(message.id.as_deref(), Some("5"));
                assert_eq!(message.owner, "bob");
                assert_eq!(message.body, "yo");
                assert!(message.created_at.is_some());
            }
            other => panic!("expected an insert, got {other:?}"),
        }
    }

    #[test]
    fn test_join_error_reply() {
        let raw = r#"{"topic": "realtime:public:messages", "event": "phx_reply", "payload": {"status": "error", "response": {"reason": "unauthorized"}}, "ref": "1"}"#;
        assert!(matches!(classify(&frame(raw)), Inbound::Failed(reason) if reason.contains("unauthorized")));
    }

    #[test]
    fn test_ok_reply_and_presence_are_ignored() {
        let reply = r#"{"topic": "realtime:public:messages", "event": "phx_reply", "payload": {"status": "ok", "response": {}}, "ref": "1"}"#;
        assert!(matches!(classify(&frame(reply)), Inbound::Ignored));

        let presence = r#"{"topic": "realtime:public:messages", "event": "presence_state", "payload": {}}"#;
        assert!(matches!(classify(&frame(presence)), Inbound::Ignored));
    }

    #[test]
    fn test_close_frame() {
        let raw = r#"{"topic": "realtime:public:messages", "event": "phx_close", "payload": {}, "ref": "1"}"#;
        assert!(matches!(classify(&frame(raw)), Inbound::Closed));
    }

    #[test]
    fn test_undecodable_record() {
        let raw = r#"{"topic": "realtime:public:messages", "event": "postgres_changes", "payload": {"data": {"record": {"owner": "bob"}}}}"#;
        assert!(matches!(classify(&frame(raw)), Inbound::Failed(_)));
    }
}
