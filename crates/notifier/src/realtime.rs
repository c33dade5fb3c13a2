//! Supabase Realtime feed (Phoenix channels over WebSocket).
//!
//! Joins one channel with a `postgres_changes` filter for INSERTs on the
//! messages table and translates Phoenix frames into `FeedEvent`s:
//!
//! - `phx_reply` to our join with `ok`: `Subscribed`
//! - `phx_reply` error, `phx_error`, `system` error: `ChannelError`
//! - `phx_close` or socket close: `Closed`
//! - `postgres_changes` INSERT: `Insert(Message)`
//!
//! The server drops sockets that stop sending heartbeats, so the stream
//! emits one on a fixed interval while it is being polled. A heartbeat still
//! unanswered when the next one is due means the connection is dead, and the
//! stream ends with `ChannelError`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use webglow_common::types::Message;

use crate::error::NotifierError;
use crate::feed::{ChannelStatus, FeedEvent, FeedStream, MessageFeed};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_REF: &str = "1";

/// Insert feed for `public.messages`.
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    url: String,
    access_token: String,
    channel: String,
    schema: String,
    table: String,
    join_timeout: Duration,
    heartbeat_interval: Duration,
}

impl RealtimeFeed {
    pub fn new(url: String, access_token: String, join_timeout: Duration) -> Self {
        Self {
            url,
            access_token,
            channel: "messages-channel".to_string(),
            schema: "public".to_string(),
            table: "messages".to_string(),
            join_timeout,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    fn topic(&self) -> String {
        format!("realtime:{}", self.channel)
    }

    fn join_frame(&self) -> Value {
        json!({
            "topic": self.topic(),
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": self.schema,
                        "table": self.table,
                    }],
                    "private": false,
                },
                "access_token": self.access_token,
            },
            "ref": JOIN_REF,
            "join_ref": JOIN_REF,
        })
    }
}

#[async_trait]
impl MessageFeed for RealtimeFeed {
    async fn subscribe(&self) -> Result<Box<dyn FeedStream>, NotifierError> {
        let (mut ws, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| NotifierError::Feed(format!("WebSocket connection failed: {}", e)))?;
        tracing::debug!(status = %response.status(), "Realtime socket connected");

        ws.send(WsMessage::Text(self.join_frame().to_string()))
            .await
            .map_err(|e| NotifierError::Feed(format!("Failed to send join: {}", e)))?;

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(RealtimeStream {
            ws,
            topic: self.topic(),
            next_ref: 2,
            heartbeat,
            pending_heartbeat: PendingHeartbeat::default(),
            join_deadline: Some(Instant::now() + self.join_timeout),
            closed: false,
        }))
    }
}

struct RealtimeStream {
    ws: WsStream,
    topic: String,
    next_ref: u64,
    heartbeat: Interval,
    pending_heartbeat: PendingHeartbeat,
    join_deadline: Option<Instant>,
    closed: bool,
}

/// Ref of the last heartbeat the server has not replied to yet.
#[derive(Debug, Default)]
struct PendingHeartbeat(Option<String>);

impl PendingHeartbeat {
    /// Record a new heartbeat. Returns `false`, leaving the old one in place,
    /// when the previous heartbeat is still unanswered.
    fn start(&mut self, reference: String) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(reference);
        true
    }

    fn acknowledge(&mut self, reference: &str) {
        if self.0.as_deref() == Some(reference) {
            self.0 = None;
        }
    }
}

impl RealtimeStream {
    fn take_ref(&mut self) -> String {
        let r = self.next_ref;
        self.next_ref += 1;
        r.to_string()
    }

    async fn send_frame(&mut self, frame: Value) -> Result<(), String> {
        self.ws
            .send(WsMessage::Text(frame.to_string()))
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl FeedStream for RealtimeStream {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            if self.closed {
                return None;
            }

            let deadline = self.join_deadline;
            let join_timer = async move {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.heartbeat.tick() => {
                    let reference = self.take_ref();
                    if !self.pending_heartbeat.start(reference.clone()) {
                        tracing::warn!("Heartbeat unanswered, dropping realtime connection");
                        self.closed = true;
                        return Some(FeedEvent::error(ChannelStatus::ChannelError, "heartbeat timeout"));
                    }
                    let frame = json!({
                        "topic": "phoenix",
                        "event": "heartbeat",
                        "payload": {},
                        "ref": reference,
                    });
                    if let Err(e) = self.send_frame(frame).await {
                        self.closed = true;
                        return Some(FeedEvent::error(
                            ChannelStatus::ChannelError,
                            format!("heartbeat failed: {}", e),
                        ));
                    }
                }
                _ = join_timer => {
                    self.join_deadline = None;
                    return Some(FeedEvent::error(ChannelStatus::ChannelError, "join timed out"));
                }
                frame = self.ws.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        tracing::trace!(frame = %text, "Realtime frame");
                        if let Some(frame) = PhoenixFrame::parse(&text) {
                            if let Some(reference) = frame.heartbeat_reply() {
                                self.pending_heartbeat.acknowledge(reference);
                            } else if let Some(event) = frame.into_event(&self.topic) {
                                if matches!(event, FeedEvent::Status { .. }) {
                                    self.join_deadline = None;
                                }
                                return Some(event);
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        self.closed = true;
                        let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        return Some(FeedEvent::Status { status: ChannelStatus::Closed, error: reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.closed = true;
                        return Some(FeedEvent::error(ChannelStatus::ChannelError, e.to_string()));
                    }
                    None => {
                        self.closed = true;
                        return None;
                    }
                },
            }
        }
    }

    async fn unsubscribe(self: Box<Self>) {
        let mut stream = self;
        if !stream.closed {
            let leave = json!({
                "topic": stream.topic.clone(),
                "event": "phx_leave",
                "payload": {},
                "ref": stream.take_ref(),
            });
            if let Err(e) = stream.send_frame(leave).await {
                tracing::debug!(error = %e, "Failed to send phx_leave");
            }
        }
        if let Err(e) = stream.ws.close(None).await {
            tracing::debug!(error = %e, "Realtime socket close failed");
        }
    }
}

#[derive(Debug, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Value,
}

impl PhoenixFrame {
    fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable realtime frame");
                None
            }
        }
    }

    /// Ref of the heartbeat this frame answers, if it is a heartbeat reply.
    fn heartbeat_reply(&self) -> Option<&str> {
        if self.topic == "phoenix" && self.event == "phx_reply" {
            self.reference.as_str()
        } else {
            None
        }
    }

    /// Translate the frame into a feed event.
    ///
    /// Frames for other topics, presence traffic and non-INSERT changes
    /// yield `None`.
    fn into_event(&self, topic: &str) -> Option<FeedEvent> {
        if self.topic != topic {
            return None;
        }

        match self.event.as_str() {
            "phx_reply" => {
                if self.reference.as_str() != Some(JOIN_REF) {
                    return None;
                }
                if self.payload.get("status").and_then(Value::as_str) == Some("ok") {
                    Some(FeedEvent::status(ChannelStatus::Subscribed))
                } else {
                    let reason = self
                        .payload
                        .pointer("/response/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("join rejected");
                    Some(FeedEvent::error(ChannelStatus::ChannelError, reason))
                }
            }
            "phx_error" => Some(FeedEvent::error(
                ChannelStatus::ChannelError,
                self.payload.to_string(),
            )),
            "phx_close" => Some(FeedEvent::status(ChannelStatus::Closed)),
            "system" => {
                let message = self
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if self.payload.get("status").and_then(Value::as_str) == Some("error") {
                    Some(FeedEvent::error(ChannelStatus::ChannelError, message))
                } else {
                    Some(FeedEvent::error(ChannelStatus::Other("SYSTEM".to_string()), message))
                }
            }
            "postgres_changes" => {
                let data = self.payload.get("data")?;
                let change = data
                    .get("type")
                    .or_else(|| data.get("eventType"))
                    .and_then(Value::as_str);
                if change != Some("INSERT") {
                    return None;
                }
                let record = data.get("record").or_else(|| data.get("new"))?;
                match serde_json::from_value::<Message>(record.clone()) {
                    Ok(message) => Some(FeedEvent::Insert(message)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed message record in insert event");
                        None
                    }
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const TOPIC: &str = "realtime:messages-channel";

    fn interpret(text: &str) -> Option<FeedEvent> {
        PhoenixFrame::parse(text)?.into_event(TOPIC)
    }

    #[test]
    fn test_join_reply_ok_is_subscribed() {
        let text = r#"{"topic":"realtime:messages-channel","event":"phx_reply","payload":{"status":"ok","response":{"postgres_changes":[{"id":1,"event":"INSERT","schema":"public","table":"messages"}]}},"ref":"1"}"#;
        assert_eq!(
            interpret(text),
            Some(FeedEvent::status(ChannelStatus::Subscribed))
        );
    }

    #[test]
    fn test_join_reply_error_is_channel_error() {
        let text = r#"{"topic":"realtime:messages-channel","event":"phx_reply","payload":{"status":"error","response":{"reason":"Invalid JWT"}},"ref":"1"}"#;
        assert_eq!(
            interpret(text),
            Some(FeedEvent::error(ChannelStatus::ChannelError, "Invalid JWT"))
        );
    }

    #[test]
    fn test_heartbeat_reply_is_not_a_feed_event() {
        let text = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"7"}"#;
        assert_eq!(interpret(text), None);
        let frame = PhoenixFrame::parse(text).unwrap();
        assert_eq!(frame.heartbeat_reply(), Some("7"));

        let join_reply = r#"{"topic":"realtime:messages-channel","event":"phx_reply","payload":{"status":"ok"},"ref":"1"}"#;
        assert_eq!(PhoenixFrame::parse(join_reply).unwrap().heartbeat_reply(), None);
    }

    #[test]
    fn test_unanswered_heartbeat_blocks_the_next() {
        let mut pending = PendingHeartbeat::default();
        assert!(pending.start("2".to_string()));
        assert!(!pending.start("3".to_string()));

        // a reply to some other ref does not count
        pending.acknowledge("3");
        assert!(!pending.start("4".to_string()));

        pending.acknowledge("2");
        assert!(pending.start("5".to_string()));
    }

    #[test]
    fn test_close_and_error_frames() {
        let close = r#"{"topic":"realtime:messages-channel","event":"phx_close","payload":{},"ref":null}"#;
        assert_eq!(
            interpret(close),
            Some(FeedEvent::status(ChannelStatus::Closed))
        );

        let error = r#"{"topic":"realtime:messages-channel","event":"phx_error","payload":{},"ref":null}"#;
        assert!(matches!(
            interpret(error),
            Some(FeedEvent::Status { status: ChannelStatus::ChannelError, .. })
        ));
    }

    #[test]
    fn test_system_ok_is_other_status() {
        let text = r#"{"topic":"realtime:messages-channel","event":"system","payload":{"status":"ok","message":"Subscribed to PostgreSQL","extension":"postgres_changes"},"ref":null}"#;
        assert_eq!(
            interpret(text),
            Some(FeedEvent::error(
                ChannelStatus::Other("SYSTEM".to_string()),
                "Subscribed to PostgreSQL"
            ))
        );
    }

    #[test]
    fn test_insert_event_parsed() {
        let id = Uuid::new_v4();
        let text = json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "messages",
                    "commit_timestamp": "2025-03-01T10:15:30Z",
                    "type": "INSERT",
                    "record": {
                        "id": id,
                        "conversation_id": Uuid::new_v4(),
                        "sender_id": Uuid::new_v4(),
                        "text": "hello",
                        "media_type": null,
                        "file_name": null,
                        "created_at": "2025-03-01T10:15:30.5+00:00"
                    },
                    "errors": null
                }
            },
            "ref": null
        })
        .to_string();

        match interpret(&text) {
            Some(FeedEvent::Insert(message)) => {
                assert_eq!(message.id, id);
                assert_eq!(message.text.as_deref(), Some("hello"));
            }
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_update_event_ignored() {
        let text = json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": { "data": { "type": "UPDATE", "record": {} } },
            "ref": null
        })
        .to_string();
        assert_eq!(interpret(&text), None);
    }

    #[test]
    fn test_malformed_record_dropped() {
        let text = json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": { "data": { "type": "INSERT", "record": { "id": "not-a-uuid" } } },
            "ref": null
        })
        .to_string();
        assert_eq!(interpret(&text), None);
    }

    /// Local Phoenix endpoint that accepts the join and then either answers
    /// heartbeats or silently swallows every frame. Resolves to the number of
    /// heartbeats it received.
    async fn spawn_endpoint(answer_heartbeats: bool) -> (String, tokio::task::JoinHandle<usize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let join = ws.next().await.unwrap().unwrap();
            assert!(join.to_text().unwrap().contains("phx_join"));
            let reply = json!({
                "topic": TOPIC,
                "event": "phx_reply",
                "payload": { "status": "ok", "response": {} },
                "ref": JOIN_REF,
            });
            ws.send(WsMessage::Text(reply.to_string())).await.unwrap();

            let mut heartbeats = 0;
            while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                let frame: Value = serde_json::from_str(&text).unwrap();
                if frame["event"] != "heartbeat" {
                    continue;
                }
                heartbeats += 1;
                if answer_heartbeats {
                    let ack = json!({
                        "topic": "phoenix",
                        "event": "phx_reply",
                        "payload": { "status": "ok", "response": {} },
                        "ref": frame["ref"],
                    });
                    if ws.send(WsMessage::Text(ack.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            heartbeats
        });

        (url, server)
    }

    fn fast_heartbeat_feed(url: String) -> RealtimeFeed {
        RealtimeFeed::new(url, "key".to_string(), Duration::from_secs(5))
            .with_heartbeat_interval(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_silent_connection_ends_with_heartbeat_timeout() {
        let (url, server) = spawn_endpoint(false).await;
        let mut stream = fast_heartbeat_feed(url).subscribe().await.unwrap();
        let limit = Duration::from_secs(5);

        let first = tokio::time::timeout(limit, stream.next_event()).await.unwrap();
        assert_eq!(first, Some(FeedEvent::status(ChannelStatus::Subscribed)));

        let second = tokio::time::timeout(limit, stream.next_event()).await.unwrap();
        assert_eq!(
            second,
            Some(FeedEvent::error(ChannelStatus::ChannelError, "heartbeat timeout"))
        );

        let third = tokio::time::timeout(limit, stream.next_event()).await.unwrap();
        assert_eq!(third, None);

        stream.unsubscribe().await;
        assert_eq!(server.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_answered_heartbeats_keep_connection_open() {
        let (url, server) = spawn_endpoint(true).await;
        let mut stream = fast_heartbeat_feed(url).subscribe().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), stream.next_event())
            .await
            .unwrap();
        assert_eq!(first, Some(FeedEvent::status(ChannelStatus::Subscribed)));

        // Several heartbeat intervals pass without any event.
        let quiet = tokio::time::timeout(Duration::from_millis(400), stream.next_event()).await;
        assert!(quiet.is_err(), "unexpected event: {:?}", quiet);

        stream.unsubscribe().await;
        assert!(server.await.unwrap() >= 3);
    }

    #[test]
    fn test_join_frame_shape() {
        let feed = RealtimeFeed::new(
            "wss://abc.supabase.co/realtime/v1/websocket".to_string(),
            "key".to_string(),
            Duration::from_secs(10),
        );
        let frame = feed.join_frame();
        assert_eq!(frame["topic"], TOPIC);
        assert_eq!(frame["event"], "phx_join");
        assert_eq!(frame["payload"]["config"]["postgres_changes"][0]["event"], "INSERT");
        assert_eq!(frame["payload"]["config"]["postgres_changes"][0]["table"], "messages");
        assert_eq!(frame["payload"]["access_token"], "key");
    }
}
