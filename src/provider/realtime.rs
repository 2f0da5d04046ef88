//! Realtime Channel Client
//!
//! Joins a Phoenix channel on the backend's realtime websocket and turns
//! `postgres_changes` messages into [`ChangeEvent`]s.
//!
//! ## Wire format
//!
//! Every frame is a JSON object:
//!
//! ```json
//! {"topic": "realtime:public:bookmarks:user=u1", "event": "phx_join",
//!  "payload": {...}, "ref": "1", "join_ref": "1"}
//! ```
//!
//! The server pushes changes as `postgres_changes` with
//! `payload.data.type` one of `INSERT`, `UPDATE`, `DELETE`.

use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};

use super::error::{ProviderError, ProviderResult};
use crate::bookmarks::{BookmarkRecord, ChangeEvent, BOOKMARKS_TABLE};

/// How long the server has to acknowledge a join
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A single Phoenix protocol frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    /// Join request for a bookmarks channel filtered to `owner`
    pub fn join(topic: &str, owner: &str, access_token: Option<&str>, msg_ref: u64) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": BOOKMARKS_TABLE,
                    "filter": format!("user_id=eq.{}", owner),
                }],
            },
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }

        let mut msg = Self::new(topic, "phx_join", payload, msg_ref);
        msg.join_ref = msg.msg_ref.clone();
        msg
    }

    /// Keepalive frame
    pub fn heartbeat(msg_ref: u64) -> Self {
        Self::new("phoenix", "heartbeat", json!({}), msg_ref)
    }

    /// Leave request for `topic`
    pub fn leave(topic: &str, msg_ref: u64) -> Self {
        Self::new(topic, "phx_leave", json!({}), msg_ref)
    }

    /// Whether this is an error reply from the server
    fn is_error_reply(&self) -> bool {
        self.event == "phx_error"
            || (self.event == "phx_reply"
                && self.payload.get("status").and_then(Value::as_str) == Some("error"))
    }
}

/// Decode a `postgres_changes` payload into a change event.
///
/// Returns `Ok(None)` for change types that do not affect the list.
pub fn decode_change(payload: &Value) -> ProviderResult<Option<ChangeEvent>> {
    let data = payload.get("data").unwrap_or(payload);

    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Decode("change payload has no type".to_string()))?;

    let event = match kind {
        "INSERT" => ChangeEvent::Inserted(record_field(data, "record")?),
        "UPDATE" => ChangeEvent::Updated(record_field(data, "record")?),
        "DELETE" => {
            let id = data
                .get("old_record")
                .and_then(|old| old.get("id"))
                .and_then(id_string)
                .ok_or_else(|| ProviderError::Decode("delete payload has no id".to_string()))?;
            ChangeEvent::Deleted { id }
        }
        other => {
            tracing::debug!(change_type = %other, "Ignoring change type");
            return Ok(None);
        }
    };

    Ok(Some(event))
}

fn record_field(data: &Value, field: &str) -> ProviderResult<BookmarkRecord> {
    let value = data
        .get(field)
        .cloned()
        .ok_or_else(|| ProviderError::Decode(format!("change payload has no {}", field)))?;
    Ok(serde_json::from_value(value)?)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A joined realtime channel
///
/// Dropping the channel without calling [`leave`](Self::leave) still stops
/// the background task, but skips the polite `phx_leave`.
pub struct RealtimeChannel {
    topic: String,
    leave_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    /// Connect to `ws_url`, join `topic` and start forwarding changes.
    ///
    /// Fails with [`ProviderError::Realtime`] if the server rejects the join
    /// or does not answer within [`JOIN_TIMEOUT`].
    pub async fn join(
        ws_url: &str,
        topic: String,
        owner: &str,
        access_token: Option<&str>,
        heartbeat: Duration,
    ) -> ProviderResult<(Self, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let (stream, _) = connect_async(ws_url).await?;
        let (mut sink, mut source) = stream.split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let join_ref: u64 = 1;
        let join = PhoenixMessage::join(&topic, owner, access_token, join_ref);
        sink.send(Message::Text(serde_json::to_string(&join)?))
            .await?;
        let mut next_ref = join_ref + 1;

        tokio::time::timeout(
            JOIN_TIMEOUT,
            await_join_reply(&mut source, &topic, join_ref, &events_tx),
        )
        .await
        .map_err(|_| ProviderError::realtime(format!("no reply to join on {}", topic)))??;

        tracing::info!(topic = %topic, "Joined realtime channel");

        let (leave_tx, mut leave_rx) = oneshot::channel::<()>();
        let task_topic = topic.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let frame = PhoenixMessage::heartbeat(next_ref);
                        next_ref += 1;
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            tracing::warn!(topic = %task_topic, "Heartbeat failed, closing channel");
                            break;
                        }
                    }
                    _ = &mut leave_rx => {
                        let frame = PhoenixMessage::leave(&task_topic, next_ref);
                        if let Ok(text) = serde_json::to_string(&frame) {
                            let _ = sink.send(Message::Text(text)).await;
                        }
                        let _ = sink.close().await;
                        tracing::info!(topic = %task_topic, "Left realtime channel");
                        break;
                    }
                    frame = source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if !handle_frame(&task_topic, &text, &events_tx) {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!(topic = %task_topic, "Realtime socket closed");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(topic = %task_topic, error = %e, "Realtime receive error");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                topic,
                leave_tx: Some(leave_tx),
                task: Some(task),
            },
            events_rx,
        ))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send `phx_leave`, close the socket and wait for the task to stop
    pub async fn leave(mut self) {
        if let Some(tx) = self.leave_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Read frames until the server answers the join with `join_ref`.
///
/// Changes that race ahead of the reply are forwarded as usual.
async fn await_join_reply<S>(
    source: &mut S,
    topic: &str,
    join_ref: u64,
    events_tx: &mpsc::UnboundedSender<ChangeEvent>,
) -> ProviderResult<()>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let join_ref = join_ref.to_string();

    while let Some(frame) = source.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(msg) = serde_json::from_str::<PhoenixMessage>(&text) else {
            continue;
        };
        if msg.topic != topic {
            continue;
        }

        let is_join_reply =
            msg.event == "phx_reply" && msg.msg_ref.as_deref() == Some(join_ref.as_str());
        if is_join_reply || msg.event == "phx_error" {
            if msg.is_error_reply() {
                return Err(ProviderError::realtime(rejection_reason(&msg.payload)));
            }
            if is_join_reply {
                return Ok(());
            }
        }

        handle_frame(topic, &text, events_tx);
    }

    Err(ProviderError::realtime(format!(
        "socket closed before join on {} was acknowledged",
        topic
    )))
}

/// Server-provided reason for a rejected join
fn rejection_reason(payload: &Value) -> String {
    payload
        .get("response")
        .and_then(|r| r.get("reason"))
        .or_else(|| payload.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("join rejected")
        .to_string()
}

/// Handle one inbound frame.
///
/// Returns false if the channel should stop.
fn handle_frame(topic: &str, text: &str, events_tx: &mpsc::UnboundedSender<ChangeEvent>) -> bool {
    let msg = match serde_json::from_str::<PhoenixMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse realtime frame");
            return true;
        }
    };

    if msg.topic != topic {
        return true;
    }

    // Closing the event stream tells the subscriber it is no longer live
    if msg.is_error_reply() {
        tracing::error!(topic = %topic, payload = %msg.payload, "Realtime channel error");
        return false;
    }

    match msg.event.as_str() {
        "postgres_changes" => match decode_change(&msg.payload) {
            Ok(Some(event)) => {
                tracing::debug!(kind = event.kind(), bookmark_id = %event.id(), "Change received");
                // Receiver gone means the subscription was released
                events_tx.send(event).is_ok()
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode change");
                true
            }
        },
        "phx_close" => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "realtime:public:bookmarks:user=u1";

    fn insert_frame() -> String {
        json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "bookmarks",
                    "commit_timestamp": "2025-03-02T10:15:30.500Z",
                    "type": "INSERT",
                    "record": {
                        "id": "b-1",
                        "title": "Docs",
                        "url": "example.com/docs",
                        "user_id": "u1",
                        "created_at": "2025-03-02T10:15:30.123456+00:00"
                    },
                    "errors": null
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_join_frame() {
        let msg = PhoenixMessage::join(TOPIC, "u1", Some("jwt"), 1);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["event"], "phx_join");
        assert_eq!(json["ref"], "1");
        assert_eq!(json["join_ref"], "1");
        assert_eq!(json["payload"]["access_token"], "jwt");
        let change = &json["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "bookmarks");
        assert_eq!(change["filter"], "user_id=eq.u1");
    }

    #[test]
    fn test_heartbeat_frame() {
        let json = serde_json::to_string(&PhoenixMessage::heartbeat(7)).unwrap();
        assert!(json.contains("\"topic\":\"phoenix\""));
        assert!(json.contains("\"event\":\"heartbeat\""));
        assert!(json.contains("\"ref\":\"7\""));
    }

    #[test]
    fn test_decode_insert() {
        let msg: PhoenixMessage = serde_json::from_str(&insert_frame()).unwrap();
        match decode_change(&msg.payload).unwrap() {
            Some(ChangeEvent::Inserted(record)) => {
                assert_eq!(record.id, "b-1");
                assert_eq!(record.title, "Docs");
                assert_eq!(record.user_id, "u1");
            }
            other => panic!("Expected Inserted, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_delete_uses_old_record() {
        let payload = json!({
            "data": {
                "type": "DELETE",
                "record": null,
                "old_record": { "id": "b-9" }
            }
        });
        assert_eq!(
            decode_change(&payload).unwrap(),
            Some(ChangeEvent::Deleted {
                id: "b-9".to_string()
            })
        );
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        let payload = json!({ "data": { "record": {} } });
        assert!(matches!(
            decode_change(&payload),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_handle_frame_forwards_changes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(handle_frame(TOPIC, &insert_frame(), &tx));
        assert_eq!(rx.try_recv().unwrap().id(), "b-1");

        // Frames for other topics are ignored
        let other = insert_frame().replace("user=u1", "user=u2");
        assert!(handle_frame(TOPIC, &other, &tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_frame_stops_when_released() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!handle_frame(TOPIC, &insert_frame(), &tx));
    }

    #[test]
    fn test_error_reply_detected() {
        let msg: PhoenixMessage = serde_json::from_value(json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "ref": "1",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } }
        }))
        .unwrap();
        assert!(msg.is_error_reply());
    }

    #[test]
    fn test_channel_error_closes_stream() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let frame = json!({
            "topic": TOPIC,
            "event": "phx_error",
            "ref": null,
            "payload": {}
        })
        .to_string();
        assert!(!handle_frame(TOPIC, &frame, &tx));
    }

    /// Single-connection server: answers the join with `reply`, then sends `after`
    async fn serve_once(reply: Value, after: Vec<String>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let join = ws.next().await.unwrap().unwrap();
            let join: PhoenixMessage = serde_json::from_str(join.to_text().unwrap()).unwrap();
            assert_eq!(join.event, "phx_join");

            ws.send(Message::Text(reply.to_string())).await.unwrap();
            for frame in after {
                ws.send(Message::Text(frame)).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        format!("ws://{}/realtime/v1/websocket", addr)
    }

    fn join_reply(status: &str) -> Value {
        json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "ref": "1",
            "payload": { "status": status, "response": { "reason": "unauthorized" } }
        })
    }

    #[tokio::test]
    async fn test_rejected_join_fails_subscription() {
        let url = serve_once(join_reply("error"), Vec::new()).await;

        let result =
            RealtimeChannel::join(&url, TOPIC.to_string(), "u1", None, Duration::from_secs(30))
                .await;
        match result {
            Err(ProviderError::Realtime(reason)) => assert_eq!(reason, "unauthorized"),
            Err(other) => panic!("Expected Realtime error, got {:?}", other),
            Ok(_) => panic!("Join should have been rejected"),
        }
    }

    #[tokio::test]
    async fn test_joined_channel_forwards_until_error() {
        let channel_error = json!({
            "topic": TOPIC,
            "event": "phx_error",
            "ref": null,
            "payload": {}
        })
        .to_string();
        let url = serve_once(join_reply("ok"), vec![insert_frame(), channel_error]).await;

        let (channel, mut events) =
            RealtimeChannel::join(&url, TOPIC.to_string(), "u1", None, Duration::from_secs(30))
                .await
                .unwrap();
        assert_eq!(channel.topic(), TOPIC);

        assert_eq!(events.recv().await.unwrap().id(), "b-1");
        // The server dropped the channel, so the stream ends
        assert!(events.recv().await.is_none());

        channel.leave().await;
    }
}
