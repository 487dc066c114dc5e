use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;

use cogito_protocol::frames::EventFrame;

use crate::turn::FrameOut;

/// Write half of a WS connection, shared between the connection loop and
/// spawned chat turns.
pub type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Serialize any value to JSON and send it over the shared sink.
pub async fn json_shared<T: serde::Serialize>(
    tx: &SharedSink,
    payload: &T,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(payload).unwrap_or_default();
    let mut guard = tx.lock().await;
    guard
        .send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}

#[async_trait]
impl FrameOut for SharedSink {
    async fn emit(&self, frame: EventFrame) -> bool {
        json_shared(self, &frame).await.is_ok()
    }
}
