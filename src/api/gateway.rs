//! Authenticated realtime push channel.
//!
//! Clients connect over WebSocket with a valid access token; the token is
//! checked before the upgrade, so an unauthenticated client never sees a
//! single event. Each connection gets an unbounded sender in the shared
//! [`ConnectionRegistry`]; other parts of the process push through
//! [`ChannelGateway::notify`] and friends.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Query};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handlers::auth::cookies::extract_access_token;
use super::handlers::auth::error::AuthError;
use super::handlers::auth::service::verify_access;
use super::handlers::auth::state::AuthState;
use super::registry::{ChannelEvent, ConnectionRegistry};

/// Messages clients may send upstream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "notification:read")]
    NotificationRead { id: String },
    #[serde(rename = "notification:delete")]
    NotificationDelete { id: String },
}

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    token: Option<String>,
}

/// Process-wide push gateway; constructed once in `api::new` and shared by
/// handle.
#[derive(Default)]
pub struct ChannelGateway {
    registry: ConnectionRegistry,
}

impl ChannelGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notify(&self, account_id: Uuid, event: &ChannelEvent) -> usize {
        self.registry.notify(account_id, event).await
    }

    pub async fn notify_many(&self, account_ids: &[Uuid], event: &ChannelEvent) -> usize {
        self.registry.notify_many(account_ids, event).await
    }

    pub async fn broadcast(&self, event: &ChannelEvent) -> usize {
        self.registry.broadcast(event).await
    }

    pub async fn is_online(&self, account_id: Uuid) -> bool {
        self.registry.is_online(account_id).await
    }

    pub async fn online_count(&self) -> usize {
        self.registry.online_count().await
    }

    async fn handle_connection(self: Arc<Self>, socket: WebSocket, account_id: Uuid) {
        let connection_id = Uuid::new_v4();
        let (mut sink, mut stream) = socket.split();
        let (sender, mut receiver) = mpsc::unbounded_channel();

        self.registry
            .register(account_id, connection_id, sender.clone())
            .await;
        info!(%account_id, %connection_id, "realtime connection opened");

        // The greeting goes through the same channel as every other event,
        // so the client sees it first.
        let _ = sender.send(ChannelEvent::Connected {
            account_id,
            connection_id,
        });

        // Forward registry events to the socket until the channel closes.
        let send_task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::NotificationRead { id }) => {
                        let _ = sender.send(ChannelEvent::Ack {
                            action: "notification:read".to_string(),
                            id,
                        });
                    }
                    Ok(ClientMessage::NotificationDelete { id }) => {
                        let _ = sender.send(ChannelEvent::Ack {
                            action: "notification:delete".to_string(),
                            id,
                        });
                    }
                    Err(err) => {
                        debug!(%account_id, "ignoring unparseable client message: {err}");
                    }
                },
                Message::Close(_) => break,
                // Pings are answered by the protocol layer.
                _ => {}
            }
        }

        self.registry.unregister(account_id, connection_id).await;
        // Dropping the last local sender ends the send task.
        drop(sender);
        let _ = send_task.await;
        info!(%account_id, %connection_id, "realtime connection closed");
    }
}

/// `GET /v1/realtime` WebSocket endpoint.
///
/// The token is taken from the `token` query parameter, the bearer header or
/// the access cookie, in that order, and verified before the upgrade.
pub async fn realtime(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<RealtimeParams>,
    auth_state: Extension<Arc<AuthState>>,
    gateway: Extension<Arc<ChannelGateway>>,
) -> Response {
    let token = params.token.or_else(|| extract_access_token(&headers));
    let Some(token) = token else {
        return AuthError::TokenMalformed.into_response();
    };

    let claims = match verify_access(&auth_state, &token, Utc::now()) {
        Ok(claims) => claims,
        Err(err) => {
            warn!("realtime handshake rejected");
            return err.into_response();
        }
    };

    let gateway = Arc::clone(&gateway);
    ws.on_upgrade(move |socket| gateway.handle_connection(socket, claims.sub))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_by_type_tag() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"notification:read","id":"n-1"}"#).unwrap();
        assert!(matches!(message, ClientMessage::NotificationRead { id } if id == "n-1"));

        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"notification:delete","id":"n-2"}"#).unwrap();
        assert!(matches!(message, ClientMessage::NotificationDelete { id } if id == "n-2"));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"unknown"}"#).is_err());
    }

    #[tokio::test]
    async fn gateway_delegates_to_registry() {
        let gateway = ChannelGateway::new();
        let account = Uuid::from_u128(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway
            .registry
            .register(account, Uuid::from_u128(10), tx)
            .await;

        assert!(gateway.is_online(account).await);
        assert_eq!(gateway.online_count().await, 1);
        let event = ChannelEvent::NotificationNew {
            payload: "{}".to_string(),
        };
        assert_eq!(gateway.notify(account, &event).await, 1);
        assert_eq!(rx.recv().await, Some(event));
        assert_eq!(gateway.broadcast(&ChannelEvent::Ack {
            action: "notification:read".to_string(),
            id: "n".to_string(),
        })
        .await, 1);
    }
}
