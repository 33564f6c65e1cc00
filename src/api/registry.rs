//! In-memory registry of live realtime connections.
//!
//! One account can hold several connections (tabs, devices). The registry
//! never keeps empty per-account maps, so `is_online` is a plain key lookup.
//! Delivery is best-effort: a send to a closing connection is dropped along
//! with the stale sender.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    #[serde(rename = "connected")]
    Connected { account_id: Uuid, connection_id: Uuid },
    #[serde(rename = "notification:new")]
    NotificationNew { payload: String },
    #[serde(rename = "ack")]
    Ack { action: String, id: String },
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Uuid, HashMap<Uuid, UnboundedSender<ChannelEvent>>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        account_id: Uuid,
        connection_id: Uuid,
        sender: UnboundedSender<ChannelEvent>,
    ) {
        let mut connections = self.connections.lock().await;
        connections
            .entry(account_id)
            .or_default()
            .insert(connection_id, sender);
    }

    /// Remove one connection. Removing twice, or removing a connection that
    /// was never registered, is a no-op.
    pub async fn unregister(&self, account_id: Uuid, connection_id: Uuid) {
        let mut connections = self.connections.lock().await;
        if let Some(account_connections) = connections.get_mut(&account_id) {
            account_connections.remove(&connection_id);
            if account_connections.is_empty() {
                connections.remove(&account_id);
            }
        }
    }

    /// Deliver to every connection of the account; returns how many sends
    /// were accepted.
    pub async fn notify(&self, account_id: Uuid, event: &ChannelEvent) -> usize {
        let connections = self.connections.lock().await;
        let Some(account_connections) = connections.get(&account_id) else {
            return 0;
        };
        account_connections
            .values()
            .filter(|sender| sender.send(event.clone()).is_ok())
            .count()
    }

    pub async fn notify_many(&self, account_ids: &[Uuid], event: &ChannelEvent) -> usize {
        let mut delivered = 0;
        for account_id in account_ids {
            delivered += self.notify(*account_id, event).await;
        }
        delivered
    }

    pub async fn broadcast(&self, event: &ChannelEvent) -> usize {
        let connections = self.connections.lock().await;
        connections
            .values()
            .flat_map(HashMap::values)
            .filter(|sender| sender.send(event.clone()).is_ok())
            .count()
    }

    pub async fn is_online(&self, account_id: Uuid) -> bool {
        let connections = self.connections.lock().await;
        connections.contains_key(&account_id)
    }

    /// Number of accounts with at least one live connection.
    pub async fn online_count(&self) -> usize {
        let connections = self.connections.lock().await;
        connections.len()
    }
}
