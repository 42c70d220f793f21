//! Streaming connection tracking.
//!
//! Every SSE query stream registers a [`StreamConnection`]. A guard removes
//! the entry when the response body is dropped (normal end or client
//! disconnect), and the periodic reaper closes anything idle past the
//! configured timeout as a backstop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Closing,
    Closed,
}

/// A tracked streaming session.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConnection {
    pub connection_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: ConnectionStatus,
    /// Remote address, user agent, and a query excerpt.
    pub metadata: HashMap<String, String>,
}

/// Concurrent registry of streaming connections.
#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<String, StreamConnection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active connection.
    pub fn create(&self, connection_id: &str, metadata: HashMap<String, String>) {
        let now = Utc::now();
        self.connections.insert(
            connection_id.to_string(),
            StreamConnection {
                connection_id: connection_id.to_string(),
                created_at: now,
                last_activity_at: now,
                status: ConnectionStatus::Active,
                metadata,
            },
        );
    }

    /// Bump the activity timestamp.
    pub fn touch(&self, connection_id: &str) {
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.last_activity_at = Utc::now();
        }
    }

    /// Mark a connection closing; the owning stream observes this and ends.
    /// Returns false for unknown ids.
    pub fn request_close(&self, connection_id: &str) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(mut conn) => {
                conn.status = ConnectionStatus::Closing;
                true
            }
            None => false,
        }
    }

    /// Whether the stream should stop producing events.
    pub fn is_closing(&self, connection_id: &str) -> bool {
        self.connections
            .get(connection_id)
            .map(|c| c.status != ConnectionStatus::Active)
            .unwrap_or(true)
    }

    /// Remove a connection entirely.
    pub fn remove(&self, connection_id: &str) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    /// Copy-on-read list of tracked connections.
    pub fn list(&self) -> Vec<StreamConnection> {
        let mut all: Vec<StreamConnection> =
            self.connections.iter().map(|c| c.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close connections idle longer than `timeout_minutes`. Returns how
    /// many were reaped.
    pub fn reap_idle(&self, timeout_minutes: u64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::minutes(timeout_minutes as i64);
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|c| c.last_activity_at < cutoff)
            .map(|c| c.connection_id.clone())
            .collect();
        for id in &stale {
            self.connections.remove(id);
            info!(connection_id = %id, "reaped idle streaming connection");
        }
        stale.len()
    }

    /// Guard that removes the connection when dropped.
    pub fn guard(self: &Arc<Self>, connection_id: String) -> ConnectionGuard {
        ConnectionGuard { manager: self.clone(), connection_id }
    }
}

/// Removes its connection entry on drop, so an abandoned response body
/// frees the slot without waiting for the reaper.
pub struct ConnectionGuard {
    manager: Arc<ConnectionManager>,
    connection_id: String,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.connection_id
    }

    pub fn touch(&self) {
        self.manager.touch(&self.connection_id);
    }

    pub fn is_closing(&self) -> bool {
        self.manager.is_closing(&self.connection_id)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.remove(&self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_list_and_close() {
        let manager = ConnectionManager::new();
        manager.create("c1", HashMap::new());
        manager.create("c2", HashMap::new());
        assert_eq!(manager.list().len(), 2);

        assert!(manager.request_close("c1"));
        assert!(manager.is_closing("c1"));
        assert!(!manager.is_closing("c2"));
        assert!(!manager.request_close("missing"));
    }

    #[test]
    fn unknown_connection_reads_as_closing() {
        let manager = ConnectionManager::new();
        assert!(manager.is_closing("ghost"));
    }

    #[test]
    fn reap_removes_idle_connections() {
        let manager = ConnectionManager::new();
        manager.create("old", HashMap::new());
        if let Some(mut conn) = manager.connections.get_mut("old") {
            conn.last_activity_at = Utc::now() - ChronoDuration::minutes(45);
        }
        manager.create("fresh", HashMap::new());

        let reaped = manager.reap_idle(30);
        assert_eq!(reaped, 1);
        assert_eq!(manager.len(), 1);
        assert!(manager.connections.get("fresh").is_some());
    }

    #[test]
    fn guard_removes_entry_on_drop() {
        let manager = Arc::new(ConnectionManager::new());
        manager.create("g1", HashMap::new());
        {
            let guard = manager.guard("g1".to_string());
            guard.touch();
            assert_eq!(manager.len(), 1);
        }
        assert_eq!(manager.len(), 0);
    }
}
