//! Connection lifecycle: one [`Connection`] per unique `(host, port)` across
//! all slots, shared by every slot targeting it, retained for the process
//! lifetime and destroyed only when no slot references it after a config
//! save (spec §3 Connection).

use crate::remote::connection::Connection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub type ConnectionKey = (String, u16);

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionKey, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing connection for `(host, port)`, spawning one if
    /// this is the first effective reference.
    pub async fn get_or_spawn(&self, host: &str, port: u16) -> Arc<Connection> {
        let key = (host.to_string(), port);
        if let Some(conn) = self.connections.read().await.get(&key) {
            return conn.clone();
        }
        let mut guard = self.connections.write().await;
        guard
            .entry(key)
            .or_insert_with(|| Connection::spawn(host.to_string(), port))
            .clone()
    }

    /// Drops connections no slot references any more. Called after every
    /// config save with the set of `(host, port)` pairs still referenced by
    /// effective slots.
    pub async fn reconcile(&self, still_referenced: &HashSet<ConnectionKey>) {
        let mut guard = self.connections.write().await;
        guard.retain(|key, _| {
            let keep = still_referenced.contains(key);
            if !keep {
                info!(host = %key.0, port = key.1, "no slot references this connection — dropping");
            }
            keep
        });
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}
