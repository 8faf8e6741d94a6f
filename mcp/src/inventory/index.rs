//! Shared tool schema cache.
//!
//! Read-mostly store of the last-known input contract per `(connection, tool)`.
//! Entries are `Arc`s replaced wholesale, so a reader holding an entry keeps a
//! consistent snapshot while a refresh swaps in a newer one. Concurrent
//! refreshes resolve last-writer-wins by `fetched_at`.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use toolloop_protocol::ToolDefinition;
use tracing::{debug, info, warn};

use super::types::{SchemaKey, ToolSchema};
use crate::{
    core::connection::ConnectionRegistry,
    error::{McpError, McpResult},
};

pub struct SchemaCache {
    entries: DashMap<SchemaKey, Arc<ToolSchema>>,
    by_name: DashMap<String, Vec<SchemaKey>>,
    suspect: DashMap<SchemaKey, DateTime<Utc>>,
    refreshing: DashMap<String, ()>,
    connections: Arc<ConnectionRegistry>,
    staleness: Duration,
}

impl SchemaCache {
    pub fn new(connections: Arc<ConnectionRegistry>, staleness: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            by_name: DashMap::new(),
            suspect: DashMap::new(),
            refreshing: DashMap::new(),
            connections,
            staleness,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Returns the first registered schema on name collision.
    pub fn get_schema(&self, tool_name: &str) -> Option<Arc<ToolSchema>> {
        let keys = self.by_name.get(tool_name)?;
        keys.iter()
            .find_map(|key| self.entries.get(key).map(|e| Arc::clone(e.value())))
    }

    pub fn get(&self, key: &SchemaKey) -> Option<Arc<ToolSchema>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn is_stale(&self, schema: &ToolSchema) -> bool {
        schema.is_stale(self.staleness, Utc::now())
    }

    /// All cached schemas, ordered by tool name then connection.
    pub fn list_schemas(&self) -> Vec<Arc<ToolSchema>> {
        let mut schemas: Vec<Arc<ToolSchema>> =
            self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        schemas.sort_by(|a, b| {
            (a.tool_name.as_str(), a.connection_id.as_str())
                .cmp(&(b.tool_name.as_str(), b.connection_id.as_str()))
        });
        schemas
    }

    /// One advertised definition per tool name, resolving collisions the same
    /// way as [`get_schema`](Self::get_schema).
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut names: Vec<String> = self.by_name.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
            .iter()
            .filter_map(|name| self.get_schema(name))
            .map(|schema| schema.to_definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert or replace a schema.
    ///
    /// Returns false when the cached entry is newer than `schema`.
    pub fn insert(&self, schema: ToolSchema) -> bool {
        let key = schema.key();
        let stored = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().fetched_at > schema.fetched_at {
                    debug!(
                        schema = %key,
                        "Ignoring schema older than cached entry"
                    );
                    false
                } else {
                    existing.insert(Arc::new(schema));
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(schema));
                true
            }
        };

        if stored {
            let mut names = self.by_name.entry(key.tool_name.clone()).or_default();
            if !names.contains(&key) {
                if !names.is_empty() {
                    let owners: Vec<&str> =
                        names.iter().map(|k| k.connection_id.as_str()).collect();
                    warn!(
                        "Tool name collision: '{}' registered by {:?}, adding from '{}'",
                        key.tool_name, owners, key.connection_id
                    );
                }
                names.push(key);
            }
        }
        stored
    }

    pub fn remove(&self, key: &SchemaKey) -> Option<Arc<ToolSchema>> {
        let removed = self.entries.remove(key).map(|(_, v)| v)?;
        if let Entry::Occupied(mut names) = self.by_name.entry(key.tool_name.clone()) {
            names.get_mut().retain(|k| k != key);
            if names.get().is_empty() {
                names.remove();
            }
        }
        self.suspect.remove(key);
        Some(removed)
    }

    /// Drop every schema owned by `connection_id`.
    pub fn clear_connection(&self, connection_id: &str) -> usize {
        let keys: Vec<SchemaKey> = self
            .entries
            .iter()
            .filter(|e| e.key().connection_id == connection_id)
            .map(|e| e.key().clone())
            .collect();
        keys.iter().filter(|k| self.remove(k).is_some()).count()
    }

    // ========================================================================
    // Suspect tracking
    // ========================================================================

    /// Flag a contract as suspect after an argument mismatch. Suspect entries
    /// are force-refreshed before the next dispatch against them.
    pub fn mark_suspect(&self, key: &SchemaKey) {
        debug!(schema = %key, "Marking schema as suspect");
        self.suspect.insert(key.clone(), Utc::now());
    }

    pub fn is_suspect(&self, key: &SchemaKey) -> bool {
        self.suspect.contains_key(key)
    }

    /// Connections owning at least one suspect schema.
    pub fn suspect_connections(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .suspect
            .iter()
            .map(|e| e.key().connection_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Re-discover the tools of one connection and replace its entries.
    ///
    /// Tools no longer reported are dropped. Returns the number of tools
    /// discovered.
    pub async fn refresh(&self, connection_id: &str) -> McpResult<usize> {
        let connection = self
            .connections
            .get(connection_id)
            .ok_or_else(|| McpError::ConnectionNotFound(connection_id.to_string()))?;

        let tools = connection.discover().await?;
        let fetched_at = Utc::now();
        let count = tools.len();

        let mut current = HashSet::with_capacity(count);
        for tool in tools {
            let schema = ToolSchema::from_discovered(connection_id, tool, fetched_at);
            let key = schema.key();
            self.insert(schema);
            self.suspect.remove(&key);
            current.insert(key);
        }

        let vanished: Vec<SchemaKey> = self
            .entries
            .iter()
            .filter(|e| {
                e.key().connection_id == connection_id
                    && !current.contains(e.key())
                    && e.value().fetched_at < fetched_at
            })
            .map(|e| e.key().clone())
            .collect();
        for key in &vanished {
            self.remove(key);
        }

        info!(
            connection = %connection_id,
            tools = count,
            removed = vanished.len(),
            "Refreshed tool schemas"
        );
        Ok(count)
    }

    /// Refresh every registered connection. Failures are logged, not returned.
    pub async fn refresh_all(&self) -> usize {
        let ids = self.connections.ids();
        let results = join_all(ids.iter().map(|id| self.refresh(id))).await;
        ids.iter()
            .zip(results)
            .filter(|(id, result)| match result {
                Ok(_) => true,
                Err(e) => {
                    warn!(connection = %id, error = %e, "Schema refresh failed");
                    false
                }
            })
            .count()
    }

    /// Force-refresh every connection with suspect schemas. Returns how many
    /// connections refreshed successfully.
    pub async fn refresh_suspect(&self) -> usize {
        let ids = self.suspect_connections();
        let mut refreshed = 0;
        for id in ids {
            match self.refresh(&id).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(connection = %id, error = %e, "Forced schema refresh failed"),
            }
        }
        refreshed
    }

    /// Start a background refresh unless one is already running for this
    /// connection. Readers keep using current entries meanwhile.
    pub fn spawn_refresh(self: &Arc<Self>, connection_id: &str) -> bool {
        if self
            .refreshing
            .insert(connection_id.to_string(), ())
            .is_some()
        {
            return false;
        }

        let cache = Arc::clone(self);
        let id = connection_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.refresh(&id).await {
                warn!(connection = %id, error = %e, "Background schema refresh failed");
            }
            cache.refreshing.remove(&id);
        });
        true
    }

    pub fn is_refreshing(&self, connection_id: &str) -> bool {
        self.refreshing.contains_key(connection_id)
    }
}
