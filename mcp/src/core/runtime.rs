//! Tool layer wiring: connections, schema cache and dispatcher.

use std::sync::Arc;

use tracing::{error, info};

use super::{
    client::RmcpConnection,
    config::McpConfig,
    connection::{ConnectionRegistry, ToolConnection},
    dispatcher::ToolDispatcher,
};
use crate::{error::McpResult, inventory::SchemaCache};

pub struct ToolRuntime {
    registry: Arc<ConnectionRegistry>,
    cache: Arc<SchemaCache>,
    dispatcher: ToolDispatcher,
}

impl ToolRuntime {
    /// Runtime with no connections; register them with [`register`](Self::register).
    pub fn new(config: &McpConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let cache = Arc::new(SchemaCache::new(
            Arc::clone(&registry),
            config.cache.staleness(),
        ));
        let dispatcher = ToolDispatcher::new(Arc::clone(&cache), config.dispatch.clone());
        Self {
            registry,
            cache,
            dispatcher,
        }
    }

    /// Connect every configured server and load its tools.
    ///
    /// A `required` server that cannot be reached or listed fails startup;
    /// other servers are logged and skipped.
    pub async fn connect(config: &McpConfig) -> McpResult<Self> {
        config
            .validate()
            .map_err(|e| crate::error::McpError::Config(e.to_string()))?;
        let runtime = Self::new(config);

        for server in &config.servers {
            let loaded = match RmcpConnection::connect(server).await {
                Ok(connection) => runtime.register(Arc::new(connection)).await,
                Err(e) => Err(e),
            };
            if let Err(e) = loaded {
                if server.required {
                    return Err(e);
                }
                error!(
                    connection = %server.name,
                    error = %e,
                    "Failed to connect to optional tool server"
                );
            }
        }

        info!(
            connections = runtime.registry.len(),
            tools = runtime.cache.len(),
            "Tool runtime initialized"
        );
        Ok(runtime)
    }

    /// Register a connection and discover its tools.
    pub async fn register(&self, connection: Arc<dyn ToolConnection>) -> McpResult<usize> {
        let id = connection.id().to_string();
        self.registry.register(connection);
        match self.cache.refresh(&id).await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.registry.remove(&id);
                Err(e)
            }
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }
}
