// src/mcp/stdio_cache.rs
// Process-wide cache of warm stdio MCP subprocesses (§4.7). HTTP servers are
// stateless per call and never enter this cache.

use crate::db::Db;
use crate::mcp::client::{connect_stdio, McpConnection};
use crate::models::Id;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

struct CachedClient {
    connection: Arc<McpConnection>,
    last_used: Instant,
}

pub struct StdioCache {
    db: Db,
    idle_timeout: Duration,
    clients: Mutex<HashMap<Id, CachedClient>>,
}

impl StdioCache {
    pub fn new(db: Db, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            db,
            idle_timeout,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the warm client for `server_id`, launching one on miss.
    pub async fn get(&self, server_id: Id, server: &crate::models::McpServer) -> anyhow::Result<Arc<McpConnection>> {
        let mut clients = self.clients.lock().await;
        if let Some(cached) = clients.get_mut(&server_id) {
            cached.last_used = Instant::now();
            return Ok(Arc::clone(&cached.connection));
        }

        let connection = Arc::new(connect_stdio(server).await?);
        clients.insert(
            server_id,
            CachedClient {
                connection: Arc::clone(&connection),
                last_used: Instant::now(),
            },
        );
        Ok(connection)
    }

    pub async fn evict(&self, server_id: Id) {
        let mut clients = self.clients.lock().await;
        if clients.remove(&server_id).is_some() {
            info!(%server_id, "evicted stdio MCP client");
        }
    }

    /// Terminates clients idle past `idle_timeout`; they respawn lazily on
    /// next `get`.
    pub fn spawn_janitor(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let mut clients = cache.clients.lock().await;
                let idle: Vec<Id> = clients
                    .iter()
                    .filter(|(_, c)| c.last_used.elapsed() > cache.idle_timeout)
                    .map(|(id, _)| *id)
                    .collect();
                for id in idle {
                    clients.remove(&id);
                    info!(server_id = %id, "reaped idle stdio MCP client");
                }
            }
        });
    }

    /// Prelaunches every enabled stdio server for every org at startup.
    pub async fn warmup(self: &Arc<Self>) {
        let Ok(org_ids) = self.db.list_all_organizations_with_enabled_stdio_servers() else {
            warn!("failed to enumerate organizations for MCP warmup");
            return;
        };
        for org_id in org_ids {
            let Ok(servers) = self.db.list_enabled_mcp_servers(org_id) else { continue };
            for server in servers {
                if server.transport_type != crate::models::McpTransportType::Stdio {
                    continue;
                }
                if let Err(err) = self.get(server.id, &server).await {
                    warn!(server = %server.name, error = %err, "failed to warm up stdio MCP server");
                }
            }
        }
    }
}
