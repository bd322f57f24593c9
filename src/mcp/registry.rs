// src/mcp/registry.rs
// MCP Tool Registry (§4.7): aggregates tool catalogs across enabled MCP
// servers in an org and dispatches namespaced tool calls.

use crate::crypto::CredentialCipher;
use crate::db::Db;
use crate::llm::provider::ToolDefinition;
use crate::mcp::client::connect_http;
use crate::mcp::stdio_cache::StdioCache;
use crate::models::{Id, McpTransportType};
use anyhow::{anyhow, Result};
use moka::future::Cache;
use rmcp::model::CallToolRequestParam;
use std::sync::Arc;
use std::time::Duration;

pub struct McpRegistry {
    db: Db,
    cipher: CredentialCipher,
    stdio_cache: Arc<StdioCache>,
    tool_list_cache: Cache<Id, Vec<ToolDefinition>>,
}

const NAMESPACE_PREFIX: &str = "mcp__";

impl McpRegistry {
    pub fn new(db: Db, cipher: CredentialCipher, stdio_cache: Arc<StdioCache>, tool_list_ttl: Duration) -> Self {
        let tool_list_cache = Cache::builder().time_to_live(tool_list_ttl).build();
        Self { db, cipher, stdio_cache, tool_list_cache }
    }

    pub async fn get_tool_definitions(&self, organization_id: Id) -> Result<Vec<ToolDefinition>> {
        if let Some(cached) = self.tool_list_cache.get(&organization_id).await {
            return Ok(cached);
        }

        let servers = self.db.list_enabled_mcp_servers(organization_id)?;
        let mut definitions = Vec::new();

        for server in servers {
            let api_key = server
                .api_key_encrypted
                .as_ref()
                .map(|enc| self.cipher.decrypt(enc))
                .transpose()?;

            let connection = match server.transport_type {
                McpTransportType::Stdio => self.stdio_cache.get(server.id, &server).await,
                McpTransportType::Http => connect_http(&server, api_key.as_deref()).await.map(Arc::new),
            };

            let connection = match connection {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(server = %server.name, error = %err, "failed to connect to MCP server");
                    continue;
                }
            };

            let tools = match connection.list_all_tools().await {
                Ok(tools) => tools,
                Err(err) => {
                    tracing::warn!(server = %server.name, error = %err, "failed to list MCP tools");
                    continue;
                }
            };

            for tool in tools {
                let namespaced_name = format!("{NAMESPACE_PREFIX}{}__{}", server.name, tool.name);
                let input_schema = serde_json::to_value(tool.input_schema.as_ref()).unwrap_or(serde_json::json!({}));
                definitions.push(ToolDefinition {
                    name: namespaced_name,
                    description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                    input_schema,
                });
            }
        }

        self.tool_list_cache.insert(organization_id, definitions.clone()).await;
        Ok(definitions)
    }

    /// Parses `mcp__<server>__<tool>`, routes to that server's client, and
    /// returns the stringified tool result. Errors become strings, not
    /// thrown exceptions, so the orchestrator can feed them back to the model.
    pub async fn dispatch(&self, namespaced_name: &str, args: serde_json::Value, organization_id: Id) -> Result<String> {
        let rest = namespaced_name
            .strip_prefix(NAMESPACE_PREFIX)
            .ok_or_else(|| anyhow!("not an MCP-namespaced tool: {namespaced_name}"))?;
        let (server_name, tool_name) = rest
            .split_once("__")
            .ok_or_else(|| anyhow!("malformed MCP tool name: {namespaced_name}"))?;

        let servers = self.db.list_enabled_mcp_servers(organization_id)?;
        let server = servers
            .into_iter()
            .find(|s| s.name == server_name)
            .ok_or_else(|| anyhow!("no MCP server named {server_name} in organization"))?;

        let api_key = server
            .api_key_encrypted
            .as_ref()
            .map(|enc| self.cipher.decrypt(enc))
            .transpose()?;

        let connection = match server.transport_type {
            McpTransportType::Stdio => self.stdio_cache.get(server.id, &server).await?,
            McpTransportType::Http => Arc::new(connect_http(&server, api_key.as_deref()).await?),
        };

        let arguments = match args {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        };

        let result = connection
            .call_tool(CallToolRequestParam {
                name: tool_name.to_string().into(),
                arguments,
            })
            .await?;

        Ok(serde_json::to_string(&result)?)
    }

    /// Connects to one server by id and lists its tools, for the management
    /// `POST /api/mcp/{id}/test` dry run. Bypasses the org-wide tool cache.
    pub async fn test_connection(&self, organization_id: Id, server_id: Id) -> Result<Vec<ToolDefinition>> {
        let server = self
            .db
            .get_mcp_server(organization_id, server_id)?
            .ok_or_else(|| anyhow!("MCP server not found"))?;

        let api_key = server
            .api_key_encrypted
            .as_ref()
            .map(|enc| self.cipher.decrypt(enc))
            .transpose()?;

        let connection = match server.transport_type {
            McpTransportType::Stdio => self.stdio_cache.get(server.id, &server).await?,
            McpTransportType::Http => Arc::new(connect_http(&server, api_key.as_deref()).await?),
        };

        let tools = connection.list_all_tools().await?;
        Ok(tools
            .into_iter()
            .map(|tool| ToolDefinition {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: serde_json::to_value(tool.input_schema.as_ref()).unwrap_or(serde_json::json!({})),
            })
            .collect())
    }
}
