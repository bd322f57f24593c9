// src/mcp/client.rs
// Transport construction for a single MCP server: HTTP (stateless per call)
// or Stdio (long-lived subprocess), both yielding the same rmcp client type.

use crate::models::McpServer;
use anyhow::{Context, Result};
use rmcp::model::{ClientCapabilities, ClientInfo, Implementation, ProtocolVersion};
use rmcp::service::{DynService, RunningService};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use std::process::Stdio;

pub type McpConnection = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

fn client_info() -> ClientInfo {
    ClientInfo {
        protocol_version: ProtocolVersion::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "infrallm".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

pub async fn connect_http(server: &McpServer, api_key: Option<&str>) -> Result<McpConnection> {
    let base_url = server
        .base_url
        .as_deref()
        .context("HTTP MCP server missing baseUrl")?;

    let transport = match api_key {
        Some(key) => {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))?,
            );
            let client = reqwest::ClientBuilder::new()
                .default_headers(headers)
                .build()?;
            StreamableHttpClientTransport::with_client(
                client,
                StreamableHttpClientTransportConfig {
                    uri: base_url.to_string().into(),
                    ..Default::default()
                },
            )
        }
        None => StreamableHttpClientTransport::from_uri(base_url.to_string()),
    };

    let connection = client_info().into_dyn().serve(transport).await?;
    Ok(connection)
}

pub async fn connect_stdio(server: &McpServer) -> Result<McpConnection> {
    let command = server
        .command
        .as_deref()
        .context("Stdio MCP server missing command")?;

    let mut cmd = tokio::process::Command::new(command);
    cmd.args(&server.arguments)
        .envs(&server.environment_variables)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    if let Some(dir) = &server.working_directory {
        cmd.current_dir(dir);
    }

    let transport = rmcp::transport::child_process::TokioChildProcess::new(cmd)?;
    let connection = client_info().into_dyn().serve(transport).await?;
    Ok(connection)
}
