//! ReconMcpServer — rmcp ServerHandler backed by ReconRegistry.
//!
//! Lists one tool per enabled service and routes tool calls through the
//! registry. Every call for a known service answers with the response
//! envelope, rendered as JSON or plain text according to `AsJson`.

use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParams,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::{NotificationContext, RequestContext, RoleServer};
use serde_json::{Map, Value};

use crate::registry::{ReconRegistry, take_as_json};

/// MCP server backed by a shared [`ReconRegistry`].
///
/// `StreamableHttpService` calls its factory per session; every clone shares
/// the same registry, so all sessions see one runner and one cancel token.
#[derive(Clone)]
pub struct ReconMcpServer {
    registry: Arc<ReconRegistry>,
}

impl ReconMcpServer {
    pub fn new(registry: ReconRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &Arc<ReconRegistry> {
        &self.registry
    }

    /// Dispatch one call and wrap the envelope as MCP content.
    ///
    /// Only an unknown or disabled service is an MCP error; everything else,
    /// including validation failures, comes back as an envelope with
    /// `is_error` set from the success predicate.
    pub async fn handle_call(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let mut arguments = arguments.unwrap_or_default();
        let as_json = take_as_json(&mut arguments);

        let response = self
            .registry
            .dispatch(name, arguments)
            .await
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;

        let content = if as_json {
            let value = response
                .to_value()
                .map_err(|e| McpError::internal_error(e.to_string(), None))?;
            Content::json(value).map_err(|e| {
                McpError::internal_error(format!("JSON content error: {}", e), None)
            })?
        } else {
            Content::text(response.to_string())
        };

        Ok(CallToolResult {
            content: vec![content],
            is_error: Some(response.has_errors()),
            structured_content: None,
            meta: None,
        })
    }
}

impl ServerHandler for ReconMcpServer {
    /// Return server metadata: name "nimbus-recon", tool capabilities enabled.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "nimbus-recon".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Recon gateway: network reconnaissance tools (ping, dns, whois, curl, nmap, nikto, \
                 wpscan, httpx, nbtscan). Every call returns one response envelope; \
                 return_code == 0 and an empty raw_error means success."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.registry.tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.handle_call(&request.name, request.arguments).await
    }

    async fn on_initialized(&self, _context: NotificationContext<RoleServer>) {
        tracing::info!("MCP client initialized");
    }
}
