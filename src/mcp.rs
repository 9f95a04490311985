//! MCP JSON-RPC bridge over stdio.
//!
//! Exposes the [`ToolRegistry`] as MCP tools (`list_tools` / `call_tool`).
//! Logging goes to stderr so stdout carries only protocol frames.
//!
//! Client configuration:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "docmem": {
//!       "command": "docmem",
//!       "args": ["--config", "/path/to/docmem.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Result;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use tracing::info;

use crate::context::AppContext;
use crate::tools::ToolRegistry;

/// Each session gets a clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct McpBridge {
    ctx: Arc<AppContext>,
    tools: Arc<ToolRegistry>,
}

impl McpBridge {
    pub fn new(ctx: Arc<AppContext>, tools: Arc<ToolRegistry>) -> Self {
        Self { ctx, tools }
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema = match tool.parameters_schema() {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "docmem".to_string(),
                title: Some("docmem".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "docmem indexes local document and code trees into named knowledge bases. \
                 Use list_knowledge_bases to see what is indexed, search_knowledge_bases to \
                 retrieve relevant chunks, and get_knowledge_base_stats for a breakdown."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match tool.execute(params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!("{:#}", e))])),
        }
    }
}

/// Serve MCP on stdin/stdout until the client disconnects.
pub async fn run_mcp_stdio(ctx: Arc<AppContext>) -> Result<()> {
    let bridge = McpBridge::new(ctx, Arc::new(ToolRegistry::with_builtins()));
    info!("starting MCP server on stdio");
    let service = bridge.serve(rmcp::transport::stdio()).await?;
    let reason = service.waiting().await?;
    info!(?reason, "MCP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_descriptors_carry_schema() {
        let registry = ToolRegistry::with_builtins();
        let tool = McpBridge::to_mcp_tool(registry.find("search_knowledge_bases").unwrap());
        assert_eq!(tool.name, "search_knowledge_bases");
        assert_eq!(tool.input_schema.get("type").unwrap(), "object");
        assert!(tool.input_schema.contains_key("required"));
    }

    #[test]
    fn test_server_info_enables_tools() {
        let bridge = McpBridge::new(
            Arc::new(AppContext::in_memory_for_tests()),
            Arc::new(ToolRegistry::with_builtins()),
        );
        let info = bridge.get_info();
        assert_eq!(info.server_info.name, "docmem");
        assert!(info.capabilities.tools.is_some());
    }
}
