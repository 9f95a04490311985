//! Assistant-facing tool surface.
//!
//! Three built-in tools expose the read side of the system:
//!
//! | Tool | Params | Returns |
//! |------|--------|---------|
//! | `list_knowledge_bases` | none | `{ "knowledge_bases": [KnowledgeBaseInfo] }` |
//! | `search_knowledge_bases` | `query`, `knowledge_base?`, `language?`, `max_results?` | `SearchResponse` |
//! | `get_knowledge_base_stats` | `name` | `KnowledgeBaseStats` |
//!
//! The HTTP handlers for the same operations call the functions in this
//! module, so both surfaces return identical JSON. The [`ToolRegistry`] is
//! served over HTTP (`/tools/*`) and over MCP stdio.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::AppContext;
use crate::error::InvalidRequest;
use crate::search::{SearchRequest, SearchResponse};

/// Upper bound for `max_results` accepted from callers.
pub const MAX_RESULTS_LIMIT: usize = 100;

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, used as `POST /tools/{name}`.
    fn name(&self) -> &str;

    /// One line for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// `params` is always a JSON object.
    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value>;
}

// ============ Boundary validation ============

pub fn validate_name(field: &str, value: &str) -> Result<(), InvalidRequest> {
    if value.trim().is_empty() {
        return Err(InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

pub fn validate_search(request: &SearchRequest) -> Result<(), InvalidRequest> {
    validate_name("query", &request.query)?;
    if let Some(max) = request.max_results {
        if !(1..=MAX_RESULTS_LIMIT).contains(&max) {
            return Err(InvalidRequest(format!(
                "max_results must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
    }
    Ok(())
}

// ============ Shared operations ============

pub async fn list_knowledge_bases(ctx: &AppContext) -> Result<Value> {
    let kbs = ctx.lifecycle.list().await?;
    Ok(json!({ "knowledge_bases": kbs }))
}

pub async fn search_knowledge_bases(
    ctx: &AppContext,
    request: &SearchRequest,
) -> Result<SearchResponse> {
    validate_search(request)?;
    ctx.search.search(request).await
}

pub async fn knowledge_base_stats(ctx: &AppContext, name: &str) -> Result<Value> {
    validate_name("name", name)?;
    Ok(serde_json::to_value(ctx.lifecycle.stats(name).await?)?)
}

// ============ Built-in tools ============

pub struct ListKnowledgeBasesTool;

#[async_trait]
impl Tool for ListKnowledgeBasesTool {
    fn name(&self) -> &str {
        "list_knowledge_bases"
    }

    fn description(&self) -> &str {
        "List indexed knowledge bases with file and chunk counts"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &AppContext) -> Result<Value> {
        list_knowledge_bases(ctx).await
    }
}

pub struct SearchKnowledgeBasesTool;

#[async_trait]
impl Tool for SearchKnowledgeBasesTool {
    fn name(&self) -> &str {
        "search_knowledge_bases"
    }

    fn description(&self) -> &str {
        "Semantic search over one or all knowledge bases"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language query" },
                "knowledge_base": { "type": "string", "description": "Restrict to one knowledge base" },
                "language": { "type": "string", "description": "Restrict to a language tag, e.g. rust, python, markdown" },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_RESULTS_LIMIT,
                    "description": "Maximum number of results"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let request: SearchRequest = serde_json::from_value(params)
            .map_err(|e| InvalidRequest(format!("invalid parameters: {}", e)))?;
        let response = search_knowledge_bases(ctx, &request).await?;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct KnowledgeBaseStatsTool;

#[async_trait]
impl Tool for KnowledgeBaseStatsTool {
    fn name(&self) -> &str {
        "get_knowledge_base_stats"
    }

    fn description(&self) -> &str {
        "Document-type and chunk-kind breakdown of one knowledge base"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Knowledge base name" }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &AppContext) -> Result<Value> {
        let name = params["name"].as_str().unwrap_or("");
        knowledge_base_stats(ctx, name).await
    }
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with the three built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ListKnowledgeBasesTool));
        registry.register(Box::new(SearchKnowledgeBasesTool));
        registry.register(Box::new(KnowledgeBaseStatsTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `GET /tools/list` payload.
    pub fn descriptors(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
