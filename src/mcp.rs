//! stdio JSON-RPC control surface.
//!
//! Exposes the engine to an AI assistant over the MCP protocol on
//! stdin/stdout. Logs must never touch stdout while this surface is active;
//! the tracing subscriber writes to stderr for exactly that reason.
//!
//! | Tool | Effect |
//! |------|--------|
//! | `search` | Similarity search with optional file/folder scope |
//! | `index` | Run a full or incremental index update |
//! | `cancel_index` | Request cooperative cancellation of the running update |
//! | `status` | Workspace index status and per-model statistics |
//! | `reinitialize` | Delete all rows for the current workspace+model |
//!
//! A second `index` request while one is running fails immediately with a
//! `busy` error; it is never queued.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use crate::error::Error;
use crate::indexer::{IndexEngine, IndexOptions};
use crate::retrieval::{self, SearchRequest};

/// MCP handler wrapping the shared engine. Cloned per session; all
/// sessions operate on the same workspace.
#[derive(Clone)]
pub struct McpSurface {
    engine: Arc<IndexEngine>,
}

impl McpSurface {
    pub fn new(engine: Arc<IndexEngine>) -> Self {
        McpSurface { engine }
    }

    fn tool(name: &str, description: &str, schema: serde_json::Value) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };
        Tool {
            name: Cow::Owned(name.to_string()),
            title: None,
            description: Some(Cow::Owned(description.to_string())),
            input_schema,
            output_schema: None,
            annotations: None,
            icons: None,
        }
    }

    fn tools() -> Vec<Tool> {
        vec![
            Self::tool(
                "search",
                "Search the workspace index by semantic similarity. Scope by exact file \
                 paths and/or folder names; files and folders combine as AND.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "min_similarity": { "type": "number" },
                        "limit": { "type": "integer" },
                        "scope": {
                            "type": "object",
                            "properties": {
                                "files": { "type": "array", "items": { "type": "string" } },
                                "folders": { "type": "array", "items": { "type": "string" } }
                            }
                        }
                    },
                    "required": ["query"]
                }),
            ),
            Self::tool(
                "index",
                "Index the workspace. Incremental by default; set reindex_all to rebuild \
                 from scratch. Fails with 'busy' if an update is already running.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "reindex_all": { "type": "boolean", "default": false }
                    }
                }),
            ),
            Self::tool(
                "cancel_index",
                "Request cancellation of the running index update.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
            Self::tool(
                "status",
                "Report index status: file counts, last update time, per-model row statistics.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
            Self::tool(
                "reinitialize",
                "Delete every indexed row for this workspace and embedding model.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
        ]
    }

    async fn run_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        match name {
            "search" => {
                let request: SearchRequest = serde_json::from_value(args)?;
                let results = retrieval::search(
                    self.engine.store(),
                    self.engine.client(),
                    self.engine.config(),
                    self.engine.workspace_root(),
                    &request,
                )
                .await?;
                Ok(serde_json::json!({ "results": results }))
            }
            "index" => {
                let options = IndexOptions {
                    reindex_all: args
                        .get("reindex_all")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                };
                let outcome = self.engine.update(options, None).await?;
                Ok(serde_json::json!({
                    "cancelled": outcome.cancelled,
                    "total_files": outcome.total_files,
                    "completed_files": outcome.completed_files,
                    "skipped_files": outcome.skipped_files,
                    "total_chunks": outcome.total_chunks,
                    "completed_chunks": outcome.completed_chunks,
                    "failed_files": outcome.failed_files,
                }))
            }
            "cancel_index" => {
                self.engine.cancel();
                Ok(serde_json::json!({ "cancel_requested": true }))
            }
            "status" => Ok(serde_json::to_value(self.engine.status().await?)?),
            "reinitialize" => {
                self.engine.reinitialize().await?;
                Ok(serde_json::json!({ "reinitialized": true }))
            }
            other => Err(Error::Config(format!("unknown tool: {other}"))),
        }
    }
}

impl McpSurface {
    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tools().into_iter().find(|t| t.name == name)
    }
}

impl ServerHandler for McpSurface {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "semdex".to_string(),
                title: Some("Semdex".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Semdex — semantic retrieval over a local document tree. Use search to find \
                 relevant chunks, index to refresh the index (incremental unless reindex_all), \
                 status to inspect coverage, and cancel_index to stop a running update."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::tools())))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self.run_tool(&request.name, args).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(Error::Busy) => Ok(CallToolResult::error(vec![Content::text(
                "busy: an index update is already running; retry after it finishes",
            )])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

/// Serve the MCP surface on stdin/stdout until the client disconnects.
pub async fn run_stdio(engine: Arc<IndexEngine>) -> anyhow::Result<()> {
    let service = McpSurface::new(engine)
        .serve(rmcp::transport::stdio())
        .await?;
    service.waiting().await?;
    Ok(())
}
