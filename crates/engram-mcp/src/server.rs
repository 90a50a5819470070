//! MCP server core
//!
//! Holds the service handles and routes JSON-RPC requests to the tool
//! implementations. Every `tools/call` also ticks the journal's tool
//! counter so check-in bookkeeping works without a separate channel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use engram_core::clustering::ExperienceClusterer;
use engram_core::context::ContextAssembler;
use engram_core::memories::MemoryBank;
use engram_core::observation::{ObservationCollector, ObservationPersister};
use engram_core::search::Searcher;
use engram_core::values::ValueStore;
use engram_core::{EmbeddingService, SearcherOps, VectorStore};

use crate::protocol::types::{
    CallToolRequest, InitializeRequest, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ServerCapabilities, ServerInfo, MCP_VERSION,
};
use crate::tools;

// ============================================================================
// SERVICES
// ============================================================================

/// The wired-up engine components the tools operate on
pub struct Services {
    pub collector: ObservationCollector,
    pub persister: ObservationPersister,
    pub searcher: Arc<Searcher>,
    pub assembler: ContextAssembler,
    pub clusterer: Arc<ExperienceClusterer>,
    pub value_store: ValueStore,
    pub memory_bank: MemoryBank,
    pub store: Arc<dyn VectorStore>,
}

impl Services {
    /// Wire all components over one embedder, one vector store, and
    /// one journal directory.
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        journal_dir: &Path,
    ) -> Result<Self, engram_core::JournalError> {
        let collector = ObservationCollector::new(journal_dir)?;
        let persister = ObservationPersister::new(embedder.clone(), store.clone());
        let searcher = Arc::new(Searcher::new(embedder.clone(), store.clone()));
        let assembler = ContextAssembler::new(searcher.clone() as Arc<dyn SearcherOps>);
        let clusterer = Arc::new(ExperienceClusterer::new(store.clone()));
        let value_store = ValueStore::new(embedder.clone(), store.clone(), clusterer.clone());
        let memory_bank = MemoryBank::new(embedder, store.clone());

        Ok(Self {
            collector,
            persister,
            searcher,
            assembler,
            clusterer,
            value_store,
            memory_bank,
            store,
        })
    }
}

// ============================================================================
// SERVER
// ============================================================================

/// MCP server state machine
pub struct McpServer {
    services: Arc<Services>,
    initialized: bool,
}

impl McpServer {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            initialized: false,
        }
    }

    /// Handle one JSON-RPC request. `None` means no response is due
    /// (notifications).
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(json!({})),
            method => {
                warn!("unknown method: {}", method);
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(params) => serde_json::from_value(params)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Use the client's version when it is older than ours; some
        // clients reject servers with newer protocol versions.
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            info!(
                "client requested older protocol version {}, using it",
                request.protocol_version
            );
            request.protocol_version.clone()
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        info!("MCP session initialized with protocol version {negotiated}");

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "engram".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(HashMap::from([(
                    "listChanged".to_string(),
                    json!(false),
                )])),
            },
        };
        serde_json::to_value(result).map_err(|_| JsonRpcError::internal_error())
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = tools::all_tools();
        Ok(json!({"tools": tools}))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(params) => serde_json::from_value(params)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing params")),
        };

        // Check-in bookkeeping; failures here never block the call
        if let Err(e) = self.services.collector.increment_tool_count().await {
            warn!(error = %e, "tool counter increment failed");
        }

        let args = request.arguments.unwrap_or_else(|| json!({}));
        let Some(result) = tools::dispatch(&self.services, &request.name, args).await else {
            return Err(JsonRpcError::invalid_params(&format!(
                "unknown tool '{}'",
                request.name
            )));
        };

        let is_error = tools::is_error(&result);
        let text =
            serde_json::to_string(&result).map_err(|_| JsonRpcError::internal_error())?;
        Ok(json!({
            "content": [{"type": "text", "text": text}],
            "isError": is_error,
        }))
    }
}

// ============================================================================
// TEST SUPPORT
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::test_support::test_services;
    use super::*;

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: Some(json!(1)),
            method: method.to_string(),
            params,
        }
    }

    async fn initialized_server() -> (McpServer, tempfile::TempDir) {
        let (services, dir) = test_services();
        let mut server = McpServer::new(Arc::new(services));
        server
            .handle_request(request("initialize", None))
            .await
            .unwrap();
        (server, dir)
    }

    #[tokio::test]
    async fn test_rejects_calls_before_initialize() {
        let (services, _dir) = test_services();
        let mut server = McpServer::new(Arc::new(services));
        let response = server
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let (services, _dir) = test_services();
        let mut server = McpServer::new(Arc::new(services));
        let response = server
            .handle_request(request(
                "initialize",
                Some(json!({"protocolVersion": "2024-01-01"})),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-01-01");
        assert_eq!(result["serverInfo"]["name"], "engram");
    }

    #[tokio::test]
    async fn test_tools_list_names() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 21);
        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        for expected in [
            "start_ghap",
            "resolve_ghap",
            "store_memory",
            "search_experiences",
            "get_clusters",
            "assemble_context",
            "get_premortem_context",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_tools_call_roundtrip() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({"name": "get_active_ghap", "arguments": {}})),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        let inner: Value = serde_json::from_str(text).unwrap();
        assert_eq!(inner["active"], false);
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({"name": "not_a_tool", "arguments": {}})),
            ))
            .await
            .unwrap();
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_tools_call_increments_tool_counter() {
        let (mut server, _dir) = initialized_server().await;
        server
            .handle_request(request(
                "tools/call",
                Some(json!({"name": "get_active_ghap", "arguments": {}})),
            ))
            .await
            .unwrap();

        // Counter advanced; no active entry so no check-in yet
        let services = server.services.clone();
        assert!(!services.collector.should_check_in(1).await.unwrap());
        let count = services.collector.increment_tool_count().await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request("bogus/method", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_ping() {
        let (mut server, _dir) = initialized_server().await;
        let response = server.handle_request(request("ping", None)).await.unwrap();
        assert!(response.result.is_some());
    }

    /// Schema enum lists must equal the validation enum sets exactly
    #[test]
    fn test_schema_enums_match_validation_sets() {
        use engram_core::memories::MemoryCategory;
        use engram_core::observation::{Domain, OutcomeStatus, RootCauseCategory, Strategy};
        use engram_core::search::SearchMode;
        use engram_core::Axis;

        let tools = tools::all_tools();
        let schema_of = |name: &str| {
            tools
                .iter()
                .find(|t| t.name == name)
                .unwrap_or_else(|| panic!("tool {name} missing"))
                .input_schema
                .clone()
        };
        let enum_values = |schema: &Value, pointer: &str| -> Vec<String> {
            schema
                .pointer(pointer)
                .and_then(|v| v.as_array())
                .unwrap_or_else(|| panic!("no enum at {pointer}"))
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        };

        let start = schema_of("start_ghap");
        assert_eq!(enum_values(&start, "/properties/domain/enum"), Domain::names());
        assert_eq!(
            enum_values(&start, "/properties/strategy/enum"),
            Strategy::names()
        );

        let resolve = schema_of("resolve_ghap");
        assert_eq!(
            enum_values(&resolve, "/properties/status/enum"),
            OutcomeStatus::names()
        );
        assert_eq!(
            enum_values(&resolve, "/properties/root_cause/properties/category/enum"),
            RootCauseCategory::names()
        );

        let experiences = schema_of("search_experiences");
        assert_eq!(enum_values(&experiences, "/properties/axis/enum"), Axis::names());
        assert_eq!(
            enum_values(&experiences, "/properties/search_mode/enum"),
            SearchMode::names()
        );

        let memory = schema_of("store_memory");
        assert_eq!(
            enum_values(&memory, "/properties/category/enum"),
            MemoryCategory::names()
        );

        let context = schema_of("assemble_context");
        assert_eq!(
            enum_values(&context, "/properties/context_types/items/enum"),
            engram_core::SourceKind::names()
        );
    }
}
