//! Tool handlers the endpoint can invoke mid-conversation.
//!
//! Handlers are registered by name before the session starts. The registry
//! also exports the function declarations sent in the session setup.

pub mod dispatcher;
pub mod ticket;

pub use dispatcher::ToolCallDispatcher;
pub use ticket::TicketStatusTool;

use crate::config::ToolsConfig;
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A callable tool.
///
/// `call` runs on the blocking thread pool, so it may do blocking I/O.
pub trait ToolHandler: Send + Sync {
    /// Name the endpoint uses to invoke the tool.
    fn name(&self) -> &str;

    /// Description advertised to the endpoint.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ToolHandler`](crate::SessionError::ToolHandler)
    /// when the tool cannot produce a result.
    fn call(&self, arguments: serde_json::Map<String, serde_json::Value>)
    -> Result<serde_json::Value>;
}

/// Function declaration sent in the session setup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: serde_json::Value,
}

/// Name → handler map.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in tools enabled in `config`.
    ///
    /// A disabled tool is not declared to the endpoint, so calls for it get
    /// only the generic acknowledgement.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        match TicketStatusTool::from_config(&config.ticket) {
            Some(tool) => {
                info!(tool = %config.ticket.name, "ticket tool enabled");
                registry.register(Arc::new(tool));
            }
            None => info!(
                tool = %config.ticket.name,
                "ticket tool disabled; set tools.ticket.endpoint to enable it"
            ),
        }
        registry
    }

    /// Register a handler. Replaces any existing handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.name().to_owned(), handler);
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Declarations for every registered handler, sorted by name.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<FunctionDeclaration> = self
            .handlers
            .values()
            .map(|h| FunctionDeclaration {
                name: h.name().to_owned(),
                description: h.description().to_owned(),
                parameters: h.parameters(),
            })
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }
}
