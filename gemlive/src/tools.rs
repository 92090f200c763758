//! Typed tool dispatch.
//!
//! The session only reports tool calls. A [`ToolRegistry`] maps tool names
//! to handlers whose arguments are deserialized into a concrete type before
//! the handler runs, so malformed arguments never reach application code.

use crate::error::{RealtimeError, Result};
use crate::frame::{FunctionCall, FunctionResponse, ToolDefinition};
use crate::session::{LiveSession, SessionEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handler for tool calls from the model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the raw arguments object.
    async fn execute(&self, args: Value) -> Result<Value>;
}

struct TypedHandler<A, F> {
    handler: F,
    _args: PhantomData<fn() -> A>,
}

#[async_trait]
impl<A, F, Fut> ToolHandler for TypedHandler<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn execute(&self, args: Value) -> Result<Value> {
        let args: A = serde_json::from_value(args)
            .map_err(|e| RealtimeError::tool(format!("invalid arguments: {e}")))?;
        (self.handler)(args).await
    }
}

/// Tools available to the model, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, Arc<dyn ToolHandler>)>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool whose arguments deserialize into `A`.
    pub fn register<A, F, Fut>(&mut self, definition: ToolDefinition, handler: F) -> &mut Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_handler(definition, TypedHandler { handler, _args: PhantomData })
    }

    /// Register a handler that takes the raw arguments object.
    pub fn register_handler(
        &mut self,
        definition: ToolDefinition,
        handler: impl ToolHandler + 'static,
    ) -> &mut Self {
        self.tools.insert(definition.name.clone(), (definition, Arc::new(handler)));
        self
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for the setup frame, sorted by name.
    pub fn declarations(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<_> = self.tools.values().map(|(def, _)| def.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Run the tool a call names and build the response for its id.
    ///
    /// Unknown tools, invalid arguments and handler errors become
    /// `{"error": "..."}` responses so the model always gets an answer.
    pub async fn dispatch(&self, call: &FunctionCall) -> FunctionResponse {
        let result = match self.tools.get(&call.name) {
            Some((_, handler)) => handler.execute(call.args.clone()).await,
            None => Err(RealtimeError::tool(format!("unknown tool '{}'", call.name))),
        };

        let response = match result {
            Ok(value) => {
                debug!(tool = %call.name, id = %call.id, "Tool succeeded");
                value
            }
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, error = %e, "Tool failed");
                json!({ "error": e.to_string() })
            }
        };
        FunctionResponse::new(call.id.clone(), response).with_name(call.name.clone())
    }
}

/// Call ids being answered and the subset the endpoint withdrew.
#[derive(Debug, Default)]
struct InFlight {
    running: HashSet<String>,
    cancelled: HashSet<String>,
}

impl InFlight {
    fn cancel(&mut self, ids: Vec<String>) {
        for id in ids {
            if self.running.contains(&id) {
                self.cancelled.insert(id);
            } else {
                debug!(id = %id, "Cancellation for a call not in flight");
            }
        }
    }

    /// Retire the finished calls, keeping only responses still wanted.
    fn settle(&mut self, responses: Vec<FunctionResponse>) -> Vec<FunctionResponse> {
        responses
            .into_iter()
            .filter(|r| {
                self.running.remove(&r.id);
                !self.cancelled.remove(&r.id)
            })
            .collect()
    }
}

/// Answer `ToolCall` events from `events` with the registry's tools.
///
/// Each batch runs on its own task. Responses for calls withdrawn by a
/// `ToolCallCancellation` while they run are not sent. Returns when
/// `events` closes.
pub async fn serve_tool_calls(
    session: LiveSession,
    registry: Arc<ToolRegistry>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    let in_flight: Arc<Mutex<InFlight>> = Arc::default();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::ToolCall(calls) => {
                info!(count = calls.len(), "Dispatching tool calls");
                in_flight.lock().running.extend(calls.iter().map(|c| c.id.clone()));
                let session = session.clone();
                let registry = registry.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    let dispatches = calls.iter().map(|call| registry.dispatch(call));
                    let responses = futures::future::join_all(dispatches).await;
                    let responses = in_flight.lock().settle(responses);
                    if responses.is_empty() {
                        return;
                    }
                    if let Err(e) = session.send_tool_response(responses) {
                        warn!(error = %e, "Tool responses dropped");
                    }
                });
            }
            SessionEvent::ToolCallCancellation(ids) => in_flight.lock().cancel(ids),
            SessionEvent::Close(_) => in_flight.lock().cancelled.clear(),
            _ => {}
        }
    }
}
