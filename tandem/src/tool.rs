//! Tool definitions, the process-wide registry, and the invocation path.
//!
//! A tool pairs an LLM-visible [`ToolSchema`] with a typed async
//! implementation. The registry is a process-wide name → tool map;
//! registering under an existing name replaces the prior entry, which is
//! what lets a durable wrapper swap a plain tool for a dispatching one
//! without touching call sites.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result, ToolError};
use crate::message::{Message, ToolPart};
use crate::runtime::Runtime;

/// What the LLM sees: name, description and a JSON Schema for parameters.
///
/// This is the whole surface handed to adapters; there is no callable on
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Name of the tool (snake_case).
    pub name: String,
    /// What the tool does; guides the model's choice.
    pub description: String,
    /// JSON Schema of the parameters.
    pub param_schema: Value,
    /// Human-readable return type, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl ToolSchema {
    /// Create a new tool schema.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        param_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_schema,
            return_type: None,
        }
    }

    /// Set the return type string.
    #[must_use]
    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }
}

/// The core trait for tools.
///
/// `Args` doubles as the declared schema: the parameter schema is derived
/// from it and validation is deserialisation into it. Every call receives
/// the active [`Runtime`] so tools can stream progress messages or submit
/// nested work; tools that don't need it ignore the parameter.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Arguments type; its schema is what the LLM is shown.
    type Args: DeserializeOwned + JsonSchema + Send;

    /// Output type of the tool.
    type Output: Serialize + Send;

    /// Error type for tool execution.
    type Error: Into<ToolError> + Send;

    /// Get the name of the tool.
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// JSON Schema for the tool's parameters, derived from [`Self::Args`].
    fn param_schema(&self) -> Value {
        let (_, schema) = generate_json_schema::<Self::Args>();
        schema
    }

    /// Human-readable return type shown alongside the schema.
    fn return_type(&self) -> Option<String> {
        None
    }

    /// Execute the tool.
    async fn call(&self, args: Self::Args, runtime: &Runtime)
    -> std::result::Result<Self::Output, Self::Error>;

    /// The LLM-visible schema of this tool.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_owned(),
            description: self.description(),
            param_schema: self.param_schema(),
            return_type: self.return_type(),
        }
    }
}

/// Generate a JSON Schema from a Rust type that implements
/// [`schemars::JsonSchema`].
///
/// Returns `(name, schema)` where `name` is derived from the type name and
/// `schema` is the JSON Schema definition with the `$schema` meta field
/// removed (LLM APIs don't need it).
#[must_use]
pub fn generate_json_schema<T: JsonSchema>() -> (String, Value) {
    let root = schemars::schema_for!(T);
    let mut schema_value = serde_json::to_value(&root).unwrap_or_default();

    if let Value::Object(ref mut map) = schema_value {
        map.remove("$schema");
    }

    let name = <T as JsonSchema>::schema_name();
    (name.into_owned(), schema_value)
}

/// Object-safe tool for dynamic dispatch; blanket-implemented for every
/// [`Tool`].
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Get the name of the tool.
    fn name(&self) -> &str;

    /// The LLM-visible schema of this tool.
    fn schema(&self) -> ToolSchema;

    /// Invoke with JSON arguments, validating against the declared schema.
    async fn invoke(&self, args: Value, runtime: &Runtime) -> std::result::Result<Value, ToolError>;
}

#[async_trait]
impl<T: Tool + 'static> DynTool for T {
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn schema(&self) -> ToolSchema {
        Tool::schema(self)
    }

    async fn invoke(&self, args: Value, runtime: &Runtime) -> std::result::Result<Value, ToolError> {
        let typed: T::Args = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let output = self.call(typed, runtime).await.map_err(Into::into)?;
        serde_json::to_value(output).map_err(|e| ToolError::Execution(e.to_string()))
    }
}

/// Result of one tool call, distinguishing captured failures from values.
#[derive(Debug)]
pub struct ToolCallResult {
    /// The tool call id.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// The result of execution (success value or captured error).
    pub result: std::result::Result<Value, ToolError>,
}

impl ToolCallResult {
    /// Create a successful result.
    #[must_use]
    pub fn success(id: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            result: Ok(value),
        }
    }

    /// Create a failed result.
    #[must_use]
    pub fn failure(id: impl Into<String>, name: impl Into<String>, error: ToolError) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            result: Err(error),
        }
    }

    /// Check if the call was successful.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Get the output value if successful.
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    /// Get the error if the call failed.
    #[must_use]
    pub fn error(&self) -> Option<&ToolError> {
        self.result.as_ref().err()
    }
}

/// Process-wide name → tool map.
///
/// Mutated at declaration time only; treat as effectively immutable during
/// a run. Registration and lookup both go through [`ToolRegistry::global`]
/// so the durable-wrapper replacement pattern works end to end.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn DynTool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<ToolRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::new)
    }

    /// Register a tool, replacing any prior entry under the same name.
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a boxed tool, replacing any prior entry under the same name.
    pub fn register_arc(&self, tool: Arc<dyn DynTool>) {
        let name = tool.name().to_owned();
        let replaced = self
            .tools
            .write()
            .expect("tool registry poisoned")
            .insert(name.clone(), tool)
            .is_some();
        debug!(tool = %name, replaced, "tool registered");
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DynTool>> {
        self.tools
            .read()
            .expect("tool registry poisoned")
            .get(name)
            .cloned()
    }

    /// Check if a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("tool registry poisoned")
            .contains_key(name)
    }

    /// The LLM-visible schemas of the named tools, in the given order.
    ///
    /// Unknown names are skipped with a warning so a stale tool list does
    /// not abort an adapter call.
    #[must_use]
    pub fn schemas(&self, names: &[&str]) -> Vec<ToolSchema> {
        let tools = self.tools.read().expect("tool registry poisoned");
        names
            .iter()
            .filter_map(|name| {
                let found = tools.get(*name).map(|t| t.schema());
                if found.is_none() {
                    warn!(tool = %name, "schema requested for unregistered tool");
                }
                found
            })
            .collect()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry poisoned")
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Execute one tool call without touching any message.
    ///
    /// The checkpoint is consulted first by `tool_call_id`; on a hit the
    /// real call is skipped and the recorded value returned. A fresh,
    /// successful execution is recorded. Argument and execution failures
    /// are captured in the returned [`ToolCallResult`] so the conversation
    /// can carry them back to the model.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] (wrapped in [`Error::Tool`]) when no
    /// tool is registered under the part's name; that aborts the graph.
    pub async fn execute_tool_call(&self, part: &ToolPart) -> Result<ToolCallResult> {
        self.run_tool(
            part.tool_call_id.clone(),
            part.tool_name.clone(),
            part.tool_args.clone(),
        )
        .await
    }

    /// Execute one tool call and mutate the matching part in place.
    ///
    /// The part transitions `pending` → `result`/`error` so the next
    /// emitted snapshot of the message reflects completion.
    ///
    /// # Errors
    ///
    /// As [`Self::execute_tool_call`], plus [`Error::Internal`] when the
    /// message holds no part with the given id.
    pub async fn execute_tool(
        &self,
        message: &mut Message,
        tool_call_id: &str,
    ) -> Result<ToolCallResult> {
        let part = message
            .get_tool_part(tool_call_id)
            .cloned()
            .ok_or_else(|| Error::internal(format!("no tool part '{tool_call_id}' in message")))?;
        let outcome = self.execute_tool_call(&part).await?;
        apply_outcome(message, &outcome);
        Ok(outcome)
    }

    /// Execute every pending tool call of a message concurrently.
    ///
    /// Outcomes are applied to the message after all calls settle, so a
    /// single follow-up snapshot shows every transition at once.
    ///
    /// # Errors
    ///
    /// The first [`ToolError::NotFound`] aborts the batch and the graph.
    pub async fn execute_tools(&self, message: &mut Message) -> Result<Vec<ToolCallResult>> {
        let pending: Vec<(String, String, String)> = message
            .tool_calls()
            .into_iter()
            .filter(|p| p.is_pending())
            .map(|p| {
                (
                    p.tool_call_id.clone(),
                    p.tool_name.clone(),
                    p.tool_args.clone(),
                )
            })
            .collect();

        let outcomes = futures::future::join_all(
            pending
                .into_iter()
                .map(|(id, name, args)| self.run_tool(id, name, args)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        for outcome in &outcomes {
            apply_outcome(message, outcome);
        }
        Ok(outcomes)
    }

    async fn run_tool(
        &self,
        tool_call_id: String,
        tool_name: String,
        raw_args: String,
    ) -> Result<ToolCallResult> {
        if let Some(recorded) = self.state().checkpoint.tool_result(&tool_call_id).cloned() {
            debug!(tool = %tool_name, id = %tool_call_id, "replaying tool result from checkpoint");
            return Ok(ToolCallResult::success(tool_call_id, tool_name, recorded));
        }

        let tool = ToolRegistry::global()
            .get(&tool_name)
            .ok_or_else(|| Error::Tool(ToolError::NotFound(tool_name.clone())))?;

        let args: Value = if raw_args.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(&raw_args) {
                Ok(value) => value,
                Err(e) => {
                    let error = ToolError::InvalidArguments(e.to_string());
                    warn!(tool = %tool_name, id = %tool_call_id, error = %error, "tool arguments rejected");
                    return Ok(ToolCallResult::failure(tool_call_id, tool_name, error));
                }
            }
        };

        debug!(tool = %tool_name, id = %tool_call_id, "executing tool");
        match tool.invoke(args, self).await {
            Ok(value) => {
                self.record_tool_event(&tool_call_id, value.clone());
                Ok(ToolCallResult::success(tool_call_id, tool_name, value))
            }
            Err(error) => {
                warn!(tool = %tool_name, id = %tool_call_id, error = %error, "tool failed");
                Ok(ToolCallResult::failure(tool_call_id, tool_name, error))
            }
        }
    }

    fn record_tool_event(&self, tool_call_id: &str, result: Value) {
        let mut state = self.state();
        if state.checkpoint.tool_result(tool_call_id).is_none() {
            state
                .checkpoint
                .tools
                .push(crate::checkpoint::ToolEvent {
                    tool_call_id: tool_call_id.to_owned(),
                    result,
                });
        }
    }
}

fn apply_outcome(message: &mut Message, outcome: &ToolCallResult) {
    if let Some(part) = message.get_tool_part_mut(&outcome.id) {
        match &outcome.result {
            Ok(value) => part.set_result(value.clone()),
            Err(error) => part.set_error(error.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::message::{Part, Role, ToolStatus};

    struct DoubleTool;

    #[derive(Deserialize, JsonSchema)]
    struct DoubleArgs {
        x: i64,
    }

    #[async_trait]
    impl Tool for DoubleTool {
        const NAME: &'static str = "registry_double";
        type Args = DoubleArgs;
        type Output = i64;
        type Error = ToolError;

        fn description(&self) -> String {
            "Double a number.".to_owned()
        }

        async fn call(
            &self,
            args: Self::Args,
            _runtime: &Runtime,
        ) -> std::result::Result<Self::Output, Self::Error> {
            Ok(args.x * 2)
        }
    }

    struct OptionalTool;

    #[derive(Deserialize, JsonSchema)]
    struct OptionalArgs {
        query: String,
        #[serde(default)]
        limit: Option<u32>,
    }

    #[async_trait]
    impl Tool for OptionalTool {
        const NAME: &'static str = "registry_search";
        type Args = OptionalArgs;
        type Output = String;
        type Error = ToolError;

        fn description(&self) -> String {
            "Search.".to_owned()
        }

        async fn call(
            &self,
            args: Self::Args,
            _runtime: &Runtime,
        ) -> std::result::Result<Self::Output, Self::Error> {
            let _ = args.limit;
            Ok(args.query)
        }
    }

    fn tool_message(id: &str, name: &str, args: &str) -> Message {
        Message {
            id: "m1".to_owned(),
            role: Role::Assistant,
            parts: vec![Part::Tool(ToolPart::pending(id, name, args))],
            label: None,
            usage: None,
        }
    }

    mod schema {
        use super::*;

        #[test]
        fn derived_from_args_type() {
            let schema = Tool::schema(&DoubleTool);
            assert_eq!(schema.name, "registry_double");
            assert_eq!(schema.description, "Double a number.");
            let props = &schema.param_schema["properties"];
            assert_eq!(props["x"]["type"], "integer");
            assert!(
                schema.param_schema["required"]
                    .as_array()
                    .unwrap()
                    .contains(&serde_json::json!("x"))
            );
        }

        #[test]
        fn optional_params_not_required() {
            let schema = Tool::schema(&OptionalTool);
            let required = schema.param_schema["required"].as_array().unwrap();
            assert!(required.contains(&serde_json::json!("query")));
            assert!(!required.contains(&serde_json::json!("limit")));
            assert!(schema.param_schema["properties"]["limit"].is_object());
        }
    }

    mod registry {
        use super::*;

        #[test]
        fn registration_and_lookup() {
            let registry = ToolRegistry::new();
            registry.register(DoubleTool);
            assert!(registry.contains("registry_double"));
            assert!(registry.get("registry_missing").is_none());
        }

        #[test]
        fn replacement_by_name() {
            struct FirstTool;

            #[async_trait]
            impl Tool for FirstTool {
                const NAME: &'static str = "registry_swap";
                type Args = Value;
                type Output = &'static str;
                type Error = ToolError;

                fn description(&self) -> String {
                    "first".to_owned()
                }

                async fn call(
                    &self,
                    _args: Self::Args,
                    _runtime: &Runtime,
                ) -> std::result::Result<Self::Output, Self::Error> {
                    Ok("first")
                }
            }

            struct SecondTool;

            #[async_trait]
            impl Tool for SecondTool {
                const NAME: &'static str = "registry_swap";
                type Args = Value;
                type Output = &'static str;
                type Error = ToolError;

                fn description(&self) -> String {
                    "second".to_owned()
                }

                async fn call(
                    &self,
                    _args: Self::Args,
                    _runtime: &Runtime,
                ) -> std::result::Result<Self::Output, Self::Error> {
                    Ok("second")
                }
            }

            let registry = ToolRegistry::new();
            registry.register(FirstTool);
            registry.register(SecondTool);
            assert_eq!(
                registry.get("registry_swap").unwrap().schema().description,
                "second"
            );
        }

        #[test]
        fn schemas_skip_unknown_names() {
            let registry = ToolRegistry::new();
            registry.register(DoubleTool);
            let schemas = registry.schemas(&["registry_double", "registry_nope"]);
            assert_eq!(schemas.len(), 1);
        }
    }

    mod invocation {
        use super::*;

        #[tokio::test]
        async fn execute_tool_mutates_part_and_records() {
            ToolRegistry::global().register(DoubleTool);
            let (runtime, _step_rx, _msg_rx) = Runtime::detached();

            let mut message = tool_message("tc-1", "registry_double", r#"{"x": 5}"#);
            let outcome = runtime.execute_tool(&mut message, "tc-1").await.unwrap();
            assert!(outcome.is_success());
            assert_eq!(outcome.output(), Some(&serde_json::json!(10)));

            let part = message.get_tool_part("tc-1").unwrap();
            assert_eq!(part.status, ToolStatus::Result);
            assert_eq!(part.result, Some(serde_json::json!(10)));

            let cp = runtime.checkpoint();
            assert_eq!(cp.tool_result("tc-1"), Some(&serde_json::json!(10)));
        }

        #[tokio::test]
        async fn missing_tool_raises() {
            let (runtime, _step_rx, _msg_rx) = Runtime::detached();
            let mut message = tool_message("tc-1", "registry_nonexistent_zzz", "{}");
            let err = runtime.execute_tool(&mut message, "tc-1").await.unwrap_err();
            assert!(matches!(err, Error::Tool(ToolError::NotFound(_))));
        }

        #[tokio::test]
        async fn invalid_args_are_captured_not_raised() {
            ToolRegistry::global().register(DoubleTool);
            let (runtime, _step_rx, _msg_rx) = Runtime::detached();

            let mut message = tool_message("tc-1", "registry_double", r#"{"x": "five"}"#);
            let outcome = runtime.execute_tool(&mut message, "tc-1").await.unwrap();
            assert!(!outcome.is_success());

            let part = message.get_tool_part("tc-1").unwrap();
            assert_eq!(part.status, ToolStatus::Error);
            // Captured failures are not replayable.
            assert!(runtime.checkpoint().tools.is_empty());
        }

        #[tokio::test]
        async fn empty_args_parse_as_empty_object() {
            struct NoArgsTool;

            #[derive(Deserialize, JsonSchema)]
            struct NoArgs {}

            #[async_trait]
            impl Tool for NoArgsTool {
                const NAME: &'static str = "registry_noargs";
                type Args = NoArgs;
                type Output = &'static str;
                type Error = ToolError;

                fn description(&self) -> String {
                    "No arguments.".to_owned()
                }

                async fn call(
                    &self,
                    _args: Self::Args,
                    _runtime: &Runtime,
                ) -> std::result::Result<Self::Output, Self::Error> {
                    Ok("ok")
                }
            }

            ToolRegistry::global().register(NoArgsTool);
            let (runtime, _step_rx, _msg_rx) = Runtime::detached();
            let mut message = tool_message("tc-1", "registry_noargs", "");
            let outcome = runtime.execute_tool(&mut message, "tc-1").await.unwrap();
            assert!(outcome.is_success());
        }

        #[tokio::test]
        async fn replay_skips_execution() {
            use std::sync::atomic::{AtomicUsize, Ordering};
            static CALLS: AtomicUsize = AtomicUsize::new(0);

            struct CountingTool;

            #[async_trait]
            impl Tool for CountingTool {
                const NAME: &'static str = "registry_counting";
                type Args = DoubleArgs;
                type Output = i64;
                type Error = ToolError;

                fn description(&self) -> String {
                    "Counts calls.".to_owned()
                }

                async fn call(
                    &self,
                    args: Self::Args,
                    _runtime: &Runtime,
                ) -> std::result::Result<Self::Output, Self::Error> {
                    CALLS.fetch_add(1, Ordering::SeqCst);
                    Ok(args.x + 1)
                }
            }

            ToolRegistry::global().register(CountingTool);

            let (runtime, _s, _m) = Runtime::detached();
            let mut message = tool_message("tc-replay", "registry_counting", r#"{"x": 5}"#);
            runtime.execute_tool(&mut message, "tc-replay").await.unwrap();
            assert_eq!(CALLS.load(Ordering::SeqCst), 1);
            let cp = runtime.checkpoint();

            // Re-entry with the recorded checkpoint: no execution.
            let (runtime2, _s2, _m2) = Runtime::create(cp, HashMap::new(), false);
            let mut message2 = tool_message("tc-replay", "registry_counting", r#"{"x": 5}"#);
            let outcome = runtime2
                .execute_tool(&mut message2, "tc-replay")
                .await
                .unwrap();
            assert_eq!(CALLS.load(Ordering::SeqCst), 1);
            assert_eq!(outcome.output(), Some(&serde_json::json!(6)));
            assert_eq!(
                message2.get_tool_part("tc-replay").unwrap().status,
                ToolStatus::Result
            );
        }

        #[tokio::test]
        async fn parallel_tools_all_complete() {
            ToolRegistry::global().register(DoubleTool);
            let (runtime, _step_rx, _msg_rx) = Runtime::detached();

            let mut message = Message {
                id: "m1".to_owned(),
                role: Role::Assistant,
                parts: vec![
                    Part::Tool(ToolPart::pending("tc-1", "registry_double", r#"{"x": 3}"#)),
                    Part::Tool(ToolPart::pending("tc-2", "registry_double", r#"{"x": 7}"#)),
                ],
                label: None,
                usage: None,
            };

            let outcomes = runtime.execute_tools(&mut message).await.unwrap();
            assert_eq!(outcomes.len(), 2);
            assert_eq!(
                message.get_tool_part("tc-1").unwrap().result,
                Some(serde_json::json!(6))
            );
            assert_eq!(
                message.get_tool_part("tc-2").unwrap().result,
                Some(serde_json::json!(14))
            );
            assert_eq!(runtime.checkpoint().tools.len(), 2);
        }
    }
}
