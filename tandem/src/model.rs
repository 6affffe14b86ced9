//! The language-model contract consumed by the runtime.
//!
//! Adapters implement [`LanguageModel::stream_events`], mapping the
//! internal message history (tool results embedded inside assistant
//! messages included) into their provider's native format and provider
//! events into the [`StreamEvent`](crate::stream::StreamEvent) alphabet.
//! [`stream`] and [`buffer`] drive that event sequence through a
//! [`StreamHandler`] into normalised message snapshots.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use schemars::JsonSchema;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Message, Part, StructuredOutputPart};
use crate::stream::{StreamEvent, StreamHandler};
use crate::tool::ToolSchema;

/// A named JSON Schema for the structured-output path.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    /// Name recorded on the resulting part.
    pub name: String,
    /// The JSON Schema the final output must satisfy.
    pub schema: Value,
}

impl OutputSchema {
    /// Create an output schema from a name and a raw JSON Schema.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Derive an output schema from a Rust type.
    ///
    /// The type must derive [`schemars::JsonSchema`]; the schema name is
    /// taken from the type name.
    #[must_use]
    pub fn from_type<T: JsonSchema>() -> Self {
        let (name, schema) = crate::tool::generate_json_schema::<T>();
        Self { name, schema }
    }
}

/// One request to a language model.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Conversation history.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolSchema>,
    /// Schema the final output must validate against, if requested.
    pub output_type: Option<OutputSchema>,
}

impl ModelRequest {
    /// Create a request from a message history.
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            output_type: None,
        }
    }

    /// Attach tool schemas.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    /// Request structured output.
    #[must_use]
    pub fn with_output_type(mut self, output_type: OutputSchema) -> Self {
        self.output_type = Some(output_type);
        self
    }
}

/// A finite, non-restartable sequence of adapter events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A finite sequence of normalised message snapshots.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// An LLM adapter.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start one streaming turn and return its event sequence.
    async fn stream_events(&self, request: ModelRequest) -> Result<EventStream>;
}

/// Drive one model turn through a [`StreamHandler`], yielding message
/// snapshots.
///
/// When the request carries an `output_type`, validation runs as a
/// post-processing step after the final snapshot: the final text is parsed
/// as JSON, checked against the schema, and one extra snapshot with a
/// `StructuredOutput` part is yielded.
#[must_use]
pub fn stream(model: Arc<dyn LanguageModel>, request: ModelRequest) -> MessageStream {
    Box::pin(stream! {
        let output_type = request.output_type.clone();
        let mut events = match model.stream_events(request).await {
            Ok(events) => events,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let mut handler = StreamHandler::new();
        let mut last: Option<Message> = None;
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => match handler.handle_event(event) {
                    Ok(snapshot) => {
                        last = Some(snapshot.clone());
                        yield Ok(snapshot);
                    }
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                },
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if let (Some(spec), Some(final_snapshot)) = (output_type, last) {
            match apply_structured_output(&final_snapshot, &spec) {
                Ok(Some(extra)) => yield Ok(extra),
                Ok(None) => {}
                Err(e) => yield Err(e),
            }
        }
    })
}

/// Drain one model turn and return the final message.
///
/// # Errors
///
/// Propagates adapter and normalisation errors; errors when the adapter
/// produced no snapshot at all.
pub async fn buffer(model: Arc<dyn LanguageModel>, request: ModelRequest) -> Result<Message> {
    let mut snapshots = stream(model, request);
    let mut last = None;
    while let Some(item) = snapshots.next().await {
        last = Some(item?);
    }
    last.ok_or_else(|| Error::model("adapter produced no snapshots"))
}

fn apply_structured_output(message: &Message, spec: &OutputSchema) -> Result<Option<Message>> {
    let text = message.text();
    if text.is_empty() {
        return Ok(None);
    }

    let data: Value = serde_json::from_str(text)
        .map_err(|e| Error::StructuredOutput(format!("output is not valid JSON: {e}")))?;

    let validator = jsonschema::validator_for(&spec.schema)
        .map_err(|e| Error::StructuredOutput(format!("invalid output schema: {e}")))?;
    if let Err(violation) = validator.validate(&data) {
        return Err(Error::StructuredOutput(violation.to_string()));
    }

    debug!(output_type = %spec.name, "structured output validated");
    let mut refined = message.clone();
    refined.parts.push(Part::StructuredOutput(StructuredOutputPart {
        data,
        output_type_name: spec.name.clone(),
    }));
    Ok(Some(refined))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mock::MockModel;
    use crate::stream::StreamEvent;

    #[tokio::test]
    async fn stream_normalises_events_into_snapshots() {
        let model: Arc<dyn LanguageModel> = Arc::new(MockModel::new(vec![vec![
            StreamEvent::text_start("b"),
            StreamEvent::text_delta("b", "Hi"),
            StreamEvent::text_delta("b", "!"),
            StreamEvent::text_end("b"),
            StreamEvent::done(None),
        ]]));

        let snapshots: Vec<_> = stream(model, ModelRequest::default())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(snapshots.len(), 5);
        let final_snapshot = snapshots.last().unwrap().as_ref().unwrap();
        assert_eq!(final_snapshot.text(), "Hi!");
        assert!(final_snapshot.is_done());
    }

    #[tokio::test]
    async fn buffer_returns_final_message() {
        let model: Arc<dyn LanguageModel> =
            Arc::new(MockModel::new(vec![MockModel::text_turn("Hello")]));
        let message = buffer(model, ModelRequest::default()).await.unwrap();
        assert_eq!(message.text(), "Hello");
        assert!(message.is_done());
    }

    #[tokio::test]
    async fn structured_output_appends_validated_part() {
        let model: Arc<dyn LanguageModel> =
            Arc::new(MockModel::new(vec![MockModel::text_turn(r#"{"x": 3}"#)]));
        let request = ModelRequest::default().with_output_type(OutputSchema::new(
            "Point",
            serde_json::json!({
                "type": "object",
                "properties": {"x": {"type": "integer"}},
                "required": ["x"]
            }),
        ));

        let message = buffer(model, request).await.unwrap();
        let part = message
            .parts
            .iter()
            .find_map(Part::as_structured_output)
            .unwrap();
        assert_eq!(part.data, serde_json::json!({"x": 3}));
        assert_eq!(part.output_type_name, "Point");
    }

    #[tokio::test]
    async fn structured_output_rejects_schema_violations() {
        let model: Arc<dyn LanguageModel> =
            Arc::new(MockModel::new(vec![MockModel::text_turn(r#"{"x": "nope"}"#)]));
        let request = ModelRequest::default().with_output_type(OutputSchema::new(
            "Point",
            serde_json::json!({
                "type": "object",
                "properties": {"x": {"type": "integer"}},
                "required": ["x"]
            }),
        ));

        let err = buffer(model, request).await.unwrap_err();
        assert!(matches!(err, Error::StructuredOutput(_)));
    }

    #[test]
    fn output_schema_from_type_uses_type_name() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Point {
            x: i64,
        }

        let spec = OutputSchema::from_type::<Point>();
        assert_eq!(spec.name, "Point");
        assert!(spec.schema.get("$schema").is_none());
        assert_eq!(spec.schema["properties"]["x"]["type"], "integer");
    }

    #[tokio::test]
    async fn exhausted_script_surfaces_model_error() {
        let model: Arc<dyn LanguageModel> = Arc::new(MockModel::new(vec![]));
        let err = buffer(model, ModelRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }
}
