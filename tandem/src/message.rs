//! The message model shared by every part of the runtime.
//!
//! All data inside the runtime is normalised to one [`Message`] type made of
//! typed [`Part`]s. Messages produced by a streaming source are refined
//! monotonically: a message id is stable across every snapshot yielded
//! during its production, parts only grow in number and content, part
//! states only move `streaming` → `done`, and tool statuses only move
//! `pending` → `result`/`error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::Usage;

/// Streaming state of a part.
///
/// A part restored from storage carries no state at all (`None` on the
/// owning part), which counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartState {
    /// The part is still receiving deltas.
    Streaming,
    /// The part has been finalised.
    Done,
}

impl PartState {
    /// Get the string representation of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Done => "done",
        }
    }
}

/// Execution status of a tool part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Requested by the model, not yet executed.
    #[default]
    Pending,
    /// Executed successfully; the value is in `result`.
    Result,
    /// Execution or validation failed; the message is in `result`.
    Error,
}

/// Status of a hook suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    /// Awaiting an external resolution.
    Pending,
    /// Resolved with a payload.
    Resolved,
    /// Cancelled before resolution.
    Cancelled,
}

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// System message providing instructions.
    System,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Assistant free text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextPart {
    /// Accumulated text.
    pub text: String,
    /// Streaming state; `None` when restored from storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PartState>,
    /// Current delta; non-empty only while the part is streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

impl TextPart {
    /// Create a finalised text part with no streaming state.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            state: None,
            delta: None,
        }
    }
}

/// Hidden chain-of-thought.
///
/// The signature is an opaque per-provider verifier (Anthropic thinking
/// blocks carry one); it must be preserved and sent back in multi-turn
/// conversations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningPart {
    /// Accumulated reasoning text.
    pub text: String,
    /// Opaque provider signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Streaming state; `None` when restored from storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PartState>,
    /// Current delta; non-empty only while the part is streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

/// A model-requested tool invocation, mutated in place as results arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPart {
    /// Unique identifier for this call within the message.
    pub tool_call_id: String,
    /// Name of the tool being called.
    pub tool_name: String,
    /// Raw argument JSON as produced by the model.
    pub tool_args: String,
    /// Execution status.
    #[serde(default)]
    pub status: ToolStatus,
    /// Result value (`status=result`) or error description (`status=error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Streaming state of the argument stream; `None` when restored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PartState>,
    /// Current argument delta; non-empty only while streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_delta: Option<String>,
}

impl ToolPart {
    /// Create a pending tool part with finalised arguments.
    #[must_use]
    pub fn pending(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_args: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_args: tool_args.into(),
            status: ToolStatus::Pending,
            result: None,
            state: Some(PartState::Done),
            args_delta: None,
        }
    }

    /// Set the result and mark the call as completed.
    pub fn set_result(&mut self, result: Value) {
        self.status = ToolStatus::Result;
        self.result = Some(result);
    }

    /// Record a failure; the descriptive string lands in `result` so the
    /// model can react to it.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = ToolStatus::Error;
        self.result = Some(Value::String(message.into()));
    }

    /// Returns `true` while the call awaits execution.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, ToolStatus::Pending)
    }
}

fn empty_metadata() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A hook suspension point surfaced in the message stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPart {
    /// The hook's label.
    pub hook_id: String,
    /// Declared hook type name.
    pub hook_type: String,
    /// Current status of the suspension point.
    pub status: HookStatus,
    /// Caller-supplied metadata shown to whoever resolves the hook.
    #[serde(default = "empty_metadata")]
    pub metadata: Value,
    /// The validated resolution payload, present once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Value>,
}

/// A validated object produced by the structured-output path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredOutputPart {
    /// The validated data.
    pub data: Value,
    /// Name of the schema the data was validated against.
    pub output_type_name: String,
}

/// A typed fragment of a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Assistant free text.
    Text(TextPart),
    /// Hidden chain-of-thought.
    Reasoning(ReasoningPart),
    /// Model-requested tool invocation.
    Tool(ToolPart),
    /// Hook suspension point.
    Hook(HookPart),
    /// Validated structured output.
    StructuredOutput(StructuredOutputPart),
}

impl Part {
    /// Streaming state of the part, if it has one.
    #[must_use]
    pub const fn state(&self) -> Option<PartState> {
        match self {
            Self::Text(p) => p.state,
            Self::Reasoning(p) => p.state,
            Self::Tool(p) => p.state,
            Self::Hook(_) | Self::StructuredOutput(_) => None,
        }
    }

    /// Returns the text part if this is one.
    #[must_use]
    pub const fn as_text(&self) -> Option<&TextPart> {
        match self {
            Self::Text(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the reasoning part if this is one.
    #[must_use]
    pub const fn as_reasoning(&self) -> Option<&ReasoningPart> {
        match self {
            Self::Reasoning(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the tool part if this is one.
    #[must_use]
    pub const fn as_tool(&self) -> Option<&ToolPart> {
        match self {
            Self::Tool(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the hook part if this is one.
    #[must_use]
    pub const fn as_hook(&self) -> Option<&HookPart> {
        match self {
            Self::Hook(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the structured output part if this is one.
    #[must_use]
    pub const fn as_structured_output(&self) -> Option<&StructuredOutputPart> {
        match self {
            Self::StructuredOutput(p) => Some(p),
            _ => None,
        }
    }
}

/// A streaming delta for tool-call arguments, as exposed by
/// [`Message::tool_deltas`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDelta {
    /// Id of the tool call being streamed.
    pub tool_call_id: String,
    /// Name of the tool.
    pub tool_name: String,
    /// The current argument delta.
    pub args_delta: String,
}

pub(crate) fn gen_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

fn gen_message_id() -> String {
    gen_id("msg")
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable id, shared by every snapshot of one streamed message.
    #[serde(default = "gen_message_id")]
    pub id: String,
    /// Role of the message sender.
    pub role: Role,
    /// The typed fragments making up the message.
    pub parts: Vec<Part>,
    /// Caller-chosen label used to route messages to UI surfaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Usage reported by the adapter for this turn, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    /// Create a new message with a fresh id.
    #[must_use]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: gen_message_id(),
            role,
            parts,
            label: None,
            usage: None,
        }
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::Text(TextPart::new(text))])
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::Text(TextPart::new(text))])
    }

    /// Create a new system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::Text(TextPart::new(text))])
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// A message is done when no part is still streaming. Parts without a
    /// streaming state (restored from storage) count as done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.parts
            .iter()
            .all(|p| p.state() != Some(PartState::Streaming))
    }

    /// Text of the first text part, or `""`.
    #[must_use]
    pub fn text(&self) -> &str {
        self.parts
            .iter()
            .find_map(Part::as_text)
            .map_or("", |p| p.text.as_str())
    }

    /// Text of the first reasoning part, or `""`.
    #[must_use]
    pub fn reasoning(&self) -> &str {
        self.parts
            .iter()
            .find_map(Part::as_reasoning)
            .map_or("", |p| p.text.as_str())
    }

    /// Current delta of the active text part, or `""`.
    #[must_use]
    pub fn text_delta(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| p.as_text().and_then(|t| t.delta.as_deref()))
            .unwrap_or("")
    }

    /// Current delta of the active reasoning part, or `""`.
    #[must_use]
    pub fn reasoning_delta(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| p.as_reasoning().and_then(|t| t.delta.as_deref()))
            .unwrap_or("")
    }

    /// Current argument deltas across all streaming tool parts.
    #[must_use]
    pub fn tool_deltas(&self) -> Vec<ToolDelta> {
        self.parts
            .iter()
            .filter_map(Part::as_tool)
            .filter_map(|p| {
                p.args_delta.as_ref().map(|delta| ToolDelta {
                    tool_call_id: p.tool_call_id.clone(),
                    tool_name: p.tool_name.clone(),
                    args_delta: delta.clone(),
                })
            })
            .collect()
    }

    /// All tool parts of the message, in order.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolPart> {
        self.parts.iter().filter_map(Part::as_tool).collect()
    }

    /// Look up a tool part by call id.
    #[must_use]
    pub fn get_tool_part(&self, tool_call_id: &str) -> Option<&ToolPart> {
        self.parts
            .iter()
            .filter_map(Part::as_tool)
            .find(|p| p.tool_call_id == tool_call_id)
    }

    /// Look up a tool part by call id, mutably.
    pub fn get_tool_part_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolPart> {
        self.parts.iter_mut().find_map(|p| match p {
            Part::Tool(tp) if tp.tool_call_id == tool_call_id => Some(tp),
            _ => None,
        })
    }

    /// First hook part of the message, if any.
    #[must_use]
    pub fn get_hook_part(&self) -> Option<&HookPart> {
        self.parts.iter().find_map(Part::as_hook)
    }

    /// Look up a hook part by hook id.
    #[must_use]
    pub fn get_hook_part_by_id(&self, hook_id: &str) -> Option<&HookPart> {
        self.parts
            .iter()
            .filter_map(Part::as_hook)
            .find(|p| p.hook_id == hook_id)
    }
}

/// Convenience builder for the common system + user opening.
#[must_use]
pub fn make_messages(system: Option<&str>, user: &str) -> Vec<Message> {
    let mut result = Vec::with_capacity(2);
    if let Some(system) = system {
        result.push(Message::system(system));
    }
    result.push(Message::user(user));
    result
}
