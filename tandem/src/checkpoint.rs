//! Record/replay of steps, tool executions and resolved hooks.
//!
//! A [`Checkpoint`] is the serialisable record of everything a run has
//! completed: enough to replay the graph past those points without
//! re-executing external effects. It is opaque to the runtime's callers;
//! they persist it wherever they like and hand it back on re-entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;
use crate::step::StreamResult;

/// A completed step: the final output of one producer submission.
///
/// Steps replay positionally: the Nth step call of a run consumes the Nth
/// recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    /// Dynamic invocation index of the step within the run.
    pub index: usize,
    /// The step's buffered message output.
    pub messages: Vec<Message>,
}

impl StepEvent {
    /// Rebuild the step's aggregated result for replay.
    #[must_use]
    pub fn to_stream_result(&self) -> StreamResult {
        StreamResult::new(self.messages.clone())
    }
}

/// A completed tool execution, keyed by tool call id.
///
/// Only successful executions are recorded; errors are not replayable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    /// Id of the tool call.
    pub tool_call_id: String,
    /// The result value.
    pub result: Value,
}

/// A resolved hook, keyed by label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    /// Label of the hook.
    pub label: String,
    /// The validated resolution payload.
    pub resolution: Value,
}

/// The serialisable record of a run's completed effects.
///
/// Append-only within a run: a re-entered run starts from the incoming
/// checkpoint and grows it, so the new checkpoint is always a superset of
/// the old one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Completed steps, in invocation order.
    #[serde(default)]
    pub steps: Vec<StepEvent>,
    /// Successful tool executions.
    #[serde(default)]
    pub tools: Vec<ToolEvent>,
    /// Resolved hooks.
    #[serde(default)]
    pub hooks: Vec<HookEvent>,
}

impl Checkpoint {
    /// Create an empty checkpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise to the flat JSON object `{steps, tools, hooks}`.
    ///
    /// # Errors
    ///
    /// Returns a serialisation error if a recorded value cannot be
    /// represented as JSON (it cannot happen for values produced by the
    /// runtime itself).
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Deserialise from the JSON object produced by [`Self::to_json`].
    ///
    /// # Errors
    ///
    /// Returns a deserialisation error when the value does not match the
    /// checkpoint shape.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Look up a recorded tool result by call id.
    #[must_use]
    pub fn tool_result(&self, tool_call_id: &str) -> Option<&Value> {
        self.tools
            .iter()
            .find(|t| t.tool_call_id == tool_call_id)
            .map(|t| &t.result)
    }

    /// Look up a recorded hook resolution by label.
    #[must_use]
    pub fn hook_resolution(&self, label: &str) -> Option<&Value> {
        self.hooks
            .iter()
            .find(|h| h.label == label)
            .map(|h| &h.resolution)
    }
}
