//! Step results and the convenience producers built from the core
//! primitives.
//!
//! [`stream_step`] and [`stream_loop`] are assembled entirely from public
//! runtime operations; custom workflows can use them as reference when
//! rolling their own producers.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolPart};
use crate::model::{self, LanguageModel, ModelRequest};
use crate::runtime::Runtime;
use crate::tool::ToolSchema;

/// The aggregated output of one completed step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamResult {
    /// Every snapshot the step yielded, in order.
    pub messages: Vec<Message>,
}

impl StreamResult {
    /// Create a result from buffered messages.
    #[must_use]
    pub const fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// The last (canonical) message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the last message, or `""`.
    #[must_use]
    pub fn text(&self) -> &str {
        self.last_message().map_or("", Message::text)
    }

    /// Tool calls of the last message.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolPart> {
        self.last_message()
            .map(Message::tool_calls)
            .unwrap_or_default()
    }
}

/// One LLM streaming call submitted as a step.
///
/// Every snapshot is stamped with `label` before it reaches the consumer.
///
/// # Errors
///
/// Propagates adapter and runtime errors from the step.
pub async fn stream_step(
    runtime: &Runtime,
    model: Arc<dyn LanguageModel>,
    messages: Vec<Message>,
    tools: Vec<ToolSchema>,
    label: Option<&str>,
) -> Result<StreamResult> {
    let label = label.map(str::to_owned);
    let request = ModelRequest::new(messages).with_tools(tools);
    let stream = model::stream(model, request).map(move |item| {
        item.map(|mut message| {
            message.label.clone_from(&label);
            message
        })
    });
    runtime.step(stream).await
}

/// The agent loop: stream the model, execute tool calls, feed results
/// back, repeat until a turn requests no tools.
///
/// After each round of tool execution the refreshed assistant message is
/// re-emitted sideband so consumers observe the `pending` → `result`
/// transition.
///
/// # Errors
///
/// Propagates adapter errors, unknown-tool errors and runtime errors.
pub async fn stream_loop(
    runtime: &Runtime,
    model: Arc<dyn LanguageModel>,
    messages: Vec<Message>,
    tools: Vec<ToolSchema>,
    label: Option<&str>,
) -> Result<StreamResult> {
    let mut local = messages;
    loop {
        let result = stream_step(runtime, model.clone(), local.clone(), tools.clone(), label).await?;

        if result.tool_calls().is_empty() {
            return Ok(result);
        }
        let Some(mut last) = result.last_message().cloned() else {
            return Ok(result);
        };

        runtime.execute_tools(&mut last).await?;

        // Consumers already saw the pending snapshot; show them the
        // completed one.
        runtime.put_message(last.clone());
        local.push(last);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::{Part, Role, TextPart};

    fn text_message(id: &str, text: &str) -> Message {
        Message {
            id: id.to_owned(),
            role: Role::Assistant,
            parts: vec![Part::Text(TextPart::new(text))],
            label: None,
            usage: None,
        }
    }

    #[test]
    fn empty_result() {
        let r = StreamResult::default();
        assert!(r.last_message().is_none());
        assert!(r.tool_calls().is_empty());
        assert_eq!(r.text(), "");
    }

    #[test]
    fn last_message_wins() {
        let r = StreamResult::new(vec![
            text_message("m1", "first"),
            text_message("m2", "second"),
        ]);
        assert_eq!(r.last_message().unwrap().id, "m2");
        assert_eq!(r.text(), "second");
    }

    #[test]
    fn tool_calls_come_from_last_message() {
        let m = Message {
            id: "m1".to_owned(),
            role: Role::Assistant,
            parts: vec![
                Part::Tool(ToolPart::pending("tc1", "t", "{}")),
                Part::Tool(ToolPart::pending("tc2", "u", "{}")),
            ],
            label: None,
            usage: None,
        };
        let r = StreamResult::new(vec![m]);
        assert_eq!(r.tool_calls().len(), 2);
    }

    #[test]
    fn serde_roundtrip() {
        let r = StreamResult::new(vec![text_message("m1", "hello")]);
        let json = serde_json::to_string(&r).unwrap();
        let back: StreamResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text(), "hello");
    }
}
