//! Stream normalisation between LLM adapters and the rest of the runtime.
//!
//! Adapters translate provider wire formats into the small [`StreamEvent`]
//! alphabet; [`StreamHandler`] folds those events into ordered,
//! monotonically-refined [`Message`] snapshots with well-defined part
//! states. The handler enforces the event grammar, not content semantics.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::message::{
    Message, Part, PartState, ReasoningPart, Role, TextPart, ToolPart, ToolStatus, gen_id,
};
use crate::usage::Usage;

/// An incremental update produced by an LLM adapter.
///
/// Block ids segregate concurrent text/reasoning streams; tool calls are
/// keyed by their call id. The sequence for one message is finite and ends
/// with [`StreamEvent::MessageDone`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A text block begins.
    TextStart {
        /// Id of the block.
        block_id: String,
    },
    /// Text appended to an open block.
    TextDelta {
        /// Id of the block.
        block_id: String,
        /// The appended text.
        delta: String,
    },
    /// A text block is complete.
    TextEnd {
        /// Id of the block.
        block_id: String,
    },
    /// A reasoning block begins.
    ReasoningStart {
        /// Id of the block.
        block_id: String,
    },
    /// Reasoning text appended to an open block.
    ReasoningDelta {
        /// Id of the block.
        block_id: String,
        /// The appended text.
        delta: String,
    },
    /// A reasoning block is complete.
    ReasoningEnd {
        /// Id of the block.
        block_id: String,
        /// Opaque provider signature, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// A tool call begins.
    ToolStart {
        /// Id of the tool call.
        tool_call_id: String,
        /// Name of the requested tool.
        tool_name: String,
    },
    /// Argument JSON appended to an open tool call.
    ToolArgsDelta {
        /// Id of the tool call.
        tool_call_id: String,
        /// The appended argument fragment.
        delta: String,
    },
    /// A tool call's arguments are complete.
    ToolEnd {
        /// Id of the tool call.
        tool_call_id: String,
    },
    /// The message is complete; any still-open blocks are finalised.
    MessageDone {
        /// Usage reported by the provider, passed through untouched.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    /// Creates a text start event.
    #[must_use]
    pub fn text_start(block_id: impl Into<String>) -> Self {
        Self::TextStart {
            block_id: block_id.into(),
        }
    }

    /// Creates a text delta event.
    #[must_use]
    pub fn text_delta(block_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            block_id: block_id.into(),
            delta: delta.into(),
        }
    }

    /// Creates a text end event.
    #[must_use]
    pub fn text_end(block_id: impl Into<String>) -> Self {
        Self::TextEnd {
            block_id: block_id.into(),
        }
    }

    /// Creates a reasoning start event.
    #[must_use]
    pub fn reasoning_start(block_id: impl Into<String>) -> Self {
        Self::ReasoningStart {
            block_id: block_id.into(),
        }
    }

    /// Creates a reasoning delta event.
    #[must_use]
    pub fn reasoning_delta(block_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::ReasoningDelta {
            block_id: block_id.into(),
            delta: delta.into(),
        }
    }

    /// Creates a reasoning end event.
    #[must_use]
    pub fn reasoning_end(block_id: impl Into<String>, signature: Option<String>) -> Self {
        Self::ReasoningEnd {
            block_id: block_id.into(),
            signature,
        }
    }

    /// Creates a tool start event.
    #[must_use]
    pub fn tool_start(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::ToolStart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    /// Creates a tool argument delta event.
    #[must_use]
    pub fn tool_args_delta(tool_call_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::ToolArgsDelta {
            tool_call_id: tool_call_id.into(),
            delta: delta.into(),
        }
    }

    /// Creates a tool end event.
    #[must_use]
    pub fn tool_end(tool_call_id: impl Into<String>) -> Self {
        Self::ToolEnd {
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Creates a message done event.
    #[must_use]
    pub const fn done(usage: Option<Usage>) -> Self {
        Self::MessageDone { usage }
    }
}

/// One accumulating block, in first-observation order.
#[derive(Debug, Clone)]
enum Block {
    Text {
        id: String,
        text: String,
        done: bool,
    },
    Reasoning {
        id: String,
        text: String,
        signature: Option<String>,
        done: bool,
    },
    Tool {
        id: String,
        name: String,
        args: String,
        done: bool,
    },
}

impl Block {
    fn finish(&mut self) {
        match self {
            Self::Text { done, .. } | Self::Reasoning { done, .. } | Self::Tool { done, .. } => {
                *done = true;
            }
        }
    }
}

/// Accumulates adapter events and produces [`Message`] snapshots.
///
/// Part ordering in every snapshot is the insertion order of the first
/// observed event per block/tool id and stays stable across snapshots.
/// Only the block targeted by the most recent delta event carries a
/// `delta`/`args_delta`; every other delta is cleared on each new event.
#[derive(Debug)]
pub struct StreamHandler {
    message_id: String,
    blocks: Vec<Block>,
    active_text: Option<String>,
    active_reasoning: Option<String>,
    last_delta: Option<(String, String)>,
    usage: Option<Usage>,
    finished: bool,
}

impl StreamHandler {
    /// Create a handler with a fresh message id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_message_id(gen_id("msg"))
    }

    /// Create a handler producing snapshots under a fixed message id.
    #[must_use]
    pub fn with_message_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            blocks: Vec::new(),
            active_text: None,
            active_reasoning: None,
            last_delta: None,
            usage: None,
            finished: false,
        }
    }

    /// Id of the message being accumulated.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Returns `true` once `MessageDone` has been processed.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.finished
    }

    /// Process one event and return the refined snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamError`] when the adapter violates the event
    /// grammar: a delta for an unseen or finished block, a reused block
    /// id, or any event after `MessageDone`.
    pub fn handle_event(&mut self, event: StreamEvent) -> Result<Message, StreamError> {
        if self.finished {
            return Err(StreamError::MessageFinished);
        }
        self.last_delta = None;

        match event {
            StreamEvent::TextStart { block_id } => {
                if self.find_text(&block_id).is_some() {
                    return Err(StreamError::DuplicateBlock(block_id));
                }
                // A new text block implicitly finalises the previous one so
                // at most one text part is streaming at a time.
                if let Some(prev) = self.active_text.take() {
                    if let Some(block) = self.find_text(&prev) {
                        block.finish();
                    }
                }
                self.blocks.push(Block::Text {
                    id: block_id.clone(),
                    text: String::new(),
                    done: false,
                });
                self.active_text = Some(block_id);
            }
            StreamEvent::TextDelta { block_id, delta } => {
                let block = self
                    .find_text(&block_id)
                    .ok_or_else(|| StreamError::UnknownBlock(block_id.clone()))?;
                let Block::Text { text, done, .. } = block else {
                    unreachable!()
                };
                if *done {
                    return Err(StreamError::BlockFinished(block_id));
                }
                text.push_str(&delta);
                self.last_delta = Some((block_id, delta));
            }
            StreamEvent::TextEnd { block_id } => {
                let block = self
                    .find_text(&block_id)
                    .ok_or_else(|| StreamError::UnknownBlock(block_id.clone()))?;
                block.finish();
                if self.active_text.as_deref() == Some(block_id.as_str()) {
                    self.active_text = None;
                }
            }
            StreamEvent::ReasoningStart { block_id } => {
                if self.find_reasoning(&block_id).is_some() {
                    return Err(StreamError::DuplicateBlock(block_id));
                }
                if let Some(prev) = self.active_reasoning.take() {
                    if let Some(block) = self.find_reasoning(&prev) {
                        block.finish();
                    }
                }
                self.blocks.push(Block::Reasoning {
                    id: block_id.clone(),
                    text: String::new(),
                    signature: None,
                    done: false,
                });
                self.active_reasoning = Some(block_id);
            }
            StreamEvent::ReasoningDelta { block_id, delta } => {
                let block = self
                    .find_reasoning(&block_id)
                    .ok_or_else(|| StreamError::UnknownBlock(block_id.clone()))?;
                let Block::Reasoning { text, done, .. } = block else {
                    unreachable!()
                };
                if *done {
                    return Err(StreamError::BlockFinished(block_id));
                }
                text.push_str(&delta);
                self.last_delta = Some((block_id, delta));
            }
            StreamEvent::ReasoningEnd {
                block_id,
                signature,
            } => {
                let block = self
                    .find_reasoning(&block_id)
                    .ok_or_else(|| StreamError::UnknownBlock(block_id.clone()))?;
                let Block::Reasoning {
                    signature: sig,
                    done,
                    ..
                } = block
                else {
                    unreachable!()
                };
                *sig = signature;
                *done = true;
                if self.active_reasoning.as_deref() == Some(block_id.as_str()) {
                    self.active_reasoning = None;
                }
            }
            StreamEvent::ToolStart {
                tool_call_id,
                tool_name,
            } => {
                if self.find_tool(&tool_call_id).is_some() {
                    return Err(StreamError::DuplicateBlock(tool_call_id));
                }
                self.blocks.push(Block::Tool {
                    id: tool_call_id,
                    name: tool_name,
                    args: String::new(),
                    done: false,
                });
            }
            StreamEvent::ToolArgsDelta {
                tool_call_id,
                delta,
            } => {
                let block = self
                    .find_tool(&tool_call_id)
                    .ok_or_else(|| StreamError::UnknownBlock(tool_call_id.clone()))?;
                let Block::Tool { args, done, .. } = block else {
                    unreachable!()
                };
                if *done {
                    return Err(StreamError::BlockFinished(tool_call_id));
                }
                args.push_str(&delta);
                self.last_delta = Some((tool_call_id, delta));
            }
            StreamEvent::ToolEnd { tool_call_id } => {
                let block = self
                    .find_tool(&tool_call_id)
                    .ok_or_else(|| StreamError::UnknownBlock(tool_call_id.clone()))?;
                block.finish();
            }
            StreamEvent::MessageDone { usage } => {
                // Defence against adapters that elide `*End` events.
                for block in &mut self.blocks {
                    block.finish();
                }
                self.active_text = None;
                self.active_reasoning = None;
                self.usage = usage;
                self.finished = true;
            }
        }

        Ok(self.build_message())
    }

    fn find_text(&mut self, id: &str) -> Option<&mut Block> {
        self.blocks
            .iter_mut()
            .find(|b| matches!(b, Block::Text { id: bid, .. } if bid == id))
    }

    fn find_reasoning(&mut self, id: &str) -> Option<&mut Block> {
        self.blocks
            .iter_mut()
            .find(|b| matches!(b, Block::Reasoning { id: bid, .. } if bid == id))
    }

    fn find_tool(&mut self, id: &str) -> Option<&mut Block> {
        self.blocks
            .iter_mut()
            .find(|b| matches!(b, Block::Tool { id: bid, .. } if bid == id))
    }

    fn build_message(&self) -> Message {
        let delta_for = |id: &str| -> Option<String> {
            self.last_delta
                .as_ref()
                .filter(|(did, _)| did == id)
                .map(|(_, d)| d.clone())
        };

        let parts = self
            .blocks
            .iter()
            .map(|block| match block {
                Block::Text { id, text, done } => Part::Text(TextPart {
                    text: text.clone(),
                    state: Some(if *done {
                        PartState::Done
                    } else {
                        PartState::Streaming
                    }),
                    delta: if *done { None } else { delta_for(id) },
                }),
                Block::Reasoning {
                    id,
                    text,
                    signature,
                    done,
                } => Part::Reasoning(ReasoningPart {
                    text: text.clone(),
                    signature: signature.clone(),
                    state: Some(if *done {
                        PartState::Done
                    } else {
                        PartState::Streaming
                    }),
                    delta: if *done { None } else { delta_for(id) },
                }),
                Block::Tool {
                    id,
                    name,
                    args,
                    done,
                } => Part::Tool(ToolPart {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    tool_args: args.clone(),
                    status: ToolStatus::Pending,
                    result: None,
                    state: Some(if *done {
                        PartState::Done
                    } else {
                        PartState::Streaming
                    }),
                    args_delta: if *done { None } else { delta_for(id) },
                }),
            })
            .collect();

        Message {
            id: self.message_id.clone(),
            role: Role::Assistant,
            parts,
            label: None,
            usage: self.usage,
        }
    }
}

impl Default for StreamHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    mod text {
        use super::*;

        #[test]
        fn lifecycle() {
            let mut h = StreamHandler::with_message_id("m1");
            let m = h.handle_event(StreamEvent::text_start("b1")).unwrap();
            assert_eq!(m.parts.len(), 1);
            let part = m.parts[0].as_text().unwrap();
            assert_eq!(part.state, Some(PartState::Streaming));
            assert_eq!(part.text, "");

            let m = h.handle_event(StreamEvent::text_delta("b1", "Hello")).unwrap();
            let part = m.parts[0].as_text().unwrap();
            assert_eq!(part.text, "Hello");
            assert_eq!(part.delta.as_deref(), Some("Hello"));

            let m = h
                .handle_event(StreamEvent::text_delta("b1", " world"))
                .unwrap();
            let part = m.parts[0].as_text().unwrap();
            assert_eq!(part.text, "Hello world");
            assert_eq!(part.delta.as_deref(), Some(" world"));

            let m = h.handle_event(StreamEvent::text_end("b1")).unwrap();
            let part = m.parts[0].as_text().unwrap();
            assert_eq!(part.state, Some(PartState::Done));
            assert!(part.delta.is_none());
        }

        #[test]
        fn second_start_finalises_first() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::text_start("t1")).unwrap();
            h.handle_event(StreamEvent::text_delta("t1", "first")).unwrap();
            let m = h.handle_event(StreamEvent::text_start("t2")).unwrap();
            let states: Vec<_> = m.parts.iter().map(Part::state).collect();
            assert_eq!(
                states,
                vec![Some(PartState::Done), Some(PartState::Streaming)]
            );
        }

        #[test]
        fn deltas_only_on_active_block() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::text_start("t1")).unwrap();
            h.handle_event(StreamEvent::text_delta("t1", "first")).unwrap();
            h.handle_event(StreamEvent::text_end("t1")).unwrap();
            h.handle_event(StreamEvent::text_start("t2")).unwrap();
            let m = h
                .handle_event(StreamEvent::text_delta("t2", "second"))
                .unwrap();

            let texts: Vec<_> = m.parts.iter().filter_map(Part::as_text).collect();
            assert!(texts[0].delta.is_none());
            assert_eq!(texts[1].delta.as_deref(), Some("second"));
        }
    }

    mod reasoning {
        use super::*;

        #[test]
        fn lifecycle_with_signature() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::reasoning_start("r1")).unwrap();
            let m = h
                .handle_event(StreamEvent::reasoning_delta("r1", "thinking"))
                .unwrap();
            let part = m.parts[0].as_reasoning().unwrap();
            assert_eq!(part.text, "thinking");
            assert_eq!(part.state, Some(PartState::Streaming));

            let m = h
                .handle_event(StreamEvent::reasoning_end("r1", Some("sig123".to_owned())))
                .unwrap();
            let part = m.parts[0].as_reasoning().unwrap();
            assert_eq!(part.state, Some(PartState::Done));
            assert_eq!(part.signature.as_deref(), Some("sig123"));
        }
    }

    mod tools {
        use super::*;

        #[test]
        fn lifecycle() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::tool_start("tc1", "get_weather"))
                .unwrap();
            let m = h
                .handle_event(StreamEvent::tool_args_delta("tc1", "{\"ci"))
                .unwrap();
            let part = m.parts[0].as_tool().unwrap();
            assert_eq!(part.tool_name, "get_weather");
            assert_eq!(part.tool_args, "{\"ci");
            assert_eq!(part.state, Some(PartState::Streaming));
            assert_eq!(part.args_delta.as_deref(), Some("{\"ci"));

            let m = h
                .handle_event(StreamEvent::tool_args_delta("tc1", "ty\":\"London\"}"))
                .unwrap();
            assert_eq!(m.parts[0].as_tool().unwrap().tool_args, "{\"city\":\"London\"}");

            let m = h.handle_event(StreamEvent::tool_end("tc1")).unwrap();
            let part = m.parts[0].as_tool().unwrap();
            assert_eq!(part.state, Some(PartState::Done));
            assert!(part.args_delta.is_none());
        }

        #[test]
        fn parallel_tool_calls() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::tool_start("tc1", "read_file"))
                .unwrap();
            h.handle_event(StreamEvent::tool_start("tc2", "list_files"))
                .unwrap();

            let m = h
                .handle_event(StreamEvent::tool_args_delta("tc1", "{\"path\":\"a.rs\"}"))
                .unwrap();
            let tools: Vec<_> = m.parts.iter().filter_map(Part::as_tool).collect();
            assert_eq!(tools.len(), 2);
            assert_eq!(tools[0].tool_args, "{\"path\":\"a.rs\"}");
            assert_eq!(tools[1].tool_args, "");

            h.handle_event(StreamEvent::tool_args_delta("tc2", "{\"dir\":\".\"}"))
                .unwrap();
            h.handle_event(StreamEvent::tool_end("tc1")).unwrap();
            let m = h.handle_event(StreamEvent::tool_end("tc2")).unwrap();
            assert!(m.is_done());
        }
    }

    mod ordering {
        use super::*;

        #[test]
        fn parts_appear_in_first_observation_order() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::reasoning_start("r1")).unwrap();
            h.handle_event(StreamEvent::reasoning_delta("r1", "Let me think"))
                .unwrap();
            h.handle_event(StreamEvent::reasoning_end("r1", None)).unwrap();

            h.handle_event(StreamEvent::text_start("t1")).unwrap();
            h.handle_event(StreamEvent::text_delta("t1", "I'll check"))
                .unwrap();
            h.handle_event(StreamEvent::text_end("t1")).unwrap();

            h.handle_event(StreamEvent::tool_start("tc1", "search")).unwrap();
            h.handle_event(StreamEvent::tool_args_delta("tc1", "{\"q\":\"test\"}"))
                .unwrap();
            let m = h.handle_event(StreamEvent::tool_end("tc1")).unwrap();

            assert_eq!(m.parts.len(), 3);
            assert!(m.parts[0].as_reasoning().is_some());
            assert!(m.parts[1].as_text().is_some());
            assert!(m.parts[2].as_tool().is_some());
            assert!(m.is_done());
        }
    }

    mod message_done {
        use super::*;

        #[test]
        fn finalises_open_blocks() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::text_start("t1")).unwrap();
            h.handle_event(StreamEvent::text_delta("t1", "hello")).unwrap();
            // No TextEnd: MessageDone must finalise everything.
            let m = h.handle_event(StreamEvent::done(None)).unwrap();
            assert_eq!(m.parts[0].state(), Some(PartState::Done));
            assert!(m.is_done());
            assert!(h.is_done());
        }

        #[test]
        fn stamps_usage_on_snapshot() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::text_start("t1")).unwrap();
            let m = h
                .handle_event(StreamEvent::done(Some(Usage::new(10, 4))))
                .unwrap();
            assert_eq!(m.usage, Some(Usage::new(10, 4)));
        }

        #[test]
        fn events_after_done_error() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::done(None)).unwrap();
            let err = h.handle_event(StreamEvent::text_start("t1")).unwrap_err();
            assert!(matches!(err, StreamError::MessageFinished));
        }
    }

    mod grammar_errors {
        use super::*;

        #[test]
        fn delta_for_unseen_block() {
            let mut h = StreamHandler::with_message_id("m1");
            let err = h
                .handle_event(StreamEvent::text_delta("ghost", "x"))
                .unwrap_err();
            assert!(matches!(err, StreamError::UnknownBlock(id) if id == "ghost"));
        }

        #[test]
        fn delta_for_finished_block() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::text_start("t1")).unwrap();
            h.handle_event(StreamEvent::text_end("t1")).unwrap();
            let err = h
                .handle_event(StreamEvent::text_delta("t1", "late"))
                .unwrap_err();
            assert!(matches!(err, StreamError::BlockFinished(_)));
        }

        #[test]
        fn duplicate_tool_id() {
            let mut h = StreamHandler::with_message_id("m1");
            h.handle_event(StreamEvent::tool_start("tc1", "a")).unwrap();
            let err = h
                .handle_event(StreamEvent::tool_start("tc1", "b"))
                .unwrap_err();
            assert!(matches!(err, StreamError::DuplicateBlock(_)));
        }
    }

    mod identity {
        use super::*;

        #[test]
        fn message_id_propagates() {
            let mut h = StreamHandler::with_message_id("custom-id");
            let m = h.handle_event(StreamEvent::text_start("b1")).unwrap();
            assert_eq!(m.id, "custom-id");
        }

        #[test]
        fn fresh_handler_generates_prefixed_id() {
            let h = StreamHandler::new();
            assert!(h.message_id().starts_with("msg_"));
        }
    }
}
