//! Scripted model implementation for testing.
//!
//! [`MockModel`] replays pre-configured event turns, one per call, without
//! making real API calls. Unlike a cycling mock it errors hard when the
//! script runs out, so a replay test fails loudly if a supposedly-cached
//! step reaches the model.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{EventStream, LanguageModel, ModelRequest};
use crate::stream::StreamEvent;

/// A model that replays scripted event turns in order.
///
/// # Example
///
/// ```rust,ignore
/// let model = MockModel::new(vec![
///     MockModel::tool_turn("tc-1", "double", r#"{"x": 5}"#),
///     MockModel::text_turn("The answer is 10."),
/// ]);
/// ```
#[derive(Debug)]
pub struct MockModel {
    turns: Vec<Vec<StreamEvent>>,
    next_turn: AtomicUsize,
    calls: AtomicUsize,
}

impl MockModel {
    /// Create a mock with one event sequence per expected call.
    #[must_use]
    pub const fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            turns,
            next_turn: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of calls that actually reached the model.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A turn that streams `text` in one block and finishes.
    #[must_use]
    pub fn text_turn(text: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::text_start("b1"),
            StreamEvent::text_delta("b1", text),
            StreamEvent::text_end("b1"),
            StreamEvent::done(None),
        ]
    }

    /// A turn that requests a single tool call.
    #[must_use]
    pub fn tool_turn(tool_call_id: &str, tool_name: &str, args: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::tool_start(tool_call_id, tool_name),
            StreamEvent::tool_args_delta(tool_call_id, args),
            StreamEvent::tool_end(tool_call_id),
            StreamEvent::done(None),
        ]
    }

    /// A turn that requests several tool calls in one message.
    #[must_use]
    pub fn tool_calls_turn(calls: &[(&str, &str, &str)]) -> Vec<StreamEvent> {
        let mut events = Vec::with_capacity(calls.len() * 3 + 1);
        for (id, name, args) in calls {
            events.push(StreamEvent::tool_start(*id, *name));
            events.push(StreamEvent::tool_args_delta(*id, *args));
            events.push(StreamEvent::tool_end(*id));
        }
        events.push(StreamEvent::done(None));
        events
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn stream_events(&self, _request: ModelRequest) -> Result<EventStream> {
        let index = self.next_turn.fetch_add(1, Ordering::SeqCst);
        let turn = self
            .turns
            .get(index)
            .cloned()
            .ok_or_else(|| Error::model("MockModel: no more responses configured"))?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(futures::stream::iter(turn.into_iter().map(Ok))))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn turns_play_in_order_then_exhaust() {
        let model = MockModel::new(vec![
            MockModel::text_turn("first"),
            MockModel::text_turn("second"),
        ]);

        assert!(model.stream_events(ModelRequest::default()).await.is_ok());
        assert!(model.stream_events(ModelRequest::default()).await.is_ok());
        assert_eq!(model.call_count(), 2);

        let err = match model.stream_events(ModelRequest::default()).await {
            Ok(_) => panic!("expected stream_events to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::Model(_)));
        // Exhausted calls don't count.
        assert_eq!(model.call_count(), 2);
    }

    #[test]
    fn tool_calls_turn_interleaves_and_finishes() {
        let events = MockModel::tool_calls_turn(&[
            ("tc-1", "double", r#"{"x": 3}"#),
            ("tc-2", "double", r#"{"x": 7}"#),
        ]);
        assert_eq!(events.len(), 7);
        assert!(matches!(events.last(), Some(StreamEvent::MessageDone { .. })));
    }
}
