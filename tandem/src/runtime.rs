//! The per-run coordinator.
//!
//! A [`Runtime`] is a cheaply cloneable handle shared by the graph task,
//! tools, hooks and the run loop. It owns the step queue that producers
//! submit work to, the message queue that fuses every concurrent producer
//! into one consumer-visible stream, the pending-hooks map and the active
//! checkpoint. All shared state sits behind a single mutex; the queues are
//! unbounded because the graph blocks on each step's completion, so only
//! one step is ever in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::Stream;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::checkpoint::{Checkpoint, StepEvent};
use crate::error::{Error, HookError, Result};
use crate::hook::PendingHook;
use crate::message::Message;
use crate::pool::ResourcePool;
use crate::step::StreamResult;

/// An item on the step queue.
pub(crate) enum StepItem {
    /// A producer submitted by the graph, with its completion channel.
    Step {
        /// The step's message output.
        stream: BoxStream<'static, Result<Message>>,
        /// Resolved by the run loop to unblock the graph.
        done: oneshot::Sender<StreamResult>,
    },
    /// The graph task finished; no more steps will be submitted.
    Finished,
}

/// A hook registered but not yet resolved.
pub(crate) struct PendingEntry {
    pub(crate) hook_type: String,
    pub(crate) metadata: serde_json::Value,
    /// `None` in stateless mode, where nothing awaits the resolution.
    pub(crate) waiter: Option<oneshot::Sender<std::result::Result<serde_json::Value, HookError>>>,
}

pub(crate) struct RuntimeState {
    pub(crate) pending_hooks: HashMap<String, PendingEntry>,
    pub(crate) resolutions: HashMap<String, serde_json::Value>,
    pub(crate) checkpoint: Checkpoint,
    pub(crate) step_cursor: usize,
    pub(crate) cancel_on_hooks: bool,
}

struct Inner {
    step_tx: mpsc::UnboundedSender<StepItem>,
    message_tx: mpsc::UnboundedSender<Message>,
    state: Mutex<RuntimeState>,
    pool: ResourcePool,
}

/// Handle to the per-run coordinator.
///
/// Clones share the same run. A `Runtime` is only obtainable inside
/// [`run`](crate::run::run): the graph receives one, tools receive one at
/// call time, and the run handle exposes a resolver derived from one.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Build a runtime plus the queue receivers owned by the run loop.
    pub(crate) fn create(
        checkpoint: Checkpoint,
        resolutions: HashMap<String, serde_json::Value>,
        cancel_on_hooks: bool,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<StepItem>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (step_tx, step_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let runtime = Self {
            inner: Arc::new(Inner {
                step_tx,
                message_tx,
                state: Mutex::new(RuntimeState {
                    pending_hooks: HashMap::new(),
                    resolutions,
                    checkpoint,
                    step_cursor: 0,
                    cancel_on_hooks,
                }),
                pool: ResourcePool::new(),
            }),
        };
        (runtime, step_rx, message_rx)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.inner.state.lock().expect("runtime state poisoned")
    }

    pub(crate) fn step_sender(&self) -> mpsc::UnboundedSender<StepItem> {
        self.inner.step_tx.clone()
    }

    pub(crate) fn send_message(&self, message: Message) {
        if self.inner.message_tx.send(message).is_err() {
            warn!("message queue closed; dropping sideband message");
        }
    }

    /// Emit a message sideband into the run's output stream.
    ///
    /// Streaming tools and nested producers use this to surface progress
    /// while a step is in flight. Messages put after the run has been
    /// dropped are discarded with a warning.
    pub fn put_message(&self, message: Message) {
        self.send_message(message);
    }

    /// The per-run resource pool, closed when the run exits.
    #[must_use]
    pub fn pool(&self) -> &ResourcePool {
        &self.inner.pool
    }

    /// Submit a producer as a step and await its aggregated result.
    ///
    /// Steps are indexed by dynamic invocation order. When the active
    /// checkpoint still holds an event at the current index the recorded
    /// result is returned immediately and the producer is dropped
    /// unconsumed, so replayed steps perform no external effects and yield
    /// no messages. Otherwise the producer is enqueued for the run loop,
    /// which drives it, forwards every snapshot to the consumer and
    /// resolves the completion future; the final result is then recorded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inactive`] when the run loop is gone, or whatever
    /// error ended the run while the step was in flight.
    pub async fn step<S>(&self, stream: S) -> Result<StreamResult>
    where
        S: Stream<Item = Result<Message>> + Send + 'static,
    {
        {
            let mut state = self.state();
            if state.step_cursor < state.checkpoint.steps.len() {
                let index = state.step_cursor;
                let result = state.checkpoint.steps[index].to_stream_result();
                state.step_cursor += 1;
                debug!(index, "replaying step from checkpoint");
                return Ok(result);
            }
        }

        let (done, completion) = oneshot::channel();
        self.inner
            .step_tx
            .send(StepItem::Step {
                stream: Box::pin(stream),
                done,
            })
            .map_err(|_| Error::inactive("step queue closed; no run is active"))?;

        let result = completion
            .await
            .map_err(|_| Error::inactive("run loop dropped before the step completed"))?;

        let mut state = self.state();
        let index = state.checkpoint.steps.len();
        state.checkpoint.steps.push(StepEvent {
            index,
            messages: result.messages.clone(),
        });
        state.step_cursor = state.checkpoint.steps.len();
        debug!(index, messages = result.messages.len(), "step recorded");
        Ok(result)
    }

    /// Snapshot of the active checkpoint, including events appended so far.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        self.state().checkpoint.clone()
    }

    /// The hooks currently registered but unresolved.
    #[must_use]
    pub fn pending_hooks(&self) -> HashMap<String, PendingHook> {
        self.state()
            .pending_hooks
            .iter()
            .map(|(label, entry)| {
                (
                    label.clone(),
                    PendingHook {
                        hook_type: entry.hook_type.clone(),
                        metadata: entry.metadata.clone(),
                    },
                )
            })
            .collect()
    }

    pub(crate) async fn close_pool(&self) {
        self.inner.pool.close_all().await;
    }

    /// A detached runtime whose queues are never drained, for unit tests.
    #[cfg(test)]
    pub(crate) fn detached() -> (
        Self,
        mpsc::UnboundedReceiver<StepItem>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        Self::create(Checkpoint::new(), HashMap::new(), false)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Runtime")
            .field("pending_hooks", &state.pending_hooks.len())
            .field("recorded_steps", &state.checkpoint.steps.len())
            .field("step_cursor", &state.step_cursor)
            .field("cancel_on_hooks", &state.cancel_on_hooks)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("hook_type", &self.hook_type)
            .field("live", &self.waiter.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::{Message, Part, Role, TextPart};

    fn text_message(id: &str, text: &str) -> Message {
        Message {
            id: id.to_owned(),
            role: Role::Assistant,
            parts: vec![Part::Text(TextPart::new(text))],
            label: None,
            usage: None,
        }
    }

    #[tokio::test]
    async fn step_replays_from_checkpoint_without_consuming() {
        let checkpoint = Checkpoint {
            steps: vec![StepEvent {
                index: 0,
                messages: vec![text_message("m1", "recorded")],
            }],
            ..Checkpoint::default()
        };
        let (runtime, _step_rx, _msg_rx) =
            Runtime::create(checkpoint, HashMap::new(), false);

        // The producer would fail the test if polled.
        let producer = futures::stream::once(async { panic!("replayed step must not run") });
        let result = runtime.step(producer).await.unwrap();
        assert_eq!(result.text(), "recorded");
    }

    #[tokio::test]
    async fn fresh_step_is_enqueued_and_recorded() {
        let (runtime, mut step_rx, _msg_rx) = Runtime::detached();

        let rt = runtime.clone();
        let graph = tokio::spawn(async move {
            rt.step(futures::stream::iter(vec![Ok(text_message("m1", "hi"))]))
                .await
        });

        // Play the run loop's role: drive the producer, resolve the future.
        let Some(StepItem::Step { mut stream, done }) = step_rx.recv().await else {
            panic!("expected a step submission");
        };
        use futures::StreamExt;
        let mut buffered = Vec::new();
        while let Some(item) = stream.next().await {
            buffered.push(item.unwrap());
        }
        done.send(StreamResult::new(buffered)).unwrap();

        let result = graph.await.unwrap().unwrap();
        assert_eq!(result.text(), "hi");

        let cp = runtime.checkpoint();
        assert_eq!(cp.steps.len(), 1);
        assert_eq!(cp.steps[0].index, 0);
    }

    #[tokio::test]
    async fn step_after_run_loop_gone_errors() {
        let (runtime, step_rx, _msg_rx) = Runtime::detached();
        drop(step_rx);

        let err = runtime
            .step(futures::stream::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inactive(_)));
    }

    #[tokio::test]
    async fn put_message_reaches_the_queue() {
        let (runtime, _step_rx, mut msg_rx) = Runtime::detached();
        runtime.put_message(text_message("m1", "sideband"));
        let received = msg_rx.recv().await.unwrap();
        assert_eq!(received.text(), "sideband");
    }
}
