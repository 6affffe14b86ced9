//! The top-level run driver.
//!
//! [`run`] spawns the author's graph as a background task and returns a
//! [`RunResult`]: a stream of every message the run produces, fused from
//! the graph's steps and the sideband queue. The scheduler loop inside is
//! the sole consumer of both queues; it ping-pongs with the graph task so
//! that only one step is ever in flight, and it polls the step queue with
//! a short timeout so sideband hook and tool messages interleave promptly.
//!
//! Cancellation is structured: dropping the `RunResult` aborts the graph
//! task, which drops every child future the graph composed. A graph that
//! suspends on a hook in stateless mode ends the run normally with its
//! pending hooks recorded.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::hook::{HookResolver, HookType, PendingHook, validate_payload};
use crate::message::Message;
use crate::runtime::{Runtime, StepItem};
use crate::step::StreamResult;

/// How long the loop waits on the step queue before draining sideband
/// messages again.
const STEP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for one run.
#[derive(Debug, Default)]
pub struct RunOptions {
    checkpoint: Checkpoint,
    cancel_on_hooks: bool,
    resolutions: HashMap<String, Value>,
}

impl RunOptions {
    /// Create default options: fresh checkpoint, long-running hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously recorded checkpoint.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Stateless mode: an unresolved hook cancels the graph and surfaces
    /// on [`RunResult::pending_hooks`] instead of blocking.
    #[must_use]
    pub const fn cancel_on_hooks(mut self, cancel: bool) -> Self {
        self.cancel_on_hooks = cancel;
        self
    }

    /// Pre-register a hook resolution for consumption by the next run.
    ///
    /// The payload is validated against `H` now, so a bad payload fails
    /// here rather than mid-run. A hook created under this label will
    /// return synchronously without ever emitting a `pending` part.
    ///
    /// # Errors
    ///
    /// [`HookError::InvalidPayload`](crate::error::HookError::InvalidPayload)
    /// when the payload does not match `H`'s schema.
    pub fn with_resolution<H: HookType>(mut self, label: &str, payload: Value) -> Result<Self> {
        let (_, normalised) = validate_payload::<H>(label, payload)?;
        self.resolutions.insert(label.to_owned(), normalised);
        Ok(self)
    }
}

/// Signals `Finished` to the run loop when the graph task ends, including
/// on panic unwinds.
struct DoneGuard {
    tx: mpsc::UnboundedSender<StepItem>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(StepItem::Finished);
    }
}

/// Owns the graph task; aborts it when dropped.
struct GraphTask {
    handle: Option<JoinHandle<Result<()>>>,
}

impl GraphTask {
    fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    async fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::internal(format!("graph task panicked: {e}"))),
        }
    }
}

impl Drop for GraphTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Start a run.
///
/// The graph receives the run's [`Runtime`] handle and drives everything
/// through it: step submission, tool execution, hooks, sideband messages.
/// Must be called within a Tokio runtime.
pub fn run<F, Fut>(graph: F, options: RunOptions) -> RunResult
where
    F: FnOnce(Runtime) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (runtime, step_rx, message_rx) = Runtime::create(
        options.checkpoint,
        options.resolutions,
        options.cancel_on_hooks,
    );

    let guard = DoneGuard {
        tx: runtime.step_sender(),
    };
    let graph_future = graph(runtime.clone());
    let handle = tokio::spawn(async move {
        let _guard = guard;
        graph_future.await
    });

    let loop_runtime = runtime.clone();
    let messages = Box::pin(stream! {
        let mut graph_task = GraphTask { handle: Some(handle) };
        let mut step_rx = step_rx;
        let mut message_rx = message_rx;
        info!("run started");

        loop {
            while let Ok(message) = message_rx.try_recv() {
                yield Ok(message);
            }

            let item = match timeout(STEP_POLL_INTERVAL, step_rx.recv()).await {
                // No step ready; loop back so sideband hook/tool messages
                // keep flowing while the graph is busy or suspended.
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(item)) => item,
            };

            match item {
                StepItem::Finished => {
                    while let Ok(message) = message_rx.try_recv() {
                        yield Ok(message);
                    }
                    break;
                }
                StepItem::Step { mut stream, done } => {
                    while let Ok(message) = message_rx.try_recv() {
                        yield Ok(message);
                    }

                    let mut buffered = Vec::new();
                    let mut failure = None;
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(message) => {
                                // The consumer gets its own copy; the
                                // buffered original may be mutated by the
                                // graph after the step resolves.
                                yield Ok(message.clone());
                                buffered.push(message);
                                while let Ok(m) = message_rx.try_recv() {
                                    yield Ok(m);
                                }
                            }
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }

                    if let Some(err) = failure {
                        warn!(error = %err, "step failed; cancelling graph");
                        graph_task.abort();
                        drop(done);
                        loop_runtime.close_pool().await;
                        yield Err(err);
                        return;
                    }

                    debug!(messages = buffered.len(), "step complete");
                    let _ = done.send(StreamResult::new(buffered));

                    // Let the graph's follow-on work (tool execution, the
                    // next submission) run before the next pull.
                    tokio::task::yield_now().await;
                    while let Ok(m) = message_rx.try_recv() {
                        yield Ok(m);
                    }
                }
            }
        }

        let outcome = graph_task.join().await;
        loop_runtime.close_pool().await;
        match outcome {
            Ok(()) => info!("run complete"),
            Err(err) if err.is_hook_pending() => {
                info!("run suspended on pending hooks");
            }
            Err(err) => {
                warn!(error = %err, "graph failed");
                yield Err(err);
            }
        }
    });

    RunResult { runtime, messages }
}

/// The consumer's view of a run: a message stream plus, once exhausted,
/// the new checkpoint and any pending hooks.
pub struct RunResult {
    runtime: Runtime,
    messages: Pin<Box<dyn Stream<Item = Result<Message>> + Send>>,
}

impl RunResult {
    /// A resolver for this run's hooks, usable while streaming.
    #[must_use]
    pub fn resolver(&self) -> HookResolver {
        self.runtime.resolver()
    }

    /// The checkpoint, including every event appended during this run.
    /// Authoritative once the stream is exhausted.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        self.runtime.checkpoint()
    }

    /// Hooks left unresolved by the run; empty when the graph finished.
    #[must_use]
    pub fn pending_hooks(&self) -> HashMap<String, PendingHook> {
        self.runtime.pending_hooks()
    }

    /// Collect the remaining messages, propagating the first error.
    ///
    /// # Errors
    ///
    /// The first error yielded by the run.
    pub async fn drain(&mut self) -> Result<Vec<Message>> {
        let mut collected = Vec::new();
        while let Some(item) = self.next().await {
            collected.push(item?);
        }
        Ok(collected)
    }
}

impl Stream for RunResult {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().messages.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunResult")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}
