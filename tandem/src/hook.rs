//! Hook suspension points for human-in-the-loop coordination.
//!
//! A hook type is an ordinary payload struct implementing [`HookType`]
//! (usually via `#[derive(Hook)]`). The graph calls
//! `H::create(&runtime, label)` and suspends until someone supplies a
//! payload of type `H`. In long-running mode the resolution arrives live
//! through a [`HookResolver`]; in stateless mode
//! (`RunOptions::cancel_on_hooks`) the graph is cancelled instead and the
//! pending hook surfaces on the run result for out-of-band resolution and
//! re-entry.
//!
//! Per label, the state machine is:
//!
//! ```text
//!           create()
//!   ────────────────────▶ pending
//!         │                │
//!    pre-resolved          ├── resolve(payload) ───▶ resolved
//!         │                │
//!         ▼                └── cancel(reason)   ───▶ cancelled
//!      resolved
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::checkpoint::HookEvent;
use crate::error::{Error, HookError, Result};
use crate::message::{HookPart, HookStatus, Message, Part, Role};
use crate::runtime::{PendingEntry, Runtime};

/// A registered-but-unresolved hook, as surfaced by
/// [`RunResult::pending_hooks`](crate::run::RunResult::pending_hooks).
#[derive(Debug, Clone)]
pub struct PendingHook {
    /// Declared hook type name.
    pub hook_type: String,
    /// Caller-supplied metadata.
    pub metadata: Value,
}

/// A typed suspension-point payload.
///
/// The payload type is the declared schema: resolutions are validated by
/// deserialising into it, which also applies the type's defaults before
/// the normalised payload is recorded and emitted.
pub trait HookType: Serialize + DeserializeOwned + Send + Sized + 'static {
    /// Hook type name surfaced in hook parts and pending-hook listings.
    const NAME: &'static str;

    /// Suspend at a labelled hook until it resolves.
    fn create(
        runtime: &Runtime,
        label: &str,
    ) -> impl Future<Output = Result<Self>> + Send {
        runtime.hook::<Self>(label, Value::Object(serde_json::Map::new()))
    }

    /// Suspend at a labelled hook, attaching metadata for whoever resolves
    /// it.
    fn create_with(
        runtime: &Runtime,
        label: &str,
        metadata: Value,
    ) -> impl Future<Output = Result<Self>> + Send {
        runtime.hook::<Self>(label, metadata)
    }

    /// Resolve a pending hook of this type.
    ///
    /// # Errors
    ///
    /// See [`HookResolver::resolve`].
    fn resolve(resolver: &HookResolver, label: &str, payload: Value) -> Result<()> {
        resolver.resolve::<Self>(label, payload)
    }

    /// Cancel a pending hook.
    ///
    /// # Errors
    ///
    /// See [`HookResolver::cancel`].
    fn cancel(resolver: &HookResolver, label: &str, reason: Option<&str>) -> Result<()> {
        resolver.cancel(label, reason)
    }
}

/// Handle for resolving or cancelling hooks of a live run.
#[derive(Debug, Clone)]
pub struct HookResolver {
    runtime: Runtime,
}

impl HookResolver {
    pub(crate) const fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    /// Resolve the pending hook `label` with `payload`.
    ///
    /// The payload is validated against `H`'s schema and normalised (type
    /// defaults applied) before the awaiting graph resumes with the typed
    /// value and a `resolved` hook part is emitted.
    ///
    /// # Errors
    ///
    /// [`HookError::UnknownLabel`] when no such hook is pending;
    /// [`HookError::InvalidPayload`] when the payload does not deserialise
    /// into `H` — the hook stays pending.
    pub fn resolve<H: HookType>(&self, label: &str, payload: Value) -> Result<()> {
        self.runtime.resolve_hook::<H>(label, payload)
    }

    /// Cancel the pending hook `label`.
    ///
    /// The awaiting graph observes [`HookError::Cancelled`] and a
    /// `cancelled` hook part is emitted.
    ///
    /// # Errors
    ///
    /// [`HookError::UnknownLabel`] when no such hook is pending.
    pub fn cancel(&self, label: &str, reason: Option<&str>) -> Result<()> {
        self.runtime.cancel_hook(label, reason)
    }
}

/// Validate a payload against `H` and return both the typed value and the
/// normalised JSON (defaults applied).
pub(crate) fn validate_payload<H: HookType>(
    label: &str,
    payload: Value,
) -> Result<(H, Value)> {
    let typed: H = serde_json::from_value(payload).map_err(|e| {
        Error::Hook(HookError::InvalidPayload {
            label: label.to_owned(),
            message: e.to_string(),
        })
    })?;
    let normalised = serde_json::to_value(&typed)?;
    Ok((typed, normalised))
}

fn hook_message(
    label: &str,
    hook_type: &str,
    status: HookStatus,
    metadata: Value,
    resolution: Option<Value>,
) -> Message {
    Message::new(
        Role::Assistant,
        vec![Part::Hook(HookPart {
            hook_id: label.to_owned(),
            hook_type: hook_type.to_owned(),
            status,
            metadata,
            resolution,
        })],
    )
}

enum CreateOutcome {
    /// Resolution already known (checkpoint replay or pre-registration).
    Immediate(Value),
    /// Long-running mode: await the resolution.
    Wait(oneshot::Receiver<std::result::Result<Value, HookError>>),
    /// Stateless mode: suspend the graph.
    Pending,
}

impl Runtime {
    /// Suspend at a labelled hook until a payload of type `H` arrives.
    ///
    /// Resolution sources are consulted in order: the checkpoint (silent
    /// replay), pre-registered resolutions (the `resolved` part is still
    /// emitted once, no `pending` part ever appears), then a live wait.
    /// The pending entry is registered and the `pending` part emitted
    /// inside one critical section, so a resolution racing in right after
    /// cannot be lost.
    ///
    /// # Errors
    ///
    /// [`HookError::DuplicateLabel`] when the label is already pending;
    /// [`Error::HookPending`] in stateless mode;
    /// [`HookError::Cancelled`] when the hook is cancelled while awaited.
    pub async fn hook<H: HookType>(&self, label: &str, metadata: Value) -> Result<H> {
        let outcome = {
            let mut state = self.state();

            if let Some(recorded) = state.checkpoint.hook_resolution(label).cloned() {
                debug!(label, hook_type = H::NAME, "replaying hook from checkpoint");
                CreateOutcome::Immediate(recorded)
            } else if state.pending_hooks.contains_key(label) {
                return Err(Error::Hook(HookError::DuplicateLabel(label.to_owned())));
            } else if let Some(payload) = state.resolutions.remove(label) {
                let (_, normalised) = validate_payload::<H>(label, payload)?;
                state.checkpoint.hooks.push(HookEvent {
                    label: label.to_owned(),
                    resolution: normalised.clone(),
                });
                self.send_message(hook_message(
                    label,
                    H::NAME,
                    HookStatus::Resolved,
                    metadata,
                    Some(normalised.clone()),
                ));
                debug!(label, hook_type = H::NAME, "consumed pre-registered resolution");
                CreateOutcome::Immediate(normalised)
            } else if state.cancel_on_hooks {
                state.pending_hooks.insert(
                    label.to_owned(),
                    PendingEntry {
                        hook_type: H::NAME.to_owned(),
                        metadata: metadata.clone(),
                        waiter: None,
                    },
                );
                self.send_message(hook_message(
                    label,
                    H::NAME,
                    HookStatus::Pending,
                    metadata,
                    None,
                ));
                info!(label, hook_type = H::NAME, "hook pending; suspending graph");
                CreateOutcome::Pending
            } else {
                let (tx, rx) = oneshot::channel();
                state.pending_hooks.insert(
                    label.to_owned(),
                    PendingEntry {
                        hook_type: H::NAME.to_owned(),
                        metadata: metadata.clone(),
                        waiter: Some(tx),
                    },
                );
                self.send_message(hook_message(
                    label,
                    H::NAME,
                    HookStatus::Pending,
                    metadata,
                    None,
                ));
                debug!(label, hook_type = H::NAME, "hook pending; awaiting resolution");
                CreateOutcome::Wait(rx)
            }
        };

        match outcome {
            CreateOutcome::Immediate(value) => {
                let (typed, _) = validate_payload::<H>(label, value)?;
                Ok(typed)
            }
            CreateOutcome::Pending => Err(Error::HookPending {
                label: label.to_owned(),
            }),
            CreateOutcome::Wait(rx) => {
                let resolved = rx
                    .await
                    .map_err(|_| Error::inactive("run ended while a hook was awaited"))?;
                match resolved {
                    Ok(value) => {
                        let (typed, _) = validate_payload::<H>(label, value)?;
                        Ok(typed)
                    }
                    Err(err) => Err(Error::Hook(err)),
                }
            }
        }
    }

    pub(crate) fn resolve_hook<H: HookType>(&self, label: &str, payload: Value) -> Result<()> {
        let (entry, normalised) = {
            let mut state = self.state();
            if !state.pending_hooks.contains_key(label) {
                return Err(Error::Hook(HookError::UnknownLabel(label.to_owned())));
            }
            // Validate before removing so a rejected payload leaves the
            // hook pending.
            let (_, normalised) = validate_payload::<H>(label, payload)?;
            let entry = state
                .pending_hooks
                .remove(label)
                .unwrap_or_else(|| unreachable!());
            state.checkpoint.hooks.push(HookEvent {
                label: label.to_owned(),
                resolution: normalised.clone(),
            });
            self.send_message(hook_message(
                label,
                &entry.hook_type,
                HookStatus::Resolved,
                entry.metadata.clone(),
                Some(normalised.clone()),
            ));
            (entry, normalised)
        };

        info!(label, hook_type = %entry.hook_type, "hook resolved");
        if let Some(waiter) = entry.waiter {
            // The graph may have been cancelled; losing the send is fine.
            let _ = waiter.send(Ok(normalised));
        }
        Ok(())
    }

    pub(crate) fn cancel_hook(&self, label: &str, reason: Option<&str>) -> Result<()> {
        let entry = {
            let mut state = self.state();
            let entry = state
                .pending_hooks
                .remove(label)
                .ok_or_else(|| Error::Hook(HookError::UnknownLabel(label.to_owned())))?;
            self.send_message(hook_message(
                label,
                &entry.hook_type,
                HookStatus::Cancelled,
                entry.metadata.clone(),
                None,
            ));
            entry
        };

        info!(label, hook_type = %entry.hook_type, reason, "hook cancelled");
        if let Some(waiter) = entry.waiter {
            let _ = waiter.send(Err(HookError::Cancelled {
                label: label.to_owned(),
                reason: reason.map(str::to_owned),
            }));
        }
        Ok(())
    }

    /// A resolver handle for this run's hooks.
    #[must_use]
    pub fn resolver(&self) -> HookResolver {
        HookResolver::new(self.clone())
    }
}
