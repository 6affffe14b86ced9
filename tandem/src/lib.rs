#![cfg_attr(docsrs, feature(doc_cfg))]
//! Tandem is a runtime for agentic LLM workflows: authors write an agent
//! graph as an ordinary concurrent program while the runtime normalises
//! streaming model output into a single message stream, executes tool
//! calls, and coordinates human-in-the-loop suspension points with
//! durable resume.
//!
extern crate self as tandem;

// Message model and normalisation
pub mod message;
pub mod stream;
pub mod usage;

// Tools and hooks
pub mod hook;
pub mod tool;

// Runtime and scheduling
pub mod pool;
pub mod run;
pub mod runtime;
pub mod step;

// Model contract and record/replay
pub mod checkpoint;
pub mod mock;
pub mod model;

// Utilities
pub mod error;
pub mod prelude;

// Re-export commonly used types and traits
pub use checkpoint::Checkpoint;
pub use error::{Error, Result};
pub use hook::{HookResolver, HookType, PendingHook};
pub use message::{Message, Part, make_messages};
pub use model::LanguageModel;
pub use run::{RunOptions, RunResult, run};
pub use runtime::Runtime;
pub use step::{StreamResult, stream_loop, stream_step};
pub use tool::{Tool, ToolRegistry, ToolSchema};

#[cfg(feature = "derive")]
#[cfg_attr(docsrs, doc(cfg(feature = "derive")))]
pub use tandem_derive::{Hook, tool};

// Used by tandem-derive expansions; not public API.
#[doc(hidden)]
pub use async_trait::async_trait as __async_trait;
