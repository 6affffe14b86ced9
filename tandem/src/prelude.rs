//! Convenient re-exports for building agent graphs.
//!
//! ```rust,ignore
//! use tandem::prelude::*;
//! ```

pub use crate::checkpoint::{Checkpoint, HookEvent, StepEvent, ToolEvent};
pub use crate::error::{Error, HookError, Result, StreamError, ToolError};
pub use crate::hook::{HookResolver, HookType, PendingHook};
pub use crate::message::{
    HookPart, HookStatus, Message, Part, PartState, ReasoningPart, Role, StructuredOutputPart,
    TextPart, ToolPart, ToolStatus, make_messages,
};
pub use crate::mock::MockModel;
pub use crate::model::{LanguageModel, ModelRequest, OutputSchema};
pub use crate::pool::{PoolResource, ResourcePool};
pub use crate::run::{RunOptions, RunResult, run};
pub use crate::runtime::Runtime;
pub use crate::step::{StreamResult, stream_loop, stream_step};
pub use crate::stream::{StreamEvent, StreamHandler};
pub use crate::tool::{DynTool, Tool, ToolCallResult, ToolRegistry, ToolSchema};
pub use crate::usage::Usage;
