//! Agent module - the plan/act/observe loop.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Build context with system prompt and user task
//! 2. Call the engine with available tools (Planning)
//! 3. If the engine requests a tool call, dispatch it (Acting) and append the
//!    result to the context (Observing)
//! 4. Repeat until the engine produces a final answer or the step budget runs out

mod agent_loop;
mod conversation;
mod prompt;
mod types;

pub use agent_loop::{Agent, AgentError};
pub use conversation::Conversation;
pub use prompt::build_system_prompt;
pub use types::{LogEntryType, TaskLogEntry, TaskOutcome};
