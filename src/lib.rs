//! # Scout Agent
//!
//! A small tool-using agent: a reasoning engine plans, the crate acts.
//!
//! This library provides:
//! - A sandboxed tool layer: product search with defensive HTML extraction,
//!   Wikipedia and arXiv lookups, file writing and script execution confined
//!   to one directory
//! - A plan/act/observe agent loop with a step budget
//! - An Ollama client for the reasoning engine
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Receive a task
//! 2. Build context with system prompt and available tools
//! 3. Call the engine, dispatch at most one tool call, append its result
//! 4. Feed results back to the engine, repeat until it answers
//!
//! Tool failures never abort the loop; they become `Error: ...` observations
//! the engine can react to. Only an unreachable engine or an exhausted step
//! budget end a run early.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_agent::{agent::Agent, config::Config};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::new(config)?;
//! let outcome = agent.run_task("Find capybara toys and save a report to capybara.md").await?;
//! println!("{}", outcome.answer);
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod tools;

pub use config::Config;
