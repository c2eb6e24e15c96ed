//! Core agent loop implementation.

use std::sync::Arc;

use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{ChatMessage, ChatResponse, LlmClient, LlmError, OllamaClient};
use crate::tools::{ToolCallRequest, ToolError, ToolRegistry, ToolResult};

use super::conversation::Conversation;
use super::prompt::build_system_prompt;
use super::types::{LogEntryType, TaskLogEntry, TaskOutcome};

/// Failures that end the loop. Tool failures are never among them; those are
/// observations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("reasoning engine unreachable: {0}")]
    EngineUnreachable(#[source] LlmError),

    #[error("step budget of {0} iterations exhausted without a final answer")]
    StepBudgetExhausted(usize),

    #[error("agent setup failed: {0}")]
    Setup(#[from] ToolError),
}

/// Where the loop is between two engine round trips.
enum LoopState {
    Planning,
    Acting(ToolCallRequest),
    Observing(ToolCallRequest, ToolResult),
    Done(String),
}

/// The autonomous agent.
pub struct Agent {
    config: Config,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
}

impl Agent {
    /// Create an agent talking to Ollama with the built-in tools.
    pub fn new(config: Config) -> Result<Self, AgentError> {
        let llm = OllamaClient::new(config.ollama_url.clone(), config.llm_timeout)
            .map_err(AgentError::EngineUnreachable)?;
        let tools = ToolRegistry::with_builtin_tools(&config)?;

        Ok(Self::with_parts(config, Arc::new(llm), tools))
    }

    /// Create an agent from an explicit engine client and tool registry.
    pub fn with_parts(config: Config, llm: Arc<dyn LlmClient>, tools: ToolRegistry) -> Self {
        Self { config, llm, tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run a task and return the final answer and execution log.
    pub async fn run_task(&self, task: &str) -> Result<TaskOutcome, AgentError> {
        let span = tracing::info_span!("task", run_id = %Uuid::new_v4());
        self.run_loop(task).instrument(span).await
    }

    async fn run_loop(&self, task: &str) -> Result<TaskOutcome, AgentError> {
        let sandbox = self.config.sandbox_path.to_string_lossy();
        let mut conversation = Conversation::new(build_system_prompt(&sandbox, &self.tools), task);
        let descriptors = self.tools.descriptors();
        let mut log = Vec::new();
        let mut iterations = 0;
        let mut state = LoopState::Planning;

        tracing::info!("Starting task with model {}", self.config.default_model);

        loop {
            state = match state {
                LoopState::Planning => {
                    if iterations >= self.config.max_iterations {
                        tracing::warn!("Step budget of {} exhausted", self.config.max_iterations);
                        return Err(AgentError::StepBudgetExhausted(self.config.max_iterations));
                    }
                    iterations += 1;
                    tracing::debug!("Agent iteration {}", iterations);

                    let response = self
                        .llm
                        .chat_completion(
                            &self.config.default_model,
                            conversation.messages(),
                            &descriptors,
                        )
                        .await
                        .map_err(|e| {
                            tracing::error!("Engine call failed: {}", e);
                            AgentError::EngineUnreachable(e)
                        })?;

                    next_action(response, &mut conversation)?
                }
                LoopState::Acting(call) => {
                    let args = serde_json::Value::Object(call.arguments.clone());
                    tracing::info!("Calling tool {} with args {}", call.name, args);
                    log.push(TaskLogEntry::now(
                        LogEntryType::ToolCall,
                        format!("Calling tool: {} with args: {}", call.name, args),
                    ));

                    let result = self.tools.dispatch(&call).await;
                    LoopState::Observing(call, result)
                }
                LoopState::Observing(call, result) => {
                    if !result.is_ok() {
                        tracing::warn!("Tool {} failed: {}", call.name, result.text());
                    }
                    let observation = result.to_observation();
                    log.push(TaskLogEntry::now(
                        LogEntryType::ToolResult,
                        truncate_for_log(&observation, 1000),
                    ));
                    conversation.push(ChatMessage::tool(call.name, observation));
                    LoopState::Planning
                }
                LoopState::Done(answer) => {
                    tracing::info!("Task finished after {} iterations", iterations);
                    log.push(TaskLogEntry::now(
                        LogEntryType::Response,
                        truncate_for_log(&answer, 2000),
                    ));
                    return Ok(TaskOutcome {
                        answer,
                        iterations,
                        log,
                    });
                }
            };
        }
    }
}

/// Turn an engine reply into the next state, recording it in the conversation.
///
/// A tool call wins over text; of several tool calls only the first is acted
/// on, so at most one call is ever in flight.
fn next_action(response: ChatResponse, conversation: &mut Conversation) -> Result<LoopState, AgentError> {
    let mut calls = response.tool_calls.into_iter();

    if let Some(call) = calls.next() {
        let dropped = calls.count();
        if dropped > 0 {
            tracing::warn!("Engine proposed {} extra tool calls; only '{}' runs", dropped, call.name);
        }
        conversation.push(ChatMessage::assistant(response.content, vec![call.clone()]));
        return Ok(LoopState::Acting(call));
    }

    match response.content {
        Some(answer) => {
            conversation.push(ChatMessage::assistant(Some(answer.clone()), Vec::new()));
            Ok(LoopState::Done(answer))
        }
        None => Err(AgentError::EngineUnreachable(LlmError::EmptyResponse)),
    }
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... [truncated]", &s[..cut]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::tools::{
        ParamKind, Tool, ToolArguments, ToolDescriptor, ToolParameter,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Engine double that replays canned replies and records what it was sent.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        fallback: Option<ChatResponse>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn repeating(reply: ChatResponse) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: Some(reply),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last_observation(&self) -> Option<String> {
            let seen = self.seen.lock().unwrap();
            seen.last()?
                .iter()
                .rev()
                .find(|m| m.role == Role::Tool)
                .and_then(|m| m.content.clone())
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            tools: &[&ToolDescriptor],
        ) -> Result<ChatResponse, LlmError> {
            assert!(!tools.is_empty());
            self.seen.lock().unwrap().push(messages.to_vec());
            let next = self.replies.lock().unwrap().pop_front();
            match (next, &self.fallback) {
                (Some(reply), _) => reply,
                (None, Some(reply)) => Ok(reply.clone()),
                (None, None) => panic!("engine called more often than scripted"),
            }
        }
    }

    struct Counter {
        descriptor: ToolDescriptor,
        hits: AtomicUsize,
    }

    impl Counter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                descriptor: ToolDescriptor::new("count", "Count calls").with_parameter(
                    ToolParameter::required("label", ParamKind::String, "Label"),
                ),
                hits: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Tool for Counter {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn invoke(&self, args: &ToolArguments) -> ToolResult {
            let n = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
            ToolResult::Ok(format!("{} #{}", args.opt_str("label").unwrap_or("?"), n))
        }
    }

    fn call(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::from_raw(name, args)
    }

    fn tool_reply(calls: Vec<ToolCallRequest>) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            content: None,
            tool_calls: calls,
        })
    }

    fn answer(text: &str) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
        })
    }

    fn agent(llm: Arc<ScriptedLlm>, counter: Arc<Counter>, max_iterations: usize) -> (tempfile::TempDir, Agent) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path().to_path_buf());
        config.max_iterations = max_iterations;
        let mut tools = ToolRegistry::new();
        tools.register(counter).unwrap();
        (dir, Agent::with_parts(config, llm, tools))
    }

    #[tokio::test]
    async fn tool_result_is_observed_before_next_plan() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(vec![call("count", json!({ "label": "apples" }))]),
            answer("There is one apple."),
        ]);
        let counter = Counter::new();
        let (_dir, agent) = agent(llm.clone(), counter.clone(), 5);

        let outcome = agent.run_task("count apples").await.unwrap();

        assert_eq!(outcome.answer, "There is one apple.");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
        assert_eq!(llm.last_observation().as_deref(), Some("apples #1"));
        let kinds: Vec<LogEntryType> = outcome.log.iter().map(|e| e.entry_type).collect();
        assert_eq!(
            kinds,
            vec![LogEntryType::ToolCall, LogEntryType::ToolResult, LogEntryType::Response]
        );
    }

    #[tokio::test]
    async fn unknown_tool_does_not_stop_the_loop() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(vec![call("delete_everything", json!({}))]),
            answer("Could not do that."),
        ]);
        let (_dir, agent) = agent(llm.clone(), Counter::new(), 5);

        let outcome = agent.run_task("x").await.unwrap();

        assert_eq!(outcome.answer, "Could not do that.");
        let observation = llm.last_observation().unwrap();
        assert!(observation.starts_with("Error: Unknown tool 'delete_everything'"));
    }

    #[tokio::test]
    async fn missing_argument_is_fed_back_for_a_retry() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(vec![call("count", json!({}))]),
            tool_reply(vec![call("count", json!({ "label": "retry" }))]),
            answer("ok"),
        ]);
        let counter = Counter::new();
        let (_dir, agent) = agent(llm.clone(), counter.clone(), 5);

        agent.run_task("x").await.unwrap();

        let seen = llm.seen.lock().unwrap();
        let first_observation = seen[1].last().and_then(|m| m.content.clone()).unwrap();
        assert_eq!(
            first_observation,
            "Error: Missing required argument 'label' for tool 'count'"
        );
        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn only_the_first_of_several_calls_runs() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(vec![
                call("count", json!({ "label": "a" })),
                call("count", json!({ "label": "b" })),
            ]),
            answer("done"),
        ]);
        let counter = Counter::new();
        let (_dir, agent) = agent(llm.clone(), counter.clone(), 5);

        agent.run_task("x").await.unwrap();

        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
        let seen = llm.seen.lock().unwrap();
        let assistant = seen[1].iter().find(|m| m.role == Role::Assistant).unwrap();
        assert_eq!(assistant.tool_calls.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn step_budget_aborts() {
        let llm = ScriptedLlm::repeating(ChatResponse {
            content: None,
            tool_calls: vec![call("count", json!({ "label": "again" }))],
        });
        let counter = Counter::new();
        let (_dir, agent) = agent(llm.clone(), counter.clone(), 3);

        let err = agent.run_task("loop forever").await.unwrap_err();

        assert!(matches!(err, AgentError::StepBudgetExhausted(3)));
        assert_eq!(llm.calls(), 3);
        assert_eq!(counter.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn engine_failure_aborts() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(vec![call("count", json!({ "label": "a" }))]),
            Err(LlmError::Transport("connection refused".to_string())),
        ]);
        let (_dir, agent) = agent(llm, Counter::new(), 5);

        let err = agent.run_task("x").await.unwrap_err();
        assert!(matches!(err, AgentError::EngineUnreachable(LlmError::Transport(_))));
    }

    #[tokio::test]
    async fn empty_reply_aborts() {
        let llm = ScriptedLlm::new(vec![Ok(ChatResponse::default())]);
        let (_dir, agent) = agent(llm, Counter::new(), 5);

        let err = agent.run_task("x").await.unwrap_err();
        assert!(matches!(err, AgentError::EngineUnreachable(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn context_only_grows() {
        let llm = ScriptedLlm::new(vec![
            tool_reply(vec![call("count", json!({ "label": "a" }))]),
            tool_reply(vec![call("count", json!({ "label": "b" }))]),
            answer("done"),
        ]);
        let (_dir, agent) = agent(llm.clone(), Counter::new(), 5);

        agent.run_task("x").await.unwrap();

        let seen = llm.seen.lock().unwrap();
        let lengths: Vec<usize> = seen.iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![2, 4, 6]);
        for pair in seen.windows(2) {
            assert_eq!(&pair[1][..pair[0].len()], &pair[0][..]);
        }
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[0][1].content.as_deref(), Some("x"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_then_run_round_trip() {
        use crate::tools::{RunScript, Sandbox, WriteFile};

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path().join("code_output"));
        config.tools.script_interpreter = "sh".to_string();
        let sandbox = Sandbox::new(&config.sandbox_path).unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(WriteFile::new(sandbox.clone()))).unwrap();
        tools
            .register(Arc::new(RunScript::new(sandbox, &config.tools)))
            .unwrap();

        let llm = ScriptedLlm::new(vec![
            tool_reply(vec![call("write_file", json!({ "filename": "out.txt", "content": "hello" }))]),
            tool_reply(vec![call(
                "write_file",
                json!({ "filename": "show.sh", "content": "cat out.txt\n" }),
            )]),
            tool_reply(vec![call("run_script", json!({ "filename": "show.sh" }))]),
            answer("The file says hello."),
        ]);
        let agent = Agent::with_parts(config, llm.clone(), tools);

        let outcome = agent.run_task("write and read back").await.unwrap();

        assert_eq!(outcome.iterations, 4);
        let observation = llm.last_observation().unwrap();
        assert!(observation.starts_with("Output of"), "{}", observation);
        assert!(observation.contains("hello"));
    }

    #[test]
    fn log_truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_log("ab", 5), "ab");
        assert_eq!(truncate_for_log("ąęść", 2), "ąę... [truncated]");
    }
}
