//! Tool system: the capabilities the agent can invoke.
//!
//! Each tool is an explicit [`Tool`] value with a [`ToolDescriptor`] and an
//! `invoke` method. Faults inside a tool never escape it: every call ends in a
//! [`ToolResult`], and [`ToolError`] exists only to be rendered into
//! [`ToolResult::Failed`] at the boundary.

mod arxiv;
mod file;
mod sandbox;
mod terminal;
mod web;
mod wikipedia;

pub use arxiv::{parse_feed, ArxivFeed, ArxivPaper, ArxivSearch};
pub use file::WriteFile;
pub use sandbox::Sandbox;
pub use terminal::{RunScript, ScriptExecutionOutcome};
pub use web::{extract_records, format_records, ExtractedRecord, ProductSearch};
pub use wikipedia::{WikipediaLoad, WikipediaSearch};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::Config;

/// Outcome of a single tool invocation. Always human-readable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    Ok(String),
    Failed(String),
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ToolResult::Ok(text) | ToolResult::Failed(text) => text,
        }
    }

    /// Text appended to the conversation after the tool ran.
    pub fn to_observation(&self) -> String {
        match self {
            ToolResult::Ok(text) => text.clone(),
            ToolResult::Failed(text) => format!("Error: {}", text),
        }
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_observation())
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::Failed(err.to_string())
    }
}

/// Everything that can go wrong inside a tool or while dispatching to one.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Web request failed: {0}")]
    Network(String),

    #[error("Invalid filename '{0}': expected a plain file name such as 'report.md'")]
    InvalidFilename(String),

    #[error("Script '{0}' not found")]
    ScriptNotFound(String),

    #[error("Wikipedia page '{0}' not found; search for the exact title first")]
    PageNotFound(String),

    #[error("Script '{path}' timed out after {secs} seconds and was terminated")]
    ExecutionTimeout { path: String, secs: u64 },

    #[error("Script '{path}' failed ({status}):\n{stderr}")]
    NonZeroExit {
        path: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to start script '{path}': {reason}")]
    Spawn { path: String, reason: String },

    #[error("Failed to write file '{path}': {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown tool '{name}'. Available tools: {available}")]
    UnknownTool { name: String, available: String },

    #[error("Missing required argument '{argument}' for tool '{tool}'")]
    MissingArgument { tool: String, argument: String },

    #[error("Argument '{argument}' for tool '{tool}' must be a {expected}")]
    InvalidArgument {
        tool: String,
        argument: String,
        expected: &'static str,
    },

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Tool setup failed: {0}")]
    Setup(String),
}

/// JSON type of a declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
        }
    }

    /// Coerce a raw argument into this kind, if it can be read as one.
    ///
    /// Models often send `5` where a string is declared; scalars are
    /// stringified. Nothing else is coerced.
    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamKind::String, Value::String(_)) => Some(value.clone()),
            (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(value.clone())
            }
            (ParamKind::Boolean, Value::Bool(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// A named, typed parameter in a tool's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl ToolParameter {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Name, description and ordered parameter list of a tool.
///
/// Built once by the tool's constructor; there is no way to mutate it after
/// that, so a registered descriptor never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[ToolParameter] {
        &self.parameters
    }

    /// JSON-Schema `object` describing the parameters, as function-calling
    /// engines expect it.
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind.as_str(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A tool call proposed by the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build a request from loosely shaped engine output.
    ///
    /// Arguments may arrive as a JSON object or as a string holding one.
    /// Anything else binds as "no arguments", so the registry reports the
    /// missing ones instead of the call being lost.
    pub fn from_raw(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }
}

/// Arguments after binding against a descriptor: every required parameter is
/// present and every present parameter has its declared kind.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    tool: String,
    values: Map<String, Value>,
}

impl ToolArguments {
    /// Bind raw arguments by name against `descriptor`.
    pub fn bind(descriptor: &ToolDescriptor, raw: &Map<String, Value>) -> Result<Self, ToolError> {
        let mut values = Map::new();
        for param in descriptor.parameters() {
            match raw.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(ToolError::MissingArgument {
                            tool: descriptor.name().to_string(),
                            argument: param.name.clone(),
                        });
                    }
                }
                Some(value) => {
                    let coerced =
                        param
                            .kind
                            .coerce(value)
                            .ok_or_else(|| ToolError::InvalidArgument {
                                tool: descriptor.name().to_string(),
                                argument: param.name.clone(),
                                expected: param.kind.as_str(),
                            })?;
                    values.insert(param.name.clone(), coerced);
                }
            }
        }

        for extra in raw.keys() {
            if descriptor.parameters().iter().all(|p| &p.name != extra) {
                tracing::debug!(
                    "Ignoring undeclared argument '{}' for tool '{}'",
                    extra,
                    descriptor.name()
                );
            }
        }

        Ok(Self {
            tool: descriptor.name().to_string(),
            values,
        })
    }

    /// A string argument that binding guaranteed to be present.
    pub fn str(&self, name: &str) -> Result<&str, ToolError> {
        self.opt_str(name).ok_or_else(|| ToolError::MissingArgument {
            tool: self.tool.clone(),
            argument: name.to_string(),
        })
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn opt_int(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }
}

/// A capability the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool. Must not panic or leak errors; failures are
    /// [`ToolResult::Failed`].
    async fn invoke(&self, args: &ToolArguments) -> ToolResult;
}

/// The fixed set of tools available to the agent, looked up by exact name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in tool list: product search, Wikipedia, arXiv, file writing,
    /// script running.
    pub fn with_builtin_tools(config: &Config) -> Result<Self, ToolError> {
        let sandbox = Sandbox::new(&config.sandbox_path)
            .map_err(|e| ToolError::Setup(format!("cannot create sandbox directory: {}", e)))?;

        let mut registry = Self::new();
        registry.register(Arc::new(ProductSearch::new(&config.tools)?))?;
        registry.register(Arc::new(WikipediaSearch::new(&config.tools)?))?;
        registry.register(Arc::new(WikipediaLoad::new(&config.tools)?))?;
        registry.register(Arc::new(ArxivSearch::new(&config.tools)?))?;
        registry.register(Arc::new(WriteFile::new(sandbox.clone())))?;
        registry.register(Arc::new(RunScript::new(sandbox, &config.tools)))?;
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.descriptor().name();
        if self.get(name).is_some() {
            return Err(ToolError::DuplicateTool(name.to_string()));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.descriptor().name() == name)
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor().name()).collect()
    }

    /// Bind the request's arguments and invoke the named tool.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolResult {
        let Some(tool) = self.get(&request.name) else {
            tracing::warn!("Engine requested unknown tool '{}'", request.name);
            return ToolError::UnknownTool {
                name: request.name.clone(),
                available: self.names().join(", "),
            }
            .into();
        };

        let args = match ToolArguments::bind(tool.descriptor(), &request.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!("Rejected call to '{}': {}", request.name, e);
                return e.into();
            }
        };

        tool.invoke(&args).await
    }
}
