//! Compose LLM calls into agents, chains and workflows.
//!
//! An [`Agent`] asks its provider which tool to call, calls it, and feeds
//! the output back in for up to `max_iterations` rounds. A [`Chain`] walks a
//! fixed list of tool and prompt steps, merging each output over the
//! original input. A [`Workflow`] runs named agents one at a time in
//! dependency order, handing each node its predecessors' outputs.
//!
//! Around those sit a namespaced [`MemoryStore`] with a [`ContextManager`]
//! for conversation state, and an [`EvalRunner`] that scores finished runs.
//!
//! Everything is synchronous: provider and tool calls block the calling
//! thread, and retry backoff sleeps it.
//!
//! # Quick start
//!
//! ```rust
//! use agent_conductor::{Agent, AgentConfig, Completion, LlmOptions, LlmProvider, Runnable, StepError, Tool};
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! struct Canned;
//! impl LlmProvider for Canned {
//!     fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<Completion, StepError> {
//!         Ok(Completion::text(r#"{"tool": "shout", "action": {"text": "hello"}}"#))
//!     }
//! }
//!
//! struct Shout;
//! impl Tool for Shout {
//!     fn name(&self) -> &str { "shout" }
//!     fn description(&self) -> &str { "Upper-case the text field" }
//!     fn execute(&self, input: Value) -> Result<Value, StepError> {
//!         let text = input["text"].as_str().ok_or_else(|| StepError::invalid("text is required"))?;
//!         Ok(json!({"text": text.to_uppercase()}))
//!     }
//! }
//!
//! let config = AgentConfig::new("shouter", Arc::new(Canned)).tool(Arc::new(Shout));
//! let mut agent = Agent::new(config);
//!
//! let response = agent.execute(json!({"request": "say hello loudly"})).unwrap();
//! assert_eq!(response.output, json!({"text": "HELLO"}));
//! assert_eq!(response.steps.len(), 1);
//! ```

mod agent;
mod chain;
mod config;
mod context;
mod error;
mod eval;
mod hooks;
mod llm;
mod memory;
pub mod providers;
mod registry;
mod retry;
#[cfg(test)]
mod test_support;
mod tool;
pub mod tools;
mod workflow;

pub use agent::{
    Agent, AgentConfig, AgentResponse, AgentStep, LlmDecision, LoopStrategy, Metrics, Runnable, StepExecutor,
    StepKind,
};
pub use chain::{Chain, ChainConfig, ChainRun, ChainStep, StaticSequence};
pub use config::{Config, LogLevel, LoggingConfig, OpenAiConfig};
pub use context::{ContextData, ContextManager, ContextMessage, ContextSummary, DEFAULT_RECENT_MESSAGES};
pub use error::{Error, Result, StepError};
pub use eval::{
    Aggregation, AutomatedEvaluator, CustomEvaluator, EvalConfig, EvalMetric, EvalReport, EvalResult, EvalRunner,
    Evaluator, HumanEvaluator, MetricType,
};
pub use hooks::{AgentCompleteEvent, ErrorEvent, Hooks, StepEvent};
pub use llm::{
    Completion, FunctionCall, FunctionCompletion, LlmFunction, LlmOptions, LlmProvider, LlmRegistry, ResponseFormat,
    Usage,
};
pub use memory::{
    InMemoryStore, MemoryEvent, MemoryItem, MemoryMetadata, MemoryQuery, MemoryStore, RememberOptions, StoreProvider,
};
pub use registry::ToolRegistry;
pub use retry::{RetryOptions, RetryPolicy, RetryStrategy};
pub use tool::{
    BaseTool, ExecutionMode, RetryEvent, Tool, ToolConfig, ToolInput, ToolLimits, ToolMetrics, ToolResult, ToolType,
};
pub use workflow::{Edge, Graph, Workflow, WorkflowBuilder, WorkflowConfig};
