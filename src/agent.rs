use crate::error::{Error, Result, StepError};
use crate::hooks::{ErrorEvent, Hooks, StepEvent};
use crate::llm::{Completion, LlmOptions, LlmProvider};
use crate::tool::Tool;
use crate::tools::parse::strip_code_fences;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Anything a [`crate::Workflow`] can schedule as a node.
pub trait Runnable: Send {
    /// Unique name within a workflow.
    fn name(&self) -> &str;

    /// Run once from scratch. Each call resets the step history.
    fn execute(&mut self, input: Value) -> Result<AgentResponse>;
}

/// Construction parameters for one agent.
#[derive(Clone)]
pub struct AgentConfig {
    pub name: String,
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub max_iterations: usize,
    /// Recorded for callers; no timer enforces it.
    pub default_timeout: Duration,
    /// Passed to every completion this agent requests.
    pub options: LlmOptions,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            tools: Vec::new(),
            max_iterations: 1,
            default_timeout: Duration::from_millis(15_000),
            options: LlmOptions::default(),
        }
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn options(mut self, options: LlmOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Tool,
    Llm,
    Observation,
}

/// One recorded unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStep {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub name: String,
    pub input: Value,
    pub output: Value,
    #[serde(serialize_with = "error_message", skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    pub timestamp: DateTime<Utc>,
    /// Serialized as whole milliseconds.
    #[serde(serialize_with = "millis")]
    pub duration: Duration,
}

fn millis<S: Serializer>(duration: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

fn error_message<S: Serializer>(error: &Option<Error>, s: S) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(err) => s.serialize_str(&err.to_string()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    /// Always zero: usage is not aggregated yet.
    pub total_tokens: u64,
    /// Always zero: usage is not aggregated yet.
    pub total_cost: f64,
    /// Serialized as whole milliseconds.
    #[serde(serialize_with = "millis")]
    pub duration: Duration,
}

/// Result of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub output: Value,
    pub steps: Vec<AgentStep>,
    pub metrics: Metrics,
}

/// Step bookkeeping shared by every loop strategy: tool lookup, provider
/// access, the append-only step list, notifications and the response
/// envelope.
pub struct StepExecutor {
    config: AgentConfig,
    steps: Vec<AgentStep>,
    started: Instant,
    hooks: Hooks,
}

impl StepExecutor {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            steps: Vec::new(),
            started: Instant::now(),
            hooks: Hooks::default(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Exact-name lookup in the configured tool list.
    pub fn tool(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.config
            .tools
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    pub fn complete(&self, prompt: &str) -> std::result::Result<Completion, StepError> {
        self.config.provider.complete(prompt, &self.config.options)
    }

    /// Append a step and notify subscribers before returning it.
    pub fn record(&mut self, step: AgentStep) -> &AgentStep {
        debug!(
            agent = %self.config.name,
            step = %step.name,
            failed = step.error.is_some(),
            "step recorded"
        );
        self.steps.push(step);
        let step_number = self.steps.len();
        let step = &self.steps[step_number - 1];
        self.hooks.emit_step(&StepEvent {
            agent: &self.config.name,
            step,
            step_number,
        });
        step
    }

    /// Reset state, run `strategy`, and wrap the outcome in a response.
    /// Failures are announced to `on_error` subscribers and returned as-is.
    pub fn drive<L: LoopStrategy + ?Sized>(&mut self, strategy: &mut L, input: Value) -> Result<AgentResponse> {
        self.started = Instant::now();
        self.steps.clear();
        info!(agent = %self.config.name, "run started");

        match strategy.run(self, input) {
            Ok(output) => Ok(self.respond(output)),
            Err(err) => {
                self.hooks.emit_error(&ErrorEvent {
                    agent: &self.config.name,
                    error: &err,
                });
                Err(err)
            }
        }
    }

    fn respond(&self, output: Value) -> AgentResponse {
        let duration = self.started.elapsed();
        info!(
            agent = %self.config.name,
            steps = self.steps.len(),
            duration_ms = duration.as_millis() as u64,
            "run finished"
        );
        AgentResponse {
            output,
            steps: self.steps.clone(),
            metrics: Metrics {
                total_tokens: 0,
                total_cost: 0.0,
                duration,
            },
        }
    }
}

/// How a run turns its input into an output, one recorded step at a time.
pub trait LoopStrategy: Send {
    fn run(&mut self, exec: &mut StepExecutor, input: Value) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
struct Decision {
    tool: String,
    #[serde(default)]
    action: Value,
}

type StopPredicate = Box<dyn Fn(&AgentStep) -> bool + Send>;

/// Ask the model which tool to call, call it, feed the output back in.
pub struct LlmDecision {
    should_stop: StopPredicate,
}

impl Default for LlmDecision {
    fn default() -> Self {
        Self {
            should_stop: Box::new(|_| false),
        }
    }
}

impl LlmDecision {
    fn prompt(config: &AgentConfig, input: &Value) -> String {
        let tools: Vec<Value> = config
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "tool_arguments": t.input_schema(),
                })
            })
            .collect();

        format!(
            "Given the following input: {input}\n\
             Available tools: {tools}\n\
             Select the most appropriate tool and specify the action.\n\
             Response format: {{ \"tool\": \"tool_name\", \"action\": \"arguments to be passed to the tool\" }}",
            tools = Value::Array(tools)
        )
    }

    fn decide(exec: &StepExecutor, input: &Value) -> Result<Decision> {
        let prompt = Self::prompt(exec.config(), input);
        let completion = exec.complete(&prompt)?;
        parse_decision(&completion.content)
    }

    fn attempt(exec: &StepExecutor, input: &Value) -> Result<(Decision, Value)> {
        let decision = Self::decide(exec, input)?;
        let tool = exec.tool(&decision.tool)?;
        let output = tool.execute(decision.action.clone())?;
        Ok((decision, output))
    }

    /// Errors are captured on the step, never returned from here.
    fn step(exec: &StepExecutor, input: Value) -> AgentStep {
        let timestamp = Utc::now();
        let start = Instant::now();

        match Self::attempt(exec, &input) {
            Ok((decision, output)) => AgentStep {
                kind: StepKind::Tool,
                name: decision.tool,
                input: decision.action,
                output,
                error: None,
                timestamp,
                duration: start.elapsed(),
            },
            Err(err) => AgentStep {
                kind: StepKind::Tool,
                name: "error".into(),
                input,
                output: Value::Null,
                error: Some(err),
                timestamp,
                duration: start.elapsed(),
            },
        }
    }
}

impl LoopStrategy for LlmDecision {
    fn run(&mut self, exec: &mut StepExecutor, input: Value) -> Result<Value> {
        let mut current = input;

        for _ in 0..exec.config().max_iterations {
            let step = Self::step(exec, current.clone());
            let step = exec.record(step);

            if let Some(err) = &step.error {
                return Err(err.clone());
            }
            current = step.output.clone();

            if (self.should_stop)(step) {
                break;
            }
        }

        Ok(current)
    }
}

fn parse_decision(content: &str) -> Result<Decision> {
    serde_json::from_str(&strip_code_fences(content)).map_err(|e| Error::DecisionParse(e.to_string()))
}

/// A tool-selecting agent driven by an LLM.
pub struct Agent {
    exec: StepExecutor,
    strategy: LlmDecision,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            exec: StepExecutor::new(config),
            strategy: LlmDecision::default(),
        }
    }

    /// End the loop early once `f` returns true for a completed step.
    pub fn should_stop(mut self, f: impl Fn(&AgentStep) -> bool + Send + 'static) -> Self {
        self.strategy.should_stop = Box::new(f);
        self
    }

    /// Register a callback that fires after each recorded step.
    pub fn on_step(mut self, cb: impl FnMut(&StepEvent) + Send + 'static) -> Self {
        self.exec.hooks_mut().on_step(cb);
        self
    }

    /// Register a callback that fires when a run fails.
    pub fn on_error(mut self, cb: impl FnMut(&ErrorEvent) + Send + 'static) -> Self {
        self.exec.hooks_mut().on_error(cb);
        self
    }

    /// Log steps and failures through `tracing`.
    pub fn with_tracing(mut self) -> Self {
        self.exec.hooks_mut().install_tracing();
        self
    }

    pub fn config(&self) -> &AgentConfig {
        self.exec.config()
    }

    /// Steps of the latest run, including a failing one.
    pub fn steps(&self) -> &[AgentStep] {
        self.exec.steps()
    }
}

impl Runnable for Agent {
    fn name(&self) -> &str {
        &self.exec.config().name
    }

    fn execute(&mut self, input: Value) -> Result<AgentResponse> {
        self.exec.drive(&mut self.strategy, input)
    }
}
