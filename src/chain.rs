use crate::agent::{
    AgentConfig, AgentResponse, AgentStep, LoopStrategy, Runnable, StepExecutor, StepKind,
};
use crate::error::{Error, Result};
use crate::hooks::{ErrorEvent, StepEvent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// One stage of a [`Chain`]. Exactly one of `tool` or `prompt` must be set;
/// this is checked when the stage runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Defaults for the tool input; the running input wins on collisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Map<String, Value>>,
}

impl ChainStep {
    pub fn tool(name: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tool: Some(tool.into()),
            ..Self::default()
        }
    }

    pub fn prompt(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Set default tool arguments. Non-object values are ignored.
    pub fn with_input(mut self, input: Value) -> Self {
        if let Value::Object(map) = input {
            self.input = Some(map);
        }
        self
    }
}

#[derive(Clone)]
pub struct ChainConfig {
    pub agent: AgentConfig,
    pub steps: Vec<ChainStep>,
}

impl ChainConfig {
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: ChainStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// Result of [`Chain::run_steps`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRun {
    pub output: Value,
    pub duration: Duration,
    pub steps: Vec<AgentStep>,
}

/// Walk the configured stages once, in order.
pub struct StaticSequence {
    steps: Vec<ChainStep>,
}

impl StaticSequence {
    fn run_step(exec: &StepExecutor, step: &ChainStep, input: &Value) -> Result<Value> {
        match (&step.tool, &step.prompt) {
            (Some(tool), _) => {
                let tool = exec.tool(tool)?;
                let defaults = step.input.clone().map(Value::Object).unwrap_or(Value::Null);
                Ok(tool.execute(merge(&defaults, input))?)
            }
            (None, Some(prompt)) => {
                let completion = exec.complete(&substitute(prompt, input))?;
                serde_json::to_value(completion).map_err(|e| Error::Config(e.to_string()))
            }
            (None, None) => Err(Error::MalformedStep {
                step: step.name.clone(),
            }),
        }
    }
}

impl LoopStrategy for StaticSequence {
    fn run(&mut self, exec: &mut StepExecutor, input: Value) -> Result<Value> {
        let mut current = input.clone();

        for step in &self.steps {
            let timestamp = Utc::now();
            let start = Instant::now();
            let kind = if step.tool.is_some() {
                StepKind::Tool
            } else {
                StepKind::Llm
            };
            debug!(step = %step.name, ?kind, "chain step");

            let (output, error) = match Self::run_step(exec, step, &current) {
                Ok(output) => (output, None),
                Err(err) => (Value::Null, Some(err)),
            };
            let record = exec.record(AgentStep {
                kind,
                name: step.name.clone(),
                input: current,
                output,
                error,
                timestamp,
                duration: start.elapsed(),
            });

            if let Some(err) = &record.error {
                return Err(err.clone());
            }
            // Overlay on the original input, not on the previous merge.
            current = merge(&input, &record.output);
        }

        Ok(current)
    }
}

/// Shallow `{...base, ...overlay}`. Non-object values contribute no keys.
fn merge(base: &Value, overlay: &Value) -> Value {
    let mut out = Map::new();
    for side in [base, overlay] {
        if let Value::Object(map) = side {
            out.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    Value::Object(out)
}

/// Replace `{key}` with the matching input field. Tokens whose field is
/// missing or falsy (`null`, `false`, `0`, `""`) are left as written.
fn substitute(template: &str, input: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if close > 0 => {
                let key = &after[..close];
                match input.get(key).and_then(render) {
                    Some(text) => out.push_str(&text),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".into()),
        other => Some(other.to_string()),
    }
}

/// A fixed pipeline: tool calls and prompt completions in declared order.
///
/// Shares step bookkeeping with [`crate::Agent`] but never asks the model
/// which tool to use, and ignores `max_iterations`.
pub struct Chain {
    exec: StepExecutor,
    sequence: StaticSequence,
}

impl Chain {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            exec: StepExecutor::new(config.agent),
            sequence: StaticSequence {
                steps: config.steps,
            },
        }
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

    /// Steps recorded so far, including a failing one.
    pub fn steps(&self) -> &[AgentStep] {
        self.exec.steps()
    }

    /// Run the pipeline without the response envelope. Unlike
    /// [`Runnable::execute`], previously recorded steps are kept.
    pub fn run_steps(&mut self, input: Value) -> Result<ChainRun> {
        let start = Instant::now();
        let output = self.sequence.run(&mut self.exec, input)?;
        Ok(ChainRun {
            output,
            duration: start.elapsed(),
            steps: self.exec.steps().to_vec(),
        })
    }
}

impl Runnable for Chain {
    fn name(&self) -> &str {
        &self.exec.config().name
    }

    fn execute(&mut self, input: Value) -> Result<AgentResponse> {
        self.exec.drive(&mut self.sequence, input)
    }
}
