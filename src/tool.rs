use crate::error::{Error, Result, StepError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::warn;

/// A capability an agent can invoke.
///
/// `name` is the identity key: registries and agents look tools up by it.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Argument contract shown to the model when it picks a tool.
    fn input_schema(&self) -> Option<Value> {
        None
    }

    fn execute(&self, input: Value) -> std::result::Result<Value, StepError>;
}

/// Envelope returned by the built-in tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ToolMetrics>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metrics: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
            metrics: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.metrics = Some(ToolMetrics {
            duration,
            extra: Map::new(),
        });
        self
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub duration: Duration,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Category tag used by [`crate::ToolRegistry`] to group tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolType {
    Analysis,
    Transformation,
    Validation,
    Generation,
    Extraction,
    DataLoader,
    DataCleaner,
    DataTransformer,
    DataValidator,
    Api,
    Database,
    FileSystem,
    Formatter,
    Calculator,
    Converter,
    Custom,
    Plugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Sync,
    Async,
    Batch,
    Stream,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolLimits {
    pub max_retries: Option<u32>,
    pub max_execution_time: Option<Duration>,
}

/// Static description of a tool built on [`BaseTool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub tool_type: ToolType,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub input: ToolInput,
    #[serde(default)]
    pub limits: ToolLimits,
}

impl ToolConfig {
    pub fn new(name: impl Into<String>, tool_type: ToolType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tool_type,
            version: "0.1.0".into(),
            description: description.into(),
            author: None,
            execution_mode: ExecutionMode::Sync,
            input: ToolInput::default(),
            limits: ToolLimits::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidToolConfig("name must not be empty".into()));
        }
        if self.description.trim().is_empty() {
            return Err(Error::InvalidToolConfig("description must not be empty".into()));
        }
        if !is_semver(&self.version) {
            return Err(Error::InvalidToolConfig(format!(
                "version '{}' must look like MAJOR.MINOR.PATCH",
                self.version
            )));
        }
        Ok(())
    }
}

fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Passed to the retry hook after every failed attempt of
/// [`BaseTool::execute_with_retry`].
pub struct RetryEvent<'a> {
    pub tool: &'a str,
    pub attempt: u32,
    pub error: &'a StepError,
}

const DEFAULT_TOOL_RETRIES: u32 = 3;

/// Shared plumbing for concrete tools: a validated config plus a blunt
/// retry-until-exhausted helper.
pub struct BaseTool {
    config: ToolConfig,
    retry_base: Duration,
    on_retry: Option<Box<dyn Fn(&RetryEvent) + Send + Sync>>,
}

impl BaseTool {
    pub fn new(config: ToolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            retry_base: Duration::from_secs(1),
            on_retry: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Base of the `2^attempt` backoff (one second unless overridden).
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Register a callback that fires after every failed attempt.
    pub fn on_retry(mut self, cb: impl Fn(&RetryEvent) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(cb));
        self
    }

    /// Run `op` up to `limits.max_retries` times (3 if unset), regardless of
    /// the error kind. Returns the last error once attempts run out.
    pub fn execute_with_retry<T>(
        &self,
        op: impl FnMut() -> std::result::Result<T, StepError>,
    ) -> std::result::Result<T, StepError> {
        let max = match self.config.limits.max_retries {
            Some(n) if n > 0 => n,
            _ => DEFAULT_TOOL_RETRIES,
        };
        self.execute_with_retries(max, op)
    }

    pub fn execute_with_retries<T>(
        &self,
        max_retries: u32,
        mut op: impl FnMut() -> std::result::Result<T, StepError>,
    ) -> std::result::Result<T, StepError> {
        let max_retries = max_retries.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(tool = %self.config.name, attempt, error = %err, "tool attempt failed");
                    if let Some(cb) = &self.on_retry {
                        cb(&RetryEvent {
                            tool: &self.config.name,
                            attempt,
                            error: &err,
                        });
                    }
                    if attempt >= max_retries {
                        return Err(err);
                    }
                    std::thread::sleep(self.retry_base.saturating_mul(2u32.saturating_pow(attempt)));
                    attempt += 1;
                }
            }
        }
    }
}
