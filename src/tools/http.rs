use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::error::{Result, StepError};
use crate::tool::{BaseTool, RetryEvent, Tool, ToolConfig, ToolInput, ToolResult, ToolType};
use serde::Deserialize;
use serde_json::{Value, json};
use ureq::Agent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum Method {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Deserialize)]
struct HttpRequest {
    url: String,
    #[serde(default)]
    method: Method,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// GET or POST a URL. Input: `{"url", "method"?, "body"?, "headers"?}`.
///
/// The response body is returned as JSON when it parses, as a string
/// otherwise, inside a [`ToolResult`] envelope. Transport failures are
/// retried by [`BaseTool::execute_with_retry`].
pub struct HttpTool {
    base: BaseTool,
    agent: Agent,
}

impl HttpTool {
    pub fn new() -> Result<Self> {
        let mut config = ToolConfig::new(
            "http_request",
            ToolType::Api,
            "Send an HTTP GET or POST request and return the response body",
        );
        config.input = ToolInput {
            schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "method": {"type": "string", "enum": ["GET", "POST"]},
                    "body": {},
                    "headers": {"type": "object"}
                }
            }),
            required: vec!["url".into()],
        };
        config.limits.max_execution_time = Some(Duration::from_secs(5));
        Self::with_config(config)
    }

    pub fn with_config(config: ToolConfig) -> Result<Self> {
        let timeout = config.limits.max_execution_time;
        let agent: Agent = Agent::config_builder().timeout_global(timeout).build().into();
        Ok(Self {
            base: BaseTool::new(config)?,
            agent,
        })
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.base = self.base.with_retry_base(base);
        self
    }

    pub fn on_retry(mut self, cb: impl Fn(&RetryEvent) + Send + Sync + 'static) -> Self {
        self.base = self.base.on_retry(cb);
        self
    }

    fn send(&self, req: &HttpRequest) -> std::result::Result<String, StepError> {
        let body = match req.method {
            Method::Get => {
                let mut builder = self.agent.get(req.url.as_str());
                for (k, v) in &req.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()?.body_mut().read_to_string()?
            }
            Method::Post => {
                let mut builder = self.agent.post(req.url.as_str());
                for (k, v) in &req.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                let mut response = match &req.body {
                    Some(Value::String(text)) => builder.send(text.as_str())?,
                    Some(json) => builder.send_json(json)?,
                    None => builder.send_empty()?,
                };
                response.body_mut().read_to_string()?
            }
        };
        Ok(body)
    }
}

impl Tool for HttpTool {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> &str {
        self.base.description()
    }

    fn input_schema(&self) -> Option<Value> {
        Some(self.base.config().input.schema.clone())
    }

    fn execute(&self, input: Value) -> std::result::Result<Value, StepError> {
        let req: HttpRequest =
            serde_json::from_value(input).map_err(|e| StepError::invalid(format!("http_request input: {e}")))?;

        let start = Instant::now();
        let body = self.base.execute_with_retry(|| self.send(&req))?;
        let data = serde_json::from_str(&body).unwrap_or(Value::String(body));

        Ok(ToolResult::ok(data).with_duration(start.elapsed()).into_value())
    }
}
