use crate::config::OpenAiConfig;
use crate::error::StepError;
use crate::llm::{
    Completion, FunctionCall, FunctionCompletion, LlmFunction, LlmOptions, LlmProvider, ResponseFormat, Usage,
};
use serde_json::{Value, json};
use tracing::debug;
use ureq::Agent;

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Chat Completions client for OpenAI and compatible servers.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    agent: Agent,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .into();
        Self { config, agent }
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn post(&self, body: &Value) -> Result<Value, StepError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(%url, model = %body["model"], "openai request");

        let mut req = self
            .agent
            .post(url.as_str())
            .header("Authorization", format!("Bearer {}", self.config.api_key));
        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }

        let value: Value = req.send_json(body)?.body_mut().read_json()?;
        Ok(value)
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete(&self, prompt: &str, options: &LlmOptions) -> Result<Completion, StepError> {
        let body = chat_request(&self.config.model, prompt, options, &[]);
        self.post(&body)
            .and_then(parse_completion)
            .map(|c| c.completion)
            .map_err(|e| e.context("OpenAI completion error"))
    }

    fn complete_with_functions(
        &self,
        prompt: &str,
        functions: &[LlmFunction],
        options: &LlmOptions,
    ) -> Result<FunctionCompletion, StepError> {
        let body = chat_request(&self.config.model, prompt, options, functions);
        self.post(&body)
            .and_then(parse_completion)
            .map_err(|e| e.context("OpenAI function completion error"))
    }
}

/// Request body for one user prompt. Functions, when given, are offered as
/// tools with automatic choice.
pub fn chat_request(default_model: &str, prompt: &str, options: &LlmOptions, functions: &[LlmFunction]) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &options.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let mut body = json!({
        "model": options.model.as_deref().unwrap_or(default_model),
        "messages": messages,
        "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    });

    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(format) = options.response_format {
        let kind = match format {
            ResponseFormat::JsonObject => "json_object",
            ResponseFormat::Text => "text",
        };
        body["response_format"] = json!({"type": kind});
    }
    if !functions.is_empty() {
        let tools: Vec<Value> = functions
            .iter()
            .map(|f| json!({"type": "function", "function": f}))
            .collect();
        body["tools"] = Value::Array(tools);
        body["tool_choice"] = json!("auto");
    }

    body
}

/// Decode a Chat Completions response. Only the first choice and its first
/// tool call are read.
pub fn parse_completion(raw: Value) -> Result<FunctionCompletion, StepError> {
    let message = raw
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| StepError::invalid("response has no choices"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let function_call = match message.get("tool_calls").and_then(|t| t.get(0)) {
        Some(call) => {
            let function = &call["function"];
            let name = function["name"]
                .as_str()
                .ok_or_else(|| StepError::invalid("tool call has no function name"))?
                .to_string();
            let arguments = match function["arguments"].as_str() {
                Some(text) => serde_json::from_str(text)
                    .map_err(|e| StepError::invalid(format!("tool call arguments for {name}: {e}")))?,
                None => Value::Null,
            };
            Some(FunctionCall { name, arguments })
        }
        None => None,
    };

    let count = |key: &str| raw["usage"][key].as_u64().unwrap_or(0);
    let usage = Usage {
        prompt_tokens: count("prompt_tokens"),
        completion_tokens: count("completion_tokens"),
        total_tokens: count("total_tokens"),
    };

    Ok(FunctionCompletion {
        completion: Completion {
            content,
            usage: Some(usage),
            raw: Some(raw),
        },
        function_call,
    })
}
