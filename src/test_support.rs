//! Fakes shared by the unit tests.

use crate::error::StepError;
use crate::llm::{Completion, LlmOptions, LlmProvider};
use crate::tool::Tool;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Provider that replays canned responses in order and records every prompt.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<std::result::Result<String, StepError>>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(err: StepError) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(err)])),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn complete(&self, prompt: &str, _options: &LlmOptions) -> std::result::Result<Completion, StepError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(Completion::text(content)),
            Some(Err(err)) => Err(err),
            None => Err(StepError::other("no scripted reply left")),
        }
    }
}

type Handler = Box<dyn Fn(&Value) -> std::result::Result<Value, StepError> + Send + Sync>;

/// Tool backed by a closure that records each input it receives.
pub struct FnTool {
    name: String,
    handler: Handler,
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl FnTool {
    pub fn new(
        name: &str,
        handler: impl Fn(&Value) -> std::result::Result<Value, StepError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            handler: Box::new(handler),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A tool that always returns `output`.
    pub fn returning(name: &str, output: Value) -> Self {
        Self::new(name, move |_| Ok(output.clone()))
    }

    /// A tool that always fails with `err`.
    pub fn failing(name: &str, err: StepError) -> Self {
        Self::new(name, move |_| Err(err.clone()))
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn execute(&self, input: Value) -> std::result::Result<Value, StepError> {
        self.calls.lock().unwrap().push(input.clone());
        (self.handler)(&input)
    }
}
