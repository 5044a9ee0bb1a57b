use agent_conductor::{
    AgentConfig, Chain, ChainConfig, ChainStep, Completion, LlmOptions, LlmProvider, LogLevel, Runnable, StepError,
    Tool,
};
use serde_json::{Value, json};
use std::sync::Arc;

/// Stub writer: turns the prompt into a short "draft".
struct Ghostwriter;

impl LlmProvider for Ghostwriter {
    fn complete(&self, prompt: &str, _options: &LlmOptions) -> Result<Completion, StepError> {
        let line = prompt.lines().next().unwrap_or_default();
        Ok(Completion::text(format!("DRAFT :: {line} :: ends with a call to action.")))
    }
}

struct Outline;

impl Tool for Outline {
    fn name(&self) -> &str {
        "outline"
    }

    fn description(&self) -> &str {
        "Produce section headings for a topic"
    }

    fn execute(&self, input: Value) -> Result<Value, StepError> {
        let topic = input["topic"]
            .as_str()
            .ok_or_else(|| StepError::invalid("topic is required"))?;
        let sections = input["sections"].as_u64().unwrap_or(3);
        let outline: Vec<String> = (1..=sections).map(|i| format!("{i}. {topic} part {i}")).collect();
        Ok(json!({"outline": outline.join(" / ")}))
    }
}

struct WordCount;

impl Tool for WordCount {
    fn name(&self) -> &str {
        "word_count"
    }

    fn description(&self) -> &str {
        "Count the words in the draft"
    }

    fn execute(&self, input: Value) -> Result<Value, StepError> {
        let words = input["content"].as_str().map(|c| c.split_whitespace().count()).unwrap_or(0);
        Ok(json!({"words": words}))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level: LogLevel = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse().ok())
        .unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level.as_str()))
        .init();

    // Steps can come from a config file as well as from code.
    let steps: Vec<ChainStep> = serde_json::from_value(json!([
        {"name": "plan", "tool": "outline", "input": {"sections": 2}},
        {"name": "write", "prompt": "Write a post about {topic} following {outline} for {audience}"},
        {"name": "measure", "tool": "word_count"}
    ]))?;

    let agent = AgentConfig::new("content", Arc::new(Ghostwriter))
        .tool(Arc::new(Outline))
        .tool(Arc::new(WordCount));
    let mut config = ChainConfig::new(agent);
    config.steps = steps;

    let mut chain = Chain::new(config)
        .on_step(|e| println!("[{}] {} -> {}", e.step_number, e.step.name, e.step.output))
        .with_tracing();

    let response = chain.execute(json!({"topic": "release notes"}))?;

    println!("\n=== Output ===");
    println!("{}", serde_json::to_string_pretty(&response.output)?);

    // A broken step fails the run but keeps earlier steps around.
    let mut broken = Chain::new(
        ChainConfig::new(AgentConfig::new("broken", Arc::new(Ghostwriter)).tool(Arc::new(Outline)))
            .step(ChainStep::tool("plan", "outline"))
            .step(ChainStep {
                name: "nothing".into(),
                ..ChainStep::default()
            }),
    );
    if let Err(err) = broken.execute(json!({"topic": "errors"})) {
        println!("\nbroken chain failed: {err}");
        println!("completed before failure: {}", broken.steps()[0].output);
    }
    Ok(())
}
