use agent_conductor::providers::OpenAiProvider;
use agent_conductor::{
    Agent, AgentConfig, Completion, Config, ContextManager, EvalConfig, EvalMetric, EvalRunner, InMemoryStore,
    LlmOptions, LlmProvider, LogLevel, MemoryStore, RememberOptions, RetryOptions, RetryPolicy, Runnable, StepError,
    Tool, ToolRegistry, ToolType,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Stub provider: used when OPENAI_API_KEY is not set
// ---------------------------------------------------------------------------

struct Planner {
    turn: AtomicUsize,
}

impl LlmProvider for Planner {
    fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<Completion, StepError> {
        let decision = match self.turn.fetch_add(1, Ordering::SeqCst) {
            0 => json!({"tool": "lookup", "action": {"topic": "rust ownership"}}),
            _ => json!({"tool": "summarize", "action": {"max_words": 12}}),
        };
        Ok(Completion::text(decision.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Knowledge-base lookup whose backend drops the first request.
struct Lookup {
    calls: AtomicUsize,
    retry: RetryPolicy,
    last: Arc<Mutex<Value>>,
}

impl Lookup {
    fn fetch(&self, topic: &str) -> Result<Value, StepError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StepError::network("connection reset by knowledge base"));
        }
        Ok(json!({
            "topic": topic,
            "facts": [
                "every value has a single owner",
                "borrows never outlive the owner",
                "moves transfer ownership"
            ]
        }))
    }
}

impl Tool for Lookup {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Look up facts about a topic"
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({"type": "object", "properties": {"topic": {"type": "string"}}}))
    }

    fn execute(&self, input: Value) -> Result<Value, StepError> {
        let topic = input["topic"]
            .as_str()
            .ok_or_else(|| StepError::invalid("topic is required"))?;
        let found = self.retry.execute(|| self.fetch(topic))?;
        if let Ok(mut last) = self.last.lock() {
            *last = found.clone();
        }
        Ok(found)
    }
}

/// Condenses whatever the lookup found last.
struct Summarize {
    source: Arc<Mutex<Value>>,
}

impl Tool for Summarize {
    fn name(&self) -> &str {
        "summarize"
    }

    fn description(&self) -> &str {
        "Summarize the most recent findings"
    }

    fn execute(&self, input: Value) -> Result<Value, StepError> {
        let max_words = input["max_words"].as_u64().unwrap_or(20) as usize;
        let source = self
            .source
            .lock()
            .map_err(|_| StepError::other("findings unavailable"))?
            .clone();
        let facts: Vec<&str> = source["facts"]
            .as_array()
            .map(|f| f.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let joined = facts.join("; ");
        let summary: Vec<&str> = joined.split_whitespace().take(max_words).collect();
        Ok(json!({"summary": summary.join(" ")}))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env().ok();
    let level = config.as_ref().map(|c| c.logging.level).unwrap_or(LogLevel::Info);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level.as_str()))
        .init();

    let provider: Arc<dyn LlmProvider> = match config {
        Some(config) => Arc::new(OpenAiProvider::new(config.openai)),
        None => Arc::new(Planner {
            turn: AtomicUsize::new(0),
        }),
    };

    let findings = Arc::new(Mutex::new(Value::Null));
    let retry = RetryPolicy::new(RetryOptions::new(
        3,
        Duration::from_millis(100),
        Duration::from_secs(1),
    ))
    .on_retry(|attempt, err| println!("  lookup attempt {attempt} failed: {err}"));

    let mut registry = ToolRegistry::new();
    registry.register(
        Arc::new(Lookup {
            calls: AtomicUsize::new(0),
            retry,
            last: Arc::clone(&findings),
        }),
        ToolType::DataLoader,
    )?;
    registry.register(Arc::new(Summarize { source: findings }), ToolType::Transformation)?;

    let config = AgentConfig::new("researcher", provider)
        .tools(registry.select(&["lookup", "summarize"])?)
        .max_iterations(4);

    let mut agent = Agent::new(config)
        .should_stop(|step| step.output.get("summary").is_some())
        .on_step(|e| println!("step {}: {} -> {}", e.step_number, e.step.name, e.step.output))
        .with_tracing();

    let question = "How does ownership work in Rust?";
    let response = agent.execute(json!({"question": question}))?;

    let memory = Arc::new(
        MemoryStore::new(Arc::new(InMemoryStore::new()))
            .namespace("research")
            .on_event(|e| println!("  memory: {e:?}")),
    );
    memory.remember(
        "ownership",
        &response.output,
        RememberOptions::default().kind("summary").tag("rust"),
    )?;

    let mut session = ContextManager::new(Arc::clone(&memory), "session-1");
    session.initialize()?;
    session.add_message("user", question)?;
    session.add_message("assistant", response.output.to_string())?;

    println!("\n=== Result ===");
    println!("{}", response.output);
    println!("steps: {}, took {:?}", response.steps.len(), response.metrics.duration);
    println!("remembered: {:?}", memory.search_by_tags(&["rust"])?);
    println!("session: {:?}", session.summarize());

    // --- Score the run ---

    let evals = EvalRunner::new(EvalConfig::new(vec![
        EvalMetric::automated("responseTime"),
        EvalMetric::automated("tokenUsage"),
        EvalMetric::automated("errorRate"),
    ]))
    .register_metric("has_summary", |run, _| {
        Ok(if run["output"]["summary"].is_string() { 1.0 } else { 0.0 })
    });
    let run = json!({
        "success": true,
        "output": response.output,
        "metrics": serde_json::to_value(response.metrics)?,
    });
    let report = evals.run(&run, None);
    for result in &report.results {
        println!("eval {}: {:.2}", result.metric_name, result.score);
    }
    println!("overall: {:?}, passed: {}", report.overall, report.passed);
    Ok(())
}
