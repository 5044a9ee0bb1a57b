use agent_conductor::{
    AgentConfig, Chain, ChainConfig, ChainStep, Completion, Edge, Graph, LlmOptions, LlmProvider, LogLevel,
    StepError, Tool, Workflow, WorkflowConfig,
};
use serde_json::{Value, json};
use std::sync::Arc;

/// Stub provider that always picks the same tool and passes its input along.
struct Always(&'static str);

impl LlmProvider for Always {
    fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<Completion, StepError> {
        Ok(Completion::text(json!({"tool": self.0, "action": {}}).to_string()))
    }
}

/// A tool backed by a plain function.
struct FnTool {
    name: &'static str,
    run: fn(&Value) -> Result<Value, StepError>,
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "demo tool"
    }

    fn execute(&self, input: Value) -> Result<Value, StepError> {
        (self.run)(&input)
    }
}

fn agent(name: &str, tool: &'static str, run: fn(&Value) -> Result<Value, StepError>) -> AgentConfig {
    AgentConfig::new(name, Arc::new(Always(tool))).tool(Arc::new(FnTool { name: tool, run }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level: LogLevel = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse().ok())
        .unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level.as_str()))
        .init();

    // --- Plain agents from a config ---

    let config = WorkflowConfig {
        name: "code-review".into(),
        agents: vec![
            agent("lint", "run_lint", |_| Ok(json!({"warnings": 2}))),
            agent("tests", "run_tests", |_| Ok(json!({"passed": 41, "failed": 1}))),
            agent("report", "summarize", |input| {
                let warnings = input["lint"]["warnings"].as_u64().unwrap_or(0);
                let failed = input["tests"]["failed"].as_u64().unwrap_or(0);
                Ok(json!({"verdict": if failed == 0 { "approve" } else { "request changes" }, "warnings": warnings}))
            }),
        ],
        graph: Graph {
            nodes: vec!["lint".into(), "tests".into(), "report".into()],
            edges: vec![
                Edge::new("lint", "report"),
                Edge::new("tests", "report"),
            ],
        },
    };

    let mut workflow = Workflow::new(config)?
        .on_agent_complete(|e| println!("{} finished: {}", e.agent, e.response.output))
        .on_error(|e| eprintln!("{} failed: {}", e.agent, e.error))
        .with_tracing();

    println!("order: {:?}", workflow.execution_order());
    let results = workflow.execute(json!({"pr": 1234}))?;
    println!("verdict: {}\n", results["report"].output["verdict"]);

    // --- A chain as a node ---

    let triage = Chain::new(
        ChainConfig::new(
            AgentConfig::new("triage", Arc::new(Always("unused"))).tool(Arc::new(FnTool {
                name: "label",
                run: |input| Ok(json!({"label": if input["size"].as_u64() > Some(500) { "large" } else { "small" }})),
            })),
        )
        .step(ChainStep::tool("label", "label")),
    );

    let mut workflow = Workflow::builder("triage-then-assign")
        .register_runnable(triage)
        .register(agent("assign", "pick_reviewer", |input| {
            let large = input["triage"]["label"] == "large";
            Ok(json!({"reviewer": if large { "two seniors" } else { "anyone" }}))
        }))
        .nodes(["triage", "assign"])
        .edge("triage", "assign")
        .build()?;

    let results = workflow.execute(json!({"pr": 1235, "size": 800}))?;
    println!("assigned: {}", results["assign"].output["reviewer"]);

    // --- Cycles never run ---

    let cyclic = Workflow::builder("loop")
        .register(agent("a", "noop", |_| Ok(Value::Null)))
        .register(agent("b", "noop", |_| Ok(Value::Null)))
        .nodes(["a", "b"])
        .edge("a", "b")
        .edge("b", "a")
        .build();
    if let Err(err) = cyclic {
        println!("rejected: {err}");
    }
    Ok(())
}
