use crate::agent::{Agent, AgentConfig, AgentResponse, Runnable};
use crate::error::{Error, Result};
use crate::hooks::{AgentCompleteEvent, ErrorEvent, Hooks};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Carried for callers and visualizers; never evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    fn validate(&self) -> Result<()> {
        let declared: HashSet<&str> = self.nodes.iter().map(String::as_str).collect();
        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !declared.contains(end.as_str()) {
                    return Err(Error::UnknownNode(end.clone()));
                }
            }
        }
        Ok(())
    }

    /// Depth-first topological order: nodes visited in declared order, each
    /// placed ahead of everything reachable from it.
    fn execution_order(&self) -> Result<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            self.visit(node, &mut visited, &mut on_stack, &mut order)?;
        }

        order.reverse();
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if on_stack.contains(node) {
            return Err(Error::Cycle);
        }
        if visited.contains(node) {
            return Ok(());
        }

        on_stack.insert(node);
        for edge in self.edges.iter().filter(|e| e.from == node) {
            self.visit(&edge.to, visited, on_stack, order)?;
        }
        on_stack.remove(node);
        visited.insert(node);
        // post-order; reversed once at the end
        order.push(node.to_string());
        Ok(())
    }

    fn predecessors<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a str> {
        self.edges
            .iter()
            .filter(move |e| e.to == node)
            .map(|e| e.from.as_str())
    }
}

/// Construction parameters for [`Workflow::new`]: one plain agent per node.
#[derive(Clone)]
pub struct WorkflowConfig {
    pub name: String,
    pub agents: Vec<AgentConfig>,
    pub graph: Graph,
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

pub struct WorkflowBuilder {
    name: String,
    runnables: Vec<Box<dyn Runnable>>,
    graph: Graph,
}

impl WorkflowBuilder {
    /// Add a plain [`Agent`] built from `config`.
    pub fn register(self, config: AgentConfig) -> Self {
        self.register_runnable(Agent::new(config))
    }

    /// Add any runnable, e.g. a [`crate::Chain`]. Its name is the node name.
    pub fn register_runnable(mut self, runnable: impl Runnable + 'static) -> Self {
        self.runnables.push(Box::new(runnable));
        self
    }

    pub fn node(mut self, name: impl Into<String>) -> Self {
        self.graph.nodes.push(name.into());
        self
    }

    pub fn nodes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graph.nodes.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.push(Edge::new(from, to));
        self
    }

    /// Like [`edge`](Self::edge), with a condition label attached.
    pub fn conditional_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        let mut edge = Edge::new(from, to);
        edge.condition = Some(condition.into());
        self.graph.edges.push(edge);
        self
    }

    pub fn build(self) -> Result<Workflow> {
        let mut agents: HashMap<String, Box<dyn Runnable>> = HashMap::new();
        for runnable in self.runnables {
            let name = runnable.name().to_string();
            if agents.contains_key(&name) {
                return Err(Error::DuplicateAgent(name));
            }
            agents.insert(name, runnable);
        }

        self.graph.validate()?;
        let order = self.graph.execution_order()?;

        if let Some(node) = order.iter().find(|n| !agents.contains_key(*n)) {
            return Err(Error::MissingAgent(node.clone()));
        }

        debug!(workflow = %self.name, ?order, "execution order computed");
        Ok(Workflow {
            name: self.name,
            agents,
            graph: self.graph,
            order,
            hooks: Hooks::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow (validated, only constructed via build())
// ---------------------------------------------------------------------------

/// Named runnables executed one at a time in dependency order.
///
/// A node with no incoming edges receives the workflow input. Any other node
/// receives an object keyed by predecessor name holding each predecessor's
/// output. Independent branches are not run concurrently.
pub struct Workflow {
    name: String,
    agents: HashMap<String, Box<dyn Runnable>>,
    graph: Graph,
    order: Vec<String>,
    hooks: Hooks,
}

impl Workflow {
    /// Build one [`Agent`] per config and validate the graph. Cycles are
    /// rejected here, before anything runs.
    pub fn new(config: WorkflowConfig) -> Result<Self> {
        let mut builder = Self::builder(config.name);
        builder.graph = config.graph;
        config
            .agents
            .into_iter()
            .fold(builder, WorkflowBuilder::register)
            .build()
    }

    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            runnables: Vec::new(),
            graph: Graph::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    /// Register a callback that fires after each node succeeds.
    pub fn on_agent_complete(mut self, cb: impl FnMut(&AgentCompleteEvent) + Send + 'static) -> Self {
        self.hooks.on_agent_complete(cb);
        self
    }

    /// Register a callback that fires when a node fails, before the run aborts.
    pub fn on_error(mut self, cb: impl FnMut(&ErrorEvent) + Send + 'static) -> Self {
        self.hooks.on_error(cb);
        self
    }

    /// Log node completions and failures through `tracing`.
    pub fn with_tracing(mut self) -> Self {
        self.hooks.install_tracing();
        self
    }

    /// Run every node once. The first failure aborts the run and is
    /// returned unchanged; no partial results are kept.
    pub fn execute(&mut self, input: Value) -> Result<BTreeMap<String, AgentResponse>> {
        info!(workflow = %self.name, nodes = self.order.len(), "workflow started");
        let mut results = BTreeMap::new();
        let mut outputs: HashMap<&str, Value> = HashMap::new();

        for name in &self.order {
            let agent_input = prepare_input(&self.graph, name, &input, &outputs);
            let agent = self
                .agents
                .get_mut(name)
                .ok_or_else(|| Error::MissingAgent(name.clone()))?;

            match agent.execute(agent_input) {
                Ok(response) => {
                    self.hooks.emit_agent_complete(&AgentCompleteEvent {
                        agent: name,
                        response: &response,
                    });
                    outputs.insert(name, response.output.clone());
                    results.insert(name.clone(), response);
                }
                Err(err) => {
                    self.hooks.emit_error(&ErrorEvent {
                        agent: name,
                        error: &err,
                    });
                    return Err(err);
                }
            }
        }

        info!(workflow = %self.name, "workflow finished");
        Ok(results)
    }
}

fn prepare_input(graph: &Graph, node: &str, input: &Value, outputs: &HashMap<&str, Value>) -> Value {
    let mut preds = graph.predecessors(node).peekable();
    if preds.peek().is_none() {
        return input.clone();
    }

    let mut map = Map::new();
    for pred in preds {
        let output = outputs.get(pred).cloned().unwrap_or(Value::Null);
        map.insert(pred.to_string(), output);
    }
    Value::Object(map)
}
