use crate::agent::{AgentResponse, AgentStep};
use crate::error::Error;
use tracing::{error, info};

/// Passed to `on_step` callbacks after a step record is appended.
pub struct StepEvent<'a> {
    pub agent: &'a str,
    pub step: &'a AgentStep,
    /// 1-based position of the step within the current run.
    pub step_number: usize,
}

/// Passed to `on_error` callbacks when a run fails.
pub struct ErrorEvent<'a> {
    pub agent: &'a str,
    pub error: &'a Error,
}

/// Passed to `on_agent_complete` callbacks after each workflow node succeeds.
pub struct AgentCompleteEvent<'a> {
    pub agent: &'a str,
    pub response: &'a AgentResponse,
}

type StepHook = Box<dyn FnMut(&StepEvent) + Send>;
type ErrorHook = Box<dyn FnMut(&ErrorEvent) + Send>;
type CompleteHook = Box<dyn FnMut(&AgentCompleteEvent) + Send>;

/// Subscribers for run notifications. Callbacks run synchronously, in
/// registration order, on the thread doing the work.
#[derive(Default)]
pub struct Hooks {
    on_step: Vec<StepHook>,
    on_error: Vec<ErrorHook>,
    on_agent_complete: Vec<CompleteHook>,
}

impl Hooks {
    pub fn on_step(&mut self, cb: impl FnMut(&StepEvent) + Send + 'static) {
        self.on_step.push(Box::new(cb));
    }

    pub fn on_error(&mut self, cb: impl FnMut(&ErrorEvent) + Send + 'static) {
        self.on_error.push(Box::new(cb));
    }

    pub fn on_agent_complete(&mut self, cb: impl FnMut(&AgentCompleteEvent) + Send + 'static) {
        self.on_agent_complete.push(Box::new(cb));
    }

    /// Log every notification through `tracing`.
    pub fn install_tracing(&mut self) {
        self.on_step(|e| {
            info!(
                agent = e.agent,
                step = e.step_number,
                name = %e.step.name,
                kind = ?e.step.kind,
                duration_ms = e.step.duration.as_millis() as u64,
                failed = e.step.error.is_some(),
                "step"
            );
        });
        self.on_error(|e| {
            error!(agent = e.agent, error = %e.error, "run failed");
        });
        self.on_agent_complete(|e| {
            info!(
                agent = e.agent,
                steps = e.response.steps.len(),
                duration_ms = e.response.metrics.duration.as_millis() as u64,
                "agent complete"
            );
        });
    }

    pub(crate) fn emit_step(&mut self, event: &StepEvent) {
        for cb in &mut self.on_step {
            cb(event);
        }
    }

    pub(crate) fn emit_error(&mut self, event: &ErrorEvent) {
        for cb in &mut self.on_error {
            cb(event);
        }
    }

    pub(crate) fn emit_agent_complete(&mut self, event: &AgentCompleteEvent) {
        for cb in &mut self.on_agent_complete {
            cb(event);
        }
    }
}
