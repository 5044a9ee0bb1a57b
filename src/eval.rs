//! Scoring agent runs: automated metrics, human feedback, and custom
//! closures, combined by an [`EvalRunner`].
//!
//! Evaluators read a JSON `input` describing the run:
//!
//! ```json
//! {"success": true, "error": null, "metrics": {"duration": 1200, "tokens": 850}}
//! ```
//!
//! `metrics.duration` is in milliseconds. A serialized
//! [`AgentResponse`](crate::AgentResponse) also works: its `metrics.total_tokens`
//! is read when `metrics.tokens` is absent.

use crate::error::StepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Responses at or under this many milliseconds score 1.
const RESPONSE_TIME_TARGET_MS: f64 = 5000.0;
/// Runs at or under this many tokens score 1.
const TOKEN_TARGET: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Automated,
    Human,
    /// Not scored by the built-in evaluators.
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetric {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: MetricType,
    /// Multiplier under [`Aggregation::Weighted`]; 1 when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EvalMetric {
    pub fn new(name: impl Into<String>, kind: MetricType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            weight: None,
            tags: Vec::new(),
        }
    }

    pub fn automated(name: impl Into<String>) -> Self {
        Self::new(name, MetricType::Automated)
    }

    pub fn human(name: impl Into<String>) -> Self {
        Self::new(name, MetricType::Human)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Scores are reported as measured; the overall score is their mean.
    #[default]
    Mean,
    /// Each score is multiplied by its metric's weight; the overall score is
    /// the weighted mean.
    Weighted,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    pub metrics: Vec<EvalMetric>,
    /// Pass mark for the overall score. Defaults to 0.7.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub aggregation: Aggregation,
}

fn default_threshold() -> f64 {
    0.7
}

impl EvalConfig {
    pub fn new(metrics: Vec<EvalMetric>) -> Self {
        Self {
            metrics,
            threshold: default_threshold(),
            aggregation: Aggregation::default(),
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    fn weight_of(&self, metric: &str) -> f64 {
        self.metrics
            .iter()
            .find(|m| m.name == metric)
            .and_then(|m| m.weight)
            .unwrap_or(1.0)
    }

    fn of_kind(&self, kind: MetricType) -> Vec<EvalMetric> {
        self.metrics.iter().filter(|m| m.kind == kind).cloned().collect()
    }
}

/// One metric's score for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub metric_name: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    /// Who scored it, for human feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,
}

impl EvalResult {
    pub fn new(metric_name: impl Into<String>, score: f64, metadata: Value) -> Self {
        Self {
            metric_name: metric_name.into(),
            score,
            metadata,
            timestamp: Utc::now(),
            evaluator: None,
        }
    }
}

/// Produces zero or more scores for a run. `expected` carries whatever the
/// evaluator compares against; human feedback travels in it too.
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, input: &Value, expected: Option<&Value>) -> Result<Vec<EvalResult>, StepError>;
}

// ---------------------------------------------------------------------------
// Built-in evaluators
// ---------------------------------------------------------------------------

/// Scores the automated metrics it knows: `responseTime`, `tokenUsage` and
/// `errorRate`. Unknown automated metrics are logged and skipped.
pub struct AutomatedEvaluator {
    metrics: Vec<EvalMetric>,
}

impl AutomatedEvaluator {
    pub fn new(config: &EvalConfig) -> Self {
        Self {
            metrics: config.of_kind(MetricType::Automated),
        }
    }

    fn score(metric: &str, input: &Value) -> Result<EvalResult, StepError> {
        let metrics = &input["metrics"];
        match metric {
            "responseTime" => {
                let duration = metrics["duration"].as_f64().unwrap_or(0.0);
                let score = (RESPONSE_TIME_TARGET_MS / duration).min(1.0);
                Ok(EvalResult::new(metric, score, json!({"duration": duration})))
            }
            "tokenUsage" => {
                let tokens = metrics["tokens"]
                    .as_f64()
                    .or_else(|| metrics["total_tokens"].as_f64())
                    .unwrap_or(0.0);
                let score = (TOKEN_TARGET / tokens).min(1.0);
                Ok(EvalResult::new(metric, score, json!({"tokens": tokens})))
            }
            "errorRate" => {
                let score = if input["success"] == Value::Bool(true) { 1.0 } else { 0.0 };
                Ok(EvalResult::new(metric, score, json!({"error": input["error"]})))
            }
            other => Err(StepError::invalid(format!("Unknown metric: {other}"))),
        }
    }
}

impl Evaluator for AutomatedEvaluator {
    fn name(&self) -> &str {
        "automated"
    }

    fn evaluate(&self, input: &Value, _expected: Option<&Value>) -> Result<Vec<EvalResult>, StepError> {
        let mut results = Vec::new();
        for metric in &self.metrics {
            match Self::score(&metric.name, input) {
                Ok(result) => results.push(result),
                Err(err) => warn!(metric = %metric.name, error = %err, "metric failed"),
            }
        }
        Ok(results)
    }
}

/// Reads human metric scores from a feedback object passed as `expected`:
/// `{"evaluator": "ada", "clarity": 0.8, "clarity_feedback": "too long"}`.
/// A missing or non-numeric score counts as 0.
pub struct HumanEvaluator {
    metrics: Vec<EvalMetric>,
}

impl HumanEvaluator {
    pub fn new(config: &EvalConfig) -> Self {
        Self {
            metrics: config.of_kind(MetricType::Human),
        }
    }
}

impl Evaluator for HumanEvaluator {
    fn name(&self) -> &str {
        "human"
    }

    fn evaluate(&self, _input: &Value, expected: Option<&Value>) -> Result<Vec<EvalResult>, StepError> {
        if self.metrics.is_empty() {
            return Ok(Vec::new());
        }
        let feedback = expected
            .filter(|f| f.is_object())
            .ok_or_else(|| StepError::invalid("human metrics need a feedback object"))?;
        let evaluator = feedback["evaluator"].as_str().map(str::to_string);

        Ok(self
            .metrics
            .iter()
            .map(|metric| {
                let score = feedback[&metric.name].as_f64().unwrap_or(0.0);
                let note = &feedback[format!("{}_feedback", metric.name).as_str()];
                EvalResult {
                    evaluator: evaluator.clone(),
                    ..EvalResult::new(&metric.name, score, json!({"feedback": note}))
                }
            })
            .collect())
    }
}

type MetricFn = Box<dyn Fn(&Value, Option<&Value>) -> Result<f64, StepError> + Send + Sync>;

/// Scores metrics registered as closures, in registration order. A closure
/// that fails is logged and skipped.
#[derive(Default)]
pub struct CustomEvaluator {
    metrics: Vec<(String, MetricFn)>,
}

impl CustomEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a name again replaces the earlier closure.
    pub fn register_metric(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, Option<&Value>) -> Result<f64, StepError> + Send + Sync + 'static,
    ) {
        let name = name.into();
        match self.metrics.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = Box::new(f),
            None => self.metrics.push((name, Box::new(f))),
        }
    }
}

impl Evaluator for CustomEvaluator {
    fn name(&self) -> &str {
        "custom"
    }

    fn evaluate(&self, input: &Value, expected: Option<&Value>) -> Result<Vec<EvalResult>, StepError> {
        let mut results = Vec::new();
        for (name, f) in &self.metrics {
            match f(input, expected) {
                Ok(score) => results.push(EvalResult::new(
                    name,
                    score,
                    json!({"input": input, "expected": expected}),
                )),
                Err(err) => warn!(metric = %name, error = %err, "custom metric failed"),
            }
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Outcome of [`EvalRunner::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    /// Scores after aggregation; weighted runs hold `score * weight`.
    pub results: Vec<EvalResult>,
    /// `None` when nothing was scored.
    pub overall: Option<f64>,
    /// `overall >= threshold`.
    pub passed: bool,
}

/// Runs the automated, human and custom evaluators (plus any added with
/// [`evaluator`](Self::evaluator)) and aggregates their scores. An evaluator
/// that fails is logged and left out.
pub struct EvalRunner {
    config: EvalConfig,
    automated: AutomatedEvaluator,
    human: HumanEvaluator,
    custom: CustomEvaluator,
    extra: Vec<Box<dyn Evaluator>>,
}

impl EvalRunner {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            automated: AutomatedEvaluator::new(&config),
            human: HumanEvaluator::new(&config),
            custom: CustomEvaluator::new(),
            extra: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// See [`CustomEvaluator::register_metric`].
    pub fn register_metric(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, Option<&Value>) -> Result<f64, StepError> + Send + Sync + 'static,
    ) -> Self {
        self.custom.register_metric(name, f);
        self
    }

    /// Adds an evaluator that runs after the built-in ones.
    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.extra.push(Box::new(evaluator));
        self
    }

    pub fn run(&self, input: &Value, expected: Option<&Value>) -> EvalReport {
        let start = Instant::now();
        let built_in: [&dyn Evaluator; 3] = [&self.automated, &self.human, &self.custom];
        let evaluators = built_in.into_iter().chain(self.extra.iter().map(|e| e.as_ref()));

        let mut raw = Vec::new();
        for evaluator in evaluators {
            match evaluator.evaluate(input, expected) {
                Ok(results) => {
                    debug!(evaluator = evaluator.name(), scored = results.len(), "evaluator done");
                    raw.extend(results);
                }
                Err(err) => warn!(evaluator = evaluator.name(), error = %err, "evaluator failed"),
            }
        }

        let report = self.aggregate(raw);
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            total_metrics = report.results.len(),
            overall = ?report.overall,
            passed = report.passed,
            "evaluation completed"
        );
        report
    }

    fn aggregate(&self, mut results: Vec<EvalResult>) -> EvalReport {
        let overall = match (results.is_empty(), self.config.aggregation) {
            (true, _) => None,
            (false, Aggregation::Mean) => {
                Some(results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64)
            }
            (false, Aggregation::Weighted) => {
                let weights: f64 = results.iter().map(|r| self.config.weight_of(&r.metric_name)).sum();
                for result in &mut results {
                    result.score *= self.config.weight_of(&result.metric_name);
                }
                let total: f64 = results.iter().map(|r| r.score).sum();
                Some(if weights == 0.0 { 0.0 } else { total / weights })
            }
            (false, Aggregation::Min) => results.iter().map(|r| r.score).reduce(f64::min),
            (false, Aggregation::Max) => results.iter().map(|r| r.score).reduce(f64::max),
        };
        EvalReport {
            passed: overall.is_some_and(|o| o >= self.config.threshold),
            results,
            overall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn scores(report: &EvalReport) -> Vec<(&str, f64)> {
        report
            .results
            .iter()
            .map(|r| (r.metric_name.as_str(), r.score))
            .collect()
    }

    fn automated(names: &[&str]) -> EvalConfig {
        EvalConfig::new(names.iter().map(|n| EvalMetric::automated(*n)).collect())
    }

    struct Broken;

    impl Evaluator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn evaluate(&self, _input: &Value, _expected: Option<&Value>) -> Result<Vec<EvalResult>, StepError> {
            Err(StepError::other("judge unavailable"))
        }
    }

    // --- AutomatedEvaluator ---

    #[test]
    fn response_time_is_capped_ratio_of_five_seconds() {
        let eval = AutomatedEvaluator::new(&automated(&["responseTime"]));

        let slow = eval.evaluate(&json!({"metrics": {"duration": 10_000}}), None).unwrap();
        assert_eq!(slow[0].score, 0.5);
        assert_eq!(slow[0].metadata, json!({"duration": 10_000.0}));

        let fast = eval.evaluate(&json!({"metrics": {"duration": 1200}}), None).unwrap();
        assert_eq!(fast[0].score, 1.0);

        let unmeasured = eval.evaluate(&json!({}), None).unwrap();
        assert_eq!(unmeasured[0].score, 1.0);
    }

    #[test]
    fn token_usage_is_capped_ratio_of_two_thousand() {
        let eval = AutomatedEvaluator::new(&automated(&["tokenUsage"]));

        let heavy = eval.evaluate(&json!({"metrics": {"tokens": 8000}}), None).unwrap();
        assert_eq!(heavy[0].score, 0.25);

        let light = eval.evaluate(&json!({"metrics": {"tokens": 500}}), None).unwrap();
        assert_eq!(light[0].score, 1.0);

        let from_response = eval
            .evaluate(&json!({"metrics": {"total_tokens": 4000, "duration": 3}}), None)
            .unwrap();
        assert_eq!(from_response[0].score, 0.5);
    }

    #[test]
    fn error_rate_needs_explicit_success() {
        let eval = AutomatedEvaluator::new(&automated(&["errorRate"]));

        let ok = eval.evaluate(&json!({"success": true}), None).unwrap();
        assert_eq!(ok[0].score, 1.0);

        let failed = eval
            .evaluate(&json!({"success": false, "error": "timeout"}), None)
            .unwrap();
        assert_eq!(failed[0].score, 0.0);
        assert_eq!(failed[0].metadata, json!({"error": "timeout"}));

        let missing = eval.evaluate(&json!({"success": "yes"}), None).unwrap();
        assert_eq!(missing[0].score, 0.0);
    }

    #[test]
    fn unknown_and_non_automated_metrics_are_skipped() {
        let config = EvalConfig::new(vec![
            EvalMetric::automated("bleu"),
            EvalMetric::human("clarity"),
            EvalMetric::automated("errorRate"),
        ]);
        let results = AutomatedEvaluator::new(&config)
            .evaluate(&json!({"success": true}), None)
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metric_name, "errorRate");
    }

    // --- HumanEvaluator ---

    #[test]
    fn human_scores_come_from_feedback() {
        let config = EvalConfig::new(vec![EvalMetric::human("clarity"), EvalMetric::human("tone")]);
        let feedback = json!({"evaluator": "ada", "clarity": 0.8, "clarity_feedback": "a bit long"});

        let results = HumanEvaluator::new(&config)
            .evaluate(&Value::Null, Some(&feedback))
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, 0.8);
        assert_eq!(results[0].metadata, json!({"feedback": "a bit long"}));
        assert_eq!(results[0].evaluator.as_deref(), Some("ada"));
        assert_eq!(results[1].metric_name, "tone");
        assert_eq!(results[1].score, 0.0);
    }

    #[test]
    fn human_metrics_without_feedback_fail() {
        let config = EvalConfig::new(vec![EvalMetric::human("clarity")]);
        let err = HumanEvaluator::new(&config).evaluate(&Value::Null, None).unwrap_err();
        assert!(err.to_string().contains("feedback"));

        let none_configured = HumanEvaluator::new(&automated(&["errorRate"]));
        assert!(none_configured.evaluate(&Value::Null, None).unwrap().is_empty());
    }

    // --- CustomEvaluator ---

    #[test]
    fn custom_metrics_run_in_order_and_skip_failures() {
        let mut eval = CustomEvaluator::new();
        eval.register_metric("exact", |input, expected| {
            Ok(if Some(&input["answer"]) == expected { 1.0 } else { 0.0 })
        });
        eval.register_metric("flaky", |_, _| Err(StepError::other("model timeout")));
        eval.register_metric("length", |input, _| {
            Ok(input["answer"].as_str().map_or(0.0, |a| a.len() as f64 / 10.0))
        });

        let results = eval
            .evaluate(&json!({"answer": "four"}), Some(&json!("four")))
            .unwrap();

        let names: Vec<&str> = results.iter().map(|r| r.metric_name.as_str()).collect();
        assert_eq!(names, vec!["exact", "length"]);
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].score, 0.4);
        assert_eq!(results[0].metadata["expected"], json!("four"));
    }

    #[test]
    fn registering_a_metric_again_replaces_it() {
        let mut eval = CustomEvaluator::new();
        eval.register_metric("m", |_, _| Ok(0.1));
        eval.register_metric("m", |_, _| Ok(0.9));

        let results = eval.evaluate(&Value::Null, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 0.9);
    }

    // --- EvalRunner ---

    #[test]
    fn runner_collects_every_evaluator_and_averages() {
        let config = EvalConfig::new(vec![
            EvalMetric::automated("responseTime"),
            EvalMetric::automated("errorRate"),
            EvalMetric::human("clarity"),
        ]);
        let runner = EvalRunner::new(config).register_metric("relevance", |_, _| Ok(0.5));

        let input = json!({"success": true, "metrics": {"duration": 10_000}});
        let feedback = json!({"evaluator": "ada", "clarity": 1.0});
        let report = runner.run(&input, Some(&feedback));

        assert_eq!(
            scores(&report),
            vec![("responseTime", 0.5), ("errorRate", 1.0), ("clarity", 1.0), ("relevance", 0.5)]
        );
        assert_eq!(report.overall, Some(0.75));
        assert!(report.passed);
    }

    #[test]
    fn weighted_aggregation_scales_by_metric_weight() {
        let config = EvalConfig::new(vec![
            EvalMetric::automated("responseTime").weight(2.0),
            EvalMetric::automated("errorRate").weight(0.5),
        ])
        .aggregation(Aggregation::Weighted)
        .threshold(0.9);
        let runner = EvalRunner::new(config).register_metric("unweighted", |_, _| Ok(0.25));

        let report = runner.run(&json!({"success": false, "metrics": {"duration": 10_000}}), None);

        assert_eq!(
            scores(&report),
            vec![("responseTime", 1.0), ("errorRate", 0.0), ("unweighted", 0.25)]
        );
        // (0.5 * 2 + 0 * 0.5 + 0.25 * 1) / 3.5
        let overall = report.overall.unwrap();
        assert!((overall - 1.25 / 3.5).abs() < 1e-12);
        assert!(!report.passed);
    }

    #[test]
    fn min_and_max_pick_the_extremes() {
        let input = json!({"success": true, "metrics": {"tokens": 8000}});
        let metrics = automated(&["tokenUsage", "errorRate"]);

        let min = EvalRunner::new(metrics.clone().aggregation(Aggregation::Min)).run(&input, None);
        assert_eq!(min.overall, Some(0.25));
        assert!(!min.passed);

        let max = EvalRunner::new(metrics.aggregation(Aggregation::Max)).run(&input, None);
        assert_eq!(max.overall, Some(1.0));
        assert!(max.passed);
    }

    #[test]
    fn failing_evaluator_is_skipped() {
        let config = EvalConfig::new(vec![EvalMetric::automated("errorRate"), EvalMetric::human("clarity")]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let runner = EvalRunner::new(config).evaluator(Broken).register_metric("echo", move |input, _| {
            log.lock().unwrap().push(input.clone());
            Ok(1.0)
        });

        // No feedback: the human evaluator fails, and so does `Broken`.
        let report = runner.run(&json!({"success": true}), None);

        assert_eq!(scores(&report), vec![("errorRate", 1.0), ("echo", 1.0)]);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(report.overall, Some(1.0));
    }

    #[test]
    fn nothing_scored_never_passes() {
        let report = EvalRunner::new(EvalConfig::new(Vec::new()).threshold(0.0)).run(&Value::Null, None);
        assert!(report.results.is_empty());
        assert_eq!(report.overall, None);
        assert!(!report.passed);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: EvalConfig = serde_json::from_value(json!({
            "metrics": [
                {"name": "responseTime", "type": "automated", "weight": 2},
                {"name": "clarity", "description": "Is it clear?", "type": "human"}
            ],
            "aggregation": "weighted"
        }))
        .unwrap();

        assert_eq!(config.threshold, 0.7);
        assert_eq!(config.aggregation, Aggregation::Weighted);
        assert_eq!(config.metrics[0].weight, Some(2.0));
        assert_eq!(config.metrics[1].kind, MetricType::Human);
        assert_eq!(config.weight_of("clarity"), 1.0);
        assert_eq!(config.weight_of("unlisted"), 1.0);
    }
}
