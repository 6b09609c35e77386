//! Declarative data-quality checks.
//!
//! Rules are registered per source id and evaluated one after another with no
//! I/O and no shared state. Given the same payload, context and rule set the
//! report is identical. A rule that returns `Err` or panics is recorded as a
//! failed `error`-severity result; the remaining rules still run.

pub mod rules;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub is_valid: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

impl RuleOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn check(ok: bool, pass_msg: impl Into<String>, fail_msg: impl Into<String>) -> Self {
        if ok {
            Self::pass(pass_msg)
        } else {
            Self::fail(fail_msg)
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// Everything a rule may look at besides the payload. Supplying a fixed `now`
/// makes time-dependent rules (freshness) deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    pub now: DateTime<Utc>,
    pub extra: Option<Value>,
}

impl ValidationContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, extra: None }
    }
}

pub type RuleCheck =
    Arc<dyn Fn(&Value, &ValidationContext) -> anyhow::Result<RuleOutcome> + Send + Sync>;

#[derive(Clone)]
pub struct ValidationRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    check: RuleCheck,
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

impl ValidationRule {
    pub fn new<F>(id: &str, name: &str, severity: Severity, check: F) -> Self
    where
        F: Fn(&Value, &ValidationContext) -> anyhow::Result<RuleOutcome> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            severity,
            check: Arc::new(check),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn evaluate(&self, payload: &Value, ctx: &ValidationContext) -> anyhow::Result<RuleOutcome> {
        (self.check)(payload, ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub rule_name: String,
    /// Effective severity; a rule that blew up is always reported as `error`.
    pub severity: Severity,
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    /// 0..=100; 100 when no rules are registered.
    pub overall_score: u32,
    pub total_rules: usize,
    pub passed_rules: usize,
    pub failed_rules: usize,
    pub warnings: usize,
    pub errors: usize,
    pub results: Vec<RuleResult>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualitySummary {
    pub average_score: u32,
    pub total_sources: usize,
    pub sources_with_errors: usize,
    pub sources_with_warnings: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub worst_performing_source: Option<String>,
    pub best_performing_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfigExport {
    pub config: BTreeMap<String, Vec<RuleDescriptor>>,
    pub export_timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ValidationEngine {
    rules: RwLock<HashMap<String, Vec<ValidationRule>>>,
}

impl ValidationEngine {
    /// Engine with no rules; every report scores 100.
    pub fn new() -> Self {
        crate::metrics::ensure_metrics_described();
        Self::default()
    }

    /// Engine preloaded with the built-in rule sets for the default catalog.
    pub fn with_default_rules() -> Self {
        let engine = Self::new();
        for (source_id, set) in rules::default_rule_sets() {
            engine.add_rules(source_id, set);
        }
        engine
    }

    pub fn add_rules(&self, source_id: &str, rules: Vec<ValidationRule>) {
        let mut g = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        g.entry(source_id.to_string()).or_default().extend(rules);
    }

    pub fn add_rule(&self, source_id: &str, rule: ValidationRule) {
        self.add_rules(source_id, vec![rule]);
    }

    pub fn rules_for(&self, source_id: &str) -> Vec<ValidationRule> {
        let g = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        g.get(source_id).cloned().unwrap_or_default()
    }

    /// Returns true if a rule was removed.
    pub fn remove_rule(&self, source_id: &str, rule_id: &str) -> bool {
        let mut g = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = g.get_mut(source_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != rule_id);
        list.len() < before
    }

    pub fn validate(&self, source_id: &str, payload: &Value) -> QualityReport {
        self.validate_with_context(source_id, payload, &ValidationContext::at(Utc::now()))
    }

    pub fn validate_with_context(
        &self,
        source_id: &str,
        payload: &Value,
        ctx: &ValidationContext,
    ) -> QualityReport {
        // evaluate outside the lock so a panicking rule cannot poison it
        let rules = self.rules_for(source_id);

        let mut results = Vec::with_capacity(rules.len());
        let (mut passed, mut failed, mut warnings, mut errors) = (0usize, 0usize, 0usize, 0usize);

        for rule in &rules {
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.evaluate(payload, ctx)));
            let (severity, outcome) = match outcome {
                Ok(Ok(o)) => (rule.severity, o),
                Ok(Err(e)) => {
                    tracing::warn!(target: "validation", rule = %rule.id, source = source_id, error = %e, "rule failed");
                    (Severity::Error, rule_failure(&e.to_string()))
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    tracing::warn!(target: "validation", rule = %rule.id, source = source_id, %msg, "rule panicked");
                    (Severity::Error, rule_failure(&msg))
                }
            };

            if outcome.is_valid {
                passed += 1;
            } else {
                failed += 1;
                match severity {
                    Severity::Error => errors += 1,
                    Severity::Warning => warnings += 1,
                    Severity::Info => {}
                }
            }

            results.push(RuleResult {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                severity,
                outcome,
            });
        }

        let total = rules.len();
        let overall_score = score(passed, total);
        let recommendations = recommendations(&results, errors, warnings);

        counter!("validation_runs_total").increment(1);
        tracing::debug!(target: "validation", source = source_id, score = overall_score, errors, warnings, "quality report");

        QualityReport {
            source_id: source_id.to_string(),
            timestamp: ctx.now,
            overall_score,
            total_rules: total,
            passed_rules: passed,
            failed_rules: failed,
            warnings,
            errors,
            results,
            recommendations,
        }
    }

    /// Aggregate view across several reports.
    pub fn quality_summary(reports: &[QualityReport]) -> QualitySummary {
        if reports.is_empty() {
            return QualitySummary::default();
        }
        let n = reports.len();
        let sum: u32 = reports.iter().map(|r| r.overall_score).sum();
        let average_score = (f64::from(sum) / n as f64).round() as u32;

        // stable sort keeps the first of equal scores as worst, the last as best
        let mut sorted: Vec<&QualityReport> = reports.iter().collect();
        sorted.sort_by_key(|r| r.overall_score);

        QualitySummary {
            average_score,
            total_sources: n,
            sources_with_errors: reports.iter().filter(|r| r.errors > 0).count(),
            sources_with_warnings: reports.iter().filter(|r| r.warnings > 0).count(),
            total_errors: reports.iter().map(|r| r.errors).sum(),
            total_warnings: reports.iter().map(|r| r.warnings).sum(),
            worst_performing_source: sorted.first().map(|r| r.source_id.clone()),
            best_performing_source: sorted.last().map(|r| r.source_id.clone()),
        }
    }

    /// Rule metadata for every source; the checks themselves are not serializable.
    pub fn export_config(&self) -> ValidationConfigExport {
        let g = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let config = g
            .iter()
            .map(|(source, rules)| {
                let descs = rules
                    .iter()
                    .map(|r| RuleDescriptor {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        description: r.description.clone(),
                        severity: r.severity,
                    })
                    .collect();
                (source.clone(), descs)
            })
            .collect();
        ValidationConfigExport {
            config,
            export_timestamp: Utc::now(),
        }
    }
}

fn score(passed: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((passed as f64 / total as f64) * 100.0).round() as u32
}

fn rule_failure(msg: &str) -> RuleOutcome {
    RuleOutcome::fail(format!("Validation rule failed: {msg}"))
        .with_fix("Check validation rule implementation")
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn recommendations(results: &[RuleResult], errors: usize, warnings: usize) -> Vec<String> {
    let mut out = Vec::new();
    if errors > 0 {
        out.push(format!(
            "Address {errors} critical data quality error(s) immediately"
        ));
    }
    if warnings > 0 {
        out.push(format!(
            "Review {warnings} data quality warning(s) for potential improvements"
        ));
    }
    if errors == 0 && warnings == 0 {
        out.push("Data quality is excellent - no issues detected".to_string());
    }
    for r in results.iter().filter(|r| !r.outcome.is_valid) {
        if let Some(fix) = &r.outcome.suggested_fix {
            if !out.contains(fix) {
                out.push(fix.clone());
            }
        }
    }
    out
}
