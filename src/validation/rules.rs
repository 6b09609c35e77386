//! Built-in rule sets for the default source catalog.
//!
//! Ranges are plausibility bounds, not business limits. Values that are
//! missing, non-numeric or zero count as invalid for the rate checks.

use chrono::DateTime;
use serde_json::{json, Value};

use super::{RuleOutcome, Severity, ValidationRule};
use crate::sources::{
    CONSTRUCTION_COSTS, LEGAL_MULTIPLIERS, MARKET_INDICES, MORTGAGE_RATES, REGIONAL_PROPERTY_DATA,
};

const MAJOR_STATES: [&str; 10] = ["CA", "TX", "FL", "NY", "PA", "IL", "OH", "GA", "NC", "MI"];
const FRESHNESS_DAYS: f64 = 7.0;
const HIGH_VIX: f64 = 30.0;

pub fn default_rule_sets() -> Vec<(&'static str, Vec<ValidationRule>)> {
    vec![
        (MORTGAGE_RATES, mortgage_rate_rules()),
        (REGIONAL_PROPERTY_DATA, regional_property_rules()),
        (LEGAL_MULTIPLIERS, legal_multiplier_rules()),
        (MARKET_INDICES, market_index_rules()),
        (CONSTRUCTION_COSTS, construction_cost_rules()),
    ]
}

fn num(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64)
}

/// Truthy positive number, like the reference data feeds expect.
fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x != 0.0 && x.is_finite())
}

/// `(key, value)` pairs of an object field; non-numeric values map to `None`.
fn numeric_entries(v: &Value, key: &str) -> Vec<(String, Option<f64>)> {
    v.get(key)
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, x)| (k.clone(), x.as_f64())).collect())
        .unwrap_or_default()
}

pub fn mortgage_rate_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("mortgage-rates-range", "Rate Range Check", Severity::Error, |data, _| {
            let keys = ["conventional30", "conventional15", "fha30", "va30", "jumbo30"];
            let invalid: Vec<&str> = keys
                .iter()
                .copied()
                .filter(|k| !matches!(present(num(data, k)), Some(r) if (1.0..=20.0).contains(&r)))
                .collect();
            Ok(RuleOutcome::check(
                invalid.is_empty(),
                "All rates within valid range",
                format!("{} rates are outside valid range (1-20%)", invalid.len()),
            )
            .with_details(json!({ "invalidRates": invalid }))
            .with_fix("Check data source for anomalies or update validation range"))
        })
        .describe("Mortgage rates should be within reasonable range"),
        ValidationRule::new(
            "mortgage-rates-consistency",
            "Rate Consistency Check",
            Severity::Warning,
            |data, _| {
                let c15 = num(data, "conventional15");
                let c30 = num(data, "conventional30");
                // a missing rate never compares as consistent
                let consistent = matches!((c15, c30), (Some(a), Some(b)) if a <= b);
                Ok(RuleOutcome::check(
                    consistent,
                    "Rate structure is consistent",
                    "15-year rate is higher than 30-year rate",
                )
                .with_details(json!({
                    "conventional15": c15,
                    "conventional30": c30,
                    "difference": c15.zip(c30).map(|(a, b)| a - b)
                }))
                .with_fix("Verify data source accuracy - inverted yield curve may be temporary"))
            },
        )
        .describe("15-year rates should typically be lower than 30-year rates"),
        ValidationRule::new(
            "mortgage-rates-freshness",
            "Data Freshness Check",
            Severity::Warning,
            |data, ctx| {
                let fix = "Update data source or check update schedule";
                let parsed = data
                    .get("lastUpdated")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
                let Some(updated) = parsed else {
                    return Ok(RuleOutcome::fail("Data has no valid lastUpdated timestamp").with_fix(fix));
                };
                let age = ctx.now.signed_duration_since(updated);
                let days = age.num_seconds() as f64 / 86_400.0;
                Ok(RuleOutcome::check(
                    days <= FRESHNESS_DAYS,
                    "Data is fresh",
                    format!("Data is {} days old", days.round()),
                )
                .with_details(json!({ "lastUpdated": updated.to_rfc3339(), "daysSinceUpdate": days }))
                .with_fix(fix))
            },
        )
        .describe("Data should be updated within expected timeframe"),
    ]
}

pub fn regional_property_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("property-tax-range", "Property Tax Range Check", Severity::Error, |data, _| {
            let entries = numeric_entries(data, "propertyTaxRates");
            let invalid: Vec<&str> = entries
                .iter()
                .filter(|(_, r)| !matches!(present(*r), Some(x) if (0.0..=0.05).contains(&x)))
                .map(|(k, _)| k.as_str())
                .collect();
            Ok(RuleOutcome::check(
                invalid.is_empty(),
                "All property tax rates valid",
                format!("{} property tax rates are invalid", invalid.len()),
            )
            .with_details(json!({ "invalidRates": invalid, "totalRates": entries.len() }))
            .with_fix("Review property tax data for outliers"))
        })
        .describe("Property tax rates should be within reasonable range"),
        ValidationRule::new("insurance-rate-range", "Insurance Rate Range Check", Severity::Error, |data, _| {
            let entries = numeric_entries(data, "insuranceRates");
            let invalid: Vec<&str> = entries
                .iter()
                .filter(|(_, r)| !matches!(present(*r), Some(x) if (0.0..=0.02).contains(&x)))
                .map(|(k, _)| k.as_str())
                .collect();
            Ok(RuleOutcome::check(
                invalid.is_empty(),
                "All insurance rates valid",
                format!("{} insurance rates are invalid", invalid.len()),
            )
            .with_details(json!({ "invalidRates": invalid, "totalRates": entries.len() }))
            .with_fix("Review insurance rate data for outliers"))
        })
        .describe("Insurance rates should be within reasonable range"),
        ValidationRule::new("regional-coverage", "Regional Coverage Check", Severity::Warning, |data, _| {
            let available = data
                .get("propertyTaxRates")
                .and_then(Value::as_object)
                .map(|m| m.len())
                .unwrap_or(0);
            let missing: Vec<&str> = MAJOR_STATES
                .iter()
                .copied()
                .filter(|s| data.get("propertyTaxRates").and_then(|m| m.get(*s)).is_none())
                .collect();
            Ok(RuleOutcome::check(
                missing.len() <= 2,
                "Good regional coverage",
                format!("Missing data for {} major states", missing.len()),
            )
            .with_details(json!({ "missingStates": missing, "availableStates": available }))
            .with_fix("Expand data collection to include missing major states"))
        })
        .describe("Should have data for major states"),
    ]
}

pub fn legal_multiplier_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("multiplier-range", "Multiplier Range Check", Severity::Error, |data, _| {
            let mut all = Vec::new();
            if let Some(table) = data.get("personalInjury").and_then(Value::as_object) {
                for j in table.values() {
                    for level in ["minor", "moderate", "severe"] {
                        if let Some(m) = present(num(j, level)) {
                            all.push(m);
                        }
                    }
                }
            }
            let invalid: Vec<f64> = all
                .iter()
                .copied()
                .filter(|m| !(1.0..=15.0).contains(m))
                .collect();
            Ok(RuleOutcome::check(
                invalid.is_empty(),
                "All multipliers within valid range",
                format!("{} multipliers outside valid range", invalid.len()),
            )
            .with_details(json!({ "invalidMultipliers": invalid, "totalMultipliers": all.len() }))
            .with_fix("Review legal multiplier data for extreme values"))
        })
        .describe("Legal multipliers should be within reasonable range"),
        ValidationRule::new(
            "multiplier-progression",
            "Multiplier Progression Check",
            Severity::Warning,
            |data, _| {
                let mut violations = Vec::new();
                if let Some(table) = data.get("personalInjury").and_then(Value::as_object) {
                    for (jurisdiction, m) in table {
                        let (minor, moderate, severe) =
                            (num(m, "minor"), num(m, "moderate"), num(m, "severe"));
                        if let (Some(a), Some(b)) = (minor, moderate) {
                            if a >= b {
                                violations.push(format!("{jurisdiction}: minor >= moderate"));
                            }
                        }
                        if let (Some(b), Some(c)) = (moderate, severe) {
                            if b >= c {
                                violations.push(format!("{jurisdiction}: moderate >= severe"));
                            }
                        }
                    }
                }
                Ok(RuleOutcome::check(
                    violations.is_empty(),
                    "Multiplier progression is logical",
                    format!("{} progression violations found", violations.len()),
                )
                .with_details(json!({ "violations": violations }))
                .with_fix("Review multiplier values to ensure logical progression"))
            },
        )
        .describe("Severe > moderate > minor for every jurisdiction"),
    ]
}

pub fn market_index_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("market-index-range", "Market Index Range Check", Severity::Error, |data, _| {
            let checks = [
                ("S&P 500", "sp500", 1_000.0, 10_000.0),
                ("NASDAQ", "nasdaq", 5_000.0, 25_000.0),
                ("Dow Jones", "dow", 15_000.0, 50_000.0),
                ("VIX", "vix", 5.0, 80.0),
                ("10-Year Treasury", "tenYearTreasury", 0.0, 15.0),
                ("Inflation Rate", "inflationRate", -5.0, 20.0),
            ];
            let failures: Vec<&str> = checks
                .iter()
                .filter(|(_, key, min, max)| {
                    !matches!(num(data, key), Some(v) if v >= *min && v <= *max)
                })
                .map(|(name, ..)| *name)
                .collect();
            Ok(RuleOutcome::check(
                failures.is_empty(),
                "All market indices within valid range",
                format!("{} market indices out of range", failures.len()),
            )
            .with_details(json!({ "failures": failures }))
            .with_fix("Verify market data source for accuracy"))
        })
        .describe("Market indices should be within reasonable range"),
        ValidationRule::new("market-volatility", "Market Volatility Check", Severity::Info, |data, _| {
            let vix = num(data, "vix").unwrap_or(0.0);
            let high = vix > HIGH_VIX;
            // informational only: always valid
            let mut out = RuleOutcome::pass(if high {
                "High market volatility detected"
            } else {
                "Normal market volatility"
            })
            .with_details(json!({ "vix": vix, "threshold": HIGH_VIX }));
            if high {
                out = out.with_fix("Consider noting high volatility in calculations");
            }
            Ok(out)
        })
        .describe("Check for unusual market volatility"),
    ]
}

pub fn construction_cost_rules() -> Vec<ValidationRule> {
    vec![ValidationRule::new(
        "construction-cost-range",
        "Construction Cost Range Check",
        Severity::Error,
        |data, _| {
            // concrete per cubic yard, steel per ton, lumber per thousand board feet
            let ranges = [
                ("concrete", 50.0, 200.0),
                ("steel", 400.0, 1_500.0),
                ("lumber", 300.0, 1_200.0),
            ];
            let mut violations = Vec::new();
            for (material, min, max) in ranges {
                for (region, cost) in numeric_entries(data, material) {
                    // non-numeric entries are not comparable and are skipped
                    if let Some(c) = cost.filter(|c| *c < min || *c > max) {
                        violations.push(format!("{material} in {region}: ${c} (expected {min}-{max})"));
                    }
                }
            }
            Ok(RuleOutcome::check(
                violations.is_empty(),
                "All construction costs within valid range",
                format!("{} cost values out of range", violations.len()),
            )
            .with_details(json!({ "violations": violations }))
            .with_fix("Review construction cost data for outliers"))
        },
    )
    .describe("Construction costs should be within reasonable range")]
}
