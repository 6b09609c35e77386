// src/service/fallback.rs
//! Compiled-in last-known-good payloads, served only when live fetch and
//! cache are both unavailable.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::sources::{
    CONSTRUCTION_COSTS, LEGAL_MULTIPLIERS, MARKET_INDICES, MORTGAGE_RATES, REGIONAL_PROPERTY_DATA,
};

#[derive(Debug, Clone, Default)]
pub struct FallbackCatalog {
    payloads: HashMap<String, Value>,
}

impl FallbackCatalog {
    /// Empty catalog: every source without cache ends in `NoDataAvailable`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, source_id: &str, payload: Value) -> Self {
        self.payloads.insert(source_id.to_string(), payload);
        self
    }

    pub fn get(&self, source_id: &str) -> Option<&Value> {
        self.payloads.get(source_id)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.payloads.contains_key(source_id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.payloads.keys().map(String::as_str)
    }

    /// Built-in seed covering the default source catalog.
    pub fn builtin() -> Self {
        let mut payloads = HashMap::new();

        payloads.insert(
            MORTGAGE_RATES.to_string(),
            json!({
                "conventional30": 7.25,
                "conventional15": 6.75,
                "fha30": 6.95,
                "va30": 6.85,
                "jumbo30": 7.45,
                "arm5_1": 6.55,
                "lastUpdated": "2025-01-02T00:00:00Z",
                "source": "fallback"
            }),
        );

        let mut tax = serde_json::Map::new();
        let mut ins = serde_json::Map::new();
        for (state, t, i) in [
            ("CA", 0.0075, 0.0035),
            ("TX", 0.0180, 0.0060),
            ("FL", 0.0098, 0.0090),
            ("NY", 0.0172, 0.0040),
            ("PA", 0.0158, 0.0030),
            ("IL", 0.0227, 0.0038),
            ("OH", 0.0156, 0.0032),
            ("GA", 0.0092, 0.0045),
            ("NC", 0.0084, 0.0041),
            ("MI", 0.0154, 0.0042),
            ("NJ", 0.0249, 0.0036),
            ("default", 0.0110, 0.0040),
        ] {
            tax.insert(state.to_string(), json!(t));
            ins.insert(state.to_string(), json!(i));
        }
        payloads.insert(
            REGIONAL_PROPERTY_DATA.to_string(),
            json!({
                "propertyTaxRates": tax,
                "insuranceRates": ins,
                "lastUpdated": "2025-01-01T00:00:00Z"
            }),
        );

        payloads.insert(
            LEGAL_MULTIPLIERS.to_string(),
            json!({
                "personalInjury": {
                    "CA": { "minor": 1.5, "moderate": 3.0, "severe": 5.0 },
                    "NY": { "minor": 1.5, "moderate": 3.5, "severe": 5.5 },
                    "TX": { "minor": 1.25, "moderate": 2.5, "severe": 4.0 },
                    "FL": { "minor": 1.5, "moderate": 3.0, "severe": 4.5 },
                    "default": { "minor": 1.5, "moderate": 3.0, "severe": 5.0 }
                },
                "lastUpdated": "2025-01-01T00:00:00Z"
            }),
        );

        payloads.insert(
            MARKET_INDICES.to_string(),
            json!({
                "sp500": 5800.0,
                "nasdaq": 18500.0,
                "dow": 42500.0,
                "vix": 16.5,
                "tenYearTreasury": 4.35,
                "inflationRate": 3.1,
                "lastUpdated": "2025-01-02T00:00:00Z"
            }),
        );

        payloads.insert(
            CONSTRUCTION_COSTS.to_string(),
            json!({
                "concrete": { "northeast": 145.0, "south": 120.0, "midwest": 125.0, "west": 150.0 },
                "steel": { "northeast": 980.0, "south": 900.0, "midwest": 920.0, "west": 1010.0 },
                "lumber": { "northeast": 620.0, "south": 540.0, "midwest": 560.0, "west": 650.0 },
                "lastUpdated": "2025-01-01T00:00:00Z"
            }),
        );

        Self { payloads }
    }
}
