// src/service/typed.rs
//! Typed projections of `get_data` for the sources calculators use most.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DataService;
use crate::error::{DataError, DataResult};
use crate::sources::{LEGAL_MULTIPLIERS, MARKET_INDICES, MORTGAGE_RATES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MortgageRates {
    pub conventional30: f64,
    pub conventional15: f64,
    pub fha30: f64,
    pub va30: f64,
    pub jumbo30: f64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegalMultipliers {
    pub minor: f64,
    pub moderate: f64,
    pub severe: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub sp500: f64,
    pub nasdaq: f64,
    pub dow: f64,
    pub vix: f64,
    pub ten_year_treasury: f64,
    pub inflation_rate: f64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

fn project<T: for<'de> Deserialize<'de>>(source_id: &str, v: Value) -> DataResult<T> {
    serde_json::from_value(v).map_err(|e| DataError::malformed(source_id, e))
}

impl DataService {
    pub async fn get_mortgage_rates(&self) -> DataResult<MortgageRates> {
        let v = self.get_data(MORTGAGE_RATES, false).await?;
        project(MORTGAGE_RATES, v)
    }

    /// Personal-injury multipliers for `jurisdiction`, or the `default` entry.
    pub async fn get_legal_multipliers(&self, jurisdiction: &str) -> DataResult<LegalMultipliers> {
        let v = self.get_data(LEGAL_MULTIPLIERS, false).await?;
        legal_for(&v, jurisdiction)
    }

    pub async fn get_market_data(&self) -> DataResult<MarketData> {
        let v = self.get_data(MARKET_INDICES, false).await?;
        project(MARKET_INDICES, v)
    }
}

fn legal_for(payload: &Value, jurisdiction: &str) -> DataResult<LegalMultipliers> {
    let table = payload
        .get("personalInjury")
        .ok_or_else(|| DataError::malformed(LEGAL_MULTIPLIERS, "missing `personalInjury`"))?;
    let entry = table
        .get(jurisdiction)
        .or_else(|| table.get("default"))
        .ok_or_else(|| {
            DataError::malformed(
                LEGAL_MULTIPLIERS,
                format!("no entry for `{jurisdiction}` and no `default`"),
            )
        })?;
    project(LEGAL_MULTIPLIERS, entry.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legal_multipliers_use_default_for_unknown_jurisdiction() {
        let p = json!({ "personalInjury": {
            "CA": { "minor": 1.5, "moderate": 3.0, "severe": 5.0 },
            "default": { "minor": 1.2, "moderate": 2.0, "severe": 4.0 }
        }});
        assert_eq!(legal_for(&p, "CA").unwrap().severe, 5.0);
        assert_eq!(legal_for(&p, "WY").unwrap().minor, 1.2);
    }

    #[test]
    fn malformed_payload_is_reported() {
        let p = json!({ "other": {} });
        let err = legal_for(&p, "CA").unwrap_err();
        assert!(matches!(err, DataError::MalformedPayload { .. }));
    }
}
