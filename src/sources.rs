//! Data source catalog: ids, origins and refresh cadences.
//!
//! The built-in catalog mirrors the reference data the calculators consume.
//! Descriptors are created once at startup; afterwards only `last_updated`
//! (scheduler) and `active` (operators) change.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const MORTGAGE_RATES: &str = "mortgage-rates";
pub const REGIONAL_PROPERTY_DATA: &str = "regional-property-data";
pub const LEGAL_MULTIPLIERS: &str = "legal-multipliers";
pub const MARKET_INDICES: &str = "market-indices";
pub const CONSTRUCTION_COSTS: &str = "construction-costs";

/// How often a source is expected to change. Doubles as the cache freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshCadence {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl RefreshCadence {
    pub fn window_hours(self) -> i64 {
        match self {
            RefreshCadence::Daily => 24,
            RefreshCadence::Weekly => 168,
            RefreshCadence::Monthly => 720,
            RefreshCadence::Quarterly => 2160,
        }
    }

    pub fn window(self) -> Duration {
        Duration::hours(self.window_hours())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSourceDescriptor {
    pub id: String,
    pub name: String,
    /// Absolute URL or a path relative to the configured base URL.
    pub origin: String,
    pub cadence: RefreshCadence,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl DataSourceDescriptor {
    pub fn new(id: &str, name: &str, origin: &str, cadence: RefreshCadence) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            origin: origin.to_string(),
            cadence,
            active: true,
            last_updated: None,
        }
    }

    /// When a payload fetched at `fetched_at` stops being fresh.
    pub fn expiry_for(&self, fetched_at: DateTime<Utc>) -> DateTime<Utc> {
        fetched_at + self.cadence.window()
    }
}

/// Built-in catalog used when no source list is configured.
pub fn default_catalog() -> Vec<DataSourceDescriptor> {
    vec![
        DataSourceDescriptor::new(
            MORTGAGE_RATES,
            "Mortgage Rates",
            "rates/mortgage.json",
            RefreshCadence::Daily,
        ),
        DataSourceDescriptor::new(
            REGIONAL_PROPERTY_DATA,
            "Regional Property Tax & Insurance Rates",
            "regional/property.json",
            RefreshCadence::Monthly,
        ),
        DataSourceDescriptor::new(
            LEGAL_MULTIPLIERS,
            "Legal Settlement Multipliers",
            "legal/multipliers.json",
            RefreshCadence::Quarterly,
        ),
        DataSourceDescriptor::new(
            MARKET_INDICES,
            "Market Indices",
            "market/indices.json",
            RefreshCadence::Daily,
        ),
        DataSourceDescriptor::new(
            CONSTRUCTION_COSTS,
            "Construction Material Costs",
            "construction/costs.json",
            RefreshCadence::Weekly,
        ),
    ]
}
