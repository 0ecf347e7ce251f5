use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::utils::date::today_in;

// --- Engine State ---

/// Report fields read from an engine run, in response order.
pub const REPORT_FIELDS: [&str; 5] = [
    "market_report",
    "sentiment_report",
    "news_report",
    "fundamentals_report",
    "investment_plan",
];

/// Key-value result of one engine run. Keys other than [`REPORT_FIELDS`] are carried but never read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisState(pub Map<String, Value>);

impl AnalysisState {
    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), Value::String(value.into()));
        self
    }
}

/// Narrow view of an engine state: field name to optional text.
pub trait StateLookup {
    fn field(&self, key: &str) -> Option<String>;
}

impl StateLookup for AnalysisState {
    fn field(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            // Engines occasionally emit structured sections; keep them as JSON text
            other => Some(other.to_string()),
        }
    }
}

// --- Response Payload ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub symbol: String,
    pub market_report: Option<String>,
    pub sentiment_report: Option<String>,
    pub news_report: Option<String>,
    pub fundamentals_report: Option<String>,
    pub investment_plan: Option<String>,
}

impl ResearchReport {
    pub fn from_state(symbol: &str, state: &impl StateLookup) -> Self {
        Self {
            symbol: symbol.to_string(),
            market_report: state.field("market_report"),
            sentiment_report: state.field("sentiment_report"),
            news_report: state.field("news_report"),
            fundamentals_report: state.field("fundamentals_report"),
            investment_plan: state.field("investment_plan"),
        }
    }

    /// Number of report fields the engine actually produced.
    pub fn present_fields(&self) -> usize {
        [
            &self.market_report,
            &self.sentiment_report,
            &self.news_report,
            &self.fundamentals_report,
            &self.investment_plan,
        ]
        .iter()
        .filter(|field| field.is_some())
        .count()
    }
}

// --- Request Settings ---

// Immutable per-process settings consulted by the research handler
#[derive(Clone, Debug, Default)]
pub struct ResearchSettings {
    pub engine_timeout: Option<Duration>,
    pub as_of_timezone: Option<Tz>,
}

impl ResearchSettings {
    /// The as-of date for a request arriving now.
    pub fn today(&self) -> NaiveDate {
        today_in(self.as_of_timezone)
    }
}
