use crate::data_structures::{REPORT_FIELDS, ResearchReport};
use crate::engine::{EngineError, EngineFactory};
use chrono::NaiveDate;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Run one fresh engine for `symbol` and serialize the report fields as JSON.
///
/// The engine is always built with debug off and dropped when this returns.
#[instrument(skip(factory))]
pub async fn build_report(
    factory: &dyn EngineFactory,
    symbol: &str,
    as_of: NaiveDate,
) -> Result<String, EngineError> {
    let engine = factory.create(false)?;
    let (state, signal) = engine.propagate(symbol, as_of).await?;
    let ignored_keys = state
        .0
        .keys()
        .filter(|key| !REPORT_FIELDS.contains(&key.as_str()))
        .count();
    debug!(?signal, ignored_keys, "Engine run finished");

    let report = ResearchReport::from_state(symbol, &state);
    info!(present_fields = report.present_fields(), "Built research report");
    Ok(serde_json::to_string(&report)?)
}

/// [`build_report`] bounded by an optional deadline. The engine future is dropped when it elapses.
pub async fn build_report_within(
    factory: &dyn EngineFactory,
    symbol: &str,
    as_of: NaiveDate,
    limit: Option<Duration>,
) -> Result<String, EngineError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, build_report(factory, symbol, as_of))
            .await
            .map_err(|_| EngineError::Timeout(limit))?,
        None => build_report(factory, symbol, as_of).await,
    }
}
