use crate::AppState;
use crate::data_structures::ResearchSettings;
use crate::engine::SharedEngineFactory;
use crate::error::ResearchError;
use crate::research_service;
use axum::{
    Router,
    extract::{Query, State},
    http::{Method, Uri, header},
    response::{IntoResponse, Response},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Every request goes through [`dispatch`]; there is no other route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[instrument(skip_all, fields(method = %method, path = %uri.path()))]
pub async fn dispatch(
    State(factory): State<SharedEngineFactory>,
    State(settings): State<ResearchSettings>,
    method: Method,
    uri: Uri,
) -> Result<Response, ResearchError> {
    if method == Method::GET && uri.path().ends_with("/research") {
        return research_handler(factory, settings, &uri).await;
    }
    debug!("No route matched");
    Err(ResearchError::NotFound)
}

async fn research_handler(
    factory: SharedEngineFactory,
    settings: ResearchSettings,
    uri: &Uri,
) -> Result<Response, ResearchError> {
    let Some(symbol) = symbol_param(uri) else {
        warn!("Rejected research request without symbol");
        return Err(ResearchError::MissingSymbol);
    };

    let as_of = settings.today();
    info!(%symbol, %as_of, "Starting research");
    let body = research_service::build_report_within(
        factory.as_ref(),
        &symbol,
        as_of,
        settings.engine_timeout,
    )
    .await?;

    info!(%symbol, body_bytes = body.len(), "Research completed");
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// First `symbol` in the query string, if non-empty. A query that fails to decode counts as absent.
fn symbol_param(uri: &Uri) -> Option<String> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri).ok()?;
    pairs
        .into_iter()
        .find(|(key, _)| key == "symbol")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}
