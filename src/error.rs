use crate::engine::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Everything the research endpoint can answer with besides a report.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("no route matched")]
    NotFound,

    #[error("symbol query parameter missing or empty")]
    MissingSymbol,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ResearchError {
    pub fn status(&self) -> StatusCode {
        match self {
            ResearchError::NotFound => StatusCode::NOT_FOUND,
            ResearchError::MissingSymbol => StatusCode::BAD_REQUEST,
            ResearchError::Engine(EngineError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ResearchError::Engine(
                EngineError::Upstream { .. }
                | EngineError::Http(_)
                | EngineError::Decode(_)
                | EngineError::OutputTooLarge { .. }
                | EngineError::Exited { .. },
            ) => StatusCode::BAD_GATEWAY,
            ResearchError::Engine(
                EngineError::Config(_) | EngineError::Spawn { .. } | EngineError::Io(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ResearchError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Engine details stay in the logs
        let body = match &self {
            ResearchError::NotFound => "Not found",
            ResearchError::MissingSymbol => "symbol required",
            ResearchError::Engine(EngineError::Timeout(limit)) => {
                warn!(?limit, "Research engine timed out");
                "analysis timed out"
            }
            ResearchError::Engine(e) => {
                error!(error = %e, status = status.as_u16(), "Research engine failed");
                "analysis failed"
            }
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ResearchError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ResearchError::MissingSymbol.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ResearchError::from(EngineError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ResearchError::from(EngineError::Upstream { status: 429, body: String::new() }).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ResearchError::from(EngineError::Exited { status: "exit status: 1".into(), stderr: String::new() })
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ResearchError::from(EngineError::OutputTooLarge { limit: 1024 }).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ResearchError::from(EngineError::Config("missing".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
