//! Engine backed by an OpenAI-compatible chat completions API.
//!
//! Each run fetches quote context for the symbol, writes the four analyst
//! reports concurrently and then condenses them into an investment plan.

use super::{AnalysisEngine, EngineError, EngineFactory, Signal, tail};
use crate::config::LlmConfig;
use crate::data_structures::AnalysisState;
use crate::utils::date::format_as_of;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::try_join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const REQUEST_TIMEOUT_SECS: u64 = 120;
const EMPTY_ANALYSIS: &str = "No analysis available.";
const ERROR_BODY_CHARS: usize = 500;

// (state key, analyst role, report focus)
const ANALYSTS: [(&str, &str, &str); 4] = [
    (
        "market_report",
        "market analyst",
        "price action, trend, momentum and key technical levels",
    ),
    (
        "sentiment_report",
        "social media and sentiment analyst",
        "investor sentiment and how the market currently perceives the company",
    ),
    (
        "news_report",
        "news analyst",
        "recent company news and macroeconomic events relevant to trading it",
    ),
    (
        "fundamentals_report",
        "fundamentals analyst",
        "valuation, profitability, balance sheet and financial health",
    ),
];

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: String,
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct LlmEngineFactory {
    config: LlmConfig,
    client: Client,
}

impl LlmEngineFactory {
    pub fn new(config: LlmConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { config, client })
    }
}

impl EngineFactory for LlmEngineFactory {
    fn create(&self, debug: bool) -> Result<Box<dyn AnalysisEngine>, EngineError> {
        if self.config.api_key.is_empty() {
            return Err(EngineError::Config("llm api key is empty".to_string()));
        }
        Ok(Box::new(LlmEngine {
            config: self.config.clone(),
            client: self.client.clone(),
            debug,
        }))
    }
}

pub struct LlmEngine {
    config: LlmConfig,
    client: Client,
    debug: bool,
}

impl LlmEngine {
    /// First quote record for the symbol, or `{}` when the quote service has nothing usable.
    async fn fetch_quote(&self, symbol: &str) -> Value {
        let response = self
            .client
            .get(&self.config.quote_url)
            .query(&[("symbols", symbol)])
            .send()
            .await;

        let body = match response {
            Ok(resp) if resp.status().is_success() => resp.json::<Value>().await,
            Ok(resp) => {
                warn!(status = %resp.status(), "Quote service responded with error status");
                return json!({});
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch quote context");
                return json!({});
            }
        };

        match body {
            Ok(value) => value
                .pointer("/quoteResponse/result/0")
                .cloned()
                .unwrap_or_else(|| json!({})),
            Err(e) => {
                warn!(error = %e, "Quote response was not valid JSON");
                json!({})
            }
        }
    }

    async fn complete(&self, prompt: String) -> Result<String, EngineError> {
        if self.debug {
            debug!(%prompt, "Sending prompt");
        }

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt),
            }],
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Upstream {
                status: status.as_u16(),
                body: tail(&body, ERROR_BODY_CHARS),
            });
        }

        let completion: ChatResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| EMPTY_ANALYSIS.to_string());
        Ok(content)
    }
}

fn analyst_prompt(role: &str, focus: &str, symbol: &str, as_of: &str, quote: &Value) -> String {
    format!(
        "You are a {role} on an equity research desk. Write a concise report for {symbol} \
         as of {as_of} covering {focus}. Use the following JSON data as context: {quote}"
    )
}

fn plan_prompt(symbol: &str, as_of: &str, reports: &[(&str, String)]) -> String {
    let mut prompt = format!(
        "You are the research manager. Using the analyst reports below, write an investment \
         plan for {symbol} as of {as_of}. Start with a single line containing BUY, HOLD or SELL, \
         then explain the rationale and risks.\n"
    );
    for (key, report) in reports {
        prompt.push_str(&format!("\n## {key}\n{report}\n"));
    }
    prompt
}

#[async_trait]
impl AnalysisEngine for LlmEngine {
    #[instrument(skip(self), fields(model = %self.config.model))]
    async fn propagate(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> Result<(AnalysisState, Signal), EngineError> {
        let as_of = format_as_of(as_of);
        let quote = self.fetch_quote(symbol).await;
        debug!(quote_fields = quote.as_object().map_or(0, |q| q.len()), "Fetched quote context");

        let analyst_reports = try_join_all(ANALYSTS.iter().map(|(_, role, focus)| {
            self.complete(analyst_prompt(role, focus, symbol, &as_of, &quote))
        }))
        .await?;

        let reports: Vec<(&str, String)> = ANALYSTS
            .iter()
            .map(|(key, _, _)| *key)
            .zip(analyst_reports)
            .collect();
        let plan = self.complete(plan_prompt(symbol, &as_of, &reports)).await?;
        let signal = plan
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(String::from);

        let mut state = AnalysisState::default();
        for (key, report) in reports {
            state = state.with_field(key, report);
        }
        state = state.with_field("investment_plan", plan);

        info!(signal = ?signal, "LLM analysis complete");
        Ok((state, signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{REPORT_FIELDS, StateLookup};
    use axum::{
        Json, Router,
        extract::Query,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
    };
    use std::collections::HashMap;

    // Fake chat completions: echoes which section was asked for and who asked
    async fn fake_completions(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if auth != "Bearer sk-test" {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad key" })));
        }

        let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
        let content = if prompt.starts_with("You are the research manager") {
            let analysts = prompt.matches("\n## ").count();
            format!("BUY\nbased on {analysts} reports")
        } else {
            let role = prompt
                .trim_start_matches("You are a ")
                .split(" on an equity")
                .next()
                .unwrap_or_default();
            let has_quote = prompt.contains("\"regularMarketPrice\":189.5");
            format!("  {role} report (quote={has_quote}) ")
        };

        (
            StatusCode::OK,
            Json(json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })),
        )
    }

    async fn fake_quote(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        let symbol = params.get("symbols").cloned().unwrap_or_default();
        Json(json!({
            "quoteResponse": { "result": [ { "symbol": symbol, "regularMarketPrice": 189.5 } ] }
        }))
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base: &str, api_key: &str) -> LlmConfig {
        LlmConfig {
            api_key: api_key.to_string(),
            api_base: format!("{}/v1", base),
            quote_url: format!("{}/quote", base),
            ..LlmConfig::with_api_key(api_key)
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[tokio::test]
    async fn test_propagate_fills_all_report_fields() {
        let base = spawn(
            Router::new()
                .route("/v1/chat/completions", post(fake_completions))
                .route("/quote", get(fake_quote)),
        )
        .await;
        let engine = LlmEngineFactory::new(config(&base, "sk-test"))
            .unwrap()
            .create(false)
            .unwrap();

        let (state, signal) = engine.propagate("AAPL", date()).await.unwrap();

        for key in REPORT_FIELDS {
            assert!(state.field(key).is_some(), "missing {key}");
        }
        assert_eq!(state.field("market_report").as_deref(), Some("market analyst report (quote=true)"));
        assert_eq!(state.field("news_report").as_deref(), Some("news analyst report (quote=true)"));
        assert_eq!(state.field("investment_plan").as_deref(), Some("BUY\nbased on 4 reports"));
        assert_eq!(signal.as_deref(), Some("BUY"));
    }

    #[tokio::test]
    async fn test_missing_quote_service_degrades_to_empty_context() {
        let base = spawn(Router::new().route("/v1/chat/completions", post(fake_completions))).await;
        let engine = LlmEngineFactory::new(config(&base, "sk-test"))
            .unwrap()
            .create(false)
            .unwrap();

        let (state, _) = engine.propagate("AAPL", date()).await.unwrap();
        assert_eq!(
            state.field("fundamentals_report").as_deref(),
            Some("fundamentals analyst report (quote=false)")
        );
    }

    #[tokio::test]
    async fn test_rejected_key_is_upstream_error() {
        let base = spawn(Router::new().route("/v1/chat/completions", post(fake_completions))).await;
        let engine = LlmEngineFactory::new(config(&base, "sk-wrong"))
            .unwrap()
            .create(false)
            .unwrap();

        match engine.propagate("AAPL", date()).await {
            Err(EngineError::Upstream { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_empty_completion_uses_placeholder() {
        async fn empty() -> Json<Value> {
            Json(json!({ "choices": [] }))
        }
        let base = spawn(Router::new().route("/v1/chat/completions", post(empty))).await;
        let engine = LlmEngineFactory::new(config(&base, "sk-test"))
            .unwrap()
            .create(false)
            .unwrap();

        let (state, signal) = engine.propagate("AAPL", date()).await.unwrap();
        assert_eq!(state.field("sentiment_report").as_deref(), Some(EMPTY_ANALYSIS));
        assert_eq!(signal.as_deref(), Some(EMPTY_ANALYSIS));
    }

    #[test]
    fn test_factory_rejects_empty_key() {
        let factory = LlmEngineFactory::new(LlmConfig::with_api_key("")).unwrap();
        assert!(matches!(factory.create(false), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_plan_prompt_lists_every_report() {
        let reports = vec![("market_report", "up".to_string()), ("news_report", "quiet".to_string())];
        let prompt = plan_prompt("AAPL", "2024-05-10", &reports);
        assert!(prompt.contains("## market_report\nup"));
        assert!(prompt.contains("## news_report\nquiet"));
        assert!(prompt.contains("AAPL as of 2024-05-10"));
    }
}
