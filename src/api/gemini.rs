//! LLM-powered trading decisions using the Gemini API
//!
//! Sends the assembled market prompt and asks for a single JSON decision
//! that matches `trade_schema(symbols)`. The reply is clamped into range before it
//! reaches the hold guard.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{Direction, Operation, ProposedAction, MAX_REASON_CHARS};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const TEMPERATURE: f32 = 0.7;
const TOP_P: f32 = 0.95;
const TOP_K: u32 = 40;
const MAX_OUTPUT_TOKENS: u32 = 8192;
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 2000;

/// Tradable tickers when none are configured
pub const DEFAULT_SYMBOLS: [&str; 3] = ["BTC", "ETH", "SOL"];

fn validation_instructions(symbols: &[String]) -> String {
    format!(
        "\
CRITICAL VALIDATION RULES - YOU MUST FOLLOW THESE EXACTLY:
1. target_portion_of_balance: MUST be a number between 0.0 and 1.0 (inclusive)
2. leverage: MUST be an integer between 1 and 10 (inclusive)
3. reason: MUST be maximum 300 characters
4. operation: MUST be one of: open, close, hold
5. symbol: MUST be one of: {}
6. direction: MUST be one of: long, short

If any value is outside these ranges, adjust it to the nearest valid value.
",
        symbols.join(", ")
    )
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Gemini returned invalid JSON: {message} (text: {text})")]
    MalformedJson { message: String, text: String },

    #[error("Gemini response contained no candidates")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: String,
    response_schema: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Decision as returned by the model, before clamping
#[derive(Debug, Clone, Deserialize)]
pub struct RawDecision {
    pub operation: Operation,
    pub symbol: String,
    pub direction: Direction,
    pub target_portion_of_balance: f64,
    /// Schema type is "number", so the model may send a float
    pub leverage: f64,
    pub reason: String,
}

/// Static description of the decision model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub provider: &'static str,
    pub model_name: String,
    pub model_display_name: &'static str,
    pub capabilities: Vec<&'static str>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub validation: &'static str,
}

/// JSON schema the model must answer with; `symbol` is limited to `symbols`
pub fn trade_schema(symbols: &[String]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "operation": {
                "type": "string",
                "description": "Type of trading operation to perform: open, close, or hold",
                "enum": ["open", "close", "hold"]
            },
            "symbol": {
                "type": "string",
                "description": format!("The cryptocurrency symbol to act on: {}", symbols.join(", ")),
                "enum": symbols
            },
            "direction": {
                "type": "string",
                "description": "Trade direction: long (betting price goes up) or short (betting price goes down)",
                "enum": ["long", "short"]
            },
            "target_portion_of_balance": {
                "type": "number",
                "description": "Fraction of balance/position to use. MUST be between 0.0 and 1.0 (inclusive). For open: fraction of balance. For close: fraction of position."
            },
            "leverage": {
                "type": "number",
                "description": "Leverage multiplier. MUST be between 1 and 10 (inclusive)."
            },
            "reason": {
                "type": "string",
                "description": "Brief explanation of the trading decision. Maximum 300 characters."
            }
        },
        "required": [
            "operation",
            "symbol",
            "direction",
            "target_portion_of_balance",
            "leverage",
            "reason"
        ]
    })
}

/// Clamp a raw model decision into valid ranges
///
/// Portion goes to [0, 1], leverage is truncated then clamped to [1, 10],
/// and a reason longer than 300 chars is cut to 297 chars plus "...".
pub fn validate_decision(raw: RawDecision) -> ProposedAction {
    let target_portion_of_balance = if raw.target_portion_of_balance.is_nan() {
        0.0
    } else {
        raw.target_portion_of_balance.clamp(0.0, 1.0)
    };

    let leverage = if raw.leverage.is_finite() {
        (raw.leverage.trunc() as i64).clamp(1, 10) as u32
    } else {
        1
    };

    let reason = if raw.reason.chars().count() > MAX_REASON_CHARS {
        let mut cut: String = raw.reason.chars().take(MAX_REASON_CHARS - 3).collect();
        cut.push_str("...");
        cut
    } else {
        raw.reason
    };

    ProposedAction {
        operation: raw.operation,
        symbol: raw.symbol.trim().to_uppercase(),
        direction: raw.direction,
        target_portion_of_balance,
        leverage,
        reason,
    }
}

/// Remove ```json fences some models wrap around JSON output
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    symbols: Vec<String>,
    retry_base_delay_ms: u64,
}

impl GeminiClient {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self::with_base_url(api_key, model, GEMINI_API_BASE)
    }

    pub fn with_base_url(api_key: String, model: Option<String>, base_url: &str) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
        }
    }

    /// Restrict decisions to these tickers; an empty list keeps the defaults
    pub fn with_symbols(mut self, symbols: &[String]) -> Self {
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            self.symbols = symbols;
        }
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "Google",
            model_name: self.model.clone(),
            model_display_name: "Gemini 2.5 Pro",
            capabilities: vec![
                "JSON Schema Output",
                "Long Context (1M tokens)",
                "Advanced Reasoning (Thinking)",
                "Complex Analysis",
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
            validation: "Post-processing validation for trading parameters",
        }
    }

    fn build_request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: format!("{}\n\n{}", validation_instructions(&self.symbols), prompt),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                top_k: TOP_K,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                response_mime_type: "application/json".to_string(),
                response_schema: trade_schema(&self.symbols),
            },
        }
    }

    /// Ask the model for a decision on the given prompt
    ///
    /// Network errors, 429 / 5xx responses and unparsable JSON are retried
    /// with exponential backoff; other HTTP errors fail immediately.
    pub async fn decide(&self, prompt: &str) -> Result<ProposedAction, DecisionError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = self.build_request(prompt);

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay_ms = self.retry_base_delay_ms * 2_u64.pow(attempt - 1);
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
            }
            attempt += 1;

            let error = match self.try_decide(&url, &request).await {
                Ok(action) => {
                    tracing::info!(
                        "🤖 Gemini decision: {} {} {}",
                        action.operation.as_str(),
                        action.symbol,
                        action.direction.as_str()
                    );
                    return Ok(action);
                }
                Err(e) => e,
            };

            let retryable = match &error {
                DecisionError::Http(_) | DecisionError::MalformedJson { .. } => true,
                DecisionError::Api { status, .. } => *status == 429 || *status >= 500,
                DecisionError::EmptyResponse => true,
            };

            if !retryable || attempt >= MAX_RETRIES {
                tracing::error!("❌ Gemini call failed: {}", error);
                return Err(error);
            }
            tracing::warn!(
                "⚠️ Gemini attempt {}/{} failed: {}",
                attempt,
                MAX_RETRIES,
                error
            );
        }
    }

    async fn try_decide(
        &self,
        url: &str,
        request: &GenerateRequest,
    ) -> Result<ProposedAction, DecisionError> {
        let response = self
            .client
            .post(url)
            .query(&[("key", &self.api_key)])
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: GenerateResponse = response.json().await?;
        let text: String = data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .ok_or(DecisionError::EmptyResponse)?;

        let cleaned = strip_code_fences(&text);
        let raw: RawDecision =
            serde_json::from_str(cleaned).map_err(|e| DecisionError::MalformedJson {
                message: e.to_string(),
                text: cleaned.to_string(),
            })?;

        Ok(validate_decision(raw))
    }
}
