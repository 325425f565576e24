use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::models::{
    parse_utc_timestamp, AccountStatus, AccountSummary, BrokerPosition, Candle, Direction,
};

const DEMO_API_BASE: &str = "https://demo-api-capital.backend-capital.com";
const LIVE_API_BASE: &str = "https://api-capital.backend-capital.com";
const RATE_LIMIT_RPS: u32 = 10; // Capital.com: 10 requests per second per user
const CONFIRMATION_DELAY_MS: u64 = 500;

type CapitalRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("authentication response missing CST / X-SECURITY-TOKEN headers")]
    MissingTokens,

    #[error("Capital.com API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no accounts available")]
    NoAccounts,
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Login details for a Capital.com API key
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub password: String,
    pub identifier: String,
    pub demo_mode: bool,
    /// Account to trade on; falls back to the preferred account
    pub account_id: Option<String>,
}

#[derive(Debug, Clone)]
struct SessionTokens {
    cst: String,
    security_token: String,
}

impl SessionTokens {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cst = headers.get("CST")?.to_str().ok()?.to_string();
        let security_token = headers.get("X-SECURITY-TOKEN")?.to_str().ok()?.to_string();
        Some(Self {
            cst,
            security_token,
        })
    }
}

// ============== Response Types ==============

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub preferred: bool,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub balance: AccountBalance,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub deposit: f64,
    #[serde(default)]
    pub profit_loss: f64,
    #[serde(default)]
    pub available: f64,
    #[serde(default)]
    pub equity: Option<f64>,
}

impl Account {
    fn to_status(&self) -> AccountStatus {
        AccountStatus {
            balance: self.balance.balance,
            equity: self
                .balance
                .equity
                .unwrap_or(self.balance.balance + self.balance.profit_loss),
            pnl: self.balance.profit_loss,
            available: self.balance.available,
            currency: if self.currency.is_empty() {
                "EUR".to_string()
            } else {
                self.currency.clone()
            },
            account_name: self.account_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    positions: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    position: PositionRaw,
    market: MarketRaw,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRaw {
    deal_id: String,
    deal_reference: Option<String>,
    direction: String,
    size: f64,
    level: f64,
    stop_level: Option<f64>,
    profit_level: Option<f64>,
    #[serde(default)]
    trailing_stop: bool,
    #[serde(default)]
    guaranteed_stop: bool,
    #[serde(default)]
    upl: f64,
    /// `createdDate` is in the account's local zone and is not read
    #[serde(rename = "createdDateUTC")]
    created_date_utc: Option<String>,
    leverage: Option<f64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarketRaw {
    epic: String,
    bid: Option<f64>,
    offer: Option<f64>,
}

impl From<PositionEntry> for BrokerPosition {
    fn from(entry: PositionEntry) -> Self {
        let PositionEntry { position, market } = entry;
        let mark_price = if position.direction == "SELL" {
            market.bid
        } else {
            market.offer
        };

        BrokerPosition {
            deal_id: position.deal_id,
            deal_reference: position.deal_reference,
            epic: market.epic,
            direction: position.direction,
            size: position.size,
            entry_price: position.level,
            mark_price,
            stop_level: position.stop_level,
            profit_level: position.profit_level,
            trailing_stop: position.trailing_stop,
            guaranteed_stop: position.guaranteed_stop,
            upl: position.upl,
            created_at: position.created_date_utc,
            leverage: position.leverage,
            currency: position.currency,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    #[serde(default)]
    prices: Vec<PriceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceEntry {
    snapshot_time: Option<String>,
    #[serde(rename = "snapshotTimeUTC")]
    snapshot_time_utc: Option<String>,
    open_price: Option<BidAsk>,
    high_price: Option<BidAsk>,
    low_price: Option<BidAsk>,
    close_price: Option<BidAsk>,
    #[serde(default)]
    last_traded_volume: f64,
}

#[derive(Debug, Deserialize)]
struct BidAsk {
    bid: Option<f64>,
}

impl PriceEntry {
    fn into_candle(self) -> Option<Candle> {
        let raw_time = self.snapshot_time_utc.or(self.snapshot_time)?;
        let timestamp = parse_utc_timestamp(&raw_time)?;
        let bid = |p: Option<BidAsk>| p.and_then(|p| p.bid);
        let close = bid(self.close_price)?;

        Some(Candle {
            timestamp,
            open: bid(self.open_price).unwrap_or(close),
            high: bid(self.high_price).unwrap_or(close),
            low: bid(self.low_price).unwrap_or(close),
            close,
            volume: self.last_traded_volume,
        })
    }
}

/// Price snapshot and dealing rules for an instrument
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub epic: String,
    pub bid: Option<f64>,
    pub offer: Option<f64>,
    pub min_deal_size: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketResponse {
    #[serde(default)]
    snapshot: MarketSnapshot,
    #[serde(default)]
    dealing_rules: DealingRules,
}

#[derive(Debug, Default, Deserialize)]
struct MarketSnapshot {
    bid: Option<f64>,
    offer: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DealingRules {
    min_deal_size: Option<RuleValue>,
}

#[derive(Debug, Deserialize)]
struct RuleValue {
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DealReferenceResponse {
    deal_reference: Option<String>,
}

/// Outcome of a deal as reported by `/confirms`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealConfirmation {
    pub deal_id: Option<String>,
    pub deal_status: Option<String>,
    pub status: Option<String>,
    pub reason: Option<String>,
    pub level: Option<f64>,
}

/// Market order request
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub epic: String,
    pub direction: Direction,
    pub size: f64,
    pub stop_distance: Option<f64>,
    pub profit_distance: Option<f64>,
    pub trailing_stop: bool,
}

impl OrderRequest {
    pub fn market(epic: impl Into<String>, direction: Direction, size: f64) -> Self {
        Self {
            epic: epic.into(),
            direction,
            size,
            stop_distance: None,
            profit_distance: None,
            trailing_stop: false,
        }
    }

    fn payload(&self) -> serde_json::Value {
        let mut payload = json!({
            "epic": self.epic,
            "direction": self.direction.order_side(),
            "size": self.size,
            "guaranteedStop": false,
        });

        if let Some(stop) = self.stop_distance.filter(|d| *d > 0.0) {
            payload["stopDistance"] = json!(round_to(stop, 5));
            // Trailing stops require a stop distance
            if self.trailing_stop {
                payload["trailingStop"] = json!(true);
            }
        }
        if let Some(profit) = self.profit_distance.filter(|d| *d > 0.0) {
            payload["profitDistance"] = json!(round_to(profit, 5));
        }

        payload
    }
}

/// Accepted order with the deal id resolved from its confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub deal_reference: Option<String>,
    pub deal_id: Option<String>,
}

/// Stop / limit amendment for an open position
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing_stop: Option<bool>,
}

/// Map a short interval ("15m", "1h", ...) to a Capital.com resolution
pub fn resolution_for(interval: &str) -> &'static str {
    match interval {
        "1m" => "MINUTE",
        "5m" => "MINUTE_5",
        "15m" => "MINUTE_15",
        "1h" => "HOUR",
        "4h" => "HOUR_4",
        "1d" => "DAY",
        _ => "MINUTE_15",
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

async fn ensure_success(response: Response) -> BrokerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BrokerError::Api {
        status: status.as_u16(),
        body,
    })
}

// ============== Implementation ==============

/// Capital.com REST client
///
/// Holds the session tokens (`CST` / `X-SECURITY-TOKEN`) and the id of the
/// active account. Any request answered with 401 triggers one
/// re-authentication and a retry.
pub struct CapitalClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    session: RwLock<Option<SessionTokens>>,
    active_account: RwLock<Option<String>>,
    rate_limiter: Arc<CapitalRateLimiter>,
}

impl CapitalClient {
    /// Authenticate and select the trading account
    pub async fn connect(credentials: Credentials) -> BrokerResult<Self> {
        let base_url = if credentials.demo_mode {
            DEMO_API_BASE
        } else {
            LIVE_API_BASE
        };
        Self::connect_to(credentials, base_url).await
    }

    /// Same as `connect` against an explicit API host
    pub async fn connect_to(credentials: Credentials, base_url: &str) -> BrokerResult<Self> {
        let client = Self::unauthenticated(credentials, base_url)?;
        client.authenticate().await?;

        if let Err(e) = client.select_account().await {
            tracing::warn!("⚠️ Account selection failed: {}", e);
        }

        Ok(client)
    }

    fn unauthenticated(credentials: Credentials, base_url: &str) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_RPS).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            session: RwLock::new(None),
            active_account: RwLock::new(None),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn active_account_id(&self) -> Option<String> {
        self.active_account.read().await.clone()
    }

    // ---------- session ----------

    async fn authenticate(&self) -> BrokerResult<()> {
        let url = format!("{}/api/v1/session", self.base_url);
        let payload = json!({
            "identifier": self.credentials.identifier,
            "password": self.credentials.password,
            "encryptedPassword": false,
        });

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .post(&url)
            .header("X-CAP-API-KEY", &self.credentials.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("❌ Capital.com authentication failed ({}): {}", status, body);
            return Err(BrokerError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let tokens =
            SessionTokens::from_headers(response.headers()).ok_or(BrokerError::MissingTokens)?;
        *self.session.write().await = Some(tokens);

        tracing::info!("✅ Capital.com authenticated");
        Ok(())
    }

    async fn tokens(&self) -> BrokerResult<SessionTokens> {
        if let Some(tokens) = self.session.read().await.clone() {
            return Ok(tokens);
        }
        self.authenticate().await?;
        self.session
            .read()
            .await
            .clone()
            .ok_or(BrokerError::MissingTokens)
    }

    /// Single request with the current tokens, no retry
    async fn raw_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> BrokerResult<Response> {
        let tokens = self.tokens().await?;
        let url = format!("{}{}", self.base_url, path);

        self.rate_limiter.until_ready().await;
        let mut request = self
            .client
            .request(method, &url)
            .header("X-CAP-API-KEY", &self.credentials.api_key)
            .header("CST", &tokens.cst)
            .header("X-SECURITY-TOKEN", &tokens.security_token);

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    /// Request that re-authenticates once on 401
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> BrokerResult<Response> {
        let response = self.raw_request(method.clone(), path, query, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!("🔄 Session expired, re-authenticating...");
        self.authenticate().await?;

        let active = self.active_account.read().await.clone();
        if let Some(account_id) = active {
            if let Err(e) = self.put_session_account(&account_id).await {
                tracing::warn!("⚠️ Could not restore account {}: {}", account_id, e);
            }
        }

        self.raw_request(method, path, query, body).await
    }

    /// PUT /session. Returns true if the account was switched, false if it was already active.
    async fn put_session_account(&self, account_id: &str) -> BrokerResult<bool> {
        let payload = json!({ "accountId": account_id });
        let response = self
            .raw_request(Method::PUT, "/api/v1/session", &[], Some(&payload))
            .await?;

        let status = response.status();
        if status.is_success() {
            if let Some(tokens) = SessionTokens::from_headers(response.headers()) {
                *self.session.write().await = Some(tokens);
            }
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("not-different") {
            return Ok(false);
        }

        Err(BrokerError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Pick configured account, else preferred, else first, and switch to it
    async fn select_account(&self) -> BrokerResult<()> {
        let accounts = self.list_accounts().await?;
        if accounts.is_empty() {
            tracing::warn!("⚠️ No accounts found");
            return Err(BrokerError::NoAccounts);
        }

        let target = pick_account(&accounts, self.credentials.account_id.as_deref())
            .ok_or(BrokerError::NoAccounts)?;
        self.switch_to_account(target).await
    }

    pub async fn switch_to_account(&self, account: &Account) -> BrokerResult<()> {
        let switched = self.put_session_account(&account.account_id).await?;

        if switched {
            tracing::info!(
                "✅ Account selected: {} ({:.2} {})",
                account.account_name,
                account.balance.balance,
                account.currency
            );
        } else {
            tracing::info!(
                "✅ Account already active: {} ({:.2} {})",
                account.account_name,
                account.balance.balance,
                account.currency
            );
        }

        *self.active_account.write().await = Some(account.account_id.clone());
        Ok(())
    }

    // ---------- account ----------

    pub async fn list_accounts(&self) -> BrokerResult<Vec<Account>> {
        let response = self.send(Method::GET, "/api/v1/accounts", &[], None).await?;
        let data: AccountsResponse = ensure_success(response).await?.json().await?;
        Ok(data.accounts)
    }

    /// Balance / equity of the active account
    pub async fn account_status(&self) -> BrokerResult<AccountStatus> {
        let accounts = self.list_accounts().await?;
        let active = self.active_account.read().await.clone();

        let account = active
            .as_deref()
            .and_then(|id| accounts.iter().find(|a| a.account_id == id))
            .or_else(|| pick_account(&accounts, None))
            .ok_or(BrokerError::NoAccounts)?;

        Ok(account.to_status())
    }

    /// Account status together with open positions
    pub async fn account_summary(&self) -> BrokerResult<AccountSummary> {
        let account = self.account_status().await?;
        let positions = self.open_positions().await?;
        Ok(AccountSummary { account, positions })
    }

    // ---------- positions ----------

    pub async fn open_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let response = self.send(Method::GET, "/api/v1/positions", &[], None).await?;
        let data: PositionsResponse = ensure_success(response).await?.json().await?;
        Ok(data.positions.into_iter().map(BrokerPosition::from).collect())
    }

    // ---------- market data ----------

    /// Historical bid candles, oldest first
    pub async fn fetch_candles(
        &self,
        epic: &str,
        resolution: &str,
        max: usize,
    ) -> BrokerResult<Vec<Candle>> {
        let path = format!("/api/v1/prices/{}", epic);
        let query = [
            ("resolution", resolution.to_string()),
            ("max", max.to_string()),
        ];
        let response = self.send(Method::GET, &path, &query, None).await?;
        let data: PricesResponse = ensure_success(response).await?.json().await?;

        let mut candles: Vec<Candle> = data
            .prices
            .into_iter()
            .filter_map(PriceEntry::into_candle)
            .collect();
        candles.sort_by_key(|c| c.timestamp);

        tracing::debug!("Fetched {} {} candles for {}", candles.len(), resolution, epic);
        Ok(candles)
    }

    pub async fn market_info(&self, epic: &str) -> BrokerResult<MarketInfo> {
        let path = format!("/api/v1/markets/{}", epic);
        let response = self.send(Method::GET, &path, &[], None).await?;
        let data: MarketResponse = ensure_success(response).await?.json().await?;

        Ok(MarketInfo {
            epic: epic.to_string(),
            bid: data.snapshot.bid,
            offer: data.snapshot.offer,
            min_deal_size: data
                .dealing_rules
                .min_deal_size
                .map(|r| r.value)
                .unwrap_or(0.0001),
        })
    }

    // ---------- trading ----------

    pub async fn deal_confirmation(&self, deal_reference: &str) -> BrokerResult<DealConfirmation> {
        let path = format!("/api/v1/confirms/{}", deal_reference);
        let response = self.send(Method::GET, &path, &[], None).await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    /// Place a market order and resolve its deal id
    pub async fn execute_order(&self, order: &OrderRequest) -> BrokerResult<OrderResult> {
        let payload = order.payload();
        tracing::info!(
            "🚀 Sending {} order for {} {}",
            order.direction.order_side(),
            order.size,
            order.epic
        );

        let response = self
            .send(Method::POST, "/api/v1/positions", &[], Some(&payload))
            .await?;
        let response = match ensure_success(response).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("⚠️ Order failed: {}", e);
                return Err(e);
            }
        };
        let data: DealReferenceResponse = response.json().await?;
        tracing::info!("✅ Order accepted: {:?}", data.deal_reference);

        let mut deal_id = None;
        if let Some(reference) = data.deal_reference.as_deref() {
            sleep(Duration::from_millis(CONFIRMATION_DELAY_MS)).await;
            match self.deal_confirmation(reference).await {
                Ok(confirmation) => deal_id = confirmation.deal_id,
                Err(e) => tracing::warn!("⚠️ Could not confirm deal {}: {}", reference, e),
            }
        }

        Ok(OrderResult {
            deal_reference: data.deal_reference,
            deal_id,
        })
    }

    /// Close an open position; returns the closing deal reference
    pub async fn close_position(&self, deal_id: &str) -> BrokerResult<Option<String>> {
        tracing::info!("🗑️ Closing position {}...", deal_id);
        let path = format!("/api/v1/positions/{}", deal_id);
        let response = self.send(Method::DELETE, &path, &[], None).await?;
        let data: DealReferenceResponse = ensure_success(response).await?.json().await?;
        tracing::info!("✅ Position closed: {:?}", data.deal_reference);
        Ok(data.deal_reference)
    }

    /// Amend stop / limit levels on an open position
    pub async fn update_position(
        &self,
        deal_id: &str,
        update: &PositionUpdate,
    ) -> BrokerResult<Option<String>> {
        let path = format!("/api/v1/positions/{}", deal_id);
        let payload = serde_json::to_value(update).unwrap_or_else(|_| json!({}));
        let response = self.send(Method::PUT, &path, &[], Some(&payload)).await?;
        let data: DealReferenceResponse = ensure_success(response).await?.json().await?;
        Ok(data.deal_reference)
    }
}

/// Configured id, else preferred, else first
fn pick_account<'a>(accounts: &'a [Account], wanted: Option<&str>) -> Option<&'a Account> {
    if let Some(id) = wanted {
        if let Some(account) = accounts.iter().find(|a| a.account_id == id) {
            return Some(account);
        }
        tracing::warn!("⚠️ Account {} not found, using preferred", id);
    }

    accounts
        .iter()
        .find(|a| a.preferred)
        .or_else(|| accounts.first())
}
