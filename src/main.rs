use aitrader::api::{CapitalClient, GeminiClient, SymbolMap};
use aitrader::config::Settings;
use aitrader::db::{ErrorLog, OperationLog, PostgresPersistence};
use aitrader::execution::{execute_signal, ExecutionResult};
use aitrader::forecast::{forecast_many, render_table, ForecastRow};
use aitrader::indicators::{analyze_tickers, TickerAnalysis};
use aitrader::models::{AccountSummary, OpenPositionSnapshot, ProposedAction};
use aitrader::prompt::{market_info_block, render_system_prompt};
use aitrader::risk::HoldGuard;
use aitrader::Result;
use clap::Parser;
use tokio::time::{interval_at, Duration, Instant};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "aitrader", about = "LLM-driven CFD crypto trading agent")]
struct Args {
    /// Repeat the cycle every N minutes (runs once when omitted)
    #[arg(long)]
    loop_minutes: Option<u64>,

    /// Compute everything and log the order, but never touch positions
    #[arg(long)]
    dry_run: bool,

    /// Config file (defaults to ./aitrader.toml when present)
    #[arg(long)]
    config: Option<String>,
}

/// Long-lived collaborators shared by every cycle
struct Agent {
    settings: Settings,
    broker: CapitalClient,
    gemini: GeminiClient,
    symbols: SymbolMap,
    guard: HoldGuard,
    journal: Option<PostgresPersistence>,
    dry_run: bool,
}

/// Everything gathered so far in a cycle, journaled if the cycle fails
struct CycleContext {
    id: Uuid,
    prompt: Option<String>,
    indicators: Vec<TickerAnalysis>,
    forecasts: Vec<ForecastRow>,
    account: Option<AccountSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref())?;
    let credentials = settings.credentials()?;
    let gemini = GeminiClient::new(
        settings.gemini_api_key()?.to_string(),
        Some(settings.gemini.model.clone()),
    )
    .with_symbols(&settings.tickers);

    tracing::info!("🚀 aitrader starting");
    tracing::info!("  Tickers: {}", settings.tickers.join(", "));
    tracing::info!("  Model: {}", gemini.model());
    tracing::info!(
        "  Guard: hold ≥ {} min, stop loss {}%, take profit {}%",
        settings.guard.min_hold_minutes,
        settings.guard.stop_loss_pct,
        settings.guard.take_profit_pct
    );
    if args.dry_run {
        tracing::info!("  🧪 Dry run: no orders will be sent");
    }

    tracing::info!("1️⃣ Connecting to Capital.com...");
    let broker = CapitalClient::connect(credentials).await?;
    tracing::info!("   ✅ Connected");

    let journal = connect_to_postgres(&settings).await;

    let agent = Agent {
        symbols: settings.symbol_map(),
        guard: HoldGuard::new(settings.guard.clone()),
        settings,
        broker,
        gemini,
        journal,
        dry_run: args.dry_run,
    };

    let Some(minutes) = args.loop_minutes.filter(|m| *m > 0) else {
        agent.run_cycle_logged().await;
        return Ok(());
    };

    let period = Duration::from_secs(minutes * 60);
    let mut ticker = interval_at(Instant::now(), period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tracing::info!("🔄 Running every {} min, press Ctrl+C to stop", minutes);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                agent.run_cycle_logged().await;
            }
        }
    }

    tracing::info!("👋 aitrader stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aitrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_to_postgres(settings: &Settings) -> Option<PostgresPersistence> {
    let database_url = match settings.database_url() {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("{}, continuing without journal", e);
            return None;
        }
    };

    match PostgresPersistence::new(database_url).await {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing without journal",
                e
            );
            None
        }
    }
}

impl Agent {
    /// Run one cycle; failures are logged and journaled, never propagated
    async fn run_cycle_logged(&self) {
        let mut ctx = CycleContext {
            id: Uuid::new_v4(),
            prompt: None,
            indicators: Vec::new(),
            forecasts: Vec::new(),
            account: None,
        };
        tracing::info!("🔁 Cycle {} started", ctx.id);

        match self.run_cycle(&mut ctx).await {
            Ok(result) => {
                tracing::info!("✅ Cycle {} complete ({})", ctx.id, result.status());
            }
            Err(e) => {
                tracing::error!("❌ Cycle {} failed: {}", ctx.id, e);
                self.journal_error(e.as_ref(), &ctx).await;
            }
        }
    }

    async fn run_cycle(&self, ctx: &mut CycleContext) -> Result<ExecutionResult> {
        let tickers = &self.settings.tickers;

        tracing::info!("2️⃣ Computing indicators for {:?}...", tickers);
        let (indicators_text, indicators) =
            analyze_tickers(&self.broker, &self.symbols, tickers).await;
        ctx.indicators = indicators;
        tracing::info!("   ✅ {} tickers analysed", ctx.indicators.len());

        tracing::info!("3️⃣ Forecasting...");
        ctx.forecasts = forecast_many(&self.broker, &self.symbols, tickers).await;
        let forecasts_text = render_table(&ctx.forecasts);
        tracing::info!("   ✅ {} forecast rows", ctx.forecasts.len());

        tracing::info!("4️⃣ Reading account status...");
        let account = self.broker.account_summary().await?;
        let portfolio_json = serde_json::to_string(&account)?;
        if let Some(db) = &self.journal {
            let snapshot_id = db.log_account_status(&account).await?;
            tracing::info!("   ✅ Snapshot saved with id={}", snapshot_id);
            let synced = db.sync_real_positions(&account.positions).await?;
            tracing::info!("   ✅ Synced {} real positions", synced);
        }
        let snapshots: Vec<OpenPositionSnapshot> =
            account.positions.iter().map(|p| p.to_snapshot()).collect();
        ctx.account = Some(account);

        tracing::info!("5️⃣ Preparing prompt...");
        let template = self.settings.load_system_prompt()?;
        let market_info = market_info_block(&indicators_text, &forecasts_text);
        let prompt = render_system_prompt(&template, &portfolio_json, &market_info);
        ctx.prompt = Some(prompt.clone());

        tracing::info!("6️⃣ Asking {} for a decision...", self.gemini.model());
        let proposed = self.gemini.decide(&prompt).await?;
        log_decision(&proposed);

        let matching = self.symbols.find_snapshot(&snapshots, &proposed.symbol);
        let outcome = self.guard.evaluate(proposed, matching);
        if !outcome.allowed {
            tracing::info!("   🛑 OVERRIDE: close -> hold to avoid overtrading");
        }
        let action = outcome.action;

        tracing::info!("7️⃣ Executing signal...");
        let result = execute_signal(
            &self.broker,
            &self.symbols,
            self.journal.as_ref(),
            &action,
            self.dry_run,
        )
        .await?;
        log_execution(&result);

        if let Some(db) = &self.journal {
            tracing::info!("8️⃣ Saving operation...");
            let op_id = db
                .log_bot_operation(&OperationLog {
                    action: &action,
                    system_prompt: &prompt,
                    indicators: &ctx.indicators,
                    forecasts: &ctx.forecasts,
                    execution_status: Some(result.status()),
                })
                .await?;
            tracing::info!("   ✅ Operation saved with id={}", op_id);
        }

        Ok(result)
    }

    async fn journal_error(
        &self,
        error: &(dyn std::error::Error + Send + Sync + 'static),
        ctx: &CycleContext,
    ) {
        let Some(db) = &self.journal else {
            return;
        };

        let context = serde_json::json!({
            "cycle_id": ctx.id.to_string(),
            "prompt": ctx.prompt,
            "tickers": self.settings.tickers,
            "indicators": ctx.indicators,
            "forecasts": ctx.forecasts,
            "balance": ctx.account,
        });
        let record = ErrorLog {
            error_type: error_type_name(error),
            message: error.to_string(),
            details: error.source().map(|s| s.to_string()),
            context,
            source: "trading_agent".to_string(),
        };

        if let Err(e) = db.log_error(&record).await {
            tracing::warn!("⚠️ Failed to journal error: {}", e);
        }
    }
}

fn error_type_name(error: &(dyn std::error::Error + Send + Sync + 'static)) -> String {
    use aitrader::api::{BrokerError, DecisionError};
    use aitrader::config::ConfigError;

    if error.is::<BrokerError>() {
        "BrokerError"
    } else if error.is::<DecisionError>() {
        "DecisionError"
    } else if error.is::<ConfigError>() {
        "ConfigError"
    } else if error.is::<sqlx::Error>() {
        "DatabaseError"
    } else if error.is::<serde_json::Error>() {
        "SerializationError"
    } else {
        "Error"
    }
    .to_string()
}

fn log_decision(action: &ProposedAction) {
    tracing::info!(
        "   🤖 {} {} {} (portion {:.2}, leverage {}x)",
        action.operation.as_str().to_uppercase(),
        action.symbol,
        action.direction.as_str(),
        action.target_portion_of_balance,
        action.leverage
    );
    tracing::info!("   💬 {}", action.reason);
}

fn log_execution(result: &ExecutionResult) {
    match result {
        ExecutionResult::Hold => tracing::info!("   ⏸️ Holding"),
        ExecutionResult::Closed { deal_id, .. } => tracing::info!("   ✅ Closed {}", deal_id),
        ExecutionResult::Opened {
            epic,
            direction,
            size,
            price,
            ..
        } => tracing::info!(
            "   ✅ Opened {} {} {} @ {:.2}",
            direction.order_side(),
            size,
            epic,
            price
        ),
        ExecutionResult::Skipped { reason } => tracing::warn!("   ⚠️ Skipped: {}", reason),
        ExecutionResult::DryRun { description } => {
            tracing::info!("   🧪 Dry run: would {}", description)
        }
        ExecutionResult::Rejected { reason } => tracing::warn!("   ❌ Rejected: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aitrader::api::BrokerError;
    use aitrader::config::ConfigError;

    #[test]
    fn test_error_type_name_from_boxed_error() {
        let broker: Box<dyn std::error::Error + Send + Sync> =
            Box::new(BrokerError::NoAccounts);
        assert_eq!(error_type_name(broker.as_ref()), "BrokerError");

        let config: Box<dyn std::error::Error + Send + Sync> =
            Box::new(ConfigError::Missing("GEMINI_API_KEY"));
        assert_eq!(error_type_name(config.as_ref()), "ConfigError");

        let other: Box<dyn std::error::Error + Send + Sync> = "boom".into();
        assert_eq!(error_type_name(other.as_ref()), "Error");
    }
}
