use tokio::time::{sleep, Duration};

use crate::api::{BrokerError, CapitalClient, OrderRequest, SymbolMap};
use crate::db::PostgresPersistence;
use crate::models::{Direction, Operation, ProposedAction};

const RESYNC_DELAY_MS: u64 = 500;
const SIZE_DECIMALS: i32 = 4;

/// What happened when a decision was carried out
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Hold,
    Closed {
        deal_id: String,
        deal_reference: Option<String>,
    },
    Opened {
        epic: String,
        direction: Direction,
        size: f64,
        price: f64,
        deal_reference: Option<String>,
        deal_id: Option<String>,
    },
    Skipped { reason: String },
    DryRun { description: String },
    Rejected { reason: String },
}

impl ExecutionResult {
    /// Short status stored with the journaled operation
    pub fn status(&self) -> &'static str {
        match self {
            ExecutionResult::Hold => "hold",
            ExecutionResult::Closed { .. } => "closed",
            ExecutionResult::Opened { .. } => "opened",
            ExecutionResult::Skipped { .. } => "skipped",
            ExecutionResult::DryRun { .. } => "dry_run",
            ExecutionResult::Rejected { .. } => "rejected",
        }
    }
}

/// Units to trade for `portion` of `balance` at `leverage`, at least `min_size`
pub fn position_size(balance: f64, portion: f64, leverage: u32, price: f64, min_size: f64) -> f64 {
    let notional = balance * portion * leverage as f64;
    let size = (notional / price).max(min_size);
    let factor = 10f64.powi(SIZE_DECIMALS);
    (size * factor).round() / factor
}

/// Carry out a (guard-checked) decision against the broker
///
/// Journal writes are best effort: failures are logged and never undo a
/// broker action that already happened.
pub async fn execute_signal(
    client: &CapitalClient,
    symbols: &SymbolMap,
    journal: Option<&PostgresPersistence>,
    action: &ProposedAction,
    dry_run: bool,
) -> Result<ExecutionResult, BrokerError> {
    let epic = symbols.to_epic(&action.symbol);

    match action.operation {
        Operation::Hold => {
            tracing::info!("⏸️ HOLD: no action for {}", action.symbol);
            Ok(ExecutionResult::Hold)
        }
        Operation::Close => close(client, symbols, journal, action, &epic, dry_run).await,
        Operation::Open => open(client, journal, action, &epic, dry_run).await,
    }
}

async fn close(
    client: &CapitalClient,
    symbols: &SymbolMap,
    journal: Option<&PostgresPersistence>,
    action: &ProposedAction,
    epic: &str,
    dry_run: bool,
) -> Result<ExecutionResult, BrokerError> {
    let positions = client.open_positions().await?;
    let Some(position) = symbols.find_position(&positions, epic) else {
        tracing::warn!("⚠️ No open position for {}", action.symbol);
        return Ok(ExecutionResult::Skipped {
            reason: format!("no open position for {}", action.symbol),
        });
    };

    if dry_run {
        return Ok(ExecutionResult::DryRun {
            description: format!("close {} ({})", epic, position.deal_id),
        });
    }

    let deal_reference = client.close_position(&position.deal_id).await?;
    tracing::info!("✅ Position {} closed", action.symbol);

    if let Some(db) = journal {
        if let Err(e) = db.log_trade_close(position, &action.reason).await {
            tracing::warn!("⚠️ Failed to record closed trade: {}", e);
        }
    }
    resync(client, journal).await;

    Ok(ExecutionResult::Closed {
        deal_id: position.deal_id.clone(),
        deal_reference,
    })
}

async fn open(
    client: &CapitalClient,
    journal: Option<&PostgresPersistence>,
    action: &ProposedAction,
    epic: &str,
    dry_run: bool,
) -> Result<ExecutionResult, BrokerError> {
    let account = client.account_status().await?;
    if account.balance <= 0.0 {
        return Ok(ExecutionResult::Rejected {
            reason: "no balance available".to_string(),
        });
    }

    let market = client.market_info(epic).await?;
    let price = match action.direction {
        Direction::Long => market.offer,
        Direction::Short => market.bid,
    };
    let Some(price) = price.filter(|p| *p > 0.0) else {
        return Ok(ExecutionResult::Rejected {
            reason: format!("no price available for {}", epic),
        });
    };

    let size = position_size(
        account.balance,
        action.target_portion_of_balance,
        action.leverage,
        price,
        market.min_deal_size,
    );

    tracing::info!(
        "📊 {} {} {} @ {:.2} (notional {:.2}, leverage {}x)",
        action.direction.order_side(),
        size,
        epic,
        price,
        account.balance * action.target_portion_of_balance * action.leverage as f64,
        action.leverage
    );

    if dry_run {
        return Ok(ExecutionResult::DryRun {
            description: format!("{} {} {} @ {}", action.direction.order_side(), size, epic, price),
        });
    }

    let result = client
        .execute_order(&OrderRequest::market(epic, action.direction, size))
        .await?;

    sleep(Duration::from_millis(RESYNC_DELAY_MS)).await;
    resync(client, journal).await;

    Ok(ExecutionResult::Opened {
        epic: epic.to_string(),
        direction: action.direction,
        size,
        price,
        deal_reference: result.deal_reference,
        deal_id: result.deal_id,
    })
}

async fn resync(client: &CapitalClient, journal: Option<&PostgresPersistence>) {
    let Some(db) = journal else {
        return;
    };
    let synced = match client.open_positions().await {
        Ok(positions) => db.sync_real_positions(&positions).await,
        Err(e) => Err(e.into()),
    };
    match synced {
        Ok(n) => tracing::info!("🔄 real_positions synced ({} positions)", n),
        Err(e) => tracing::warn!("⚠️ Failed to sync real_positions: {}", e),
    }
}
