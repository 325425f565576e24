use aitrader::api::CapitalClient;
use aitrader::config::Settings;
use aitrader::Result;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("aitrader=info")
        .init();

    let settings = Settings::load(None)?;
    let client = CapitalClient::connect(settings.credentials()?).await?;

    let positions = client.open_positions().await?;
    if positions.is_empty() {
        println!("No open positions");
        return Ok(());
    }

    println!("Closing {} positions...\n", positions.len());
    let mut failed = 0;
    for p in &positions {
        match client.close_position(&p.deal_id).await {
            Ok(_) => println!("  ✅ {} {} (PnL {:.2})", p.epic, p.direction, p.upl),
            Err(e) => {
                failed += 1;
                println!("  ❌ {} {}: {}", p.epic, p.deal_id, e);
            }
        }
    }

    sleep(Duration::from_secs(2)).await;

    let remaining = client.open_positions().await?;
    if remaining.is_empty() {
        println!("\n✅ All positions closed");
    } else {
        println!("\n⚠️ {} positions still open:", remaining.len());
        for p in &remaining {
            println!("  {} {} size {}", p.epic, p.direction, p.size);
        }
    }

    if failed > 0 {
        return Err(format!("{} positions failed to close", failed).into());
    }
    Ok(())
}
