use aitrader::config::Settings;
use aitrader::db::{average_interval_minutes, PostgresPersistence};
use aitrader::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Summarise trading results from the journal")]
struct Args {
    /// Look-back window in days
    #[arg(long, default_value_t = 3)]
    days: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("aitrader=warn")
        .init();

    let args = Args::parse();
    let settings = Settings::load(None)?;
    let db = PostgresPersistence::connect(settings.database_url()?).await?;

    println!("\n═══════════════════════════════════════════════════════");
    println!("        PERFORMANCE: LAST {} DAYS", args.days);
    println!("═══════════════════════════════════════════════════════\n");

    let days = db.daily_performance(args.days).await?;
    if days.is_empty() {
        println!("No closed trades in this window");
    } else {
        println!(
            "{:<12} {:>7} {:>12} {:>6} {:>7} {:>9}",
            "Day", "Trades", "PnL", "Wins", "Losses", "Win rate"
        );
        for d in &days {
            println!(
                "{:<12} {:>7} {:>12.2} {:>6} {:>7} {:>8.1}%",
                d.day, d.trades, d.total_pnl, d.wins, d.losses, d.win_rate()
            );
        }
        let total: f64 = days.iter().map(|d| d.total_pnl).sum();
        let trades: i64 = days.iter().map(|d| d.trades).sum();
        println!("\nTotal: {} trades, PnL {:.2}", trades, total);
    }

    println!("\n🤖 Operations by day:");
    let ops = db.operations_by_day(args.days).await?;
    if ops.is_empty() {
        println!("  No operations recorded");
    }
    for op in &ops {
        println!("  {}  {:<6} {:>5}", op.day, op.operation, op.count);
    }

    println!("\n⏱️  Last 24 hours:");
    let times = db.operation_timestamps(24).await?;
    println!("  Operations: {}", times.len());
    match average_interval_minutes(&times) {
        Some(avg) => println!("  Average interval: {:.1} min", avg),
        None => println!("  Average interval: n/a"),
    }

    Ok(())
}
