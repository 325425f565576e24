use aitrader::api::CapitalClient;
use aitrader::config::Settings;
use aitrader::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Close the open position on one instrument")]
struct Args {
    /// Ticker or epic, e.g. BTC or BTCUSD
    #[arg(long)]
    symbol: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("aitrader=info")
        .init();

    let args = Args::parse();
    let settings = Settings::load(None)?;
    let symbols = settings.symbol_map();
    let client = CapitalClient::connect(settings.credentials()?).await?;

    let positions = client.open_positions().await?;
    let Some(position) = symbols.find_position(&positions, &args.symbol) else {
        println!("No open position for {}", args.symbol);
        return Ok(());
    };

    println!(
        "Closing {} {} size {} (PnL {:.2})",
        position.epic, position.direction, position.size, position.upl
    );
    let reference = client.close_position(&position.deal_id).await?;
    println!("✅ Closed, deal reference {:?}", reference);

    Ok(())
}
