use aitrader::api::CapitalClient;
use aitrader::config::Settings;
use aitrader::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Print open positions per account")]
struct Args {
    /// Account to inspect (repeatable); all accounts when omitted
    #[arg(long = "account-id")]
    account_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("aitrader=warn")
        .init();

    let args = Args::parse();
    let settings = Settings::load(None)?;
    let client = CapitalClient::connect(settings.credentials()?).await?;

    let accounts = client.list_accounts().await?;
    let selected: Vec<_> = if args.account_ids.is_empty() {
        accounts.iter().collect()
    } else {
        args.account_ids
            .iter()
            .filter_map(|id| {
                let found = accounts.iter().find(|a| &a.account_id == id);
                if found.is_none() {
                    eprintln!("Account {} not found", id);
                }
                found
            })
            .collect()
    };

    for account in selected {
        println!("{}", "=".repeat(60));
        println!("{} ({})", account.account_name, account.account_id);
        println!("{}", "=".repeat(60));

        client.switch_to_account(account).await?;
        let positions = client.open_positions().await?;

        if positions.is_empty() {
            println!("  No open positions");
        }
        for p in &positions {
            println!(
                "  {} {} | Size: {} | Entry: {:.2} | PnL: {:.2} ({:.2}%)",
                p.epic,
                p.direction,
                p.size,
                p.entry_price,
                p.upl,
                p.pnl_percent().unwrap_or(0.0)
            );
        }
        println!();
    }

    Ok(())
}
