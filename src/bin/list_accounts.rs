use aitrader::api::CapitalClient;
use aitrader::config::Settings;
use aitrader::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("aitrader=warn")
        .init();

    let settings = Settings::load(None)?;
    let client = CapitalClient::connect(settings.credentials()?).await?;
    let accounts = client.list_accounts().await?;
    let active = client.active_account_id().await;

    println!("\n═══════════════════════════════════════════════════════");
    println!("                 CAPITAL.COM ACCOUNTS");
    println!("═══════════════════════════════════════════════════════\n");

    if accounts.is_empty() {
        println!("No accounts found");
        return Ok(());
    }

    for account in &accounts {
        let mut flags = Vec::new();
        if account.preferred {
            flags.push("preferred");
        }
        if active.as_deref() == Some(account.account_id.as_str()) {
            flags.push("active");
        }

        println!("{} ({})", account.account_name, account.account_id);
        println!(
            "  Balance:   {:.2} {}",
            account.balance.balance, account.currency
        );
        println!(
            "  Available: {:.2} {}",
            account.balance.available, account.currency
        );
        if !flags.is_empty() {
            println!("  [{}]", flags.join(", "));
        }
        println!();
    }

    println!("Set CAPITAL_ACCOUNT_ID to trade on a specific account.");
    Ok(())
}
