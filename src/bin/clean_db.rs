use aitrader::config::Settings;
use aitrader::db::PostgresPersistence;
use aitrader::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};

#[derive(Parser, Debug)]
#[command(about = "Empty every journal table")]
struct Args {
    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,
}

async fn print_counts(db: &PostgresPersistence) -> i64 {
    let mut total = 0;
    for (table, count) in db.table_counts().await {
        match count {
            Some(n) => {
                println!("  {:<22} {:>8}", table, n);
                total += n;
            }
            None => println!("  {:<22} {:>8}", table, "missing"),
        }
    }
    total
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("aitrader=info")
        .init();

    let args = Args::parse();
    let settings = Settings::load(None)?;
    let db = PostgresPersistence::connect(settings.database_url()?).await?;

    println!("\n📊 Current record counts:");
    let total = print_counts(&db).await;
    println!("  {:<22} {:>8}\n", "TOTAL", total);

    if total == 0 {
        println!("✅ Database already empty");
        return Ok(());
    }

    if !args.yes {
        print!("⚠️  Delete ALL {} records? Type 'yes' to confirm: ", total);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if answer.trim().to_lowercase() != "yes" {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    let cleared = db.truncate_all().await?;
    println!("\n🧹 {} tables cleared\n", cleared);

    println!("📊 Record counts after cleanup:");
    let total = print_counts(&db).await;
    println!("  {:<22} {:>8}", "TOTAL", total);

    Ok(())
}
