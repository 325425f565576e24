use aitrader::config::Settings;
use aitrader::db::PostgresPersistence;
use aitrader::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("aitrader=warn")
        .init();

    let settings = Settings::load(None)?;
    let db = PostgresPersistence::connect(settings.database_url()?).await?;

    println!("\n📋 Tables:");
    for table in db.list_tables().await? {
        println!("  - {}", table);
    }

    println!("\n🔍 bot_operations columns:");
    let columns = db.table_columns("bot_operations").await?;
    if columns.is_empty() {
        println!("  ❌ bot_operations does not exist");
    }
    for c in &columns {
        let nullable = if c.nullable { "NULL" } else { "NOT NULL" };
        println!("  {:<28} {:<28} {}", c.name, c.data_type, nullable);
    }

    println!("\n📊 Record counts:");
    for (table, count) in db.table_counts().await {
        match count {
            Some(n) => println!("  {:<22} {:>8}", table, n),
            None => println!("  {:<22} {:>8}", table, "missing"),
        }
    }

    Ok(())
}
