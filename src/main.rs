use anyhow::{Context, Result};
use clap::Parser;
use dbbridge::native::{DriverOp, LoopbackDriver};
use dbbridge::{BridgeClient, BridgeConfig, CacheManager, HandleKind, SessionRequest};
use std::path::PathBuf;

/// Run the nested-transaction scenario against the in-process remote server
#[derive(Parser, Debug)]
#[command(name = "dbbridge", version, about)]
struct Args {
    /// Connect string of the remote endpoint
    #[arg(long, default_value = "orcl")]
    endpoint: String,

    #[arg(long, default_value = "scott")]
    user: String,

    #[arg(long, default_value = "tiger")]
    password: String,

    /// Locale key; the configured default when omitted
    #[arg(long)]
    locale: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Kill the session before the first transaction starts, with this remote code
    #[arg(long)]
    kill_code: Option<i32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    let mut driver = LoopbackDriver::new().with_account(&args.user, &args.password);
    if let Some(code) = args.kill_code {
        driver.fail_next(DriverOp::StartTransaction, code, "your session has been killed");
    }
    let client = BridgeClient::from_cache(CacheManager::with_config(driver, config)?);

    let mut request = SessionRequest::new(&args.endpoint, &args.user, &args.password)
        .table_context("demo");
    if let Some(locale) = &args.locale {
        request = request.locale(locale);
    }

    let sref = client.acquire_session(&request).await?;
    println!("session acquired, level {}", client.xact_level(&sref).await?);

    let sref = client.acquire_session(&request.clone().nest_level(1)).await?;
    println!("transaction started, level {}", client.xact_level(&sref).await?);

    client.begin_or_advance(&sref, 2).await?;
    let lob = client.allocate_handle(&sref, HandleKind::LobLocator).await?;
    println!("savepoint set, level {}, allocated {}", client.xact_level(&sref).await?, lob);

    client.subtransaction_end(2, false).await?;
    println!("nested block rolled back, level {}", client.xact_level(&sref).await?);

    client.top_level_end(true).await?;
    println!("committed, level {}", client.xact_level(&sref).await?);

    println!("{}", serde_json::to_string_pretty(&client.stats().await)?);

    client.shutdown().await;
    client
        .with_cache(|cache| {
            println!("remote calls:");
            for call in cache.driver().journal() {
                println!("  {:?}", call);
            }
        })
        .await;

    Ok(())
}
