use anyhow::Context;
use env_logger::Env;
use std::sync::Arc;
use tallyho::{CounterAggregator, SqlGateway};

/// Recounts every community, post and comment from its source rows and
/// writes the results back.
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_lib_mods();
    tallyho::global::init()?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set.")?;
    let gateway = Arc::new(SqlGateway::connect(database_url).await?);
    if std::env::args().any(|arg| arg == "--create-schema") {
        gateway.create_schema().await?;
        log::info!("schema created");
    }

    let aggregator = CounterAggregator::new(gateway.clone());
    let targets = gateway.targets().await?;
    log::info!("reconciling {} targets", targets.len());

    let mut drifted = 0;
    let mut failed = 0;
    for target in targets {
        match aggregator.reconcile(target).await {
            Ok(reconciliation) if reconciliation.drifted() => drifted += 1,
            Ok(_) => {}
            Err(err) => {
                log::error!("failed to reconcile {}: {}", target, err);
                failed += 1;
            }
        }
    }

    log::info!("done: {} drifted, {} failed", drifted, failed);
    if failed > 0 {
        anyhow::bail!("{} targets could not be reconciled", failed);
    }
    Ok(())
}

/// Initialize third party crates we rely on but don't have control over.
fn init_lib_mods() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}
