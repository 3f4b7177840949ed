use std::time::Duration;

use dotenv::dotenv;
use sequencer_core::{Sequencer, SequencerConfig, Step};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SequencerConfig::from_env()?;
    let sequencer = Sequencer::tokio(config)?;

    sequencer.subscribe_errors(|err| {
        warn!(unit = err.unit().unwrap_or("<unknown>"), "step failed, carrying on: {}", err);
    });

    // blocking setup step
    sequencer.sync(|_| Ok(Step::value("config loaded")), Some("setup"))?;

    // fetches fan out and settle in whatever order they finish
    for (name, delay) in [("fetch_users", 60), ("fetch_orders", 30), ("fetch_stock", 45)] {
        sequencer.asynchronous(
            move |next| {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    next.complete_with(serde_json::json!({ "source": name, "took_ms": delay }));
                });
                Ok(Step::Suspend)
            },
            Some(name),
        )?;
    }

    let indexing = sequencer.group(Some("indexing"))?;
    for shard in 0..3u64 {
        indexing.asynchronous(
            move |next| {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10 * (shard + 1))).await;
                    next.complete_with(shard);
                });
                Ok(Step::Suspend)
            },
            None,
        )?;
    }

    sequencer.sync(|_| Err(anyhow::anyhow!("report template missing")), Some("report"))?;
    sequencer.sync(
        |next| {
            info!("earlier blocking steps have settled, publishing");
            next.complete_with("published");
            Ok(Step::Suspend)
        },
        Some("publish"),
    )?;

    let results = sequencer.run().await?;
    info!(indexed_shards = indexing.result().len(), "sequence finished");
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}
