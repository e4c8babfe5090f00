//! The `worker` command: one pass over the queue, or a polling loop.

use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::sync::watch;
use tracing::info;

use content_engine_publish::{PublishConfig, default_registry};
use content_engine_queue::{Store, Worker, WorkerConfig};

pub struct Options {
    pub continuous: bool,
    pub dry_run: bool,
    pub poll_interval: u64,
    pub linkedin_api: String,
}

pub async fn run(store: Arc<Store>, options: Options) -> Result<()> {
    let registry = default_registry(&PublishConfig {
        linkedin_api_base: options.linkedin_api,
    })
    .map_err(|e| miette::miette!("failed to set up publishers: {}", e))?;

    let worker = Worker::new(
        store,
        registry,
        WorkerConfig {
            dry_run: options.dry_run,
            poll_interval: Duration::from_secs(options.poll_interval),
        },
    );

    if !options.continuous {
        let report = worker
            .process_queue()
            .await
            .map_err(|e| miette::miette!("{}", e))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).map_err(|e| miette::miette!("{}", e))?
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    worker.run_continuous(shutdown_rx).await;
    Ok(())
}
