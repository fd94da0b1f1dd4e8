use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::Network;
use cbrc20_chain_client::ChainClient;
use cbrc20_config::Config;
use cbrc20_context::{try_error, try_info, try_warn, Context};
use cbrc20_store::{order_store, IndexerStore, OrderStore};

use crate::error::CoreError;
use crate::metrics::Metrics;
use crate::{fetcher, finalizer, processor};

/// Top-level runner wiring the block-processing pipeline and the
/// reveal-finalizer loop against a shared chain client and store: one
/// struct owning every long-lived handle the process needs, with a
/// single `run` entrypoint.
pub struct Service {
    config: Config,
    client: Arc<dyn ChainClient>,
    store: OrderStore,
    indexer: IndexerStore,
    ctx: Context,
    interrupt: Arc<AtomicBool>,
    metrics: Option<Metrics>,
}

impl Service {
    pub fn new(
        config: Config,
        client: Arc<dyn ChainClient>,
        store: OrderStore,
        indexer: IndexerStore,
        ctx: Context,
    ) -> Self {
        let metrics = if config.server.prometheus {
            Some(Metrics::new())
        } else {
            None
        };
        Service {
            config,
            client,
            store,
            indexer,
            ctx,
            interrupt: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    /// Signals every running loop to stop at its next opportunity.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Runs the finalizer loop and the block-processing loop until either
    /// interrupted or a fatal error (`DetectReorg`) is hit. The finalizer
    /// runs on a dedicated background thread driving async work via
    /// `hiro_system_kit::nestable_block_on`, joined at the end.
    pub async fn run(&mut self) -> Result<(), CoreError> {
        if let Some(metrics) = &self.metrics {
            let registry = metrics.registry.clone();
            let port = self.config.server.prometheus_port;
            let ctx = self.ctx.clone();
            tokio::spawn(crate::metrics::start_serving(port, registry, ctx));
        }

        let finalizer_handle = {
            let store = self.store.clone();
            let indexer = self.indexer.clone();
            let interrupt = self.interrupt.clone();
            let ctx = self.ctx.clone();
            let metrics = self.metrics.clone();
            std::thread::Builder::new()
                .name("cbrc20-finalizer".into())
                .spawn(move || {
                    hiro_system_kit::nestable_block_on(finalizer::run(store, indexer, interrupt, ctx, metrics));
                })
                .expect("unable to spawn finalizer thread")
        };

        let result = self.run_processing_loop().await;

        self.interrupt.store(true, Ordering::SeqCst);
        let _ = finalizer_handle.join();
        result
    }

    async fn run_processing_loop(&mut self) -> Result<(), CoreError> {
        let network = self.config.server.network;
        let anchor_retention = self.config.fetch.anchor_retention;
        let mut height = self.resume_height().await?;

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return Ok(());
            }

            let chain_tip = match self.client.get_block_count() {
                Ok(tip) => tip,
                Err(e) => {
                    try_warn!(self.ctx, "service: get_block_count failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };
            if height > chain_tip {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            let end = chain_tip.min(height + self.config.fetch.window as u64 - 1);
            let fetch = fetcher::fetch_range(
                self.client.clone(),
                height,
                end,
                self.config.fetch.window,
                self.config.fetch.workers,
                self.ctx.clone(),
                self.metrics.clone(),
            );

            let mut next_height = height;
            loop {
                let msg = match fetch.blocks_rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                };
                if msg.height != next_height {
                    // Out-of-order delivery would be a fetcher bug; skip
                    // rather than corrupt the undo log with a mismatched
                    // height.
                    try_error!(
                        self.ctx,
                        "service: fetcher delivered height {} out of order (expected {})",
                        msg.height,
                        next_height
                    );
                    continue;
                }

                match processor::process_block(
                    &self.store,
                    &*self.client,
                    network,
                    anchor_retention,
                    msg.height,
                    &msg.block,
                    &self.ctx,
                    self.metrics.as_ref(),
                )
                .await
                {
                    Ok(resume_at) => {
                        next_height = resume_at;
                    }
                    Err(CoreError::Recoverable { height, depth }) => {
                        fetch.shutdown();
                        fetch.join();
                        next_height = self.handle_reorg(height, depth).await?;
                        break;
                    }
                    Err(CoreError::DetectReorg) => {
                        fetch.shutdown();
                        fetch.join();
                        try_error!(self.ctx, "service: reorg deeper than retained anchors, aborting");
                        return Err(CoreError::DetectReorg);
                    }
                    Err(CoreError::Interrupted) => {
                        fetch.shutdown();
                        fetch.join();
                        return Ok(());
                    }
                    Err(e) => {
                        try_warn!(self.ctx, "service: process_block({}) failed: {}, retrying in 5s", msg.height, e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
            fetch.join();
            height = next_height;
        }
    }

    async fn handle_reorg(&self, tip_height: u64, depth: u64) -> Result<u64, CoreError> {
        let client = self.store.client().await?;
        let resume_from = order_store::handle_reorg(tip_height as i64, depth as i64, &client).await?;
        if let Some(metrics) = &self.metrics {
            metrics.reorgs_handled.inc();
        }
        try_info!(self.ctx, "service: rolled back reorg of depth {} to height {}", depth, resume_from);
        Ok(resume_from as u64)
    }

    async fn resume_height(&self) -> Result<u64, CoreError> {
        let client = self.store.client().await?;
        match order_store::last_anchor(&client).await? {
            Some(anchor) => Ok(anchor.height as u64 + 1),
            None => Ok(self.config.chain.start_height as u64),
        }
    }
}

/// Network accessor kept separate from `Config` so `facade` operations
/// that only need the network don't have to depend on the whole config.
pub fn network_of(config: &Config) -> Network {
    config.server.network
}
