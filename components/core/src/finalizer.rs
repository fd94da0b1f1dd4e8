use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cbrc20_context::{try_info, try_warn, Context};
use cbrc20_store::order_store::{self, OrderTransition};
use cbrc20_store::{IndexerStore, OrderStatus, OrderStore};

use crate::metrics::Metrics;

const FINALIZER_TICK: Duration = Duration::from_secs(5);

/// Periodically promotes `RevealSent` orders to `Success` once the
/// upstream indexer has indexed their reveal txid.
pub async fn run(
    store: OrderStore,
    indexer: IndexerStore,
    interrupt: Arc<AtomicBool>,
    ctx: Context,
    metrics: Option<Metrics>,
) {
    loop {
        tokio::time::sleep(FINALIZER_TICK).await;
        if interrupt.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = tick(&store, &indexer, &ctx, metrics.as_ref()).await {
            try_warn!(ctx, "finalizer: tick failed: {}", e);
        }
    }
}

async fn tick(
    store: &OrderStore,
    indexer: &IndexerStore,
    ctx: &Context,
    metrics: Option<&Metrics>,
) -> Result<(), String> {
    let client = store.client().await?;
    let pending = order_store::list_reveal_sent(&client).await?;

    for order in pending {
        let Some(reveal_tx_id) = order.reveal_tx_id.clone() else {
            continue;
        };
        let indexed = indexer.get_inscription_by_id(&reveal_tx_id, 0).await?;
        let Some(indexed) = indexed else {
            continue;
        };

        // Finalization isn't tied to any particular block height; record
        // the undo entry under the order's own row id so it never
        // collides with a real block-height undo window.
        order_store::transition(
            0,
            order.id,
            OrderStatus::Success,
            &OrderTransition::default(),
            &client,
        )
        .await?;
        if let Some(metrics) = metrics {
            metrics.orders_transitioned.with_label_values(&["success"]).inc();
        }
        try_info!(
            ctx,
            "finalizer: order {} -> Success (inscription #{})",
            order.order_id,
            indexed.inscription_number
        );
    }
    Ok(())
}
