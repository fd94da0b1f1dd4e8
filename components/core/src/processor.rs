use bitcoin::secp256k1::SecretKey;
use bitcoin::{Address, Block, Network};
use cbrc20_chain_client::ChainClient;
use cbrc20_context::{try_info, try_warn, Context};
use cbrc20_inscription::sign_reveal_tx;
use cbrc20_store::order_store::{self, OrderTransition};
use cbrc20_store::{BlockAnchor, OrderStatus, OrderStore};

use crate::error::CoreError;
use crate::metrics::Metrics;
use crate::reorg;

/// Processes one block within a single store transaction: reorg check,
/// output scan / reveal dispatch, anchor write + prune, height advance.
/// Returns the height to process next.
pub async fn process_block(
    store: &OrderStore,
    client: &dyn ChainClient,
    network: Network,
    anchor_retention: u32,
    height: u64,
    block: &Block,
    ctx: &Context,
    metrics: Option<&Metrics>,
) -> Result<u64, CoreError> {
    let block_hash = block.block_hash().to_string();
    let parent_hash = block.header.prev_blockhash.to_string();
    let metrics = metrics.cloned();

    store
        .transaction(move |tx| {
            let metrics = metrics.clone();
            Box::pin(async move {
                reorg::check(client, height, block, tx).await?;

                for txn in block.txdata.iter() {
                    'outputs: for (idx, out) in txn.output.iter().enumerate() {
                        let Ok(address) = Address::from_script(&out.script_pubkey, network) else {
                            continue;
                        };
                        let Some(order) =
                            order_store::find_open_by_reveal_address(&address.to_string(), tx).await?
                        else {
                            continue;
                        };

                        if out.value.to_sat() < order.reveal_tx_value as u64 {
                            try_warn!(
                                ctx,
                                "processor: order {} underfunded (got {}, need {})",
                                order.order_id,
                                out.value.to_sat(),
                                order.reveal_tx_value
                            );
                            order_store::transition(
                                height as i64,
                                order.id,
                                OrderStatus::FeeNotEnough,
                                &OrderTransition::default(),
                                tx,
                            )
                            .await?;
                            if let Some(metrics) = &metrics {
                                metrics.orders_transitioned.with_label_values(&["fee_not_enough"]).inc();
                            }
                        } else {
                            let reveal_tx_raw = hex::decode(&order.reveal_tx_raw)
                                .map_err(|e| format!("invalid reveal_tx_raw hex: {e}"))?;
                            let sk_bytes = hex::decode(&order.reveal_pri_key)
                                .map_err(|e| format!("invalid reveal_pri_key hex: {e}"))?;
                            let ephemeral_sk = SecretKey::from_slice(&sk_bytes)
                                .map_err(|e| format!("invalid reveal_pri_key: {e}"))?;

                            let signed =
                                sign_reveal_tx(&reveal_tx_raw, txn, idx as u32, &ephemeral_sk)?;
                            let broadcast_txid = client.send_raw_transaction(&signed)?;

                            try_info!(
                                ctx,
                                "processor: reveal sent for order {} txid {}",
                                order.order_id,
                                broadcast_txid
                            );

                            order_store::transition(
                                height as i64,
                                order.id,
                                OrderStatus::RevealSent,
                                &OrderTransition {
                                    reveal_tx_id: Some(broadcast_txid.to_string()),
                                    reveal_tx_raw: Some(hex::encode(bitcoin::consensus::serialize(&signed))),
                                    commit_tx_id: Some(txn.compute_txid().to_string()),
                                    tx_id: None,
                                    tx_offset: None,
                                },
                                tx,
                            )
                            .await?;
                            if let Some(metrics) = &metrics {
                                metrics.orders_transitioned.with_label_values(&["reveal_sent"]).inc();
                            }
                        }
                        // First matching output wins; ignore the rest of
                        // this transaction's outputs.
                        break 'outputs;
                    }
                }

                order_store::create_anchor(
                    &BlockAnchor {
                        height: height as i64,
                        block_hash: block_hash.clone(),
                        parent_hash: Some(parent_hash.clone()),
                    },
                    tx,
                )
                .await?;

                let threshold = height as i64 - anchor_retention as i64;
                if threshold > 0 {
                    order_store::delete_anchors_before(threshold, height as i64, tx).await?;
                }

                client.update_save_points(height)?;

                if let Some(metrics) = &metrics {
                    metrics.blocks_processed.inc();
                }
                Ok(height + 1)
            })
        })
        .await
}
