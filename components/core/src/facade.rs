use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::secp256k1::SecretKey;
use cbrc20_chain_client::{ChainClient, FeeEstimateMode};
use cbrc20_inscription::{build_deploy_order, DeployOrderParams};
use cbrc20_store::order_store::{self, NewOrder};
use cbrc20_store::{InscribeOrder, OrderStore};

use crate::error::CoreError;
use crate::metrics::Metrics;

/// Request parameters for `create_deploy_order`. Mirrors
/// `DeployOrderParams` minus the `network`, which the façade supplies from
/// server config so callers never need to know it.
#[derive(Debug, Clone)]
pub struct CreateDeployOrderParams {
    pub ticker: String,
    pub total_supply: String,
    pub limit_per_mint: String,
    pub l2_network: String,
    pub contract: String,
    pub receive_address: String,
    pub postage: u64,
    pub fee_rate: u64,
}

/// Builds the reveal inscription, persists the resulting order in
/// `Default` status, and returns it. The caller funds `reveal_address`
/// with at least `reveal_tx_value` to move the order forward.
pub async fn create_deploy_order(
    store: &OrderStore,
    network: bitcoin::Network,
    params: &CreateDeployOrderParams,
    metrics: Option<&Metrics>,
) -> Result<InscribeOrder, CoreError> {
    let built = build_deploy_order(&DeployOrderParams {
        ticker: params.ticker.clone(),
        total_supply: params.total_supply.clone(),
        limit_per_mint: params.limit_per_mint.clone(),
        l2_network: params.l2_network.clone(),
        contract: params.contract.clone(),
        receive_address: params.receive_address.clone(),
        postage: params.postage,
        fee_rate: params.fee_rate,
        network,
    })?;

    let created_at_ms = now_ms();
    let client = store.client().await?;
    let order = order_store::create_order(
        &NewOrder {
            reveal_address: built.reveal_address.to_string(),
            reveal_pri_key: hex::encode(secret_key_bytes(&built.ephemeral_sk)),
            reveal_tx_raw: hex::encode(&built.reveal_tx_raw),
            reveal_tx_value: built.reveal_tx_value as i64,
            receive_address: params.receive_address.clone(),
            created_at_ms,
        },
        &client,
    )
    .await?;
    if let Some(metrics) = metrics {
        metrics.orders_created.inc();
    }
    Ok(order)
}

/// Looks up an order's current state by its public order id.
pub async fn get_order_status(
    store: &OrderStore,
    order_id: &str,
) -> Result<InscribeOrder, CoreError> {
    let client = store.client().await?;
    order_store::get_by_order_id(order_id, &client)
        .await?
        .ok_or(CoreError::NotFound)
}

/// Newest-first paged listing of every order a receive address has opened.
pub async fn list_orders_by_receive_address(
    store: &OrderStore,
    receive_address: &str,
    page: i64,
    limit: i64,
) -> Result<(Vec<InscribeOrder>, i64), CoreError> {
    let client = store.client().await?;
    Ok(order_store::find_orders_by_receive_address(receive_address, page, limit, &client).await?)
}

/// `GET /estimate-smart-fee` response body: fee rates expressed in
/// satoshis scaled as if a BTC amount (x10^8), matching bitcoind's own
/// BTC/kvB-denominated `estimatesmartfee` output rather than converting
/// to a plain sat/vB rate.
#[derive(Debug, Clone, Copy)]
pub struct FeeEstimateResult {
    pub fast: f64,
    pub normal: f64,
    pub slow: f64,
}

const FEE_ESTIMATE_BLOCKS_FAST: u16 = 10;
const FEE_ESTIMATE_BLOCKS_NORMAL: u16 = 20;
const FEE_ESTIMATE_BLOCKS_SLOW: u16 = 30;
/// Undoes `ChainClient::estimate_smart_fee`'s BTC/kvB -> sat/vB division
/// so this result carries the raw satoshi-scaled amount.
const SAT_PER_VBYTE_TO_SAT_SCALE: f64 = 1000.0;

/// Runs three conservative `estimatesmartfee` calls (10/20/30 blocks) in
/// parallel. `ChainClient` is a blocking trait, so each call runs on its
/// own blocking thread.
pub async fn estimate_smart_fee(client: Arc<dyn ChainClient>) -> Result<FeeEstimateResult, CoreError> {
    let (fast, normal, slow) = tokio::try_join!(
        estimate_one(client.clone(), FEE_ESTIMATE_BLOCKS_FAST),
        estimate_one(client.clone(), FEE_ESTIMATE_BLOCKS_NORMAL),
        estimate_one(client, FEE_ESTIMATE_BLOCKS_SLOW),
    )?;
    Ok(FeeEstimateResult { fast, normal, slow })
}

async fn estimate_one(client: Arc<dyn ChainClient>, conf_target: u16) -> Result<f64, CoreError> {
    tokio::task::spawn_blocking(move || {
        client.estimate_smart_fee(conf_target, FeeEstimateMode::Conservative)
    })
    .await
    .map_err(|e| CoreError::Internal(format!("estimate_smart_fee task panicked: {e}")))?
    .map(|estimate| estimate.sat_per_vbyte.unwrap_or(0.0) * SAT_PER_VBYTE_TO_SAT_SCALE)
    .map_err(CoreError::from)
}

fn secret_key_bytes(sk: &SecretKey) -> [u8; 32] {
    sk.secret_bytes()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}
