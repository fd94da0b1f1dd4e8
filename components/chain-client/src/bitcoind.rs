use std::str::FromStr;
use std::thread::sleep;
use std::time::Duration;

use bitcoin::{Block, BlockHash, Transaction, Txid};
use bitcoincore_rpc::{Auth, Client, Error as RpcError, RpcApi};
use cbrc20_config::ChainConfig;
use cbrc20_context::{try_error, try_info, Context};

use crate::{ChainClient, ChainClientError, FeeEstimate, FeeEstimateMode};

fn map_rpc_error(e: RpcError) -> ChainClientError {
    let msg = e.to_string();
    if msg.contains("shutting down") || msg.contains("Shutdown") {
        ChainClientError::Interrupted
    } else if msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("Connection")
        || msg.contains("broken pipe")
    {
        ChainClientError::Transient(msg)
    } else {
        ChainClientError::Internal(msg)
    }
}

/// Builds a `bitcoincore_rpc::Client`, retrying the connection attempt
/// forever (the node may still be starting up).
fn connect_with_retry(config: &ChainConfig, ctx: &Context) -> Client {
    loop {
        let auth = Auth::UserPass(config.username.clone(), config.password.clone());
        match Client::new(&config.url, auth) {
            Ok(client) => return client,
            Err(e) => {
                try_error!(ctx, "bitcoind: unable to build rpc client: {}", e.to_string());
                sleep(Duration::from_secs(1));
            }
        }
    }
}

pub struct BitcoinRpcClient {
    client: Client,
    ctx: Context,
}

impl BitcoinRpcClient {
    pub fn new(config: &ChainConfig, ctx: Context) -> Self {
        let client = connect_with_retry(config, &ctx);
        try_info!(ctx, "bitcoind: connected to {}", config.url);
        BitcoinRpcClient { client, ctx }
    }
}

impl ChainClient for BitcoinRpcClient {
    fn get_block_count(&self) -> Result<u64, ChainClientError> {
        self.client.get_block_count().map_err(map_rpc_error)
    }

    fn get_block_hash(&self, height: u64) -> Result<BlockHash, ChainClientError> {
        let hash = self.client.get_block_hash(height).map_err(map_rpc_error)?;
        // bitcoincore-rpc pins its own copy of the `bitcoin` crate, which can
        // diverge from our workspace's version; hex is the stable interop
        // boundary between the two.
        BlockHash::from_str(&hash.to_string())
            .map_err(|e| ChainClientError::Internal(format!("invalid block hash: {e}")))
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Block, ChainClientError> {
        let raw = self
            .client
            .get_block_hex(&bitcoincore_rpc::bitcoin::BlockHash::from_str(&hash.to_string())
                .map_err(|e| ChainClientError::Internal(format!("invalid block hash: {e}")))?)
            .map_err(map_rpc_error)?;
        let bytes = hex::decode(raw)
            .map_err(|e| ChainClientError::Internal(format!("invalid block hex: {e}")))?;
        bitcoin::consensus::deserialize(&bytes)
            .map_err(|e| ChainClientError::Internal(format!("block decode failed: {e}")))
    }

    fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, ChainClientError> {
        let raw = bitcoin::consensus::serialize(tx);
        let txid = self
            .client
            .send_raw_transaction(raw.as_slice())
            .map_err(map_rpc_error)?;
        Txid::from_str(&txid.to_string())
            .map_err(|e| ChainClientError::Internal(format!("invalid txid: {e}")))
    }

    fn estimate_smart_fee(
        &self,
        conf_target: u16,
        mode: FeeEstimateMode,
    ) -> Result<FeeEstimate, ChainClientError> {
        let rpc_mode = match mode {
            FeeEstimateMode::Conservative => bitcoincore_rpc::json::EstimateMode::Conservative,
        };
        let result = self
            .client
            .estimate_smart_fee(conf_target, Some(rpc_mode))
            .map_err(map_rpc_error)?;
        Ok(FeeEstimate {
            sat_per_vbyte: result
                .fee_rate
                .map(|amount| amount.to_sat() as f64 / 1000.0),
        })
    }

    fn update_save_points(&self, _height: u64) -> Result<(), ChainClientError> {
        Ok(())
    }
}
