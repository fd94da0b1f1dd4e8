#[macro_use]
extern crate hiro_system_kit;

pub mod bitcoind;

use bitcoin::{Block, BlockHash, Transaction, Txid};

/// Errors a `ChainClient` adapter can surface. `Transient` and
/// `Interrupted` are the only variants the core's retry/shutdown logic
/// inspects; everything else collapses to `Internal`.
#[derive(Debug, Clone)]
pub enum ChainClientError {
    Transient(String),
    Interrupted,
    Internal(String),
}

impl std::fmt::Display for ChainClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainClientError::Transient(e) => write!(f, "transient chain client error: {e}"),
            ChainClientError::Interrupted => write!(f, "chain client interrupted"),
            ChainClientError::Internal(e) => write!(f, "chain client error: {e}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FeeEstimateMode {
    Conservative,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeeEstimate {
    /// Fee rate in sat/vB, if the node had enough data to produce one.
    pub sat_per_vbyte: Option<f64>,
}

/// Thin contract over a Bitcoin-node JSON-RPC endpoint. Blocking by
/// design (mirrors `bitcoincore-rpc`'s synchronous `RpcApi`); callers
/// running inside async tasks are expected to invoke it from a blocking
/// context (a dedicated OS thread, or `tokio::task::spawn_blocking`).
pub trait ChainClient: Send + Sync {
    fn get_block_count(&self) -> Result<u64, ChainClientError>;
    fn get_block_hash(&self, height: u64) -> Result<BlockHash, ChainClientError>;
    fn get_block(&self, hash: &BlockHash) -> Result<Block, ChainClientError>;
    fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, ChainClientError>;
    fn estimate_smart_fee(
        &self,
        conf_target: u16,
        mode: FeeEstimateMode,
    ) -> Result<FeeEstimate, ChainClientError>;

    /// Optional hook to advance the node's own prune/save anchor. Most
    /// nodes have no such contract; the default is a no-op.
    fn update_save_points(&self, _height: u64) -> Result<(), ChainClientError> {
        Ok(())
    }
}
