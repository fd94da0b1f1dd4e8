use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{sleep, JoinHandle};
use std::time::Duration;

use bitcoin::Block;
use cbrc20_chain_client::{ChainClient, ChainClientError};
use cbrc20_context::{try_error, try_warn, Context};

use crate::error::CoreError;
use crate::metrics::Metrics;

/// A block delivered by `BlockFetcher`, tagged with its height so the
/// consumer never has to recompute it from the block itself.
pub struct MsgBlock {
    pub height: u64,
    pub block: Block,
}

/// Seconds beyond which a computed backoff is logged as suspicious but
/// still honored in full.
const RETRY_BACKOFF_WARN_SECS: u64 = 120;

/// Handle onto a running fetch pipeline. Drop (or call `shutdown`) to
/// signal every worker to stop at the next opportunity; `join` waits for
/// them to actually exit.
pub struct FetchHandle {
    pub blocks_rx: crossbeam_channel::Receiver<MsgBlock>,
    interrupt: Arc<AtomicBool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl FetchHandle {
    pub fn shutdown(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        // Drain so workers blocked on a full channel can observe the
        // interrupt flag and return instead of stalling forever.
        while self.blocks_rx.try_recv().is_ok() {}
    }

    pub fn join(self) {
        for handle in self.join_handles {
            let _ = handle.join();
        }
    }
}

/// Fetches every block in `[start, end]` from `client`, delivering them to
/// the returned channel in strict ascending height order regardless of
/// fetch concurrency.
///
/// Three cooperating groups of threads do the work: a range-chunker that
/// slices `[start, end]` into windows of `window` heights, a pool of
/// `workers` window-workers that each fetch their window's blocks with
/// `window`-wide inner parallelism, and an ordered-emitter gate (the
/// shared `last_height_start` atomic) that lets only the worker holding
/// the next unclaimed window push to the output channel.
pub fn fetch_range(
    client: Arc<dyn ChainClient>,
    start: u64,
    end: u64,
    window: usize,
    workers: usize,
    ctx: Context,
    metrics: Option<Metrics>,
) -> FetchHandle {
    let interrupt = Arc::new(AtomicBool::new(false));
    let (blocks_tx, blocks_rx) = crossbeam_channel::bounded::<MsgBlock>(window * workers);
    let (windows_tx, windows_rx) = crossbeam_channel::bounded::<(u64, u64)>(workers * 2);
    let last_height_start = Arc::new(AtomicU64::new(start));

    let mut join_handles = Vec::with_capacity(1 + workers);

    let chunker_interrupt = interrupt.clone();
    join_handles.push(
        std::thread::Builder::new()
            .name("fetcher-chunker".into())
            .spawn(move || {
                let mut next = start;
                let mut height = start;
                while height <= end {
                    if chunker_interrupt.load(Ordering::SeqCst) {
                        return;
                    }
                    if height - next == window as u64 - 1 || height == end {
                        if windows_tx.send((next, height)).is_err() {
                            return;
                        }
                        next = height + 1;
                    }
                    height += 1;
                }
            })
            .expect("unable to spawn fetcher chunker thread"),
    );

    for _ in 0..workers {
        let client = client.clone();
        let ctx = ctx.clone();
        let interrupt = interrupt.clone();
        let windows_rx = windows_rx.clone();
        let blocks_tx = blocks_tx.clone();
        let last_height_start = last_height_start.clone();
        let metrics = metrics.clone();
        join_handles.push(
            std::thread::Builder::new()
                .name("fetcher-worker".into())
                .spawn(move || {
                    while let Ok((win_start, win_end)) = windows_rx.recv() {
                        if interrupt.load(Ordering::SeqCst) {
                            return;
                        }
                        let size = (win_end - win_start + 1) as usize;
                        let slots: std::sync::Mutex<Vec<Option<MsgBlock>>> =
                            std::sync::Mutex::new((0..size).map(|_| None).collect());

                        // Inner parallelism: every height in this window is
                        // fetched concurrently, each writing its own slot.
                        std::thread::scope(|inner_scope| {
                            for height in win_start..=win_end {
                                let client = &*client;
                                let ctx = &ctx;
                                let interrupt = &interrupt;
                                let slots = &slots;
                                let metrics = &metrics;
                                inner_scope.spawn(move || {
                                    if let Ok(block) = fetch_block_with_retries(client, height, ctx, interrupt, metrics) {
                                        slots.lock().unwrap()[(height - win_start) as usize] =
                                            Some(MsgBlock { height, block });
                                    }
                                });
                            }
                        });
                        let slots = slots.into_inner().unwrap();

                        while last_height_start.load(Ordering::SeqCst) != win_start {
                            if interrupt.load(Ordering::SeqCst) {
                                return;
                            }
                            sleep(Duration::from_millis(1));
                        }

                        for slot in slots.into_iter() {
                            match slot {
                                Some(msg) => {
                                    if blocks_tx.send(msg).is_err() {
                                        return;
                                    }
                                }
                                None => break,
                            }
                        }
                        last_height_start.store(win_end + 1, Ordering::SeqCst);
                    }
                })
                .expect("unable to spawn fetcher worker thread"),
        );
    }

    FetchHandle {
        blocks_rx,
        interrupt,
        join_handles,
    }
}

/// Fetches a single block by height, retrying with exponential backoff
/// `2^n` seconds on transient failures. `ClientShutdown`-flavored errors
/// map to `Interrupted` and abort immediately.
fn fetch_block_with_retries(
    client: &dyn ChainClient,
    height: u64,
    ctx: &Context,
    interrupt: &AtomicBool,
    metrics: &Option<Metrics>,
) -> Result<Block, CoreError> {
    let mut attempt: i32 = -1;
    loop {
        if interrupt.load(Ordering::SeqCst) {
            return Err(CoreError::Interrupted);
        }
        attempt += 1;
        if attempt > 0 {
            if let Some(metrics) = metrics {
                metrics.fetch_retries.inc();
            }
            let secs = 1u64 << attempt.min(32);
            if secs > RETRY_BACKOFF_WARN_SECS {
                try_warn!(
                    ctx,
                    "fetcher: block {} would sleep for more than {}s, giving up",
                    height,
                    RETRY_BACKOFF_WARN_SECS
                );
            }
            sleep(Duration::from_secs(secs));
        }

        let hash = match client.get_block_hash(height) {
            Ok(hash) => hash,
            Err(ChainClientError::Interrupted) => return Err(CoreError::Interrupted),
            Err(e) => {
                try_warn!(ctx, "fetcher: get_block_hash({}) failed: {}", height, e);
                continue;
            }
        };
        match client.get_block(&hash) {
            Ok(block) => return Ok(block),
            Err(ChainClientError::Interrupted) => return Err(CoreError::Interrupted),
            Err(e) => {
                try_error!(ctx, "fetcher: get_block({}) failed: {}", height, e);
                continue;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::block::{Header, Version};
    use bitcoin::hashes::Hash;
    use bitcoin::pow::CompactTarget;
    use bitcoin::{BlockHash, TxMerkleNode};
    use cbrc20_chain_client::{ChainClientError, FeeEstimate, FeeEstimateMode};
    use rand::Rng;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Deterministic per-height block whose hash differs by `nonce`, so a
    /// fake `get_block_hash`/`get_block` pair can round-trip it without a
    /// real chain.
    fn fake_block(height: u64) -> Block {
        Block {
            header: Header {
                version: Version::ONE,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: height as u32,
                bits: CompactTarget::from_consensus(0x1d00ffff),
                nonce: height as u32,
            },
            txdata: vec![],
        }
    }

    /// Fake `ChainClient` that hands out `fake_block(height)` after a
    /// random delay, to exercise the fetcher's ordering guarantee under
    /// jittery concurrent fetches.
    struct DelayedClient {
        blocks: Mutex<HashMap<BlockHash, Block>>,
        max_delay_ms: u64,
    }

    impl DelayedClient {
        fn new(heights: std::ops::RangeInclusive<u64>, max_delay_ms: u64) -> Self {
            let mut blocks = HashMap::new();
            for h in heights {
                let block = fake_block(h);
                blocks.insert(block.block_hash(), block);
            }
            DelayedClient {
                blocks: Mutex::new(blocks),
                max_delay_ms,
            }
        }
    }

    impl ChainClient for DelayedClient {
        fn get_block_count(&self) -> Result<u64, ChainClientError> {
            Ok(0)
        }

        fn get_block_hash(&self, height: u64) -> Result<BlockHash, ChainClientError> {
            Ok(fake_block(height).block_hash())
        }

        fn get_block(&self, hash: &BlockHash) -> Result<Block, ChainClientError> {
            let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            sleep(Duration::from_millis(delay));
            self.blocks
                .lock()
                .unwrap()
                .get(hash)
                .cloned()
                .ok_or_else(|| ChainClientError::Internal("unknown block hash".into()))
        }

        fn send_raw_transaction(&self, tx: &bitcoin::Transaction) -> Result<bitcoin::Txid, ChainClientError> {
            Ok(tx.compute_txid())
        }

        fn estimate_smart_fee(
            &self,
            _conf_target: u16,
            _mode: FeeEstimateMode,
        ) -> Result<FeeEstimate, ChainClientError> {
            Ok(FeeEstimate::default())
        }
    }

    #[test]
    fn delivers_strictly_ascending_heights_under_jitter() {
        let start = 100u64;
        let end = 163u64;
        let client: Arc<dyn ChainClient> = Arc::new(DelayedClient::new(start..=end, 50));
        let handle = fetch_range(client, start, end, 16, 4, Context::empty(), None);

        let mut received = Vec::new();
        while let Ok(msg) = handle.blocks_rx.recv() {
            received.push(msg.height);
        }
        handle.join();

        let expected: Vec<u64> = (start..=end).collect();
        assert_eq!(received, expected);
    }
}
