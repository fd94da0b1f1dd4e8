use bitcoin::Block;
use cbrc20_chain_client::ChainClient;
use cbrc20_store::BlockAnchor;
use tokio_postgres::GenericClient;

use crate::error::CoreError;

/// Compares an incoming block's parent hash against the locally stored
/// anchor for the previous height. Returns `Ok(())` when the chain view
/// agrees, or the appropriate `CoreError` otherwise.
pub async fn check<T: GenericClient>(
    client: &dyn ChainClient,
    height: u64,
    block: &Block,
    client_tx: &T,
) -> Result<(), CoreError> {
    let parent_hash = block.header.prev_blockhash.to_string();

    if height == 0 {
        return Ok(());
    }

    let prev_anchor = cbrc20_store::order_store::anchor_at(height as i64 - 1, client_tx).await?;

    match prev_anchor {
        Some(anchor) if anchor.block_hash == parent_hash => Ok(()),
        Some(_) => {
            let depth = walk_back_to_agreement(client, height, client_tx).await?;
            Err(CoreError::Recoverable { height, depth })
        }
        None => {
            // No anchor at all for the previous height: either this is a
            // legitimate gap (anchor already pruned, within policy) or
            // the local chain view has lost track entirely.
            let last = cbrc20_store::order_store::last_anchor(client_tx).await?;
            match last {
                Some(anchor) if anchor.height as u64 == height - 1 => Ok(()),
                Some(_) => Err(CoreError::DetectReorg),
                None => Ok(()),
            }
        }
    }
}

/// Walks backward from `height - 1` comparing stored anchors against
/// freshly fetched chain hashes until agreement is found, returning the
/// depth of divergence. A depth this function cannot resolve because no
/// earlier anchor remains is fatal (`DetectReorg`).
async fn walk_back_to_agreement<T: GenericClient>(
    client: &dyn ChainClient,
    height: u64,
    client_tx: &T,
) -> Result<u64, CoreError> {
    let mut depth = 1u64;
    loop {
        if depth as i64 > height as i64 {
            return Err(CoreError::DetectReorg);
        }
        let probe_height = height - depth;
        let Some(anchor) = fetch_anchor_record(probe_height, client_tx).await? else {
            return Err(CoreError::DetectReorg);
        };
        let fresh_hash = client.get_block_hash(probe_height)?;
        if anchor.block_hash == fresh_hash.to_string() {
            return Ok(depth);
        }
        depth += 1;
    }
}

async fn fetch_anchor_record<T: GenericClient>(
    height: u64,
    client_tx: &T,
) -> Result<Option<BlockAnchor>, CoreError> {
    Ok(cbrc20_store::order_store::anchor_at(height as i64, client_tx).await?)
}
