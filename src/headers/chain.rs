//! Locally verified header chain
//!
//! Headers are accepted on top of the stored tip only if they link to it,
//! carry the ASERT-expected bits and meet their target. A header that does
//! not link starts a catch-up fetch; if the fetched range does not chain from
//! the tip either, the trailing headers are marked reorged and the fetch
//! retried from the earlier tip.

use serde::{Deserialize, Serialize};

use crate::network::{ChainIndexer, HeaderNotification};
use crate::storage::{HeaderRecord, StoreBatch, StoreOp, WalletStore};

use super::asert::{target_from_bits, AsertAnchor, AsertParams};
use super::header::{parse_headers, BlockHeader};
use super::HeaderError;

/// Headers requested per `blockchain.block.headers` call
pub const FETCH_BATCH: u32 = 2016;
/// Headers marked reorged per rollback step
pub const ROLLBACK_DEPTH: u32 = 10;

/// Trusted starting point of the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u32,
    /// 80-byte header, hex
    pub header: String,
    pub anchor: AsertAnchor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub checkpoint: Checkpoint,
    pub asert: AsertParams,
    pub rollback_depth: u32,
    pub fetch_batch: u32,
}

impl ChainParams {
    pub fn new(checkpoint: Checkpoint) -> Self {
        let asert = AsertParams::new(checkpoint.anchor);
        Self {
            checkpoint,
            asert,
            rollback_depth: ROLLBACK_DEPTH,
            fetch_batch: FETCH_BATCH,
        }
    }
}

/// Result of feeding a header notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderUpdate {
    /// Already stored
    Duplicate,
    Extended { tip: u32, added: usize },
    /// Headers from `from_height` were marked reorged before extending
    Reorged { from_height: u32, tip: u32, added: usize },
}

pub struct HeaderChain<'a> {
    store: &'a dyn WalletStore,
    indexer: &'a dyn ChainIndexer,
    params: ChainParams,
}

impl<'a> HeaderChain<'a> {
    pub fn new(store: &'a dyn WalletStore, indexer: &'a dyn ChainIndexer, params: ChainParams) -> Self {
        Self { store, indexer, params }
    }

    /// Store the checkpoint header unless already present
    pub fn init(&self) -> Result<HeaderRecord, HeaderError> {
        let header = BlockHeader::from_hex(&self.params.checkpoint.header)?;
        let record = HeaderRecord {
            hash: header.hash_hex(),
            height: self.params.checkpoint.height,
            buffer: header.to_hex(),
            reorg: false,
        };
        if self.store.header_at(record.height).as_ref() != Some(&record) {
            let mut batch = StoreBatch::new();
            batch.push(StoreOp::PutHeader(record.clone()));
            self.store.apply(batch)?;
        }
        Ok(record)
    }

    pub fn tip(&self) -> Result<HeaderRecord, HeaderError> {
        self.store
            .header_tip()
            .filter(|t| t.height >= self.params.checkpoint.height)
            .ok_or(HeaderError::NotInitialized)
    }

    /// Check `header` as the successor of `prev`
    pub fn verify_next(&self, prev: &HeaderRecord, header: &BlockHeader) -> Result<(), HeaderError> {
        let height = prev.height + 1;
        if header.prev_hash_hex() != prev.hash {
            return Err(HeaderError::Disconnected { height });
        }
        let prev_header = BlockHeader::from_hex(&prev.buffer)?;
        let expected = self.params.asert.next_bits(prev.height, prev_header.time);
        if header.bits != expected {
            return Err(HeaderError::BadBits {
                height,
                expected,
                actual: header.bits,
            });
        }
        if !header.meets_target(target_from_bits(header.bits)) {
            return Err(HeaderError::InsufficientWork { height });
        }
        Ok(())
    }

    /// Process a `blockchain.headers.subscribe` notification
    pub async fn on_header(&self, notification: &HeaderNotification) -> Result<HeaderUpdate, HeaderError> {
        let header = BlockHeader::from_hex(&notification.hex)?;
        let height = notification.height;
        let tip = self.tip()?;

        if height <= tip.height {
            let known = self.store.header_at(height);
            if known.is_some_and(|h| !h.reorg && h.hash == header.hash_hex()) {
                return Ok(HeaderUpdate::Duplicate);
            }
            if height <= self.params.checkpoint.height {
                return Err(HeaderError::BelowCheckpoint(height));
            }
            // competing branch at or below our tip
            let from_height = self.rollback(&tip, Some(height))?;
            return Ok(match self.catch_up(height).await? {
                HeaderUpdate::Reorged { tip, added, .. } | HeaderUpdate::Extended { tip, added } => {
                    HeaderUpdate::Reorged { from_height, tip, added }
                }
                HeaderUpdate::Duplicate => HeaderUpdate::Reorged {
                    from_height,
                    tip: from_height - 1,
                    added: 0,
                },
            });
        }

        if height == tip.height + 1 {
            match self.verify_next(&tip, &header) {
                Ok(()) => {
                    let mut batch = StoreBatch::new();
                    batch.push(StoreOp::PutHeader(record(height, &header)));
                    self.store.apply(batch)?;
                    log::debug!("Header {} {}", height, header.hash_hex());
                    return Ok(HeaderUpdate::Extended { tip: height, added: 1 });
                }
                Err(HeaderError::Disconnected { .. }) => {}
                Err(e) => {
                    log::warn!("Rejected header {}: {}", height, e);
                    return Err(e);
                }
            }
        }
        self.catch_up(height).await
    }

    /// Mark trailing headers reorged; returns the first reorged height
    fn rollback(&self, tip: &HeaderRecord, at: Option<u32>) -> Result<u32, HeaderError> {
        let floor = self.params.checkpoint.height + 1;
        if tip.height < floor {
            return Err(HeaderError::BelowCheckpoint(tip.height));
        }
        let depth_start = tip.height.saturating_sub(self.params.rollback_depth.saturating_sub(1));
        let from_height = at.map_or(depth_start, |h| h.min(depth_start)).max(floor);
        let mut batch = StoreBatch::new();
        batch.push(StoreOp::MarkReorg { from_height });
        self.store.apply(batch)?;
        log::warn!("Reorg: headers from {} to {} marked", from_height, tip.height);
        Ok(from_height)
    }

    /// Fetch and verify headers until the tip reaches `target_height`
    pub async fn catch_up(&self, target_height: u32) -> Result<HeaderUpdate, HeaderError> {
        let mut reorged_from: Option<u32> = None;
        let mut added = 0;
        loop {
            let tip = self.tip()?;
            if tip.height >= target_height {
                break;
            }
            let count = (target_height - tip.height).min(self.params.fetch_batch.max(1));
            let response = self.indexer.block_headers(tip.height + 1, count).await?;
            let headers = parse_headers(&response.hex)?;
            let Some(first) = headers.first() else {
                log::debug!("Indexer has no headers past {}", tip.height);
                break;
            };
            if first.prev_hash_hex() != tip.hash {
                let from_height = self.rollback(&tip, None)?;
                reorged_from = Some(reorged_from.map_or(from_height, |r| r.min(from_height)));
                continue;
            }

            let mut batch = StoreBatch::new();
            let mut prev = tip;
            let mut failure = None;
            for header in &headers {
                if let Err(e) = self.verify_next(&prev, header) {
                    log::warn!("Rejected header {}: {}", prev.height + 1, e);
                    failure = Some(e);
                    break;
                }
                let next = record(prev.height + 1, header);
                batch.push(StoreOp::PutHeader(next.clone()));
                prev = next;
                added += 1;
            }
            self.store.apply(batch)?;
            if let Some(e) = failure {
                return Err(e);
            }
        }

        let tip = self.tip()?.height;
        log::info!("Header tip {}", tip);
        Ok(match reorged_from {
            Some(from_height) => HeaderUpdate::Reorged { from_height, tip, added },
            None => HeaderUpdate::Extended { tip, added },
        })
    }
}

fn record(height: u32, header: &BlockHeader) -> HeaderRecord {
    HeaderRecord {
        hash: header.hash_hex(),
        height,
        buffer: header.to_hex(),
        reorg: false,
    }
}
