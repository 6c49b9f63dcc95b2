//! Indexer networking
//!
//! Provides access to an Electrum-style chain indexer.
//!
//! # Features
//! - Async `ChainIndexer` capability with subscriptions
//! - JSON-RPC over WebSocket client
//! - Network worker with round-robin server failover
//! - In-memory indexer for tests

pub mod electrum;
pub mod indexer;
pub mod mock;
pub mod worker;

pub use electrum::{ElectrumClient, REQUEST_TIMEOUT};
pub use indexer::{
    ChainIndexer, ChainSubscriber, HeaderNotification, HeadersResponse, IndexerError, Notification,
    RefLocation, UnspentEntry, UnspentRef,
};
pub use mock::MockIndexer;
pub use worker::{
    Connector, ElectrumConnector, NetworkHandle, NetworkWorker, ServerRotation, WorkerCommand,
    WorkerError, CONNECT_TIMEOUT,
};
