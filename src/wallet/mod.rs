//! Wallet keys, coin selection, transaction building and spending flows

pub mod builder;
pub mod coin_select;
pub mod consolidate;
pub mod context;
pub mod swap;
pub mod transfer;
pub mod wallet;

pub use builder::{verify_input, BuildError, SignedTransaction, TransactionBuilder};
pub use coin_select::{
    accumulate_inputs, select, Accumulated, SelectInput, Selection, SelectionError, SelectionParams,
};
pub use consolidate::{
    consolidate_all, consolidate_ft, consolidate_rxd, ConsolidationError, ConsolidationResult,
};
pub use context::WalletContext;
pub use swap::{cancel_swap, complete_swap, inspect_swap, prepare_swap, SwapAsset, SwapError, SwapOffer, SwapTerms};
pub use transfer::{
    melt_ft, melt_nft, send_rxd, transfer_ft, transfer_nft, TransferError, TransferResult,
};
pub use wallet::{Subscription, Wallet, WalletError, WalletInfo, WalletManager};
