//! Minting engine
//!
//! Tokens are minted in two phases:
//! - **commit**: an output hash-locks the payload
//! - **reveal**: spends the commit with the payload in its unlocking script
//!   and creates the token outputs, whose ref is the commit outpoint
//!
//! Single mints go through [`mint_token`]. Bundles ([`bundle`]) batch many
//! tokens behind shared funding outputs and prove author/container claims
//! with delegate refs, checkpointing every broadcast so an interrupted run
//! resumes without rebroadcasting.
//!
//! # Example
//!
//! ```ignore
//! use radiant_wallet::mint::{mint_token, TokenDraft};
//!
//! let result = mint_token(&ctx, &TokenDraft::nft("My NFT")).await?;
//! println!("minted {} for {} photons", result.reference, result.fees.total());
//! ```

pub mod bundle;
pub mod commit;
pub mod delegate;
pub mod dmint;
pub mod mutate;
pub mod reveal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{TransactionError, TxOutput, Utxo};
use crate::network::IndexerError;
use crate::script::{p2pkh_script, ScriptError};
use crate::storage::{StoreBatch, StoreError};
use crate::token::{OutpointError, Outpoint, PayloadError};
use crate::wallet::{select, BuildError, SelectInput, SignedTransaction, TransactionBuilder, WalletContext};

pub use bundle::{
    commit_bundle, prepare_bundle, reveal_batch, reveal_bundle, reveal_direct, BroadcastStep,
    BundleBatch, BundleEstimate, BundleStage, BundleState, DelegateState,
};
pub use commit::{RstData, TokenCommitData, TokenDraft};
pub use dmint::DmintDeploy;
pub use mutate::{mutate_token, seal_token, MutationResult};
pub use reveal::{ProofHolding, ProofShape, RevealProof};

#[derive(Error, Debug)]
pub enum MintError {
    #[error("Invalid mint request: {0}")]
    InvalidRequest(String),
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Proof token not held: {0}")]
    MissingProof(String),
    #[error("Out of order: {0}")]
    OutOfOrder(String),
    #[error("Token not found: {0}")]
    TokenNotFound(String),
    #[error("Mutable contract not found for {0}")]
    ContractNotFound(String),
    #[error("Payload error: {0}")]
    PayloadError(#[from] PayloadError),
    #[error("Build error: {0}")]
    BuildError(#[from] BuildError),
    #[error("Network error: {0}")]
    NetworkError(#[from] IndexerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("Outpoint error: {0}")]
    OutpointError(#[from] OutpointError),
}

/// Fee of one broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEntry {
    pub step: String,
    pub txid: String,
    pub fee: u64,
    pub at: DateTime<Utc>,
}

/// Fees paid across the transactions of a mint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLedger {
    pub entries: Vec<FeeEntry>,
}

impl FeeLedger {
    pub fn record(&mut self, step: impl Into<String>, txid: &str, fee: u64) {
        self.entries.push(FeeEntry {
            step: step.into(),
            txid: txid.to_string(),
            fee,
            at: Utc::now(),
        });
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.fee).sum()
    }
}

/// Outcome of a single mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintResult {
    /// Token ref, display orientation
    pub reference: Outpoint,
    pub commit_txid: String,
    pub reveal_txid: String,
    pub fees: FeeLedger,
}

/// Select wallet coins for `targets`, change last, and sign with the main key
pub(crate) fn fund_outputs(
    ctx: &WalletContext<'_>,
    required: &[SelectInput],
    targets: &[TxOutput],
) -> Result<(SignedTransaction, Vec<Utxo>), MintError> {
    let change = p2pkh_script(&ctx.wallet.address())?;
    let selection = select(&ctx.rxd_inputs(), required, targets, &change, &ctx.params);
    if !selection.funded {
        return Err(MintError::InsufficientFunds {
            have: selection.input_value(),
            need: selection.output_value() + selection.fee,
        });
    }
    let spent: Vec<Utxo> = selection.inputs.iter().map(|i| i.utxo.clone()).collect();
    let signed = TransactionBuilder::new(ctx.params.fee_rate)
        .add_inputs(spent.iter().cloned())
        .add_outputs(selection.outputs)
        .signing_key(ctx.wallet.key())
        .dust_threshold(ctx.params.dust_threshold)
        .build()?;
    Ok((signed, spent))
}

/// Mint one token: commit, then reveal
///
/// Author and container claims are proven directly: the commit requires
/// their refs and the reveal spends and returns the claimed NFTs.
pub async fn mint_token(ctx: &WalletContext<'_>, draft: &TokenDraft) -> Result<MintResult, MintError> {
    draft.validate()?;
    let owner = ctx.wallet.address();
    let claims = draft.proof_refs();
    let holdings = reveal::proof_holdings(ctx, &claims)?;
    let proof = RevealProof::Direct(holdings);

    let required = claims.iter().map(Outpoint::reverse).collect();
    let mut token = TokenCommitData::new(&owner, draft, required)?;
    commit::fund_reveal(std::slice::from_mut(&mut token), &proof.shape(), ctx.params.fee_rate)?;

    let mut fees = FeeLedger::default();
    let (signed, spent) = fund_outputs(ctx, &[], &token.commit_outputs()?)?;
    let reserved = commit::assign_commits(&mut [&mut token], &signed.txid, 0);
    let commit_txid = ctx
        .broadcast_reserving::<MintError>(&signed, &spent, &reserved, StoreBatch::new())
        .await?;
    fees.record("commit", &commit_txid, signed.fee);

    let reveal = reveal::build_reveal(ctx, std::slice::from_ref(&token), &proof)?;
    let records = reveal::reveal_records(ctx, std::slice::from_ref(&token), &proof, &reveal)?;
    let reveal_txid = ctx
        .broadcast::<MintError>(&reveal.signed, &reveal.spent, records)
        .await?;
    fees.record("reveal", &reveal_txid, reveal.signed.fee);

    let reference = token
        .token_ref()
        .ok_or_else(|| MintError::OutOfOrder("token is not committed".into()))?;
    log::info!(
        "Minted {} {} (fees {})",
        draft.operation.as_str(),
        reference.short_ref(),
        fees.total()
    );
    Ok(MintResult {
        reference,
        commit_txid,
        reveal_txid,
        fees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::script::{
        nft_script, parse_commit_script, parse_mutable_nft_script, parse_nft_script, ScriptTemplate,
    };
    use crate::storage::WalletStore;
    use crate::token::{ContractType, Operation};
    use crate::wallet::transfer::tests::Fixture;

    fn commit_and_reveal(f: &Fixture, result: &MintResult) -> (Transaction, Transaction) {
        (
            f.indexer.transaction(&result.commit_txid).unwrap(),
            f.indexer.transaction(&result.reveal_txid).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_immutable_nft_mint() {
        let f = Fixture::new();
        f.fund(100_000_000);

        let result = mint_token(&f.ctx(), &TokenDraft::nft("Plain")).await.unwrap();
        let (commit, reveal) = commit_and_reveal(&f, &result);

        // one commit output plus change
        assert_eq!(commit.outputs.len(), 2);
        assert!(parse_commit_script(&commit.outputs[0].script).is_some());
        assert!(matches!(
            ScriptTemplate::match_script(&commit.outputs[1].script),
            ScriptTemplate::P2pkh { .. }
        ));

        let expected = Outpoint::from_utxo(&result.commit_txid, 0).unwrap();
        assert_eq!(result.reference, expected);
        let parts = parse_nft_script(&reveal.outputs[0].script);
        assert_eq!(parts.reference, Some(expected.reverse()));
        assert_eq!(parts.address, Some(f.wallet.address()));
        assert_eq!(reveal.outputs.len(), 1);

        let token = f.store.token(&expected).unwrap();
        assert!(token.fresh && token.immutable);
        assert_eq!(token.name, "Plain");
        assert_eq!(f.store.unspent(ContractType::Nft).len(), 1);

        let coins: u64 = f.store.unspent(ContractType::Rxd).iter().map(|t| t.value).sum();
        assert_eq!(coins + 1 + result.fees.total(), 100_000_000);
    }

    #[tokio::test]
    async fn test_mutable_nft_mint() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let mut draft = TokenDraft::nft("Mutable");
        draft.immutable = false;

        let result = mint_token(&f.ctx(), &draft).await.unwrap();
        let (commit, reveal) = commit_and_reveal(&f, &result);

        // commit, ref placeholder, change
        assert!(parse_commit_script(&commit.outputs[0].script).is_some());
        assert_eq!(commit.outputs[1].value, commit::PLACEHOLDER_VALUE);
        assert_eq!(commit.outputs.len(), 3);

        assert_eq!(reveal.outputs.len(), 2);
        let token_ref = Outpoint::from_utxo(&result.commit_txid, 0).unwrap();
        let contract = parse_mutable_nft_script(&reveal.outputs[1].script).unwrap();
        assert_eq!(contract.token_ref, token_ref.reverse());
        assert_eq!(contract.mutable_ref, Outpoint::from_utxo(&result.commit_txid, 1).unwrap().reverse());

        // the placeholder never became spendable
        assert!(f.store.txo(&result.commit_txid, 1).is_none());
        let token = f.store.token(&token_ref).unwrap();
        assert!(!token.immutable);
        assert_eq!(token.location, Some(token_ref.offset(1)));
    }

    #[tokio::test]
    async fn test_mint_with_author_proof() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let author = Outpoint::from_utxo(&"a0".repeat(32), 0).unwrap();
        f.give_token(
            nft_script(&f.wallet.address(), &author.reverse()).unwrap(),
            1,
            author,
            Operation::Nft,
        );
        let mut draft = TokenDraft::nft("Signed");
        draft.author = Some(author);

        let result = mint_token(&f.ctx(), &draft).await.unwrap();
        let (commit, reveal) = commit_and_reveal(&f, &result);
        let params = parse_commit_script(&commit.outputs[0].script).unwrap();
        assert_eq!(params.required_refs, vec![author.reverse()]);

        // author spent and returned after the token
        assert_eq!(parse_nft_script(&reveal.outputs[1].script).reference, Some(author.reverse()));
        let minted = f.store.token(&result.reference).unwrap();
        assert_eq!(minted.author, Some(author));
        let held = f.store.token(&author).unwrap();
        let txo = f.store.txo_by_id(held.last_txo_id.unwrap()).unwrap();
        assert_eq!((txo.txid, txo.vout), (result.reveal_txid.clone(), 1));
    }

    #[tokio::test]
    async fn test_missing_author_is_rejected_before_broadcast() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let mut draft = TokenDraft::nft("Claim");
        draft.author = Some(Outpoint::from_utxo(&"b0".repeat(32), 0).unwrap());

        assert!(matches!(
            mint_token(&f.ctx(), &draft).await,
            Err(MintError::MissingProof(_))
        ));
        assert_eq!(f.indexer.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_dmint_deploy() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let mut draft = TokenDraft::ft("Mined", "MND", 1);
        draft.dmint = Some(DmintDeploy {
            contracts: 2,
            max_height: 100,
            reward: 10,
            difficulty: 5,
        });

        let result = mint_token(&f.ctx(), &draft).await.unwrap();
        let (commit, reveal) = commit_and_reveal(&f, &result);
        assert_eq!(commit.outputs.len(), 4);
        assert_eq!(reveal.outputs.len(), 2);
        for (i, output) in reveal.outputs.iter().enumerate() {
            match ScriptTemplate::match_script(&output.script) {
                ScriptTemplate::Dmint(params) => {
                    assert_eq!(params.token_ref, result.reference.reverse());
                    assert_eq!(params.contract_ref, result.reference.offset(1 + i as u32).reverse());
                }
                other => panic!("expected dmint contract, got {:?}", other),
            }
        }
        // deployed, but no FT held by the wallet
        assert!(f.store.token(&result.reference).is_some());
        assert!(f.store.unspent(ContractType::Ft).is_empty());
    }

    #[tokio::test]
    async fn test_unfunded_mint() {
        let f = Fixture::new();
        f.fund(1_000);
        assert!(matches!(
            mint_token(&f.ctx(), &TokenDraft::nft("Broke")).await,
            Err(MintError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_fee_ledger_total() {
        let mut ledger = FeeLedger::default();
        ledger.record("commit", "aa", 100);
        ledger.record("reveal", "bb", 250);
        assert_eq!(ledger.total(), 350);
    }
}
