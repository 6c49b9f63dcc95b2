//! Sending coins and tokens
//!
//! Every flow selects inputs, builds and signs, broadcasts, and only then
//! records the spend in the store.

use thiserror::Error;

use crate::core::{TxOutput, Txo, Utxo};
use crate::network::IndexerError;
use crate::script::{ft_script, nft_script, p2pkh_script, Script, ScriptError};
use crate::storage::{StoreBatch, StoreError, StoreOp};
use crate::token::{Outpoint, SmartToken};

use super::builder::{BuildError, SignedTransaction, TransactionBuilder};
use super::coin_select::{accumulate_inputs, select, SelectInput, Selection};
use super::context::WalletContext;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid amount")]
    InvalidAmount,
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Insufficient token balance: have {have}, need {need}")]
    InsufficientTokenBalance { have: u64, need: u64 },
    #[error("Token not found: {0}")]
    TokenNotFound(String),
    #[error("Build error: {0}")]
    BuildError(#[from] BuildError),
    #[error("Network error: {0}")]
    NetworkError(#[from] IndexerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
}

/// Outcome of a broadcast transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub txid: String,
    pub fee: u64,
}

fn address_script(
    address: &str,
    f: impl FnOnce(&str) -> Result<Script, ScriptError>,
) -> Result<Script, TransferError> {
    f(address).map_err(|_| TransferError::InvalidAddress(address.to_string()))
}

/// Select funding, sign with the main key and return the selection and transaction
pub(crate) fn fund_and_sign(
    ctx: &WalletContext<'_>,
    required: &[SelectInput],
    targets: &[TxOutput],
) -> Result<(Selection, SignedTransaction), TransferError> {
    let change = p2pkh_script(&ctx.wallet.address())?;
    let selection = select(&ctx.rxd_inputs(), required, targets, &change, &ctx.params);
    if !selection.funded {
        return Err(TransferError::InsufficientFunds {
            have: selection.input_value(),
            need: selection.output_value() + selection.fee,
        });
    }
    let signed = TransactionBuilder::new(ctx.params.fee_rate)
        .add_inputs(selection.inputs.iter().map(|i| i.utxo.clone()))
        .add_outputs(selection.outputs.clone())
        .signing_key(ctx.wallet.key())
        .dust_threshold(ctx.params.dust_threshold)
        .build()?;
    Ok((selection, signed))
}

fn spent_utxos(selection: &Selection) -> Vec<Utxo> {
    selection.inputs.iter().map(|i| i.utxo.clone()).collect()
}

/// Owned, unspent output holding an NFT
pub(crate) fn nft_holding(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
) -> Result<(SmartToken, Txo), TransferError> {
    let not_found = || TransferError::TokenNotFound(reference.to_ref());
    let token = ctx.store.token(reference).ok_or_else(not_found)?;
    let txo = token
        .last_txo_id
        .and_then(|id| ctx.store.txo_by_id(id))
        .filter(|t| !t.spent)
        .ok_or_else(not_found)?;
    Ok((token, txo))
}

/// Send photons to an address
pub async fn send_rxd(ctx: &WalletContext<'_>, to: &str, value: u64) -> Result<TransferResult, TransferError> {
    if value == 0 {
        return Err(TransferError::InvalidAmount);
    }
    let script = address_script(to, p2pkh_script)?;
    let (selection, signed) = fund_and_sign(ctx, &[], &[TxOutput::new(value, script)])?;
    let txid = ctx
        .broadcast::<TransferError>(&signed, &spent_utxos(&selection), StoreBatch::new())
        .await?;
    Ok(TransferResult { txid, fee: signed.fee })
}

/// Move an NFT to another address
pub async fn transfer_nft(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
    to: &str,
) -> Result<TransferResult, TransferError> {
    let script = address_script(to, |a| nft_script(a, &reference.reverse()))?;
    let (mut token, txo) = nft_holding(ctx, reference)?;
    let required = [SelectInput::p2pkh(txo.to_utxo())];
    let (selection, signed) = fund_and_sign(ctx, &required, &[TxOutput::new(txo.value, script)])?;

    let mut extra = StoreBatch::new();
    if ctx.wallet.is_own_address(to) {
        extra.put_token(token, Some((signed.txid.clone(), 0)));
    } else {
        token.spent = true;
        extra.put_token(token, None);
    }
    let txid = ctx
        .broadcast::<TransferError>(&signed, &spent_utxos(&selection), extra)
        .await?;
    Ok(TransferResult { txid, fee: signed.fee })
}

/// Unspent FT outputs of `reference` held by the main address, and their amounts
fn ft_holdings(ctx: &WalletContext<'_>, reference: &Outpoint) -> Result<Vec<Utxo>, TransferError> {
    let own = ft_script(&ctx.wallet.address(), &reference.reverse())?;
    Ok(ctx
        .store
        .unspent_by_script(&own)
        .into_iter()
        .map(|t| t.to_utxo())
        .collect())
}

fn ft_inputs_and_change(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
    amount: u64,
) -> Result<(Vec<SelectInput>, Option<TxOutput>), TransferError> {
    if amount == 0 {
        return Err(TransferError::InvalidAmount);
    }
    let acc = accumulate_inputs(&ft_holdings(ctx, reference)?, amount);
    if !acc.reached(amount) {
        return Err(TransferError::InsufficientTokenBalance {
            have: acc.sum,
            need: amount,
        });
    }
    let change = (acc.sum > amount)
        .then(|| ft_script(&ctx.wallet.address(), &reference.reverse()))
        .transpose()?
        .map(|script| TxOutput::new(acc.sum - amount, script));
    Ok((acc.inputs.into_iter().map(SelectInput::p2pkh).collect(), change))
}

/// Send an amount of a fungible token; surplus comes back as token change
pub async fn transfer_ft(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
    to: &str,
    amount: u64,
) -> Result<TransferResult, TransferError> {
    let script = address_script(to, |a| ft_script(a, &reference.reverse()))?;
    let (required, token_change) = ft_inputs_and_change(ctx, reference, amount)?;
    let mut targets = vec![TxOutput::new(amount, script)];
    targets.extend(token_change);

    let (selection, signed) = fund_and_sign(ctx, &required, &targets)?;
    let txid = ctx
        .broadcast::<TransferError>(&signed, &spent_utxos(&selection), StoreBatch::new())
        .await?;
    Ok(TransferResult { txid, fee: signed.fee })
}

/// Destroy an NFT by spending it without carrying its ref forward
pub async fn melt_nft(ctx: &WalletContext<'_>, reference: &Outpoint) -> Result<TransferResult, TransferError> {
    let (_, txo) = nft_holding(ctx, reference)?;
    let required = [SelectInput::p2pkh(txo.to_utxo())];
    let (selection, signed) = fund_and_sign(ctx, &required, &[])?;

    let mut extra = StoreBatch::new();
    extra.push(StoreOp::MarkTokenSpent {
        reference: *reference,
    });
    let txid = ctx
        .broadcast::<TransferError>(&signed, &spent_utxos(&selection), extra)
        .await?;
    Ok(TransferResult { txid, fee: signed.fee })
}

/// Destroy an amount of a fungible token
pub async fn melt_ft(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
    amount: u64,
) -> Result<TransferResult, TransferError> {
    let (required, token_change) = ft_inputs_and_change(ctx, reference, amount)?;
    let targets: Vec<TxOutput> = token_change.into_iter().collect();
    let (selection, signed) = fund_and_sign(ctx, &required, &targets)?;
    let txid = ctx
        .broadcast::<TransferError>(&signed, &spent_utxos(&selection), StoreBatch::new())
        .await?;
    Ok(TransferResult { txid, fee: signed.fee })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::FeeRate;
    use crate::network::MockIndexer;
    use crate::storage::{MemoryStore, WalletStore};
    use crate::token::{ContractType, Operation, TokenPayload};
    use crate::wallet::{SelectionParams, Wallet};

    pub(crate) struct Fixture {
        pub wallet: Wallet,
        pub store: MemoryStore,
        pub indexer: MockIndexer,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                wallet: Wallet::new(),
                store: MemoryStore::new(),
                indexer: MockIndexer::new(),
            }
        }

        pub fn ctx(&self) -> WalletContext<'_> {
            WalletContext::new(
                &self.wallet,
                &self.store,
                &self.indexer,
                SelectionParams::new(FeeRate::default()),
            )
        }

        /// Fund the wallet on the mock chain and record the coin
        pub fn fund(&self, value: u64) -> Utxo {
            let script = self.wallet.p2pkh_script().unwrap();
            let utxo = self.indexer.fund(&script, value).unwrap();
            let mut batch = StoreBatch::new();
            batch.insert_txo(Txo::new(utxo.clone(), Some(1), ContractType::Rxd));
            self.store.apply(batch).unwrap();
            utxo
        }

        /// Put a token output on chain and record it with its token
        pub fn give_token(&self, script: Script, value: u64, reference: Outpoint, op: Operation) -> Utxo {
            let utxo = self.indexer.fund(&script, value).unwrap();
            let ct = if op == Operation::Ft { ContractType::Ft } else { ContractType::Nft };
            let mut payload = TokenPayload::default();
            payload.meta.insert("name".into(), ciborium::Value::Text("T".into()));
            let token = SmartToken::from_payload(reference, op, &payload, None, None);
            let mut batch = StoreBatch::new();
            batch
                .insert_txo(Txo::new(utxo.clone(), Some(1), ct))
                .put_token(token, Some((utxo.txid.clone(), utxo.vout)));
            self.store.apply(batch).unwrap();
            utxo
        }
    }

    fn token_ref(n: u8) -> Outpoint {
        Outpoint::from_utxo(&format!("{:02x}", n).repeat(32), 0).unwrap()
    }

    #[tokio::test]
    async fn test_send_rxd_records_change() {
        let f = Fixture::new();
        let funding = f.fund(100_000_000);
        let other = Wallet::new().address();

        let result = send_rxd(&f.ctx(), &other, 30_000_000).await.unwrap();
        assert!(f.store.txo(&funding.txid, 0).unwrap().spent);
        let unspent = f.store.unspent(ContractType::Rxd);
        assert_eq!(unspent.len(), 1);
        assert!(unspent[0].change);
        assert_eq!(unspent[0].value + result.fee + 30_000_000, 100_000_000);
    }

    #[tokio::test]
    async fn test_send_validation_and_funding_errors() {
        let f = Fixture::new();
        f.fund(10_000);
        assert!(matches!(
            send_rxd(&f.ctx(), "not-an-address", 1_000).await,
            Err(TransferError::InvalidAddress(_))
        ));
        assert!(matches!(
            send_rxd(&f.ctx(), &Wallet::new().address(), 0).await,
            Err(TransferError::InvalidAmount)
        ));
        assert!(matches!(
            send_rxd(&f.ctx(), &Wallet::new().address(), 5_000_000).await,
            Err(TransferError::InsufficientFunds { .. })
        ));
        assert_eq!(f.indexer.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_broadcast_leaves_store_unchanged() {
        let f = Fixture::new();
        let funding = f.fund(100_000_000);
        f.indexer.fail_next_broadcasts(1);
        let result = send_rxd(&f.ctx(), &Wallet::new().address(), 1_000_000).await;
        assert!(matches!(result, Err(TransferError::NetworkError(_))));
        assert!(!f.store.txo(&funding.txid, 0).unwrap().spent);
    }

    #[tokio::test]
    async fn test_transfer_nft_away() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let reference = token_ref(9);
        let script = nft_script(&f.wallet.address(), &reference.reverse()).unwrap();
        let held = f.give_token(script, 1, reference, Operation::Nft);

        let other = Wallet::new().address();
        let result = transfer_nft(&f.ctx(), &reference, &other).await.unwrap();
        let tx = f.indexer.transaction(&result.txid).unwrap();
        assert_eq!(tx.outputs[0].script, nft_script(&other, &reference.reverse()).unwrap());
        assert_eq!(tx.inputs[0].prev_txid, held.txid);
        assert!(f.store.token(&reference).unwrap().spent);
        assert!(f.store.unspent(ContractType::Nft).is_empty());
    }

    #[tokio::test]
    async fn test_transfer_ft_with_token_change() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let reference = token_ref(4);
        let own = ft_script(&f.wallet.address(), &reference.reverse()).unwrap();
        f.give_token(own.clone(), 600, reference, Operation::Ft);
        f.give_token(own.clone(), 500, reference, Operation::Ft);

        let other = Wallet::new().address();
        let result = transfer_ft(&f.ctx(), &reference, &other, 1_000).await.unwrap();
        let tx = f.indexer.transaction(&result.txid).unwrap();
        assert_eq!(tx.outputs[0].value, 1_000);
        assert_eq!(tx.outputs[1].value, 100);
        assert_eq!(tx.outputs[1].script, own);

        let remaining = f.store.unspent_by_script(&own);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 100);

        assert!(matches!(
            transfer_ft(&f.ctx(), &reference, &other, 1_000).await,
            Err(TransferError::InsufficientTokenBalance { have: 100, need: 1_000 })
        ));
    }

    #[tokio::test]
    async fn test_melt_nft_and_ft() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let nft_ref = token_ref(1);
        f.give_token(
            nft_script(&f.wallet.address(), &nft_ref.reverse()).unwrap(),
            1,
            nft_ref,
            Operation::Nft,
        );
        let result = melt_nft(&f.ctx(), &nft_ref).await.unwrap();
        let tx = f.indexer.transaction(&result.txid).unwrap();
        assert_eq!(tx.outputs.len(), 1);
        assert!(f.store.token(&nft_ref).unwrap().spent);
        assert!(matches!(
            melt_nft(&f.ctx(), &nft_ref).await,
            Err(TransferError::TokenNotFound(_))
        ));

        let ft_ref = token_ref(2);
        let own = ft_script(&f.wallet.address(), &ft_ref.reverse()).unwrap();
        f.give_token(own.clone(), 1_000, ft_ref, Operation::Ft);
        melt_ft(&f.ctx(), &ft_ref, 400).await.unwrap();
        let remaining = f.store.unspent_by_script(&own);
        assert_eq!(remaining.iter().map(|t| t.value).sum::<u64>(), 600);
    }
}
