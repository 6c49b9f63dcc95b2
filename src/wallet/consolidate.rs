//! Merging many small outputs into one
//!
//! Each round spends at most `max_inputs` outputs plus the previous round's
//! result, so a wallet of any size converges without exceeding relay limits.

use thiserror::Error;

use crate::core::{TxOutput, Utxo};
use crate::network::IndexerError;
use crate::script::{ft_script, p2pkh_script, Script, ScriptError};
use crate::storage::{keys, StoreBatch, StoreError};
use crate::token::{Outpoint, TokenType};

use super::builder::{BuildError, TransactionBuilder};
use super::coin_select::{select, SelectInput};
use super::context::WalletContext;

#[derive(Error, Debug)]
pub enum ConsolidationError {
    /// The wallet cannot pay a round's fee; add funds or resync
    #[error("Insufficient funds for consolidation: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("max_inputs must be at least 1")]
    InvalidBatchSize,
    #[error("Build error: {0}")]
    BuildError(#[from] BuildError),
    #[error("Network error: {0}")]
    NetworkError(#[from] IndexerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
}

/// Broadcast rounds of one consolidation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationResult {
    pub txids: Vec<String>,
    pub fee: u64,
}

impl ConsolidationResult {
    fn merge(&mut self, other: ConsolidationResult) {
        self.txids.extend(other.txids);
        self.fee += other.fee;
    }
}

/// Merge every spendable coin of the main address
pub async fn consolidate_rxd(
    ctx: &WalletContext<'_>,
    max_inputs: usize,
) -> Result<ConsolidationResult, ConsolidationError> {
    if max_inputs == 0 {
        return Err(ConsolidationError::InvalidBatchSize);
    }
    let change = p2pkh_script(&ctx.wallet.address())?;
    let coins: Vec<SelectInput> = ctx.rxd_inputs();
    let mut result = ConsolidationResult::default();
    let mut carried: Option<Utxo> = None;

    for chunk in coins.chunks(max_inputs) {
        let mut required: Vec<SelectInput> = carried.take().map(SelectInput::p2pkh).into_iter().collect();
        required.extend(chunk.iter().cloned());
        if required.len() < 2 {
            break;
        }

        let selection = select(&[], &required, &[], &change, &ctx.params);
        if !selection.funded || selection.outputs.is_empty() {
            return Err(ConsolidationError::InsufficientFunds {
                have: selection.input_value(),
                need: selection.fee + ctx.params.dust_threshold + 1,
            });
        }

        let spent: Vec<Utxo> = selection.inputs.iter().map(|i| i.utxo.clone()).collect();
        let signed = TransactionBuilder::new(ctx.params.fee_rate)
            .add_inputs(spent.iter().cloned())
            .add_outputs(selection.outputs.clone())
            .signing_key(ctx.wallet.key())
            .dust_threshold(ctx.params.dust_threshold)
            .build()?;
        let txid = ctx.broadcast::<ConsolidationError>(&signed, &spent, StoreBatch::new()).await?;
        log::info!("Consolidated {} coins into {}", spent.len(), txid);

        carried = signed
            .tx
            .outputs
            .first()
            .map(|o| Utxo::new(txid.clone(), 0, o.script.clone(), o.value));
        result.txids.push(txid);
        result.fee += signed.fee;
    }
    Ok(result)
}

/// Merge the holdings of one fungible token, paying fees from coins
pub async fn consolidate_ft(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
    max_inputs: usize,
) -> Result<ConsolidationResult, ConsolidationError> {
    if max_inputs == 0 {
        return Err(ConsolidationError::InvalidBatchSize);
    }
    let token_script = ft_script(&ctx.wallet.address(), &reference.reverse())?;
    let change = p2pkh_script(&ctx.wallet.address())?;
    let holdings: Vec<Utxo> = ctx
        .store
        .unspent_by_script(&token_script)
        .iter()
        .map(|t| t.to_utxo())
        .collect();
    let mut result = ConsolidationResult::default();
    let mut carried: Option<Utxo> = None;

    for chunk in holdings.chunks(max_inputs) {
        let mut tokens: Vec<Utxo> = carried.take().into_iter().collect();
        tokens.extend(chunk.iter().cloned());
        if tokens.len() < 2 {
            break;
        }
        let amount: u64 = tokens.iter().map(|u| u.value).sum();
        let required: Vec<SelectInput> = tokens.iter().cloned().map(SelectInput::p2pkh).collect();
        let targets = [TxOutput::new(amount, token_script.clone())];

        let selection = select(&ctx.rxd_inputs(), &required, &targets, &change, &ctx.params);
        if !selection.funded {
            return Err(ConsolidationError::InsufficientFunds {
                have: selection.input_value().saturating_sub(amount),
                need: selection.fee,
            });
        }

        let spent: Vec<Utxo> = selection.inputs.iter().map(|i| i.utxo.clone()).collect();
        let signed = TransactionBuilder::new(ctx.params.fee_rate)
            .add_inputs(spent.iter().cloned())
            .add_outputs(selection.outputs.clone())
            .signing_key(ctx.wallet.key())
            .dust_threshold(ctx.params.dust_threshold)
            .build()?;
        let txid = ctx.broadcast::<ConsolidationError>(&signed, &spent, StoreBatch::new()).await?;
        log::info!("Consolidated {} outputs of {} into {}", tokens.len(), reference.short_ref(), txid);

        carried = Some(Utxo::new(txid.clone(), 0, token_script.clone(), amount));
        result.txids.push(txid);
        result.fee += signed.fee;
    }
    Ok(result)
}

/// Consolidate everything over `threshold` and clear the required flag
pub async fn consolidate_all(
    ctx: &WalletContext<'_>,
    threshold: usize,
    max_inputs: usize,
) -> Result<ConsolidationResult, ConsolidationError> {
    let mut result = ConsolidationResult::default();
    if ctx.rxd_inputs().len() > threshold {
        result.merge(consolidate_rxd(ctx, max_inputs).await?);
    }

    let address = ctx.wallet.address();
    for token in ctx.store.tokens() {
        if token.spent || token.token_type != TokenType::Ft {
            continue;
        }
        let script: Script = ft_script(&address, &token.reference.reverse())?;
        if ctx.store.unspent_by_script(&script).len() > threshold {
            result.merge(consolidate_ft(ctx, &token.reference, max_inputs).await?);
        }
    }

    let mut batch = StoreBatch::new();
    batch.put_kv(keys::CONSOLIDATION_REQUIRED, serde_json::Value::Bool(false));
    ctx.store.apply(batch)?;
    log::debug!(
        "Consolidation finished: {} transactions, fee {}",
        result.txids.len(),
        result.fee
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WalletStore;
    use crate::token::{ContractType, Operation};
    use crate::wallet::transfer::tests::Fixture;

    #[tokio::test]
    async fn test_rxd_rounds_chain_previous_output() {
        let f = Fixture::new();
        for _ in 0..5 {
            f.fund(20_000_000);
        }

        let result = consolidate_rxd(&f.ctx(), 2).await.unwrap();
        // rounds: 2, then carried + 2, then carried + 1
        assert_eq!(result.txids.len(), 3);
        let second = f.indexer.transaction(&result.txids[1]).unwrap();
        assert_eq!(second.inputs[0].prev_txid, result.txids[0]);
        assert_eq!(second.inputs.len(), 3);

        let unspent = f.store.unspent(ContractType::Rxd);
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].value + result.fee, 100_000_000);
    }

    #[tokio::test]
    async fn test_ft_consolidation_pays_fee_in_rxd() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let reference = Outpoint::from_utxo(&"ab".repeat(32), 0).unwrap();
        let script = ft_script(&f.wallet.address(), &reference.reverse()).unwrap();
        for value in [100, 200, 300] {
            f.give_token(script.clone(), value, reference, Operation::Ft);
        }

        let result = consolidate_ft(&f.ctx(), &reference, 200).await.unwrap();
        assert_eq!(result.txids.len(), 1);
        let holdings = f.store.unspent_by_script(&script);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].value, 600);
        let coins = f.store.unspent(ContractType::Rxd);
        assert_eq!(coins[0].value + result.fee, 100_000_000);
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_distinguishable() {
        let f = Fixture::new();
        let reference = Outpoint::from_utxo(&"cd".repeat(32), 0).unwrap();
        let script = ft_script(&f.wallet.address(), &reference.reverse()).unwrap();
        f.give_token(script.clone(), 10, reference, Operation::Ft);
        f.give_token(script, 10, reference, Operation::Ft);

        let err = consolidate_ft(&f.ctx(), &reference, 200).await.unwrap_err();
        assert!(matches!(err, ConsolidationError::InsufficientFunds { .. }));
        assert_eq!(f.indexer.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_consolidate_all_clears_flag() {
        let f = Fixture::new();
        for _ in 0..4 {
            f.fund(10_000_000);
        }
        let result = consolidate_all(&f.ctx(), 3, 200).await.unwrap();
        assert_eq!(result.txids.len(), 1);
        assert_eq!(
            f.store.kv(keys::CONSOLIDATION_REQUIRED),
            Some(serde_json::Value::Bool(false))
        );
    }
}
