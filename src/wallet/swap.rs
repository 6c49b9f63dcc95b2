//! Peer-to-peer swaps with partially signed transactions
//!
//! The seller parks the offered asset on the swap address and signs that
//! single input with `SINGLE|ANYONECANPAY|FORKID`, committing only to output 0
//! (what the seller wants). The taker appends funding inputs and outputs and
//! broadcasts; the pre-signed input is carried through untouched.

use thiserror::Error;

use crate::core::{SighashFlags, Transaction, TransactionError, TxOutput, Utxo};
use crate::network::IndexerError;
use crate::script::{
    ft_script, nft_script, p2pkh_script, ScriptError, ScriptTemplate, Script,
};
use crate::storage::{StoreBatch, StoreError};
use crate::token::Outpoint;

use super::builder::{BuildError, TransactionBuilder};
use super::coin_select::{accumulate_inputs, select, SelectInput};
use super::context::WalletContext;
use super::transfer::{nft_holding, send_rxd, transfer_ft, transfer_nft, TransferError};

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Invalid swap transaction: {0}")]
    InvalidSwap(String),
    #[error("Offered output not found: {0}")]
    OfferNotFound(String),
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Insufficient token balance: have {have}, need {need}")]
    InsufficientTokenBalance { have: u64, need: u64 },
    #[error("Transfer error: {0}")]
    TransferError(#[from] TransferError),
    #[error("Build error: {0}")]
    BuildError(#[from] BuildError),
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("Network error: {0}")]
    NetworkError(#[from] IndexerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
}

/// An asset on one side of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAsset {
    Rxd(u64),
    Nft(Outpoint),
    Ft(Outpoint, u64),
}

impl SwapAsset {
    /// Output paying this asset to `address`
    pub fn output_to(&self, address: &str) -> Result<TxOutput, ScriptError> {
        Ok(match self {
            SwapAsset::Rxd(value) => TxOutput::new(*value, p2pkh_script(address)?),
            SwapAsset::Nft(reference) => TxOutput::new(1, nft_script(address, &reference.reverse())?),
            SwapAsset::Ft(reference, amount) => {
                TxOutput::new(*amount, ft_script(address, &reference.reverse())?)
            }
        })
    }

    fn from_output(output: &TxOutput) -> Option<(Self, String)> {
        match ScriptTemplate::match_script(&output.script) {
            ScriptTemplate::P2pkh { address } => Some((SwapAsset::Rxd(output.value), address)),
            ScriptTemplate::Nft { reference, address } => Some((SwapAsset::Nft(reference.reverse()), address)),
            ScriptTemplate::Ft { reference, address } => {
                Some((SwapAsset::Ft(reference.reverse(), output.value), address))
            }
            _ => None,
        }
    }
}

/// A prepared offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOffer {
    /// Output parked on the swap address
    pub offered: Utxo,
    /// Partially signed transaction for the taker
    pub partial_hex: String,
    /// Fee paid to park the asset
    pub fee: u64,
}

/// Park `offer` on the swap address and sign it against `want`
pub async fn prepare_swap(
    ctx: &WalletContext<'_>,
    offer: SwapAsset,
    want: SwapAsset,
) -> Result<SwapOffer, SwapError> {
    let swap_address = ctx.wallet.swap_address();
    let want_output = want.output_to(&ctx.wallet.address())?;
    let parked = offer.output_to(&swap_address)?;

    let moved = match offer {
        SwapAsset::Rxd(value) => send_rxd(ctx, &swap_address, value).await?,
        SwapAsset::Nft(reference) => transfer_nft(ctx, &reference, &swap_address).await?,
        SwapAsset::Ft(reference, amount) => transfer_ft(ctx, &reference, &swap_address, amount).await?,
    };
    let offered = Utxo::new(moved.txid.clone(), 0, parked.script, parked.value);

    let signed = TransactionBuilder::new(ctx.params.fee_rate)
        .add_input(offered.clone())
        .add_output(want_output)
        .signing_key(ctx.wallet.swap_key())
        .sighash_flags(SighashFlags::single_anyone_can_pay())
        .partial()
        .build()?;

    if let SwapAsset::Nft(reference) = offer {
        if let Some(mut token) = ctx.store.token(&reference) {
            token.swap_pending = true;
            let mut batch = StoreBatch::new();
            batch.put_token(token, Some((offered.txid.clone(), offered.vout)));
            ctx.store.apply(batch)?;
        }
    }

    log::info!("Prepared swap offer {}:{}", offered.txid, offered.vout);
    Ok(SwapOffer {
        offered,
        partial_hex: signed.hex,
        fee: moved.fee,
    })
}

/// What a partial transaction offers and asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTerms {
    pub offered: SwapAsset,
    pub offered_utxo: Utxo,
    pub wanted: SwapAsset,
    pub pay_to: String,
}

/// Decode a partial transaction against the chain
pub async fn inspect_swap(ctx: &WalletContext<'_>, partial_hex: &str) -> Result<SwapTerms, SwapError> {
    let partial = Transaction::from_hex(partial_hex)?;
    let (input, want) = match (partial.inputs.as_slice(), partial.outputs.as_slice()) {
        ([input], [want]) => (input, want),
        _ => return Err(SwapError::InvalidSwap("expected one input and one output".into())),
    };
    let prev = Transaction::from_hex(&ctx.indexer.get_transaction(&input.prev_txid).await?)?;
    let prev_output = prev
        .outputs
        .get(input.prev_vout as usize)
        .ok_or_else(|| SwapError::OfferNotFound(format!("{}:{}", input.prev_txid, input.prev_vout)))?;
    let (offered, _) = SwapAsset::from_output(prev_output)
        .ok_or_else(|| SwapError::InvalidSwap("unsupported offered output".into()))?;
    let (wanted, pay_to) = SwapAsset::from_output(want)
        .ok_or_else(|| SwapError::InvalidSwap("unsupported requested output".into()))?;
    Ok(SwapTerms {
        offered,
        offered_utxo: Utxo::new(input.prev_txid.clone(), input.prev_vout, prev_output.script.clone(), prev_output.value),
        wanted,
        pay_to,
    })
}

/// Take an offer: pay what it asks for and receive the offered asset
pub async fn complete_swap(ctx: &WalletContext<'_>, partial_hex: &str) -> Result<String, SwapError> {
    let partial = Transaction::from_hex(partial_hex)?;
    let terms = inspect_swap(ctx, partial_hex).await?;
    let seller_sig = partial.inputs[0].script_sig.clone();
    let want_output = partial.outputs[0].clone();
    let address = ctx.wallet.address();

    let mut required = vec![SelectInput::with_script_sig_size(
        terms.offered_utxo.clone(),
        seller_sig.len(),
    )];
    let mut targets = vec![want_output, terms.offered.output_to(&address)?];

    match terms.wanted {
        SwapAsset::Rxd(_) => {}
        SwapAsset::Nft(reference) => {
            let (_, txo) = nft_holding(ctx, &reference)?;
            required.push(SelectInput::p2pkh(txo.to_utxo()));
        }
        SwapAsset::Ft(reference, amount) => {
            let own = ft_script(&address, &reference.reverse())?;
            let holdings: Vec<Utxo> = ctx.store.unspent_by_script(&own).iter().map(|t| t.to_utxo()).collect();
            let acc = accumulate_inputs(&holdings, amount);
            if !acc.reached(amount) {
                return Err(SwapError::InsufficientTokenBalance {
                    have: acc.sum,
                    need: amount,
                });
            }
            if acc.sum > amount {
                targets.push(TxOutput::new(acc.sum - amount, own));
            }
            required.extend(acc.inputs.into_iter().map(SelectInput::p2pkh));
        }
    }

    let change = p2pkh_script(&address)?;
    let selection = select(&ctx.rxd_inputs(), &required, &targets, &change, &ctx.params);
    if !selection.funded {
        return Err(SwapError::InsufficientFunds {
            have: selection.input_value(),
            need: selection.output_value() + selection.fee,
        });
    }

    let spent: Vec<Utxo> = selection.inputs.iter().map(|i| i.utxo.clone()).collect();
    let signed = TransactionBuilder::new(ctx.params.fee_rate)
        .add_inputs(spent.iter().cloned())
        .add_outputs(selection.outputs.clone())
        .signing_key(ctx.wallet.key())
        .dust_threshold(ctx.params.dust_threshold)
        .script_override(move |index, _| (index == 0).then(|| seller_sig.clone()))
        .build()?;

    let txid = ctx.broadcast::<SwapError>(&signed, &spent[1..], StoreBatch::new()).await?;
    log::info!("Completed swap {}", txid);
    Ok(txid)
}

/// Withdraw an offer by spending the parked output back to the main address
pub async fn cancel_swap(ctx: &WalletContext<'_>, offered: &Utxo) -> Result<String, SwapError> {
    let address = ctx.wallet.address();
    let (asset, owner) = SwapAsset::from_output(&TxOutput::new(offered.value, offered.script.clone()))
        .ok_or_else(|| SwapError::InvalidSwap("unsupported offered output".into()))?;
    if owner != ctx.wallet.swap_address() {
        return Err(SwapError::OfferNotFound(format!("{}:{}", offered.txid, offered.vout)));
    }

    let required = [SelectInput::p2pkh(offered.clone())];
    let targets = match asset {
        SwapAsset::Rxd(_) => vec![],
        other => vec![other.output_to(&address)?],
    };
    let change: Script = p2pkh_script(&address)?;
    let selection = select(&ctx.rxd_inputs(), &required, &targets, &change, &ctx.params);
    if !selection.funded {
        return Err(SwapError::InsufficientFunds {
            have: selection.input_value(),
            need: selection.output_value() + selection.fee,
        });
    }

    let spent: Vec<Utxo> = selection.inputs.iter().map(|i| i.utxo.clone()).collect();
    let mut builder = TransactionBuilder::new(ctx.params.fee_rate)
        .add_inputs(spent.iter().cloned())
        .add_outputs(selection.outputs.clone())
        .dust_threshold(ctx.params.dust_threshold);
    // swap key for the parked output, main key for the funding
    builder = builder.signing_key(ctx.wallet.swap_key());
    for _ in 1..spent.len() {
        builder = builder.signing_key(ctx.wallet.key());
    }
    let signed = builder.build()?;

    let mut extra = StoreBatch::new();
    if let SwapAsset::Nft(reference) = asset {
        if let Some(mut token) = ctx.store.token(&reference) {
            token.swap_pending = false;
            extra.put_token(token, Some((signed.txid.clone(), 0)));
        }
    }
    let txid = ctx.broadcast::<SwapError>(&signed, &spent, extra).await?;
    log::info!("Cancelled swap {}:{}", offered.txid, offered.vout);
    Ok(txid)
}
