//! Bundle minting
//!
//! A bundle mints many tokens in fixed-size batches:
//!
//! 1. With author/container claims, an asset base transaction anchors the
//!    claimed refs and a second transaction mints one delegate token per batch.
//! 2. A funding transaction creates one output per batch.
//! 3. Each batch spends its funding output in one commit transaction holding
//!    every token's commit output.
//! 4. Each batch is revealed in one transaction, burning its delegate token
//!    when the bundle has claims.
//!
//! Every transaction is signed and checkpointed before it is broadcast. A
//! retried run reuses the saved transaction, so a failure at any step never
//! leads to a second, different spend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

use crate::core::{Transaction, TxOutput, Utxo};
use crate::script::{
    delegate_base_script, delegate_token_script, p2pkh_script, tx_size, NFT_SCRIPT_LEN,
    P2PKH_SCRIPT_LEN, P2PKH_SCRIPT_SIG_SIZE,
};
use crate::storage::{load_json, save_json, StoreBatch};
use crate::token::Outpoint;
use crate::wallet::{SignedTransaction, TransactionBuilder, WalletContext};

use super::commit::{assign_commits, commit_fee, commit_layout, fund_reveal, TokenCommitData, TokenDraft};
use super::delegate::{
    base_utxo, build_delegate_base, build_delegate_tokens, delegate_ref, delegate_token_utxos,
    relink_anchors,
};
use super::reveal::{build_reveal, reveal_records, Reveal, RevealProof, ProofShape};
use super::{fund_outputs, FeeLedger, MintError};

/// A signed transaction of a bundle and whether it reached the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastStep {
    pub txid: String,
    pub hex: String,
    pub fee: u64,
    pub spent: Vec<Utxo>,
    /// Outputs kept out of coin selection
    pub reserved: Vec<u32>,
    pub broadcast: bool,
    pub prepared_at: DateTime<Utc>,
    pub broadcast_at: Option<DateTime<Utc>>,
}

impl BroadcastStep {
    pub fn new(signed: &SignedTransaction, spent: Vec<Utxo>, reserved: Vec<u32>) -> Self {
        Self {
            txid: signed.txid.clone(),
            hex: signed.hex.clone(),
            fee: signed.fee,
            spent,
            reserved,
            broadcast: false,
            prepared_at: Utc::now(),
            broadcast_at: None,
        }
    }

    pub fn signed(&self) -> Result<SignedTransaction, MintError> {
        Ok(SignedTransaction {
            tx: Transaction::from_hex(&self.hex)?,
            txid: self.txid.clone(),
            hex: self.hex.clone(),
            fee: self.fee,
        })
    }
}

fn is_broadcast(step: &Option<BroadcastStep>) -> bool {
    step.as_ref().is_some_and(|s| s.broadcast)
}

/// Broadcast `step` unless it already went out, then record it
///
/// A transaction the indexer already knows is recorded without being sent
/// again; this covers a crash between broadcast and checkpoint.
async fn send_step(
    ctx: &WalletContext<'_>,
    step: &mut BroadcastStep,
    extra: StoreBatch,
    fees: &mut FeeLedger,
    label: &str,
) -> Result<(), MintError> {
    if step.broadcast {
        return Ok(());
    }
    let signed = step.signed()?;
    if ctx.indexer.get_transaction(&step.txid).await.is_ok() {
        log::info!("{} {} already on chain", label, step.txid);
        let mut batch = ctx.record_batch_reserving(&signed, &step.spent, &step.reserved);
        batch.extend(extra);
        ctx.store.apply(batch)?;
    } else {
        ctx.broadcast_reserving::<MintError>(&signed, &step.spent, &step.reserved, extra)
            .await?;
    }
    step.broadcast = true;
    step.broadcast_at = Some(Utc::now());
    fees.record(label, &step.txid, step.fee);
    Ok(())
}

/// Asset base and delegate tokens of a bundle with claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateState {
    /// Claimed refs, display orientation
    pub refs: Vec<Outpoint>,
    pub base: Option<BroadcastStep>,
    pub tokens: Option<BroadcastStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleBatch {
    pub first: usize,
    pub count: usize,
    pub commit: Option<BroadcastStep>,
    pub reveal: Option<BroadcastStep>,
}

impl BundleBatch {
    pub fn range(&self) -> Range<usize> {
        self.first..self.first + self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStage {
    Prepared,
    Committing,
    Committed,
    Revealing,
    Done,
}

/// Expected cost of a bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEstimate {
    pub tokens: usize,
    pub batches: usize,
    /// Value locked in the minted token outputs
    pub token_value: u64,
    pub delegate_fees: u64,
    pub funding_fee: u64,
    pub commit_fees: u64,
    pub reveal_fees: u64,
    pub total: u64,
    /// Spendable RXD of the wallet
    pub available: u64,
}

impl BundleEstimate {
    pub fn affordable(&self) -> bool {
        self.available >= self.total
    }
}

/// Resumable state of a bundle mint, saved as JSON between steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleState {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: String,
    pub batch_size: usize,
    pub drafts: Vec<TokenDraft>,
    pub delegate: Option<DelegateState>,
    /// Filled once the delegate ref is known
    pub tokens: Vec<TokenCommitData>,
    pub batches: Vec<BundleBatch>,
    pub funding: Option<BroadcastStep>,
    pub fees: FeeLedger,
}

impl BundleState {
    pub fn new(owner: &str, drafts: Vec<TokenDraft>, batch_size: usize) -> Result<Self, MintError> {
        if batch_size == 0 {
            return Err(MintError::InvalidRequest("batch size must be positive".into()));
        }
        if drafts.is_empty() {
            return Err(MintError::InvalidRequest("bundle has no tokens".into()));
        }
        let mut refs: Vec<Outpoint> = Vec::new();
        for draft in &drafts {
            draft.validate()?;
            for reference in draft.proof_refs() {
                if !refs.contains(&reference) {
                    refs.push(reference);
                }
            }
        }
        let batches = (0..drafts.len())
            .step_by(batch_size)
            .map(|first| BundleBatch {
                first,
                count: batch_size.min(drafts.len() - first),
                commit: None,
                reveal: None,
            })
            .collect();
        let now = Utc::now();
        Ok(Self {
            created_at: now,
            updated_at: now,
            owner: owner.to_string(),
            batch_size,
            drafts,
            delegate: (!refs.is_empty()).then_some(DelegateState {
                refs,
                base: None,
                tokens: None,
            }),
            tokens: Vec::new(),
            batches,
            funding: None,
            fees: FeeLedger::default(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, MintError> {
        Ok(load_json(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), MintError> {
        Ok(save_json(path, self)?)
    }

    /// Stamp and save, when the bundle is backed by a file
    pub fn checkpoint(&mut self, path: Option<&Path>) -> Result<(), MintError> {
        self.updated_at = Utc::now();
        match path {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }

    pub fn stage(&self) -> BundleStage {
        let revealed = self.batches.iter().filter(|b| is_broadcast(&b.reveal)).count();
        let committed = self.batches.iter().filter(|b| is_broadcast(&b.commit)).count();
        let started = is_broadcast(&self.funding)
            || self
                .delegate
                .as_ref()
                .is_some_and(|d| is_broadcast(&d.base));
        if revealed == self.batches.len() {
            BundleStage::Done
        } else if revealed > 0 {
            BundleStage::Revealing
        } else if committed == self.batches.len() {
            BundleStage::Committed
        } else if started {
            BundleStage::Committing
        } else {
            BundleStage::Prepared
        }
    }

    fn check_owner(&self, ctx: &WalletContext<'_>) -> Result<(), MintError> {
        if self.owner != ctx.wallet.address() {
            return Err(MintError::InvalidRequest(format!(
                "bundle belongs to {}",
                self.owner
            )));
        }
        Ok(())
    }

    fn proof_shape(&self) -> ProofShape {
        if self.delegate.is_some() {
            ProofShape::delegate()
        } else {
            ProofShape::none()
        }
    }
}

/// Validate drafts, check claimed tokens are held and estimate the cost
pub fn prepare_bundle(
    ctx: &WalletContext<'_>,
    drafts: Vec<TokenDraft>,
    batch_size: usize,
) -> Result<(BundleState, BundleEstimate), MintError> {
    let state = BundleState::new(&ctx.wallet.address(), drafts, batch_size)?;
    if let Some(delegate) = &state.delegate {
        super::reveal::proof_holdings(ctx, &delegate.refs)?;
    }

    let fee_rate = ctx.params.fee_rate;
    let required = if state.delegate.is_some() {
        vec![Outpoint::zero()]
    } else {
        Vec::new()
    };
    let mut tokens = state
        .drafts
        .iter()
        .map(|d| TokenCommitData::new(&state.owner, d, required.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut estimate = BundleEstimate {
        tokens: tokens.len(),
        batches: state.batches.len(),
        ..BundleEstimate::default()
    };
    let mut funded = 0u64;
    for batch in &state.batches {
        let slice = &mut tokens[batch.range()];
        estimate.reveal_fees += fund_reveal(slice, &state.proof_shape(), fee_rate)?;
        let layout = commit_layout(&slice.iter().collect::<Vec<_>>())?;
        let fee = commit_fee(&layout, fee_rate);
        estimate.commit_fees += fee;
        funded += layout.iter().map(|o| o.value).sum::<u64>() + fee;
    }
    estimate.token_value = funded.saturating_sub(estimate.commit_fees + estimate.reveal_fees);
    estimate.funding_fee = fee_rate.fee_for_size(tx_size(
        &[P2PKH_SCRIPT_SIG_SIZE],
        &vec![P2PKH_SCRIPT_LEN; state.batches.len() + 1],
    ));

    if let Some(delegate) = &state.delegate {
        let zero_refs = vec![Outpoint::zero(); delegate.refs.len()];
        let base_len = delegate_base_script(&state.owner, &zero_refs)?.len();
        let token_len = delegate_token_script(&state.owner, &Outpoint::zero())?.len();
        let base_fee = tx_size(&[P2PKH_SCRIPT_SIG_SIZE], &[base_len, P2PKH_SCRIPT_LEN]);
        let mut token_outputs = vec![token_len; state.batches.len()];
        token_outputs.extend(std::iter::repeat(NFT_SCRIPT_LEN).take(delegate.refs.len()));
        token_outputs.push(P2PKH_SCRIPT_LEN);
        let tokens_fee = tx_size(&vec![P2PKH_SCRIPT_SIG_SIZE; 2 + delegate.refs.len()], &token_outputs);
        estimate.delegate_fees = fee_rate.fee_for_size(base_fee + tokens_fee);
    }

    estimate.total = funded + estimate.funding_fee + estimate.delegate_fees;
    estimate.available = ctx.rxd_inputs().iter().map(|i| i.utxo.value).sum();
    Ok((state, estimate))
}

/// Create the asset base and delegate tokens; returns the delegate ref
async fn delegate_steps(
    ctx: &WalletContext<'_>,
    state: &mut BundleState,
    checkpoint: Option<&Path>,
) -> Result<Option<Outpoint>, MintError> {
    let Some(refs) = state.delegate.as_ref().map(|d| d.refs.clone()) else {
        return Ok(None);
    };
    let count = state.batches.len();

    if state.delegate.as_ref().is_some_and(|d| d.base.is_none()) {
        let (signed, spent) = build_delegate_base(ctx, &refs)?;
        if let Some(delegate) = state.delegate.as_mut() {
            delegate.base = Some(BroadcastStep::new(&signed, spent, Vec::new()));
        }
        state.checkpoint(checkpoint)?;
    }
    let mut base_txid = None;
    if let Some(step) = state.delegate.as_mut().and_then(|d| d.base.as_mut()) {
        send_step(ctx, step, StoreBatch::new(), &mut state.fees, "delegate base").await?;
        base_txid = Some(step.txid.clone());
    }
    state.checkpoint(checkpoint)?;
    let base_txid = base_txid.ok_or_else(|| MintError::OutOfOrder("asset base missing".into()))?;
    let base = base_utxo(ctx, &base_txid, &refs)?;

    if state.delegate.as_ref().is_some_and(|d| d.tokens.is_none()) {
        let (signed, spent) = build_delegate_tokens(ctx, &base, &refs, count)?;
        if let Some(delegate) = state.delegate.as_mut() {
            delegate.tokens = Some(BroadcastStep::new(&signed, spent, Vec::new()));
        }
        state.checkpoint(checkpoint)?;
    }
    if let Some(step) = state.delegate.as_mut().and_then(|d| d.tokens.as_mut()) {
        let relinks = relink_anchors(ctx, &refs, &step.txid, count);
        send_step(ctx, step, relinks, &mut state.fees, "delegate tokens").await?;
    }
    state.checkpoint(checkpoint)?;
    Ok(Some(delegate_ref(&base)?))
}

/// Run the delegate, funding and commit steps of a bundle
///
/// Safe to call again after a failure: finished steps are skipped and a
/// prepared step is resent unchanged.
pub async fn commit_bundle(
    ctx: &WalletContext<'_>,
    state: &mut BundleState,
    checkpoint: Option<&Path>,
) -> Result<(), MintError> {
    state.check_owner(ctx)?;
    let delegate = delegate_steps(ctx, state, checkpoint).await?;
    let fee_rate = ctx.params.fee_rate;

    if state.tokens.is_empty() {
        let required: Vec<Outpoint> = delegate.iter().map(Outpoint::reverse).collect();
        state.tokens = state
            .drafts
            .iter()
            .map(|d| TokenCommitData::new(&state.owner, d, required.clone()))
            .collect::<Result<_, _>>()?;
        let shape = state.proof_shape();
        for batch in &state.batches {
            fund_reveal(&mut state.tokens[batch.range()], &shape, fee_rate)?;
        }
        state.checkpoint(checkpoint)?;
    }

    let owner_script = p2pkh_script(&state.owner)?;
    if state.funding.is_none() {
        let mut targets = Vec::with_capacity(state.batches.len());
        for batch in &state.batches {
            let layout = commit_layout(&state.tokens[batch.range()].iter().collect::<Vec<_>>())?;
            let value = layout.iter().map(|o| o.value).sum::<u64>() + commit_fee(&layout, fee_rate);
            targets.push(TxOutput::new(value, owner_script.clone()));
        }
        let (signed, spent) = fund_outputs(ctx, &[], &targets)?;
        let reserved = (0..targets.len() as u32).collect();
        state.funding = Some(BroadcastStep::new(&signed, spent, reserved));
        state.checkpoint(checkpoint)?;
    }
    let funding = match state.funding.as_mut() {
        Some(step) => {
            send_step(ctx, step, StoreBatch::new(), &mut state.fees, "funding").await?;
            step.signed()?
        }
        None => return Err(MintError::OutOfOrder("funding missing".into())),
    };
    state.checkpoint(checkpoint)?;

    for index in 0..state.batches.len() {
        if state.batches[index].commit.is_none() {
            let range = state.batches[index].range();
            let layout = commit_layout(&state.tokens[range.clone()].iter().collect::<Vec<_>>())?;
            let output = funding.tx.outputs.get(index).ok_or_else(|| {
                MintError::OutOfOrder(format!("funding has no output for batch {}", index))
            })?;
            let input = Utxo::new(funding.txid.clone(), index as u32, owner_script.clone(), output.value);
            let signed = TransactionBuilder::new(fee_rate)
                .add_input(input.clone())
                .add_outputs(layout)
                .signing_key(ctx.wallet.key())
                .build()?;
            let mut batch_tokens: Vec<&mut TokenCommitData> = state.tokens[range].iter_mut().collect();
            let reserved = assign_commits(&mut batch_tokens, &signed.txid, 0);
            state.batches[index].commit = Some(BroadcastStep::new(&signed, vec![input], reserved));
            state.checkpoint(checkpoint)?;
        }
        if let Some(step) = state.batches[index].commit.as_mut() {
            send_step(ctx, step, StoreBatch::new(), &mut state.fees, "commit").await?;
        }
        state.checkpoint(checkpoint)?;
    }
    log::info!(
        "Committed {} tokens in {} batches (fees so far {})",
        state.tokens.len(),
        state.batches.len(),
        state.fees.total()
    );
    Ok(())
}

async fn reveal_step(
    ctx: &WalletContext<'_>,
    state: &mut BundleState,
    index: usize,
    proof: RevealProof,
    checkpoint: Option<&Path>,
) -> Result<(), MintError> {
    let batch = state
        .batches
        .get(index)
        .ok_or_else(|| MintError::InvalidRequest(format!("no batch {}", index)))?;
    if !is_broadcast(&batch.commit) {
        return Err(MintError::OutOfOrder(format!("batch {} is not committed", index)));
    }
    let range = batch.range();
    if batch.reveal.is_none() {
        let reveal = build_reveal(ctx, &state.tokens[range.clone()], &proof)?;
        state.batches[index].reveal = Some(BroadcastStep::new(&reveal.signed, reveal.spent, Vec::new()));
        state.checkpoint(checkpoint)?;
    }

    let tokens = &state.tokens[range];
    if let Some(step) = state.batches[index].reveal.as_mut() {
        if !step.broadcast {
            let reveal = Reveal::restore(step.signed()?, tokens, &proof)?;
            let records = reveal_records(ctx, tokens, &proof, &reveal)?;
            send_step(ctx, step, records, &mut state.fees, "reveal").await?;
        }
    }
    state.checkpoint(checkpoint)
}

/// Reveal every batch of a bundle without claims
pub async fn reveal_direct(
    ctx: &WalletContext<'_>,
    state: &mut BundleState,
    checkpoint: Option<&Path>,
) -> Result<(), MintError> {
    state.check_owner(ctx)?;
    if state.delegate.is_some() {
        return Err(MintError::InvalidRequest(
            "bundle proves claims with delegate tokens, reveal it by batch".into(),
        ));
    }
    for index in 0..state.batches.len() {
        reveal_step(ctx, state, index, RevealProof::None, checkpoint).await?;
    }
    Ok(())
}

/// Reveal batch `index` of a bundle with claims, burning its delegate token
pub async fn reveal_batch(
    ctx: &WalletContext<'_>,
    state: &mut BundleState,
    index: usize,
    checkpoint: Option<&Path>,
) -> Result<(), MintError> {
    state.check_owner(ctx)?;
    let delegate = state
        .delegate
        .as_ref()
        .ok_or_else(|| MintError::InvalidRequest("bundle has no delegate tokens".into()))?;
    let (base_step, tokens_step) = match (&delegate.base, &delegate.tokens) {
        (Some(base), Some(tokens)) if base.broadcast && tokens.broadcast => (base, tokens),
        _ => return Err(MintError::OutOfOrder("delegate tokens are not minted".into())),
    };
    let base = base_utxo(ctx, &base_step.txid, &delegate.refs)?;
    let utxo = delegate_token_utxos(ctx, &tokens_step.txid, &base, state.batches.len())?
        .get(index)
        .cloned()
        .ok_or_else(|| MintError::InvalidRequest(format!("no batch {}", index)))?;
    let proof = RevealProof::Delegate {
        utxo,
        delegate_ref: delegate_ref(&base)?.reverse(),
    };
    reveal_step(ctx, state, index, proof, checkpoint).await
}

/// Reveal every batch, by delegate token when the bundle has claims
pub async fn reveal_bundle(
    ctx: &WalletContext<'_>,
    state: &mut BundleState,
    checkpoint: Option<&Path>,
) -> Result<(), MintError> {
    if state.delegate.is_none() {
        return reveal_direct(ctx, state, checkpoint).await;
    }
    for index in 0..state.batches.len() {
        reveal_batch(ctx, state, index, checkpoint).await?;
    }
    log::info!(
        "Revealed {} tokens, total fees {}",
        state.tokens.len(),
        state.fees.total()
    );
    Ok(())
}
