//! Reveal transactions
//!
//! A reveal spends commit outputs with `<sig> <pubkey> <magic> <op> <payload>`
//! and creates the token outputs. Author and container claims are proven
//! either by spending the claimed tokens alongside (direct) or by burning a
//! delegate token anchored to them.

use crate::core::{Txo, TxOutput, Utxo};
use crate::script::{delegate_burn_script, nft_script, Script, NFT_SCRIPT_LEN};
use crate::storage::StoreBatch;
use crate::token::{ContractType, Operation, Outpoint, SmartToken};
use crate::wallet::{SignedTransaction, TransactionBuilder, WalletContext};

use super::commit::TokenCommitData;
use super::MintError;

/// Inputs and output scripts a proof adds to a reveal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofShape {
    pub inputs: usize,
    pub output_scripts: Vec<usize>,
}

impl ProofShape {
    pub fn none() -> Self {
        Self {
            inputs: 0,
            output_scripts: Vec::new(),
        }
    }

    /// `count` claimed NFTs spent and returned
    pub fn direct(count: usize) -> Self {
        Self {
            inputs: count,
            output_scripts: vec![NFT_SCRIPT_LEN; count],
        }
    }

    /// One delegate token in, one burn marker out
    pub fn delegate() -> Self {
        Self {
            inputs: 1,
            output_scripts: vec![delegate_burn_script(&Outpoint::zero()).len()],
        }
    }
}

/// An NFT held by the wallet, spent to prove a claim
#[derive(Debug, Clone, PartialEq)]
pub struct ProofHolding {
    pub token: SmartToken,
    pub txo: Txo,
}

/// How a reveal proves its author and container claims
#[derive(Debug, Clone, PartialEq)]
pub enum RevealProof {
    None,
    Direct(Vec<ProofHolding>),
    Delegate {
        utxo: Utxo,
        /// Delegate ref, script orientation
        delegate_ref: Outpoint,
    },
}

impl RevealProof {
    pub fn shape(&self) -> ProofShape {
        match self {
            RevealProof::None => ProofShape::none(),
            RevealProof::Direct(holdings) => ProofShape::direct(holdings.len()),
            RevealProof::Delegate { .. } => ProofShape::delegate(),
        }
    }

    fn inputs(&self) -> Vec<Utxo> {
        match self {
            RevealProof::None => Vec::new(),
            RevealProof::Direct(holdings) => holdings.iter().map(|h| h.txo.to_utxo()).collect(),
            RevealProof::Delegate { utxo, .. } => vec![utxo.clone()],
        }
    }

    fn outputs(&self, owner: &str) -> Result<Vec<TxOutput>, MintError> {
        match self {
            RevealProof::None => Ok(Vec::new()),
            RevealProof::Direct(holdings) => holdings
                .iter()
                .map(|h| Ok(TxOutput::new(h.txo.value, nft_script(owner, &h.token.reference.reverse())?)))
                .collect(),
            RevealProof::Delegate { delegate_ref, .. } => {
                Ok(vec![TxOutput::new(0, delegate_burn_script(delegate_ref))])
            }
        }
    }
}

/// Claimed tokens the wallet must hold to prove `refs` directly
pub fn proof_holdings(ctx: &WalletContext<'_>, refs: &[Outpoint]) -> Result<Vec<ProofHolding>, MintError> {
    let owner = ctx.wallet.address();
    refs.iter()
        .map(|reference| {
            let missing = || MintError::MissingProof(reference.to_ref());
            let token = ctx.store.token(reference).ok_or_else(missing)?;
            let txo = token
                .last_txo_id
                .and_then(|id| ctx.store.txo_by_id(id))
                .filter(|t| !t.spent && !token.swap_pending)
                .ok_or_else(missing)?;
            if txo.script != nft_script(&owner, &reference.reverse())? {
                return Err(missing());
            }
            Ok(ProofHolding { token, txo })
        })
        .collect()
}

/// A signed reveal and where its token outputs landed
#[derive(Debug, Clone)]
pub struct Reveal {
    pub signed: SignedTransaction,
    pub spent: Vec<Utxo>,
    /// Vout of each token's first output
    pub token_vouts: Vec<u32>,
    /// Vout of the first proof output
    pub proof_vout: u32,
}

impl Reveal {
    /// Recover the layout of a reveal signed earlier
    pub fn restore(
        signed: SignedTransaction,
        tokens: &[TokenCommitData],
        proof: &RevealProof,
    ) -> Result<Self, MintError> {
        let mut spent = Vec::new();
        let mut token_vouts = Vec::with_capacity(tokens.len());
        let mut vout = 0u32;
        for token in tokens {
            let utxo = token.committed()?;
            spent.extend(token.reveal_inputs()?);
            token_vouts.push(vout);
            vout += token.reveal_outputs(&utxo.txid, utxo.vout)?.len() as u32;
        }
        spent.extend(proof.inputs());
        Ok(Self {
            signed,
            spent,
            token_vouts,
            proof_vout: vout,
        })
    }
}

/// Build and sign the reveal of committed `tokens`
pub fn build_reveal(
    ctx: &WalletContext<'_>,
    tokens: &[TokenCommitData],
    proof: &RevealProof,
) -> Result<Reveal, MintError> {
    let mut inputs = Vec::new();
    let mut unlock_data: Vec<Option<Script>> = Vec::new();
    let mut outputs = Vec::new();
    let mut token_vouts = Vec::with_capacity(tokens.len());

    for token in tokens {
        let utxo = token.committed()?;
        for (i, input) in token.reveal_inputs()?.into_iter().enumerate() {
            unlock_data.push((i == 0).then(|| token.rst.script_sig.clone()));
            inputs.push(input);
        }
        token_vouts.push(outputs.len() as u32);
        outputs.extend(token.reveal_outputs(&utxo.txid, utxo.vout)?);
    }
    let proof_vout = outputs.len() as u32;
    inputs.extend(proof.inputs());
    outputs.extend(proof.outputs(&ctx.wallet.address())?);

    let signed = TransactionBuilder::new(ctx.params.fee_rate)
        .add_inputs(inputs.iter().cloned())
        .add_outputs(outputs)
        .signing_key(ctx.wallet.key())
        .script_override(move |index, unlock| {
            unlock_data
                .get(index)
                .cloned()
                .flatten()
                .map(|data| unlock.clone().append(&data))
        })
        .build()?;

    Ok(Reveal {
        signed,
        spent: inputs,
        token_vouts,
        proof_vout,
    })
}

/// Token records for a broadcast reveal, plus relinked proof tokens
pub fn reveal_records(
    ctx: &WalletContext<'_>,
    tokens: &[TokenCommitData],
    proof: &RevealProof,
    reveal: &Reveal,
) -> Result<StoreBatch, MintError> {
    let txid = &reveal.signed.txid;
    let mut batch = StoreBatch::new();
    for (token, vout) in tokens.iter().zip(&reveal.token_vouts) {
        if token.operation == Operation::Dat {
            continue;
        }
        let (Some(reference), Some(decoded)) = (token.token_ref(), token.payload()) else {
            log::warn!("Skipping record of undecodable commit");
            continue;
        };
        let mut record = SmartToken::from_payload(
            reference,
            decoded.operation,
            &decoded.payload,
            decoded.payload.by_refs.first().map(Outpoint::reverse),
            decoded.payload.in_refs.first().map(Outpoint::reverse),
        );
        record.fresh = true;
        if !token.immutable {
            record.location = Some(reference.offset(1));
        }

        let output = &reveal.signed.tx.outputs[*vout as usize];
        let owned = token.dmint.is_none() && ctx.wallet.is_own_address(&token.recipient);
        if owned {
            let ct = if token.operation == Operation::Ft { ContractType::Ft } else { ContractType::Nft };
            let utxo = Utxo::new(txid.clone(), *vout, output.script.clone(), output.value);
            batch.insert_txo(Txo::new(utxo, None, ct));
            batch.put_token(record, Some((txid.clone(), *vout)));
        } else {
            batch.put_token(record, None);
        }
    }

    if let RevealProof::Direct(holdings) = proof {
        for (i, holding) in holdings.iter().enumerate() {
            batch.put_token(holding.token.clone(), Some((txid.clone(), reveal.proof_vout + i as u32)));
        }
    }
    Ok(batch)
}
