//! Delegate refs
//!
//! An asset base output lists the author/container refs. Spending it
//! requires those refs as inputs, and the spend creates a normal ref `D`
//! carried by single-use delegate tokens. A reveal that burns a delegate
//! token proves the minter controlled every listed ref, without naming them
//! in each commit.

use crate::core::{TxOutput, Utxo};
use crate::script::{delegate_base_script, delegate_token_script, nft_script, P2PKH_SCRIPT_SIG_SIZE};
use crate::storage::StoreBatch;
use crate::token::Outpoint;
use crate::wallet::{SelectInput, SignedTransaction, WalletContext};

use super::reveal::proof_holdings;
use super::{fund_outputs, MintError};

pub const DELEGATE_BASE_VALUE: u64 = 1;
pub const DELEGATE_TOKEN_VALUE: u64 = 1;

/// Build the asset base anchoring `refs` (display orientation) at vout 0
pub fn build_delegate_base(
    ctx: &WalletContext<'_>,
    refs: &[Outpoint],
) -> Result<(SignedTransaction, Vec<Utxo>), MintError> {
    let refs_le: Vec<Outpoint> = refs.iter().map(Outpoint::reverse).collect();
    let base = TxOutput::new(DELEGATE_BASE_VALUE, delegate_base_script(&ctx.wallet.address(), &refs_le)?);
    fund_outputs(ctx, &[], &[base])
}

/// The spendable base output of a broadcast base transaction
pub fn base_utxo(ctx: &WalletContext<'_>, txid: &str, refs: &[Outpoint]) -> Result<Utxo, MintError> {
    let refs_le: Vec<Outpoint> = refs.iter().map(Outpoint::reverse).collect();
    let script = delegate_base_script(&ctx.wallet.address(), &refs_le)?;
    Ok(Utxo::new(txid, 0, script, DELEGATE_BASE_VALUE))
}

/// Delegate ref created by spending `base`, display orientation
pub fn delegate_ref(base: &Utxo) -> Result<Outpoint, MintError> {
    Ok(Outpoint::from_utxo(&base.txid, base.vout)?)
}

/// Build the transaction minting `count` delegate tokens from `base`
///
/// The anchored NFTs are spent alongside and returned after the tokens.
pub fn build_delegate_tokens(
    ctx: &WalletContext<'_>,
    base: &Utxo,
    refs: &[Outpoint],
    count: usize,
) -> Result<(SignedTransaction, Vec<Utxo>), MintError> {
    let owner = ctx.wallet.address();
    let reference = delegate_ref(base)?.reverse();
    let holdings = proof_holdings(ctx, refs)?;

    let mut required = vec![SelectInput::with_script_sig_size(base.clone(), P2PKH_SCRIPT_SIG_SIZE)];
    required.extend(holdings.iter().map(|h| SelectInput::p2pkh(h.txo.to_utxo())));

    let token_script = delegate_token_script(&owner, &reference)?;
    let mut targets: Vec<TxOutput> = (0..count)
        .map(|_| TxOutput::new(DELEGATE_TOKEN_VALUE, token_script.clone()))
        .collect();
    for holding in &holdings {
        targets.push(TxOutput::new(
            holding.txo.value,
            nft_script(&owner, &holding.token.reference.reverse())?,
        ));
    }
    fund_outputs(ctx, &required, &targets)
}

/// Delegate token outputs of a broadcast tokens transaction
pub fn delegate_token_utxos(
    ctx: &WalletContext<'_>,
    txid: &str,
    base: &Utxo,
    count: usize,
) -> Result<Vec<Utxo>, MintError> {
    let script = delegate_token_script(&ctx.wallet.address(), &delegate_ref(base)?.reverse())?;
    Ok((0..count as u32)
        .map(|vout| Utxo::new(txid, vout, script.clone(), DELEGATE_TOKEN_VALUE))
        .collect())
}

/// Point the anchored NFTs at their new outputs after `count` delegate tokens
pub fn relink_anchors(ctx: &WalletContext<'_>, refs: &[Outpoint], txid: &str, count: usize) -> StoreBatch {
    let mut batch = StoreBatch::new();
    for (i, reference) in refs.iter().enumerate() {
        if let Some(token) = ctx.store.token(reference) {
            batch.put_token(token, Some((txid.to_string(), (count + i) as u32)));
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{parse_delegate_base_script, parse_delegate_token_script};
    use crate::storage::WalletStore;
    use crate::token::Operation;
    use crate::wallet::transfer::tests::Fixture;

    #[tokio::test]
    async fn test_base_then_tokens() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let author = Outpoint::from_utxo(&"a1".repeat(32), 0).unwrap();
        f.give_token(
            nft_script(&f.wallet.address(), &author.reverse()).unwrap(),
            1,
            author,
            Operation::Nft,
        );
        let ctx = f.ctx();

        let (signed, spent) = build_delegate_base(&ctx, &[author]).unwrap();
        let (refs, _) = parse_delegate_base_script(&signed.tx.outputs[0].script).unwrap();
        assert_eq!(refs, vec![author.reverse()]);
        let txid = ctx
            .broadcast::<MintError>(&signed, &spent, StoreBatch::new())
            .await
            .unwrap();

        let base = base_utxo(&ctx, &txid, &[author]).unwrap();
        let (signed, spent) = build_delegate_tokens(&ctx, &base, &[author], 3).unwrap();
        for output in &signed.tx.outputs[..3] {
            let parts = parse_delegate_token_script(&output.script);
            assert_eq!(parts.reference, Some(delegate_ref(&base).unwrap().reverse()));
        }
        let relinks = relink_anchors(&ctx, &[author], &signed.txid, 3);
        let txid = ctx.broadcast::<MintError>(&signed, &spent, relinks).await.unwrap();

        let token = f.store.token(&author).unwrap();
        let txo = f.store.txo_by_id(token.last_txo_id.unwrap()).unwrap();
        assert_eq!((txo.txid.as_str(), txo.vout), (txid.as_str(), 3));
        assert_eq!(delegate_token_utxos(&ctx, &txid, &base, 3).unwrap().len(), 3);
    }
}
