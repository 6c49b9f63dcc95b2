//! Mutable NFT transitions
//!
//! A mutable NFT is revealed next to a contract output holding the hash of
//! its current payload. `mod` spends the contract together with the NFT and
//! recreates it with the new payload hash; `sl` spends it without recreating
//! it, which freezes the token.

use crate::core::{Transaction, TxOutput, Utxo};
use crate::script::{
    mutable_nft_script, nft_script, p2pkh_script, parse_mutable_nft_script, P2PKH_SCRIPT_SIG_SIZE,
};
use crate::storage::StoreBatch;
use crate::token::{encode_rst_mutable, Operation, Outpoint, SmartToken, TokenPayload};
use crate::wallet::{select, SelectInput, TransactionBuilder, WalletContext};

use super::reveal::proof_holdings;
use super::MintError;

/// Vout of the NFT in a transition
const TOKEN_OUTPUT: i64 = 0;
/// Vout of the recreated contract in a `mod` transition
const CONTRACT_OUTPUT: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    pub txid: String,
    pub fee: u64,
    pub payload_hash: [u8; 32],
}

/// Current contract output of a mutable token
async fn current_contract(ctx: &WalletContext<'_>, token: &SmartToken) -> Result<Utxo, MintError> {
    let not_found = || MintError::ContractNotFound(token.reference.to_ref());
    let location = token.location.ok_or_else(not_found)?;
    let locations = ctx.indexer.get_ref(&location.to_ref()).await?;
    let latest = locations.last().ok_or_else(not_found)?;
    let tx = Transaction::from_hex(&ctx.indexer.get_transaction(&latest.tx_hash).await?)?;

    let mutable_ref = location.reverse();
    tx.outputs
        .iter()
        .enumerate()
        .find(|(_, output)| {
            parse_mutable_nft_script(&output.script)
                .is_some_and(|p| p.mutable_ref == mutable_ref && p.token_ref == token.reference.reverse())
        })
        .map(|(vout, output)| Utxo::new(latest.tx_hash.clone(), vout as u32, output.script.clone(), output.value))
        .ok_or_else(not_found)
}

async fn transition(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
    operation: Operation,
    payload: &TokenPayload,
) -> Result<MutationResult, MintError> {
    let token = ctx
        .store
        .token(reference)
        .ok_or_else(|| MintError::TokenNotFound(reference.to_ref()))?;
    if token.immutable {
        return Err(MintError::InvalidRequest(format!("{} is immutable", reference.short_ref())));
    }
    let holding = proof_holdings(ctx, std::slice::from_ref(reference))?
        .pop()
        .ok_or_else(|| MintError::MissingProof(reference.to_ref()))?;
    let contract = current_contract(ctx, &token).await?;

    let mutation = encode_rst_mutable(operation, payload, CONTRACT_OUTPUT, 0, 0, TOKEN_OUTPUT)?;
    let owner = ctx.wallet.address();
    let mut targets = vec![TxOutput::new(holding.txo.value, nft_script(&owner, &reference.reverse())?)];
    if operation == Operation::Mod {
        let mutable_ref = token.location.ok_or_else(|| MintError::ContractNotFound(reference.to_ref()))?;
        targets.push(TxOutput::new(
            contract.value,
            mutable_nft_script(&mutable_ref.reverse(), &reference.reverse(), &mutation.payload_hash),
        ));
    }
    let required = [
        SelectInput::with_script_sig_size(holding.txo.to_utxo(), P2PKH_SCRIPT_SIG_SIZE),
        SelectInput::with_script_sig_size(contract, mutation.script.len()),
    ];

    let change = p2pkh_script(&owner)?;
    let selection = select(&ctx.rxd_inputs(), &required, &targets, &change, &ctx.params);
    if !selection.funded {
        return Err(MintError::InsufficientFunds {
            have: selection.input_value(),
            need: selection.output_value() + selection.fee,
        });
    }
    let spent: Vec<Utxo> = selection.inputs.iter().map(|i| i.utxo.clone()).collect();
    let unlock = mutation.script.clone();
    let signed = TransactionBuilder::new(ctx.params.fee_rate)
        .add_inputs(spent.iter().cloned())
        .add_outputs(selection.outputs)
        .signing_key(ctx.wallet.key())
        .dust_threshold(ctx.params.dust_threshold)
        .script_override(move |index, _| (index == 1).then(|| unlock.clone()))
        .build()?;

    let mut updated = match operation {
        Operation::Mod => {
            let mut t = SmartToken::from_payload(*reference, Operation::Nft, payload, token.author, token.container);
            t.immutable = false;
            t.location = token.location;
            t.fresh = token.fresh;
            t.height = token.height;
            t
        }
        _ => {
            let mut t = token.clone();
            t.immutable = true;
            t.location = None;
            t
        }
    };
    updated.id = token.id;
    let mut extra = StoreBatch::new();
    extra.put_token(updated, Some((signed.txid.clone(), TOKEN_OUTPUT as u32)));
    let txid = ctx.broadcast::<MintError>(&signed, &spent, extra).await?;

    log::info!("{} {} in {}", operation.as_str(), reference.short_ref(), txid);
    Ok(MutationResult {
        txid,
        fee: signed.fee,
        payload_hash: mutation.payload_hash,
    })
}

/// Replace the payload of a mutable NFT
pub async fn mutate_token(
    ctx: &WalletContext<'_>,
    reference: &Outpoint,
    payload: &TokenPayload,
) -> Result<MutationResult, MintError> {
    if payload.meta_str("name").is_none() {
        return Err(MintError::InvalidRequest("mutated payload needs a name".into()));
    }
    transition(ctx, reference, Operation::Mod, payload).await
}

/// Make a mutable NFT permanently immutable
pub async fn seal_token(ctx: &WalletContext<'_>, reference: &Outpoint) -> Result<MutationResult, MintError> {
    transition(ctx, reference, Operation::Sl, &TokenPayload::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mint::{mint_token, TokenDraft};
    use crate::storage::WalletStore;
    use crate::token::ContractType;
    use crate::wallet::transfer::tests::Fixture;

    async fn minted_mutable(f: &Fixture) -> Outpoint {
        f.fund(200_000_000);
        let mut draft = TokenDraft::nft("Before");
        draft.immutable = false;
        mint_token(&f.ctx(), &draft).await.unwrap().reference
    }

    fn renamed(name: &str) -> TokenPayload {
        let mut payload = TokenPayload::default();
        payload.meta.insert("name".into(), ciborium::Value::Text(name.into()));
        payload
    }

    #[tokio::test]
    async fn test_mutate_recreates_contract() {
        let f = Fixture::new();
        let reference = minted_mutable(&f).await;

        let result = mutate_token(&f.ctx(), &reference, &renamed("After")).await.unwrap();
        let tx = f.indexer.transaction(&result.txid).unwrap();
        assert_eq!(
            crate::script::parse_nft_script(&tx.outputs[0].script).reference,
            Some(reference.reverse())
        );
        let contract = parse_mutable_nft_script(&tx.outputs[1].script).unwrap();
        assert_eq!(contract.payload_hash, result.payload_hash);
        assert_eq!(contract.mutable_ref, reference.offset(1).reverse());

        let token = f.store.token(&reference).unwrap();
        assert_eq!(token.name, "After");
        assert!(!token.immutable);
        let txo = f.store.txo_by_id(token.last_txo_id.unwrap()).unwrap();
        assert_eq!((txo.txid.as_str(), txo.vout), (result.txid.as_str(), 0));

        // contract is found again at its new location
        let again = mutate_token(&f.ctx(), &reference, &renamed("Again")).await.unwrap();
        assert_ne!(again.txid, result.txid);
    }

    #[tokio::test]
    async fn test_seal_freezes_token() {
        let f = Fixture::new();
        let reference = minted_mutable(&f).await;

        let result = seal_token(&f.ctx(), &reference).await.unwrap();
        let tx = f.indexer.transaction(&result.txid).unwrap();
        assert!(tx.outputs.iter().all(|o| parse_mutable_nft_script(&o.script).is_none()));

        let token = f.store.token(&reference).unwrap();
        assert!(token.immutable);
        assert_eq!(token.location, None);
        assert_eq!(f.store.unspent(ContractType::Nft).len(), 1);
        assert!(matches!(
            mutate_token(&f.ctx(), &reference, &renamed("Late")).await,
            Err(MintError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_immutable_token_cannot_mutate() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let reference = mint_token(&f.ctx(), &TokenDraft::nft("Fixed")).await.unwrap().reference;
        assert!(matches!(
            seal_token(&f.ctx(), &reference).await,
            Err(MintError::InvalidRequest(_))
        ));
    }
}
