//! Token discovery
//!
//! A ref first seen in a wallet output is resolved from its reveal: the
//! transaction spending the commit outpoint the ref was created from. The
//! payload is checked against the commit's payload hash, and author and
//! container claims are kept only when the commit required the claimed ref
//! or a delegate burn in the reveal points at an asset base listing it.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::Transaction;
use crate::network::{ChainIndexer, IndexerError};
use crate::script::{parse_commit_script, parse_delegate_base_script, parse_delegate_burn_script, CommitParams};
use crate::token::{decode_atom, DecodedPayload, Operation, Outpoint, SmartToken};

use super::SyncError;

/// Resolves refs for one sync run, caching fetched transactions
pub struct Resolver<'a> {
    indexer: &'a dyn ChainIndexer,
    transactions: Mutex<HashMap<String, Transaction>>,
}

fn spends(tx: &Transaction, outpoint: &Outpoint) -> bool {
    let txid = outpoint.txid();
    tx.inputs
        .iter()
        .any(|i| i.prev_txid == txid && i.prev_vout == outpoint.vout())
}

impl<'a> Resolver<'a> {
    pub fn new(indexer: &'a dyn ChainIndexer) -> Self {
        Self {
            indexer,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn transaction(&self, txid: &str) -> Result<Transaction, SyncError> {
        if let Some(tx) = self.transactions.lock().ok().and_then(|c| c.get(txid).cloned()) {
            return Ok(tx);
        }
        let tx = Transaction::from_hex(&self.indexer.get_transaction(txid).await?)?;
        if let Ok(mut cache) = self.transactions.lock() {
            cache.insert(txid.to_string(), tx.clone());
        }
        Ok(tx)
    }

    /// Resolve a ref (display orientation) to a token record
    ///
    /// `holder` is the transaction containing the wallet output carrying the
    /// ref; when it is the reveal itself the token is marked fresh. Returns
    /// `Ok(None)` for refs that cannot be decoded; only fetch failures are errors.
    pub async fn resolve(
        &self,
        reference: Outpoint,
        holder: Option<&str>,
        height: Option<u32>,
    ) -> Result<Option<SmartToken>, SyncError> {
        let mut reveal = None;
        let mut fresh = false;
        let mut height = height;
        if let Some(txid) = holder {
            let tx = self.transaction(txid).await?;
            if spends(&tx, &reference) {
                reveal = Some(tx);
                fresh = true;
            }
        }
        let reveal = match reveal {
            Some(tx) => tx,
            None => {
                let locations = match self.indexer.get_ref(&reference.to_ref()).await {
                    Ok(locations) => locations,
                    Err(IndexerError::NotFound(_)) => Vec::new(),
                    Err(e) => return Err(e.into()),
                };
                let Some(mint) = locations.first() else {
                    log::warn!("No location for ref {}", reference.short_ref());
                    return Ok(None);
                };
                height = u32::try_from(mint.height).ok().filter(|h| *h > 0);
                self.transaction(&mint.tx_hash).await?
            }
        };

        let Some(decoded) = reveal_payload(&reveal, &reference) else {
            log::warn!("No reveal payload for ref {}", reference.short_ref());
            return Ok(None);
        };
        let commit = self.transaction(&reference.txid()).await?;
        let Some(params) = commit
            .outputs
            .get(reference.vout() as usize)
            .and_then(|o| parse_commit_script(&o.script))
        else {
            log::warn!("Ref {} was not created from a commit output", reference.short_ref());
            return Ok(None);
        };
        if decoded.payload_hash() != params.payload_hash {
            log::warn!("Payload hash mismatch for ref {}", reference.short_ref());
            return Ok(None);
        }

        let burn = reveal
            .outputs
            .iter()
            .find_map(|o| parse_delegate_burn_script(&o.script));
        let author = self
            .verify_claim(decoded.payload.by_refs.first(), &params, burn)
            .await;
        let container = self
            .verify_claim(decoded.payload.in_refs.first(), &params, burn)
            .await;

        let mut token = SmartToken::from_payload(reference, decoded.operation, &decoded.payload, author, container);
        token.fresh = fresh;
        token.height = height;
        if !token.immutable {
            token.location = Some(reference.offset(1));
            self.apply_latest_mutation(&mut token, reveal_txid(&reveal)).await?;
        }
        Ok(Some(token))
    }

    /// Keep a claimed ref (script orientation) only if the mint proved it
    async fn verify_claim(
        &self,
        claim: Option<&Outpoint>,
        params: &CommitParams,
        burn: Option<Outpoint>,
    ) -> Option<Outpoint> {
        let claim = *claim?;
        if params.required_refs.contains(&claim) {
            return Some(claim.reverse());
        }
        let delegate = burn.filter(|d| params.required_refs.contains(d))?.reverse();
        let base = match self.transaction(&delegate.txid()).await {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("Asset base {} unavailable: {}", delegate.short_ref(), e);
                return None;
            }
        };
        let (refs, _) = base
            .outputs
            .get(delegate.vout() as usize)
            .and_then(|o| parse_delegate_base_script(&o.script))?;
        if refs.contains(&claim) {
            Some(claim.reverse())
        } else {
            log::warn!("Unproven claim {} ignored", claim.reverse().short_ref());
            None
        }
    }

    /// Apply the payload of the latest `mod` transition of a mutable token
    async fn apply_latest_mutation(&self, token: &mut SmartToken, reveal_txid: Option<String>) -> Result<(), SyncError> {
        let Some(location) = token.location else {
            return Ok(());
        };
        let locations = match self.indexer.get_ref(&location.to_ref()).await {
            Ok(locations) => locations,
            Err(e) => {
                log::debug!("No contract history for {}: {}", location.short_ref(), e);
                return Ok(());
            }
        };
        let Some(latest) = locations.last().filter(|l| Some(&l.tx_hash) != reveal_txid.as_ref()) else {
            return Ok(());
        };
        let tx = self.transaction(&latest.tx_hash).await?;
        let mutation = tx
            .inputs
            .iter()
            .filter_map(|i| decode_atom(&i.script_sig))
            .find(|d| d.operation == Operation::Mod);
        if let Some(decoded) = mutation {
            let mut updated = SmartToken::from_payload(
                token.reference,
                Operation::Nft,
                &decoded.payload,
                token.author,
                token.container,
            );
            updated.immutable = false;
            updated.location = token.location;
            updated.fresh = token.fresh;
            updated.height = token.height;
            *token = updated;
        }
        Ok(())
    }
}

fn reveal_txid(tx: &Transaction) -> Option<String> {
    tx.txid().ok()
}

/// Payload in the input of `reveal` spending the commit outpoint of `reference`
fn reveal_payload(reveal: &Transaction, reference: &Outpoint) -> Option<DecodedPayload> {
    let txid = reference.txid();
    let input = reveal
        .inputs
        .iter()
        .find(|i| i.prev_txid == txid && i.prev_vout == reference.vout())?;
    decode_atom(&input.script_sig).filter(|d| matches!(d.operation, Operation::Nft | Operation::Ft))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mint::{mint_token, TokenDraft};
    use crate::script::nft_script;
    use crate::wallet::transfer::tests::Fixture;

    #[tokio::test]
    async fn test_resolve_minted_token() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let mut draft = TokenDraft::nft("Found");
        draft.description = "on chain".into();
        let minted = mint_token(&f.ctx(), &draft).await.unwrap();

        let resolver = Resolver::new(&f.indexer);
        let token = resolver
            .resolve(minted.reference, Some(&minted.reveal_txid), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.name, "Found");
        assert_eq!(token.description, "on chain");
        assert!(token.fresh);

        // through the ref index when the holder is a later transfer
        let token = resolver.resolve(minted.reference, None, None).await.unwrap().unwrap();
        assert!(!token.fresh);
        assert_eq!(token.name, "Found");
    }

    #[tokio::test]
    async fn test_non_canonical_payload_resolves() {
        use crate::core::{TxInput, TxOutput};
        use crate::crypto::double_sha256;
        use crate::script::{nft_commit_script, Script};
        use crate::token::{PayloadFormat, TokenPayload, RST_MAGIC};
        use ciborium::Value;

        let f = Fixture::new();
        let address = f.wallet.address();

        // "p" sorts before "meta" in canonical order, and is not a known key
        let value = Value::Map(vec![
            (
                Value::Text("meta".into()),
                Value::Map(vec![(Value::Text("name".into()), Value::Text("Loose".into()))]),
            ),
            (Value::Text("p".into()), Value::Array(vec![Value::Integer(2.into())])),
        ]);
        let mut raw = Vec::new();
        ciborium::into_writer(&value, &mut raw).unwrap();
        assert_ne!(TokenPayload::from_cbor(&raw).unwrap().to_cbor().unwrap(), raw);

        let commit_script =
            nft_commit_script(&address, double_sha256(&raw), PayloadFormat::Rst, Vec::new()).unwrap();
        let commit = f.indexer.fund(&commit_script, 10_000).unwrap();
        let reference = Outpoint::from_utxo(&commit.txid, commit.vout).unwrap();

        let mut input = TxInput::new(commit.txid.clone(), commit.vout);
        input.script_sig = Script::new().push(&RST_MAGIC).push(b"nft").push(&raw);
        let reveal = Transaction::new(
            vec![input],
            vec![TxOutput::new(1, nft_script(&address, &reference.reverse()).unwrap())],
        );
        let reveal_txid = f.indexer.broadcast(&reveal.to_hex().unwrap()).await.unwrap();

        let token = Resolver::new(&f.indexer)
            .resolve(reference, Some(&reveal_txid), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.name, "Loose");
    }

    #[tokio::test]
    async fn test_direct_author_claim_verified() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let author = mint_token(&f.ctx(), &TokenDraft::nft("Author")).await.unwrap().reference;
        let mut draft = TokenDraft::nft("Work");
        draft.author = Some(author);
        let work = mint_token(&f.ctx(), &draft).await.unwrap();

        let resolver = Resolver::new(&f.indexer);
        let token = resolver.resolve(work.reference, None, None).await.unwrap().unwrap();
        assert_eq!(token.author, Some(author));
    }

    #[tokio::test]
    async fn test_claims_need_proof() {
        let f = Fixture::new();
        f.fund(100_000_000);
        let claimed = Outpoint::from_utxo(&"c3".repeat(32), 0).unwrap();
        f.give_token(
            nft_script(&f.wallet.address(), &claimed.reverse()).unwrap(),
            1,
            claimed,
            Operation::Nft,
        );
        let mut draft = TokenDraft::nft("Forged");
        draft.author = Some(claimed);
        let minted = mint_token(&f.ctx(), &draft).await.unwrap();

        // the claimed ref was required, so the claim holds
        let resolver = Resolver::new(&f.indexer);
        let token = resolver.resolve(minted.reference, None, None).await.unwrap().unwrap();
        assert_eq!(token.author, Some(claimed));

        // a plain mint claiming it in its payload only is not believed
        let params = CommitParams {
            kind: crate::script::CommitKind::Nft,
            format: crate::token::PayloadFormat::Rst,
            payload_hash: [0u8; 32],
            required_refs: Vec::new(),
            address: f.wallet.address(),
        };
        assert_eq!(resolver.verify_claim(Some(&claimed.reverse()), &params, None).await, None);
    }

    #[tokio::test]
    async fn test_mutated_token_resolves_latest_payload() {
        let f = Fixture::new();
        f.fund(200_000_000);
        let mut draft = TokenDraft::nft("v1");
        draft.immutable = false;
        let minted = mint_token(&f.ctx(), &draft).await.unwrap();
        let mut payload = crate::token::TokenPayload::default();
        payload.meta.insert("name".into(), ciborium::Value::Text("v2".into()));
        crate::mint::mutate_token(&f.ctx(), &minted.reference, &payload).await.unwrap();

        let resolver = Resolver::new(&f.indexer);
        let token = resolver.resolve(minted.reference, None, None).await.unwrap().unwrap();
        assert_eq!(token.name, "v2");
        assert!(!token.immutable);
    }

    #[tokio::test]
    async fn test_undecodable_ref_skipped() {
        let f = Fixture::new();
        let utxo = f.fund(1_000);
        let reference = Outpoint::from_utxo(&utxo.txid, 0).unwrap();
        let resolver = Resolver::new(&f.indexer);
        assert!(resolver.resolve(reference, Some(&utxo.txid), None).await.unwrap().is_none());
        let unknown = Outpoint::from_utxo(&"d4".repeat(32), 0).unwrap();
        assert!(resolver.resolve(unknown, None, None).await.unwrap().is_none());
    }
}
