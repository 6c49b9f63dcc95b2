//! Token drafts and the commit side of a mint
//!
//! A commit output hash-locks the payload. Its value pays for the token
//! outputs of the reveal plus that token's share of the reveal fee, so a
//! reveal needs no extra funding.

use ciborium::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{FeeRate, TxOutput, Utxo};
use crate::script::{
    commit_script, ft_script, mutable_nft_script, nft_script, p2pkh_script, tx_size, CommitKind,
    CommitParams, Script, ScriptError, P2PKH_SCRIPT_SIG_SIZE,
};
use crate::token::{
    decode_atom, encode_atom, encode_rst, is_immutable_token, AttrValue, DecodedPayload,
    FileDescriptor, Operation, Outpoint, PayloadFormat, TokenKind, TokenPayload,
};

use super::dmint::DmintDeploy;
use super::reveal::ProofShape;
use super::MintError;

/// Value of the placeholder outputs reserving extra refs
pub const PLACEHOLDER_VALUE: u64 = 1;

/// Value of a minted NFT output
pub const NFT_VALUE: u64 = 1;

fn default_format() -> PayloadFormat {
    PayloadFormat::Rst
}

fn default_true() -> bool {
    true
}

fn default_value() -> u64 {
    NFT_VALUE
}

/// A token to mint, as written in a bundle file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDraft {
    pub operation: Operation,
    #[serde(default = "default_format")]
    pub format: PayloadFormat,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: TokenKind,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default = "default_true")]
    pub immutable: bool,
    /// Author token, display orientation
    #[serde(default)]
    pub author: Option<Outpoint>,
    /// Container token, display orientation
    #[serde(default)]
    pub container: Option<Outpoint>,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub file: Option<FileDescriptor>,
    /// FT supply, or the NFT output value
    #[serde(default = "default_value")]
    pub value: u64,
    /// Recipient; the wallet itself when absent
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub dmint: Option<DmintDeploy>,
}

impl TokenDraft {
    pub fn nft(name: &str) -> Self {
        Self {
            operation: Operation::Nft,
            format: PayloadFormat::Rst,
            name: name.to_string(),
            description: String::new(),
            kind: TokenKind::Object,
            ticker: None,
            immutable: true,
            author: None,
            container: None,
            attrs: BTreeMap::new(),
            file: None,
            value: NFT_VALUE,
            to: None,
            dmint: None,
        }
    }

    pub fn ft(name: &str, ticker: &str, supply: u64) -> Self {
        Self {
            operation: Operation::Ft,
            ticker: Some(ticker.to_string()),
            value: supply,
            ..Self::nft(name)
        }
    }

    pub fn validate(&self) -> Result<(), MintError> {
        let invalid = |msg: &str| Err(MintError::InvalidRequest(format!("{}: {}", self.name, msg)));
        match self.operation {
            Operation::Nft | Operation::Ft | Operation::Dat => {}
            _ => return invalid("operation must be nft, ft or dat"),
        }
        if self.name.is_empty() {
            return Err(MintError::InvalidRequest("token name is empty".into()));
        }
        if !self.immutable && self.operation != Operation::Nft {
            return invalid("only NFTs can be mutable");
        }
        if !self.immutable && self.format != PayloadFormat::Rst {
            return invalid("mutable tokens need the RST format");
        }
        if let Some(dmint) = &self.dmint {
            if self.operation != Operation::Ft {
                return invalid("dmint deploys an FT");
            }
            if dmint.contracts == 0 || dmint.max_height <= 0 || dmint.reward <= 0 {
                return invalid("dmint needs contracts, max height and reward");
            }
        } else if self.value == 0 {
            return invalid("value must be positive");
        }
        Ok(())
    }

    /// Author and container refs this token claims
    pub fn proof_refs(&self) -> Vec<Outpoint> {
        self.author.iter().chain(self.container.iter()).copied().collect()
    }

    /// Payload carried by the reveal
    pub fn payload(&self) -> TokenPayload {
        let mut payload = TokenPayload::default();
        payload.meta.insert("name".into(), Value::Text(self.name.clone()));
        if !self.description.is_empty() {
            payload.meta.insert("desc".into(), Value::Text(self.description.clone()));
        }
        if self.kind != TokenKind::Object {
            payload.meta.insert("type".into(), Value::Text(self.kind.as_str().into()));
        }
        if !self.attrs.is_empty() {
            let attrs = self
                .attrs
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), attr_to_value(v)))
                .collect();
            payload.meta.insert("attrs".into(), Value::Map(attrs));
        }
        if let Some(ticker) = &self.ticker {
            payload.args.insert("ticker".into(), Value::Text(ticker.clone()));
        }
        if !self.immutable {
            payload.args.insert("i".into(), Value::Bool(false));
        }
        payload.by_refs.extend(self.author.iter().map(Outpoint::reverse));
        payload.in_refs.extend(self.container.iter().map(Outpoint::reverse));
        if let Some(file) = &self.file {
            payload.files.insert("main".into(), file.clone());
        }
        payload
    }
}

fn attr_to_value(attr: &AttrValue) -> Value {
    match attr {
        AttrValue::Bool(b) => Value::Bool(*b),
        AttrValue::Integer(i) => Value::Integer((*i).into()),
        AttrValue::Float(f) => Value::Float(*f),
        AttrValue::Text(s) => Value::Text(s.clone()),
    }
}

/// Commit script and reveal data of one token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RstData {
    /// Commit locking script
    pub script: Script,
    pub payload_hash: [u8; 32],
    /// `<magic> <operation> <payload>` appended to the reveal unlock
    pub script_sig: Script,
}

/// Everything needed to reveal one committed token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCommitData {
    pub operation: Operation,
    /// Address owning the commit and placeholder outputs
    pub owner: String,
    pub recipient: String,
    pub immutable: bool,
    pub rst: RstData,
    pub value: u64,
    pub dmint: Option<DmintDeploy>,
    /// Commit output value, funding the reveal
    pub output_value: u64,
    /// Commit output once signed
    pub utxo: Option<Utxo>,
}

impl TokenCommitData {
    /// Encode `draft` and build its commit script
    ///
    /// `required_refs` (script orientation) must be present in the reveal inputs.
    /// The reveal fee share is added later by [`fund_reveal`].
    pub fn new(owner: &str, draft: &TokenDraft, required_refs: Vec<Outpoint>) -> Result<Self, MintError> {
        draft.validate()?;
        let payload = draft.payload();
        let encoded = match draft.format {
            PayloadFormat::Atom => encode_atom(draft.operation, &payload)?,
            PayloadFormat::Rst => encode_rst(draft.operation, &payload)?,
        };
        let kind = match draft.operation {
            Operation::Ft => CommitKind::Ft,
            Operation::Dat => CommitKind::Dat,
            _ => CommitKind::Nft,
        };
        let script = commit_script(&CommitParams {
            kind,
            format: draft.format,
            payload_hash: encoded.payload_hash,
            required_refs,
            address: owner.to_string(),
        })?;
        let recipient = draft.to.clone().unwrap_or_else(|| owner.to_string());
        p2pkh_script(&recipient).map_err(|_| MintError::InvalidRequest(format!("bad recipient {}", recipient)))?;

        let mut data = Self {
            operation: draft.operation,
            owner: owner.to_string(),
            recipient,
            immutable: is_immutable_token(&payload),
            rst: RstData {
                script,
                payload_hash: encoded.payload_hash,
                script_sig: encoded.script,
            },
            value: draft.value,
            dmint: draft.dmint,
            output_value: 0,
            utxo: None,
        };
        let outputs: u64 = data.reveal_outputs(&"00".repeat(32), 0)?.iter().map(|o| o.value).sum();
        data.output_value = outputs.saturating_sub(u64::from(data.reserved()) * PLACEHOLDER_VALUE);
        Ok(data)
    }

    /// Outputs after the commit output reserved for extra refs
    pub fn reserved(&self) -> u32 {
        match (&self.dmint, self.immutable) {
            (Some(dmint), _) => dmint.contracts,
            (None, false) => 1,
            (None, true) => 0,
        }
    }

    /// Commit output followed by its placeholders
    pub fn commit_outputs(&self) -> Result<Vec<TxOutput>, ScriptError> {
        let mut outputs = vec![TxOutput::new(self.output_value, self.rst.script.clone())];
        let placeholder = p2pkh_script(&self.owner)?;
        for _ in 0..self.reserved() {
            outputs.push(TxOutput::new(PLACEHOLDER_VALUE, placeholder.clone()));
        }
        Ok(outputs)
    }

    /// Outputs the reveal creates for a commit at `commit_txid:vout`
    pub fn reveal_outputs(&self, commit_txid: &str, vout: u32) -> Result<Vec<TxOutput>, MintError> {
        let token_ref = Outpoint::from_utxo(commit_txid, vout)?;
        let outputs = match (self.operation, &self.dmint) {
            (Operation::Ft, Some(dmint)) => dmint.outputs(commit_txid, vout)?,
            (Operation::Ft, None) => vec![TxOutput::new(
                self.value,
                ft_script(&self.recipient, &token_ref.reverse())?,
            )],
            (Operation::Dat, _) => vec![TxOutput::new(self.value, p2pkh_script(&self.recipient)?)],
            _ => {
                let mut outputs = vec![TxOutput::new(
                    self.value,
                    nft_script(&self.recipient, &token_ref.reverse())?,
                )];
                if !self.immutable {
                    let contract = mutable_nft_script(
                        &token_ref.offset(1).reverse(),
                        &token_ref.reverse(),
                        &self.rst.payload_hash,
                    );
                    outputs.push(TxOutput::new(PLACEHOLDER_VALUE, contract));
                }
                outputs
            }
        };
        Ok(outputs)
    }

    /// Commit output and placeholders spent by the reveal
    pub fn reveal_inputs(&self) -> Result<Vec<Utxo>, MintError> {
        let utxo = self.committed()?;
        let mut inputs = vec![utxo.clone()];
        let placeholder = p2pkh_script(&self.owner)?;
        for i in 1..=self.reserved() {
            inputs.push(Utxo::new(utxo.txid.clone(), utxo.vout + i, placeholder.clone(), PLACEHOLDER_VALUE));
        }
        Ok(inputs)
    }

    /// Unlock sizes of the reveal inputs and script sizes of the reveal outputs
    pub fn reveal_sizes(&self) -> Result<(Vec<usize>, Vec<usize>), MintError> {
        let mut sigs = vec![P2PKH_SCRIPT_SIG_SIZE + self.rst.script_sig.len()];
        sigs.extend(std::iter::repeat(P2PKH_SCRIPT_SIG_SIZE).take(self.reserved() as usize));
        let outputs = self
            .reveal_outputs(&"00".repeat(32), 0)?
            .iter()
            .map(|o| o.script.len())
            .collect();
        Ok((sigs, outputs))
    }

    pub fn committed(&self) -> Result<&Utxo, MintError> {
        self.utxo
            .as_ref()
            .ok_or_else(|| MintError::OutOfOrder("token is not committed".into()))
    }

    /// Token ref in display orientation, once committed
    pub fn token_ref(&self) -> Option<Outpoint> {
        self.utxo
            .as_ref()
            .and_then(|u| Outpoint::from_utxo(&u.txid, u.vout).ok())
    }

    pub fn payload(&self) -> Option<DecodedPayload> {
        decode_atom(&self.rst.script_sig)
    }
}

/// Add each token's share of one reveal transaction's fee to its commit value
///
/// Shares follow each token's own bytes; the first token also carries the
/// transaction overhead and the proof. Returns the reveal fee.
pub fn fund_reveal(
    tokens: &mut [TokenCommitData],
    proof: &ProofShape,
    fee_rate: FeeRate,
) -> Result<u64, MintError> {
    let base = tx_size(&[], &[]);
    let mut all_sigs = Vec::new();
    let mut all_outputs = Vec::new();
    let mut shares = Vec::with_capacity(tokens.len());
    for token in tokens.iter() {
        let (sigs, outputs) = token.reveal_sizes()?;
        shares.push(fee_rate.fee_for_size(tx_size(&sigs, &outputs) - base));
        all_sigs.extend(sigs);
        all_outputs.extend(outputs);
    }
    all_sigs.extend(std::iter::repeat(P2PKH_SCRIPT_SIG_SIZE).take(proof.inputs));
    all_outputs.extend(proof.output_scripts.iter().copied());
    let total = fee_rate.fee_for_size(tx_size(&all_sigs, &all_outputs));

    let overhead = total.saturating_sub(shares.iter().sum());
    for (i, (token, share)) in tokens.iter_mut().zip(shares).enumerate() {
        token.output_value += share;
        if i == 0 {
            token.output_value += overhead;
        }
    }
    Ok(total)
}

/// Commit outputs of several tokens laid out in one transaction
pub fn commit_layout(tokens: &[&TokenCommitData]) -> Result<Vec<TxOutput>, MintError> {
    let mut outputs = Vec::new();
    for token in tokens {
        outputs.extend(token.commit_outputs()?);
    }
    Ok(outputs)
}

/// Fee of a commit transaction spending one funding output without change
pub fn commit_fee(outputs: &[TxOutput], fee_rate: FeeRate) -> u64 {
    let scripts: Vec<usize> = outputs.iter().map(|o| o.script.len()).collect();
    fee_rate.fee_for_size(tx_size(&[P2PKH_SCRIPT_SIG_SIZE], &scripts))
}

/// Record the commit outpoints of tokens laid out by [`commit_layout`]
///
/// Returns the placeholder vouts, which must stay out of coin selection.
pub fn assign_commits(tokens: &mut [&mut TokenCommitData], txid: &str, first_vout: u32) -> Vec<u32> {
    let mut vout = first_vout;
    let mut reserved = Vec::new();
    for token in tokens.iter_mut() {
        token.utxo = Some(Utxo::new(txid, vout, token.rst.script.clone(), token.output_value));
        reserved.extend((1..=token.reserved()).map(|i| vout + i));
        vout += 1 + token.reserved();
    }
    reserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::script::{parse_commit_script, parse_mutable_nft_script, ScriptTemplate};

    fn owner() -> String {
        KeyPair::generate().address()
    }

    #[test]
    fn test_draft_payload_round_trip() {
        let author = Outpoint::from_utxo(&"aa".repeat(32), 0).unwrap();
        let mut draft = TokenDraft::nft("Glyph");
        draft.description = "first".into();
        draft.immutable = false;
        draft.author = Some(author);
        draft.attrs.insert("level".into(), AttrValue::Integer(3));

        let payload = draft.payload();
        assert!(!is_immutable_token(&payload));
        assert_eq!(payload.meta_str("name"), Some("Glyph"));
        assert_eq!(payload.by_refs, vec![author.reverse()]);

        let json = serde_json::to_string(&draft).unwrap();
        let parsed: TokenDraft = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, draft);
    }

    #[test]
    fn test_minimal_json_draft_uses_defaults() {
        let draft: TokenDraft = serde_json::from_str(r#"{"operation":"nft","name":"A"}"#).unwrap();
        assert!(draft.immutable);
        assert_eq!(draft.format, PayloadFormat::Rst);
        assert_eq!(draft.value, NFT_VALUE);
    }

    #[test]
    fn test_validation() {
        let mut draft = TokenDraft::ft("Coin", "CN", 1000);
        draft.immutable = false;
        assert!(matches!(draft.validate(), Err(MintError::InvalidRequest(_))));
        let mut draft = TokenDraft::nft("Art");
        draft.dmint = Some(DmintDeploy {
            contracts: 1,
            max_height: 10,
            reward: 1,
            difficulty: 1,
        });
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_commit_script_binds_payload() {
        let owner = owner();
        let required = vec![Outpoint::from_bytes([9u8; 36])];
        let data = TokenCommitData::new(&owner, &TokenDraft::nft("A"), required.clone()).unwrap();
        let params = parse_commit_script(&data.rst.script).unwrap();
        assert_eq!(params.payload_hash, data.rst.payload_hash);
        assert_eq!(params.required_refs, required);
        assert_eq!(params.address, owner);
        assert_eq!(data.payload().unwrap().payload.meta_str("name"), Some("A"));
    }

    #[test]
    fn test_mutable_reveal_layout() {
        let mut draft = TokenDraft::nft("M");
        draft.immutable = false;
        let data = TokenCommitData::new(&owner(), &draft, vec![]).unwrap();
        assert_eq!(data.reserved(), 1);
        assert_eq!(data.commit_outputs().unwrap().len(), 2);

        let txid = "cd".repeat(32);
        let outputs = data.reveal_outputs(&txid, 4).unwrap();
        let token_ref = Outpoint::from_utxo(&txid, 4).unwrap();
        assert_eq!(
            ScriptTemplate::match_script(&outputs[0].script).token_ref(),
            Some(token_ref.reverse())
        );
        let contract = parse_mutable_nft_script(&outputs[1].script).unwrap();
        assert_eq!(contract.token_ref, token_ref.reverse());
        assert_eq!(contract.mutable_ref, token_ref.offset(1).reverse());
        assert_eq!(contract.payload_hash, data.rst.payload_hash);
    }

    #[test]
    fn test_fund_reveal_conserves_value() {
        let owner = owner();
        let fee_rate = FeeRate(10);
        let mut tokens = vec![
            TokenCommitData::new(&owner, &TokenDraft::nft("A"), vec![]).unwrap(),
            TokenCommitData::new(&owner, &TokenDraft::ft("B", "B", 5000), vec![]).unwrap(),
        ];
        let fee = fund_reveal(&mut tokens, &ProofShape::none(), fee_rate).unwrap();

        let inputs: u64 = tokens.iter().map(|t| t.output_value).sum();
        assert_eq!(inputs, NFT_VALUE + 5000 + fee);
    }

    #[test]
    fn test_assign_commits_skips_placeholders() {
        let owner = owner();
        let mut mutable = TokenDraft::nft("M");
        mutable.immutable = false;
        let mut a = TokenCommitData::new(&owner, &mutable, vec![]).unwrap();
        let mut b = TokenCommitData::new(&owner, &TokenDraft::nft("B"), vec![]).unwrap();
        let reserved = assign_commits(&mut [&mut a, &mut b], &"ef".repeat(32), 0);
        assert_eq!(reserved, vec![1]);
        assert_eq!(a.utxo.as_ref().unwrap().vout, 0);
        assert_eq!(b.utxo.as_ref().unwrap().vout, 2);
        assert_eq!(b.reveal_inputs().unwrap().len(), 1);
    }
}
