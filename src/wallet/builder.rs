//! Transaction assembly and signing
//!
//! Inputs spending a known script are signed automatically with a P2PKH
//! unlock (`<sig> <pubkey>`). A script override callback can replace any
//! input's unlock, which is how reveals, mutable transitions and swaps attach
//! their extra data.

use thiserror::Error;

use crate::core::{
    fee_within_tolerance, sighash, FeeRate, SighashFlags, Transaction, TransactionError, TxInput,
    TxOutput, Utxo, DEFAULT_DUST_THRESHOLD,
};
use crate::crypto::{KeyError, KeyPair};
use crate::script::{p2pkh_script, Script, ScriptError};

/// Serialized size of a P2PKH output: value, script length and 25 script bytes
const P2PKH_OUTPUT_SIZE: usize = 34;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No inputs")]
    NoInputs,
    #[error("Need one signing key or one per input, got {keys} for {inputs} inputs")]
    KeyCountMismatch { keys: usize, inputs: usize },
    #[error("Outputs ({outputs}) exceed inputs ({inputs})")]
    InsufficientInputs { inputs: u64, outputs: u64 },
    #[error("Fee {actual} exceeds expected {expected} by more than 20%")]
    FeeTooHigh { actual: u64, expected: u64 },
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
    #[error("Script error: {0}")]
    ScriptError(#[from] ScriptError),
}

/// Callback replacing an input's unlocking script
///
/// Receives the input index and the default P2PKH unlock; `None` keeps the default.
pub type ScriptOverride<'a> = dyn Fn(usize, &Script) -> Option<Script> + Send + Sync + 'a;

/// A signed, serialized transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub txid: String,
    pub hex: String,
    pub fee: u64,
}

impl SignedTransaction {
    pub fn size(&self) -> usize {
        self.hex.len() / 2
    }
}

/// Builder for signed transactions
pub struct TransactionBuilder<'a> {
    inputs: Vec<Utxo>,
    outputs: Vec<TxOutput>,
    keys: Vec<&'a KeyPair>,
    change_script: Option<Script>,
    fee_rate: FeeRate,
    dust_threshold: u64,
    flags: SighashFlags,
    script_override: Option<Box<ScriptOverride<'a>>>,
    skip_fee_check: bool,
    partial: bool,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(fee_rate: FeeRate) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            keys: Vec::new(),
            change_script: None,
            fee_rate,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            flags: SighashFlags::default(),
            script_override: None,
            skip_fee_check: false,
            partial: false,
        }
    }

    pub fn add_input(mut self, utxo: Utxo) -> Self {
        self.inputs.push(utxo);
        self
    }

    pub fn add_inputs(mut self, utxos: impl IntoIterator<Item = Utxo>) -> Self {
        self.inputs.extend(utxos);
        self
    }

    pub fn add_output(mut self, output: TxOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn add_outputs(mut self, outputs: impl IntoIterator<Item = TxOutput>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Add a signing key; one key signs every input, several keys pair up with inputs
    pub fn signing_key(mut self, key: &'a KeyPair) -> Self {
        self.keys.push(key);
        self
    }

    /// Send whatever remains after the fee to this address
    pub fn change_to(mut self, address: &str) -> Result<Self, BuildError> {
        self.change_script = Some(p2pkh_script(address)?);
        Ok(self)
    }

    pub fn dust_threshold(mut self, dust: u64) -> Self {
        self.dust_threshold = dust;
        self
    }

    pub fn sighash_flags(mut self, flags: SighashFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn script_override(
        mut self,
        f: impl Fn(usize, &Script) -> Option<Script> + Send + Sync + 'a,
    ) -> Self {
        self.script_override = Some(Box::new(f));
        self
    }

    /// Disable the fee sanity check, for flows whose final size is not known yet
    pub fn skip_fee_check(mut self) -> Self {
        self.skip_fee_check = true;
        self
    }

    /// Build a partial transaction whose outputs may exceed its inputs
    ///
    /// Used for swap offers that a counterparty completes later. Implies no fee check.
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self.skip_fee_check = true;
        self
    }

    fn key_for(&self, index: usize) -> Option<&'a KeyPair> {
        if self.keys.len() == 1 {
            self.keys.first().copied()
        } else {
            self.keys.get(index).copied()
        }
    }

    fn sign(&self, tx: &mut Transaction) -> Result<(), BuildError> {
        let mut script_sigs = Vec::with_capacity(self.inputs.len());
        for (index, utxo) in self.inputs.iter().enumerate() {
            let default_unlock = match self.key_for(index) {
                Some(key) if !utxo.script.is_empty() => {
                    let digest = sighash(tx, index, &utxo.script, utxo.value, self.flags)?;
                    let mut signature = key.sign_digest(&digest)?;
                    signature.push(self.flags.bits());
                    Script::new().push(&signature).push(&key.public_key_bytes())
                }
                _ => Script::new(),
            };
            let unlock = self
                .script_override
                .as_ref()
                .and_then(|f| f(index, &default_unlock))
                .unwrap_or(default_unlock);
            script_sigs.push(unlock);
        }
        for (input, script_sig) in tx.inputs.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }
        Ok(())
    }

    /// Assemble, sign and check the transaction
    pub fn build(self) -> Result<SignedTransaction, BuildError> {
        if self.inputs.is_empty() {
            return Err(BuildError::NoInputs);
        }
        if self.keys.len() > 1 && self.keys.len() != self.inputs.len() {
            return Err(BuildError::KeyCountMismatch {
                keys: self.keys.len(),
                inputs: self.inputs.len(),
            });
        }

        let input_value: u64 = self.inputs.iter().map(|u| u.value).sum();
        let output_value: u64 = self.outputs.iter().map(|o| o.value).sum();
        if output_value > input_value && !self.partial {
            return Err(BuildError::InsufficientInputs {
                inputs: input_value,
                outputs: output_value,
            });
        }

        let tx_inputs = self
            .inputs
            .iter()
            .map(|u| TxInput::new(u.txid.clone(), u.vout))
            .collect();
        let mut tx = Transaction::new(tx_inputs, self.outputs.clone());

        if let Some(change_script) = &self.change_script {
            // Sign once with a placeholder to learn the real size
            tx.outputs.push(TxOutput::new(0, change_script.clone()));
            self.sign(&mut tx)?;
            let fee = self.fee_rate.fee_for_size(tx.size());
            match input_value.saturating_sub(output_value).checked_sub(fee) {
                Some(change) if change > self.dust_threshold => {
                    if let Some(last) = tx.outputs.last_mut() {
                        last.value = change;
                    }
                }
                _ => {
                    tx.outputs.pop();
                }
            }
        }
        self.sign(&mut tx)?;

        let fee = input_value.saturating_sub(tx.total_output());
        let expected = self.fee_rate.fee_for_size(tx.size());
        // Change at or below dust is donated, along with the output it would need
        let dust_allowance = self.dust_threshold + self.fee_rate.fee_for_size(P2PKH_OUTPUT_SIZE);
        let donated_dust = fee <= expected + dust_allowance;
        if !self.skip_fee_check && !donated_dust && !fee_within_tolerance(fee, expected) {
            log::error!(
                "Fee sanity check failed: fee {} expected {} ({} bytes)",
                fee,
                expected,
                tx.size()
            );
            return Err(BuildError::FeeTooHigh {
                actual: fee,
                expected,
            });
        }

        let hex = tx.to_hex()?;
        let txid = tx.txid()?;
        log::debug!("Built {} ({} bytes, fee {})", txid, tx.size(), fee);
        Ok(SignedTransaction { tx, txid, hex, fee })
    }
}

/// Verify the P2PKH signature on input `index`
pub fn verify_input(
    tx: &Transaction,
    index: usize,
    prev: &Utxo,
    flags: SighashFlags,
) -> Result<bool, BuildError> {
    let input = tx
        .inputs
        .get(index)
        .ok_or(TransactionError::InputOutOfRange(index))?;
    let chunks = input.script_sig.chunks()?;
    let (sig, pubkey) = match (chunks.first().and_then(|c| c.data()), chunks.get(1).and_then(|c| c.data())) {
        (Some(sig), Some(pubkey)) if !sig.is_empty() => (sig, pubkey),
        _ => return Ok(false),
    };
    let digest = sighash(tx, index, &prev.script, prev.value, flags)?;
    let public_key = crate::crypto::public_key_from_hex(&hex::encode(pubkey))?;
    Ok(crate::crypto::verify_signature(
        &public_key,
        &digest,
        &sig[..sig.len() - 1],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{p2pkh_script, P2PKH_SCRIPT_SIG_SIZE};

    fn funded(key: &KeyPair, value: u64) -> Utxo {
        Utxo::new("ab".repeat(32), 0, p2pkh_script(&key.address()).unwrap(), value)
    }

    #[test]
    fn test_build_and_verify_p2pkh() {
        let key = KeyPair::generate();
        let prev = funded(&key, 100_000);
        let out = TxOutput::new(30_000, p2pkh_script(&key.address()).unwrap());
        let signed = TransactionBuilder::new(FeeRate(1))
            .add_input(prev.clone())
            .add_output(out)
            .signing_key(&key)
            .change_to(&key.address())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(signed.tx.outputs.len(), 2);
        assert_eq!(signed.fee + signed.tx.total_output(), 100_000);
        assert!(signed.tx.inputs[0].script_sig.len() <= P2PKH_SCRIPT_SIG_SIZE);
        assert!(verify_input(&signed.tx, 0, &prev, SighashFlags::default()).unwrap());
        assert_eq!(Transaction::from_hex(&signed.hex).unwrap(), signed.tx);
    }

    #[test]
    fn test_fee_check_rejects_overpay() {
        let key = KeyPair::generate();
        let err = TransactionBuilder::new(FeeRate(1))
            .add_input(funded(&key, 100_000))
            .add_output(TxOutput::new(10_000, p2pkh_script(&key.address()).unwrap()))
            .signing_key(&key)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::FeeTooHigh { .. }));

        let skipped = TransactionBuilder::new(FeeRate(1))
            .add_input(funded(&key, 100_000))
            .add_output(TxOutput::new(10_000, p2pkh_script(&key.address()).unwrap()))
            .signing_key(&key)
            .skip_fee_check()
            .build()
            .unwrap();
        assert_eq!(skipped.fee, 90_000);
    }

    #[test]
    fn test_dust_donated_to_fee_passes_check() {
        let key = KeyPair::generate();
        let to = p2pkh_script(&key.address()).unwrap();
        // about 192 bytes at 1 photon per byte, plus a dust remainder
        let signed = TransactionBuilder::new(FeeRate(1))
            .add_input(funded(&key, 100_000))
            .add_output(TxOutput::new(100_000 - 492, to.clone()))
            .signing_key(&key)
            .build()
            .unwrap();
        assert_eq!(signed.fee, 492);

        let err = TransactionBuilder::new(FeeRate(1))
            .add_input(funded(&key, 100_000))
            .add_output(TxOutput::new(100_000 - 1_200, to))
            .signing_key(&key)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::FeeTooHigh { actual: 1_200, .. }));
    }

    #[test]
    fn test_script_override_replaces_unlock() {
        let key = KeyPair::generate();
        let signed = TransactionBuilder::new(FeeRate(1))
            .add_input(funded(&key, 10_000))
            .signing_key(&key)
            .change_to(&key.address())
            .unwrap()
            .script_override(|index, default| {
                (index == 0).then(|| default.clone().push(b"extra"))
            })
            .build()
            .unwrap();
        let chunks = signed.tx.inputs[0].script_sig.chunks().unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].data(), Some(&b"extra"[..]));
    }

    #[test]
    fn test_key_count_and_inputs() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let c = KeyPair::generate();
        let err = TransactionBuilder::new(FeeRate(1))
            .add_input(funded(&a, 10_000))
            .add_input(funded(&b, 10_000))
            .signing_key(&a)
            .signing_key(&b)
            .signing_key(&c)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::KeyCountMismatch { keys: 3, inputs: 2 }));
        assert!(matches!(
            TransactionBuilder::new(FeeRate(1)).build(),
            Err(BuildError::NoInputs)
        ));
    }

    #[test]
    fn test_per_input_keys() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut second = funded(&b, 20_000);
        second.vout = 1;
        let first = funded(&a, 20_000);
        let signed = TransactionBuilder::new(FeeRate(1))
            .add_input(first.clone())
            .add_input(second.clone())
            .signing_key(&a)
            .signing_key(&b)
            .change_to(&a.address())
            .unwrap()
            .build()
            .unwrap();
        assert!(verify_input(&signed.tx, 0, &first, SighashFlags::default()).unwrap());
        assert!(verify_input(&signed.tx, 1, &second, SighashFlags::default()).unwrap());
    }
}
