//! Coin selection
//!
//! Deterministic greedy selection: required inputs first, then available
//! inputs in the order given until targets plus the size-based fee are
//! covered. Change is added only when it is worth more than dust.

use thiserror::Error;

use crate::core::{FeeRate, TxOutput, Utxo, DEFAULT_DUST_THRESHOLD};
use crate::script::{tx_size, Script, P2PKH_SCRIPT_SIG_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
}

/// Parameters shared by every selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionParams {
    pub fee_rate: FeeRate,
    pub dust_threshold: u64,
}

impl SelectionParams {
    pub fn new(fee_rate: FeeRate) -> Self {
        Self {
            fee_rate,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
        }
    }
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self::new(FeeRate::default())
    }
}

/// A candidate input and the size of the unlocking script it will need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectInput {
    pub utxo: Utxo,
    pub script_sig_size: usize,
}

impl SelectInput {
    pub fn p2pkh(utxo: Utxo) -> Self {
        Self {
            utxo,
            script_sig_size: P2PKH_SCRIPT_SIG_SIZE,
        }
    }

    pub fn with_script_sig_size(utxo: Utxo, script_sig_size: usize) -> Self {
        Self {
            utxo,
            script_sig_size,
        }
    }
}

/// Outcome of a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<SelectInput>,
    /// Targets in order, then change if any
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub funded: bool,
}

impl Selection {
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.utxo.value).sum()
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Change output, when one was added after `target_count` targets
    pub fn change(&self, target_count: usize) -> Option<&TxOutput> {
        self.outputs.get(target_count)
    }

    pub fn ensure_funded(&self) -> Result<(), SelectionError> {
        if self.funded {
            Ok(())
        } else {
            Err(SelectionError::InsufficientFunds {
                have: self.input_value(),
                need: self.output_value() + self.fee,
            })
        }
    }
}

fn estimate_fee(
    inputs: &[SelectInput],
    outputs: &[TxOutput],
    change: Option<&Script>,
    fee_rate: FeeRate,
) -> u64 {
    let sigs: Vec<usize> = inputs.iter().map(|i| i.script_sig_size).collect();
    let mut scripts: Vec<usize> = outputs.iter().map(|o| o.script.len()).collect();
    if let Some(change) = change {
        scripts.push(change.len());
    }
    fee_rate.fee_for_size(tx_size(&sigs, &scripts))
}

/// Select inputs covering `targets` plus fee
///
/// Never fails hard: an unfundable request returns `funded = false`.
pub fn select(
    available: &[SelectInput],
    required: &[SelectInput],
    targets: &[TxOutput],
    change_script: &Script,
    params: &SelectionParams,
) -> Selection {
    let target_value: u64 = targets.iter().map(|o| o.value).sum();
    let mut inputs: Vec<SelectInput> = required.to_vec();
    let mut input_value: u64 = inputs.iter().map(|i| i.utxo.value).sum();
    let mut candidates = available
        .iter()
        .filter(|c| !required.iter().any(|r| r.utxo.key() == c.utxo.key()));

    loop {
        let fee = estimate_fee(&inputs, targets, None, params.fee_rate);
        if input_value >= target_value + fee {
            let mut outputs = targets.to_vec();
            let fee_with_change = estimate_fee(&inputs, targets, Some(change_script), params.fee_rate);
            let fee = match input_value.checked_sub(target_value + fee_with_change) {
                Some(change) if change > params.dust_threshold => {
                    outputs.push(TxOutput::new(change, change_script.clone()));
                    fee_with_change
                }
                // Dust change is donated to the fee
                _ => input_value - target_value,
            };
            return Selection {
                inputs,
                outputs,
                fee,
                funded: true,
            };
        }

        match candidates.next() {
            Some(candidate) => {
                input_value += candidate.utxo.value;
                inputs.push(candidate.clone());
            }
            None => {
                log::debug!(
                    "Selection unfunded: have {}, need {}",
                    input_value,
                    target_value + fee
                );
                return Selection {
                    inputs,
                    outputs: targets.to_vec(),
                    fee,
                    funded: false,
                };
            }
        }
    }
}

/// Token inputs consumed to reach `target`, and their actual sum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulated {
    pub inputs: Vec<Utxo>,
    pub sum: u64,
}

impl Accumulated {
    pub fn reached(&self, target: u64) -> bool {
        self.sum >= target
    }
}

/// Sum token outputs in order, stopping as soon as `target` is reached
pub fn accumulate_inputs(token_utxos: &[Utxo], target: u64) -> Accumulated {
    let mut acc = Accumulated {
        inputs: Vec::new(),
        sum: 0,
    };
    for utxo in token_utxos {
        if acc.sum >= target {
            break;
        }
        acc.sum += utxo.value;
        acc.inputs.push(utxo.clone());
    }
    acc
}
