//! Proof-of-work minting contracts

use serde::{Deserialize, Serialize};

use crate::core::TxOutput;
use crate::script::{dmint_diff_to_target, dmint_script, DmintParams};
use crate::token::{Outpoint, OutpointError};

/// Value locked in each contract output
pub const DMINT_CONTRACT_VALUE: u64 = 1;

/// An FT deployed as parallel mining contracts instead of a premined output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmintDeploy {
    /// Number of parallel contracts
    pub contracts: u32,
    /// Mints each contract allows
    pub max_height: i64,
    /// FT released per mint
    pub reward: i64,
    pub difficulty: u64,
}

impl DmintDeploy {
    /// Contract outputs for a token committed at `commit_txid:vout`
    ///
    /// The token ref is the commit outpoint; contract `i` takes the ref of
    /// commit output `vout + 1 + i`, reserved at commit time.
    pub fn outputs(&self, commit_txid: &str, vout: u32) -> Result<Vec<TxOutput>, OutpointError> {
        let token_ref = Outpoint::from_utxo(commit_txid, vout)?;
        let target = dmint_diff_to_target(self.difficulty);
        Ok((0..self.contracts)
            .map(|i| {
                let params = DmintParams {
                    height: 0,
                    contract_ref: token_ref.offset(1 + i).reverse(),
                    token_ref: token_ref.reverse(),
                    max_height: self.max_height,
                    reward: self.reward,
                    target,
                };
                TxOutput::new(DMINT_CONTRACT_VALUE, dmint_script(&params))
            })
            .collect())
    }

    /// Total supply the contracts can release
    pub fn supply(&self) -> i64 {
        i64::from(self.contracts)
            .saturating_mul(self.max_height)
            .saturating_mul(self.reward)
    }
}
