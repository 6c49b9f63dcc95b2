//! Wallet outputs

use serde::{Deserialize, Serialize};

use crate::script::Script;
use crate::token::{ContractType, Outpoint};

/// A spendable output handed to coin selection and the builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Display-orientation txid
    pub txid: String,
    pub vout: u32,
    pub script: Script,
    pub value: u64,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32, script: Script, value: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            script,
            value,
        }
    }

    pub fn outpoint(&self) -> Option<Outpoint> {
        Outpoint::from_utxo(&self.txid, self.vout).ok()
    }

    pub fn key(&self) -> (String, u32) {
        (self.txid.clone(), self.vout)
    }
}

/// A wallet output as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txo {
    /// Assigned by the store on insert
    pub id: u64,
    pub txid: String,
    pub vout: u32,
    pub script: Script,
    pub value: u64,
    /// `None` while unconfirmed
    pub height: Option<u32>,
    pub spent: bool,
    pub contract_type: ContractType,
    /// Created by this wallet, no incoming notification needed
    pub change: bool,
}

impl Txo {
    pub fn new(utxo: Utxo, height: Option<u32>, contract_type: ContractType) -> Self {
        Self {
            id: 0,
            txid: utxo.txid,
            vout: utxo.vout,
            script: utxo.script,
            value: utxo.value,
            height,
            spent: false,
            contract_type,
            change: false,
        }
    }

    pub fn to_utxo(&self) -> Utxo {
        Utxo::new(self.txid.clone(), self.vout, self.script.clone(), self.value)
    }

    pub fn key(&self) -> (String, u32) {
        (self.txid.clone(), self.vout)
    }

    pub fn is_confirmed(&self) -> bool {
        self.height.is_some()
    }
}
