//! Tagged-variant matching over the known locking script shapes

use super::script::Script;
use super::templates::{
    parse_commit_script, parse_delegate_base_script, parse_delegate_burn_script,
    parse_delegate_token_script, parse_dmint_script, parse_ft_script, parse_mutable_nft_script,
    parse_nft_script, parse_p2pkh_script, CommitParams, DmintParams, MutableNftParams,
};
use crate::token::{ContractType, Outpoint};

/// A recognised locking script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptTemplate {
    P2pkh { address: String },
    Nft { reference: Outpoint, address: String },
    Ft { reference: Outpoint, address: String },
    Mutable(MutableNftParams),
    Commit(CommitParams),
    DelegateBase { refs: Vec<Outpoint>, address: String },
    DelegateToken { reference: Outpoint, address: String },
    DelegateBurn { reference: Outpoint },
    Dmint(DmintParams),
    Unknown,
}

impl ScriptTemplate {
    /// Try every known template, first structural match wins
    pub fn match_script(script: &Script) -> Self {
        if let Some(address) = parse_p2pkh_script(script) {
            return ScriptTemplate::P2pkh { address };
        }
        let nft = parse_nft_script(script);
        if let (Some(reference), Some(address)) = (nft.reference, nft.address) {
            return ScriptTemplate::Nft { reference, address };
        }
        let ft = parse_ft_script(script);
        if let (Some(reference), Some(address)) = (ft.reference, ft.address) {
            return ScriptTemplate::Ft { reference, address };
        }
        if let Some(params) = parse_mutable_nft_script(script) {
            return ScriptTemplate::Mutable(params);
        }
        if let Some(params) = parse_commit_script(script) {
            return ScriptTemplate::Commit(params);
        }
        let delegate = parse_delegate_token_script(script);
        if let (Some(reference), Some(address)) = (delegate.reference, delegate.address) {
            return ScriptTemplate::DelegateToken { reference, address };
        }
        if let Some((refs, address)) = parse_delegate_base_script(script) {
            return ScriptTemplate::DelegateBase { refs, address };
        }
        if let Some(reference) = parse_delegate_burn_script(script) {
            return ScriptTemplate::DelegateBurn { reference };
        }
        if let Some(params) = parse_dmint_script(script) {
            return ScriptTemplate::Dmint(params);
        }
        ScriptTemplate::Unknown
    }

    /// Wallet contract type for outputs the wallet tracks
    pub fn contract_type(&self) -> Option<ContractType> {
        match self {
            ScriptTemplate::P2pkh { .. } => Some(ContractType::Rxd),
            ScriptTemplate::Nft { .. } => Some(ContractType::Nft),
            ScriptTemplate::Ft { .. } => Some(ContractType::Ft),
            ScriptTemplate::DelegateToken { .. } => Some(ContractType::Ref),
            _ => None,
        }
    }

    /// Token ref in script orientation, for NFT and FT outputs
    pub fn token_ref(&self) -> Option<Outpoint> {
        match self {
            ScriptTemplate::Nft { reference, .. } | ScriptTemplate::Ft { reference, .. } => {
                Some(*reference)
            }
            _ => None,
        }
    }
}
