//! Radiant script codec
//!
//! This module provides:
//! - Opcode table including the induction-proof reference opcodes
//! - A byte-level script builder and chunk parser
//! - Locking script templates for P2PKH, NFT, FT, commit, delegate, mutable and dmint contracts
//! - A tagged-variant matcher over those templates
//! - Transaction size estimation for fee calculation

pub mod matcher;
pub mod opcodes;
pub mod script;
pub mod size;
pub mod templates;

pub use matcher::ScriptTemplate;
pub use script::{chunk_to_int, decode_script_num, encode_script_num, parse_chunks, Chunk, Script, ScriptError};
pub use size::{
    payload_pushes_size, push_size, reveal_script_sig_size, tx_size, varint_size,
    P2PKH_SCRIPT_SIG_SIZE,
};
pub use templates::{
    commit_script, dat_commit_script, delegate_base_script, delegate_burn_script,
    delegate_token_script, dmint_diff_to_target, dmint_script, ft_commit_script, ft_script,
    mutable_nft_script, nft_commit_script, nft_script, p2pkh_script, p2pkh_script_from_pkh,
    parse_commit_script, parse_delegate_base_script, parse_delegate_burn_script,
    parse_delegate_token_script, parse_dmint_script, parse_ft_script, parse_mutable_nft_script,
    parse_nft_script, parse_p2pkh_script, script_hash, zero_ref_script_hash, zero_refs,
    CommitKind, CommitParams, DmintParams, MutableNftParams, TokenScriptParts,
    DMINT_MAX_TARGET, FT_SCRIPT_LEN, NFT_SCRIPT_LEN, P2PKH_SCRIPT_LEN,
};
