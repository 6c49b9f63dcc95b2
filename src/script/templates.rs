//! Locking script templates
//!
//! Builders take semantic parameters and produce exact script bytes; parsers
//! recover the parameters by fixed-layout matching. Parsers never fail hard:
//! chain data is arbitrary, so a non-matching script yields `None` fields.
//!
//! All refs passed to builders and returned by parsers are in script
//! (little-endian) orientation.

use super::opcodes::*;
use super::script::{chunk_to_int, Chunk, Script, ScriptError};
use crate::crypto::{address_to_pubkey_hash, pubkey_hash_to_address, sha256, ADDRESS_VERSION_MAINNET};
use crate::token::{Outpoint, PayloadFormat};

/// Fixed FT contract code following the ref
const FT_CODE: [u8; 12] = [
    OP_REFOUTPUTCOUNT_OUTPUTS,
    OP_INPUTINDEX,
    OP_CODESCRIPTBYTECODE_UTXO,
    OP_HASH256,
    OP_DUP,
    OP_CODESCRIPTHASHVALUESUM_UTXOS,
    OP_OVER,
    OP_CODESCRIPTHASHVALUESUM_OUTPUTS,
    OP_GREATERTHANOREQUAL,
    OP_VERIFY,
    OP_CODESCRIPTHASHOUTPUTCOUNT_OUTPUTS,
    OP_NUMEQUALVERIFY,
];

/// Length of a P2PKH locking script
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// Length of an NFT singleton script
pub const NFT_SCRIPT_LEN: usize = 63;

/// Length of an FT script
pub const FT_SCRIPT_LEN: usize = 75;

/// Marker pushed by the delegate burn output
pub const DELEGATE_BURN_MARKER: &[u8] = b"del";

/// Upper bound for dmint proof-of-work targets
pub const DMINT_MAX_TARGET: u64 = 0x7fff_ffff_ffff_ffff;

/// Address and ref decoded from a token script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenScriptParts {
    pub reference: Option<Outpoint>,
    pub address: Option<String>,
}

// =============================================================================
// P2PKH
// =============================================================================

/// `OP_DUP OP_HASH160 <pkh> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script(address: &str) -> Result<Script, ScriptError> {
    let pkh = address_to_pubkey_hash(address)
        .map_err(|_| ScriptError::InvalidAddress(address.to_string()))?;
    Ok(p2pkh_script_from_pkh(&pkh))
}

pub fn p2pkh_script_from_pkh(pkh: &[u8; 20]) -> Script {
    Script::new()
        .op(OP_DUP)
        .op(OP_HASH160)
        .push(pkh)
        .op(OP_EQUALVERIFY)
        .op(OP_CHECKSIG)
}

pub fn parse_p2pkh_script(script: &Script) -> Option<String> {
    let b = script.as_bytes();
    if b.len() != P2PKH_SCRIPT_LEN || b[..3] != [OP_DUP, OP_HASH160, 20] || b[23..] != [OP_EQUALVERIFY, OP_CHECKSIG] {
        return None;
    }
    Some(pkh_to_address(&b[3..23]))
}

fn pkh_to_address(slice: &[u8]) -> String {
    let mut pkh = [0u8; 20];
    pkh.copy_from_slice(slice);
    pubkey_hash_to_address(&pkh, ADDRESS_VERSION_MAINNET)
}

// =============================================================================
// NFT / FT
// =============================================================================

/// `OP_PUSHINPUTREFSINGLETON <ref> OP_DROP <p2pkh>`
pub fn nft_script(address: &str, ref_le: &Outpoint) -> Result<Script, ScriptError> {
    Ok(Script::new()
        .push_ref(OP_PUSHINPUTREFSINGLETON, ref_le)
        .op(OP_DROP)
        .append(&p2pkh_script(address)?))
}

pub fn parse_nft_script(script: &Script) -> TokenScriptParts {
    let b = script.as_bytes();
    if b.len() != NFT_SCRIPT_LEN
        || b[0] != OP_PUSHINPUTREFSINGLETON
        || b[37] != OP_DROP
        || b[38..41] != [OP_DUP, OP_HASH160, 20]
        || b[61..] != [OP_EQUALVERIFY, OP_CHECKSIG]
    {
        return TokenScriptParts::default();
    }
    TokenScriptParts {
        reference: Outpoint::from_slice(&b[1..37]),
        address: Some(pkh_to_address(&b[41..61])),
    }
}

/// `<p2pkh> OP_STATESEPARATOR OP_PUSHINPUTREF <ref> <ft conservation code>`
pub fn ft_script(address: &str, ref_le: &Outpoint) -> Result<Script, ScriptError> {
    Ok(p2pkh_script(address)?
        .op(OP_STATESEPARATOR)
        .push_ref(OP_PUSHINPUTREF, ref_le)
        .ops(&FT_CODE))
}

pub fn parse_ft_script(script: &Script) -> TokenScriptParts {
    let b = script.as_bytes();
    if b.len() != FT_SCRIPT_LEN
        || b[..3] != [OP_DUP, OP_HASH160, 20]
        || b[23..27] != [OP_EQUALVERIFY, OP_CHECKSIG, OP_STATESEPARATOR, OP_PUSHINPUTREF]
        || b[63..] != FT_CODE
    {
        return TokenScriptParts::default();
    }
    TokenScriptParts {
        reference: Outpoint::from_slice(&b[27..63]),
        address: Some(pkh_to_address(&b[3..23])),
    }
}

// =============================================================================
// Commit scripts
// =============================================================================

/// Which kind of reveal a commit output is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Nft,
    Ft,
    Dat,
}

impl CommitKind {
    pub fn operation(&self) -> &'static str {
        match self {
            CommitKind::Nft => "nft",
            CommitKind::Ft => "ft",
            CommitKind::Dat => "dat",
        }
    }

    fn from_operation(op: &[u8]) -> Option<Self> {
        match op {
            b"nft" => Some(CommitKind::Nft),
            b"ft" => Some(CommitKind::Ft),
            b"dat" => Some(CommitKind::Dat),
            _ => None,
        }
    }

    /// Required `OP_REFTYPE_OUTPUT` value for the ref created from the commit outpoint
    fn ref_type(&self) -> Option<i64> {
        match self {
            CommitKind::Nft => Some(2),
            CommitKind::Ft => Some(1),
            CommitKind::Dat => None,
        }
    }
}

/// Parameters of a commit locking script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitParams {
    pub kind: CommitKind,
    pub format: PayloadFormat,
    pub payload_hash: [u8; 32],
    /// Refs that must be present in the reveal's inputs (authors, containers or a delegate)
    pub required_refs: Vec<Outpoint>,
    pub address: String,
}

/// Hash-locked commit output
///
/// Unlocking stack: `<sig> <pubkey> <magic> <operation> <payload>`.
pub fn commit_script(params: &CommitParams) -> Result<Script, ScriptError> {
    let mut script = Script::new()
        .op(OP_HASH256)
        .push(&params.payload_hash)
        .op(OP_EQUALVERIFY)
        .push(params.kind.operation().as_bytes())
        .op(OP_EQUALVERIFY)
        .push(params.format.magic())
        .op(OP_EQUALVERIFY);

    if let Some(ref_type) = params.kind.ref_type() {
        script = script
            .ops(&[
                OP_INPUTINDEX,
                OP_OUTPOINTTXHASH,
                OP_INPUTINDEX,
                OP_OUTPOINTINDEX,
                OP_4,
                OP_NUM2BIN,
                OP_CAT,
                OP_REFTYPE_OUTPUT,
            ])
            .push_int(ref_type)
            .op(OP_NUMEQUALVERIFY);
    }

    for reference in &params.required_refs {
        script = script.push_ref(OP_REQUIREINPUTREF, reference).op(OP_DROP);
    }

    Ok(script.append(&p2pkh_script(&params.address)?))
}

pub fn nft_commit_script(
    address: &str,
    payload_hash: [u8; 32],
    format: PayloadFormat,
    required_refs: Vec<Outpoint>,
) -> Result<Script, ScriptError> {
    commit_script(&CommitParams {
        kind: CommitKind::Nft,
        format,
        payload_hash,
        required_refs,
        address: address.to_string(),
    })
}

pub fn ft_commit_script(
    address: &str,
    payload_hash: [u8; 32],
    format: PayloadFormat,
    required_refs: Vec<Outpoint>,
) -> Result<Script, ScriptError> {
    commit_script(&CommitParams {
        kind: CommitKind::Ft,
        format,
        payload_hash,
        required_refs,
        address: address.to_string(),
    })
}

pub fn dat_commit_script(
    address: &str,
    payload_hash: [u8; 32],
    format: PayloadFormat,
) -> Result<Script, ScriptError> {
    commit_script(&CommitParams {
        kind: CommitKind::Dat,
        format,
        payload_hash,
        required_refs: Vec::new(),
        address: address.to_string(),
    })
}

pub fn parse_commit_script(script: &Script) -> Option<CommitParams> {
    let chunks = script.chunks().ok()?;
    let mut it = chunks.iter().peekable();

    expect_op(it.next()?, OP_HASH256)?;
    let payload_hash: [u8; 32] = it.next()?.data()?.try_into().ok()?;
    expect_op(it.next()?, OP_EQUALVERIFY)?;
    let kind = CommitKind::from_operation(it.next()?.data()?)?;
    expect_op(it.next()?, OP_EQUALVERIFY)?;
    let format = PayloadFormat::from_magic(it.next()?.data()?)?;
    expect_op(it.next()?, OP_EQUALVERIFY)?;

    if let Some(ref_type) = kind.ref_type() {
        for op in [
            OP_INPUTINDEX,
            OP_OUTPOINTTXHASH,
            OP_INPUTINDEX,
            OP_OUTPOINTINDEX,
            OP_4,
            OP_NUM2BIN,
            OP_CAT,
            OP_REFTYPE_OUTPUT,
        ] {
            expect_op(it.next()?, op)?;
        }
        if chunk_to_int(it.next()?)? != ref_type {
            return None;
        }
        expect_op(it.next()?, OP_NUMEQUALVERIFY)?;
    }

    let mut required_refs = Vec::new();
    while let Some(Chunk::Ref { opcode: OP_REQUIREINPUTREF, reference }) = it.peek() {
        required_refs.push(Outpoint::from_slice(reference)?);
        it.next();
        expect_op(it.next()?, OP_DROP)?;
    }

    let tail: Vec<Chunk<'_>> = it.copied().collect();
    let address = parse_p2pkh_chunks(&tail)?;
    Some(CommitParams {
        kind,
        format,
        payload_hash,
        required_refs,
        address,
    })
}

fn expect_op(chunk: &Chunk<'_>, op: u8) -> Option<()> {
    (*chunk == Chunk::Op(op)).then_some(())
}

fn parse_p2pkh_chunks(chunks: &[Chunk<'_>]) -> Option<String> {
    match chunks {
        [Chunk::Op(OP_DUP), Chunk::Op(OP_HASH160), Chunk::Push { data, .. }, Chunk::Op(OP_EQUALVERIFY), Chunk::Op(OP_CHECKSIG)]
            if data.len() == 20 =>
        {
            Some(pkh_to_address(data))
        }
        _ => None,
    }
}

// =============================================================================
// Delegate refs
// =============================================================================

/// Asset base: spendable only alongside every anchored ref
pub fn delegate_base_script(address: &str, refs: &[Outpoint]) -> Result<Script, ScriptError> {
    if refs.is_empty() {
        return Err(ScriptError::InvalidParameter(
            "delegate base needs at least one ref".into(),
        ));
    }
    let mut script = Script::new();
    for reference in refs {
        script = script.push_ref(OP_REQUIREINPUTREF, reference).op(OP_DROP);
    }
    Ok(script.append(&p2pkh_script(address)?))
}

/// Returns the anchored refs and owner address
pub fn parse_delegate_base_script(script: &Script) -> Option<(Vec<Outpoint>, String)> {
    let chunks = script.chunks().ok()?;
    let mut refs = Vec::new();
    let mut i = 0;
    while let (Some(Chunk::Ref { opcode: OP_REQUIREINPUTREF, reference }), Some(Chunk::Op(OP_DROP))) =
        (chunks.get(i), chunks.get(i + 1))
    {
        refs.push(Outpoint::from_slice(reference)?);
        i += 2;
    }
    if refs.is_empty() {
        return None;
    }
    let address = parse_p2pkh_chunks(&chunks[i..])?;
    Some((refs, address))
}

/// Single-use delegate token carrying the delegate (normal) ref
pub fn delegate_token_script(address: &str, delegate_ref: &Outpoint) -> Result<Script, ScriptError> {
    Ok(Script::new()
        .push_ref(OP_PUSHINPUTREF, delegate_ref)
        .op(OP_DROP)
        .append(&p2pkh_script(address)?))
}

pub fn parse_delegate_token_script(script: &Script) -> TokenScriptParts {
    let chunks = match script.chunks() {
        Ok(chunks) => chunks,
        Err(_) => return TokenScriptParts::default(),
    };
    match chunks.as_slice() {
        [Chunk::Ref { opcode: OP_PUSHINPUTREF, reference }, Chunk::Op(OP_DROP), rest @ ..] => {
            match parse_p2pkh_chunks(rest) {
                Some(address) => TokenScriptParts {
                    reference: Outpoint::from_slice(reference),
                    address: Some(address),
                },
                None => TokenScriptParts::default(),
            }
        }
        _ => TokenScriptParts::default(),
    }
}

/// Zero-value output recording the delegate ref consumed by a reveal
///
/// The ref appears only as data, so the delegate token is not carried forward.
pub fn delegate_burn_script(delegate_ref: &Outpoint) -> Script {
    Script::new()
        .op(OP_RETURN)
        .push(DELEGATE_BURN_MARKER)
        .push(delegate_ref.as_bytes())
}

pub fn parse_delegate_burn_script(script: &Script) -> Option<Outpoint> {
    let chunks = script.chunks().ok()?;
    match chunks.as_slice() {
        [Chunk::Op(OP_RETURN), marker, reference] if marker.data() == Some(DELEGATE_BURN_MARKER) => {
            Outpoint::from_slice(reference.data()?)
        }
        _ => None,
    }
}

// =============================================================================
// Mutable NFT contract
// =============================================================================

/// Parameters of a mutable-NFT contract output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableNftParams {
    pub mutable_ref: Outpoint,
    pub token_ref: Outpoint,
    pub payload_hash: [u8; 32],
}

/// State machine contract holding the current payload hash of a token
///
/// State: `<payload_hash> OP_DROP`. Code: singleton `mutable_ref`, requires
/// `token_ref` in the inputs, checks the RST magic, then either
/// - `mod`: the output at `contractOutputIndex` keeps this code and its state
///   becomes `hash256(payload)`, or
/// - `sl`: no output carries `mutable_ref` any more (sealed).
///
/// Unlocking stack: `<magic> <op> <payload> <contractOutputIndex>
/// <refHashIndex> <refIndex> <tokenOutputIndex>`.
pub fn mutable_nft_script(
    mutable_ref: &Outpoint,
    token_ref: &Outpoint,
    payload_hash: &[u8; 32],
) -> Script {
    mutable_state(payload_hash)
        .op(OP_STATESEPARATOR)
        .append(&mutable_code(mutable_ref, token_ref))
}

fn mutable_state(payload_hash: &[u8; 32]) -> Script {
    Script::new().push(payload_hash).op(OP_DROP)
}

fn mutable_code(mutable_ref: &Outpoint, token_ref: &Outpoint) -> Script {
    Script::new()
        .push_ref(OP_PUSHINPUTREFSINGLETON, mutable_ref)
        .op(OP_DROP)
        .push_ref(OP_REQUIREINPUTREF, token_ref)
        .op(OP_DROP)
        // header literal
        .ops(&[OP_6, OP_PICK])
        .push(PayloadFormat::Rst.magic())
        .op(OP_EQUALVERIFY)
        .ops(&[OP_5, OP_PICK])
        .push(b"mod")
        .op(OP_EQUAL)
        .op(OP_IF)
        // contract code preserved
        .ops(&[
            OP_3,
            OP_PICK,
            OP_CODESCRIPTBYTECODE_OUTPUT,
            OP_INPUTINDEX,
            OP_CODESCRIPTBYTECODE_UTXO,
            OP_EQUALVERIFY,
        ])
        // state replaced by the new payload hash
        .push(&[0x20])
        .ops(&[OP_5, OP_PICK, OP_HASH256, OP_CAT])
        .push(&[OP_DROP])
        .op(OP_CAT)
        .ops(&[OP_4, OP_PICK, OP_STATESCRIPTBYTECODE_OUTPUT, OP_EQUALVERIFY])
        // token stays where the unlocking script says
        .ops(&[OP_DUP, OP_REFDATASUMMARY_OUTPUT, OP_2, OP_PICK])
        .push_int(36)
        .ops(&[OP_MUL, OP_SPLIT, OP_NIP])
        .push_int(36)
        .ops(&[OP_SPLIT, OP_DROP])
        .push(token_ref.as_bytes())
        .op(OP_EQUALVERIFY)
        // contract ref sits at refHashIndex of the contract output
        .ops(&[OP_3, OP_PICK, OP_REFDATASUMMARY_OUTPUT, OP_3, OP_PICK])
        .push_int(36)
        .ops(&[OP_MUL, OP_SPLIT, OP_NIP])
        .push_int(36)
        .ops(&[OP_SPLIT, OP_DROP])
        .push(mutable_ref.as_bytes())
        .op(OP_EQUALVERIFY)
        .op(OP_ELSE)
        .ops(&[OP_5, OP_PICK])
        .push(b"sl")
        .op(OP_EQUALVERIFY)
        .push(mutable_ref.as_bytes())
        .ops(&[OP_REFOUTPUTCOUNT_OUTPUTS, OP_0, OP_NUMEQUALVERIFY])
        .op(OP_ENDIF)
        .ops(&[OP_2DROP, OP_2DROP, OP_2DROP, OP_DROP, OP_1])
}

pub fn parse_mutable_nft_script(script: &Script) -> Option<MutableNftParams> {
    let (state, code) = script.split_state();
    let state_bytes = state.as_bytes();
    if state_bytes.len() != 34 || state_bytes[0] != 0x20 || state_bytes[33] != OP_DROP {
        return None;
    }
    let payload_hash: [u8; 32] = state_bytes[1..33].try_into().ok()?;

    let chunks = code.chunks().ok()?;
    let (mutable_ref, token_ref) = match chunks.as_slice() {
        [Chunk::Ref { opcode: OP_PUSHINPUTREFSINGLETON, reference: m }, Chunk::Op(OP_DROP), Chunk::Ref { opcode: OP_REQUIREINPUTREF, reference: t }, ..] => {
            (Outpoint::from_slice(m)?, Outpoint::from_slice(t)?)
        }
        _ => return None,
    };
    if code != mutable_code(&mutable_ref, &token_ref) {
        return None;
    }
    Some(MutableNftParams {
        mutable_ref,
        token_ref,
        payload_hash,
    })
}

// =============================================================================
// dmint contracts
// =============================================================================

/// Parameters of a proof-of-work minting contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmintParams {
    /// Mints performed so far
    pub height: u32,
    pub contract_ref: Outpoint,
    pub token_ref: Outpoint,
    /// Mint count after which the contract stops
    pub max_height: i64,
    /// Photons of FT released per mint
    pub reward: i64,
    pub target: u64,
}

/// Convert a difficulty to the 63-bit target compared against the PoW hash prefix
pub fn dmint_diff_to_target(difficulty: u64) -> u64 {
    if difficulty <= 1 {
        return DMINT_MAX_TARGET;
    }
    DMINT_MAX_TARGET / difficulty
}

/// State: `<height> <contract ref> <token ref> <max height> <reward> <target>`
///
/// Code verifies `hash256(outpoint txid ‖ nonce)` prefix below target, bumps
/// height in the continued contract and pays `reward` to an FT output.
pub fn dmint_script(params: &DmintParams) -> Script {
    Script::new()
        .push(&params.height.to_le_bytes())
        .push_ref(OP_PUSHINPUTREFSINGLETON, &params.contract_ref)
        .push_ref(OP_PUSHINPUTREF, &params.token_ref)
        .push_int(params.max_height)
        .push_int(params.reward)
        .push_int(params.target as i64)
        .op(OP_STATESEPARATOR)
        .append(&dmint_code())
}

fn dmint_code() -> Script {
    // stack: nonce contractOutputIndex rewardOutputIndex | height cref tref max reward target
    Script::new()
        // height < max
        .ops(&[OP_5, OP_PICK, OP_BIN2NUM, OP_3, OP_PICK, OP_LESSTHAN, OP_VERIFY])
        // proof of work over this contract's outpoint
        .ops(&[OP_INPUTINDEX, OP_OUTPOINTTXHASH])
        .push_int(9)
        .ops(&[OP_PICK, OP_CAT, OP_HASH256])
        .push_int(8)
        .ops(&[OP_SPLIT, OP_DROP, OP_BIN2NUM, OP_OVER, OP_LESSTHAN, OP_VERIFY])
        // continued contract keeps its code
        .push_int(7)
        .ops(&[
            OP_PICK,
            OP_CODESCRIPTBYTECODE_OUTPUT,
            OP_INPUTINDEX,
            OP_CODESCRIPTBYTECODE_UTXO,
            OP_EQUALVERIFY,
        ])
        // reward output value
        .push_int(6)
        .ops(&[OP_PICK, OP_OUTPUTVALUE, OP_2, OP_PICK, OP_NUMEQUALVERIFY])
        .ops(&[OP_2DROP, OP_2DROP, OP_2DROP, OP_2DROP, OP_DROP, OP_1])
}

pub fn parse_dmint_script(script: &Script) -> Option<DmintParams> {
    let (state, code) = script.split_state();
    if code != dmint_code() {
        return None;
    }
    let chunks = state.chunks().ok()?;
    match chunks.as_slice() {
        [height, Chunk::Ref { opcode: OP_PUSHINPUTREFSINGLETON, reference: c }, Chunk::Ref { opcode: OP_PUSHINPUTREF, reference: t }, max, reward, target] => {
            let height_bytes: [u8; 4] = height.data()?.try_into().ok()?;
            Some(DmintParams {
                height: u32::from_le_bytes(height_bytes),
                contract_ref: Outpoint::from_slice(c)?,
                token_ref: Outpoint::from_slice(t)?,
                max_height: chunk_to_int(max)?,
                reward: chunk_to_int(reward)?,
                target: u64::try_from(chunk_to_int(target)?).ok()?,
            })
        }
        _ => None,
    }
}

// =============================================================================
// Script hashes
// =============================================================================

/// Electrum-style script hash: SHA-256 of the script, byte-reversed hex
pub fn script_hash(script: &Script) -> String {
    let mut hash = sha256(script.as_bytes());
    hash.reverse();
    hex::encode(hash)
}

/// Copy of the script with every ref operand zeroed
pub fn zero_refs(script: &Script) -> Script {
    let mut bytes = script.as_bytes().to_vec();
    let mut offset = 0;
    if let Ok(chunks) = script.chunks() {
        for chunk in chunks {
            match chunk {
                Chunk::Ref { .. } => {
                    bytes[offset + 1..offset + 37].fill(0);
                    offset += 37;
                }
                Chunk::Op(_) => offset += 1,
                Chunk::Push { opcode, data } => {
                    offset += data.len()
                        + match opcode {
                            OP_PUSHDATA1 => 2,
                            OP_PUSHDATA2 => 3,
                            OP_PUSHDATA4 => 5,
                            _ => 1,
                        }
                }
            }
        }
    }
    Script::from_bytes(bytes)
}

/// Ref-agnostic script hash used to subscribe to every NFT/FT held by an address
pub fn zero_ref_script_hash(script: &Script) -> String {
    script_hash(&zero_refs(script))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn address() -> String {
        KeyPair::generate().address()
    }

    fn sample_ref() -> Outpoint {
        Outpoint::from_utxo(&"ab".repeat(32), 3).unwrap().reverse()
    }

    #[test]
    fn test_p2pkh_round_trip() {
        let addr = address();
        let script = p2pkh_script(&addr).unwrap();
        assert_eq!(script.len(), P2PKH_SCRIPT_LEN);
        assert_eq!(parse_p2pkh_script(&script), Some(addr));
        assert!(p2pkh_script("garbage").is_err());
    }

    #[test]
    fn test_nft_round_trip_and_layout() {
        let addr = address();
        let r = sample_ref();
        let script = nft_script(&addr, &r).unwrap();
        assert_eq!(script.len(), NFT_SCRIPT_LEN);
        assert_eq!(&script.to_hex()[2..74], r.to_ref());
        assert!(script.to_hex().starts_with("d8"));

        let parts = parse_nft_script(&script);
        assert_eq!(parts.reference, Some(r));
        assert_eq!(parts.address, Some(addr));
    }

    #[test]
    fn test_ft_round_trip_and_layout() {
        let addr = address();
        let r = sample_ref();
        let script = ft_script(&addr, &r).unwrap();
        assert_eq!(script.len(), FT_SCRIPT_LEN);
        assert!(script.to_hex().ends_with("dec0e9aa76e378e4a269e69d"));

        let parts = parse_ft_script(&script);
        assert_eq!(parts.reference, Some(r));
        assert_eq!(parts.address, Some(addr));
    }

    #[test]
    fn test_malformed_token_scripts_yield_none() {
        let addr = address();
        let r = sample_ref();
        let nft = nft_script(&addr, &r).unwrap();
        let mut truncated = nft.as_bytes().to_vec();
        truncated.pop();
        assert_eq!(parse_nft_script(&Script::from_bytes(truncated)), TokenScriptParts::default());
        assert_eq!(parse_ft_script(&nft), TokenScriptParts::default());
        assert_eq!(parse_nft_script(&Script::new()), TokenScriptParts::default());
        assert_eq!(parse_p2pkh_script(&nft), None);
    }

    #[test]
    fn test_commit_script_round_trip() {
        let addr = address();
        let author = sample_ref();
        let params = CommitParams {
            kind: CommitKind::Nft,
            format: PayloadFormat::Rst,
            payload_hash: [9u8; 32],
            required_refs: vec![author],
            address: addr.clone(),
        };
        let script = commit_script(&params).unwrap();
        assert_eq!(script.required_refs(), vec![author]);
        assert_eq!(parse_commit_script(&script), Some(params));

        let dat = dat_commit_script(&addr, [1u8; 32], PayloadFormat::Atom).unwrap();
        let parsed = parse_commit_script(&dat).unwrap();
        assert_eq!(parsed.kind, CommitKind::Dat);
        assert_eq!(parsed.format, PayloadFormat::Atom);
        assert!(parsed.required_refs.is_empty());
    }

    #[test]
    fn test_delegate_scripts() {
        let addr = address();
        let refs = vec![sample_ref(), sample_ref().offset(1)];
        let base = delegate_base_script(&addr, &refs).unwrap();
        assert_eq!(parse_delegate_base_script(&base), Some((refs.clone(), addr.clone())));
        assert!(delegate_base_script(&addr, &[]).is_err());

        let delegate = sample_ref().offset(7);
        let token = delegate_token_script(&addr, &delegate).unwrap();
        assert_eq!(parse_delegate_token_script(&token).reference, Some(delegate));
        assert_eq!(token.push_refs(), vec![delegate]);

        let burn = delegate_burn_script(&delegate);
        assert_eq!(parse_delegate_burn_script(&burn), Some(delegate));
        assert!(burn.push_refs().is_empty());
    }

    #[test]
    fn test_mutable_script_round_trip() {
        let mutable_ref = sample_ref().offset(1);
        let token_ref = sample_ref();
        let script = mutable_nft_script(&mutable_ref, &token_ref, &[4u8; 32]);
        let parsed = parse_mutable_nft_script(&script).unwrap();
        assert_eq!(parsed.mutable_ref, mutable_ref);
        assert_eq!(parsed.token_ref, token_ref);
        assert_eq!(parsed.payload_hash, [4u8; 32]);

        // modify keeps the code section and replaces only the state
        let next = mutable_nft_script(&mutable_ref, &token_ref, &[5u8; 32]);
        assert_eq!(script.split_state().1, next.split_state().1);
        assert_ne!(script.split_state().0, next.split_state().0);
        assert_eq!(script.push_refs(), vec![mutable_ref]);
    }

    #[test]
    fn test_dmint_round_trip() {
        let params = DmintParams {
            height: 0,
            contract_ref: sample_ref().offset(1),
            token_ref: sample_ref(),
            max_height: 10_000,
            reward: 50_000,
            target: dmint_diff_to_target(100),
        };
        let script = dmint_script(&params);
        assert_eq!(parse_dmint_script(&script), Some(params));
        assert_eq!(dmint_diff_to_target(1), DMINT_MAX_TARGET);
        assert!(dmint_diff_to_target(1000) < dmint_diff_to_target(10));
    }

    #[test]
    fn test_zero_ref_script_hash_is_ref_agnostic() {
        let addr = address();
        let a = nft_script(&addr, &sample_ref()).unwrap();
        let b = nft_script(&addr, &sample_ref().offset(5)).unwrap();
        assert_ne!(script_hash(&a), script_hash(&b));
        assert_eq!(zero_ref_script_hash(&a), zero_ref_script_hash(&b));
        assert_eq!(
            zero_ref_script_hash(&a),
            script_hash(&nft_script(&addr, &Outpoint::zero()).unwrap())
        );
    }
}
