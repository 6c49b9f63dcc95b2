//! Serialized transaction size estimation
//!
//! Fee checks compare the real fee against `size * rate`, so these must match
//! the byte layout produced by `core::transaction` exactly.

/// Signature push (1 + 72 DER+sighash, worst case) and compressed pubkey push (1 + 33)
pub const P2PKH_SCRIPT_SIG_SIZE: usize = 107;

/// Version + locktime
const TX_OVERHEAD: usize = 8;

/// Outpoint (32 + 4) + sequence (4)
const INPUT_OVERHEAD: usize = 40;

/// Output value
const OUTPUT_OVERHEAD: usize = 8;

/// Bytes taken by a Bitcoin CompactSize integer
pub fn varint_size(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Bytes taken by a minimal data push of `len` bytes
pub fn push_size(len: usize) -> usize {
    let header = match len {
        0..=0x4b => 1,
        0x4c..=0xff => 2,
        0x100..=0xffff => 3,
        _ => 5,
    };
    header + len
}

/// Exact size of a transaction with the given input script sig and output script lengths
pub fn tx_size(script_sig_sizes: &[usize], output_script_sizes: &[usize]) -> usize {
    let inputs: usize = script_sig_sizes
        .iter()
        .map(|s| INPUT_OVERHEAD + varint_size(*s) + s)
        .sum();
    let outputs: usize = output_script_sizes
        .iter()
        .map(|s| OUTPUT_OVERHEAD + varint_size(*s) + s)
        .sum();
    TX_OVERHEAD
        + varint_size(script_sig_sizes.len())
        + inputs
        + varint_size(output_script_sizes.len())
        + outputs
}

/// P2PKH unlock followed by `extra` bytes of reveal data
pub fn reveal_script_sig_size(extra: usize) -> usize {
    P2PKH_SCRIPT_SIG_SIZE + extra
}

/// Size of the `<magic> <operation> <payload>` pushes appended to a reveal unlock
pub fn payload_pushes_size(operation: &str, cbor_len: usize) -> usize {
    push_size(4) + push_size(operation.len()) + push_size(cbor_len)
}
