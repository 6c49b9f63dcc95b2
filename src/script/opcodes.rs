//! Radiant script opcodes
//!
//! The Bitcoin-derived base set plus Radiant's induction-proof reference
//! opcodes (`0xd0..=0xed`) and native introspection opcodes (`0xbd..=0xcf`).

pub const OP_0: u8 = 0x00;
pub const OP_FALSE: u8 = OP_0;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_TRUE: u8 = OP_1;
pub const OP_2: u8 = 0x52;
pub const OP_3: u8 = 0x53;
pub const OP_4: u8 = 0x54;
pub const OP_5: u8 = 0x55;
pub const OP_6: u8 = 0x56;
pub const OP_16: u8 = 0x60;

// Flow control
pub const OP_NOP: u8 = 0x61;
pub const OP_IF: u8 = 0x63;
pub const OP_NOTIF: u8 = 0x64;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;

// Stack
pub const OP_TOALTSTACK: u8 = 0x6b;
pub const OP_FROMALTSTACK: u8 = 0x6c;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_2DUP: u8 = 0x6e;
pub const OP_DEPTH: u8 = 0x74;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_NIP: u8 = 0x77;
pub const OP_OVER: u8 = 0x78;
pub const OP_PICK: u8 = 0x79;
pub const OP_ROLL: u8 = 0x7a;
pub const OP_ROT: u8 = 0x7b;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_TUCK: u8 = 0x7d;

// Splice
pub const OP_CAT: u8 = 0x7e;
pub const OP_SPLIT: u8 = 0x7f;
pub const OP_NUM2BIN: u8 = 0x80;
pub const OP_BIN2NUM: u8 = 0x81;
pub const OP_SIZE: u8 = 0x82;

// Bitwise logic
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;

// Arithmetic
pub const OP_1ADD: u8 = 0x8b;
pub const OP_1SUB: u8 = 0x8c;
pub const OP_NOT: u8 = 0x91;
pub const OP_0NOTEQUAL: u8 = 0x92;
pub const OP_ADD: u8 = 0x93;
pub const OP_SUB: u8 = 0x94;
pub const OP_MUL: u8 = 0x95;
pub const OP_DIV: u8 = 0x96;
pub const OP_BOOLAND: u8 = 0x9a;
pub const OP_BOOLOR: u8 = 0x9b;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
pub const OP_LESSTHAN: u8 = 0x9f;
pub const OP_GREATERTHAN: u8 = 0xa0;
pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
pub const OP_WITHIN: u8 = 0xa5;

// Crypto
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKDATASIG: u8 = 0xba;

// Native introspection
pub const OP_STATESEPARATOR: u8 = 0xbd;
pub const OP_STATESEPARATORINDEX_UTXO: u8 = 0xbe;
pub const OP_STATESEPARATORINDEX_OUTPUT: u8 = 0xbf;
pub const OP_INPUTINDEX: u8 = 0xc0;
pub const OP_ACTIVEBYTECODE: u8 = 0xc1;
pub const OP_TXVERSION: u8 = 0xc2;
pub const OP_TXINPUTCOUNT: u8 = 0xc3;
pub const OP_TXOUTPUTCOUNT: u8 = 0xc4;
pub const OP_TXLOCKTIME: u8 = 0xc5;
pub const OP_UTXOVALUE: u8 = 0xc6;
pub const OP_UTXOBYTECODE: u8 = 0xc7;
pub const OP_OUTPOINTTXHASH: u8 = 0xc8;
pub const OP_OUTPOINTINDEX: u8 = 0xc9;
pub const OP_INPUTBYTECODE: u8 = 0xca;
pub const OP_INPUTSEQUENCENUMBER: u8 = 0xcb;
pub const OP_OUTPUTVALUE: u8 = 0xcc;
pub const OP_OUTPUTBYTECODE: u8 = 0xcd;
pub const OP_SHA512_256: u8 = 0xce;
pub const OP_HASH512_256: u8 = 0xcf;

// Induction-proof references
pub const OP_PUSHINPUTREF: u8 = 0xd0;
pub const OP_REQUIREINPUTREF: u8 = 0xd1;
pub const OP_DISALLOWPUSHINPUTREF: u8 = 0xd2;
pub const OP_DISALLOWPUSHINPUTREFSIBLING: u8 = 0xd3;
pub const OP_REFHASHDATASUMMARY_UTXO: u8 = 0xd4;
pub const OP_REFHASHVALUESUM_UTXOS: u8 = 0xd5;
pub const OP_REFHASHDATASUMMARY_OUTPUT: u8 = 0xd6;
pub const OP_REFHASHVALUESUM_OUTPUTS: u8 = 0xd7;
pub const OP_PUSHINPUTREFSINGLETON: u8 = 0xd8;
pub const OP_REFTYPE_UTXO: u8 = 0xd9;
pub const OP_REFTYPE_OUTPUT: u8 = 0xda;
pub const OP_REFVALUESUM_UTXOS: u8 = 0xdb;
pub const OP_REFVALUESUM_OUTPUTS: u8 = 0xdc;
pub const OP_REFOUTPUTCOUNT_UTXOS: u8 = 0xdd;
pub const OP_REFOUTPUTCOUNT_OUTPUTS: u8 = 0xde;
pub const OP_REFOUTPUTCOUNTZEROVALUED_UTXOS: u8 = 0xdf;
pub const OP_REFOUTPUTCOUNTZEROVALUED_OUTPUTS: u8 = 0xe0;
pub const OP_REFDATASUMMARY_UTXO: u8 = 0xe1;
pub const OP_REFDATASUMMARY_OUTPUT: u8 = 0xe2;
pub const OP_CODESCRIPTHASHVALUESUM_UTXOS: u8 = 0xe3;
pub const OP_CODESCRIPTHASHVALUESUM_OUTPUTS: u8 = 0xe4;
pub const OP_CODESCRIPTHASHOUTPUTCOUNT_UTXOS: u8 = 0xe5;
pub const OP_CODESCRIPTHASHOUTPUTCOUNT_OUTPUTS: u8 = 0xe6;
pub const OP_CODESCRIPTHASHZEROVALUEDOUTPUTCOUNT_UTXOS: u8 = 0xe7;
pub const OP_CODESCRIPTHASHZEROVALUEDOUTPUTCOUNT_OUTPUTS: u8 = 0xe8;
pub const OP_CODESCRIPTBYTECODE_UTXO: u8 = 0xe9;
pub const OP_CODESCRIPTBYTECODE_OUTPUT: u8 = 0xea;
pub const OP_STATESCRIPTBYTECODE_UTXO: u8 = 0xeb;
pub const OP_STATESCRIPTBYTECODE_OUTPUT: u8 = 0xec;
pub const OP_PUSH_TX_STATE: u8 = 0xed;

/// Opcodes followed by a 36-byte reference immediate instead of a push length
pub fn takes_ref_operand(op: u8) -> bool {
    matches!(
        op,
        OP_PUSHINPUTREF
            | OP_REQUIREINPUTREF
            | OP_DISALLOWPUSHINPUTREF
            | OP_DISALLOWPUSHINPUTREFSIBLING
            | OP_PUSHINPUTREFSINGLETON
    )
}

/// Opcodes that carry a reference forward into the output they lock
pub fn pushes_ref(op: u8) -> bool {
    matches!(op, OP_PUSHINPUTREF | OP_PUSHINPUTREFSINGLETON)
}

/// ASM mnemonic for the opcodes the wallet emits
pub fn opcode_name(op: u8) -> Option<&'static str> {
    let name = match op {
        OP_0 => "OP_0",
        OP_1NEGATE => "OP_1NEGATE",
        OP_1 => "OP_1",
        OP_2 => "OP_2",
        OP_3 => "OP_3",
        OP_4 => "OP_4",
        OP_5 => "OP_5",
        OP_6 => "OP_6",
        OP_IF => "OP_IF",
        OP_NOTIF => "OP_NOTIF",
        OP_ELSE => "OP_ELSE",
        OP_ENDIF => "OP_ENDIF",
        OP_VERIFY => "OP_VERIFY",
        OP_RETURN => "OP_RETURN",
        OP_TOALTSTACK => "OP_TOALTSTACK",
        OP_FROMALTSTACK => "OP_FROMALTSTACK",
        OP_2DROP => "OP_2DROP",
        OP_2DUP => "OP_2DUP",
        OP_DEPTH => "OP_DEPTH",
        OP_DROP => "OP_DROP",
        OP_DUP => "OP_DUP",
        OP_NIP => "OP_NIP",
        OP_OVER => "OP_OVER",
        OP_PICK => "OP_PICK",
        OP_ROLL => "OP_ROLL",
        OP_ROT => "OP_ROT",
        OP_SWAP => "OP_SWAP",
        OP_TUCK => "OP_TUCK",
        OP_CAT => "OP_CAT",
        OP_SPLIT => "OP_SPLIT",
        OP_NUM2BIN => "OP_NUM2BIN",
        OP_BIN2NUM => "OP_BIN2NUM",
        OP_SIZE => "OP_SIZE",
        OP_EQUAL => "OP_EQUAL",
        OP_EQUALVERIFY => "OP_EQUALVERIFY",
        OP_1ADD => "OP_1ADD",
        OP_1SUB => "OP_1SUB",
        OP_NOT => "OP_NOT",
        OP_ADD => "OP_ADD",
        OP_SUB => "OP_SUB",
        OP_MUL => "OP_MUL",
        OP_DIV => "OP_DIV",
        OP_BOOLAND => "OP_BOOLAND",
        OP_NUMEQUAL => "OP_NUMEQUAL",
        OP_NUMEQUALVERIFY => "OP_NUMEQUALVERIFY",
        OP_LESSTHAN => "OP_LESSTHAN",
        OP_GREATERTHAN => "OP_GREATERTHAN",
        OP_LESSTHANOREQUAL => "OP_LESSTHANOREQUAL",
        OP_GREATERTHANOREQUAL => "OP_GREATERTHANOREQUAL",
        OP_WITHIN => "OP_WITHIN",
        OP_SHA256 => "OP_SHA256",
        OP_HASH160 => "OP_HASH160",
        OP_HASH256 => "OP_HASH256",
        OP_CHECKSIG => "OP_CHECKSIG",
        OP_CHECKSIGVERIFY => "OP_CHECKSIGVERIFY",
        OP_CHECKDATASIG => "OP_CHECKDATASIG",
        OP_STATESEPARATOR => "OP_STATESEPARATOR",
        OP_INPUTINDEX => "OP_INPUTINDEX",
        OP_ACTIVEBYTECODE => "OP_ACTIVEBYTECODE",
        OP_TXINPUTCOUNT => "OP_TXINPUTCOUNT",
        OP_TXOUTPUTCOUNT => "OP_TXOUTPUTCOUNT",
        OP_TXLOCKTIME => "OP_TXLOCKTIME",
        OP_UTXOVALUE => "OP_UTXOVALUE",
        OP_OUTPOINTTXHASH => "OP_OUTPOINTTXHASH",
        OP_OUTPOINTINDEX => "OP_OUTPOINTINDEX",
        OP_INPUTBYTECODE => "OP_INPUTBYTECODE",
        OP_OUTPUTVALUE => "OP_OUTPUTVALUE",
        OP_OUTPUTBYTECODE => "OP_OUTPUTBYTECODE",
        OP_SHA512_256 => "OP_SHA512_256",
        OP_HASH512_256 => "OP_HASH512_256",
        OP_PUSHINPUTREF => "OP_PUSHINPUTREF",
        OP_REQUIREINPUTREF => "OP_REQUIREINPUTREF",
        OP_DISALLOWPUSHINPUTREF => "OP_DISALLOWPUSHINPUTREF",
        OP_DISALLOWPUSHINPUTREFSIBLING => "OP_DISALLOWPUSHINPUTREFSIBLING",
        OP_REFHASHDATASUMMARY_OUTPUT => "OP_REFHASHDATASUMMARY_OUTPUT",
        OP_PUSHINPUTREFSINGLETON => "OP_PUSHINPUTREFSINGLETON",
        OP_REFTYPE_OUTPUT => "OP_REFTYPE_OUTPUT",
        OP_REFOUTPUTCOUNT_OUTPUTS => "OP_REFOUTPUTCOUNT_OUTPUTS",
        OP_CODESCRIPTHASHVALUESUM_UTXOS => "OP_CODESCRIPTHASHVALUESUM_UTXOS",
        OP_CODESCRIPTHASHVALUESUM_OUTPUTS => "OP_CODESCRIPTHASHVALUESUM_OUTPUTS",
        OP_CODESCRIPTHASHOUTPUTCOUNT_OUTPUTS => "OP_CODESCRIPTHASHOUTPUTCOUNT_OUTPUTS",
        OP_CODESCRIPTBYTECODE_UTXO => "OP_CODESCRIPTBYTECODE_UTXO",
        OP_CODESCRIPTBYTECODE_OUTPUT => "OP_CODESCRIPTBYTECODE_OUTPUT",
        OP_STATESCRIPTBYTECODE_OUTPUT => "OP_STATESCRIPTBYTECODE_OUTPUT",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_operand_opcodes() {
        assert!(takes_ref_operand(OP_PUSHINPUTREF));
        assert!(takes_ref_operand(OP_PUSHINPUTREFSINGLETON));
        assert!(takes_ref_operand(OP_REQUIREINPUTREF));
        assert!(!takes_ref_operand(OP_REFTYPE_OUTPUT));
        assert!(pushes_ref(OP_PUSHINPUTREFSINGLETON));
        assert!(!pushes_ref(OP_REQUIREINPUTREF));
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(OP_DUP), Some("OP_DUP"));
        assert_eq!(opcode_name(OP_STATESEPARATOR), Some("OP_STATESEPARATOR"));
        assert_eq!(opcode_name(0xff), None);
    }
}
