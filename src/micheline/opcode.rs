use std::fmt;

use super::error::ValueDecodeError;

/// Primitive opcode as found in the binary encoding.
///
/// Data constructors (`Pair`, `Left`, ...) and type names (`pair`, `or`, ...)
/// share one table; the byte value is the position in [`OPCODE_NAMES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode(u8);

const OPCODE_NAMES: [&str; 157] = [
    "parameter", "storage", "code", "False", "Elt", "Left", "None", "Pair",
    "Right", "Some", "True", "Unit", "PACK", "UNPACK", "BLAKE2B", "SHA256",
    "SHA512", "ABS", "ADD", "AMOUNT", "AND", "BALANCE", "CAR", "CDR",
    "CHECK_SIGNATURE", "COMPARE", "CONCAT", "CONS", "CREATE_ACCOUNT",
    "CREATE_CONTRACT", "IMPLICIT_ACCOUNT", "DIP", "DROP", "DUP", "EDIV",
    "EMPTY_MAP", "EMPTY_SET", "EQ", "EXEC", "FAILWITH", "GE", "GET", "GT",
    "HASH_KEY", "IF", "IF_CONS", "IF_LEFT", "IF_NONE", "INT", "LAMBDA", "LE",
    "LEFT", "LOOP", "LSL", "LSR", "LT", "MAP", "MEM", "MUL", "NEG", "NEQ",
    "NIL", "NONE", "NOT", "NOW", "OR", "PAIR", "PUSH", "RIGHT", "SIZE", "SOME",
    "SOURCE", "SENDER", "SELF", "STEPS_TO_QUOTA", "SUB", "SWAP",
    "TRANSFER_TOKENS", "SET_DELEGATE", "UNIT", "UPDATE", "XOR", "ITER",
    "LOOP_LEFT", "ADDRESS", "CONTRACT", "ISNAT", "CAST", "RENAME", "bool",
    "contract", "int", "key", "key_hash", "lambda", "list", "map", "big_map",
    "nat", "option", "or", "pair", "set", "signature", "string", "bytes",
    "mutez", "timestamp", "unit", "operation", "address", "SLICE", "DIG",
    "DUG", "EMPTY_BIG_MAP", "APPLY", "chain_id", "CHAIN_ID", "LEVEL",
    "SELF_ADDRESS", "never", "NEVER", "UNPAIR", "VOTING_POWER",
    "TOTAL_VOTING_POWER", "KECCAK", "SHA3", "PAIRING_CHECK", "bls12_381_g1",
    "bls12_381_g2", "bls12_381_fr", "sapling_state",
    "sapling_transaction_deprecated", "SAPLING_EMPTY_STATE",
    "SAPLING_VERIFY_UPDATE", "ticket", "TICKET_DEPRECATED", "READ_TICKET",
    "SPLIT_TICKET", "JOIN_TICKETS", "GET_AND_UPDATE", "chest", "chest_key",
    "OPEN_CHEST", "VIEW", "view", "constant", "SUB_MUTEZ",
    "tx_rollup_l2_address", "MIN_BLOCK_TIME", "sapling_transaction", "EMIT",
    "Lambda_rec", "LAMBDA_REC", "TICKET", "BYTES", "NAT",
];

impl OpCode {
    pub const PARAMETER: OpCode = OpCode(0);
    pub const STORAGE: OpCode = OpCode(1);
    pub const CODE: OpCode = OpCode(2);
    pub const D_FALSE: OpCode = OpCode(3);
    pub const D_ELT: OpCode = OpCode(4);
    pub const D_LEFT: OpCode = OpCode(5);
    pub const D_NONE: OpCode = OpCode(6);
    pub const D_PAIR: OpCode = OpCode(7);
    pub const D_RIGHT: OpCode = OpCode(8);
    pub const D_SOME: OpCode = OpCode(9);
    pub const D_TRUE: OpCode = OpCode(10);
    pub const D_UNIT: OpCode = OpCode(11);
    pub const T_BOOL: OpCode = OpCode(89);
    pub const T_CONTRACT: OpCode = OpCode(90);
    pub const T_INT: OpCode = OpCode(91);
    pub const T_KEY: OpCode = OpCode(92);
    pub const T_KEY_HASH: OpCode = OpCode(93);
    pub const T_LAMBDA: OpCode = OpCode(94);
    pub const T_LIST: OpCode = OpCode(95);
    pub const T_MAP: OpCode = OpCode(96);
    pub const T_BIG_MAP: OpCode = OpCode(97);
    pub const T_NAT: OpCode = OpCode(98);
    pub const T_OPTION: OpCode = OpCode(99);
    pub const T_OR: OpCode = OpCode(100);
    pub const T_PAIR: OpCode = OpCode(101);
    pub const T_SET: OpCode = OpCode(102);
    pub const T_SIGNATURE: OpCode = OpCode(103);
    pub const T_STRING: OpCode = OpCode(104);
    pub const T_BYTES: OpCode = OpCode(105);
    pub const T_MUTEZ: OpCode = OpCode(106);
    pub const T_TIMESTAMP: OpCode = OpCode(107);
    pub const T_UNIT: OpCode = OpCode(108);
    pub const T_OPERATION: OpCode = OpCode(109);
    pub const T_ADDRESS: OpCode = OpCode(110);
    pub const T_CHAIN_ID: OpCode = OpCode(116);
    pub const T_NEVER: OpCode = OpCode(120);
    pub const T_TICKET: OpCode = OpCode(135);

    pub fn from_u8(byte: u8) -> Result<Self, ValueDecodeError> {
        if (byte as usize) < OPCODE_NAMES.len() {
            Ok(OpCode(byte))
        } else {
            Err(ValueDecodeError::UnknownOpCode(byte))
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ValueDecodeError> {
        OPCODE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| OpCode(i as u8))
            .ok_or_else(|| ValueDecodeError::UnknownOpName(name.to_string()))
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        OPCODE_NAMES[self.0 as usize]
    }

    /// Type names are the lowercase entries of the table.
    pub fn is_type(self) -> bool {
        self.name().starts_with(|c: char| c.is_ascii_lowercase())
            && !matches!(self, Self::PARAMETER | Self::STORAGE | Self::CODE)
            && self.name() != "view"
            && self.name() != "constant"
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_names() {
        assert_eq!(OpCode::D_PAIR.name(), "Pair");
        assert_eq!(OpCode::T_PAIR.name(), "pair");
        assert_eq!(OpCode::T_TICKET.name(), "ticket");
        assert_eq!(OpCode::from_u8(156).unwrap().name(), "NAT");
        assert_eq!(OpCode::from_name("big_map").unwrap(), OpCode::T_BIG_MAP);
        assert_eq!(OpCode::from_name("chain_id").unwrap(), OpCode::T_CHAIN_ID);
        assert_eq!(OpCode::from_name("never").unwrap(), OpCode::T_NEVER);
    }

    #[test]
    fn test_opcode_out_of_range() {
        assert!(matches!(
            OpCode::from_u8(157),
            Err(ValueDecodeError::UnknownOpCode(157))
        ));
        assert!(OpCode::from_name("pear").is_err());
    }

    #[test]
    fn test_type_classification() {
        assert!(OpCode::T_NAT.is_type());
        assert!(OpCode::T_OPERATION.is_type());
        assert!(!OpCode::D_PAIR.is_type());
        assert!(!OpCode::STORAGE.is_type());
        assert!(!OpCode::from_name("ADD").unwrap().is_type());
    }
}
