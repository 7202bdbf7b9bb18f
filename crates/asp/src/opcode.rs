//! Instruction opcodes.
//!
//! One opcode byte, followed by 0–8 operand bytes. Operand width is folded
//! into the opcode where it pays off: the `1`/`2`/`4` suffixed forms carry
//! 1, 2, or 4 byte operands, the `0` forms none. Integer operands are
//! big-endian two's complement, sign-extended from their encoded width;
//! float operands are 8 bytes big-endian; code addresses are 4 bytes
//! big-endian unsigned.

use strum::{FromRepr, IntoStaticStr};

/// Instruction opcodes with their wire byte values.
///
/// The static string form of each variant is its assembler mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum OpCode {
    /* Generic stack operations. */
    #[strum(serialize = "PUSHN")]
    PushNone = 0x00,
    #[strum(serialize = "PUSHE")]
    PushEllipsis = 0x01,
    #[strum(serialize = "PUSHF")]
    PushFalse = 0x02,
    #[strum(serialize = "PUSHT")]
    PushTrue = 0x03,
    #[strum(serialize = "PUSHI0")]
    PushInteger0 = 0x04,
    #[strum(serialize = "PUSHI1")]
    PushInteger1 = 0x05,
    #[strum(serialize = "PUSHI2")]
    PushInteger2 = 0x06,
    #[strum(serialize = "PUSHI4")]
    PushInteger4 = 0x07,
    #[strum(serialize = "PUSHD")]
    PushFloat = 0x08,
    #[strum(serialize = "PUSHS0")]
    PushString0 = 0x10,
    #[strum(serialize = "PUSHS1")]
    PushString1 = 0x11,
    #[strum(serialize = "PUSHS2")]
    PushString2 = 0x12,
    #[strum(serialize = "PUSHS4")]
    PushString4 = 0x13,
    #[strum(serialize = "PUSHTU")]
    PushTuple = 0x14,
    #[strum(serialize = "PUSHLI")]
    PushList = 0x15,
    #[strum(serialize = "PUSHSE")]
    PushSet = 0x16,
    #[strum(serialize = "PUSHDI")]
    PushDictionary = 0x17,
    #[strum(serialize = "PUSHAL")]
    PushArgumentList = 0x18,
    #[strum(serialize = "PUSHPL")]
    PushParameterList = 0x19,
    #[strum(serialize = "PUSHCA")]
    PushCodeAddress = 0x1C,
    #[strum(serialize = "PUSHM1")]
    PushModule1 = 0x1D,
    #[strum(serialize = "PUSHM2")]
    PushModule2 = 0x1E,
    #[strum(serialize = "PUSHM4")]
    PushModule4 = 0x1F,
    #[strum(serialize = "POP")]
    Pop = 0x20,
    #[strum(serialize = "POP1")]
    PopCount = 0x21,

    /* Unary operations. */
    #[strum(serialize = "LNOT")]
    LogicalNot = 0x40,
    #[strum(serialize = "POS")]
    Positive = 0x48,
    #[strum(serialize = "NEG")]
    Negate = 0x49,
    #[strum(serialize = "NOT")]
    BitwiseNot = 0x4F,

    /* Binary logical and arithmetic operations. */
    #[strum(serialize = "OR")]
    BitOr = 0x53,
    #[strum(serialize = "XOR")]
    BitXor = 0x54,
    #[strum(serialize = "AND")]
    BitAnd = 0x55,
    #[strum(serialize = "LSH")]
    LeftShift = 0x56,
    #[strum(serialize = "RSH")]
    RightShift = 0x57,
    #[strum(serialize = "ADD")]
    Add = 0x58,
    #[strum(serialize = "SUB")]
    Subtract = 0x59,
    #[strum(serialize = "MUL")]
    Multiply = 0x5A,
    #[strum(serialize = "DIV")]
    Divide = 0x5B,
    #[strum(serialize = "FDIV")]
    FloorDivide = 0x5C,
    #[strum(serialize = "MOD")]
    Modulo = 0x5D,
    #[strum(serialize = "POW")]
    Power = 0x5E,

    /* Binary comparison operations. */
    #[strum(serialize = "NE")]
    NotEqual = 0x60,
    #[strum(serialize = "EQ")]
    Equal = 0x61,
    #[strum(serialize = "LT")]
    Less = 0x62,
    #[strum(serialize = "LE")]
    LessOrEqual = 0x63,
    #[strum(serialize = "GT")]
    Greater = 0x64,
    #[strum(serialize = "GE")]
    GreaterOrEqual = 0x65,
    #[strum(serialize = "NIN")]
    NotIn = 0x66,
    #[strum(serialize = "IN")]
    In = 0x67,
    #[strum(serialize = "NIS")]
    IsNot = 0x68,
    #[strum(serialize = "IS")]
    Is = 0x69,
    #[strum(serialize = "ORDER")]
    Order = 0x6C,

    /* Ternary operation. */
    #[strum(serialize = "COND")]
    Conditional = 0x6D,

    /* Load operations. */
    #[strum(serialize = "LD1")]
    Load1 = 0x81,
    #[strum(serialize = "LD2")]
    Load2 = 0x82,
    #[strum(serialize = "LD4")]
    Load4 = 0x83,
    #[strum(serialize = "LDA1")]
    LoadAddress1 = 0x85,
    #[strum(serialize = "LDA2")]
    LoadAddress2 = 0x86,
    #[strum(serialize = "LDA4")]
    LoadAddress4 = 0x87,

    /* Assignment and deletion operations. */
    #[strum(serialize = "SET")]
    Set = 0x88,
    #[strum(serialize = "SETP")]
    SetPop = 0x89,
    #[strum(serialize = "ERASE")]
    Erase = 0x8C,
    #[strum(serialize = "DEL1")]
    Delete1 = 0x8D,
    #[strum(serialize = "DEL2")]
    Delete2 = 0x8E,
    #[strum(serialize = "DEL4")]
    Delete4 = 0x8F,

    /* Global override operations. */
    #[strum(serialize = "GLOB1")]
    Global1 = 0x91,
    #[strum(serialize = "GLOB2")]
    Global2 = 0x92,
    #[strum(serialize = "GLOB4")]
    Global4 = 0x93,
    #[strum(serialize = "LOC1")]
    Local1 = 0x95,
    #[strum(serialize = "LOC2")]
    Local2 = 0x96,
    #[strum(serialize = "LOC4")]
    Local4 = 0x97,

    /* Iterator operations. */
    #[strum(serialize = "SITER")]
    StartIterator = 0xA0,
    #[strum(serialize = "TITER")]
    TestIterator = 0xA1,
    #[strum(serialize = "NITER")]
    NextIterator = 0xA2,
    #[strum(serialize = "DITER")]
    DerefIterator = 0xA3,

    /* Jump operations. */
    #[strum(serialize = "NOOP")]
    NoOp = 0xB0,
    #[strum(serialize = "JMPF")]
    JumpFalse = 0xB1,
    #[strum(serialize = "JMPT")]
    JumpTrue = 0xB2,
    #[strum(serialize = "JMP")]
    Jump = 0xB3,
    #[strum(serialize = "LOR")]
    LogicalOr = 0xB4,
    #[strum(serialize = "LAND")]
    LogicalAnd = 0xB5,

    /* Function call/return operations. */
    #[strum(serialize = "CALL")]
    Call = 0xB6,
    #[strum(serialize = "RET")]
    Return = 0xB7,

    /* Module operations. */
    #[strum(serialize = "ADDMOD1")]
    AddModule1 = 0xB9,
    #[strum(serialize = "ADDMOD2")]
    AddModule2 = 0xBA,
    #[strum(serialize = "ADDMOD4")]
    AddModule4 = 0xBB,
    #[strum(serialize = "XMOD")]
    ExitModule = 0xBC,
    #[strum(serialize = "LDMOD1")]
    LoadModule1 = 0xBD,
    #[strum(serialize = "LDMOD2")]
    LoadModule2 = 0xBE,
    #[strum(serialize = "LDMOD4")]
    LoadModule4 = 0xBF,

    /* Function argument operations. */
    #[strum(serialize = "MKARG")]
    MakeArgument = 0xC0,
    #[strum(serialize = "MKARGN1")]
    MakeNamedArgument1 = 0xC1,
    #[strum(serialize = "MKARGN2")]
    MakeNamedArgument2 = 0xC2,
    #[strum(serialize = "MKARGN4")]
    MakeNamedArgument4 = 0xC3,
    #[strum(serialize = "MKIGARG")]
    MakeIterableGroupArgument = 0xC4,
    #[strum(serialize = "MKDGARG")]
    MakeDictionaryGroupArgument = 0xC5,

    /* Function parameter operations. */
    #[strum(serialize = "MKPAR1")]
    MakeParameter1 = 0xD1,
    #[strum(serialize = "MKPAR2")]
    MakeParameter2 = 0xD2,
    #[strum(serialize = "MKPAR4")]
    MakeParameter4 = 0xD3,
    #[strum(serialize = "MKPARD1")]
    MakeDefaultParameter1 = 0xD5,
    #[strum(serialize = "MKPARD2")]
    MakeDefaultParameter2 = 0xD6,
    #[strum(serialize = "MKPARD4")]
    MakeDefaultParameter4 = 0xD7,
    #[strum(serialize = "MKTGPAR1")]
    MakeTupleGroupParameter1 = 0xD9,
    #[strum(serialize = "MKTGPAR2")]
    MakeTupleGroupParameter2 = 0xDA,
    #[strum(serialize = "MKTGPAR4")]
    MakeTupleGroupParameter4 = 0xDB,
    #[strum(serialize = "MKDGPAR1")]
    MakeDictionaryGroupParameter1 = 0xDD,
    #[strum(serialize = "MKDGPAR2")]
    MakeDictionaryGroupParameter2 = 0xDE,
    #[strum(serialize = "MKDGPAR4")]
    MakeDictionaryGroupParameter4 = 0xDF,

    /* Function definition operations. */
    #[strum(serialize = "MKFUN")]
    MakeFunction = 0xE0,

    /* Container entry operations. */
    #[strum(serialize = "MKDENT")]
    MakeDictionaryEntry = 0xE2,

    /* Range operations. */
    #[strum(serialize = "MKR0")]
    MakeRange = 0xE4,
    #[strum(serialize = "MKRS")]
    MakeRangeStart = 0xE5,
    #[strum(serialize = "MKRE")]
    MakeRangeEnd = 0xE6,
    #[strum(serialize = "MKRSE")]
    MakeRangeStartEnd = 0xE7,
    #[strum(serialize = "MKRT")]
    MakeRangeStep = 0xE8,
    #[strum(serialize = "MKRST")]
    MakeRangeStartStep = 0xE9,
    #[strum(serialize = "MKRET")]
    MakeRangeEndStep = 0xEA,
    #[strum(serialize = "MKR")]
    MakeRangeFull = 0xEB,

    /* Build operations. */
    #[strum(serialize = "BLD")]
    Build = 0xEE,

    /* Indexing operations. */
    #[strum(serialize = "IDX")]
    Index = 0xF0,
    #[strum(serialize = "IDXA")]
    IndexAddress = 0xF1,

    /* Member look-up operations. */
    #[strum(serialize = "MEM1")]
    Member1 = 0xF4,
    #[strum(serialize = "MEM2")]
    Member2 = 0xF5,
    #[strum(serialize = "MEM4")]
    Member4 = 0xF6,
    #[strum(serialize = "MEMA1")]
    MemberAddress1 = 0xF8,
    #[strum(serialize = "MEMA2")]
    MemberAddress2 = 0xF9,
    #[strum(serialize = "MEMA4")]
    MemberAddress4 = 0xFA,

    /* End operations. */
    #[strum(serialize = "ABORT")]
    Abort = 0xFE,
    #[strum(serialize = "END")]
    End = 0xFF,
}

impl OpCode {
    /// Decodes an opcode byte, or `None` for an unassigned value.
    #[inline]
    #[must_use]
    pub fn decode(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    /// Returns the assembler mnemonic.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_round_trips_known_bytes() {
        assert_eq!(OpCode::decode(0x00), Some(OpCode::PushNone));
        assert_eq!(OpCode::decode(0x5A), Some(OpCode::Multiply));
        assert_eq!(OpCode::decode(0xFF), Some(OpCode::End));
        assert_eq!(OpCode::decode(0xB6), Some(OpCode::Call));
    }

    #[test]
    fn unassigned_bytes_do_not_decode() {
        assert_eq!(OpCode::decode(0x09), None);
        assert_eq!(OpCode::decode(0x41), None);
        assert_eq!(OpCode::decode(0xFD), None);
    }

    #[test]
    fn mnemonics_match_wire_names() {
        assert_eq!(OpCode::PushInteger4.mnemonic(), "PUSHI4");
        assert_eq!(OpCode::MakeRangeFull.mnemonic(), "MKR");
        assert_eq!(OpCode::LogicalAnd.mnemonic(), "LAND");
    }
}
