//! The CIL opcode table (ECMA-335 Partition III).
//!
//! [`OpCode`] is a checked wrapper around the one- or two-byte opcode value. Every opcode
//! is available as an associated constant named after its mnemonic (`OpCode::LDC_I4`,
//! `OpCode::STELEM_REF`) and knows its mnemonic, operand encoding and control flow.

use std::fmt;

/// How an opcode's inline operand is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit index or immediate
    UInt8,
    /// Unsigned 16-bit index
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Signed 8-bit branch displacement
    ShortBranch,
    /// Signed 32-bit branch displacement
    Branch,
    /// Jump table: count followed by 32-bit displacements
    Switch,
    /// Metadata token of a method (MethodDef, MemberRef or MethodSpec)
    Method,
    /// `#US` heap token
    String,
    /// Any other metadata token
    Token,
}

impl OperandType {
    /// Encoded size, or `None` for the variable-size switch table.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 | OperandType::ShortBranch => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32
            | OperandType::Float32
            | OperandType::Branch
            | OperandType::Method
            | OperandType::String
            | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// Control flow behavior of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Calls a method and continues
    Call,
    /// Returns from the method
    Return,
    /// Jump table
    Switch,
    /// Raises an exception
    Throw,
    /// Ends a finally, fault or filter block
    EndFinally,
    /// Leaves a protected region
    Leave,
}

/// A CIL opcode. Two-byte opcodes carry their `0xFE` prefix in the high byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode(u16);

macro_rules! opcodes {
    ($( $name:ident = $value:literal, $mnemonic:literal, $operand:ident, $flow:ident; )*) => {
        #[allow(missing_docs)]
        impl OpCode {
            $( pub const $name: OpCode = OpCode($value); )*

            /// Every defined opcode, ordered by value.
            pub const ALL: &'static [OpCode] = &[$( OpCode($value), )*];

            /// Look up an opcode by value.
            #[must_use]
            pub fn from_value(value: u16) -> Option<OpCode> {
                match value {
                    $( $value => Some(OpCode($value)), )*
                    _ => None,
                }
            }

            /// The ILAsm mnemonic.
            #[must_use]
            pub fn mnemonic(self) -> &'static str {
                match self.0 {
                    $( $value => $mnemonic, )*
                    _ => "???",
                }
            }

            /// The inline operand encoding.
            #[must_use]
            pub fn operand_type(self) -> OperandType {
                match self.0 {
                    $( $value => OperandType::$operand, )*
                    _ => OperandType::None,
                }
            }

            /// The control flow behavior.
            #[must_use]
            pub fn flow(self) -> FlowType {
                match self.0 {
                    $( $value => FlowType::$flow, )*
                    _ => FlowType::Sequential,
                }
            }
        }
    };
}

opcodes! {
    NOP = 0x00, "nop", None, Sequential;
    BREAK = 0x01, "break", None, Sequential;
    LDARG_0 = 0x02, "ldarg.0", None, Sequential;
    LDARG_1 = 0x03, "ldarg.1", None, Sequential;
    LDARG_2 = 0x04, "ldarg.2", None, Sequential;
    LDARG_3 = 0x05, "ldarg.3", None, Sequential;
    LDLOC_0 = 0x06, "ldloc.0", None, Sequential;
    LDLOC_1 = 0x07, "ldloc.1", None, Sequential;
    LDLOC_2 = 0x08, "ldloc.2", None, Sequential;
    LDLOC_3 = 0x09, "ldloc.3", None, Sequential;
    STLOC_0 = 0x0A, "stloc.0", None, Sequential;
    STLOC_1 = 0x0B, "stloc.1", None, Sequential;
    STLOC_2 = 0x0C, "stloc.2", None, Sequential;
    STLOC_3 = 0x0D, "stloc.3", None, Sequential;
    LDARG_S = 0x0E, "ldarg.s", UInt8, Sequential;
    LDARGA_S = 0x0F, "ldarga.s", UInt8, Sequential;
    STARG_S = 0x10, "starg.s", UInt8, Sequential;
    LDLOC_S = 0x11, "ldloc.s", UInt8, Sequential;
    LDLOCA_S = 0x12, "ldloca.s", UInt8, Sequential;
    STLOC_S = 0x13, "stloc.s", UInt8, Sequential;
    LDNULL = 0x14, "ldnull", None, Sequential;
    LDC_I4_M1 = 0x15, "ldc.i4.m1", None, Sequential;
    LDC_I4_0 = 0x16, "ldc.i4.0", None, Sequential;
    LDC_I4_1 = 0x17, "ldc.i4.1", None, Sequential;
    LDC_I4_2 = 0x18, "ldc.i4.2", None, Sequential;
    LDC_I4_3 = 0x19, "ldc.i4.3", None, Sequential;
    LDC_I4_4 = 0x1A, "ldc.i4.4", None, Sequential;
    LDC_I4_5 = 0x1B, "ldc.i4.5", None, Sequential;
    LDC_I4_6 = 0x1C, "ldc.i4.6", None, Sequential;
    LDC_I4_7 = 0x1D, "ldc.i4.7", None, Sequential;
    LDC_I4_8 = 0x1E, "ldc.i4.8", None, Sequential;
    LDC_I4_S = 0x1F, "ldc.i4.s", Int8, Sequential;
    LDC_I4 = 0x20, "ldc.i4", Int32, Sequential;
    LDC_I8 = 0x21, "ldc.i8", Int64, Sequential;
    LDC_R4 = 0x22, "ldc.r4", Float32, Sequential;
    LDC_R8 = 0x23, "ldc.r8", Float64, Sequential;
    DUP = 0x25, "dup", None, Sequential;
    POP = 0x26, "pop", None, Sequential;
    JMP = 0x27, "jmp", Method, Call;
    CALL = 0x28, "call", Method, Call;
    CALLI = 0x29, "calli", Token, Call;
    RET = 0x2A, "ret", None, Return;
    BR_S = 0x2B, "br.s", ShortBranch, UnconditionalBranch;
    BRFALSE_S = 0x2C, "brfalse.s", ShortBranch, ConditionalBranch;
    BRTRUE_S = 0x2D, "brtrue.s", ShortBranch, ConditionalBranch;
    BEQ_S = 0x2E, "beq.s", ShortBranch, ConditionalBranch;
    BGE_S = 0x2F, "bge.s", ShortBranch, ConditionalBranch;
    BGT_S = 0x30, "bgt.s", ShortBranch, ConditionalBranch;
    BLE_S = 0x31, "ble.s", ShortBranch, ConditionalBranch;
    BLT_S = 0x32, "blt.s", ShortBranch, ConditionalBranch;
    BNE_UN_S = 0x33, "bne.un.s", ShortBranch, ConditionalBranch;
    BGE_UN_S = 0x34, "bge.un.s", ShortBranch, ConditionalBranch;
    BGT_UN_S = 0x35, "bgt.un.s", ShortBranch, ConditionalBranch;
    BLE_UN_S = 0x36, "ble.un.s", ShortBranch, ConditionalBranch;
    BLT_UN_S = 0x37, "blt.un.s", ShortBranch, ConditionalBranch;
    BR = 0x38, "br", Branch, UnconditionalBranch;
    BRFALSE = 0x39, "brfalse", Branch, ConditionalBranch;
    BRTRUE = 0x3A, "brtrue", Branch, ConditionalBranch;
    BEQ = 0x3B, "beq", Branch, ConditionalBranch;
    BGE = 0x3C, "bge", Branch, ConditionalBranch;
    BGT = 0x3D, "bgt", Branch, ConditionalBranch;
    BLE = 0x3E, "ble", Branch, ConditionalBranch;
    BLT = 0x3F, "blt", Branch, ConditionalBranch;
    BNE_UN = 0x40, "bne.un", Branch, ConditionalBranch;
    BGE_UN = 0x41, "bge.un", Branch, ConditionalBranch;
    BGT_UN = 0x42, "bgt.un", Branch, ConditionalBranch;
    BLE_UN = 0x43, "ble.un", Branch, ConditionalBranch;
    BLT_UN = 0x44, "blt.un", Branch, ConditionalBranch;
    SWITCH = 0x45, "switch", Switch, Switch;
    LDIND_I1 = 0x46, "ldind.i1", None, Sequential;
    LDIND_U1 = 0x47, "ldind.u1", None, Sequential;
    LDIND_I2 = 0x48, "ldind.i2", None, Sequential;
    LDIND_U2 = 0x49, "ldind.u2", None, Sequential;
    LDIND_I4 = 0x4A, "ldind.i4", None, Sequential;
    LDIND_U4 = 0x4B, "ldind.u4", None, Sequential;
    LDIND_I8 = 0x4C, "ldind.i8", None, Sequential;
    LDIND_I = 0x4D, "ldind.i", None, Sequential;
    LDIND_R4 = 0x4E, "ldind.r4", None, Sequential;
    LDIND_R8 = 0x4F, "ldind.r8", None, Sequential;
    LDIND_REF = 0x50, "ldind.ref", None, Sequential;
    STIND_REF = 0x51, "stind.ref", None, Sequential;
    STIND_I1 = 0x52, "stind.i1", None, Sequential;
    STIND_I2 = 0x53, "stind.i2", None, Sequential;
    STIND_I4 = 0x54, "stind.i4", None, Sequential;
    STIND_I8 = 0x55, "stind.i8", None, Sequential;
    STIND_R4 = 0x56, "stind.r4", None, Sequential;
    STIND_R8 = 0x57, "stind.r8", None, Sequential;
    ADD = 0x58, "add", None, Sequential;
    SUB = 0x59, "sub", None, Sequential;
    MUL = 0x5A, "mul", None, Sequential;
    DIV = 0x5B, "div", None, Sequential;
    DIV_UN = 0x5C, "div.un", None, Sequential;
    REM = 0x5D, "rem", None, Sequential;
    REM_UN = 0x5E, "rem.un", None, Sequential;
    AND = 0x5F, "and", None, Sequential;
    OR = 0x60, "or", None, Sequential;
    XOR = 0x61, "xor", None, Sequential;
    SHL = 0x62, "shl", None, Sequential;
    SHR = 0x63, "shr", None, Sequential;
    SHR_UN = 0x64, "shr.un", None, Sequential;
    NEG = 0x65, "neg", None, Sequential;
    NOT = 0x66, "not", None, Sequential;
    CONV_I1 = 0x67, "conv.i1", None, Sequential;
    CONV_I2 = 0x68, "conv.i2", None, Sequential;
    CONV_I4 = 0x69, "conv.i4", None, Sequential;
    CONV_I8 = 0x6A, "conv.i8", None, Sequential;
    CONV_R4 = 0x6B, "conv.r4", None, Sequential;
    CONV_R8 = 0x6C, "conv.r8", None, Sequential;
    CONV_U4 = 0x6D, "conv.u4", None, Sequential;
    CONV_U8 = 0x6E, "conv.u8", None, Sequential;
    CALLVIRT = 0x6F, "callvirt", Method, Call;
    CPOBJ = 0x70, "cpobj", Token, Sequential;
    LDOBJ = 0x71, "ldobj", Token, Sequential;
    LDSTR = 0x72, "ldstr", String, Sequential;
    NEWOBJ = 0x73, "newobj", Method, Call;
    CASTCLASS = 0x74, "castclass", Token, Sequential;
    ISINST = 0x75, "isinst", Token, Sequential;
    CONV_R_UN = 0x76, "conv.r.un", None, Sequential;
    UNBOX = 0x79, "unbox", Token, Sequential;
    THROW = 0x7A, "throw", None, Throw;
    LDFLD = 0x7B, "ldfld", Token, Sequential;
    LDFLDA = 0x7C, "ldflda", Token, Sequential;
    STFLD = 0x7D, "stfld", Token, Sequential;
    LDSFLD = 0x7E, "ldsfld", Token, Sequential;
    LDSFLDA = 0x7F, "ldsflda", Token, Sequential;
    STSFLD = 0x80, "stsfld", Token, Sequential;
    STOBJ = 0x81, "stobj", Token, Sequential;
    CONV_OVF_I1_UN = 0x82, "conv.ovf.i1.un", None, Sequential;
    CONV_OVF_I2_UN = 0x83, "conv.ovf.i2.un", None, Sequential;
    CONV_OVF_I4_UN = 0x84, "conv.ovf.i4.un", None, Sequential;
    CONV_OVF_I8_UN = 0x85, "conv.ovf.i8.un", None, Sequential;
    CONV_OVF_U1_UN = 0x86, "conv.ovf.u1.un", None, Sequential;
    CONV_OVF_U2_UN = 0x87, "conv.ovf.u2.un", None, Sequential;
    CONV_OVF_U4_UN = 0x88, "conv.ovf.u4.un", None, Sequential;
    CONV_OVF_U8_UN = 0x89, "conv.ovf.u8.un", None, Sequential;
    CONV_OVF_I_UN = 0x8A, "conv.ovf.i.un", None, Sequential;
    CONV_OVF_U_UN = 0x8B, "conv.ovf.u.un", None, Sequential;
    BOX = 0x8C, "box", Token, Sequential;
    NEWARR = 0x8D, "newarr", Token, Sequential;
    LDLEN = 0x8E, "ldlen", None, Sequential;
    LDELEMA = 0x8F, "ldelema", Token, Sequential;
    LDELEM_I1 = 0x90, "ldelem.i1", None, Sequential;
    LDELEM_U1 = 0x91, "ldelem.u1", None, Sequential;
    LDELEM_I2 = 0x92, "ldelem.i2", None, Sequential;
    LDELEM_U2 = 0x93, "ldelem.u2", None, Sequential;
    LDELEM_I4 = 0x94, "ldelem.i4", None, Sequential;
    LDELEM_U4 = 0x95, "ldelem.u4", None, Sequential;
    LDELEM_I8 = 0x96, "ldelem.i8", None, Sequential;
    LDELEM_I = 0x97, "ldelem.i", None, Sequential;
    LDELEM_R4 = 0x98, "ldelem.r4", None, Sequential;
    LDELEM_R8 = 0x99, "ldelem.r8", None, Sequential;
    LDELEM_REF = 0x9A, "ldelem.ref", None, Sequential;
    STELEM_I = 0x9B, "stelem.i", None, Sequential;
    STELEM_I1 = 0x9C, "stelem.i1", None, Sequential;
    STELEM_I2 = 0x9D, "stelem.i2", None, Sequential;
    STELEM_I4 = 0x9E, "stelem.i4", None, Sequential;
    STELEM_I8 = 0x9F, "stelem.i8", None, Sequential;
    STELEM_R4 = 0xA0, "stelem.r4", None, Sequential;
    STELEM_R8 = 0xA1, "stelem.r8", None, Sequential;
    STELEM_REF = 0xA2, "stelem.ref", None, Sequential;
    LDELEM = 0xA3, "ldelem", Token, Sequential;
    STELEM = 0xA4, "stelem", Token, Sequential;
    UNBOX_ANY = 0xA5, "unbox.any", Token, Sequential;
    CONV_OVF_I1 = 0xB3, "conv.ovf.i1", None, Sequential;
    CONV_OVF_U1 = 0xB4, "conv.ovf.u1", None, Sequential;
    CONV_OVF_I2 = 0xB5, "conv.ovf.i2", None, Sequential;
    CONV_OVF_U2 = 0xB6, "conv.ovf.u2", None, Sequential;
    CONV_OVF_I4 = 0xB7, "conv.ovf.i4", None, Sequential;
    CONV_OVF_U4 = 0xB8, "conv.ovf.u4", None, Sequential;
    CONV_OVF_I8 = 0xB9, "conv.ovf.i8", None, Sequential;
    CONV_OVF_U8 = 0xBA, "conv.ovf.u8", None, Sequential;
    REFANYVAL = 0xC2, "refanyval", Token, Sequential;
    CKFINITE = 0xC3, "ckfinite", None, Sequential;
    MKREFANY = 0xC6, "mkrefany", Token, Sequential;
    LDTOKEN = 0xD0, "ldtoken", Token, Sequential;
    CONV_U2 = 0xD1, "conv.u2", None, Sequential;
    CONV_U1 = 0xD2, "conv.u1", None, Sequential;
    CONV_I = 0xD3, "conv.i", None, Sequential;
    CONV_OVF_I = 0xD4, "conv.ovf.i", None, Sequential;
    CONV_OVF_U = 0xD5, "conv.ovf.u", None, Sequential;
    ADD_OVF = 0xD6, "add.ovf", None, Sequential;
    ADD_OVF_UN = 0xD7, "add.ovf.un", None, Sequential;
    MUL_OVF = 0xD8, "mul.ovf", None, Sequential;
    MUL_OVF_UN = 0xD9, "mul.ovf.un", None, Sequential;
    SUB_OVF = 0xDA, "sub.ovf", None, Sequential;
    SUB_OVF_UN = 0xDB, "sub.ovf.un", None, Sequential;
    ENDFINALLY = 0xDC, "endfinally", None, EndFinally;
    LEAVE = 0xDD, "leave", Branch, Leave;
    LEAVE_S = 0xDE, "leave.s", ShortBranch, Leave;
    STIND_I = 0xDF, "stind.i", None, Sequential;
    CONV_U = 0xE0, "conv.u", None, Sequential;
    ARGLIST = 0xFE00, "arglist", None, Sequential;
    CEQ = 0xFE01, "ceq", None, Sequential;
    CGT = 0xFE02, "cgt", None, Sequential;
    CGT_UN = 0xFE03, "cgt.un", None, Sequential;
    CLT = 0xFE04, "clt", None, Sequential;
    CLT_UN = 0xFE05, "clt.un", None, Sequential;
    LDFTN = 0xFE06, "ldftn", Method, Sequential;
    LDVIRTFTN = 0xFE07, "ldvirtftn", Method, Sequential;
    LDARG = 0xFE09, "ldarg", UInt16, Sequential;
    LDARGA = 0xFE0A, "ldarga", UInt16, Sequential;
    STARG = 0xFE0B, "starg", UInt16, Sequential;
    LDLOC = 0xFE0C, "ldloc", UInt16, Sequential;
    LDLOCA = 0xFE0D, "ldloca", UInt16, Sequential;
    STLOC = 0xFE0E, "stloc", UInt16, Sequential;
    LOCALLOC = 0xFE0F, "localloc", None, Sequential;
    ENDFILTER = 0xFE11, "endfilter", None, EndFinally;
    UNALIGNED = 0xFE12, "unaligned.", UInt8, Sequential;
    VOLATILE = 0xFE13, "volatile.", None, Sequential;
    TAIL = 0xFE14, "tail.", None, Sequential;
    INITOBJ = 0xFE15, "initobj", Token, Sequential;
    CONSTRAINED = 0xFE16, "constrained.", Token, Sequential;
    CPBLK = 0xFE17, "cpblk", None, Sequential;
    INITBLK = 0xFE18, "initblk", None, Sequential;
    NO = 0xFE19, "no.", UInt8, Sequential;
    RETHROW = 0xFE1A, "rethrow", None, Throw;
    SIZEOF = 0xFE1C, "sizeof", Token, Sequential;
    REFANYTYPE = 0xFE1D, "refanytype", None, Sequential;
    READONLY = 0xFE1E, "readonly.", None, Sequential;
}

impl OpCode {
    /// Prefix byte of two-byte opcodes.
    pub const PREFIX: u8 = 0xFE;

    /// The raw opcode value.
    #[must_use]
    pub fn value(self) -> u16 {
        self.0
    }

    /// Encoded size of the opcode itself.
    #[must_use]
    pub fn size(self) -> usize {
        if self.0 > 0xFF {
            2
        } else {
            1
        }
    }

    /// The 32-bit displacement form of a short branch.
    #[must_use]
    pub fn long_form(self) -> Option<OpCode> {
        match self.operand_type() {
            // br.s..blt.un.s map onto br..blt.un by a constant distance
            OperandType::ShortBranch if self == OpCode::LEAVE_S => Some(OpCode::LEAVE),
            OperandType::ShortBranch => Some(OpCode(self.0 + (OpCode::BR.0 - OpCode::BR_S.0))),
            _ => None,
        }
    }

    /// Append the encoded opcode to `out`.
    pub fn write(self, out: &mut Vec<u8>) {
        if self.0 > 0xFF {
            out.push(Self::PREFIX);
        }
        #[allow(clippy::cast_possible_truncation)]
        out.push(self.0 as u8);
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpCode({}, 0x{:02X})", self.mnemonic(), self.0)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        assert_eq!(OpCode::from_value(0x28), Some(OpCode::CALL));
        assert_eq!(OpCode::from_value(0xFE01), Some(OpCode::CEQ));
        assert_eq!(OpCode::from_value(0x24), None);
        assert_eq!(OpCode::from_value(0xFE08), None);

        assert_eq!(OpCode::STELEM_REF.mnemonic(), "stelem.ref");
        assert_eq!(OpCode::LDC_I4.operand_type(), OperandType::Int32);
        assert_eq!(OpCode::LDSTR.operand_type(), OperandType::String);
        assert_eq!(OpCode::CALL.flow(), FlowType::Call);
        assert_eq!(OpCode::CEQ.size(), 2);
    }

    #[test]
    fn table_is_consistent() {
        assert_eq!(OpCode::ALL.len(), 219);

        for window in OpCode::ALL.windows(2) {
            assert!(window[0].value() < window[1].value());
        }

        for opcode in OpCode::ALL {
            assert_eq!(OpCode::from_value(opcode.value()), Some(*opcode));
            assert_ne!(opcode.mnemonic(), "???");
        }
    }

    #[test]
    fn branch_forms() {
        assert_eq!(OpCode::BR_S.long_form(), Some(OpCode::BR));
        assert_eq!(OpCode::BRFALSE_S.long_form(), Some(OpCode::BRFALSE));
        assert_eq!(OpCode::BLT_UN_S.long_form(), Some(OpCode::BLT_UN));
        assert_eq!(OpCode::LEAVE_S.long_form(), Some(OpCode::LEAVE));
        assert_eq!(OpCode::BR.long_form(), None);
        assert_eq!(OpCode::LDC_I4_S.long_form(), None);

        for opcode in OpCode::ALL {
            if let Some(long) = opcode.long_form() {
                assert_eq!(long.operand_type(), OperandType::Branch);
                assert_eq!(long.flow(), opcode.flow());
            }
        }
    }

    #[test]
    fn encoding() {
        let mut out = Vec::new();
        OpCode::CALL.write(&mut out);
        OpCode::CEQ.write(&mut out);
        assert_eq!(out, [0x28, 0xFE, 0x01]);
    }
}
