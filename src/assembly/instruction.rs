//! Decoded CIL instructions.
//!
//! An [`Instruction`] pairs an [`OpCode`] with a typed [`Operand`]. Branch targets are
//! [`InstrId`] handles rather than byte offsets, so instructions can be inserted without
//! fixing up displacements by hand; the encoder computes them on write. Method operands
//! carry the resolved member name that the locator matches on.

use std::fmt;

use crate::{
    assembly::{InstrId, OpCode},
    metadata::token::Token,
};

/// A method referenced by `call`, `callvirt`, `newobj` and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    /// MethodDef, MemberRef or MethodSpec token
    pub token: Token,
    /// Simple name of the referenced method
    pub name: String,
}

/// A string literal loaded by `ldstr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserString {
    /// Existing `#US` token, `None` for literals not yet written to the heap
    pub token: Option<Token>,
    /// The literal text
    pub value: String,
}

/// The inline operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`)
    Int8(i8),
    /// Unsigned 8-bit argument or local index
    UInt8(u8),
    /// Unsigned 16-bit argument or local index
    UInt16(u16),
    /// Signed 32-bit immediate (`ldc.i4`)
    Int32(i32),
    /// Signed 64-bit immediate (`ldc.i8`)
    Int64(i64),
    /// 32-bit float (`ldc.r4`)
    Float32(f32),
    /// 64-bit float (`ldc.r8`)
    Float64(f64),
    /// Branch target
    Target(InstrId),
    /// Jump table targets
    Switch(Vec<InstrId>),
    /// Called or referenced method
    Method(MethodRef),
    /// String literal
    String(UserString),
    /// Type, field, signature or other token
    Token(Token),
}

/// A single CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The inline operand
    pub operand: Operand,
}

impl Instruction {
    /// An instruction without operand.
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// An instruction with `operand`.
    #[must_use]
    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// `dup`
    #[must_use]
    pub fn dup() -> Self {
        Instruction::new(OpCode::DUP)
    }

    /// `ldc.i4 value`, always in the 32-bit form.
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Instruction::with_operand(OpCode::LDC_I4, Operand::Int32(value))
    }

    /// `ldstr value` for a literal that is interned into `#US` on write.
    #[must_use]
    pub fn ldstr(value: &str) -> Self {
        Instruction::with_operand(
            OpCode::LDSTR,
            Operand::String(UserString {
                token: None,
                value: value.to_string(),
            }),
        )
    }

    /// `stelem.ref`
    #[must_use]
    pub fn stelem_ref() -> Self {
        Instruction::new(OpCode::STELEM_REF)
    }

    /// Returns the referenced method if this instruction has a method operand.
    #[must_use]
    pub fn method(&self) -> Option<&MethodRef> {
        match &self.operand {
            Operand::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Returns `true` for a `call` (not `callvirt`) whose target is named `name`.
    #[must_use]
    pub fn is_call_to(&self, name: &str) -> bool {
        self.opcode == OpCode::CALL && self.method().is_some_and(|method| method.name == name)
    }

    /// Returns the constant pushed by any `ldc.i4` variant.
    #[must_use]
    pub fn ldc_i4_value(&self) -> Option<i32> {
        match (self.opcode, &self.operand) {
            (OpCode::LDC_I4, Operand::Int32(value)) => Some(*value),
            (OpCode::LDC_I4_S, Operand::Int8(value)) => Some(i32::from(*value)),
            (OpCode::LDC_I4_M1, _) => Some(-1),
            (opcode, _) if (OpCode::LDC_I4_0.value()..=OpCode::LDC_I4_8.value())
                .contains(&opcode.value()) =>
            {
                i32::try_from(opcode.value() - OpCode::LDC_I4_0.value()).ok()
            }
            _ => None,
        }
    }

    /// Returns the branch targets of this instruction.
    #[must_use]
    pub fn targets(&self) -> Vec<InstrId> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;

        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int8(value) => write!(f, " {value}"),
            Operand::UInt8(value) => write!(f, " {value}"),
            Operand::UInt16(value) => write!(f, " {value}"),
            Operand::Int32(value) => write!(f, " {value}"),
            Operand::Int64(value) => write!(f, " {value}"),
            Operand::Float32(value) => write!(f, " {value}"),
            Operand::Float64(value) => write!(f, " {value}"),
            Operand::Target(target) => write!(f, " {target:?}"),
            Operand::Switch(targets) => write!(f, " ({} targets)", targets.len()),
            Operand::Method(method) => write!(f, " {} [{}]", method.name, method.token),
            Operand::String(string) => write!(f, " {:?}", string.value),
            Operand::Token(token) => write!(f, " {token}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> Instruction {
        Instruction::with_operand(
            OpCode::CALL,
            Operand::Method(MethodRef {
                token: Token(0x0A00_0001),
                name: name.to_string(),
            }),
        )
    }

    #[test]
    fn call_matching() {
        assert!(call("SetAdditionalAssemblies").is_call_to("SetAdditionalAssemblies"));
        assert!(!call("SetAdditionalAssemblies").is_call_to("setAdditionalAssemblies"));

        let mut callvirt = call("SetAdditionalAssemblies");
        callvirt.opcode = OpCode::CALLVIRT;
        assert!(!callvirt.is_call_to("SetAdditionalAssemblies"));

        assert!(!Instruction::ldstr("SetAdditionalAssemblies").is_call_to("SetAdditionalAssemblies"));
    }

    #[test]
    fn constants() {
        assert_eq!(Instruction::ldc_i4(3).ldc_i4_value(), Some(3));
        assert_eq!(Instruction::new(OpCode::LDC_I4_1).ldc_i4_value(), Some(1));
        assert_eq!(Instruction::new(OpCode::LDC_I4_8).ldc_i4_value(), Some(8));
        assert_eq!(Instruction::new(OpCode::LDC_I4_M1).ldc_i4_value(), Some(-1));
        assert_eq!(
            Instruction::with_operand(OpCode::LDC_I4_S, Operand::Int8(-5)).ldc_i4_value(),
            Some(-5)
        );
        assert_eq!(Instruction::new(OpCode::LDNULL).ldc_i4_value(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Instruction::ldc_i4(3).to_string(), "ldc.i4 3");
        assert_eq!(Instruction::dup().to_string(), "dup");
        assert_eq!(
            Instruction::ldstr("Assembly-CSharp.dll").to_string(),
            "ldstr \"Assembly-CSharp.dll\""
        );
        assert_eq!(
            call("add_eventLogMessage").to_string(),
            "call add_eventLogMessage [0x0a000001]"
        );
    }
}
