//! CIL byte stream decoding.
//!
//! Decoding runs in two passes. The first walks the byte stream and records each
//! instruction with its raw operand and absolute branch targets. The second resolves
//! those targets to [`InstrId`] handles and resolves method and string tokens through a
//! [`TokenResolver`], producing an [`InstructionList`].

use std::collections::HashMap;

use crate::{
    assembly::{InstrId, Instruction, InstructionList, MethodRef, OpCode, Operand, OperandType, UserString},
    file::parser::Parser,
    metadata::token::Token,
    Result,
};

/// Resolves the tokens an instruction stream refers to.
pub trait TokenResolver {
    /// Returns the simple name of the method behind a MethodDef, MemberRef or MethodSpec
    /// token.
    ///
    /// # Errors
    /// Returns an error if the token does not reference an existing method.
    fn method_name(&self, token: Token) -> Result<String>;

    /// Returns the literal behind a `#US` token.
    ///
    /// # Errors
    /// Returns an error if the token does not reference an existing heap entry.
    fn user_string(&self, token: Token) -> Result<String>;
}

/// Operand of a decoded instruction before branch targets are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOperand {
    /// Final operand, needs no resolution
    Plain(Operand),
    /// Absolute byte offset of a branch target
    Target(i64),
    /// Absolute byte offsets of jump table targets
    Switch(Vec<i64>),
    /// Unresolved method token
    Method(Token),
    /// Unresolved `#US` token
    String(Token),
}

/// A decoded instruction with its position in the byte stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstruction {
    /// Byte offset within the method's code
    pub offset: u32,
    /// Encoded size in bytes
    pub size: u32,
    /// The opcode
    pub opcode: OpCode,
    /// The operand
    pub operand: RawOperand,
}

/// Result of decoding a method's code.
#[derive(Debug)]
pub struct DecodedStream {
    /// The decoded instructions
    pub instructions: InstructionList,
    offsets: HashMap<u32, InstrId>,
    code_size: u32,
}

impl DecodedStream {
    /// Map a byte offset to the instruction starting there. The offset one past the last
    /// instruction maps to `None`, which denotes the end of the method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `offset` is not an instruction boundary.
    pub fn instruction_at(&self, offset: u32) -> Result<Option<InstrId>> {
        if offset == self.code_size {
            return Ok(None);
        }

        match self.offsets.get(&offset) {
            Some(id) => Ok(Some(*id)),
            None => Err(malformed_error!(
                "Offset {:#x} is not an instruction boundary",
                offset
            )),
        }
    }
}

/// Decode a single instruction at the parser's position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for an undefined opcode, or
/// [`crate::Error::OutOfBounds`] if the operand is truncated.
pub fn decode_instruction(parser: &mut Parser) -> Result<RawInstruction> {
    let start = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let value = if first_byte == OpCode::PREFIX {
        let second_byte = parser.read_le::<u8>()?;
        u16::from_be_bytes([first_byte, second_byte])
    } else {
        u16::from(first_byte)
    };

    let Some(opcode) = OpCode::from_value(value) else {
        return Err(malformed_error!("Invalid opcode: {:X}", value));
    };

    let operand = match opcode.operand_type() {
        OperandType::None => RawOperand::Plain(Operand::None),
        OperandType::Int8 => RawOperand::Plain(Operand::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => RawOperand::Plain(Operand::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => RawOperand::Plain(Operand::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => RawOperand::Plain(Operand::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => RawOperand::Plain(Operand::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => RawOperand::Plain(Operand::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => RawOperand::Plain(Operand::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => RawOperand::Plain(Operand::Token(Token::new(
            parser.read_le::<u32>()?,
        ))),
        OperandType::Method => RawOperand::Method(Token::new(parser.read_le::<u32>()?)),
        OperandType::String => RawOperand::String(Token::new(parser.read_le::<u32>()?)),
        OperandType::ShortBranch => {
            let displacement = i64::from(parser.read_le::<i8>()?);
            RawOperand::Target(parser.pos() as i64 + displacement)
        }
        OperandType::Branch => {
            let displacement = i64::from(parser.read_le::<i32>()?);
            RawOperand::Target(parser.pos() as i64 + displacement)
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count > parser.remaining() / 4 {
                return Err(out_of_bounds_error!());
            }

            let mut displacements = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                displacements.push(i64::from(parser.read_le::<i32>()?));
            }

            // Displacements are relative to the end of the whole switch instruction
            let next = parser.pos() as i64;
            RawOperand::Switch(displacements.into_iter().map(|d| next + d).collect())
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    Ok(RawInstruction {
        offset: start as u32,
        size: (parser.pos() - start) as u32,
        opcode,
        operand,
    })
}

/// Decode a complete method code stream.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for undefined opcodes, branches that do not land
/// on an instruction boundary, or tokens the resolver rejects.
pub fn decode_stream(code: &[u8], resolver: &dyn TokenResolver) -> Result<DecodedStream> {
    let mut parser = Parser::new(code);
    let mut raw = Vec::new();
    while parser.has_more_data() {
        raw.push(decode_instruction(&mut parser)?);
    }

    let offsets: HashMap<u32, InstrId> = raw
        .iter()
        .enumerate()
        .map(|(index, instruction)| (instruction.offset, InstrId::nth(index)))
        .collect();

    let resolve_target = |target: i64| -> Result<InstrId> {
        u32::try_from(target)
            .ok()
            .and_then(|target| offsets.get(&target).copied())
            .ok_or_else(|| {
                malformed_error!("Branch target {:#x} is not an instruction boundary", target)
            })
    };

    let mut instructions = InstructionList::new();
    for instruction in raw {
        let operand = match instruction.operand {
            RawOperand::Plain(operand) => operand,
            RawOperand::Target(target) => Operand::Target(resolve_target(target)?),
            RawOperand::Switch(targets) => Operand::Switch(
                targets
                    .into_iter()
                    .map(resolve_target)
                    .collect::<Result<Vec<_>>>()?,
            ),
            RawOperand::Method(token) => Operand::Method(MethodRef {
                token,
                name: resolver.method_name(token)?,
            }),
            RawOperand::String(token) => Operand::String(UserString {
                token: Some(token),
                value: resolver.user_string(token)?,
            }),
        };

        instructions.push(Instruction::with_operand(instruction.opcode, operand));
    }

    #[allow(clippy::cast_possible_truncation)]
    Ok(DecodedStream {
        instructions,
        offsets,
        code_size: code.len() as u32,
    })
}
