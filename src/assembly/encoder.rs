//! CIL byte stream encoding.
//!
//! Encoding lays the instruction list out, resolves [`InstrId`] branch targets to byte
//! displacements and emits the stream. Short branches whose displacement no longer fits
//! in a signed byte after an insertion are widened to their 32-bit form; layout repeats
//! until no further widening is needed. Branches are never shortened.

use std::collections::{HashMap, HashSet};

use crate::{
    assembly::{InstrId, Instruction, InstructionList, OpCode, Operand, OperandType},
    file::io::push_le,
    metadata::token::Token,
    Result,
};

/// Result of encoding an instruction list.
#[derive(Debug)]
pub struct EncodedStream {
    /// The emitted code bytes
    pub code: Vec<u8>,
    /// Number of short branches promoted to long form
    pub widened: usize,
    offsets: HashMap<InstrId, u32>,
}

impl EncodedStream {
    /// Returns the byte offset of `id`, or the code size for `None` (end of method).
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `id` was not part of the encoded list.
    pub fn offset_of(&self, id: Option<InstrId>) -> Result<u32> {
        match id {
            #[allow(clippy::cast_possible_truncation)]
            None => Ok(self.code.len() as u32),
            Some(id) => self
                .offsets
                .get(&id)
                .copied()
                .ok_or_else(|| crate::Error::Error(format!("{id:?} is not part of the method"))),
        }
    }
}

fn operand_size(opcode: OpCode, operand: &Operand) -> usize {
    match (opcode.operand_type(), operand) {
        (OperandType::Switch, Operand::Switch(targets)) => 4 + 4 * targets.len(),
        (operand_type, _) => operand_type.size().unwrap_or(0),
    }
}

fn effective_opcode(id: InstrId, instruction: &Instruction, widened: &HashSet<InstrId>) -> OpCode {
    if widened.contains(&id) {
        instruction.opcode.long_form().unwrap_or(instruction.opcode)
    } else {
        instruction.opcode
    }
}

/// Compute the offset of every instruction plus the total code size.
fn layout(
    list: &InstructionList,
    widened: &HashSet<InstrId>,
) -> Result<(HashMap<InstrId, u32>, Vec<u32>, u32)> {
    let mut offsets = HashMap::with_capacity(list.len());
    let mut ends = Vec::with_capacity(list.len());
    let mut position = 0_u32;

    for (id, instruction) in list.iter() {
        offsets.insert(id, position);

        let opcode = effective_opcode(id, instruction, widened);
        let size = opcode.size() + operand_size(opcode, &instruction.operand);
        position = u32::try_from(size)
            .ok()
            .and_then(|size| position.checked_add(size))
            .ok_or_else(|| malformed_error!("Method code exceeds 4GiB"))?;
        ends.push(position);
    }

    Ok((offsets, ends, position))
}

fn displacement(offsets: &HashMap<InstrId, u32>, target: InstrId, next: u32) -> Result<i64> {
    let Some(target_offset) = offsets.get(&target) else {
        return Err(malformed_error!("Branch target {:?} is not part of the method", target));
    };

    Ok(i64::from(*target_offset) - i64::from(next))
}

/// Encode `list` into a code byte stream.
///
/// String literals created without a `#US` token are passed to `intern`, which returns
/// the token to emit.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a branch target is not in the list, an operand
/// does not match its opcode, or a long displacement overflows; any error from `intern`
/// is propagated.
pub fn encode_stream(
    list: &InstructionList,
    intern: &mut dyn FnMut(&str) -> Result<Token>,
) -> Result<EncodedStream> {
    let mut widened = HashSet::new();

    let (offsets, ends) = loop {
        let (offsets, ends, _) = layout(list, &widened)?;

        let mut changed = false;
        for ((id, instruction), next) in list.iter().zip(&ends) {
            if widened.contains(&id) || instruction.opcode.operand_type() != OperandType::ShortBranch {
                continue;
            }

            let Operand::Target(target) = instruction.operand else {
                continue;
            };

            if i8::try_from(displacement(&offsets, target, *next)?).is_err() {
                widened.insert(id);
                changed = true;
            }
        }

        if !changed {
            break (offsets, ends);
        }
    };

    let mut code = Vec::with_capacity(ends.last().copied().unwrap_or(0) as usize);
    for ((id, instruction), next) in list.iter().zip(&ends) {
        let opcode = effective_opcode(id, instruction, &widened);
        opcode.write(&mut code);

        match (opcode.operand_type(), &instruction.operand) {
            (OperandType::None, Operand::None) => {}
            (OperandType::Int8, Operand::Int8(value)) => push_le(&mut code, *value),
            (OperandType::UInt8, Operand::UInt8(value)) => push_le(&mut code, *value),
            (OperandType::UInt16, Operand::UInt16(value)) => push_le(&mut code, *value),
            (OperandType::Int32, Operand::Int32(value)) => push_le(&mut code, *value),
            (OperandType::Int64, Operand::Int64(value)) => push_le(&mut code, *value),
            (OperandType::Float32, Operand::Float32(value)) => push_le(&mut code, *value),
            (OperandType::Float64, Operand::Float64(value)) => push_le(&mut code, *value),
            (OperandType::Token, Operand::Token(token)) => push_le(&mut code, token.value()),
            (OperandType::Method, Operand::Method(method)) => {
                push_le(&mut code, method.token.value());
            }
            (OperandType::String, Operand::String(string)) => {
                let token = match string.token {
                    Some(token) => token,
                    None => intern(&string.value)?,
                };
                push_le(&mut code, token.value());
            }
            (OperandType::ShortBranch, Operand::Target(target)) => {
                let displacement = i8::try_from(displacement(&offsets, *target, *next)?)
                    .map_err(|_| malformed_error!("Short branch out of range at {:?}", id))?;
                push_le(&mut code, displacement);
            }
            (OperandType::Branch, Operand::Target(target)) => {
                let displacement = i32::try_from(displacement(&offsets, *target, *next)?)
                    .map_err(|_| malformed_error!("Branch out of range at {:?}", id))?;
                push_le(&mut code, displacement);
            }
            (OperandType::Switch, Operand::Switch(targets)) => {
                let count = u32::try_from(targets.len())
                    .map_err(|_| malformed_error!("Too many switch targets at {:?}", id))?;
                push_le(&mut code, count);
                for target in targets {
                    let displacement = i32::try_from(displacement(&offsets, *target, *next)?)
                        .map_err(|_| malformed_error!("Switch target out of range at {:?}", id))?;
                    push_le(&mut code, displacement);
                }
            }
            (_, operand) => {
                return Err(malformed_error!(
                    "Operand {:?} does not fit opcode {}",
                    operand,
                    opcode
                ))
            }
        }
    }

    Ok(EncodedStream {
        code,
        widened: widened.len(),
        offsets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{decode_stream, MethodRef},
        test::MapResolver,
    };

    fn no_intern(value: &str) -> Result<Token> {
        Err(crate::Error::Error(format!("unexpected intern of {value}")))
    }

    #[test]
    fn reencode_unchanged() {
        let mut resolver = MapResolver::default();
        resolver.add_method(Token(0x0A00_0001), "Log");
        resolver.add_string(Token(0x7000_0001), "x");

        #[rustfmt::skip]
        let code = [
            0x02,                         // ldarg.0
            0x2C, 0x0B,                   // brfalse.s -> ret
            0x72, 0x01, 0x00, 0x00, 0x70, // ldstr
            0x28, 0x01, 0x00, 0x00, 0x0A, // call
            0x00,                         // nop
            0x2A,                         // ret
        ];

        let stream = decode_stream(&code, &resolver).unwrap();
        let encoded = encode_stream(&stream.instructions, &mut no_intern).unwrap();

        assert_eq!(encoded.code, code);
        assert_eq!(encoded.widened, 0);
        assert_eq!(encoded.offset_of(stream.instructions.id_at(3)).unwrap(), 8);
        assert_eq!(encoded.offset_of(None).unwrap(), 15);
    }

    #[test]
    fn widens_short_branch() {
        let mut list = InstructionList::new();
        let branch = list.push(Instruction::new(OpCode::BR_S));
        let ret = list.push(Instruction::new(OpCode::RET));
        list.replace(branch, Instruction::with_operand(OpCode::BR_S, Operand::Target(ret)))
            .unwrap();

        // 26 * 5 bytes pushes the target beyond a signed byte
        let padding: Vec<Instruction> = (0..26).map(Instruction::ldc_i4).collect();
        list.insert_before(ret, padding).unwrap();

        let encoded = encode_stream(&list, &mut no_intern).unwrap();
        assert_eq!(encoded.widened, 1);
        assert_eq!(encoded.code[0], OpCode::BR.value() as u8);
        assert_eq!(&encoded.code[1..5], &130_i32.to_le_bytes());
        assert_eq!(encoded.code.len(), 5 + 130 + 1);

        // Backward branches keep their handle after widening
        assert_eq!(encoded.offset_of(Some(ret)).unwrap(), 135);
    }

    #[test]
    fn interns_new_literals() {
        let mut list = InstructionList::new();
        list.push(Instruction::ldstr("ColossalManaged.dll"));
        list.push(Instruction::new(OpCode::RET));

        let mut interned = Vec::new();
        let encoded = encode_stream(&list, &mut |value: &str| {
            interned.push(value.to_string());
            Ok(Token(0x7000_0040))
        })
        .unwrap();

        assert_eq!(interned, ["ColossalManaged.dll"]);
        assert_eq!(encoded.code, [0x72, 0x40, 0x00, 0x00, 0x70, 0x2A]);
    }

    #[test]
    fn rejects_mismatch() {
        let mut list = InstructionList::new();
        list.push(Instruction::with_operand(
            OpCode::LDC_I4,
            Operand::Method(MethodRef {
                token: Token(0x0A00_0001),
                name: "Log".to_string(),
            }),
        ));

        assert!(encode_stream(&list, &mut no_intern).is_err());
    }

    #[test]
    fn rejects_foreign_target() {
        let mut other = InstructionList::new();
        other.push(Instruction::new(OpCode::NOP));
        let foreign = other.push(Instruction::new(OpCode::RET));

        let mut list = InstructionList::new();
        list.push(Instruction::with_operand(OpCode::BR, Operand::Target(foreign)));

        assert!(encode_stream(&list, &mut no_intern).is_err());
    }
}
