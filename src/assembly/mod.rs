//! CIL instructions: the opcode table, an editable instruction list, and the decoder and
//! encoder that move between it and raw bytes.
//!
//! # Key Components
//!
//! - [`OpCode`] - All ECMA-335 opcodes with operand and flow metadata
//! - [`Instruction`] / [`Operand`] - One instruction with its resolved operand
//! - [`InstructionList`] / [`InstrId`] - Ordered storage with stable handles
//! - [`decode_stream`] - Bytes to instructions, branch offsets to handles
//! - [`encode_stream`] - Instructions to bytes, with short branch widening
//!
//! # Examples
//!
//! ```rust,ignore
//! use cilpatch::assembly::{encode_stream, Instruction, InstructionList, OpCode};
//!
//! let mut list = InstructionList::new();
//! let ret = list.push(Instruction::new(OpCode::RET));
//! list.insert_before(ret, vec![Instruction::ldc_i4(3)])?;
//!
//! let encoded = encode_stream(&list, &mut |_| unreachable!())?;
//! assert_eq!(encoded.code, [0x20, 0x03, 0x00, 0x00, 0x00, 0x2A]);
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod list;
mod opcodes;

pub use decoder::{
    decode_instruction, decode_stream, DecodedStream, RawInstruction, RawOperand, TokenResolver,
};
pub use encoder::{encode_stream, EncodedStream};
pub use instruction::{Instruction, MethodRef, Operand, UserString};
pub use list::{InstrId, InstructionList};
pub use opcodes::{FlowType, OpCode, OperandType};
