//! Decoded CIL method bodies.
//!
//! A [`MethodBody`] holds the body of one method as an [`InstructionList`], with exception
//! handler bounds expressed as instruction handles instead of byte offsets. This lets the
//! instruction stream be edited freely; [`MethodBody::write`] lays it out again, picks the
//! header format and recomputes every offset.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Common Intermediate Language Physical Layout

use crate::{
    assembly::{decode_stream, encode_stream, InstrId, InstructionList, TokenResolver},
    file::io::align_up,
    metadata::{
        method::{
            read_sections, write_header, write_section, ExceptionClause, ExceptionHandlerFlags,
            MethodHeader,
        },
        token::Token,
    },
    Result,
};

/// An exception handling clause bound to instructions.
///
/// End bounds are exclusive; `None` denotes the end of the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the protected block
    pub try_start: InstrId,
    /// First instruction after the protected block
    pub try_end: Option<InstrId>,
    /// First instruction of the handler
    pub handler_start: InstrId,
    /// First instruction after the handler
    pub handler_end: Option<InstrId>,
    /// First instruction of the filter, for filter clauses
    pub filter_start: Option<InstrId>,
    /// Caught type, for typed catch clauses
    pub class_token: Option<Token>,
}

/// The decoded body of a method.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// StandAloneSig token of the locals signature, null if there are no locals
    pub local_var_sig_token: Token,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    /// The instruction stream
    pub instructions: InstructionList,
    /// Exception handling clauses, in table order
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Decode the body starting at `data[0]`. `data` may extend past the body.
    ///
    /// # Errors
    /// Returns an error if the header, code or exception sections are malformed, or if a
    /// token cannot be resolved.
    pub fn read(data: &[u8], resolver: &dyn TokenResolver) -> Result<MethodBody> {
        let header = MethodHeader::read(data)?;
        let stream = decode_stream(&data[header.code_range()], resolver)?;

        let mut exception_handlers = Vec::new();
        if header.more_sects {
            let end = header.code_range().end;
            for clause in read_sections(data, align_up(end, 4))? {
                let start = |offset: u32| -> Result<InstrId> {
                    stream.instruction_at(offset)?.ok_or_else(|| {
                        malformed_error!("Exception clause starts at the end of the method")
                    })
                };
                let end = |offset: u32, length: u32| -> Result<Option<InstrId>> {
                    let end = offset
                        .checked_add(length)
                        .ok_or_else(|| malformed_error!("Exception clause overflows"))?;
                    stream.instruction_at(end)
                };

                let (filter_start, class_token) =
                    if clause.flags.contains(ExceptionHandlerFlags::FILTER) {
                        (Some(start(clause.class_token_or_filter)?), None)
                    } else if clause.flags == ExceptionHandlerFlags::EXCEPTION {
                        (None, Some(Token::new(clause.class_token_or_filter)))
                    } else {
                        (None, None)
                    };

                exception_handlers.push(ExceptionHandler {
                    flags: clause.flags,
                    try_start: start(clause.try_offset)?,
                    try_end: end(clause.try_offset, clause.try_length)?,
                    handler_start: start(clause.handler_offset)?,
                    handler_end: end(clause.handler_offset, clause.handler_length)?,
                    filter_start,
                    class_token,
                });
            }
        }

        Ok(MethodBody {
            max_stack: header.max_stack,
            local_var_sig_token: header.local_var_sig_token,
            init_locals: header.init_locals,
            instructions: stream.instructions,
            exception_handlers,
        })
    }

    /// Encode the body: header, code and exception sections.
    ///
    /// A fat header requires the body to start on a 4-byte boundary; the caller places
    /// bodies accordingly.
    ///
    /// # Errors
    /// Returns an error if the instruction stream cannot be encoded or a handler bound is
    /// not part of it; errors from `intern` are propagated.
    pub fn write(&self, intern: &mut dyn FnMut(&str) -> Result<Token>) -> Result<Vec<u8>> {
        let encoded = encode_stream(&self.instructions, intern)?;

        let mut clauses = Vec::with_capacity(self.exception_handlers.len());
        for handler in &self.exception_handlers {
            let try_offset = encoded.offset_of(Some(handler.try_start))?;
            let handler_offset = encoded.offset_of(Some(handler.handler_start))?;
            let class_token_or_filter = match (handler.filter_start, handler.class_token) {
                (Some(filter), _) => encoded.offset_of(Some(filter))?,
                (None, Some(token)) => token.value(),
                (None, None) => 0,
            };

            let try_end = encoded.offset_of(handler.try_end)?;
            let handler_end = encoded.offset_of(handler.handler_end)?;
            if try_end < try_offset || handler_end < handler_offset {
                return Err(malformed_error!("Exception clause bounds are inverted"));
            }

            clauses.push(ExceptionClause {
                flags: handler.flags,
                try_offset,
                try_length: try_end - try_offset,
                handler_offset,
                handler_length: handler_end - handler_offset,
                class_token_or_filter,
            });
        }

        let mut out = Vec::with_capacity(encoded.code.len() + 12);
        write_header(
            &mut out,
            encoded.code.len(),
            self.max_stack,
            self.local_var_sig_token,
            self.init_locals,
            !clauses.is_empty(),
        )?;
        out.extend_from_slice(&encoded.code);

        if !clauses.is_empty() {
            out.resize(align_up(out.len(), 4), 0);
            write_section(&mut out, &clauses)?;
        }

        Ok(out)
    }

    /// Returns `true` if any branch, switch or exception handler bound refers to `id`.
    #[must_use]
    pub fn is_referenced(&self, id: InstrId) -> bool {
        let branches = self
            .instructions
            .iter()
            .any(|(_, instruction)| instruction.targets().contains(&id));

        let handlers = self.exception_handlers.iter().any(|handler| {
            handler.try_start == id
                || handler.try_end == Some(id)
                || handler.handler_start == id
                || handler.handler_end == Some(id)
                || handler.filter_start == Some(id)
        });

        branches || handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Instruction, OpCode},
        test::MapResolver,
    };

    fn no_intern(value: &str) -> Result<Token> {
        Err(crate::Error::Error(format!("unexpected intern of {value}")))
    }

    #[rustfmt::skip]
    const TRY_FINALLY: [u8; 36] = [
        0x0B, 0x30, 0x02, 0x00,         // fat, more sects, max stack 2
        0x06, 0x00, 0x00, 0x00,         // 6 bytes of code
        0x00, 0x00, 0x00, 0x00,         // no locals
        0x00,                           // nop          (try)
        0xDE, 0x02,                     // leave.s ret
        0x00,                           // nop          (finally)
        0xDC,                           // endfinally
        0x2A,                           // ret
        0x00, 0x00,                     // padding
        0x01, 0x10, 0x00, 0x00,         // small EH section, one clause
        0x02, 0x00,                     // finally
        0x00, 0x00, 0x03,               // try 0..3
        0x03, 0x00, 0x02,               // handler 3..5
        0x00, 0x00, 0x00, 0x00,
    ];

    fn try_finally() -> Vec<u8> {
        TRY_FINALLY.to_vec()
    }

    #[test]
    fn tiny_round_trip() {
        let data = [0x0A, 0x00, 0x2A];
        let body = MethodBody::read(&data, &MapResolver::default()).unwrap();

        assert_eq!(body.max_stack, 8);
        assert_eq!(body.instructions.len(), 2);
        assert!(body.exception_handlers.is_empty());
        assert_eq!(body.write(&mut no_intern).unwrap(), data);
    }

    #[test]
    fn handlers_bound_to_instructions() {
        let data = try_finally();
        let body = MethodBody::read(&data, &MapResolver::default()).unwrap();

        assert_eq!(body.exception_handlers.len(), 1);
        let handler = &body.exception_handlers[0];
        let list = &body.instructions;
        assert_eq!(handler.flags, ExceptionHandlerFlags::FINALLY);
        assert_eq!(handler.try_start, list.id_at(0).unwrap());
        assert_eq!(handler.try_end, list.id_at(2));
        assert_eq!(handler.handler_start, list.id_at(2).unwrap());
        assert_eq!(handler.handler_end, list.id_at(4));
        assert_eq!(handler.class_token, None);

        assert!(body.is_referenced(list.id_at(2).unwrap()));
        assert!(!body.is_referenced(list.id_at(1).unwrap()));

        assert_eq!(body.write(&mut no_intern).unwrap(), data);
    }

    #[test]
    fn insertion_shifts_handlers() {
        let data = try_finally();
        let mut body = MethodBody::read(&data, &MapResolver::default()).unwrap();

        let first = body.instructions.id_at(0).unwrap();
        body.instructions
            .insert_before(first, vec![Instruction::new(OpCode::NOP)])
            .unwrap();

        let written = body.write(&mut no_intern).unwrap();
        let reread = MethodBody::read(&written, &MapResolver::default()).unwrap();
        let handler = &reread.exception_handlers[0];

        // The inserted nop lies outside the protected block
        assert_eq!(reread.instructions.position(handler.try_start), Some(1));
        assert_eq!(reread.instructions.position(handler.handler_start), Some(3));
        assert_eq!(written[12], 0x00);
        assert_eq!(written[24..27], [0x02, 0x00, 0x01]);
    }

    #[test]
    fn invalid_handler_offset() {
        let mut data = try_finally();
        // Handler starting inside leave.s
        data[29] = 0x02;
        assert!(MethodBody::read(&data, &MapResolver::default()).is_err());
    }
}
