//! Applies an [`InjectionPlan`] to a method body.
//!
//! The array-size constant is replaced in place with `ldc.i4 (n + 1)`, and for each
//! entry `i` in `1..=n` the sequence `dup`, `ldc.i4 i`, `ldstr entry`, `stelem.ref` is
//! inserted directly before the injection anchor. Index 0 keeps whatever the method
//! stored there. All checks run before the body is touched.

use crate::{
    assembly::Instruction,
    metadata::method::MethodBody,
    patch::locator::Anchors,
    Error::{UnexpectedAnchorShape, UnsafeInsertionPoint},
    Result,
};

/// Stack slots one store sequence needs on top of the array reference.
pub const STORE_STACK_DEPTH: u16 = 3;

/// Instructions per stored entry.
pub const STORE_SEQUENCE_LEN: usize = 4;

/// What a successful application changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Array size before the patch
    pub previous_size: i32,
    /// Array size after the patch
    pub array_size: i32,
    /// Number of inserted instructions
    pub inserted: usize,
    /// Stack bound after the patch
    pub max_stack: u16,
}

/// The entries to add and where to add them.
#[derive(Debug, Clone)]
pub struct InjectionPlan<'a> {
    /// Entries in store order
    pub entries: &'a [String],
    /// The located anchors
    pub anchors: Anchors,
}

impl<'a> InjectionPlan<'a> {
    /// Create a plan.
    #[must_use]
    pub fn new(entries: &'a [String], anchors: Anchors) -> Self {
        InjectionPlan { entries, anchors }
    }

    /// Array size after the patch: one reserved slot plus the entries.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if the size does not fit an `int32`.
    pub fn array_size(&self) -> Result<i32> {
        i32::try_from(self.entries.len())
            .ok()
            .and_then(|count| count.checked_add(1))
            .ok_or_else(|| crate::Error::Error(format!("Too many entries - {}", self.entries.len())))
    }

    /// The instructions inserted before the injection anchor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if an index does not fit an `int32`.
    pub fn store_sequence(&self) -> Result<Vec<Instruction>> {
        let mut instructions = Vec::with_capacity(self.entries.len() * STORE_SEQUENCE_LEN);
        for (index, entry) in (1_usize..).zip(self.entries) {
            let index = i32::try_from(index)
                .map_err(|_| crate::Error::Error(format!("Entry index {index} too large")))?;

            instructions.push(Instruction::dup());
            instructions.push(Instruction::ldc_i4(index));
            instructions.push(Instruction::ldstr(entry));
            instructions.push(Instruction::stelem_ref());
        }

        Ok(instructions)
    }

    /// Verify that `body` can take this plan and return the current array size.
    ///
    /// # Errors
    /// - [`crate::Error::UnexpectedAnchorShape`] if the array-size anchor is not an
    ///   `int32` constant load
    /// - [`crate::Error::UnsafeInsertionPoint`] if a branch, switch or exception handler
    ///   targets the injection anchor
    /// - [`crate::Error::Error`] if an anchor is not part of `body`
    pub fn check(&self, body: &MethodBody) -> Result<i32> {
        let list = &body.instructions;
        let size_anchor = list.get(self.anchors.array_size).ok_or_else(|| {
            crate::Error::Error("Array size anchor is not part of the method".to_string())
        })?;

        let Some(previous_size) = size_anchor.ldc_i4_value() else {
            return Err(UnexpectedAnchorShape {
                expected: "ldc.i4",
                found: size_anchor.to_string(),
            });
        };

        if list.position(self.anchors.injection).is_none() {
            return Err(crate::Error::Error(
                "Injection anchor is not part of the method".to_string(),
            ));
        }

        if body.is_referenced(self.anchors.injection) {
            return Err(UnsafeInsertionPoint(format!(
                "'{}' is a branch or exception handler target",
                list.get(self.anchors.injection)
                    .map(ToString::to_string)
                    .unwrap_or_default()
            )));
        }

        Ok(previous_size)
    }

    /// Rewrite `body`. On error the body is unchanged.
    ///
    /// # Errors
    /// Any error of [`InjectionPlan::check`], or [`crate::Error::Error`] if the stack
    /// bound overflows.
    pub fn apply(&self, body: &mut MethodBody) -> Result<PatchOutcome> {
        let previous_size = self.check(body)?;

        let array_size = self.array_size()?;
        let sequence = self.store_sequence()?;
        let max_stack = if sequence.is_empty() {
            body.max_stack
        } else {
            body.max_stack
                .checked_add(STORE_STACK_DEPTH)
                .ok_or_else(|| crate::Error::Error("Stack bound overflows".to_string()))?
        };

        body.instructions
            .replace(self.anchors.array_size, Instruction::ldc_i4(array_size))?;

        let inserted = sequence.len();
        if !sequence.is_empty() {
            body.instructions
                .insert_before(self.anchors.injection, sequence)?;
        }
        body.max_stack = max_stack;

        Ok(PatchOutcome {
            previous_size,
            array_size,
            inserted,
            max_stack,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{InstrId, InstructionList, OpCode, Operand},
        metadata::{
            method::{ExceptionHandler, ExceptionHandlerFlags},
            token::Token,
        },
        patch::locator::locate,
        test::call,
    };

    fn body(instructions: InstructionList) -> MethodBody {
        MethodBody {
            max_stack: 4,
            local_var_sig_token: Token::new(0),
            init_locals: false,
            instructions,
            exception_handlers: Vec::new(),
        }
    }

    fn scenario() -> MethodBody {
        let mut list = InstructionList::new();
        list.push(call("SetAdditionalAssemblies"));
        list.push(call("add_eventLogMessage"));
        list.push(Instruction::ldc_i4(0));
        body(list)
    }

    fn entries(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn plan_for<'a>(body: &MethodBody, entries: &'a [String]) -> InjectionPlan<'a> {
        let anchors = locate(&body.instructions, "SetAdditionalAssemblies", "add_eventLogMessage").unwrap();
        InjectionPlan::new(entries, anchors)
    }

    fn listing(body: &MethodBody) -> Vec<String> {
        body.instructions
            .iter()
            .map(|(_, instruction)| instruction.to_string())
            .collect()
    }

    #[test]
    fn two_entries() {
        let mut body = scenario();
        let names = entries(&["A.dll", "B.dll"]);
        let plan = plan_for(&body, &names);

        let outcome = plan.apply(&mut body).unwrap();
        assert_eq!(outcome.previous_size, 0);
        assert_eq!(outcome.array_size, 3);
        assert_eq!(outcome.inserted, 8);
        assert_eq!(body.max_stack, 7);

        assert_eq!(
            listing(&body),
            [
                "dup",
                "ldc.i4 1",
                "ldstr \"A.dll\"",
                "stelem.ref",
                "dup",
                "ldc.i4 2",
                "ldstr \"B.dll\"",
                "stelem.ref",
                "call SetAdditionalAssemblies [0x0a000001]",
                "call add_eventLogMessage [0x0a000001]",
                "ldc.i4 3",
            ]
        );
    }

    #[test]
    fn no_entries() {
        let mut body = scenario();
        let names = Vec::new();
        let plan = plan_for(&body, &names);

        let outcome = plan.apply(&mut body).unwrap();
        assert_eq!(outcome.array_size, 1);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(body.max_stack, 4);
        assert_eq!(body.instructions.len(), 3);
    }

    #[test]
    fn keeps_identity_outside_window() {
        let mut body = scenario();
        let before: Vec<(InstrId, Instruction)> = body
            .instructions
            .iter()
            .map(|(id, instruction)| (id, instruction.clone()))
            .collect();

        let names = entries(&["A.dll"]);
        let plan = plan_for(&body, &names);
        plan.apply(&mut body).unwrap();

        // Injection anchor and the size call keep handle and content
        for (id, instruction) in &before[..2] {
            assert_eq!(body.instructions.get(*id), Some(instruction));
        }
        // The size anchor keeps its handle with new content
        assert_eq!(body.instructions.position(before[2].0), Some(6));
        assert_eq!(body.instructions.get(before[2].0), Some(&Instruction::ldc_i4(2)));
    }

    #[test]
    fn short_form_size() {
        let mut list = InstructionList::new();
        list.push(call("SetAdditionalAssemblies"));
        list.push(call("add_eventLogMessage"));
        list.push(Instruction::new(OpCode::LDC_I4_1));
        let mut body = body(list);

        let names = entries(&["A.dll"]);
        let outcome = plan_for(&body, &names).apply(&mut body).unwrap();
        assert_eq!(outcome.previous_size, 1);
        assert_eq!(outcome.array_size, 2);
    }

    #[test]
    fn unexpected_shape() {
        let mut list = InstructionList::new();
        list.push(call("SetAdditionalAssemblies"));
        list.push(call("add_eventLogMessage"));
        list.push(Instruction::new(OpCode::LDNULL));
        let mut body = body(list);
        let before = listing(&body);

        let names = entries(&["A.dll"]);
        let result = plan_for(&body, &names).apply(&mut body);
        assert!(matches!(result, Err(UnexpectedAnchorShape { ref found, .. }) if found == "ldnull"));
        assert_eq!(listing(&body), before);
        assert_eq!(body.max_stack, 4);
    }

    #[test]
    fn branch_into_injection() {
        let mut list = InstructionList::new();
        let branch = list.push(Instruction::new(OpCode::NOP));
        let injection = list.push(call("SetAdditionalAssemblies"));
        list.push(call("add_eventLogMessage"));
        list.push(Instruction::ldc_i4(0));
        list.replace(branch, Instruction::with_operand(OpCode::BR_S, Operand::Target(injection)))
            .unwrap();
        let mut body = body(list);
        let before = listing(&body);

        let names = entries(&["A.dll"]);
        let result = plan_for(&body, &names).apply(&mut body);
        assert!(matches!(result, Err(UnsafeInsertionPoint(_))));
        assert_eq!(listing(&body), before);
    }

    #[test]
    fn check_reports_current_size() {
        let body = scenario();
        let names = entries(&["A.dll"]);
        assert_eq!(plan_for(&body, &names).check(&body).unwrap(), 0);

        let mut shaped = scenario();
        let size = shaped.instructions.id_at(2).unwrap();
        shaped
            .instructions
            .replace(size, Instruction::new(OpCode::LDNULL))
            .unwrap();
        assert!(matches!(
            plan_for(&shaped, &names).check(&shaped),
            Err(UnexpectedAnchorShape { .. })
        ));
    }

    #[test]
    fn handler_boundary_at_injection() {
        let mut body = scenario();
        let first = body.instructions.id_at(0).unwrap();
        let last = body.instructions.id_at(2).unwrap();
        body.exception_handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: first,
            try_end: Some(last),
            handler_start: last,
            handler_end: None,
            filter_start: None,
            class_token: None,
        });

        let names = entries(&["A.dll"]);
        let result = plan_for(&body, &names).apply(&mut body);
        assert!(matches!(result, Err(UnsafeInsertionPoint(_))));
    }
}
