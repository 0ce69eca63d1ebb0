//! Ordered instruction storage with stable handles.
//!
//! Branch operands, exception handler bounds and locator results refer to instructions by
//! [`InstrId`]. Handles stay valid across insertions, and a replacement keeps the handle
//! of the instruction it replaces, so anything that pointed at the old instruction now
//! points at the new one.

use std::fmt;

use crate::{assembly::Instruction, Result};

/// Stable handle of an instruction inside one [`InstructionList`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(u32);

impl InstrId {
    /// The handle the `index`-th push into a fresh list receives. The decoder uses this to
    /// resolve forward branches before their targets are pushed.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn nth(index: usize) -> InstrId {
        InstrId(index as u32)
    }
}

impl fmt::Debug for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstrId({})", self.0)
    }
}

/// The instructions of one method body, in execution layout order.
#[derive(Debug, Clone, Default)]
pub struct InstructionList {
    arena: Vec<Instruction>,
    order: Vec<InstrId>,
}

impl InstructionList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        InstructionList::default()
    }

    /// Append `instruction` and return its handle.
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        #[allow(clippy::cast_possible_truncation)]
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(instruction);
        self.order.push(id);
        id
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if there are no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the instruction behind `id`.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.arena.get(id.0 as usize)
    }

    /// Returns the handle at layout position `index`.
    #[must_use]
    pub fn id_at(&self, index: usize) -> Option<InstrId> {
        self.order.get(index).copied()
    }

    /// Returns the layout position of `id`.
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// Returns the handle that follows `id` in layout order.
    #[must_use]
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.position(id)
            .and_then(|index| self.order.get(index + 1).copied())
    }

    /// Iterate `(handle, instruction)` pairs in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.order
            .iter()
            .map(move |id| (*id, &self.arena[id.0 as usize]))
    }

    /// Insert `instructions` immediately before `anchor`, keeping their relative order.
    /// Returns the new handles.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `anchor` is not in this list.
    pub fn insert_before(
        &mut self,
        anchor: InstrId,
        instructions: Vec<Instruction>,
    ) -> Result<Vec<InstrId>> {
        let Some(index) = self.position(anchor) else {
            return Err(crate::Error::Error(format!(
                "Insertion anchor {anchor:?} is not part of this method"
            )));
        };

        let mut ids = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            #[allow(clippy::cast_possible_truncation)]
            let id = InstrId(self.arena.len() as u32);
            self.arena.push(instruction);
            ids.push(id);
        }

        self.order.splice(index..index, ids.iter().copied());
        Ok(ids)
    }

    /// Replace the instruction behind `id`. The handle, and every reference to it, stays
    /// valid and now denotes `instruction`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `id` was not issued by this list.
    pub fn replace(&mut self, id: InstrId, instruction: Instruction) -> Result<Instruction> {
        match self.arena.get_mut(id.0 as usize) {
            Some(slot) => Ok(std::mem::replace(slot, instruction)),
            None => Err(crate::Error::Error(format!(
                "Instruction {id:?} is not part of this method"
            ))),
        }
    }
}
