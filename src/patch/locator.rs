//! Finds the two anchors of a patch inside a method's instruction list.
//!
//! Anchors are found structurally: an instruction matches when it is a `call` whose
//! target carries a given name. Exactly one instruction may match each predicate.

use crate::{
    assembly::{InstrId, InstructionList},
    Error::{AnchorAmbiguous, AnchorNotFound},
    Result,
};

/// The located anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors {
    /// The `call` before which entries are stored
    pub injection: InstrId,
    /// The constant that sizes the array
    pub array_size: InstrId,
}

fn describe(member: &str) -> String {
    format!("'call {member}'")
}

/// Returns the unique `call` to `member`.
///
/// # Errors
/// Returns [`crate::Error::AnchorNotFound`] if there is no such call, or
/// [`crate::Error::AnchorAmbiguous`] if there are several.
pub fn find_unique_call(list: &InstructionList, member: &str) -> Result<InstrId> {
    let matches: Vec<InstrId> = list
        .iter()
        .filter(|(_, instruction)| instruction.is_call_to(member))
        .map(|(id, _)| id)
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(AnchorNotFound {
            predicate: describe(member),
        }),
        _ => Err(AnchorAmbiguous {
            predicate: describe(member),
            matches: matches.len(),
        }),
    }
}

/// Locate both anchors. The array-size anchor is the instruction right after the call
/// to `array_size_member`.
///
/// # Errors
/// Returns [`crate::Error::AnchorNotFound`] or [`crate::Error::AnchorAmbiguous`] if a
/// predicate does not match exactly once, or if the array-size call ends the method.
pub fn locate(
    list: &InstructionList,
    injection_member: &str,
    array_size_member: &str,
) -> Result<Anchors> {
    let injection = find_unique_call(list, injection_member)?;

    let size_call = find_unique_call(list, array_size_member)?;
    let Some(array_size) = list.next(size_call) else {
        return Err(AnchorNotFound {
            predicate: format!("instruction after {}", describe(array_size_member)),
        });
    };

    Ok(Anchors {
        injection,
        array_size,
    })
}
