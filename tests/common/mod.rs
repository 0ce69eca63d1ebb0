#![allow(dead_code)]

#[path = "../../src/test/image.rs"]
mod image;

use std::path::{Path, PathBuf};

use cilpatch::{assembly::Instruction, prelude::*};

pub use image::*;

/// Write the crafted image into `dir` and return its path.
pub fn stage_image(dir: &Path, data: &[u8]) -> PathBuf {
    let path = dir.join("Assembly-CSharp.dll");
    std::fs::write(&path, data).unwrap();
    path
}

/// Returns the instructions of `Starter.Awake` in `module`.
pub fn awake(module: &Module) -> Vec<Instruction> {
    let starter = module.types().find(|ty| ty.name == "Starter").unwrap();
    let method = starter.methods.iter().find(|m| m.name == "Awake").unwrap();
    method
        .body()
        .unwrap()
        .instructions
        .iter()
        .map(|(_, instruction)| instruction.clone())
        .collect()
}

/// Mnemonics of `instructions`, in order.
pub fn mnemonics(instructions: &[Instruction]) -> Vec<&'static str> {
    instructions.iter().map(|i| i.opcode.mnemonic()).collect()
}

/// Literals loaded by `ldstr`, in order.
pub fn literals(instructions: &[Instruction]) -> Vec<String> {
    instructions
        .iter()
        .filter_map(|i| match &i.operand {
            Operand::String(literal) => Some(literal.value.clone()),
            _ => None,
        })
        .collect()
}
