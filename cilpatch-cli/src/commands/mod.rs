pub mod disasm;
pub mod patch;
