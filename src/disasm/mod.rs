//! Instruction decoding over target memory
//!
//! Each step reads a window of at most 15 bytes, hands it to a
//! [`DecodeEngine`] through the fixed-layout [`DisasmRecord`], and advances
//! by the reported length.

pub mod disassembler;
pub mod engine;
pub mod record;

pub use disassembler::{
    disassemble_bytes, BranchKind, Condition, DisassembledInstruction, Disassembler, FlagEffects,
    Instructions, Operand, OperandKind, RegisterClass, Syntax,
};
pub use engine::{DecodeEngine, IcedEngine};
pub use record::{DisasmRecord, MAX_INSTRUCTION_LENGTH, OUT_OF_BLOCK, UNKNOWN_OPCODE};
