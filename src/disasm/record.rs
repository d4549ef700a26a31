//! The fixed-layout decode record shared with decode engines
//!
//! Field order, widths and packing match the engine ABI byte for byte.
//! The outer record and most sub-records are packed to 1 byte; operand and
//! memory descriptors are packed to 4. Read fields by value.

use bytemuck::{Pod, Zeroable};
use std::mem;

/// Decode result: the opcode is not valid
pub const UNKNOWN_OPCODE: i32 = -1;
/// Decode result: the instruction runs past the readable window
pub const OUT_OF_BLOCK: i32 = 0;

/// Longest possible x86 instruction
pub const MAX_INSTRUCTION_LENGTH: usize = 15;

// Options
pub const NO_TABULATION: u64 = 0x0000_0000;
pub const TABULATION: u64 = 0x0000_0001;
pub const MASM_SYNTAX: u64 = 0x0000_0000;
pub const GOASM_SYNTAX: u64 = 0x0000_0100;
pub const NASM_SYNTAX: u64 = 0x0000_0200;
pub const AT_SYNTAX: u64 = 0x0000_0400;
pub const PREFIXED_NUMERAL: u64 = 0x0001_0000;
pub const SUFFIXED_NUMERAL: u64 = 0x0000_0000;
pub const SHOW_SEGMENT_REGS: u64 = 0x0100_0000;

// Prefix states
pub const NOT_USED_PREFIX: u8 = 0;
pub const IN_USE_PREFIX: u8 = 1;
pub const SUPERFLUOUS_PREFIX: u8 = 2;
pub const INVALID_PREFIX: u8 = 4;
pub const MANDATORY_PREFIX: u8 = 8;

// EFLAGS states
/// Tested
pub const TE_: u8 = 0x01;
/// Modified
pub const MO_: u8 = 0x02;
/// Reset
pub const RE_: u8 = 0x04;
/// Set
pub const SE_: u8 = 0x08;
/// Undefined
pub const UN_: u8 = 0x10;
/// Restored from a prior value
pub const PR_: u8 = 0x20;

// Instruction sets (high half of `category`)
pub const GENERAL_PURPOSE_INSTRUCTION: u32 = 0x0001_0000;
pub const FPU_INSTRUCTION: u32 = 0x0002_0000;
pub const MMX_INSTRUCTION: u32 = 0x0004_0000;
pub const SSE_INSTRUCTION: u32 = 0x0008_0000;
pub const SSE2_INSTRUCTION: u32 = 0x0010_0000;
pub const SSE3_INSTRUCTION: u32 = 0x0020_0000;
pub const SSSE3_INSTRUCTION: u32 = 0x0040_0000;
pub const SSE41_INSTRUCTION: u32 = 0x0080_0000;
pub const SSE42_INSTRUCTION: u32 = 0x0100_0000;
pub const SYSTEM_INSTRUCTION: u32 = 0x0200_0000;
pub const VM_INSTRUCTION: u32 = 0x0400_0000;
pub const UNDOCUMENTED_INSTRUCTION: u32 = 0x0800_0000;
pub const AMD_INSTRUCTION: u32 = 0x1000_0000;
pub const ILLEGAL_INSTRUCTION: u32 = 0x2000_0000;
pub const AES_INSTRUCTION: u32 = 0x4000_0000;
pub const CLMUL_INSTRUCTION: u32 = 0x8000_0000;

// Instruction groups (low half of `category`)
pub const DATA_TRANSFER: u32 = 1;
pub const ARITHMETIC_INSTRUCTION: u32 = 2;
pub const LOGICAL_INSTRUCTION: u32 = 3;
pub const SHIFT_ROTATE: u32 = 4;
pub const BIT_BYTE: u32 = 5;
pub const CONTROL_TRANSFER: u32 = 6;
pub const STRING_INSTRUCTION: u32 = 7;
pub const IN_OUT_INSTRUCTION: u32 = 8;
pub const ENTER_LEAVE_INSTRUCTION: u32 = 9;
pub const FLAG_CONTROL_INSTRUCTION: u32 = 10;
pub const SEGMENT_REGISTER: u32 = 11;
pub const MISCELLANEOUS_INSTRUCTION: u32 = 12;
pub const COMPARISON_INSTRUCTION: u32 = 13;
pub const CONVERSION_INSTRUCTION: u32 = 20;

// Branch types; negative values are the negated conditions
pub const JO: i32 = 1;
pub const JC: i32 = 2;
pub const JE: i32 = 3;
pub const JA: i32 = 4;
pub const JS: i32 = 5;
pub const JP: i32 = 6;
pub const JL: i32 = 7;
pub const JG: i32 = 8;
pub const JB: i32 = 9;
pub const JECXZ: i32 = 10;
pub const JMP_TYPE: i32 = 11;
pub const CALL_TYPE: i32 = 12;
pub const RET_TYPE: i32 = 13;
pub const JNO: i32 = -1;
pub const JNC: i32 = -2;
pub const JNE: i32 = -3;
pub const JNA: i32 = -4;
pub const JNS: i32 = -5;
pub const JNP: i32 = -6;
pub const JNL: i32 = -7;
pub const JNG: i32 = -8;
pub const JNB: i32 = -9;

// Operand types
pub const NO_ARGUMENT: u32 = 0x1000_0000;
pub const REGISTER_TYPE: u32 = 0x2000_0000;
pub const MEMORY_TYPE: u32 = 0x4000_0000;
pub const CONSTANT_TYPE: u32 = 0x8000_0000;

pub const MMX_REG: u32 = 0x0001_0000;
pub const GENERAL_REG: u32 = 0x0002_0000;
pub const FPU_REG: u32 = 0x0004_0000;
pub const SSE_REG: u32 = 0x0008_0000;
pub const CR_REG: u32 = 0x0010_0000;
pub const DR_REG: u32 = 0x0020_0000;
pub const SPECIAL_REG: u32 = 0x0040_0000;
pub const MEMORY_MANAGEMENT_REG: u32 = 0x0080_0000;
pub const SEGMENT_REG: u32 = 0x0100_0000;

pub const RELATIVE_: u32 = 0x0400_0000;
pub const ABSOLUTE_: u32 = 0x0800_0000;

// Access modes
pub const READ: u32 = 0x1;
pub const WRITE: u32 = 0x2;

/// Register `n` as a one-hot mask (REG0 = rax ... REG15 = r15)
pub const fn reg(n: u32) -> u32 {
    1 << n
}

// Segment registers
pub const ES_REG: u32 = 1;
pub const DS_REG: u32 = 2;
pub const FS_REG: u32 = 3;
pub const GS_REG: u32 = 4;
pub const CS_REG: u32 = 5;
pub const SS_REG: u32 = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct RexStruct {
    pub w: u8,
    pub r: u8,
    pub x: u8,
    pub b: u8,
    pub state: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct PrefixInfo {
    pub number: i32,
    pub nb_undefined: i32,
    pub lock_prefix: u8,
    pub operand_size: u8,
    pub address_size: u8,
    pub repne_prefix: u8,
    pub rep_prefix: u8,
    pub fs_prefix: u8,
    pub ss_prefix: u8,
    pub gs_prefix: u8,
    pub es_prefix: u8,
    pub cs_prefix: u8,
    pub ds_prefix: u8,
    pub branch_taken: u8,
    pub branch_not_taken: u8,
    pub rex: RexStruct,
}

/// Per-flag state bits (`TE_`, `MO_`, ...)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct EflStruct {
    pub of: u8,
    pub sf: u8,
    pub zf: u8,
    pub af: u8,
    pub pf: u8,
    pub cf: u8,
    pub tf: u8,
    pub if_: u8,
    pub df: u8,
    pub nt: u8,
    pub rf: u8,
    pub alignment: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, packed(4))]
pub struct MemoryType {
    /// One-hot register mask, 0 when absent
    pub base_register: i32,
    pub index_register: i32,
    pub scale: i32,
    pub displacement: i64,
}

// SAFETY: plain integers, no padding at packing 4 (checked below)
unsafe impl Zeroable for MemoryType {}
unsafe impl Pod for MemoryType {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct InstrType {
    pub category: u32,
    pub opcode: i32,
    pub mnemonic: [u8; 16],
    pub branch_type: i32,
    pub flags: EflStruct,
    pub addr_value: u64,
    pub immediat: i64,
    pub implicit_modified_regs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed(4))]
pub struct ArgType {
    pub arg_mnemonic: [u8; 32],
    /// `NO_ARGUMENT`, or a kind bit combined with class and register bits
    pub arg_type: u32,
    /// Operand size in bits
    pub arg_size: i32,
    pub arg_position: i32,
    pub access_mode: u32,
    pub memory: MemoryType,
    pub segment_reg: u32,
}

// SAFETY: integers and byte arrays only, no padding at packing 4
unsafe impl Zeroable for ArgType {}
unsafe impl Pod for ArgType {}

impl Default for ArgType {
    fn default() -> Self {
        ArgType {
            arg_type: NO_ARGUMENT,
            ..Zeroable::zeroed()
        }
    }
}

/// The decode record.
///
/// 554 bytes on a 32-bit host and 558 on a 64-bit one, since `eip` is
/// pointer-sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct DisasmRecord {
    /// Host address of the bytes being decoded
    pub eip: usize,
    /// Address the bytes came from in the target
    pub virtual_addr: u64,
    /// Bytes readable from `eip`; 0 means unbounded
    pub security_block: u32,
    /// Full instruction text, NUL-terminated
    pub complete_instr: [u8; 64],
    /// 32 or 64
    pub archi: u32,
    pub options: u64,
    pub instruction: InstrType,
    pub argument1: ArgType,
    pub argument2: ArgType,
    pub argument3: ArgType,
    pub prefix: PrefixInfo,
    pub reserved: [u32; 40],
}

pub const DISASM_RECORD_SIZE: usize = if cfg!(target_pointer_width = "64") { 558 } else { 554 };

const _: () = assert!(mem::size_of::<RexStruct>() == 5);
const _: () = assert!(mem::size_of::<PrefixInfo>() == 26);
const _: () = assert!(mem::size_of::<EflStruct>() == 12);
const _: () = assert!(mem::size_of::<MemoryType>() == 20);
const _: () = assert!(mem::size_of::<InstrType>() == 60);
const _: () = assert!(mem::size_of::<ArgType>() == 72);
const _: () = assert!(mem::size_of::<DisasmRecord>() == DISASM_RECORD_SIZE);

impl DisasmRecord {
    /// A zeroed record with all three operands marked absent
    pub fn new() -> Self {
        let mut record: DisasmRecord = Zeroable::zeroed();
        record.argument1 = ArgType::default();
        record.argument2 = ArgType::default();
        record.argument3 = ArgType::default();
        record
    }

    /// Clears decoder output, keeping the input fields
    pub fn reset_output(&mut self) {
        self.complete_instr = [0; 64];
        self.instruction = InstrType::default();
        self.argument1 = ArgType::default();
        self.argument2 = ArgType::default();
        self.argument3 = ArgType::default();
        self.prefix = PrefixInfo::default();
    }

    /// Operand `index` (0..3)
    pub fn argument(&self, index: usize) -> Option<ArgType> {
        match index {
            0 => Some(self.argument1),
            1 => Some(self.argument2),
            2 => Some(self.argument3),
            _ => None,
        }
    }

    pub fn set_argument(&mut self, index: usize, argument: ArgType) {
        match index {
            0 => self.argument1 = argument,
            1 => self.argument2 = argument,
            2 => self.argument3 = argument,
            _ => {}
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for DisasmRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies `text` into a fixed buffer, truncating to leave a NUL
pub fn write_c_string(buffer: &mut [u8], text: &str) {
    buffer.fill(0);
    let length = text.len().min(buffer.len().saturating_sub(1));
    buffer[..length].copy_from_slice(&text.as_bytes()[..length]);
}

/// Text up to the first NUL
pub fn read_c_string(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}
