use super::engine::{DecodeEngine, IcedEngine};
use super::record::*;
use crate::core::types::{Address, MemoryError, MemoryResult, ProcessArchitecture};
use crate::memory::{BufferMemory, MemoryAccess, ProtectionFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// Output syntax for instruction text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    #[default]
    Masm,
    Nasm,
    Goasm,
    Att,
}

impl Syntax {
    pub const fn options(self) -> u64 {
        match self {
            Syntax::Masm => MASM_SYNTAX,
            Syntax::Nasm => NASM_SYNTAX,
            Syntax::Goasm => GOASM_SYNTAX,
            Syntax::Att => AT_SYNTAX,
        }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Syntax::Masm => "masm",
            Syntax::Nasm => "nasm",
            Syntax::Goasm => "goasm",
            Syntax::Att => "att",
        };
        f.write_str(name)
    }
}

impl FromStr for Syntax {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "masm" | "intel" => Ok(Syntax::Masm),
            "nasm" => Ok(Syntax::Nasm),
            "goasm" => Ok(Syntax::Goasm),
            "att" | "at&t" | "gas" => Ok(Syntax::Att),
            other => Err(MemoryError::UnsupportedOperation(format!(
                "unknown syntax '{}'",
                other
            ))),
        }
    }
}

/// Register family of a register operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterClass {
    General,
    Segment,
    Fpu,
    Mmx,
    Sse,
    Control,
    Debug,
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperandKind {
    Register {
        class: RegisterClass,
        /// Encoding number within the class, when it has one
        number: Option<u8>,
    },
    Memory {
        base: Option<u8>,
        index: Option<u8>,
        scale: u8,
        displacement: i64,
    },
    Immediate {
        value: i64,
        /// Branch displacement already resolved to a target in `value`
        relative: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub text: String,
    pub kind: OperandKind,
    /// Size in bits, 0 when implicit
    pub size: u32,
    pub read: bool,
    pub write: bool,
}

impl Operand {
    fn from_record(argument: &ArgType, instruction: &InstrType) -> Option<Self> {
        let arg_type = argument.arg_type;
        if arg_type & NO_ARGUMENT != 0 || arg_type == 0 {
            return None;
        }

        let kind = if arg_type & REGISTER_TYPE != 0 {
            let class = if arg_type & GENERAL_REG != 0 {
                RegisterClass::General
            } else if arg_type & SEGMENT_REG != 0 {
                RegisterClass::Segment
            } else if arg_type & FPU_REG != 0 {
                RegisterClass::Fpu
            } else if arg_type & MMX_REG != 0 {
                RegisterClass::Mmx
            } else if arg_type & SSE_REG != 0 {
                RegisterClass::Sse
            } else if arg_type & CR_REG != 0 {
                RegisterClass::Control
            } else if arg_type & DR_REG != 0 {
                RegisterClass::Debug
            } else {
                RegisterClass::Special
            };
            OperandKind::Register {
                class,
                number: register_number(arg_type & 0xFFFF),
            }
        } else if arg_type & MEMORY_TYPE != 0 {
            let memory = argument.memory;
            let scale = memory.scale;
            OperandKind::Memory {
                base: register_number(memory.base_register as u32),
                index: register_number(memory.index_register as u32),
                scale: scale as u8,
                displacement: memory.displacement,
            }
        } else {
            let relative = arg_type & RELATIVE_ != 0;
            let value = if relative || (arg_type & ABSOLUTE_ != 0 && instruction.addr_value != 0) {
                instruction.addr_value as i64
            } else {
                instruction.immediat
            };
            OperandKind::Immediate { value, relative }
        };

        let access = argument.access_mode;
        let size = argument.arg_size;
        Some(Operand {
            text: read_c_string(&{ argument.arg_mnemonic }),
            kind,
            size: size.max(0) as u32,
            read: access & READ != 0,
            write: access & WRITE != 0,
        })
    }
}

fn register_number(mask: u32) -> Option<u8> {
    let mask = mask & 0xFFFF;
    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros() as u8)
    }
}

/// Per-flag state bits as decoded (`TE_`, `MO_`, `RE_`, `SE_`, `UN_`, `PR_`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagEffects {
    pub of: u8,
    pub sf: u8,
    pub zf: u8,
    pub af: u8,
    pub pf: u8,
    pub cf: u8,
    pub tf: u8,
    #[serde(rename = "if")]
    pub if_: u8,
    pub df: u8,
    pub nt: u8,
    pub rf: u8,
}

impl FlagEffects {
    fn all(&self) -> [u8; 11] {
        [
            self.of, self.sf, self.zf, self.af, self.pf, self.cf, self.tf, self.if_, self.df, self.nt,
            self.rf,
        ]
    }

    pub fn tests_any(&self) -> bool {
        self.all().iter().any(|state| state & TE_ != 0)
    }

    /// True if any flag is written, cleared, set or left undefined
    pub fn modifies_any(&self) -> bool {
        self.all()
            .iter()
            .any(|state| state & (MO_ | RE_ | SE_ | UN_ | PR_) != 0)
    }
}

impl From<EflStruct> for FlagEffects {
    fn from(flags: EflStruct) -> Self {
        FlagEffects {
            of: flags.of,
            sf: flags.sf,
            zf: flags.zf,
            af: flags.af,
            pf: flags.pf,
            cf: flags.cf,
            tf: flags.tf,
            if_: flags.if_,
            df: flags.df,
            nt: flags.nt,
            rf: flags.rf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Overflow,
    Carry,
    Equal,
    Above,
    Sign,
    Parity,
    Less,
    Greater,
    Below,
    CounterZero,
}

/// Control-flow class of an instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchKind {
    #[default]
    None,
    Jump,
    Call,
    Return,
    Conditional { condition: Condition, negated: bool },
}

impl BranchKind {
    pub fn from_raw(branch_type: i32) -> Self {
        let condition = match branch_type.abs() {
            x if x == JO => Condition::Overflow,
            x if x == JC => Condition::Carry,
            x if x == JE => Condition::Equal,
            x if x == JA => Condition::Above,
            x if x == JS => Condition::Sign,
            x if x == JP => Condition::Parity,
            x if x == JL => Condition::Less,
            x if x == JG => Condition::Greater,
            x if x == JB => Condition::Below,
            x if x == JECXZ => Condition::CounterZero,
            x if x == JMP_TYPE => return BranchKind::Jump,
            x if x == CALL_TYPE => return BranchKind::Call,
            x if x == RET_TYPE => return BranchKind::Return,
            _ => return BranchKind::None,
        };
        BranchKind::Conditional {
            condition,
            negated: branch_type < 0,
        }
    }

    pub fn is_branch(&self) -> bool {
        !matches!(self, BranchKind::None)
    }
}

/// One decoded instruction, copied out of the decode record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisassembledInstruction {
    pub address: Address,
    pub length: usize,
    #[serde(with = "hex")]
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    /// Full instruction text in the requested syntax
    pub text: String,
    pub operands: Vec<Operand>,
    pub flags: FlagEffects,
    pub branch: BranchKind,
    pub branch_target: Option<Address>,
    /// Instruction set in the high half, group in the low half
    pub category: u32,
}

impl DisassembledInstruction {
    /// Builds the owned form from a filled record and the consumed bytes
    pub fn from_record(address: Address, record: &DisasmRecord, bytes: &[u8]) -> Self {
        let instruction = record.instruction;
        let branch = BranchKind::from_raw(instruction.branch_type);
        let addr_value = instruction.addr_value;
        let branch_target = if branch.is_branch() && addr_value != 0 {
            usize::try_from(addr_value).ok().map(Address::new)
        } else {
            None
        };
        let operands = [record.argument1, record.argument2, record.argument3]
            .iter()
            .filter_map(|argument| Operand::from_record(argument, &instruction))
            .collect();

        DisassembledInstruction {
            address,
            length: bytes.len(),
            bytes: bytes.to_vec(),
            mnemonic: read_c_string(&{ instruction.mnemonic }),
            text: read_c_string(&{ record.complete_instr }),
            operands,
            flags: FlagEffects::from(instruction.flags),
            branch,
            branch_target,
            category: instruction.category,
        }
    }

    /// Address right after this instruction
    pub fn next_address(&self) -> Address {
        self.address.offset(self.length as isize)
    }
}

impl fmt::Display for DisassembledInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {:<30} {}",
            self.address,
            hex::encode_upper(&self.bytes),
            self.text
        )
    }
}

/// Walks instructions through any [`MemoryAccess`].
///
/// Decoding must start on an instruction boundary; nothing checks that it does.
pub struct Disassembler<'a, M: MemoryAccess + ?Sized, E: DecodeEngine = IcedEngine> {
    memory: &'a M,
    engine: E,
    options: u64,
}

impl<'a, M: MemoryAccess + ?Sized> Disassembler<'a, M, IcedEngine> {
    pub fn new(memory: &'a M) -> Self {
        Self::with_engine(memory, IcedEngine::new())
    }
}

impl<'a, M: MemoryAccess + ?Sized, E: DecodeEngine> Disassembler<'a, M, E> {
    pub fn with_engine(memory: &'a M, engine: E) -> Self {
        Disassembler {
            memory,
            engine,
            options: MASM_SYNTAX,
        }
    }

    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.options = (self.options & !(NASM_SYNTAX | GOASM_SYNTAX | AT_SYNTAX)) | syntax.options();
        self
    }

    /// Raw engine option bits
    pub fn with_options(mut self, options: u64) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> u64 {
        self.options
    }

    /// Lazily decodes up to `count` instructions starting at `address`
    pub fn instructions(&mut self, address: Address, count: usize) -> Instructions<'_, M, E> {
        Instructions {
            memory: self.memory,
            engine: &mut self.engine,
            options: self.options,
            archi: self.memory.architecture().bits(),
            address,
            remaining: count,
            end: None,
            finished: false,
        }
    }

    /// Lazily decodes everything in `address..address + length`
    pub fn instructions_in(&mut self, address: Address, length: usize) -> Instructions<'_, M, E> {
        let mut instructions = self.instructions(address, usize::MAX);
        instructions.end = Some(address.checked_add(length).unwrap_or(Address::new(usize::MAX)));
        instructions
    }

    /// Decodes `count` instructions.
    ///
    /// On an invalid opcode the `UndecodableInstruction` error carries every
    /// instruction decoded before it.
    pub fn disassemble(&mut self, address: Address, count: usize) -> MemoryResult<Vec<DisassembledInstruction>> {
        collect(self.instructions(address, count))
    }
}

fn collect<I>(instructions: I) -> MemoryResult<Vec<DisassembledInstruction>>
where
    I: Iterator<Item = MemoryResult<DisassembledInstruction>>,
{
    let mut decoded = Vec::new();
    for instruction in instructions {
        match instruction {
            Ok(instruction) => decoded.push(instruction),
            Err(MemoryError::UndecodableInstruction { address, .. }) => {
                return Err(MemoryError::UndecodableInstruction { address, decoded });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(decoded)
}

/// Lazy instruction sequence from [`Disassembler::instructions`].
///
/// Yields at most one error and then ends. An `UndecodableInstruction` error
/// from here carries no instructions; they were already yielded.
pub struct Instructions<'d, M: MemoryAccess + ?Sized, E: DecodeEngine> {
    memory: &'d M,
    engine: &'d mut E,
    options: u64,
    archi: u32,
    address: Address,
    remaining: usize,
    end: Option<Address>,
    finished: bool,
}

impl<M: MemoryAccess + ?Sized, E: DecodeEngine> Instructions<'_, M, E> {
    /// Where the next decode starts
    pub fn position(&self) -> Address {
        self.address
    }

    fn step(&mut self) -> MemoryResult<DisassembledInstruction> {
        let mut window = [0u8; MAX_INSTRUCTION_LENGTH];
        let limit = match self.end {
            Some(end) => MAX_INSTRUCTION_LENGTH.min(end.as_usize() - self.address.as_usize()),
            None => MAX_INSTRUCTION_LENGTH,
        };
        let read = self.memory.read_partial(self.address, &mut window[..limit])?;

        let mut record = DisasmRecord::new();
        record.eip = window.as_ptr() as usize;
        record.virtual_addr = self.address.as_u64();
        record.security_block = read as u32;
        record.archi = self.archi;
        record.options = self.options;

        let length = self.engine.decode(&window[..read], &mut record);
        if length == UNKNOWN_OPCODE || length < 0 {
            debug!("Invalid opcode at {}", self.address);
            return Err(MemoryError::UndecodableInstruction {
                address: self.address.to_string(),
                decoded: Vec::new(),
            });
        }
        let length = length as usize;
        if length == OUT_OF_BLOCK as usize || length > read {
            return Err(MemoryError::partial_read(self.address, MAX_INSTRUCTION_LENGTH, read));
        }

        let instruction = DisassembledInstruction::from_record(self.address, &record, &window[..length]);
        trace!("{}", instruction);
        self.address = self.address.add(length)?;
        Ok(instruction)
    }
}

impl<M: MemoryAccess + ?Sized, E: DecodeEngine> Iterator for Instructions<'_, M, E> {
    type Item = MemoryResult<DisassembledInstruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.remaining == 0 {
            return None;
        }
        if matches!(self.end, Some(end) if self.address >= end) {
            return None;
        }

        match self.step() {
            Ok(instruction) => {
                self.remaining -= 1;
                Some(Ok(instruction))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Decodes a host-side byte slice as if it were mapped at `address`.
///
/// Decoding stops at the end of `bytes`; an instruction cut off by the end
/// fails with `PartialRead`.
pub fn disassemble_bytes(
    bytes: &[u8],
    address: Address,
    architecture: ProcessArchitecture,
    syntax: Syntax,
) -> MemoryResult<Vec<DisassembledInstruction>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let memory = BufferMemory::with_architecture(architecture);
    memory.map(address, bytes, ProtectionFlags::execute_read())?;
    let mut disassembler = Disassembler::new(&memory).with_syntax(syntax);
    collect(disassembler.instructions_in(address, bytes.len()))
}
