//! Decode engines filling [`DisasmRecord`]s

use super::record::*;
use iced_x86::{
    ConditionCode, CpuidFeature, Decoder, DecoderError, DecoderOptions, FlowControl, Formatter,
    GasFormatter, Instruction, InstructionInfoFactory, IntelFormatter, MasmFormatter, Mnemonic,
    NasmFormatter, OpAccess, OpKind, Register, RflagsBits,
};

/// Decodes one instruction per call.
///
/// The engine reads `record.archi`, `record.options`, `record.virtual_addr`
/// and `record.security_block` as input and overwrites the output fields.
/// It returns the instruction length, [`UNKNOWN_OPCODE`], or [`OUT_OF_BLOCK`]
/// when `window` ends inside the instruction.
pub trait DecodeEngine {
    fn decode(&mut self, window: &[u8], record: &mut DisasmRecord) -> i32;
}

/// Engine backed by `iced-x86`
pub struct IcedEngine {
    formatter: Box<dyn Formatter>,
    formatter_options: u64,
    info: InstructionInfoFactory,
}

impl IcedEngine {
    pub fn new() -> Self {
        IcedEngine {
            formatter: make_formatter(MASM_SYNTAX),
            formatter_options: MASM_SYNTAX,
            info: InstructionInfoFactory::new(),
        }
    }

    fn formatter_for(&mut self, options: u64) -> &mut dyn Formatter {
        if options != self.formatter_options {
            self.formatter = make_formatter(options);
            self.formatter_options = options;
        }
        self.formatter.as_mut()
    }
}

impl Default for IcedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeEngine for IcedEngine {
    fn decode(&mut self, window: &[u8], record: &mut DisasmRecord) -> i32 {
        record.reset_output();

        let security_block = record.security_block as usize;
        let window = if security_block != 0 && security_block < window.len() {
            &window[..security_block]
        } else {
            window
        };
        let bitness = match record.archi {
            64 => 64,
            16 => 16,
            _ => 32,
        };

        let mut decoder = Decoder::with_ip(bitness, window, record.virtual_addr, DecoderOptions::NONE);
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return match decoder.last_error() {
                DecoderError::NoMoreBytes => OUT_OF_BLOCK,
                _ => UNKNOWN_OPCODE,
            };
        }
        let length = instruction.len();

        let options = record.options;
        let formatter = self.formatter_for(options);
        let mut text = String::new();
        formatter.format(&instruction, &mut text);
        write_c_string(&mut record.complete_instr, &text);

        let mut mnemonic = String::new();
        formatter.format_mnemonic(&instruction, &mut mnemonic);

        let mut info = InstrType {
            category: category(&instruction),
            opcode: instruction.op_code().op_code() as i32,
            branch_type: branch_type(&instruction),
            flags: flag_states(&instruction),
            ..InstrType::default()
        };
        write_c_string(&mut info.mnemonic, &mnemonic);

        let mut arguments = [ArgType::default(); 3];
        let mut operands = [None; 3];
        let operand_count = formatter.operand_count(&instruction).min(3) as usize;
        for position in 0..operand_count {
            let mut operand_text = String::new();
            if formatter
                .format_operand(&instruction, &mut operand_text, position as u32)
                .is_err()
            {
                continue;
            }
            let Ok(Some(operand)) = formatter.get_instruction_operand(&instruction, position as u32) else {
                continue;
            };
            let slot = &mut arguments[position];
            write_c_string(&mut slot.arg_mnemonic, &operand_text);
            slot.arg_position = position as i32;
            describe_operand(&instruction, operand, slot, &mut info);
            operands[position] = Some(operand);
        }

        let usage = self.info.info(&instruction);
        for (slot, operand) in arguments.iter_mut().zip(operands) {
            if let Some(operand) = operand {
                slot.access_mode = access_mode(usage.op_access(operand));
            }
        }
        info.implicit_modified_regs = usage
            .used_registers()
            .iter()
            .filter(|used| is_write(used.access()))
            .fold(0, |mask, used| mask | gpr_bit(used.register()));

        record.instruction = info;
        for (index, argument) in arguments.into_iter().enumerate() {
            record.set_argument(index, argument);
        }
        record.prefix = scan_prefixes(&window[..length], bitness);

        length as i32
    }
}

fn make_formatter(options: u64) -> Box<dyn Formatter> {
    let mut formatter: Box<dyn Formatter> = if options & AT_SYNTAX != 0 {
        Box::new(GasFormatter::new())
    } else if options & NASM_SYNTAX != 0 {
        Box::new(NasmFormatter::new())
    } else if options & GOASM_SYNTAX != 0 {
        Box::new(IntelFormatter::new())
    } else {
        Box::new(MasmFormatter::new())
    };

    let settings = formatter.options_mut();
    settings.set_space_after_operand_separator(true);
    if options & PREFIXED_NUMERAL != 0 {
        settings.set_hex_prefix("0x");
        settings.set_hex_suffix("");
    }
    if options & SHOW_SEGMENT_REGS != 0 {
        settings.set_always_show_segment_register(true);
    }
    if options & TABULATION != 0 {
        settings.set_first_operand_char_index(10);
    }
    formatter
}

fn describe_operand(instruction: &Instruction, operand: u32, slot: &mut ArgType, info: &mut InstrType) {
    match instruction.op_kind(operand) {
        OpKind::Register => {
            let register = instruction.op_register(operand);
            slot.arg_type = REGISTER_TYPE | register_class(register) | register_bit(register);
            slot.arg_size = (register.size() * 8) as i32;
        }
        OpKind::Memory => {
            slot.arg_type = MEMORY_TYPE;
            slot.arg_size = (instruction.memory_size().size() * 8) as i32;
            let index = instruction.memory_index();
            slot.memory = MemoryType {
                base_register: gpr_bit(instruction.memory_base()) as i32,
                index_register: gpr_bit(index) as i32,
                scale: if index == Register::None {
                    0
                } else {
                    instruction.memory_index_scale() as i32
                },
                displacement: memory_displacement(instruction),
            };
            slot.segment_reg = segment_number(instruction.memory_segment());
        }
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
            slot.arg_type = CONSTANT_TYPE | RELATIVE_;
            slot.arg_size = match instruction.op_kind(operand) {
                OpKind::NearBranch16 => 16,
                OpKind::NearBranch32 => 32,
                _ => 64,
            };
            info.addr_value = instruction.near_branch_target();
        }
        OpKind::FarBranch16 | OpKind::FarBranch32 => {
            slot.arg_type = CONSTANT_TYPE | ABSOLUTE_;
            slot.arg_size = 32;
            info.addr_value = u64::from(instruction.far_branch32());
        }
        kind => {
            let Some(size) = immediate_size(kind) else {
                // String-instruction memory forms and other implicit operands
                slot.arg_type = MEMORY_TYPE;
                return;
            };
            slot.arg_type = CONSTANT_TYPE | ABSOLUTE_;
            slot.arg_size = size;
            info.immediat = immediate_value(instruction, kind);
        }
    }
}

/// Signed displacement for based or indexed operands, absolute otherwise.
///
/// iced zero-extends 16 and 32-bit displacements, so `[ebp-4]` has to be
/// narrowed back to the address size before widening.
fn memory_displacement(instruction: &Instruction) -> i64 {
    let base = instruction.memory_base();
    let index = instruction.memory_index();
    let address_size = if base.is_ip() {
        0
    } else if base != Register::None {
        base.size()
    } else if index.is_gpr() {
        index.size()
    } else {
        0
    };
    match address_size {
        2 => i64::from(instruction.memory_displacement32() as u16 as i16),
        4 => i64::from(instruction.memory_displacement32() as i32),
        _ => instruction.memory_displacement64() as i64,
    }
}

fn immediate_size(kind: OpKind) -> Option<i32> {
    match kind {
        OpKind::Immediate8 | OpKind::Immediate8_2nd => Some(8),
        OpKind::Immediate16 | OpKind::Immediate8to16 => Some(16),
        OpKind::Immediate32 | OpKind::Immediate8to32 => Some(32),
        OpKind::Immediate64 | OpKind::Immediate8to64 | OpKind::Immediate32to64 => Some(64),
        _ => None,
    }
}

fn immediate_value(instruction: &Instruction, kind: OpKind) -> i64 {
    match kind {
        OpKind::Immediate8 => i64::from(instruction.immediate8()),
        OpKind::Immediate8_2nd => i64::from(instruction.immediate8_2nd()),
        OpKind::Immediate16 => i64::from(instruction.immediate16()),
        OpKind::Immediate32 => i64::from(instruction.immediate32()),
        OpKind::Immediate64 => instruction.immediate64() as i64,
        OpKind::Immediate8to16 => i64::from(instruction.immediate8to16()),
        OpKind::Immediate8to32 => i64::from(instruction.immediate8to32()),
        OpKind::Immediate8to64 => instruction.immediate8to64(),
        OpKind::Immediate32to64 => instruction.immediate32to64(),
        _ => 0,
    }
}

fn register_class(register: Register) -> u32 {
    if register.is_gpr() {
        GENERAL_REG
    } else if register.is_segment_register() {
        SEGMENT_REG
    } else if register.is_st() {
        FPU_REG
    } else if register.is_mm() {
        MMX_REG
    } else if register.is_xmm() || register.is_ymm() || register.is_zmm() {
        SSE_REG
    } else if register.is_cr() {
        CR_REG
    } else if register.is_dr() {
        DR_REG
    } else {
        SPECIAL_REG
    }
}

fn register_bit(register: Register) -> u32 {
    if register == Register::None || register_class(register) == SPECIAL_REG {
        return 0;
    }
    let number = register.number() as u32;
    if number < 16 {
        reg(number)
    } else {
        0
    }
}

fn gpr_bit(register: Register) -> u32 {
    if register.is_gpr() {
        register_bit(register)
    } else {
        0
    }
}

fn segment_number(register: Register) -> u32 {
    match register {
        Register::ES => ES_REG,
        Register::DS => DS_REG,
        Register::FS => FS_REG,
        Register::GS => GS_REG,
        Register::CS => CS_REG,
        Register::SS => SS_REG,
        _ => 0,
    }
}

fn access_mode(access: OpAccess) -> u32 {
    match access {
        OpAccess::Read | OpAccess::CondRead => READ,
        OpAccess::Write | OpAccess::CondWrite => WRITE,
        OpAccess::ReadWrite | OpAccess::ReadCondWrite => READ | WRITE,
        _ => 0,
    }
}

fn is_write(access: OpAccess) -> bool {
    matches!(
        access,
        OpAccess::Write | OpAccess::CondWrite | OpAccess::ReadWrite | OpAccess::ReadCondWrite
    )
}

fn branch_type(instruction: &Instruction) -> i32 {
    match instruction.flow_control() {
        FlowControl::UnconditionalBranch | FlowControl::IndirectBranch => JMP_TYPE,
        FlowControl::Call | FlowControl::IndirectCall => CALL_TYPE,
        FlowControl::Return => RET_TYPE,
        FlowControl::ConditionalBranch => match instruction.condition_code() {
            ConditionCode::o => JO,
            ConditionCode::no => JNO,
            ConditionCode::b => JC,
            ConditionCode::ae => JNC,
            ConditionCode::e => JE,
            ConditionCode::ne => JNE,
            ConditionCode::a => JA,
            ConditionCode::be => JNA,
            ConditionCode::s => JS,
            ConditionCode::ns => JNS,
            ConditionCode::p => JP,
            ConditionCode::np => JNP,
            ConditionCode::l => JL,
            ConditionCode::ge => JNL,
            ConditionCode::g => JG,
            ConditionCode::le => JNG,
            // jcxz family and loops test the counter
            _ => JECXZ,
        },
        _ => 0,
    }
}

fn category(instruction: &Instruction) -> u32 {
    let set = instruction
        .cpuid_features()
        .iter()
        .find_map(|feature| match feature {
            CpuidFeature::FPU | CpuidFeature::FPU287 | CpuidFeature::FPU387 => Some(FPU_INSTRUCTION),
            CpuidFeature::MMX => Some(MMX_INSTRUCTION),
            CpuidFeature::SSE => Some(SSE_INSTRUCTION),
            CpuidFeature::SSE2 => Some(SSE2_INSTRUCTION),
            CpuidFeature::SSE3 => Some(SSE3_INSTRUCTION),
            CpuidFeature::SSSE3 => Some(SSSE3_INSTRUCTION),
            CpuidFeature::SSE4_1 => Some(SSE41_INSTRUCTION),
            CpuidFeature::SSE4_2 => Some(SSE42_INSTRUCTION),
            CpuidFeature::AES => Some(AES_INSTRUCTION),
            CpuidFeature::PCLMULQDQ => Some(CLMUL_INSTRUCTION),
            CpuidFeature::VMX | CpuidFeature::SVM => Some(VM_INSTRUCTION),
            _ => None,
        })
        .unwrap_or(GENERAL_PURPOSE_INSTRUCTION);

    let group = if instruction.flow_control() != FlowControl::Next {
        CONTROL_TRANSFER
    } else {
        match instruction.mnemonic() {
            Mnemonic::Mov | Mnemonic::Movzx | Mnemonic::Movsx | Mnemonic::Movsxd | Mnemonic::Push
            | Mnemonic::Pop | Mnemonic::Xchg => DATA_TRANSFER,
            mnemonic if is_cmov(mnemonic) => DATA_TRANSFER,
            Mnemonic::Add | Mnemonic::Adc | Mnemonic::Sub | Mnemonic::Sbb | Mnemonic::Inc | Mnemonic::Dec
            | Mnemonic::Mul | Mnemonic::Imul | Mnemonic::Div | Mnemonic::Idiv | Mnemonic::Neg
            | Mnemonic::Cmp => ARITHMETIC_INSTRUCTION,
            Mnemonic::And | Mnemonic::Or | Mnemonic::Xor | Mnemonic::Not => LOGICAL_INSTRUCTION,
            Mnemonic::Shl | Mnemonic::Shr | Mnemonic::Sar | Mnemonic::Sal | Mnemonic::Rol | Mnemonic::Ror
            | Mnemonic::Rcl | Mnemonic::Rcr | Mnemonic::Shld | Mnemonic::Shrd => SHIFT_ROTATE,
            Mnemonic::Bt | Mnemonic::Bts | Mnemonic::Btr | Mnemonic::Btc | Mnemonic::Bsf | Mnemonic::Bsr
            | Mnemonic::Test => BIT_BYTE,
            Mnemonic::Movsb | Mnemonic::Movsw | Mnemonic::Movsd | Mnemonic::Movsq | Mnemonic::Stosb
            | Mnemonic::Stosw | Mnemonic::Stosd | Mnemonic::Stosq | Mnemonic::Lodsb | Mnemonic::Lodsd
            | Mnemonic::Scasb | Mnemonic::Cmpsb => STRING_INSTRUCTION,
            Mnemonic::Enter | Mnemonic::Leave => ENTER_LEAVE_INSTRUCTION,
            Mnemonic::Clc | Mnemonic::Stc | Mnemonic::Cld | Mnemonic::Std | Mnemonic::Cli | Mnemonic::Sti
            | Mnemonic::Pushf | Mnemonic::Popf | Mnemonic::Pushfd | Mnemonic::Popfd | Mnemonic::Pushfq
            | Mnemonic::Popfq => FLAG_CONTROL_INSTRUCTION,
            Mnemonic::Cbw | Mnemonic::Cwde | Mnemonic::Cdqe | Mnemonic::Cwd | Mnemonic::Cdq | Mnemonic::Cqo => {
                CONVERSION_INSTRUCTION
            }
            Mnemonic::In | Mnemonic::Out => IN_OUT_INSTRUCTION,
            _ => MISCELLANEOUS_INSTRUCTION,
        }
    };
    set | group
}

fn is_cmov(mnemonic: Mnemonic) -> bool {
    matches!(
        mnemonic,
        Mnemonic::Cmovo
            | Mnemonic::Cmovno
            | Mnemonic::Cmovb
            | Mnemonic::Cmovae
            | Mnemonic::Cmove
            | Mnemonic::Cmovne
            | Mnemonic::Cmovbe
            | Mnemonic::Cmova
            | Mnemonic::Cmovs
            | Mnemonic::Cmovns
            | Mnemonic::Cmovp
            | Mnemonic::Cmovnp
            | Mnemonic::Cmovl
            | Mnemonic::Cmovge
            | Mnemonic::Cmovle
            | Mnemonic::Cmovg
    )
}

fn flag_states(instruction: &Instruction) -> EflStruct {
    let read = instruction.rflags_read();
    let written = instruction.rflags_written();
    let cleared = instruction.rflags_cleared();
    let set = instruction.rflags_set();
    let undefined = instruction.rflags_undefined();

    let state = |bit: u32| -> u8 {
        let mut value = 0;
        if read & bit != 0 {
            value |= TE_;
        }
        if written & bit != 0 {
            value |= MO_;
        }
        if cleared & bit != 0 {
            value |= RE_;
        }
        if set & bit != 0 {
            value |= SE_;
        }
        if undefined & bit != 0 {
            value |= UN_;
        }
        value
    };

    EflStruct {
        of: state(RflagsBits::OF),
        sf: state(RflagsBits::SF),
        zf: state(RflagsBits::ZF),
        af: state(RflagsBits::AF),
        pf: state(RflagsBits::PF),
        cf: state(RflagsBits::CF),
        tf: 0,
        if_: state(RflagsBits::IF),
        df: state(RflagsBits::DF),
        nt: 0,
        rf: 0,
        alignment: 0,
    }
}

/// Legacy and REX prefixes ahead of the opcode
fn scan_prefixes(bytes: &[u8], bitness: u32) -> PrefixInfo {
    let mut prefix = PrefixInfo::default();
    let mut count = 0;

    for &byte in bytes {
        let slot = match byte {
            0xF0 => &mut prefix.lock_prefix,
            0x66 => &mut prefix.operand_size,
            0x67 => &mut prefix.address_size,
            0xF2 => &mut prefix.repne_prefix,
            0xF3 => &mut prefix.rep_prefix,
            0x64 => &mut prefix.fs_prefix,
            0x36 => &mut prefix.ss_prefix,
            0x65 => &mut prefix.gs_prefix,
            0x26 => &mut prefix.es_prefix,
            0x2E => &mut prefix.cs_prefix,
            0x3E => &mut prefix.ds_prefix,
            _ => break,
        };
        *slot = if *slot == IN_USE_PREFIX {
            SUPERFLUOUS_PREFIX
        } else {
            IN_USE_PREFIX
        };
        count += 1;
    }

    if bitness == 64 {
        if let Some(&byte) = bytes.get(count) {
            if (0x40..=0x4F).contains(&byte) {
                prefix.rex = RexStruct {
                    w: (byte >> 3) & 1,
                    r: (byte >> 2) & 1,
                    x: (byte >> 1) & 1,
                    b: byte & 1,
                    state: IN_USE_PREFIX,
                };
                count += 1;
            }
        }
    }

    prefix.number = count as i32;
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8], archi: u32) -> (i32, DisasmRecord) {
        let mut engine = IcedEngine::new();
        let mut record = DisasmRecord::new();
        record.eip = bytes.as_ptr() as usize;
        record.virtual_addr = 0x1000;
        record.archi = archi;
        let length = engine.decode(bytes, &mut record);
        (length, record)
    }

    #[test]
    fn test_ret() {
        let (length, record) = decode(&[0xC3], 64);
        assert_eq!(length, 1);
        let instruction = record.instruction;
        assert_eq!(read_c_string(&{ instruction.mnemonic }), "ret");
        assert_eq!({ instruction.branch_type }, RET_TYPE);
        assert_eq!({ record.argument1.arg_type }, NO_ARGUMENT);
    }

    #[test]
    fn test_register_and_immediate_operands() {
        // mov eax, 0x2A
        let (length, record) = decode(&[0xB8, 0x2A, 0x00, 0x00, 0x00], 32);
        assert_eq!(length, 5);
        let first = record.argument1;
        let second = record.argument2;
        assert_eq!({ first.arg_type }, REGISTER_TYPE | GENERAL_REG | reg(0));
        assert_eq!({ first.arg_size }, 32);
        assert_eq!({ first.access_mode }, WRITE);
        assert_eq!({ second.arg_type }, CONSTANT_TYPE | ABSOLUTE_);
        assert_eq!({ second.access_mode }, READ);
        assert_eq!({ record.instruction.immediat }, 0x2A);
    }

    #[test]
    fn test_memory_operand() {
        // mov rax, [rbx+rcx*4+0x10]
        let (length, record) = decode(&[0x48, 0x8B, 0x44, 0x8B, 0x10], 64);
        assert_eq!(length, 5);
        let source = record.argument2;
        assert_eq!({ source.arg_type }, MEMORY_TYPE);
        assert_eq!({ source.arg_size }, 64);
        let memory = source.memory;
        assert_eq!({ memory.base_register }, reg(3) as i32);
        assert_eq!({ memory.index_register }, reg(1) as i32);
        assert_eq!({ memory.scale }, 4);
        assert_eq!({ memory.displacement }, 0x10);

        let prefix = record.prefix;
        assert_eq!({ prefix.number }, 1);
        assert_eq!(prefix.rex.w, 1);
        assert_eq!(prefix.rex.state, IN_USE_PREFIX);
    }

    #[test]
    fn test_negative_displacement_by_address_size() {
        // mov ecx, [ebp-4]
        let (_, record) = decode(&[0x8B, 0x4D, 0xFC], 32);
        assert_eq!({ record.argument2.memory.displacement }, -4);
        assert_eq!({ record.argument2.memory.base_register }, reg(5) as i32);

        // mov eax, [ebp-4] with an address-size override in 64-bit code
        let (_, record) = decode(&[0x67, 0x8B, 0x45, 0xFC], 64);
        assert_eq!({ record.argument2.memory.displacement }, -4);

        // mov ax, [bp-2] in 16-bit addressing
        let (_, record) = decode(&[0x67, 0x8B, 0x46, 0xFE], 32);
        assert_eq!({ record.argument2.memory.displacement }, -2);

        // mov eax, [0x80000000] stays absolute
        let (_, record) = decode(&[0xA1, 0x00, 0x00, 0x00, 0x80], 32);
        assert_eq!({ record.argument2.memory.displacement }, 0x8000_0000);
    }

    #[test]
    fn test_cmov_family_is_data_transfer() {
        // cmovl, cmovg, cmovb, cmovs
        for opcode in [0x4C, 0x4F, 0x42, 0x48] {
            let (length, record) = decode(&[0x0F, opcode, 0xC1], 32);
            assert_eq!(length, 3);
            assert_eq!({ record.instruction.category } & 0xFFFF, DATA_TRANSFER);
        }
    }

    #[test]
    fn test_conditional_branch_and_flags() {
        // jne +5 at 0x1000
        let (length, record) = decode(&[0x75, 0x05], 32);
        assert_eq!(length, 2);
        assert_eq!({ record.instruction.branch_type }, JNE);
        assert_eq!({ record.instruction.addr_value }, 0x1007);
        assert_eq!(record.instruction.flags.zf & TE_, TE_);

        // xor eax, eax
        let (_, record) = decode(&[0x31, 0xC0], 32);
        let flags = record.instruction.flags;
        assert_eq!(flags.of & RE_, RE_);
        assert_ne!(flags.zf, 0);
        assert_ne!(flags.af, 0);
        assert_eq!(flags.df, 0);
    }

    #[test]
    fn test_truncated_and_invalid() {
        // mov eax, imm32 missing its last byte
        let (length, _) = decode(&[0xB8, 0x01, 0x02, 0x03], 32);
        assert_eq!(length, OUT_OF_BLOCK);

        // push es does not exist in 64-bit mode
        let (length, _) = decode(&[0x06, 0x90], 64);
        assert_eq!(length, UNKNOWN_OPCODE);
    }

    #[test]
    fn test_security_block_limits_window() {
        let bytes = [0xB8, 0x01, 0x02, 0x03, 0x04];
        let mut engine = IcedEngine::new();
        let mut record = DisasmRecord::new();
        record.archi = 32;
        record.security_block = 3;
        assert_eq!(engine.decode(&bytes, &mut record), OUT_OF_BLOCK);
    }

    #[test]
    fn test_syntax_option() {
        // push 0x2A
        let bytes = [0x6A, 0x2A];
        let mut engine = IcedEngine::new();
        let mut record = DisasmRecord::new();
        record.archi = 32;

        record.options = MASM_SYNTAX | PREFIXED_NUMERAL;
        engine.decode(&bytes, &mut record);
        let text = read_c_string(&{ record.complete_instr });
        assert!(text.starts_with("push"));
        assert!(text.to_lowercase().contains("0x2a"), "{}", text);

        // mov eax, ebx
        record.options = AT_SYNTAX;
        engine.decode(&[0x89, 0xD8], &mut record);
        let text = read_c_string(&{ record.complete_instr });
        assert!(text.contains("%eax"), "{}", text);
    }

    #[test]
    fn test_prefix_scan() {
        let prefix = scan_prefixes(&[0xF3, 0xF3, 0x48, 0xA5], 64);
        assert_eq!({ prefix.number }, 3);
        assert_eq!(prefix.rep_prefix, SUPERFLUOUS_PREFIX);
        assert_eq!(prefix.rex.w, 1);

        let prefix = scan_prefixes(&[0x48, 0x90], 32);
        assert_eq!({ prefix.number }, 0);
    }
}
