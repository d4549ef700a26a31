//! Integration tests for disassembly over target memory

use pretty_assertions::assert_eq;
use remote_mem::disasm::record::{write_c_string, DisasmRecord, JMP_TYPE, OUT_OF_BLOCK};
use remote_mem::disasm::{
    disassemble_bytes, BranchKind, Condition, DecodeEngine, Disassembler, OperandKind, Syntax,
};
use remote_mem::invoke::codegen::build_stub;
use remote_mem::{
    Address, BufferMemory, CallDescriptor, CallingConvention, MemoryAccess, MemoryError,
    ProcessArchitecture, ProtectionFlags,
};

const BASE: Address = Address::new(0x40_1000);

fn mapped(architecture: ProcessArchitecture, bytes: &[u8]) -> BufferMemory {
    let memory = BufferMemory::with_architecture(architecture);
    memory.map(BASE, bytes, ProtectionFlags::execute_read()).unwrap();
    memory
}

#[test]
fn test_function_prologue_x86() {
    // push ebp; mov ebp, esp; sub esp, 8; mov eax, [ebp+8]; leave; ret 4
    let code = [
        0x55, 0x8B, 0xEC, 0x83, 0xEC, 0x08, 0x8B, 0x45, 0x08, 0xC9, 0xC2, 0x04, 0x00,
    ];
    let decoded = disassemble_bytes(&code, BASE, ProcessArchitecture::X86, Syntax::Masm).unwrap();

    let mnemonics: Vec<_> = decoded.iter().map(|i| i.mnemonic.as_str()).collect();
    assert_eq!(mnemonics, vec!["push", "mov", "sub", "mov", "leave", "ret"]);

    let lengths: Vec<_> = decoded.iter().map(|i| i.length).collect();
    assert_eq!(lengths, vec![1, 2, 3, 3, 1, 3]);
    assert_eq!(decoded.iter().map(|i| i.length).sum::<usize>(), code.len());

    for pair in decoded.windows(2) {
        assert_eq!(pair[0].next_address(), pair[1].address);
    }

    let load = &decoded[3];
    assert_eq!(load.operands.len(), 2);
    assert!(load.operands[0].write);
    assert!(load.operands[1].read);
    match &load.operands[1].kind {
        OperandKind::Memory {
            base, displacement, ..
        } => {
            assert_eq!(*base, Some(5));
            assert_eq!(*displacement, 8);
        }
        other => panic!("expected memory operand, got {:?}", other),
    }

    assert!(decoded[2].flags.modifies_any());
    assert_eq!(decoded[5].branch, BranchKind::Return);
}

#[test]
fn test_frame_locals_have_negative_displacement() {
    // mov ecx, [ebp-4]; mov dword ptr [ebp-0x10], eax
    let code = [0x8B, 0x4D, 0xFC, 0x89, 0x45, 0xF0];
    let decoded = disassemble_bytes(&code, BASE, ProcessArchitecture::X86, Syntax::Masm).unwrap();

    let displacements: Vec<_> = decoded
        .iter()
        .flat_map(|instruction| &instruction.operands)
        .filter_map(|operand| match &operand.kind {
            OperandKind::Memory {
                base, displacement, ..
            } => Some((*base, *displacement)),
            _ => None,
        })
        .collect();
    assert_eq!(displacements, vec![(Some(5), -4), (Some(5), -0x10)]);
}

#[test]
fn test_branches_resolve_targets() {
    // call +5; je -4; jmp +0
    let code = [
        0xE8, 0x05, 0x00, 0x00, 0x00, 0x74, 0xFC, 0xEB, 0x00,
    ];
    let decoded = disassemble_bytes(&code, BASE, ProcessArchitecture::X86, Syntax::Masm).unwrap();

    assert_eq!(decoded[0].branch, BranchKind::Call);
    assert_eq!(decoded[0].branch_target, Some(Address::new(0x40_100A)));

    assert_eq!(
        decoded[1].branch,
        BranchKind::Conditional {
            condition: Condition::Equal,
            negated: false
        }
    );
    assert_eq!(decoded[1].branch_target, Some(Address::new(0x40_1003)));
    assert!(decoded[1].flags.tests_any());

    assert_eq!(decoded[2].branch, BranchKind::Jump);
    assert_eq!(decoded[2].branch_target, Some(Address::new(0x40_1009)));
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_x64_call_stub_decodes() {
    let target = Address::new(0x7FF6_1234_5678);
    let call = CallDescriptor::new(target)
        .args([1, 2, 3, 4, 5, 6])
        .convention(CallingConvention::Default);
    let stub = build_stub(ProcessArchitecture::X64, &call).unwrap();

    let decoded = disassemble_bytes(&stub, BASE, ProcessArchitecture::X64, Syntax::Masm).unwrap();
    assert_eq!(decoded.iter().map(|i| i.length).sum::<usize>(), stub.len());
    assert_eq!(decoded.first().unwrap().mnemonic, "push");
    assert_eq!(decoded.last().unwrap().branch, BranchKind::Return);

    let calls: Vec<_> = decoded.iter().filter(|i| i.branch == BranchKind::Call).collect();
    assert_eq!(calls.len(), 1);

    let loads_target = decoded.iter().any(|i| {
        i.operands.iter().any(|operand| {
            matches!(operand.kind, OperandKind::Immediate { value, .. } if value as u64 == target.as_u64())
        })
    });
    assert!(loads_target);
}

#[test]
fn test_x86_stdcall_stub_decodes() {
    let call = CallDescriptor::new(Address::new(0x7700_1000))
        .args([0x10, 0x20])
        .convention(CallingConvention::Stdcall);
    let stub = build_stub(ProcessArchitecture::X86, &call).unwrap();

    let decoded = disassemble_bytes(&stub, BASE, ProcessArchitecture::X86, Syntax::Masm).unwrap();
    assert_eq!(decoded.iter().map(|i| i.length).sum::<usize>(), stub.len());
    assert_eq!(decoded.last().unwrap().branch, BranchKind::Return);
    assert!(decoded.iter().any(|i| i.branch == BranchKind::Call));
}

#[test]
fn test_undecodable_keeps_prefix() {
    // nop; nop; then an opcode that does not exist in 64-bit mode
    let memory = mapped(ProcessArchitecture::X64, &[0x90, 0x90, 0x06, 0x90]);
    let result = Disassembler::new(&memory).disassemble(BASE, 10);
    match result {
        Err(MemoryError::UndecodableInstruction { address, decoded }) => {
            assert_eq!(address, Address::new(0x40_1002).to_string());
            assert_eq!(decoded.len(), 2);
        }
        other => panic!("expected undecodable instruction, got {:?}", other),
    }
}

#[test]
fn test_iterator_stops_after_error() {
    let memory = mapped(ProcessArchitecture::X64, &[0x90, 0x06]);
    let mut disassembler = Disassembler::new(&memory);
    let results: Vec<_> = disassembler.instructions(BASE, 10).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
}

#[test]
fn test_count_bounds_the_walk() {
    let memory = mapped(ProcessArchitecture::X86, &[0x90; 32]);
    let mut disassembler = Disassembler::new(&memory);

    let mut walk = disassembler.instructions(BASE, 5);
    assert_eq!(walk.by_ref().count(), 5);
    assert_eq!(walk.position(), Address::new(0x40_1005));
}

#[test]
fn test_page_padding_decodes_until_end_of_mapping() {
    // A mapping is page-sized, so past the code the walk finds zero bytes
    let memory = mapped(ProcessArchitecture::X86, &[0xC3]);
    let decoded = Disassembler::new(&memory).disassemble(BASE, 3).unwrap();
    assert_eq!(decoded[0].mnemonic, "ret");
    // 00 00 is add [eax], al
    assert_eq!(decoded[1].mnemonic, "add");
    assert_eq!(decoded[1].length, 2);
}

#[test]
fn test_instruction_cut_by_unmapped_page() {
    let memory = BufferMemory::with_architecture(ProcessArchitecture::X86);
    let page = Address::new(0x50_0000);
    let mut bytes = vec![0x90u8; 0x1000];
    // mov eax, imm32 with only two immediate bytes before the page ends
    bytes[0xFFD..].copy_from_slice(&[0xB8, 0x01, 0x02]);
    memory.map(page, &bytes, ProtectionFlags::execute_read()).unwrap();

    let start = page.add(0xFFD).unwrap();
    let result = Disassembler::new(&memory).disassemble(start, 1);
    assert!(matches!(
        result,
        Err(MemoryError::PartialRead { read: 3, .. })
    ));
}

#[test]
fn test_syntax_changes_text_only() {
    let code = [0x8B, 0x45, 0x08];
    let masm = disassemble_bytes(&code, BASE, ProcessArchitecture::X86, Syntax::Masm).unwrap();
    let att = disassemble_bytes(&code, BASE, ProcessArchitecture::X86, Syntax::Att).unwrap();

    assert_eq!(masm[0].length, att[0].length);
    assert_eq!(masm[0].operands.len(), att[0].operands.len());
    assert_ne!(masm[0].text, att[0].text);
    assert!(att[0].text.contains('%'));
}

#[test]
fn test_json_output() {
    let decoded = disassemble_bytes(&[0x90], BASE, ProcessArchitecture::X86, Syntax::Masm).unwrap();
    let json = serde_json::to_value(&decoded[0]).unwrap();
    assert_eq!(json["bytes"], "90");
    assert_eq!(json["mnemonic"], "nop");
    assert_eq!(json["branch"]["kind"], "none");
}

/// Treats every byte pair as one unconditional jump
struct PairEngine {
    calls: usize,
}

impl DecodeEngine for PairEngine {
    fn decode(&mut self, window: &[u8], record: &mut DisasmRecord) -> i32 {
        self.calls += 1;
        let available = record.security_block as usize;
        if window.len().min(available) < 2 {
            return OUT_OF_BLOCK;
        }
        let mut mnemonic = [0u8; 16];
        write_c_string(&mut mnemonic, "pair");
        record.instruction.mnemonic = mnemonic;
        record.instruction.branch_type = JMP_TYPE;
        record.instruction.addr_value = record.virtual_addr + 2;
        2
    }
}

#[test]
fn test_custom_engine() {
    let memory = mapped(ProcessArchitecture::X86, &[0xAA; 8]);
    let mut disassembler = Disassembler::with_engine(&memory, PairEngine { calls: 0 });

    let decoded = disassembler.disassemble(BASE, 3).unwrap();
    assert_eq!(decoded.len(), 3);
    assert!(decoded.iter().all(|i| i.mnemonic == "pair" && i.length == 2));
    assert_eq!(decoded[2].branch, BranchKind::Jump);
    assert_eq!(decoded[2].branch_target, Some(Address::new(0x40_1006)));
    assert_eq!(decoded[0].bytes, vec![0xAA, 0xAA]);
}

#[test]
fn test_unreadable_start() {
    let memory = BufferMemory::new();
    let result = Disassembler::new(&memory).disassemble(Address::new(0x1000), 1);
    assert!(matches!(result, Err(MemoryError::InvalidAddress(_))));
    assert!(!memory.query_region(Address::new(0x1000)).unwrap().unwrap().is_readable());
}
