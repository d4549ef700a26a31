//! Call stubs for x86 and x64 targets
//!
//! Each stub is a thread routine. Its single parameter is the address of a
//! result slot; the stub calls the function, stores the return value in the
//! slot and returns the low 32 bits as the thread's exit code.

use super::{CallDescriptor, CallingConvention};
use crate::core::types::{MemoryError, MemoryResult, ProcessArchitecture};

/// Bytes reserved in front of the stub for the return value
pub const RESULT_SLOT_SIZE: usize = 16;

const WIN64_SHADOW_SPACE: usize = 32;

/// Stub for `call` on a target of `architecture`
pub fn build_stub(architecture: ProcessArchitecture, call: &CallDescriptor) -> MemoryResult<Vec<u8>> {
    let convention = call.convention.resolve(architecture)?;
    match architecture {
        ProcessArchitecture::X64 => Ok(build_x64(call)),
        ProcessArchitecture::X86 => build_x86(call, convention),
    }
}

fn build_x64(call: &CallDescriptor) -> Vec<u8> {
    let stack_args = call.args.len().saturating_sub(4);
    // push rbx leaves rsp 16-byte aligned; keep it so at the call
    let frame = (WIN64_SHADOW_SPACE + stack_args * 8 + 15) & !15;

    let mut code = Vec::with_capacity(64 + call.args.len() * 18);
    code.push(0x53); // push rbx
    code.extend_from_slice(&[0x48, 0x89, 0xCB]); // mov rbx, rcx
    code.extend_from_slice(&[0x48, 0x81, 0xEC]); // sub rsp, frame
    code.extend_from_slice(&(frame as u32).to_le_bytes());

    for (index, &value) in call.args.iter().enumerate().skip(4) {
        let displacement = (WIN64_SHADOW_SPACE + (index - 4) * 8) as u32;
        code.extend_from_slice(&[0x48, 0xB8]); // mov rax, imm64
        code.extend_from_slice(&value.to_le_bytes());
        code.extend_from_slice(&[0x48, 0x89, 0x84, 0x24]); // mov [rsp+disp32], rax
        code.extend_from_slice(&displacement.to_le_bytes());
    }

    const REGISTER_LOADS: [[u8; 2]; 4] = [
        [0x48, 0xB9], // mov rcx, imm64
        [0x48, 0xBA], // mov rdx, imm64
        [0x49, 0xB8], // mov r8, imm64
        [0x49, 0xB9], // mov r9, imm64
    ];
    for (opcode, &value) in REGISTER_LOADS.iter().zip(&call.args) {
        code.extend_from_slice(opcode);
        code.extend_from_slice(&value.to_le_bytes());
    }

    code.extend_from_slice(&[0x48, 0xB8]); // mov rax, target
    code.extend_from_slice(&call.target.as_u64().to_le_bytes());
    code.extend_from_slice(&[0xFF, 0xD0]); // call rax
    code.extend_from_slice(&[0x48, 0x89, 0x03]); // mov [rbx], rax
    code.extend_from_slice(&[0x48, 0x81, 0xC4]); // add rsp, frame
    code.extend_from_slice(&(frame as u32).to_le_bytes());
    code.push(0x5B); // pop rbx
    code.push(0xC3); // ret
    code
}

fn build_x86(call: &CallDescriptor, convention: CallingConvention) -> MemoryResult<Vec<u8>> {
    let target = u32::try_from(call.target.as_u64()).map_err(|_| {
        MemoryError::UnsupportedOperation(format!("{} is not a 32-bit address", call.target))
    })?;
    let args = call
        .args
        .iter()
        .map(|&value| {
            u32::try_from(value).map_err(|_| {
                MemoryError::UnsupportedOperation(format!(
                    "argument 0x{:X} does not fit a 32-bit target",
                    value
                ))
            })
        })
        .collect::<MemoryResult<Vec<u32>>>()?;
    let in_registers = convention.register_args().min(args.len());

    let mut code = Vec::with_capacity(32 + args.len() * 5);
    code.push(0x55); // push ebp
    code.extend_from_slice(&[0x89, 0xE5]); // mov ebp, esp
    code.push(0x53); // push ebx
    code.extend_from_slice(&[0x8B, 0x5D, 0x08]); // mov ebx, [ebp+8]

    for &value in args[in_registers..].iter().rev() {
        code.push(0x68); // push imm32
        code.extend_from_slice(&value.to_le_bytes());
    }

    const REGISTER_LOADS: [u8; 2] = [
        0xB9, // mov ecx, imm32
        0xBA, // mov edx, imm32
    ];
    for (opcode, &value) in REGISTER_LOADS.iter().zip(&args[..in_registers]) {
        code.push(*opcode);
        code.extend_from_slice(&value.to_le_bytes());
    }

    code.push(0xB8); // mov eax, target
    code.extend_from_slice(&target.to_le_bytes());
    code.extend_from_slice(&[0xFF, 0xD0]); // call eax
    code.extend_from_slice(&[0x89, 0x03]); // mov [ebx], eax
    code.extend_from_slice(&[0x89, 0x53, 0x04]); // mov [ebx+4], edx
    // Whoever cleaned the arguments, esp comes back from ebp
    code.extend_from_slice(&[0x8D, 0x65, 0xFC]); // lea esp, [ebp-4]
    code.push(0x5B); // pop ebx
    code.push(0x5D); // pop ebp
    code.extend_from_slice(&[0xC2, 0x04, 0x00]); // ret 4
    Ok(code)
}
