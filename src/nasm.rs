// (C) 2020 Brandon Lewis
//
// Lowering from a translated assembly unit to x86-64 NASM source.
//
// The model is threaded code: every instruction becomes a labelled
// snippet, and computed control flow (jmp, jmp_if, call, ret) goes
// through inst_map, a table with one code address per instruction.
// The value stack is simulated as a qword array behind stack_top, and
// the program's linear memory becomes an initialized .data image.
// Arithmetic and comparisons both evaluate "second-from-top OP top",
// the same order the interpreter uses.
//
// Not every instruction lowers yet; asking for one that does not is a
// generation error, not a silently wrong binary.

use std::fmt::Write;

use crate::asm::{BindingKind, Easm};
use crate::vm::{Inst, Opcode, MEMORY_CAPACITY, STACK_CAPACITY, WORD_SIZE};

// Writing into a String cannot fail, so the fmt::Result is dropped.
macro_rules! emit(
    ( $out:expr, $($arg:tt)* ) => { let _ = writeln!($out, $($arg)*); };
);

pub fn generate(easm: &Easm) -> Result<String, String> {
    let mut out = String::new();

    emit!(out, "BITS 64");
    emit!(out, "%define VM_STACK_CAPACITY {}", STACK_CAPACITY);
    emit!(out, "%define VM_WORD_SIZE {}", WORD_SIZE);
    emit!(out, "%define STDOUT 1");
    emit!(out, "%define SYS_EXIT 60");
    emit!(out, "%define SYS_WRITE 1");
    emit!(out, "segment .text");
    emit!(out, "global _start");

    for i in 0..easm.program_size as usize {
        for binding in easm.bindings() {
            if binding.kind == BindingKind::Label && binding.value.as_u64() == i as u64 {
                emit!(out, ";; -- {}: --", binding.name);
            }
        }
        if i as u64 == easm.entry {
            emit!(out, "_start:");
        }
        emit!(out, "inst_{}:", i);
        translate_inst(&mut out, i, easm.program[i])?;
    }

    emit!(out, "\tret");
    emit!(out, "segment .data");
    emit!(out, "stack_top: dq stack");
    if easm.program_size > 0 {
        let targets: Vec<String> =
            (0..easm.program_size).map(|i| format!("inst_{}", i)).collect();
        emit!(out, "inst_map: dq {}", targets.join(", "));
    } else {
        emit!(out, "inst_map:");
    }
    emit!(out, "memory:");
    for chunk in easm.memory[..easm.memory_size].chunks(10) {
        let bytes: Vec<String> = chunk.iter().map(|byte| byte.to_string()).collect();
        emit!(out, "\tdb {}", bytes.join(", "));
    }
    emit!(out, "\ttimes {} db 0", MEMORY_CAPACITY - easm.memory_size);
    emit!(out, "segment .bss");
    emit!(out, "stack: resq VM_STACK_CAPACITY");

    Ok(out)
}

// Load top into rbx and second-from-top into rax, leaving rsi at the
// second-from-top cell.
fn pop_two(out: &mut String) {
    emit!(out, "\tmov rsi, [stack_top]");
    emit!(out, "\tsub rsi, VM_WORD_SIZE");
    emit!(out, "\tmov rbx, [rsi]");
    emit!(out, "\tsub rsi, VM_WORD_SIZE");
    emit!(out, "\tmov rax, [rsi]");
}

// Store rax over the second-from-top cell and shrink the stack by one.
fn store_shrunk(out: &mut String) {
    emit!(out, "\tmov [rsi], rax");
    emit!(out, "\tadd rsi, VM_WORD_SIZE");
    emit!(out, "\tmov [stack_top], rsi");
}

fn binary_int(out: &mut String, body: &[&str]) {
    pop_two(out);
    for line in body {
        emit!(out, "\t{}", line);
    }
    store_shrunk(out);
}

fn binary_float(out: &mut String, op: &str) {
    emit!(out, "\tmov rsi, [stack_top]");
    emit!(out, "\tsub rsi, VM_WORD_SIZE");
    emit!(out, "\tmovsd xmm1, [rsi]");
    emit!(out, "\tsub rsi, VM_WORD_SIZE");
    emit!(out, "\tmovsd xmm0, [rsi]");
    emit!(out, "\t{} xmm0, xmm1", op);
    emit!(out, "\tmovsd [rsi], xmm0");
    emit!(out, "\tadd rsi, VM_WORD_SIZE");
    emit!(out, "\tmov [stack_top], rsi");
}

// cmp rax, rbx then materialize the flag as 0/1.
fn compare_int(out: &mut String, set: &str) {
    pop_two(out);
    emit!(out, "\tcmp rax, rbx");
    emit!(out, "\tmov rax, 0");
    emit!(out, "\t{} al", set);
    store_shrunk(out);
}

fn computed_jump(out: &mut String, target: u64) {
    emit!(out, "\tmov rdi, inst_map");
    emit!(out, "\tadd rdi, VM_WORD_SIZE * {}", target);
    emit!(out, "\tjmp [rdi]");
}

// Leave the top cell's memory address in rsi and the cell pointer in
// r11 for the read family.
fn memory_operand(out: &mut String) {
    emit!(out, "\tmov r11, [stack_top]");
    emit!(out, "\tsub r11, VM_WORD_SIZE");
    emit!(out, "\tmov rsi, [r11]");
    emit!(out, "\tadd rsi, memory");
}

fn translate_inst(out: &mut String, index: usize, inst: Inst) -> Result<(), String> {
    let operand = inst.operand.as_u64();
    match inst.kind {
        Opcode::Nop => {
            emit!(out, "\t;; nop");
        }

        Opcode::Push => {
            emit!(out, "\t;; push {}", operand);
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tmov rax, {:#x}", operand);
            emit!(out, "\tmov QWORD [rsi], rax");
            emit!(out, "\tadd QWORD [stack_top], VM_WORD_SIZE");
        }

        Opcode::Drop => {
            emit!(out, "\t;; drop");
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tmov [stack_top], rsi");
        }

        Opcode::Dup => {
            emit!(out, "\t;; dup {}", operand);
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tmov rdi, rsi");
            emit!(out, "\tsub rdi, VM_WORD_SIZE * ({} + 1)", operand);
            emit!(out, "\tmov rax, [rdi]");
            emit!(out, "\tmov [rsi], rax");
            emit!(out, "\tadd rsi, VM_WORD_SIZE");
            emit!(out, "\tmov [stack_top], rsi");
        }

        Opcode::Swap => {
            emit!(out, "\t;; swap {}", operand);
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tmov rdi, rsi");
            emit!(out, "\tsub rdi, VM_WORD_SIZE * {}", operand);
            emit!(out, "\tmov rax, [rsi]");
            emit!(out, "\tmov rbx, [rdi]");
            emit!(out, "\tmov [rdi], rax");
            emit!(out, "\tmov [rsi], rbx");
        }

        Opcode::Plusi => {
            emit!(out, "\t;; plusi");
            binary_int(out, &["add rax, rbx"]);
        }

        Opcode::Minusi => {
            emit!(out, "\t;; minusi");
            binary_int(out, &["sub rax, rbx"]);
        }

        Opcode::Multi => {
            emit!(out, "\t;; multi");
            binary_int(out, &["imul rax, rbx"]);
        }

        Opcode::Multu => {
            emit!(out, "\t;; multu");
            binary_int(out, &["mul rbx"]);
        }

        Opcode::Divi => {
            emit!(out, "\t;; divi");
            binary_int(out, &["cqo", "idiv rbx"]);
        }

        Opcode::Divu => {
            emit!(out, "\t;; divu");
            binary_int(out, &["xor rdx, rdx", "div rbx"]);
        }

        Opcode::Modi => {
            emit!(out, "\t;; modi");
            binary_int(out, &["cqo", "idiv rbx", "mov rax, rdx"]);
        }

        Opcode::Modu => {
            emit!(out, "\t;; modu");
            binary_int(out, &["xor rdx, rdx", "div rbx", "mov rax, rdx"]);
        }

        Opcode::Plusf => {
            emit!(out, "\t;; plusf");
            binary_float(out, "addsd");
        }

        Opcode::Minusf => {
            emit!(out, "\t;; minusf");
            binary_float(out, "subsd");
        }

        Opcode::Multf => {
            emit!(out, "\t;; multf");
            binary_float(out, "mulsd");
        }

        Opcode::Divf => {
            emit!(out, "\t;; divf");
            binary_float(out, "divsd");
        }

        Opcode::Jmp => {
            emit!(out, "\t;; jmp {}", operand);
            computed_jump(out, operand);
        }

        Opcode::JmpIf => {
            emit!(out, "\t;; jmp_if {}", operand);
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tmov rax, [rsi]");
            emit!(out, "\tmov [stack_top], rsi");
            emit!(out, "\tcmp rax, 0");
            emit!(out, "\tje .skip");
            computed_jump(out, operand);
            emit!(out, ".skip:");
        }

        Opcode::Ret => {
            emit!(out, "\t;; ret");
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tmov rax, [rsi]");
            emit!(out, "\tmov rbx, VM_WORD_SIZE");
            emit!(out, "\tmul rbx");
            emit!(out, "\tadd rax, inst_map");
            emit!(out, "\tmov [stack_top], rsi");
            emit!(out, "\tjmp [rax]");
        }

        Opcode::Call => {
            emit!(out, "\t;; call {}", operand);
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tmov QWORD [rsi], {}", index + 1);
            emit!(out, "\tadd rsi, VM_WORD_SIZE");
            emit!(out, "\tmov [stack_top], rsi");
            computed_jump(out, operand);
        }

        Opcode::Native => match operand {
            // Index 0 is write in the standard native table.
            0 => {
                emit!(out, "\t;; native write");
                emit!(out, "\tmov r11, [stack_top]");
                emit!(out, "\tsub r11, VM_WORD_SIZE");
                emit!(out, "\tmov rdx, [r11]");
                emit!(out, "\tsub r11, VM_WORD_SIZE");
                emit!(out, "\tmov rsi, [r11]");
                emit!(out, "\tadd rsi, memory");
                emit!(out, "\tmov rdi, STDOUT");
                emit!(out, "\tmov rax, SYS_WRITE");
                emit!(out, "\tmov [stack_top], r11");
                emit!(out, "\tsyscall");
            }
            index => {
                return Err(format!(
                    "native function {} is not supported by the native code generator",
                    index
                ))
            }
        },

        Opcode::Not => {
            emit!(out, "\t;; not");
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tmov rax, [rsi]");
            emit!(out, "\tcmp rax, 0");
            emit!(out, "\tmov rax, 0");
            emit!(out, "\tsetz al");
            emit!(out, "\tmov [rsi], rax");
        }

        Opcode::Eqi => {
            emit!(out, "\t;; eqi");
            compare_int(out, "sete");
        }
        Opcode::Gei => {
            emit!(out, "\t;; gei");
            compare_int(out, "setge");
        }
        Opcode::Gti => {
            emit!(out, "\t;; gti");
            compare_int(out, "setg");
        }
        Opcode::Lei => {
            emit!(out, "\t;; lei");
            compare_int(out, "setle");
        }
        Opcode::Lti => {
            emit!(out, "\t;; lti");
            compare_int(out, "setl");
        }
        Opcode::Nei => {
            emit!(out, "\t;; nei");
            compare_int(out, "setne");
        }

        Opcode::Equ => {
            emit!(out, "\t;; equ");
            compare_int(out, "sete");
        }
        Opcode::Geu => {
            emit!(out, "\t;; geu");
            compare_int(out, "setae");
        }
        Opcode::Gtu => {
            emit!(out, "\t;; gtu");
            compare_int(out, "seta");
        }
        Opcode::Leu => {
            emit!(out, "\t;; leu");
            compare_int(out, "setbe");
        }
        Opcode::Ltu => {
            emit!(out, "\t;; ltu");
            compare_int(out, "setb");
        }
        Opcode::Neu => {
            emit!(out, "\t;; neu");
            compare_int(out, "setne");
        }

        Opcode::Andb => {
            emit!(out, "\t;; andb");
            binary_int(out, &["and rax, rbx"]);
        }
        Opcode::Orb => {
            emit!(out, "\t;; orb");
            binary_int(out, &["or rax, rbx"]);
        }
        Opcode::Xor => {
            emit!(out, "\t;; xor");
            binary_int(out, &["xor rax, rbx"]);
        }
        Opcode::Shr => {
            emit!(out, "\t;; shr");
            binary_int(out, &["mov rcx, rbx", "shr rax, cl"]);
        }
        Opcode::Shl => {
            emit!(out, "\t;; shl");
            binary_int(out, &["mov rcx, rbx", "shl rax, cl"]);
        }

        Opcode::Notb => {
            emit!(out, "\t;; notb");
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tmov rax, [rsi]");
            emit!(out, "\tnot rax");
            emit!(out, "\tmov [rsi], rax");
        }

        Opcode::Read8 => {
            emit!(out, "\t;; read8");
            memory_operand(out);
            emit!(out, "\txor rax, rax");
            emit!(out, "\tmov al, BYTE [rsi]");
            emit!(out, "\tmov [r11], rax");
        }
        Opcode::Read16 => {
            emit!(out, "\t;; read16");
            memory_operand(out);
            emit!(out, "\tmovzx rax, WORD [rsi]");
            emit!(out, "\tmov [r11], rax");
        }
        Opcode::Read32 => {
            emit!(out, "\t;; read32");
            memory_operand(out);
            emit!(out, "\tmov eax, DWORD [rsi]");
            emit!(out, "\tmov [r11], rax");
        }
        Opcode::Read64 => {
            emit!(out, "\t;; read64");
            memory_operand(out);
            emit!(out, "\tmov rax, QWORD [rsi]");
            emit!(out, "\tmov [r11], rax");
        }

        Opcode::Write8 => {
            emit!(out, "\t;; write8");
            memory_write(out, "BYTE [rsi], al");
        }
        Opcode::Write16 => {
            emit!(out, "\t;; write16");
            memory_write(out, "WORD [rsi], ax");
        }
        Opcode::Write32 => {
            emit!(out, "\t;; write32");
            memory_write(out, "DWORD [rsi], eax");
        }
        Opcode::Write64 => {
            emit!(out, "\t;; write64");
            memory_write(out, "QWORD [rsi], rax");
        }

        Opcode::I2f => {
            emit!(out, "\t;; i2f");
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tcvtsi2sd xmm0, QWORD [rsi]");
            emit!(out, "\tmovsd [rsi], xmm0");
        }

        Opcode::F2i => {
            emit!(out, "\t;; f2i");
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tcvttsd2si rax, QWORD [rsi]");
            emit!(out, "\tmov [rsi], rax");
        }

        // f2u goes through the signed conversion, same as the
        // interpreter.
        Opcode::F2u => {
            emit!(out, "\t;; f2u");
            emit!(out, "\tmov rsi, [stack_top]");
            emit!(out, "\tsub rsi, VM_WORD_SIZE");
            emit!(out, "\tcvttsd2si rax, QWORD [rsi]");
            emit!(out, "\tmov [rsi], rax");
        }

        Opcode::Halt => {
            emit!(out, "\t;; halt");
            emit!(out, "\tmov rax, SYS_EXIT");
            emit!(out, "\tmov rdi, 0");
            emit!(out, "\tsyscall");
        }

        Opcode::U2f
        | Opcode::Eqf
        | Opcode::Gef
        | Opcode::Gtf
        | Opcode::Lef
        | Opcode::Ltf
        | Opcode::Nef => {
            return Err(format!(
                "instruction `{}` is not supported by the native code generator",
                inst.kind.name()
            ))
        }
    }
    Ok(())
}

// value is on top, address below it.
fn memory_write(out: &mut String, store: &str) {
    emit!(out, "\tmov r11, [stack_top]");
    emit!(out, "\tsub r11, VM_WORD_SIZE");
    emit!(out, "\tmov rax, [r11]");
    emit!(out, "\tsub r11, VM_WORD_SIZE");
    emit!(out, "\tmov rsi, [r11]");
    emit!(out, "\tadd rsi, memory");
    emit!(out, "\tmov {}", store);
    emit!(out, "\tmov [stack_top], r11");
}
