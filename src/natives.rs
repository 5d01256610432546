// The standard host callbacks.
//
// Natives are ordinary functions dispatched by index from the native
// instruction. They see the whole machine and report failures through
// the same trap set as the engine. Index 0 (write) is the only native
// the NASM backend knows how to lower.

use std::io::{self, Write};

use crate::vm::{Evm, Result, Trap, MEMORY_CAPACITY};
use crate::word::Word;

// Installs write at index 0 and the printers behind it.
pub fn load_standard_natives(evm: &mut Evm) {
    evm.push_native(write); // 0
    evm.push_native(print_u64); // 1
    evm.push_native(print_i64); // 2
    evm.push_native(print_f64); // 3
}

// Pops count (top) and addr, writes memory[addr..addr + count] to
// stdout.
pub fn write(evm: &mut Evm) -> Result<()> {
    if evm.stack_size < 2 {
        return Err(Trap::StackUnderflow);
    }
    let count = evm.stack[(evm.stack_size - 1) as usize].as_u64();
    let addr = evm.stack[(evm.stack_size - 2) as usize].as_u64();

    let end = addr.checked_add(count).ok_or(Trap::IllegalMemoryAccess)?;
    if end > MEMORY_CAPACITY as u64 {
        return Err(Trap::IllegalMemoryAccess);
    }

    let _ = io::stdout().write_all(&evm.memory[addr as usize..end as usize]);
    evm.stack_size -= 2;
    Ok(())
}

pub fn print_u64(evm: &mut Evm) -> Result<()> {
    let word = pop(evm)?;
    println!("{}", word.as_u64());
    Ok(())
}

pub fn print_i64(evm: &mut Evm) -> Result<()> {
    let word = pop(evm)?;
    println!("{}", word.as_i64());
    Ok(())
}

pub fn print_f64(evm: &mut Evm) -> Result<()> {
    let word = pop(evm)?;
    println!("{}", word.as_f64());
    Ok(())
}

fn pop(evm: &mut Evm) -> Result<Word> {
    if evm.stack_size < 1 {
        return Err(Trap::StackUnderflow);
    }
    evm.stack_size -= 1;
    Ok(evm.stack[evm.stack_size as usize])
}
