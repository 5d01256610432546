// The disassembler driver: one line per instruction, preceded by an
// `#entry` line, so the output can be fed straight back to easm.

use std::env::args;

use evm::fatal;
use evm::vm::Evm;

fn main() {
    let input_path = match args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: deasm <input.evm>");
            fatal!("ERROR: expected input");
        }
    };

    let mut machine = Box::new(Evm::new());
    if let Err(diagnostic) = machine.load_program_from_file(&input_path) {
        fatal!("ERROR: {}", diagnostic);
    }

    // The loader parks the entry address in ip.
    println!("#entry {}", machine.ip);
    for i in 0..machine.program_size as usize {
        println!("{}", machine.program[i]);
    }
}
