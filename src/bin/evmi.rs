// The interpreter driver: load an object file and run it to halt or
// trap. Prints nothing of its own, so a program's stdout matches the
// NASM-compiled binary byte for byte.

use std::env::args;

use evm::fatal;
use evm::natives;
use evm::vm::Evm;

fn main() {
    let input_path = match args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: evmi <input.evm>");
            fatal!("ERROR: expected input");
        }
    };

    let mut machine = Box::new(Evm::new());
    if let Err(diagnostic) = machine.load_program_from_file(&input_path) {
        fatal!("ERROR: {}", diagnostic);
    }
    natives::load_standard_natives(&mut machine);

    if let Err(trap) = machine.execute_program(-1) {
        fatal!("ERROR: trap activated: {}", trap);
    }
}
