// The native lowering driver: translate an assembly source and render
// it as x86-64 NASM, ready for `nasm -felf64` and `ld`.

use std::env::args;
use std::fs;

use bumpalo::Bump;

use evm::asm::Easm;
use evm::fatal;
use evm::nasm;

fn main() {
    let mut arguments = args().skip(1);
    let (input_path, output_path) = match (arguments.next(), arguments.next()) {
        (Some(input), Some(output)) => (input, output),
        _ => {
            eprintln!("usage: easm2nasm <input.easm> <output.asm>");
            fatal!("ERROR: expected input and output");
        }
    };

    let arena = Bump::new();
    let mut easm = Easm::new(&arena);
    if let Err(diagnostic) = easm.translate_file(&input_path) {
        fatal!("{}", diagnostic);
    }

    match nasm::generate(&easm) {
        Ok(text) => {
            if let Err(err) = fs::write(&output_path, text) {
                fatal!("ERROR: could not write `{}`: {}", output_path, err);
            }
        }
        Err(diagnostic) => fatal!("ERROR: {}", diagnostic),
    }
}
