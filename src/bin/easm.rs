// evm: a 64-bit stack machine and its assembler.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::env::args;

use bumpalo::Bump;

use evm::asm::Easm;
use evm::fatal;

fn usage() {
    eprintln!("usage: easm [-g] <input.easm> <output.evm>");
}

fn main() {
    let mut emit_symbols = false;
    let mut paths: Vec<String> = Vec::new();
    for arg in args().skip(1) {
        if arg == "-g" {
            emit_symbols = true;
        } else {
            paths.push(arg);
        }
    }

    if paths.len() < 2 {
        usage();
        fatal!("ERROR: expected input and output");
    }
    let input_path = &paths[0];
    let output_path = &paths[1];

    let arena = Bump::new();
    let mut easm = Easm::new(&arena);
    if let Err(diagnostic) = easm.translate_file(input_path) {
        fatal!("{}", diagnostic);
    }
    if let Err(diagnostic) = easm.save(output_path) {
        fatal!("{}", diagnostic);
    }
    if emit_symbols {
        let symbols_path = format!("{}.sym", output_path);
        if let Err(diagnostic) = easm.save_symbols(&symbols_path) {
            fatal!("{}", diagnostic);
        }
    }
}
