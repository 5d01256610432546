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
//
// The REPL debugger. A blank line repeats the previous command.

use std::env::args;
use std::io::{self, Write};

use evm::debug::Debugger;
use evm::fatal;

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim()),
        None => (text, ""),
    }
}

fn help() {
    println!(
        "r            - run the program\n\
         n            - next instruction\n\
         c            - continue execution\n\
         s            - stack dump\n\
         i            - instruction pointer\n\
         x ADDR COUNT - memory dump\n\
         b ADDR|LABEL - set a breakpoint\n\
         d ADDR|LABEL - delete a breakpoint\n\
         h            - this help\n\
         q            - quit"
    );
}

fn main() {
    let input_path = match args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: edbug <input.evm>");
            fatal!("ERROR: expected input");
        }
    };

    println!("edbug - the evm debugger.");
    println!("type `h` and press enter for a quick help");

    let mut debugger = Box::new(Debugger::new());
    if let Err(diagnostic) = debugger.load(&input_path) {
        fatal!("ERROR: {}", diagnostic);
    }

    let stdin = io::stdin();
    let mut previous = String::new();
    loop {
        print!("(edbug) ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let input = line.trim().to_string();
        let command = if input.is_empty() { previous.clone() } else { input };
        previous = command.clone();

        let (word, rest) = split_word(&command);
        match word {
            "" => {}

            "r" => {
                if !debugger.evm.halt {
                    eprintln!("ERR : program is already running");
                }
                // TODO: reset ip and stack to rerun from the entry
                // after a previous halt.
                debugger.evm.halt = false;
                debugger.run_continue();
            }

            "n" => {
                debugger.step();
                if debugger.evm.ip < debugger.evm.program_size {
                    println!("-> {}", debugger.evm.program[debugger.evm.ip as usize]);
                }
            }

            "c" => debugger.run_continue(),

            "s" => {
                let _ = debugger.dump_stack(&mut io::stdout());
            }

            "i" => println!("ip = {}", debugger.evm.ip),

            "x" => {
                let (addr_text, count_text) = split_word(rest);
                let addr = addr_text.parse::<usize>();
                let count = count_text.parse::<usize>();
                match (addr, count) {
                    (Ok(addr), Ok(count)) => {
                        let _ = debugger.evm.dump_memory(&mut io::stdout(), addr, count);
                    }
                    _ => eprintln!("ERR : usage: x ADDR COUNT"),
                }
            }

            "b" => match debugger.parse_addr_or_label(rest) {
                Some(addr) => {
                    if debugger.add_breakpoint(addr) {
                        println!("INFO : breakpoint set at {}", addr);
                    }
                }
                None => eprintln!("ERR : cannot parse address or label"),
            },

            "d" => match debugger.parse_addr_or_label(rest) {
                Some(addr) => {
                    if debugger.delete_breakpoint(addr) {
                        println!("INFO : deleted breakpoint at {}", addr);
                    }
                }
                None => eprintln!("ERR : cannot parse address or label"),
            },

            "h" => help(),

            "q" => return,

            _ => eprintln!("?"),
        }
    }
}
