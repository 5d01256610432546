// (C) 2020 Brandon Lewis
//
// The debugger core behind edbug.
//
// Owns a machine by value plus one breakpoint slot and one label slot
// per program address. Labels come from the optional symbol file
// written by `easm -g`; a missing file just means a debugger without
// names. A hit breakpoint latches (is_broken) so that the next
// continue steps over it instead of stopping forever on the same
// address.

use std::fs;
use std::io;

use crate::natives;
use crate::vm::{Evm, InstAddr, Trap, PROGRAM_CAPACITY};

#[derive(Copy, Clone, Default)]
pub struct Breakpoint {
    pub is_enabled: bool,
    is_broken: bool,
}

pub struct Debugger {
    pub evm: Evm,
    breakpoints: Vec<Breakpoint>,
    labels: Vec<Option<String>>,
}

impl Debugger {
    pub fn new() -> Debugger {
        Debugger {
            evm: Evm::new(),
            breakpoints: vec![Breakpoint::default(); PROGRAM_CAPACITY],
            labels: vec![None; PROGRAM_CAPACITY],
        }
    }

    // Loads the program, installs the standard natives, and picks up
    // `<path>.sym` when it exists. The machine starts halted; `r`
    // releases it.
    pub fn load(&mut self, file_path: &str) -> Result<(), String> {
        self.evm.load_program_from_file(file_path)?;
        self.evm.halt = true;
        natives::load_standard_natives(&mut self.evm);
        self.load_symbols(&format!("{}.sym", file_path));
        Ok(())
    }

    pub fn load_symbols(&mut self, file_path: &str) {
        let text = match fs::read_to_string(file_path) {
            Ok(text) => text,
            Err(_) => return,
        };
        for line in text.lines() {
            let mut parts = line.splitn(2, '\t');
            let addr = parts.next().and_then(|text| text.trim().parse::<u64>().ok());
            let name = parts.next();
            if let (Some(addr), Some(name)) = (addr, name) {
                if (addr as usize) < PROGRAM_CAPACITY {
                    self.labels[addr as usize] = Some(name.to_string());
                }
            }
        }
    }

    pub fn label_at(&self, addr: InstAddr) -> Option<&str> {
        self.labels
            .get(addr as usize)
            .and_then(|slot| slot.as_ref())
            .map(|name| name.as_str())
    }

    pub fn find_label(&self, name: &str) -> Option<InstAddr> {
        self.labels
            .iter()
            .position(|slot| slot.as_ref().map(|label| label == name).unwrap_or(false))
            .map(|addr| addr as InstAddr)
    }

    pub fn parse_addr_or_label(&self, text: &str) -> Option<InstAddr> {
        if text.is_empty() {
            return None;
        }
        if let Ok(addr) = text.parse::<u64>() {
            return Some(addr);
        }
        self.find_label(text)
    }

    pub fn step(&mut self) {
        if self.evm.halt {
            eprintln!("ERR : program is not being run");
            return;
        }
        if let Err(trap) = self.evm.execute_inst() {
            self.fault(trap);
        }
    }

    pub fn run_continue(&mut self) {
        if self.evm.halt {
            eprintln!("ERR : program is not being run");
            return;
        }
        loop {
            let ip = self.evm.ip as usize;
            if ip < PROGRAM_CAPACITY {
                let breakpoint = &mut self.breakpoints[ip];
                let hit = breakpoint.is_enabled && !breakpoint.is_broken;
                breakpoint.is_broken = hit;
                if hit {
                    print!("hit breakpoint at {}", self.evm.ip);
                    if let Some(name) = self.label_at(self.evm.ip) {
                        print!(" label `{}`", name);
                    }
                    println!();
                    return;
                }
            }

            if let Err(trap) = self.evm.execute_inst() {
                self.fault(trap);
                return;
            }
            if self.evm.halt {
                println!("program halted.");
                return;
            }
        }
    }

    // Report the trap with the offending instruction and park the
    // machine.
    pub fn fault(&mut self, trap: Trap) {
        eprint!("{} at {} (INSTR: ", trap, self.evm.ip);
        if self.evm.ip < self.evm.program_size {
            eprint!("{}", self.evm.program[self.evm.ip as usize]);
        } else {
            eprint!("???");
        }
        eprintln!(")");
        self.evm.halt = true;
    }

    pub fn add_breakpoint(&mut self, addr: InstAddr) -> bool {
        if addr as usize >= PROGRAM_CAPACITY {
            eprintln!("ERR : address is outside of the program capacity");
            return false;
        }
        if addr > self.evm.program_size {
            eprintln!("ERR : address is outside of the program");
            return false;
        }
        if self.breakpoints[addr as usize].is_enabled {
            eprintln!("ERR : breakpoint is already set at {}", addr);
            return false;
        }
        self.breakpoints[addr as usize].is_enabled = true;
        true
    }

    pub fn delete_breakpoint(&mut self, addr: InstAddr) -> bool {
        if addr as usize >= PROGRAM_CAPACITY {
            eprintln!("ERR : address is outside of the program capacity");
            return false;
        }
        if addr > self.evm.program_size {
            eprintln!("ERR : address is outside of the program");
            return false;
        }
        if !self.breakpoints[addr as usize].is_enabled {
            eprintln!("ERR : no breakpoint at {}", addr);
            return false;
        }
        self.breakpoints[addr as usize].is_enabled = false;
        true
    }

    pub fn dump_stack<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        self.evm.dump_stack(out)
    }
}

impl Default for Debugger {
    fn default() -> Debugger {
        Debugger::new()
    }
}
