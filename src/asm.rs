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
// The assembler.
//
// Translation is two-pass and line-oriented. The first pass emits
// instructions in program order, binding labels as it meets them and
// queueing any operand it cannot read as a literal. The second pass
// patches the queued operands from the binding table, then resolves
// the entry point. Including a file just runs the first pass of that
// file inside the same state, so the second pass sees one flat
// program no matter how the source was split up.
//
// Every string the assembler hangs on to -- source text, binding
// names, deferred operand text, file paths -- lives in one bump arena
// owned by the caller. The state borrows the arena; drop the arena
// and the state goes with it.
//
// Diagnostics are fatal and pre-formatted (`PATH:LINE: ERROR: ...`).
// There is no recovery and no accumulation: the first error wins.

use std::fmt;
use std::fs;

use bumpalo::Bump;
use enumflags2::BitFlags;
use regex::Regex;

use crate::object;
use crate::vm::{Inst, InstAddr, Opcode, MEMORY_CAPACITY, PROGRAM_CAPACITY};
use crate::word::Word;

pub const BINDINGS_CAPACITY: usize = 1024;
pub const DEFERRED_OPERANDS_CAPACITY: usize = 1024;
pub const MAX_INCLUDE_LEVEL: usize = 64;

pub const COMMENT_CHAR: char = ';';
pub const DIRECTIVE_CHAR: char = '#';

// Diagnostics are fatal, so the error side is just the rendered text.
pub type AsmResult<T> = std::result::Result<T, String>;

#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum BindingKind {
    Const = 0b001,
    Label = 0b010,
    Native = 0b100,
}

// The set of binding kinds an operand site will accept.
pub type KindSet = BitFlags<BindingKind>;

impl BindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BindingKind::Const => "const",
            BindingKind::Label => "label",
            BindingKind::Native => "native",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn kind_set_names(set: KindSet) -> String {
    let names: Vec<&str> = set.iter().map(BindingKind::as_str).collect();
    names.join(" or ")
}

#[derive(Copy, Clone, Debug)]
pub struct FileLocation<'a> {
    pub file_path: &'a str,
    pub line_number: usize,
}

impl<'a> fmt::Display for FileLocation<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.file_path, self.line_number)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Binding<'a> {
    pub kind: BindingKind,
    pub name: &'a str,
    pub value: Word,
    pub location: FileLocation<'a>,
}

#[derive(Copy, Clone, Debug)]
struct DeferredOperand<'a> {
    addr: InstAddr,
    name: &'a str,
    location: FileLocation<'a>,
}

pub struct Easm<'a> {
    arena: &'a Bump,

    bindings: Vec<Binding<'a>>,
    deferred_operands: Vec<DeferredOperand<'a>>,

    // Mirrors the machine's layout so saving is a structural copy.
    pub program: [Inst; PROGRAM_CAPACITY],
    pub program_size: u64,
    pub memory: [u8; MEMORY_CAPACITY],
    pub memory_size: usize,
    pub memory_capacity: usize,

    pub entry: InstAddr,
    pub has_entry: bool,
    deferred_entry_name: Option<&'a str>,
    entry_location: Option<FileLocation<'a>>,

    include_level: usize,
}

lazy_static! {
    static ref CHAR_LITERAL: Regex = Regex::new("^'(.)'$").unwrap();
    static ref STRING_LITERAL: Regex = Regex::new("^\"([^\"]*)\"$").unwrap();
}

// Split off the first whitespace-delimited token.
fn chop_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim_start()),
        None => (text, ""),
    }
}

impl<'a> Easm<'a> {
    pub fn new(arena: &'a Bump) -> Easm<'a> {
        Easm {
            arena,
            bindings: Vec::new(),
            deferred_operands: Vec::new(),
            program: [Inst::new(Opcode::Nop); PROGRAM_CAPACITY],
            program_size: 0,
            memory: [0; MEMORY_CAPACITY],
            memory_size: 0,
            memory_capacity: 0,
            entry: 0,
            has_entry: false,
            deferred_entry_name: None,
            entry_location: None,
            include_level: 0,
        }
    }

    pub fn bindings(&self) -> &[Binding<'a>] {
        &self.bindings
    }

    pub fn translate_file(&mut self, file_path: &str) -> AsmResult<()> {
        let source = fs::read_to_string(file_path)
            .map_err(|err| format!("ERROR: could not read `{}`: {}", file_path, err))?;
        self.translate_source(file_path, &source)
    }

    // Translate one source unit. The deferred passes only run once
    // the outermost unit is done, so included files may refer to
    // names that are bound later in the including file.
    pub fn translate_source(&mut self, file_path: &str, source: &str) -> AsmResult<()> {
        let arena = self.arena;
        let file_path: &'a str = arena.alloc_str(file_path);
        let source: &'a str = arena.alloc_str(source);

        self.first_pass(file_path, source)?;

        if self.include_level == 0 {
            self.resolve_deferred_operands()?;
            self.resolve_deferred_entry()?;
        }
        Ok(())
    }

    fn first_pass(&mut self, file_path: &'a str, source: &'a str) -> AsmResult<()> {
        for (index, raw_line) in source.lines().enumerate() {
            let location = FileLocation { file_path, line_number: index + 1 };

            let line = match raw_line.find(COMMENT_CHAR) {
                Some(at) => &raw_line[..at],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix(DIRECTIVE_CHAR) {
                self.directive(rest, location)?;
                continue;
            }

            let (mut token, mut rest) = chop_word(line);

            if token.ends_with(':') {
                let name = &token[..token.len() - 1];
                self.bind_value(name, Word::from_u64(self.program_size), BindingKind::Label, location)?;
                let (next_token, next_rest) = chop_word(rest);
                token = next_token;
                rest = next_rest;
            }

            if token.is_empty() {
                continue;
            }

            let kind = Opcode::by_name(token)
                .ok_or_else(|| format!("{}: ERROR: unknown instruction `{}`", location, token))?;

            assert!((self.program_size as usize) < PROGRAM_CAPACITY, "program capacity exceeded");

            let operand_text = rest.trim();
            let mut inst = Inst::new(kind);
            if kind.has_operand() {
                if operand_text.is_empty() {
                    return Err(format!(
                        "{}: ERROR: instruction `{}` requires an operand",
                        location, token
                    ));
                }
                match self.translate_literal(operand_text) {
                    Some(word) => inst.operand = word,
                    None => self.push_deferred_operand(self.program_size, operand_text, location),
                }
            } else if !operand_text.is_empty() {
                return Err(format!(
                    "{}: ERROR: instruction `{}` does not take an operand",
                    location, token
                ));
            }

            self.program[self.program_size as usize] = inst;
            self.program_size += 1;
        }
        Ok(())
    }

    fn directive(&mut self, line: &'a str, location: FileLocation<'a>) -> AsmResult<()> {
        let (name, rest) = chop_word(line);
        match name {
            "const" => {
                let (binding_name, value_text) = chop_word(rest);
                if binding_name.is_empty() {
                    return Err(format!("{}: ERROR: binding name is not provided", location));
                }
                let value_text = value_text.trim();
                let word = self.translate_literal(value_text).ok_or_else(|| {
                    format!("{}: ERROR: `{}` is not a valid literal", location, value_text)
                })?;
                self.bind_value(binding_name, word, BindingKind::Const, location)
            }

            "native" => {
                let (binding_name, value_text) = chop_word(rest);
                if binding_name.is_empty() {
                    return Err(format!("{}: ERROR: binding name is not provided", location));
                }
                let value_text = value_text.trim();
                let word = self.translate_literal(value_text).ok_or_else(|| {
                    format!("{}: ERROR: `{}` is not a number", location, value_text)
                })?;
                self.bind_value(binding_name, word, BindingKind::Native, location)
            }

            "include" => {
                let path_text = rest.trim();
                let captures = STRING_LITERAL.captures(path_text).ok_or_else(|| {
                    format!(
                        "{}: ERROR: include path must be surrounded by quotation marks",
                        location
                    )
                })?;
                let path = match captures.get(1) {
                    Some(path) => path.as_str(),
                    None => "",
                };
                if self.include_level + 1 >= MAX_INCLUDE_LEVEL {
                    return Err(format!("{}: ERROR: exceeded maximum include level", location));
                }
                self.include_level += 1;
                let result = self.translate_file(path);
                self.include_level -= 1;
                result
            }

            "entry" => {
                if self.has_entry {
                    let mut message =
                        format!("{}: ERROR: entry point has already been set", location);
                    if let Some(first) = self.entry_location {
                        message.push_str(&format!(
                            "\n{}: NOTE: the first entry point is here",
                            first
                        ));
                    }
                    return Err(message);
                }
                let text = rest.trim();
                if text.is_empty() {
                    return Err(format!("{}: ERROR: entry point is not specified", location));
                }
                match self.translate_literal(text) {
                    Some(word) => self.entry = word.as_u64(),
                    None => self.deferred_entry_name = Some(text),
                }
                self.has_entry = true;
                self.entry_location = Some(location);
                Ok(())
            }

            unknown => Err(format!(
                "{}: ERROR: unknown pre-processor directive `{}{}`",
                location, DIRECTIVE_CHAR, unknown
            )),
        }
    }

    // Reads a literal: u64, f64, a single-byte character, or a string
    // (which lands in memory; the literal's value is its offset).
    // Characters accept exactly one byte: multi-byte UTF-8 content is
    // rejected, and there are no escape sequences.
    pub fn translate_literal(&mut self, text: &str) -> Option<Word> {
        if let Some(captures) = CHAR_LITERAL.captures(text) {
            let content = captures.get(1)?.as_str();
            if content.len() != 1 {
                return None;
            }
            return Some(Word::from_u64(content.as_bytes()[0] as u64));
        }
        if let Some(captures) = STRING_LITERAL.captures(text) {
            let content = captures.get(1)?.as_str();
            return Some(self.push_string_to_memory(content));
        }
        // Numbers start with a digit; anything else is a name.
        if !text.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        if let Ok(value) = text.parse::<u64>() {
            return Some(Word::from_u64(value));
        }
        if let Ok(value) = text.parse::<f64>() {
            return Some(Word::from_f64(value));
        }
        None
    }

    pub fn push_string_to_memory(&mut self, text: &str) -> Word {
        let bytes = text.as_bytes();
        assert!(self.memory_size + bytes.len() <= MEMORY_CAPACITY, "memory capacity exceeded");

        let result = Word::from_u64(self.memory_size as u64);
        self.memory[self.memory_size..self.memory_size + bytes.len()].copy_from_slice(bytes);
        self.memory_size += bytes.len();

        if self.memory_size > self.memory_capacity {
            self.memory_capacity = self.memory_size;
        }
        result
    }

    pub fn resolve_binding(&self, name: &str) -> Option<Binding<'a>> {
        self.bindings.iter().find(|binding| binding.name == name).copied()
    }

    pub fn bind_value(
        &mut self,
        name: &'a str,
        value: Word,
        kind: BindingKind,
        location: FileLocation<'a>,
    ) -> AsmResult<()> {
        assert!(self.bindings.len() < BINDINGS_CAPACITY, "bindings capacity exceeded");
        if let Some(existing) = self.resolve_binding(name) {
            return Err(format!(
                "{}: ERROR: name `{}` is already bound as {}\n{}: NOTE: the first binding is here",
                location, name, existing.kind, existing.location
            ));
        }
        self.bindings.push(Binding { kind, name, value, location });
        Ok(())
    }

    fn push_deferred_operand(&mut self, addr: InstAddr, name: &'a str, location: FileLocation<'a>) {
        assert!(
            self.deferred_operands.len() < DEFERRED_OPERANDS_CAPACITY,
            "deferred operands capacity exceeded"
        );
        self.deferred_operands.push(DeferredOperand { addr, name, location });
    }

    fn resolve_deferred_operands(&mut self) -> AsmResult<()> {
        for i in 0..self.deferred_operands.len() {
            let deferred = self.deferred_operands[i];
            let binding = self.resolve_binding(deferred.name).ok_or_else(|| {
                format!("{}: ERROR: unknown name `{}`", deferred.location, deferred.name)
            })?;

            let accepted: KindSet = match self.program[deferred.addr as usize].kind {
                Opcode::Call => BindingKind::Label.into(),
                Opcode::Native => BindingKind::Native.into(),
                _ => BindingKind::Const | BindingKind::Label | BindingKind::Native,
            };
            if !accepted.contains(binding.kind) {
                return Err(format!(
                    "{}: ERROR: `{}` is a {}, but this operand accepts only a {}\n{}: NOTE: `{}` is bound here",
                    deferred.location,
                    deferred.name,
                    binding.kind,
                    kind_set_names(accepted),
                    binding.location,
                    deferred.name
                ));
            }

            self.program[deferred.addr as usize].operand = binding.value;
        }
        Ok(())
    }

    fn resolve_deferred_entry(&mut self) -> AsmResult<()> {
        let (name, location) = match (self.deferred_entry_name, self.entry_location) {
            (Some(name), Some(location)) => (name, location),
            _ => return Ok(()),
        };

        let binding = self
            .resolve_binding(name)
            .ok_or_else(|| format!("{}: ERROR: unknown name `{}`", location, name))?;
        if binding.kind != BindingKind::Label {
            return Err(format!(
                "{}: ERROR: entry point must be a label, but `{}` is a {}\n{}: NOTE: `{}` is bound here",
                location, name, binding.kind, binding.location, name
            ));
        }
        self.entry = binding.value.as_u64();
        self.deferred_entry_name = None;
        Ok(())
    }

    pub fn save(&self, file_path: &str) -> AsmResult<()> {
        let meta = object::Meta {
            magic: object::FILE_MAGIC,
            version: object::FILE_VERSION,
            program_size: self.program_size,
            entry: self.entry,
            memory_size: self.memory_size as u64,
            memory_capacity: self.memory_capacity as u64,
        };

        let mut bytes = Vec::with_capacity(
            object::META_SIZE + self.program_size as usize * object::INST_SIZE + self.memory_size,
        );
        bytes.extend_from_slice(&meta.encode());
        for i in 0..self.program_size as usize {
            bytes.extend_from_slice(&object::encode_inst(self.program[i]));
        }
        bytes.extend_from_slice(&self.memory[..self.memory_size]);

        fs::write(file_path, &bytes)
            .map_err(|err| format!("ERROR: could not write `{}`: {}", file_path, err))
    }

    // The symbol file covers every binding; debuggers filter by
    // matching program addresses.
    pub fn save_symbols(&self, file_path: &str) -> AsmResult<()> {
        let mut text = String::new();
        for binding in &self.bindings {
            text.push_str(&format!("{}\t{}\n", binding.value.as_u64(), binding.name));
        }
        fs::write(file_path, &text)
            .map_err(|err| format!("ERROR: could not write `{}`: {}", file_path, err))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::natives;
    use crate::vm::Evm;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("evm-asm-test-{}-{}", std::process::id(), name))
    }

    // Translate source and hand the state to the inspection closure.
    fn with_easm<R>(source: &str, inspect: impl FnOnce(AsmResult<()>, &Easm) -> R) -> R {
        let arena = Bump::new();
        let mut easm = Easm::new(&arena);
        let result = easm.translate_source("test.easm", source);
        inspect(result, &easm)
    }

    fn translation_error(source: &str) -> String {
        with_easm(source, |result, _| result.expect_err("translation should fail"))
    }

    // Assemble, copy into a fresh machine with the standard natives,
    // and run with the given budget.
    fn assemble_and_run(source: &str, limit: i64) -> (crate::vm::Result<()>, Box<Evm>) {
        let arena = Bump::new();
        let mut easm = Easm::new(&arena);
        easm.translate_source("test.easm", source).expect("translation failed");

        let mut evm = Box::new(Evm::new());
        let count = easm.program_size as usize;
        evm.program[..count].copy_from_slice(&easm.program[..count]);
        evm.program_size = easm.program_size;
        evm.memory[..easm.memory_size].copy_from_slice(&easm.memory[..easm.memory_size]);
        evm.ip = easm.entry;
        natives::load_standard_natives(&mut evm);

        let result = evm.execute_program(limit);
        (result, evm)
    }

    fn stack_of(evm: &Evm) -> Vec<u64> {
        (0..evm.stack_size as usize).map(|i| evm.stack[i].as_u64()).collect()
    }

    #[test]
    fn assembles_and_runs_addition() {
        let (result, evm) = assemble_and_run("push 34\npush 35\nplusi\nhalt\n", -1);
        assert_eq!(result, Ok(()));
        assert!(evm.halt);
        assert_eq!(stack_of(&evm), &[69]);
    }

    #[test]
    fn assembles_and_runs_swap() {
        let (result, evm) = assemble_and_run("push 1\npush 2\nswap 1\nhalt\n", -1);
        assert_eq!(result, Ok(()));
        assert_eq!(stack_of(&evm), &[2, 1]);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let (result, evm) =
            assemble_and_run("; a comment\n\npush 5 ; trailing comment\n   \nhalt\n", -1);
        assert_eq!(result, Ok(()));
        assert_eq!(stack_of(&evm), &[5]);
    }

    #[test]
    fn entry_resolves_a_forward_label() {
        with_easm("#entry start\nstart: push 5\n halt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert!(easm.has_entry);
            assert_eq!(easm.entry, 0);
        });

        let (result, evm) = assemble_and_run("#entry start\nstart: push 5\n halt\n", -1);
        assert_eq!(result, Ok(()));
        assert_eq!(stack_of(&evm), &[5]);
    }

    #[test]
    fn entry_accepts_a_literal_address() {
        with_easm("#entry 1\nnop\nhalt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert_eq!(easm.entry, 1);
        });
    }

    #[test]
    fn entry_that_lands_mid_program_skips_the_prefix() {
        let (result, evm) = assemble_and_run("#entry main\npush 1\nmain: push 2\nhalt\n", -1);
        assert_eq!(result, Ok(()));
        assert_eq!(stack_of(&evm), &[2]);
    }

    #[test]
    fn duplicate_entry_cites_the_first_site() {
        let error = translation_error("#entry 0\n#entry 1\nhalt\n");
        assert!(error.contains("test.easm:2: ERROR"));
        assert!(error.contains("test.easm:1: NOTE"));
    }

    #[test]
    fn entry_must_be_a_label() {
        let error = translation_error("#const main 5\n#entry main\nhalt\n");
        assert!(error.contains("entry point must be a label"));
        assert!(error.contains("NOTE"));
    }

    #[test]
    fn consts_substitute_into_operands() {
        let (result, evm) = assemble_and_run("#const N 42\npush N\nhalt\n", -1);
        assert_eq!(result, Ok(()));
        assert_eq!(stack_of(&evm), &[42]);
    }

    #[test]
    fn duplicate_binding_cites_the_first_site() {
        let error = translation_error("#const N 42\n#const N 43\nhalt\n");
        assert!(error.contains("test.easm:2: ERROR"));
        assert!(error.contains("already bound"));
        assert!(error.contains("test.easm:1: NOTE"));
    }

    #[test]
    fn label_and_const_share_one_namespace() {
        let error = translation_error("#const spot 1\nspot: halt\n");
        assert!(error.contains("already bound as const"));
    }

    #[test]
    fn forward_references_are_patched_in_the_second_pass() {
        with_easm("jmp end\nhalt\nend: halt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert_eq!(easm.program[0].operand.as_u64(), 2);
        });
    }

    #[test]
    fn unknown_name_is_a_located_error() {
        let error = translation_error("jmp nowhere\nhalt\n");
        assert!(error.contains("test.easm:1: ERROR"));
        assert!(error.contains("unknown name `nowhere`"));
    }

    #[test]
    fn call_accepts_only_labels() {
        let error = translation_error("#const here 0\ncall here\nhalt\n");
        assert!(error.contains("`here` is a const"));
        assert!(error.contains("label"));
        assert!(error.contains("NOTE"));
    }

    #[test]
    fn native_accepts_only_native_bindings() {
        let error = translation_error("spot: native spot\n");
        assert!(error.contains("`spot` is a label"));
        assert!(error.contains("native"));
    }

    #[test]
    fn any_kind_is_accepted_at_plain_operand_sites() {
        with_easm("#native write 0\npush write\nhalt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert_eq!(easm.program[0].operand.as_u64(), 0);
        });
    }

    #[test]
    fn unknown_instruction_is_a_located_error() {
        let error = translation_error("push 1\nfrobnicate\n");
        assert!(error.contains("test.easm:2: ERROR"));
        assert!(error.contains("unknown instruction `frobnicate`"));
    }

    #[test]
    fn missing_operand_is_an_error() {
        let error = translation_error("push\n");
        assert!(error.contains("requires an operand"));
    }

    #[test]
    fn stray_operand_is_an_error() {
        let error = translation_error("drop 1\n");
        assert!(error.contains("does not take an operand"));
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let error = translation_error("#frobnicate 1\n");
        assert!(error.contains("unknown pre-processor directive `#frobnicate`"));
    }

    #[test]
    fn char_literals_are_single_bytes() {
        with_easm("push 'A'\nhalt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert_eq!(easm.program[0].operand.as_u64(), 65);
        });

        // Multi-byte content is not a literal, and there is no
        // binding with that name either.
        let error = translation_error("push '\u{e9}'\nhalt\n");
        assert!(error.contains("unknown name"));
    }

    #[test]
    fn float_literals_are_bit_exact() {
        with_easm("push 2.5\nhalt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert_eq!(easm.program[0].operand.as_f64(), 2.5);
        });
    }

    #[test]
    fn exponent_floats_parse_but_names_do_not() {
        with_easm("push 1e3\nhalt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert_eq!(easm.program[0].operand.as_f64(), 1000.0);
        });

        // `inf` is a name, never a float literal.
        let error = translation_error("push inf\nhalt\n");
        assert!(error.contains("unknown name `inf`"));
    }

    #[test]
    fn trailing_garbage_is_not_a_number() {
        let error = translation_error("push 12monkeys\nhalt\n");
        assert!(error.contains("unknown name `12monkeys`"));
    }

    #[test]
    fn string_literals_land_in_memory() {
        with_easm("push \"hi\"\npush \"!!\"\nhalt\n", |result, easm| {
            assert_eq!(result, Ok(()));
            assert_eq!(easm.program[0].operand.as_u64(), 0);
            assert_eq!(easm.program[1].operand.as_u64(), 2);
            assert_eq!(&easm.memory[..4], b"hi!!");
            assert_eq!(easm.memory_size, 4);
            assert_eq!(easm.memory_capacity, 4);
        });
    }

    #[test]
    fn write_native_consumes_the_string() {
        let (result, evm) =
            assemble_and_run("#native write 0\npush \"hi\"\npush 2\nnative write\nhalt\n", -1);
        assert_eq!(result, Ok(()));
        assert!(evm.halt);
        assert_eq!(evm.stack_size, 0);
        assert_eq!(&evm.memory[..2], b"hi");
    }

    #[test]
    fn execution_budget_applies_to_assembled_loops() {
        let (result, evm) = assemble_and_run("push 0\nloop: push 1\n plusi\n jmp loop\n", 10);
        assert_eq!(result, Ok(()));
        assert_eq!(evm.stack_size, 1);
        assert!(!evm.halt);
    }

    #[test]
    fn include_pulls_in_another_file() {
        let lib = temp_path("lib.easm");
        let main = temp_path("main.easm");
        fs::write(&lib, "answer: push 42\n swap 1\n ret\n").unwrap();
        fs::write(
            &main,
            format!("#entry main\n#include \"{}\"\nmain: call answer\nhalt\n", lib.display()),
        )
        .unwrap();

        let arena = Bump::new();
        let mut easm = Easm::new(&arena);
        easm.translate_file(main.to_str().unwrap()).expect("translation failed");
        // answer: 0..=2, main: 3, halt: 4
        assert_eq!(easm.program_size, 5);
        assert_eq!(easm.entry, 3);
        assert_eq!(easm.program[3].operand.as_u64(), 0);

        fs::remove_file(&lib).unwrap();
        fs::remove_file(&main).unwrap();
    }

    #[test]
    fn include_cycle_hits_the_level_bound() {
        let path = temp_path("cycle.easm");
        fs::write(&path, format!("#include \"{}\"\n", path.display())).unwrap();

        let arena = Bump::new();
        let mut easm = Easm::new(&arena);
        let error = easm.translate_file(path.to_str().unwrap()).expect_err("should hit the bound");
        assert!(error.contains("exceeded maximum include level"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_include_is_an_error() {
        let error = translation_error("#include \"no/such/file.easm\"\n");
        assert!(error.contains("could not read"));
    }

    #[test]
    fn unquoted_include_path_is_an_error() {
        let error = translation_error("#include lib.easm\n");
        assert!(error.contains("quotation marks"));
    }

    #[test]
    fn save_then_load_preserves_the_program() {
        let path = temp_path("roundtrip.evm");

        let arena = Bump::new();
        let mut easm = Easm::new(&arena);
        easm.translate_source(
            "test.easm",
            "#entry main\npush \"hi\"\nmain: push 34\npush 35\nplusi\nhalt\n",
        )
        .expect("translation failed");
        easm.save(path.to_str().unwrap()).expect("save failed");

        let mut evm = Box::new(Evm::new());
        evm.load_program_from_file(path.to_str().unwrap()).expect("load failed");

        assert_eq!(evm.program_size, easm.program_size);
        for i in 0..easm.program_size as usize {
            assert_eq!(evm.program[i], easm.program[i]);
        }
        assert_eq!(evm.ip, easm.entry);
        assert_eq!(&evm.memory[..easm.memory_size], &easm.memory[..easm.memory_size]);

        assert_eq!(evm.execute_program(-1), Ok(()));
        assert_eq!(stack_of(&evm), &[69]);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn symbol_files_cover_every_binding() {
        let path = temp_path("symbols.sym");

        let arena = Bump::new();
        let mut easm = Easm::new(&arena);
        easm.translate_source("test.easm", "#const N 42\n#native write 0\nmain: halt\n")
            .expect("translation failed");
        easm.save_symbols(path.to_str().unwrap()).expect("save failed");

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "42\tN\n0\twrite\n0\tmain\n");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn loader_rejects_corrupted_headers() {
        let arena = Bump::new();
        let mut easm = Easm::new(&arena);
        easm.translate_source("test.easm", "push 1\nhalt\n").expect("translation failed");

        let meta = object::Meta {
            magic: object::FILE_MAGIC,
            version: object::FILE_VERSION,
            program_size: easm.program_size,
            entry: 0,
            memory_size: 0,
            memory_capacity: 0,
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&meta.encode());
        for i in 0..easm.program_size as usize {
            bytes.extend_from_slice(&object::encode_inst(easm.program[i]));
        }

        let mut evm = Box::new(Evm::new());
        assert_eq!(evm.load_program_from_bytes("good.evm", &bytes), Ok(()));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = 0;
        let error = evm.load_program_from_bytes("bad.evm", &bad_magic).unwrap_err();
        assert!(error.contains("magic"));

        let mut bad_version = bytes.clone();
        bad_version[2] = 99;
        let error = evm.load_program_from_bytes("bad.evm", &bad_version).unwrap_err();
        assert!(error.contains("version"));

        let mut truncated = bytes.clone();
        truncated.pop();
        let error = evm.load_program_from_bytes("bad.evm", &truncated).unwrap_err();
        assert!(error.contains("expected"));

        let mut bad_opcode = bytes.clone();
        bad_opcode[object::META_SIZE] = 0xFF;
        let error = evm.load_program_from_bytes("bad.evm", &bad_opcode).unwrap_err();
        assert!(error.contains("invalid opcode"));
    }
}
