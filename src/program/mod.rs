//! Program storage and management.
//!
//! Keeps stored lines sorted by line number and maps between line numbers
//! and the cumulative exec-stream byte offset used by `XLINENUM`/`XIF`-style
//! resolved opcodes. The mapping is a plain linear scan over the in-order
//! lines; the interpreter is not expected to hold thousands of lines, so an
//! index is not worth the bookkeeping.

use crate::line::TokenizedLine;
use std::collections::BTreeMap;

/// Program line storage with execution support.
#[derive(Debug, Clone)]
pub struct ProgramStore {
    lines: BTreeMap<u16, TokenizedLine>,
    current_line: Option<u16>,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self {
            lines: BTreeMap::new(),
            current_line: None,
        }
    }

    /// Store a program line, replacing any existing line with the same
    /// number.
    pub fn store_line(&mut self, line: TokenizedLine) {
        self.lines.insert(line.line_number(), line);
    }

    /// Delete a program line (entering just a line number deletes it).
    pub fn delete_line(&mut self, line_number: u16) {
        self.lines.remove(&line_number);
    }

    pub fn get_line(&self, line_number: u16) -> Option<&TokenizedLine> {
        self.lines.get(&line_number)
    }

    /// Mutable access to a stored line's bytes, used by the dispatcher to
    /// fill in a structured statement's branch-offset slots the first time
    /// it runs.
    pub fn get_line_mut(&mut self, line_number: u16) -> Option<&mut TokenizedLine> {
        self.lines.get_mut(&line_number)
    }

    pub fn get_line_numbers(&self) -> Vec<u16> {
        self.lines.keys().copied().collect()
    }

    /// Clear all program lines (NEW command). Does not touch the symbol
    /// table — callers that want a full reset should clear that too.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.current_line = None;
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn list(&self) -> Vec<(u16, &TokenizedLine)> {
        self.lines.iter().map(|(k, v)| (*k, v)).collect()
    }

    pub fn start_execution(&mut self) -> Option<u16> {
        self.current_line = self.lines.keys().next().copied();
        self.current_line
    }

    pub fn next_line(&mut self) -> Option<u16> {
        if let Some(current) = self.current_line {
            self.current_line = self.lines.range((current + 1)..).next().map(|(k, _)| *k);
            self.current_line
        } else {
            None
        }
    }

    pub fn goto_line(&mut self, line_number: u16) -> bool {
        if self.lines.contains_key(&line_number) {
            self.current_line = Some(line_number);
            true
        } else {
            false
        }
    }

    pub fn get_current_line(&self) -> Option<u16> {
        self.current_line
    }

    pub fn stop_execution(&mut self) {
        self.current_line = None;
    }

    /// The exec-stream byte address of `line_number`'s first exec opcode,
    /// measured as a cumulative offset across every stored line's exec
    /// bytes in line-number order. `None` if the line doesn't exist.
    ///
    /// This is the address space `XLINENUM` operands and `XIF`/`XWHILE`/...
    /// branch targets are expressed in once resolved.
    pub fn exec_address_of(&self, line_number: u16) -> Option<u32> {
        let mut offset: u32 = 0;
        for (&number, line) in self.lines.iter() {
            if number == line_number {
                return Some(offset);
            }
            offset += line.exec_bytes().len() as u32;
        }
        None
    }

    /// The line number whose exec bytes contain cumulative offset `addr`,
    /// the inverse of `exec_address_of`. Used by the de-resolver and by
    /// error reporting to turn a faulted exec address back into a line
    /// number.
    pub fn line_number_at_exec_address(&self, addr: u32) -> Option<u16> {
        let mut offset: u32 = 0;
        for (&number, line) in self.lines.iter() {
            let len = line.exec_bytes().len() as u32;
            if addr < offset + len {
                return Some(number);
            }
            offset += len;
        }
        None
    }
}

impl Default for ProgramStore {
    fn default() -> Self {
        Self::new()
    }
}
