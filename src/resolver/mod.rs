//! Resolve and de-resolve: binds the lazily-bound opcodes a stored line's
//! exec form still carries (`XVAR`, `XFNPROCALL`, `XLINENUM`) to stable
//! symbol-table offsets and exec addresses, and reverses that binding.
//!
//! A freshly translated line's exec form carries back-offsets into its own
//! source bytes and raw line-number values — useful only while that line is
//! being edited in isolation. Before the line is added to a running
//! program, [`resolve`] turns those into symbol-table offsets (`VAR`,
//! `FNPROCALL`) and cross-line exec addresses (`LINENUM`) that stay valid
//! as other lines are inserted, edited or deleted around it. [`deresolve`]
//! is the inverse, needed whenever a line is pulled back out of the
//! program (for `LIST`, or to re-edit) and its back-offsets must be made
//! relative to that line's own source bytes again.
//!
//! `XCASE` is deliberately left alone here even though it shares the
//! zero-filled-slot shape of `XVAR`/`XFNPROCALL`: its operand is a jump
//! table base the dispatcher builds at first execution of the `CASE`
//! statement, not a name or line reference, so there is nothing for the
//! symbol table or the program store to bind it to.

use crate::error::{BBCBasicError, Result};
use crate::keyword;
use crate::line::TokenizedLine;
use crate::opcode;
use crate::program::ProgramStore;
use crate::tokenizer::VARIABLE_MARKER;
use crate::translator;
use crate::variables::SymbolTable;

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

fn write_u32(bytes: &mut [u8], pos: usize, value: u32) {
    bytes[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

/// The identifier text at `name_start`, with any trailing array-subscript
/// opener (`(` or `[`) stripped — `scan_variable_name` includes it since
/// the tokenizer needs to know a subscript follows, but it isn't part of
/// the variable's own name.
fn variable_name_at(source: &[u8], name_start: usize) -> String {
    let mut end = translator::scan_variable_name(source, name_start);
    if matches!(source.get(end.wrapping_sub(1)), Some(b'(') | Some(b'[')) {
        end -= 1;
    }
    String::from_utf8_lossy(&source[name_start..end]).into_owned()
}

/// `FN`/`PROC` names share no syntax with variables, but could collide in
/// spelling with one (`PROCfoo` vs a variable `foo`); prefixing keeps them
/// in a distinct symbol-table namespace.
fn fnproc_key(name: &str) -> String {
    format!("fn:{name}")
}

fn find_variable_occurrence(source: &[u8], name: &str) -> Option<usize> {
    let mut pos = 0;
    while pos < source.len() {
        if source[pos] == VARIABLE_MARKER {
            let name_start = pos + 1;
            if variable_name_at(source, name_start) == name {
                return Some(name_start);
            }
            pos = translator::scan_variable_name(source, name_start);
        } else {
            pos += 1;
        }
    }
    None
}

fn find_fnproc_occurrence(source: &[u8], key: &str) -> Option<usize> {
    let name = key.strip_prefix("fn:")?;
    let fn_ = keyword::find("FN")?.first;
    let proc_ = keyword::find("PROC")?.first;
    let mut pos = 0;
    while pos < source.len() {
        for variant in [fn_, proc_] {
            let matches = match variant.class.prefix_byte() {
                Some(prefix) => source.get(pos) == Some(&prefix) && source.get(pos + 1) == Some(&variant.opcode),
                None => source.get(pos) == Some(&variant.opcode),
            };
            if matches {
                let token_len = if variant.class.prefix_byte().is_some() { 2 } else { 1 };
                let name_start = pos + token_len;
                let name_end = translator::scan_ident(source, name_start);
                if &source[name_start..name_end] == name.as_bytes() {
                    return Some(name_start);
                }
            }
        }
        pos += 1;
    }
    None
}

/// Bind every `XVAR`/`XFNPROCALL`/`XLINENUM` opcode in `line`'s exec form to
/// a stable symbol-table offset or cross-line exec address, turning them
/// into their resolved (`VAR`/`FNPROCALL`/`LINENUM`) counterparts in place.
///
/// A forward reference to a line number not yet in `program` is not a
/// fatal error — the line may be stored before later lines that define its
/// target. Such references are left as `XLINENUM` and reported back in the
/// returned list so the caller can retry resolution once the program is
/// complete; anything else wrong with the exec stream (a corrupt opcode,
/// a truncated operand) is a hard error.
pub fn resolve(
    line: &mut TokenizedLine,
    program: &ProgramStore,
    symbols: &mut SymbolTable,
) -> Result<Vec<BBCBasicError>> {
    let source = line.source_bytes().to_vec();
    let mut deferred = Vec::new();
    let mut pos = 0;

    while pos < line.exec_bytes().len() {
        let op = line.exec_bytes()[pos];

        match op {
            opcode::XVAR => {
                let name_start = read_u32(line.exec_bytes(), pos + 1) as usize;
                let name = variable_name_at(&source, name_start);
                let offset = symbols.resolve_or_create(&name);
                let bytes = line.exec_bytes_mut();
                bytes[pos] = opcode::VAR;
                write_u32(bytes, pos + 1, offset);
                pos += 5;
            }
            opcode::XFNPROCALL => {
                let name_start = read_u32(line.exec_bytes(), pos + 1) as usize;
                let name_end = translator::scan_ident(&source, name_start);
                let key = fnproc_key(std::str::from_utf8(&source[name_start..name_end]).unwrap_or(""));
                let offset = symbols.resolve_or_create(&key);
                let bytes = line.exec_bytes_mut();
                bytes[pos] = opcode::FNPROCALL;
                write_u32(bytes, pos + 1, offset);
                pos += 5;
            }
            opcode::XLINENUM => {
                let target = read_u32(line.exec_bytes(), pos + 1) as u16;
                match program.exec_address_of(target) {
                    Some(addr) => {
                        let bytes = line.exec_bytes_mut();
                        bytes[pos] = opcode::LINENUM;
                        write_u32(bytes, pos + 1, addr);
                    }
                    None => deferred.push(BBCBasicError::UnresolvedLineReference(target)),
                }
                pos += 5;
            }
            _ => {
                pos += opcode::skip(line.exec_bytes(), pos).ok_or(BBCBasicError::BadProgram)?;
            }
        }
    }

    Ok(deferred)
}

/// The inverse of [`resolve`]: turns `VAR`/`FNPROCALL`/`LINENUM` back into
/// `XVAR`/`XFNPROCALL`/`XLINENUM` with back-offsets relative to `line`'s own
/// source bytes, recovering the name or line number from the symbol table
/// or program store and re-scanning source form for an occurrence of it.
/// Any occurrence works: every use of a given name resolves to the same
/// symbol-table offset, so one back-offset is as good as another.
pub fn deresolve(line: &mut TokenizedLine, program: &ProgramStore, symbols: &SymbolTable) -> Result<()> {
    let source = line.source_bytes().to_vec();
    let mut pos = 0;

    while pos < line.exec_bytes().len() {
        let op = line.exec_bytes()[pos];

        match op {
            opcode::VAR => {
                let offset = read_u32(line.exec_bytes(), pos + 1);
                let name = symbols.name_at(offset).ok_or(BBCBasicError::BadProgram)?.to_string();
                let name_start = find_variable_occurrence(&source, &name).ok_or(BBCBasicError::BadProgram)?;
                let bytes = line.exec_bytes_mut();
                bytes[pos] = opcode::XVAR;
                write_u32(bytes, pos + 1, name_start as u32);
                pos += 5;
            }
            opcode::FNPROCALL => {
                let offset = read_u32(line.exec_bytes(), pos + 1);
                let key = symbols.name_at(offset).ok_or(BBCBasicError::BadProgram)?.to_string();
                let name_start = find_fnproc_occurrence(&source, &key).ok_or(BBCBasicError::BadProgram)?;
                let bytes = line.exec_bytes_mut();
                bytes[pos] = opcode::XFNPROCALL;
                write_u32(bytes, pos + 1, name_start as u32);
                pos += 5;
            }
            opcode::LINENUM => {
                let addr = read_u32(line.exec_bytes(), pos + 1);
                let line_number = program
                    .line_number_at_exec_address(addr)
                    .ok_or(BBCBasicError::BadProgram)?;
                let bytes = line.exec_bytes_mut();
                bytes[pos] = opcode::XLINENUM;
                write_u32(bytes, pos + 1, line_number as u32);
                pos += 5;
            }
            _ => {
                pos += opcode::skip(line.exec_bytes(), pos).ok_or(BBCBasicError::BadProgram)?;
            }
        }
    }

    Ok(())
}
