//! The tokenized line: a single contiguous byte buffer carrying a header, a
//! reversible source-form byte stream, and an executable opcode stream,
//! each terminated by a zero byte.
//!
//! Layout from byte 0:
//!
//! | field        | size | meaning                                          |
//! |--------------|------|---------------------------------------------------|
//! | line-number  | 2    | `0..=MAX_LINE_NUMBER`, or [`NOLINENO`] (immediate) |
//! | total-length | 2    | header through the exec terminator, inclusive      |
//! | exec-offset  | 2    | offset from byte 0 to the first exec opcode        |
//! | source-bytes | var  | source form, zero-terminated                       |
//! | exec-bytes   | var  | exec opcode stream, zero-terminated                |

use crate::error::{BBCBasicError, Result};
use crate::opcode;

/// Sentinel line number meaning "no line number" (immediate mode).
pub const NOLINENO: u16 = 0xFFFF;

/// Highest legal stored line number; `NOLINENO` and everything above
/// `MAX_LINE_NUMBER` up to it is rejected at tokenize time.
pub const MAX_LINE_NUMBER: u16 = 65279;

/// Default maximum encoded line length, header through terminator.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

const LINE_NUMBER_OFFSET: usize = 0;
const TOTAL_LENGTH_OFFSET: usize = 2;
const EXEC_OFFSET_OFFSET: usize = 4;
pub const HEADER_LEN: usize = 6;

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    let bytes = value.to_le_bytes();
    buf[at] = bytes[0];
    buf[at + 1] = bytes[1];
}

/// A single tokenized program line: header plus source and exec byte
/// streams, stored as one owned buffer so the two forms stay co-located the
/// way the line store requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedLine {
    buf: Vec<u8>,
}

impl TokenizedLine {
    /// Assemble a line from its line number and the already-tokenized
    /// source and exec byte streams (neither includes its terminating
    /// zero; this adds both).
    pub fn assemble(line_number: u16, source: &[u8], exec: &[u8], max_len: usize) -> Result<Self> {
        if line_number != NOLINENO && line_number > MAX_LINE_NUMBER {
            return Err(BBCBasicError::LineNumberTooLarge(line_number as u32));
        }

        let exec_offset = HEADER_LEN + source.len() + 1;
        let total_length = exec_offset + exec.len() + 1;
        if total_length > max_len {
            return Err(BBCBasicError::LineTooLong);
        }

        let mut buf = Vec::with_capacity(total_length);
        buf.extend_from_slice(&[0u8; HEADER_LEN]);
        buf.extend_from_slice(source);
        buf.push(0);
        buf.extend_from_slice(exec);
        buf.push(0);

        write_u16(&mut buf, LINE_NUMBER_OFFSET, line_number);
        write_u16(&mut buf, TOTAL_LENGTH_OFFSET, total_length as u16);
        write_u16(&mut buf, EXEC_OFFSET_OFFSET, exec_offset as u16);

        Ok(Self { buf })
    }

    /// A `BADLINE` marker: a one-opcode exec stream (`BADLINE_MARK` + error
    /// number) substituted for a line that failed tokenization, preserving
    /// the original line number so running it reproduces the diagnostic.
    pub fn badline(line_number: u16, source: &[u8], error_code: u8, max_len: usize) -> Result<Self> {
        Self::assemble(line_number, source, &[opcode::BADLINE_MARK, error_code], max_len)
    }

    /// Reconstruct a line from a raw byte buffer already laid out per the
    /// header format (used when reading a persisted program back in).
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        let line = Self { buf };
        line.validate(DEFAULT_MAX_LINE_LEN)?;
        Ok(line)
    }

    pub fn line_number(&self) -> u16 {
        read_u16(&self.buf, LINE_NUMBER_OFFSET)
    }

    pub fn set_line_number(&mut self, line_number: u16) {
        write_u16(&mut self.buf, LINE_NUMBER_OFFSET, line_number);
    }

    pub fn total_length(&self) -> u16 {
        read_u16(&self.buf, TOTAL_LENGTH_OFFSET)
    }

    pub fn exec_offset(&self) -> u16 {
        read_u16(&self.buf, EXEC_OFFSET_OFFSET)
    }

    /// Source-form bytes, excluding the terminating zero.
    pub fn source_bytes(&self) -> &[u8] {
        let start = HEADER_LEN;
        let end = self.exec_offset() as usize - 1;
        &self.buf[start..end]
    }

    /// Exec-form bytes, excluding the terminating zero.
    pub fn exec_bytes(&self) -> &[u8] {
        let start = self.exec_offset() as usize;
        let end = self.total_length() as usize - 1;
        &self.buf[start..end]
    }

    /// Mutable access to the exec-form bytes, for in-place opcode upgrades
    /// performed by the resolver. Operand size never changes, so the slice
    /// length is fixed across any number of resolve/de-resolve passes.
    pub fn exec_bytes_mut(&mut self) -> &mut [u8] {
        let start = self.exec_offset() as usize;
        let end = self.total_length() as usize - 1;
        &mut self.buf[start..end]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes this line occupies in the line store.
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    /// A line is valid iff its line number is in range, its total length
    /// fits between the minimum header size and `max_len`, its exec offset
    /// lies inside the line, the buffer actually has that many bytes, both
    /// segments end in a zero byte where the header says they should, and
    /// every opcode in the exec stream is legal per the opcode skip table.
    pub fn validate(&self, max_len: usize) -> Result<()> {
        if self.buf.len() < HEADER_LEN + 2 {
            return Err(BBCBasicError::BadProgram);
        }

        let line_number = self.line_number();
        if line_number != NOLINENO && line_number > MAX_LINE_NUMBER {
            return Err(BBCBasicError::LineNumberTooLarge(line_number as u32));
        }

        let total_length = self.total_length() as usize;
        if total_length < HEADER_LEN + 2 || total_length > max_len || total_length != self.buf.len() {
            return Err(BBCBasicError::BadProgram);
        }

        let exec_offset = self.exec_offset() as usize;
        if exec_offset < HEADER_LEN + 1 || exec_offset >= total_length {
            return Err(BBCBasicError::BadProgram);
        }

        if self.buf[exec_offset - 1] != 0 {
            return Err(BBCBasicError::BadProgram);
        }
        if self.buf[total_length - 1] != 0 {
            return Err(BBCBasicError::BadProgram);
        }

        opcode::walk(self.exec_bytes()).ok_or(BBCBasicError::BadToken)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_computes_header_fields() {
        let line = TokenizedLine::assemble(10, b"PRINT", &[0xF1], 1024).unwrap();
        assert_eq!(line.line_number(), 10);
        assert_eq!(line.source_bytes(), b"PRINT");
        assert_eq!(line.exec_bytes(), &[0xF1]);
        assert_eq!(line.exec_offset() as usize, HEADER_LEN + b"PRINT".len() + 1);
        assert_eq!(
            line.total_length() as usize,
            HEADER_LEN + b"PRINT".len() + 1 + 1 + 1
        );
    }

    #[test]
    fn rejects_line_number_above_max() {
        let err = TokenizedLine::assemble(MAX_LINE_NUMBER + 1, b"", &[], 1024).unwrap_err();
        assert_eq!(err, BBCBasicError::LineNumberTooLarge((MAX_LINE_NUMBER + 1) as u32));
    }

    #[test]
    fn nolineno_is_exempt_from_the_max_line_check() {
        assert!(TokenizedLine::assemble(NOLINENO, b"PRINT 1", &[opcode::INTONE], 1024).is_ok());
    }

    #[test]
    fn rejects_overlong_line() {
        let exec = vec![opcode::INTZERO; 2000];
        let err = TokenizedLine::assemble(1, b"", &exec, 1024).unwrap_err();
        assert_eq!(err, BBCBasicError::LineTooLong);
    }

    #[test]
    fn validate_catches_truncated_buffer() {
        let mut line = TokenizedLine::assemble(1, b"X", &[opcode::INTZERO], 1024).unwrap();
        line.buf.truncate(line.buf.len() - 1);
        assert!(line.validate(1024).is_err());
    }

    #[test]
    fn validate_catches_illegal_exec_opcode() {
        let line = TokenizedLine::assemble(1, b"X", &[0x7F], 1024).unwrap();
        assert_eq!(line.validate(1024), Err(BBCBasicError::BadToken));
    }

    #[test]
    fn round_trips_through_from_bytes() {
        let line = TokenizedLine::assemble(42, b"PRINT X%", &[0xF1, opcode::STATICVAR, 23], 1024).unwrap();
        let bytes = line.as_bytes().to_vec();
        let reloaded = TokenizedLine::from_bytes(bytes).unwrap();
        assert_eq!(reloaded, line);
    }

    #[test]
    fn exec_bytes_mut_allows_in_place_opcode_upgrade() {
        let mut line = TokenizedLine::assemble(1, b"X", &[opcode::XVAR, 0, 0, 0, 0], 1024).unwrap();
        line.exec_bytes_mut()[0] = opcode::VAR;
        assert_eq!(line.exec_bytes()[0], opcode::VAR);
    }
}
