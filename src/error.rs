//! Core error handling types for the BBC BASIC tokenizer/dispatcher core.

use std::fmt;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, BBCBasicError>;

/// Comprehensive error types matching BBC BASIC error conditions.
///
/// Variants are grouped by stage: tokenization warnings, syntax errors,
/// semantic errors, resolver warnings, and fatal errors.
#[derive(Debug, Clone, PartialEq)]
pub enum BBCBasicError {
    // --- Tokenization warnings (recoverable, become a BADLINE marker) ---
    BadHexLiteral,
    BadBinaryLiteral,
    LineNumberTooLarge(u32),
    UnterminatedString,
    UnbalancedBrackets,
    ExponentOverflow,
    LineTooLong,
    WorkspaceOverflow,

    // --- Syntax errors (detected at dispatch) ---
    SyntaxError { message: String, line: Option<u16> },
    BadSyntax,

    // --- Semantic errors (trappable by ON ERROR) ---
    TypeMismatch,
    NoRoom,
    SubscriptOutOfRange,
    DivisionByZero,
    StringTooLong,
    NoSuchVariable(String),
    ArrayNotDimensioned(String),
    OutOfData,
    UndefinedProcedure(String),

    // --- Resolver warnings ---
    /// `WARN_LINEMISS`: an `XLINENUM` reference to a line that does not exist.
    UnresolvedLineReference(u16),

    // --- Fatal errors (not trappable, return to REPL) ---
    /// `ERR_BADPROG`: an opcode byte with no entry in the skip table, or a
    /// dispatch table slot marked fatal.
    BadToken,
    BadProgram,
    MemoryExhausted,

    // --- Memory errors ---
    InvalidAddress(u16),

    // --- File system errors ---
    FileNotFound(String),
    DiskError(String),

    // --- System / legacy import errors ---
    IllegalFunction,
    BadCall,
    UnknownAcornToken(u8),

    /// Custom error for `ON ERROR` handling (user-raised `ERROR` statement).
    UserError(u8),
}

impl fmt::Display for BBCBasicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BBCBasicError::BadHexLiteral => write!(f, "Bad hex constant"),
            BBCBasicError::BadBinaryLiteral => write!(f, "Bad binary constant"),
            BBCBasicError::LineNumberTooLarge(n) => write!(f, "Line number too large: {}", n),
            BBCBasicError::UnterminatedString => write!(f, "Missing closing quote"),
            BBCBasicError::UnbalancedBrackets => write!(f, "Unbalanced brackets"),
            BBCBasicError::ExponentOverflow => write!(f, "Exponent too large"),
            BBCBasicError::LineTooLong => write!(f, "Line too long"),
            BBCBasicError::WorkspaceOverflow => write!(f, "Workspace full"),
            BBCBasicError::SyntaxError { message, line } => {
                if let Some(line_num) = line {
                    write!(f, "Syntax error at line {}: {}", line_num, message)
                } else {
                    write!(f, "Syntax error: {}", message)
                }
            }
            BBCBasicError::BadSyntax => write!(f, "Syntax error"),
            BBCBasicError::TypeMismatch => write!(f, "Type mismatch"),
            BBCBasicError::NoRoom => write!(f, "No room"),
            BBCBasicError::SubscriptOutOfRange => write!(f, "Subscript out of range"),
            BBCBasicError::DivisionByZero => write!(f, "Division by zero"),
            BBCBasicError::StringTooLong => write!(f, "String too long"),
            BBCBasicError::NoSuchVariable(name) => write!(f, "No such variable: {}", name),
            BBCBasicError::ArrayNotDimensioned(name) => {
                write!(f, "Array not dimensioned: {}", name)
            }
            BBCBasicError::OutOfData => write!(f, "Out of DATA"),
            BBCBasicError::UndefinedProcedure(name) => write!(f, "Undefined procedure: {}", name),
            BBCBasicError::UnresolvedLineReference(n) => {
                write!(f, "Line {} not found", n)
            }
            BBCBasicError::BadToken => write!(f, "Program corrupt"),
            BBCBasicError::BadProgram => write!(f, "Bad program"),
            BBCBasicError::MemoryExhausted => write!(f, "Memory exhausted"),
            BBCBasicError::InvalidAddress(addr) => write!(f, "Invalid address: ${:04X}", addr),
            BBCBasicError::FileNotFound(name) => write!(f, "File not found: {}", name),
            BBCBasicError::DiskError(msg) => write!(f, "Disk error: {}", msg),
            BBCBasicError::IllegalFunction => write!(f, "Illegal function"),
            BBCBasicError::BadCall => write!(f, "Bad call"),
            BBCBasicError::UnknownAcornToken(byte) => {
                write!(f, "Unsupported token in legacy program: ${:02X}", byte)
            }
            BBCBasicError::UserError(code) => write!(f, "Error {}", code),
        }
    }
}

impl BBCBasicError {
    /// The single byte a `BADLINE` marker stores after `BADLINE_MARK`,
    /// identifying which tokenization warning produced it. Only the eight
    /// recoverable tokenization warnings can end up behind a marker; `None`
    /// for anything else.
    pub fn badline_code(&self) -> Option<u8> {
        match self {
            BBCBasicError::BadHexLiteral => Some(0),
            BBCBasicError::BadBinaryLiteral => Some(1),
            BBCBasicError::LineNumberTooLarge(_) => Some(2),
            BBCBasicError::UnterminatedString => Some(3),
            BBCBasicError::UnbalancedBrackets => Some(4),
            BBCBasicError::ExponentOverflow => Some(5),
            BBCBasicError::LineTooLong => Some(6),
            BBCBasicError::WorkspaceOverflow => Some(7),
            _ => None,
        }
    }

    /// Reconstructs the error a `BADLINE` marker's code byte stands for.
    /// The offending line number in `LineNumberTooLarge` isn't carried by
    /// the marker byte itself (it's still in the line's preserved source
    /// text) so it comes back as `0`.
    pub fn from_badline_code(code: u8) -> Self {
        match code {
            0 => BBCBasicError::BadHexLiteral,
            1 => BBCBasicError::BadBinaryLiteral,
            2 => BBCBasicError::LineNumberTooLarge(0),
            3 => BBCBasicError::UnterminatedString,
            4 => BBCBasicError::UnbalancedBrackets,
            5 => BBCBasicError::ExponentOverflow,
            6 => BBCBasicError::LineTooLong,
            7 => BBCBasicError::WorkspaceOverflow,
            _ => BBCBasicError::BadProgram,
        }
    }
}

impl std::error::Error for BBCBasicError {}
