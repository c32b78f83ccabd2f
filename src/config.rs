//! Configuration flags for the tokenizer, dispatcher, and lister.
//!
//! Plain struct with `Default`, following the pattern the rest of this crate
//! uses (`SymbolTable`, `ProgramStore`) rather than pulling in a
//! config-file crate. Flags are set programmatically or via CLI switches
//! in `main.rs`; nothing here is read from disk.

/// Runtime-tunable behavior flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Accept reserved words in any case, even on numbered lines.
    pub lowercase_keywords: bool,
    /// Emit `[<lineno>]` trace output as each line starts executing.
    pub trace_lines: bool,
    /// Emit trace output on PROC/FN call and return.
    pub trace_procs: bool,
    /// Emit trace output when a branch opcode is taken.
    pub trace_branch: bool,
    /// `LIST` indents structured statements under their block head.
    pub list_indent: bool,
    /// `LIST` renders keywords in lower case.
    pub list_lower: bool,
    /// `LIST` omits line numbers.
    pub list_noline: bool,
    /// `LIST` inserts a space after each keyword.
    pub list_space: bool,
    /// Allow hex/binary literals to materialize as 64-bit integers.
    pub hex64: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lowercase_keywords: false,
            trace_lines: false,
            trace_procs: false,
            trace_branch: false,
            list_indent: false,
            list_lower: false,
            list_noline: false,
            list_space: true,
            hex64: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert!(!config.lowercase_keywords);
        assert!(!config.trace_lines);
        assert!(config.list_space);
        assert!(!config.hex64);
    }
}
