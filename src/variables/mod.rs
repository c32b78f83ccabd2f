//! Static-integer variables and the symbol table: the workspace-offset side
//! of variable storage. Actual values (integers, floats, strings, arrays)
//! live in the external variable/heap manager; this module only tracks
//! *where* a name's slot is, so the resolver can turn a source-text name
//! into a stable offset and back.

use std::collections::HashMap;

/// `A%`..`Z%` plus `@%`, in that slot order.
pub const STATIC_VAR_COUNT: usize = 27;

/// Slot index for a static integer variable's spelling (letter + `%`, or
/// `@%`), or `None` if `name` isn't one of the 27 static slots.
pub fn static_var_index(name: &str) -> Option<u8> {
    let bytes = name.as_bytes();
    if bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b'%' {
        Some(bytes[0].to_ascii_uppercase() - b'A')
    } else if name == "@%" {
        Some(26)
    } else {
        None
    }
}

/// The spelling a static slot index round-trips to (uppercase canonical
/// form; the source may have used a different case for the letter).
pub fn static_var_name(index: u8) -> Option<String> {
    match index {
        0..=25 => Some(format!("{}%", (b'A' + index) as char)),
        26 => Some("@%".to_string()),
        _ => None,
    }
}

/// Maps variable, function, and procedure names to workspace offsets.
/// Every distinct name (case-sensitive, matching BBC BASIC's own rule) gets
/// one offset the first time it's seen; later lookups return the same
/// offset. Offsets are assigned densely starting at 0 — this is a symbol
/// table, not a byte-addressed allocator, so "offset" here means "entry
/// index", the same role the interpreter's real workspace slot would play.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: HashMap<String, u32>,
    offsets: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `name`'s offset, assigning a fresh one if this is the first
    /// time the symbol table has seen it.
    pub fn resolve_or_create(&mut self, name: &str) -> u32 {
        if let Some(&offset) = self.names.get(name) {
            return offset;
        }
        let offset = self.offsets.len() as u32;
        self.offsets.push(name.to_string());
        self.names.insert(name.to_string(), offset);
        offset
    }

    /// Look up an existing offset without creating one.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    /// The name originally bound to `offset`, for de-resolution.
    pub fn name_at(&self, offset: u32) -> Option<&str> {
        self.offsets.get(offset as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Reset the table (`NEW`/`CLEAR`). Existing resolved opcodes in the
    /// line store must be de-resolved before this is called, or their
    /// offsets become dangling.
    pub fn clear(&mut self) {
        self.names.clear();
        self.offsets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_var_index_covers_the_alphabet_and_at_percent() {
        assert_eq!(static_var_index("A%"), Some(0));
        assert_eq!(static_var_index("Z%"), Some(25));
        assert_eq!(static_var_index("@%"), Some(26));
        assert_eq!(static_var_index("a%"), Some(0));
    }

    #[test]
    fn static_var_index_rejects_non_static_names() {
        assert_eq!(static_var_index("TOTAL%"), None);
        assert_eq!(static_var_index("A"), None);
        assert_eq!(static_var_index("A%("), None);
    }

    #[test]
    fn static_var_name_round_trips_index() {
        assert_eq!(static_var_name(0), Some("A%".to_string()));
        assert_eq!(static_var_name(26), Some("@%".to_string()));
        assert_eq!(static_var_name(27), None);
    }

    #[test]
    fn symbol_table_assigns_stable_offsets() {
        let mut table = SymbolTable::new();
        let a = table.resolve_or_create("TOTAL");
        let b = table.resolve_or_create("COUNT");
        let a_again = table.resolve_or_create("TOTAL");
        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[test]
    fn symbol_table_name_at_reverses_resolve_or_create() {
        let mut table = SymbolTable::new();
        let offset = table.resolve_or_create("RESULT");
        assert_eq!(table.name_at(offset), Some("RESULT"));
    }

    #[test]
    fn lookup_does_not_create() {
        let table = SymbolTable::new();
        assert_eq!(table.lookup("MISSING"), None);
    }

    #[test]
    fn clear_empties_the_table() {
        let mut table = SymbolTable::new();
        table.resolve_or_create("X");
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.lookup("X"), None);
    }
}
