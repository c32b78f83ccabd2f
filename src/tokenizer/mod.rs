//! Source tokenizer: converts a raw text line into the *source form*
//! described by [`crate::line`] — keywords replaced by their tokens,
//! variable names marked, line numbers binary-encoded, strings normalized —
//! without yet producing the executable opcode stream (see
//! [`crate::translator`] for that).

use crate::config::Config;
use crate::error::{BBCBasicError, Result};
use crate::keyword::{self, KeywordEntry};
use crate::line::{self, NOLINENO};

/// Marks a plain variable reference in source form: marker byte followed by
/// the literal identifier bytes (including any `%`/`%%`/`&`/`#`/`$` suffix
/// and a trailing `(`/`[` if the name is subscripted). Source-form-only;
/// distinct from [`crate::opcode::XVAR`], which the translator emits in its
/// place once it has found the name's back-offset.
pub const VARIABLE_MARKER: u8 = 0x01;

/// Marks a binary-encoded line-number reference in source form: marker byte
/// followed by 2 bytes little-endian. Emitted only when [`linenoposs`]
/// holds (the previous keyword was `GOTO`/`GOSUB`/`RESTORE`/`THEN`/`ELSE`).
pub const LINE_NUMBER_MARKER: u8 = 0x02;

/// Result of tokenizing one line of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeOutput {
    /// [`NOLINENO`] if the line had none (immediate mode).
    pub line_number: u16,
    /// The source-form byte stream, not yet terminated.
    pub source: Vec<u8>,
    /// Set if tokenization hit a recoverable warning; the caller should
    /// substitute a `BADLINE` marker rather than proceed to translation.
    pub error: Option<BBCBasicError>,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

struct State<'a> {
    input: &'a [u8],
    upper: Vec<u8>,
    pos: usize,
    out: Vec<u8>,
    firstitem: bool,
    brackets: i32,
    linenoposs: bool,
    numbered: bool,
    config: &'a Config,
    error: Option<BBCBasicError>,
}

impl<'a> State<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    /// Whether a keyword lookup should even be attempted at `self.pos`: in
    /// a numbered line, a lower-case first letter disqualifies the word as
    /// a keyword candidate (so `save%` never collides with `SAVE`) unless
    /// the global case-insensitivity flag is set.
    fn keyword_candidate(&self) -> bool {
        if !self.numbered || self.config.lowercase_keywords {
            return true;
        }
        !self.input[self.pos].is_ascii_lowercase()
    }

    fn emit_keyword(&mut self, entry: &'static KeywordEntry) {
        let variant = if self.firstitem { entry.first } else { entry.elsewhere };
        variant.emit(&mut self.out);
        self.linenoposs = entry.line_follows;
        match entry.spelling {
            // `CASE`'s selector expression runs straight into its first
            // `WHEN` with no colon between them (this dialect has no `OF`),
            // so `WHEN` needs to see itself as statement-leading there too.
            "THEN" | "REPEAT" | "ELSE" | "OTHERWISE" | "CASE" => self.firstitem = true,
            _ => self.firstitem = false,
        }
    }

    /// After matching `DRAW`, `MOVE`, or `POINT`, check for a following
    /// `BY` (or, for `POINT`, `TO`) word and collapse to the combined
    /// keyword if present.
    fn collapse_by_or_to(&mut self, base: &'static KeywordEntry) -> &'static KeywordEntry {
        let save = self.pos;
        self.skip_spaces();
        for (word, combined) in [("BY", "BY"), ("TO", "TO")] {
            if combined == "TO" && base.spelling != "POINT" {
                continue;
            }
            let end = self.pos + word.len();
            if end <= self.upper.len()
                && &self.upper[self.pos..end] == word.as_bytes()
                && !self.upper.get(end).copied().map(is_ident_continue).unwrap_or(false)
            {
                if let Some(combined_entry) = keyword::find(&format!("{}{}", base.spelling, combined)) {
                    self.pos = end;
                    return combined_entry;
                }
            }
        }
        self.pos = save;
        base
    }

    fn copy_rest_of_line_verbatim(&mut self) {
        while self.pos < self.input.len() {
            self.out.push(self.input[self.pos]);
            self.pos += 1;
        }
    }

    fn read_identifier_name(&mut self) -> Vec<u8> {
        let start = self.pos;
        while self.peek().map(is_ident_continue).unwrap_or(false) {
            self.pos += 1;
        }
        self.input[start..self.pos].to_vec()
    }

    fn tokenize_identifier(&mut self) {
        if self.keyword_candidate() {
            if let Some(m) = keyword::lookup(&self.upper, self.pos) {
                self.pos += m.consumed;
                let mut entry = m.entry;
                match entry.spelling {
                    "REM" | "DATA" | "LISTIF" | "LVAR" => {
                        self.emit_keyword(entry);
                        self.copy_rest_of_line_verbatim();
                        return;
                    }
                    "FN" | "PROC" => {
                        self.emit_keyword(entry);
                        let name = self.read_identifier_name();
                        self.out.extend_from_slice(&name);
                        return;
                    }
                    "DRAW" | "MOVE" | "POINT" => {
                        entry = self.collapse_by_or_to(entry);
                    }
                    _ => {}
                }
                self.emit_keyword(entry);
                return;
            }
        }
        self.tokenize_variable();
    }

    fn tokenize_variable(&mut self) {
        let start = self.pos;
        while self.peek().map(is_ident_continue).unwrap_or(false) {
            self.pos += 1;
        }
        // suffix: %%, %, &, #, $
        if self.peek() == Some(b'%') && self.peek_at(1) == Some(b'%') {
            self.pos += 2;
        } else if matches!(self.peek(), Some(b'%') | Some(b'&') | Some(b'#') | Some(b'$')) {
            self.pos += 1;
        }
        // array subscript opener, kept as part of the name in source form
        if matches!(self.peek(), Some(b'(') | Some(b'[')) {
            self.pos += 1;
        }
        self.out.push(VARIABLE_MARKER);
        self.out.extend_from_slice(&self.input[start..self.pos]);
        self.firstitem = false;
        self.linenoposs = false;
    }

    fn tokenize_line_number_operand(&mut self) {
        let start = self.pos;
        while self.peek().map(|b| b.is_ascii_digit()).unwrap_or(false) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap();
        match text.parse::<u32>() {
            Ok(n) if n <= line::MAX_LINE_NUMBER as u32 => {
                self.out.push(LINE_NUMBER_MARKER);
                self.out.extend_from_slice(&(n as u16).to_le_bytes());
            }
            _ => {
                self.error.get_or_insert(BBCBasicError::LineNumberTooLarge(
                    text.parse::<u32>().unwrap_or(u32::MAX),
                ));
            }
        }
        self.firstitem = false;
        self.linenoposs = false;
    }

    fn tokenize_number(&mut self) {
        let start = self.pos;
        let introducer = self.peek();
        match introducer {
            Some(b'&') => {
                self.pos += 1;
                let digits_start = self.pos;
                while self.peek().map(|b| b.is_ascii_hexdigit()).unwrap_or(false) {
                    self.pos += 1;
                }
                if self.pos == digits_start {
                    self.error.get_or_insert(BBCBasicError::BadHexLiteral);
                }
            }
            Some(b'%') => {
                self.pos += 1;
                let digits_start = self.pos;
                while matches!(self.peek(), Some(b'0') | Some(b'1')) {
                    self.pos += 1;
                }
                if self.pos == digits_start {
                    self.error.get_or_insert(BBCBasicError::BadBinaryLiteral);
                }
            }
            _ => {
                while self.peek().map(|b| b.is_ascii_digit()).unwrap_or(false) {
                    self.pos += 1;
                }
                if self.peek() == Some(b'.') {
                    self.pos += 1;
                    while self.peek().map(|b| b.is_ascii_digit()).unwrap_or(false) {
                        self.pos += 1;
                    }
                }
                if matches!(self.peek(), Some(b'E') | Some(b'e'))
                    && !self.peek_at(1).map(|b| b.is_ascii_alphabetic()).unwrap_or(false)
                {
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.pos += 1;
                    }
                    let exp_start = self.pos;
                    while self.peek().map(|b| b.is_ascii_digit()).unwrap_or(false) {
                        self.pos += 1;
                    }
                    if self.pos == exp_start {
                        self.error.get_or_insert(BBCBasicError::ExponentOverflow);
                    }
                }
            }
        }
        self.out.extend_from_slice(&self.input[start..self.pos]);
        self.firstitem = false;
        self.linenoposs = false;
    }

    fn tokenize_string(&mut self) {
        let start = self.pos;
        self.pos += 1; // opening quote
        loop {
            match self.peek() {
                None => {
                    self.error.get_or_insert(BBCBasicError::UnterminatedString);
                    break;
                }
                Some(b'"') => {
                    self.pos += 1;
                    if self.peek() == Some(b'"') {
                        self.pos += 1; // escaped quote, stays in the stream
                        continue;
                    }
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        self.out.extend_from_slice(&self.input[start..self.pos]);
        self.firstitem = false;
        self.linenoposs = false;
    }

    fn tokenize_operator(&mut self) {
        const MULTI: &[&[u8]] = &[b">>>", b"<>", b"<=", b">=", b"+=", b"-=", b"^=", b">>", b"<<"];
        for form in MULTI {
            let end = self.pos + form.len();
            if self.input.get(self.pos..end) == Some(*form) {
                self.out.extend_from_slice(form);
                self.pos = end;
                self.firstitem = false;
                self.linenoposs = false;
                return;
            }
        }

        let b = self.input[self.pos];
        // Legacy high-bit "logical not" glyph maps onto the NOT keyword.
        if b == 0x7E {
            if let Some(entry) = keyword::find("NOT") {
                self.pos += 1;
                self.emit_keyword(entry);
                return;
            }
        }

        match b {
            b'(' | b'[' => self.brackets += 1,
            b')' | b']' => self.brackets -= 1,
            b':' => self.firstitem = true,
            _ => {}
        }
        self.out.push(b);
        self.pos += 1;
        if b != b':' {
            self.firstitem = false;
        }
        self.linenoposs = false;
    }

    fn run(&mut self) {
        // Star commands are only recognized as the very first item on the
        // line (after any leading line number has already been consumed).
        self.skip_spaces();
        if self.firstitem && self.peek() == Some(b'*') {
            self.copy_rest_of_line_verbatim();
            return;
        }

        while self.pos < self.input.len() {
            let b = self.input[self.pos];
            if b == b' ' || b == b'\t' {
                self.pos += 1;
                continue;
            }
            if self.linenoposs && b.is_ascii_digit() {
                self.tokenize_line_number_operand();
                continue;
            }
            if is_ident_start(b) {
                self.tokenize_identifier();
                continue;
            }
            if b.is_ascii_digit() || b == b'&' || b == b'%' || b == b'.' {
                self.tokenize_number();
                continue;
            }
            if b == b'"' {
                self.tokenize_string();
                continue;
            }
            self.tokenize_operator();
        }

        if self.brackets != 0 {
            self.error.get_or_insert(BBCBasicError::UnbalancedBrackets);
        }
    }
}

/// Tokenize one line of text into its source form. `numbered_allowed`
/// permits leading digits to be consumed as a line number; if the text
/// starts with digits and `numbered_allowed` is false they are treated as
/// an ordinary numeric literal instead.
pub fn tokenize(input: &[u8], numbered_allowed: bool, config: &Config) -> TokenizeOutput {
    let mut pos = 0;
    let mut line_number = NOLINENO;
    let mut numbered = false;

    if numbered_allowed {
        let start = pos;
        while input.get(pos).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            pos += 1;
        }
        if pos > start {
            numbered = true;
            let text = std::str::from_utf8(&input[start..pos]).unwrap();
            match text.parse::<u32>() {
                Ok(n) if n <= line::MAX_LINE_NUMBER as u32 => line_number = n as u16,
                Ok(n) => {
                    return TokenizeOutput {
                        line_number: NOLINENO,
                        source: Vec::new(),
                        error: Some(BBCBasicError::LineNumberTooLarge(n)),
                    };
                }
                Err(_) => {
                    return TokenizeOutput {
                        line_number: NOLINENO,
                        source: Vec::new(),
                        error: Some(BBCBasicError::LineNumberTooLarge(u32::MAX)),
                    };
                }
            }
        }
    }

    let rest = &input[pos..];
    let upper: Vec<u8> = rest.iter().map(|b| b.to_ascii_uppercase()).collect();
    let mut state = State {
        input: rest,
        upper,
        pos: 0,
        out: Vec::new(),
        firstitem: true,
        brackets: 0,
        linenoposs: false,
        numbered,
        config,
        error: None,
    };
    state.run();

    TokenizeOutput {
        line_number,
        source: state.out,
        error: state.error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn tokenizes_leading_line_number() {
        let out = tokenize(b"10 PRINT 1", true, &cfg());
        assert_eq!(out.line_number, 10);
        assert!(out.error.is_none());
    }

    #[test]
    fn rejects_line_number_above_max() {
        let out = tokenize(b"65280 PRINT 1", true, &cfg());
        assert!(matches!(out.error, Some(BBCBasicError::LineNumberTooLarge(65280))));
    }

    #[test]
    fn immediate_mode_has_no_line_number() {
        let out = tokenize(b"PRINT 1", true, &cfg());
        assert_eq!(out.line_number, NOLINENO);
    }

    #[test]
    fn emits_print_keyword_token() {
        let print_entry = keyword::find("PRINT").unwrap();
        let out = tokenize(b"PRINT", false, &cfg());
        let mut expected = Vec::new();
        print_entry.first.emit(&mut expected);
        assert_eq!(out.source, expected);
    }

    #[test]
    fn tokenizes_variable_marker_with_suffix() {
        let out = tokenize(b"I%", false, &cfg());
        assert_eq!(out.source[0], VARIABLE_MARKER);
        assert_eq!(&out.source[1..], b"I%");
    }

    #[test]
    fn lowercase_word_on_numbered_line_is_not_a_keyword() {
        let out = tokenize(b"10 save%=1", true, &cfg());
        assert_eq!(out.source[0], VARIABLE_MARKER);
    }

    #[test]
    fn lowercase_keywords_flag_allows_lowercase_match() {
        let mut config = cfg();
        config.lowercase_keywords = true;
        let out = tokenize(b"10 print 1", true, &config);
        let print_entry = keyword::find("PRINT").unwrap();
        let mut expected = Vec::new();
        print_entry.first.emit(&mut expected);
        assert_eq!(&out.source[..expected.len()], expected.as_slice());
    }

    #[test]
    fn rem_copies_rest_of_line_verbatim() {
        let out = tokenize(br#"REM hello "world"#, false, &cfg());
        let rem_entry = keyword::find("REM").unwrap();
        let mut expected = Vec::new();
        rem_entry.first.emit(&mut expected);
        expected.extend_from_slice(br#" hello "world"#);
        assert_eq!(out.source, expected);
    }

    #[test]
    fn data_statement_copies_payload_verbatim() {
        let out = tokenize(br#"DATA 1,"a,b",3"#, false, &cfg());
        let data_entry = keyword::find("DATA").unwrap();
        let mut expected = Vec::new();
        data_entry.first.emit(&mut expected);
        expected.extend_from_slice(br#" 1,"a,b",3"#);
        assert_eq!(out.source, expected);
    }

    #[test]
    fn then_resets_firstitem_so_print_is_statement_leading() {
        let out = tokenize(b"IF A THEN PRINT", false, &cfg());
        let print_first = keyword::find("PRINT").unwrap().first;
        let mut tail = Vec::new();
        print_first.emit(&mut tail);
        assert!(out.source.windows(tail.len()).any(|w| w == tail.as_slice()));
    }

    #[test]
    fn draw_by_collapses_to_drawby() {
        let out = tokenize(b"DRAW BY 1,2", false, &cfg());
        let drawby = keyword::find("DRAWBY").unwrap();
        let mut expected_prefix = Vec::new();
        drawby.first.emit(&mut expected_prefix);
        assert_eq!(&out.source[..expected_prefix.len()], expected_prefix.as_slice());
    }

    #[test]
    fn point_to_collapses_to_pointto() {
        let out = tokenize(b"POINT TO 1,2", false, &cfg());
        let pointto = keyword::find("POINTTO").unwrap();
        let mut expected_prefix = Vec::new();
        pointto.first.emit(&mut expected_prefix);
        assert_eq!(&out.source[..expected_prefix.len()], expected_prefix.as_slice());
    }

    #[test]
    fn fn_proc_copy_following_name_verbatim() {
        let out = tokenize(b"PROCgreet", false, &cfg());
        let proc_entry = keyword::find("PROC").unwrap();
        let mut expected = Vec::new();
        proc_entry.first.emit(&mut expected);
        expected.extend_from_slice(b"greet");
        assert_eq!(out.source, expected);
    }

    #[test]
    fn star_command_copies_remainder_verbatim() {
        let out = tokenize(b"*CAT", false, &cfg());
        assert_eq!(out.source, b"*CAT");
    }

    #[test]
    fn unbalanced_brackets_is_an_error() {
        let out = tokenize(b"PRINT (1+2", false, &cfg());
        assert_eq!(out.error, Some(BBCBasicError::UnbalancedBrackets));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let out = tokenize(br#"PRINT "hello"#, false, &cfg());
        assert_eq!(out.error, Some(BBCBasicError::UnterminatedString));
    }

    #[test]
    fn escaped_quote_pair_stays_in_the_stream() {
        let out = tokenize(br#"PRINT "a""b""#, false, &cfg());
        assert!(out.source.windows(4).any(|w| w == br#""a""#));
    }

    #[test]
    fn bad_hex_literal_is_an_error() {
        let out = tokenize(b"PRINT &", false, &cfg());
        assert_eq!(out.error, Some(BBCBasicError::BadHexLiteral));
    }

    #[test]
    fn goto_permits_a_trailing_line_number() {
        let out = tokenize(b"GOTO 100", false, &cfg());
        assert!(out.source.contains(&LINE_NUMBER_MARKER));
    }

    #[test]
    fn colon_resets_firstitem() {
        let out = tokenize(b"PRINT 1:PRINT 2", false, &cfg());
        assert_eq!(out.source.iter().filter(|&&b| b == b':').count(), 1);
    }
}
