//! Minimal built-in `Evaluator`: the collaborator behind the dispatcher's
//! statement-level control flow, enough to drive integer/float/string
//! arithmetic, comparisons, static and general variables, `PRINT`,
//! assignment, and `GOTO`/`GOSUB`/`RETURN`/`END`/`STOP` through the resolved
//! exec stream end to end.
//!
//! Transcendental functions, arrays, `PROC`/`FN`, and `?`/`!` indirection
//! are out of scope here; see `variables::SymbolTable`'s own doc comment for
//! why actual variable values live in this module rather than there.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dispatcher::{Evaluator, StatementOutcome};
use crate::error::{BBCBasicError, Result};
use crate::keyword::{self, TokenVariant};
use crate::opcode;
use crate::variables::{self, SymbolTable};

/// A runtime value. BBC BASIC keeps integer and floating storage distinct
/// but coerces freely between them in arithmetic; strings only combine with
/// strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(f) => Ok(*f),
            Value::Str(_) => Err(BBCBasicError::TypeMismatch),
        }
    }

    fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(f) => Ok(*f as i64),
            Value::Str(_) => Err(BBCBasicError::TypeMismatch),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Keyword opcodes the evaluator needs to recognize mid-expression or at
/// statement heads. None of these are `dual` keywords (see
/// `keyword::RawKw`), so `first` and `elsewhere` always agree and either
/// one works regardless of where the keyword sits in the statement.
struct Keywords {
    and_: TokenVariant,
    or_: TokenVariant,
    eor: TokenVariant,
    div_: TokenVariant,
    mod_: TokenVariant,
    not_: TokenVariant,
    true_: TokenVariant,
    false_: TokenVariant,
    print: TokenVariant,
    goto: TokenVariant,
    gosub: TokenVariant,
    return_: TokenVariant,
    end_: TokenVariant,
    stop_: TokenVariant,
    rnd: TokenVariant,
}

fn keywords() -> &'static Keywords {
    static KEYWORDS: OnceLock<Keywords> = OnceLock::new();
    KEYWORDS.get_or_init(|| {
        let kw = |s: &str| keyword::find(s).unwrap_or_else(|| panic!("missing keyword {s}")).first;
        Keywords {
            and_: kw("AND"),
            or_: kw("OR"),
            eor: kw("EOR"),
            div_: kw("DIV"),
            mod_: kw("MOD"),
            not_: kw("NOT"),
            true_: kw("TRUE"),
            false_: kw("FALSE"),
            print: kw("PRINT"),
            goto: kw("GOTO"),
            gosub: kw("GOSUB"),
            return_: kw("RETURN"),
            end_: kw("END"),
            stop_: kw("STOP"),
            rnd: kw("RND"),
        }
    })
}

/// Byte length of `variant` at `exec[pos..]` if it matches there, `None`
/// otherwise.
fn match_keyword(exec: &[u8], pos: usize, variant: TokenVariant) -> Option<usize> {
    match variant.class.prefix_byte() {
        Some(prefix) => {
            if exec.get(pos) == Some(&prefix) && exec.get(pos + 1) == Some(&variant.opcode) {
                Some(2)
            } else {
                None
            }
        }
        None => {
            if exec.get(pos) == Some(&variant.opcode) {
                Some(1)
            } else {
                None
            }
        }
    }
}

/// Un-escapes a `QSTRINGCON` string literal: `source[start..]` holds the
/// raw source characters (including doubled `""` for an embedded quote);
/// `collapsed_len` is how many *output* characters to collect, per the
/// translator's own count (see `translator::scan_string`).
fn read_qstring(source: &[u8], start: usize, collapsed_len: usize) -> String {
    let mut out = Vec::with_capacity(collapsed_len);
    let mut i = start;
    while out.len() < collapsed_len {
        if source.get(i) == Some(&b'"') && source.get(i + 1) == Some(&b'"') {
            out.push(b'"');
            i += 2;
        } else if let Some(&b) = source.get(i) {
            out.push(b);
            i += 1;
        } else {
            break;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn read_u32(exec: &[u8], pos: usize) -> Result<u32> {
    exec.get(pos..pos + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(BBCBasicError::BadProgram)
}

/// Minimal built-in `Evaluator`: static-slot and general-variable value
/// storage plus a recursive-descent expression evaluator over `(source,
/// exec, pos)` triples.
#[derive(Debug)]
pub struct BuiltinEvaluator {
    statics: Vec<Value>,
    generals: HashMap<u32, Value>,
    return_stack: Vec<u32>,
    /// Selector value cached between `eval_case_selector` and the
    /// `case_clause_matches` calls that follow it.
    case_selector: Option<Value>,
    /// Backing generator for `RND`. Reseeded by `RND(-n)`, like the real
    /// machine's negative-seed convention.
    rng: StdRng,
    /// Last value `RND` produced, returned again by `RND(0)`.
    last_rnd: Value,
    #[cfg(test)]
    output: String,
}

impl BuiltinEvaluator {
    pub fn new() -> Self {
        Self {
            statics: (0..variables::STATIC_VAR_COUNT).map(|_| Value::Int(0)).collect(),
            generals: HashMap::new(),
            return_stack: Vec::new(),
            case_selector: None,
            rng: StdRng::from_entropy(),
            last_rnd: Value::Int(0),
            #[cfg(test)]
            output: String::new(),
        }
    }

    #[cfg(test)]
    pub fn output(&self) -> &str {
        &self.output
    }

    fn emit(&mut self, text: &str) {
        #[cfg(test)]
        self.output.push_str(text);
        #[cfg(not(test))]
        print!("{text}");
    }

    fn truthy(&self, value: &Value) -> Result<bool> {
        match value {
            Value::Int(n) => Ok(*n != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Str(_) => Err(BBCBasicError::TypeMismatch),
        }
    }

    fn values_equal(&self, a: &Value, b: &Value) -> Result<bool> {
        match self.compare(a.clone(), b.clone(), CmpOp::Eq)? {
            Value::Int(n) => Ok(n != 0),
            _ => unreachable!("compare always yields Int(-1)/Int(0)"),
        }
    }

    fn compare(&self, left: Value, right: Value, op: CmpOp) -> Result<Value> {
        let truth = match (&left, &right) {
            (Value::Str(a), Value::Str(b)) => match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
            },
            (Value::Str(_), _) | (_, Value::Str(_)) => return Err(BBCBasicError::TypeMismatch),
            _ => {
                let a = left.as_f64()?;
                let b = right.as_f64()?;
                match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                }
            }
        };
        Ok(if truth { Value::Int(-1) } else { Value::Int(0) })
    }

    fn add(&self, left: Value, right: Value) -> Result<Value> {
        match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => Err(BBCBasicError::TypeMismatch),
            (Value::Int(a), Value::Int(b)) => match a.checked_add(b) {
                Some(n) => Ok(Value::Int(n)),
                None => Ok(Value::Float(a as f64 + b as f64)),
            },
            (a, b) => Ok(Value::Float(a.as_f64()? + b.as_f64()?)),
        }
    }

    fn sub(&self, left: Value, right: Value) -> Result<Value> {
        match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Err(BBCBasicError::TypeMismatch),
            (Value::Int(a), Value::Int(b)) => match a.checked_sub(b) {
                Some(n) => Ok(Value::Int(n)),
                None => Ok(Value::Float(a as f64 - b as f64)),
            },
            (a, b) => Ok(Value::Float(a.as_f64()? - b.as_f64()?)),
        }
    }

    fn mul(&self, left: Value, right: Value) -> Result<Value> {
        match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Err(BBCBasicError::TypeMismatch),
            (Value::Int(a), Value::Int(b)) => match a.checked_mul(b) {
                Some(n) => Ok(Value::Int(n)),
                None => Ok(Value::Float(a as f64 * b as f64)),
            },
            (a, b) => Ok(Value::Float(a.as_f64()? * b.as_f64()?)),
        }
    }

    fn div(&self, left: Value, right: Value) -> Result<Value> {
        if let (Value::Str(_), _) | (_, Value::Str(_)) = (&left, &right) {
            return Err(BBCBasicError::TypeMismatch);
        }
        let b = right.as_f64()?;
        if b == 0.0 {
            return Err(BBCBasicError::DivisionByZero);
        }
        Ok(Value::Float(left.as_f64()? / b))
    }

    fn int_div(&self, left: Value, right: Value) -> Result<Value> {
        let b = right.as_i64()?;
        if b == 0 {
            return Err(BBCBasicError::DivisionByZero);
        }
        Ok(Value::Int(left.as_i64()? / b))
    }

    fn modulo(&self, left: Value, right: Value) -> Result<Value> {
        let b = right.as_i64()?;
        if b == 0 {
            return Err(BBCBasicError::DivisionByZero);
        }
        Ok(Value::Int(left.as_i64()? % b))
    }

    fn bitwise(&self, left: Value, right: Value, f: fn(i32, i32) -> i32) -> Result<Value> {
        let a = left.as_i64()? as i32;
        let b = right.as_i64()? as i32;
        Ok(Value::Int(f(a, b) as i64))
    }

    fn negate(&self, value: Value) -> Result<Value> {
        match value {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Str(_) => Err(BBCBasicError::TypeMismatch),
        }
    }

    fn bitwise_not(&self, value: Value) -> Result<Value> {
        let n = value.as_i64()? as i32;
        Ok(Value::Int(!n as i64))
    }

    fn pow(&self, base: Value, exp: Value) -> Result<Value> {
        if let (Value::Str(_), _) | (_, Value::Str(_)) = (&base, &exp) {
            return Err(BBCBasicError::TypeMismatch);
        }
        Ok(Value::Float(base.as_f64()?.powf(exp.as_f64()?)))
    }

    // --- expression grammar, lowest precedence first ---
    // or_expr -> and_expr -> compare_expr -> add_expr -> mul_expr
    //   -> unary_expr -> pow_expr -> primary

    fn eval_or(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        let (mut left, mut pos) = self.eval_and(symbols, source, exec, pos)?;
        loop {
            let kw = keywords();
            if let Some(len) = match_keyword(exec, pos, kw.or_) {
                let (right, next) = self.eval_and(symbols, source, exec, pos + len)?;
                left = self.bitwise(left, right, |a, b| a | b)?;
                pos = next;
            } else if let Some(len) = match_keyword(exec, pos, kw.eor) {
                let (right, next) = self.eval_and(symbols, source, exec, pos + len)?;
                left = self.bitwise(left, right, |a, b| a ^ b)?;
                pos = next;
            } else {
                break;
            }
        }
        Ok((left, pos))
    }

    fn eval_and(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        let (mut left, mut pos) = self.eval_compare(symbols, source, exec, pos)?;
        while let Some(len) = match_keyword(exec, pos, keywords().and_) {
            let (right, next) = self.eval_compare(symbols, source, exec, pos + len)?;
            left = self.bitwise(left, right, |a, b| a & b)?;
            pos = next;
        }
        Ok((left, pos))
    }

    fn eval_compare(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        let (mut left, mut pos) = self.eval_add(symbols, source, exec, pos)?;
        loop {
            let pair = |a: u8, b: u8| exec.get(pos) == Some(&a) && exec.get(pos + 1) == Some(&b);
            let (op, len) = if pair(b'<', b'>') {
                (CmpOp::Ne, 2)
            } else if pair(b'<', b'=') {
                (CmpOp::Le, 2)
            } else if pair(b'>', b'=') {
                (CmpOp::Ge, 2)
            } else if exec.get(pos) == Some(&b'=') {
                (CmpOp::Eq, 1)
            } else if exec.get(pos) == Some(&b'<') {
                (CmpOp::Lt, 1)
            } else if exec.get(pos) == Some(&b'>') {
                (CmpOp::Gt, 1)
            } else {
                break;
            };
            let (right, next) = self.eval_add(symbols, source, exec, pos + len)?;
            left = self.compare(left, right, op)?;
            pos = next;
        }
        Ok((left, pos))
    }

    fn eval_add(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        let (mut left, mut pos) = self.eval_mul(symbols, source, exec, pos)?;
        loop {
            if exec.get(pos) == Some(&b'+') {
                let (right, next) = self.eval_mul(symbols, source, exec, pos + 1)?;
                left = self.add(left, right)?;
                pos = next;
            } else if exec.get(pos) == Some(&b'-') {
                let (right, next) = self.eval_mul(symbols, source, exec, pos + 1)?;
                left = self.sub(left, right)?;
                pos = next;
            } else {
                break;
            }
        }
        Ok((left, pos))
    }

    fn eval_mul(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        let (mut left, mut pos) = self.eval_unary(symbols, source, exec, pos)?;
        loop {
            let kw = keywords();
            if exec.get(pos) == Some(&b'*') {
                let (right, next) = self.eval_unary(symbols, source, exec, pos + 1)?;
                left = self.mul(left, right)?;
                pos = next;
            } else if exec.get(pos) == Some(&b'/') {
                let (right, next) = self.eval_unary(symbols, source, exec, pos + 1)?;
                left = self.div(left, right)?;
                pos = next;
            } else if let Some(len) = match_keyword(exec, pos, kw.div_) {
                let (right, next) = self.eval_unary(symbols, source, exec, pos + len)?;
                left = self.int_div(left, right)?;
                pos = next;
            } else if let Some(len) = match_keyword(exec, pos, kw.mod_) {
                let (right, next) = self.eval_unary(symbols, source, exec, pos + len)?;
                left = self.modulo(left, right)?;
                pos = next;
            } else {
                break;
            }
        }
        Ok((left, pos))
    }

    fn eval_unary(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        if exec.get(pos) == Some(&b'-') {
            let (value, after) = self.eval_unary(symbols, source, exec, pos + 1)?;
            return Ok((self.negate(value)?, after));
        }
        if let Some(len) = match_keyword(exec, pos, keywords().not_) {
            let (value, after) = self.eval_unary(symbols, source, exec, pos + len)?;
            return Ok((self.bitwise_not(value)?, after));
        }
        self.eval_pow(symbols, source, exec, pos)
    }

    /// `^` is right-associative and binds tighter than unary `-`/`NOT`, so
    /// its right-hand side recurses into `eval_unary` (allowing `2^-1`)
    /// while its left-hand side is a bare primary.
    fn eval_pow(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        let (base, after) = self.eval_primary(symbols, source, exec, pos)?;
        if exec.get(after) == Some(&b'^') {
            let (exp, after2) = self.eval_unary(symbols, source, exec, after + 1)?;
            return Ok((self.pow(base, exp)?, after2));
        }
        Ok((base, after))
    }

    fn eval_primary(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(Value, usize)> {
        let kw = keywords();
        if let Some(len) = match_keyword(exec, pos, kw.true_) {
            return Ok((Value::Int(-1), pos + len));
        }
        if let Some(len) = match_keyword(exec, pos, kw.false_) {
            return Ok((Value::Int(0), pos + len));
        }
        if let Some(len) = match_keyword(exec, pos, kw.rnd) {
            let after_keyword = pos + len;
            if exec.get(after_keyword) == Some(&b'(') {
                let (arg, after_arg) = self.eval_or(symbols, source, exec, after_keyword + 1)?;
                if exec.get(after_arg) != Some(&b')') {
                    return Err(BBCBasicError::UnbalancedBrackets);
                }
                return Ok((self.eval_rnd(arg.as_i64()?), after_arg + 1));
            }
            return Ok((self.eval_rnd_bare(), after_keyword));
        }

        match exec.get(pos) {
            Some(&opcode::INTZERO) => Ok((Value::Int(0), pos + 1)),
            Some(&opcode::INTONE) => Ok((Value::Int(1), pos + 1)),
            Some(&opcode::SMALLINT) => {
                let n = *exec.get(pos + 1).ok_or(BBCBasicError::BadProgram)? as i64 + 1;
                Ok((Value::Int(n), pos + 2))
            }
            Some(&opcode::INTCON) => Ok((Value::Int(read_u32(exec, pos + 1)? as i64), pos + 5)),
            Some(&opcode::INT64CON) => {
                let bytes: [u8; 8] = exec
                    .get(pos + 1..pos + 9)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(BBCBasicError::BadProgram)?;
                Ok((Value::Int(u64::from_le_bytes(bytes) as i64), pos + 9))
            }
            Some(&opcode::FLOATZERO) => Ok((Value::Float(0.0), pos + 1)),
            Some(&opcode::FLOATONE) => Ok((Value::Float(1.0), pos + 1)),
            Some(&opcode::FLOATCON) => {
                let bytes: [u8; 8] = exec
                    .get(pos + 1..pos + 9)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(BBCBasicError::BadProgram)?;
                Ok((Value::Float(f64::from_ne_bytes(bytes)), pos + 9))
            }
            Some(&opcode::STRINGCON) => {
                let start = u16::from_le_bytes([exec[pos + 1], exec[pos + 2]]) as usize;
                let len = u16::from_le_bytes([exec[pos + 3], exec[pos + 4]]) as usize;
                let text = source.get(start..start + len).ok_or(BBCBasicError::BadProgram)?;
                Ok((Value::Str(String::from_utf8_lossy(text).into_owned()), pos + 5))
            }
            Some(&opcode::QSTRINGCON) => {
                let start = u16::from_le_bytes([exec[pos + 1], exec[pos + 2]]) as usize;
                let len = u16::from_le_bytes([exec[pos + 3], exec[pos + 4]]) as usize;
                Ok((Value::Str(read_qstring(source, start, len)), pos + 5))
            }
            Some(&opcode::STATICVAR) => {
                let index = *exec.get(pos + 1).ok_or(BBCBasicError::BadProgram)? as usize;
                let value = self.statics.get(index).cloned().ok_or(BBCBasicError::BadProgram)?;
                Ok((value, pos + 2))
            }
            Some(&opcode::STATINDVAR) => Err(BBCBasicError::IllegalFunction),
            Some(&opcode::VAR) => {
                let offset = read_u32(exec, pos + 1)?;
                let value = self
                    .generals
                    .get(&offset)
                    .cloned()
                    .ok_or_else(|| BBCBasicError::NoSuchVariable(symbols.name_at(offset).unwrap_or("?").to_string()))?;
                Ok((value, pos + 5))
            }
            Some(&b'(') => {
                let (value, after) = self.eval_or(symbols, source, exec, pos + 1)?;
                if exec.get(after) != Some(&b')') {
                    return Err(BBCBasicError::UnbalancedBrackets);
                }
                Ok((value, after + 1))
            }
            _ => Err(BBCBasicError::BadSyntax),
        }
    }

    /// `RND` with no argument: a full-range pseudo-random integer.
    fn eval_rnd_bare(&mut self) -> Value {
        let value = Value::Int(self.rng.gen::<i32>() as i64);
        self.last_rnd = value.clone();
        value
    }

    /// `RND(n)`: `0` repeats the last value produced, `1` is a real in
    /// `[0, 1)`, `n > 1` is an integer in `1..=n`, and a negative `n`
    /// reseeds the generator and echoes `n` back.
    fn eval_rnd(&mut self, n: i64) -> Value {
        let value = match n {
            0 => return self.last_rnd.clone(),
            1 => Value::Float(self.rng.gen::<f64>()),
            n if n > 1 => Value::Int(self.rng.gen_range(1..=n)),
            n => {
                self.rng = StdRng::seed_from_u64(n as u64);
                Value::Int(n)
            }
        };
        self.last_rnd = value.clone();
        value
    }

    fn exec_print(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], mut pos: usize) -> Result<usize> {
        let mut trailing_sep = false;
        loop {
            match exec.get(pos) {
                None | Some(&opcode::COLON) => break,
                Some(&b',') => {
                    self.emit("\t");
                    pos += 1;
                    trailing_sep = true;
                }
                Some(&b';') => {
                    pos += 1;
                    trailing_sep = true;
                }
                _ => {
                    let (value, next) = self.eval_or(symbols, source, exec, pos)?;
                    self.emit(&value.to_string());
                    pos = next;
                    trailing_sep = false;
                }
            }
        }
        if !trailing_sep {
            self.emit("\n");
        }
        Ok(pos)
    }

    fn exec_assignment_var(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<StatementOutcome> {
        let offset = read_u32(exec, pos + 1)?;
        if exec.get(pos + 5) != Some(&b'=') {
            return Err(BBCBasicError::BadSyntax);
        }
        let (value, next) = self.eval_or(symbols, source, exec, pos + 6)?;
        self.generals.insert(offset, value);
        Ok(StatementOutcome::Continue(next))
    }

    fn exec_assignment_static(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<StatementOutcome> {
        let index = *exec.get(pos + 1).ok_or(BBCBasicError::BadProgram)? as usize;
        if exec.get(pos + 2) != Some(&b'=') {
            return Err(BBCBasicError::BadSyntax);
        }
        let (value, next) = self.eval_or(symbols, source, exec, pos + 3)?;
        *self.statics.get_mut(index).ok_or(BBCBasicError::BadProgram)? = value;
        Ok(StatementOutcome::Continue(next))
    }

    /// Reads a resolved (or still-deferred) line-target operand starting at
    /// `pos`, the position right after a `GOTO`/`GOSUB` keyword opcode.
    fn read_line_target(&self, exec: &[u8], pos: usize) -> Result<u32> {
        match exec.get(pos) {
            Some(&opcode::LINENUM) => read_u32(exec, pos + 1),
            Some(&opcode::XLINENUM) => Err(BBCBasicError::UnresolvedLineReference(read_u32(exec, pos + 1)? as u16)),
            _ => Err(BBCBasicError::BadSyntax),
        }
    }

    fn exec_keyword_statement(
        &mut self,
        symbols: &mut SymbolTable,
        source: &[u8],
        exec: &[u8],
        pos: usize,
        exec_base: u32,
    ) -> Result<StatementOutcome> {
        let kw = keywords();

        if let Some(len) = match_keyword(exec, pos, kw.print) {
            let next = self.exec_print(symbols, source, exec, pos + len)?;
            return Ok(StatementOutcome::Continue(next));
        }
        if let Some(len) = match_keyword(exec, pos, kw.goto) {
            let addr = self.read_line_target(exec, pos + len)?;
            return Ok(StatementOutcome::JumpToAddress(addr));
        }
        if let Some(len) = match_keyword(exec, pos, kw.gosub) {
            let target_pos = pos + len;
            let addr = self.read_line_target(exec, target_pos)?;
            self.return_stack.push(exec_base + (target_pos + 5) as u32);
            return Ok(StatementOutcome::JumpToAddress(addr));
        }
        if match_keyword(exec, pos, kw.return_).is_some() {
            let addr = self.return_stack.pop().ok_or(BBCBasicError::BadSyntax)?;
            return Ok(StatementOutcome::JumpToAddress(addr));
        }
        if match_keyword(exec, pos, kw.end_).is_some() || match_keyword(exec, pos, kw.stop_).is_some() {
            return Ok(StatementOutcome::EndProgram);
        }

        Err(BBCBasicError::SyntaxError {
            message: format!("unsupported statement opcode ${:02X}", exec.get(pos).copied().unwrap_or(0)),
            line: None,
        })
    }
}

impl Default for BuiltinEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for BuiltinEvaluator {
    fn eval_condition(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(bool, usize)> {
        let (value, next) = self.eval_or(symbols, source, exec, pos)?;
        Ok((self.truthy(&value)?, next))
    }

    fn eval_case_selector(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<usize> {
        let (value, next) = self.eval_or(symbols, source, exec, pos)?;
        self.case_selector = Some(value);
        Ok(next)
    }

    fn case_clause_matches(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], mut pos: usize) -> Result<(bool, usize)> {
        let selector = self.case_selector.clone().ok_or(BBCBasicError::BadSyntax)?;
        let mut matched = false;
        loop {
            let (value, next) = self.eval_or(symbols, source, exec, pos)?;
            if !matched && self.values_equal(&selector, &value)? {
                matched = true;
            }
            pos = next;
            if exec.get(pos) == Some(&b',') {
                pos += 1;
            } else {
                break;
            }
        }
        if exec.get(pos) != Some(&opcode::COLON) {
            return Err(BBCBasicError::BadSyntax);
        }
        Ok((matched, pos + 1))
    }

    fn exec_statement(
        &mut self,
        symbols: &mut SymbolTable,
        source: &[u8],
        exec: &[u8],
        pos: usize,
        exec_base: u32,
    ) -> Result<StatementOutcome> {
        match exec.get(pos) {
            Some(&opcode::VAR) => self.exec_assignment_var(symbols, source, exec, pos),
            Some(&opcode::STATICVAR) => self.exec_assignment_static(symbols, source, exec, pos),
            Some(&opcode::STATINDVAR) => Err(BBCBasicError::IllegalFunction),
            _ => self.exec_keyword_statement(symbols, source, exec, pos, exec_base),
        }
    }
}
