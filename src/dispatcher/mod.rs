//! Statement dispatcher: the interpreter's inner loop over a resolved exec
//! stream.
//!
//! The dispatcher owns control flow — which opcode runs next — but not
//! expression evaluation or variable storage; those live behind the
//! [`Evaluator`] trait so this module never hard-codes arithmetic, string,
//! or runtime-type semantics. What it *does* own: statement separators,
//! end-of-line/end-of-program transitions, `BADLINE` diagnostics, and the
//! structured-statement heads (`IF`/`ELSE`/`WHEN`/`OTHERWISE`/`WHILE`/
//! `CASE`) whose branch-offset slots get filled in on first execution, per
//! the translator's reserved-slot layout.
//!
//! **Scope note.** The branch-offset operands the translator reserves for
//! these heads are 16 bits (32 for `CASE`'s jump-table pointer) — too
//! narrow to address an arbitrary position across a whole program's
//! concatenated exec streams the way a resolved `LINENUM` does. That only
//! makes sense if these constructs stay within a single tokenized line
//! (the common `WHILE cond:...:ENDWHILE` and `IF...THEN...ELSE...` written
//! with `:`-separated bodies on one line), so that's what this dispatcher
//! implements: structured statements are resolved and branched entirely
//! within their own line's exec bytes. A structured statement whose body
//! spans multiple program lines is not supported.

use std::sync::OnceLock;

use crate::config::Config;
use crate::error::{BBCBasicError, Result};
use crate::keyword::{self, TokenVariant};
use crate::opcode;
use crate::program::ProgramStore;
use crate::variables::SymbolTable;

/// What a non-control statement did, reported back to the dispatcher so it
/// can decide what runs next.
pub enum StatementOutcome {
    /// Resume in the current line at this exec-byte position.
    Continue(usize),
    /// `GOTO`/`GOSUB`-style transfer to an absolute, already-resolved exec
    /// address — potentially in a different line.
    JumpToAddress(u32),
    /// `END`/`STOP`, or any statement that terminates the run.
    EndProgram,
}

/// The boundary between statement-level control flow (owned by this
/// module) and expression/runtime semantics (owned by the collaborator
/// that implements this trait — see `executor` for the minimal built-in
/// one this crate ships).
pub trait Evaluator {
    /// Evaluate a boolean expression starting at `pos` (an `IF` or `WHILE`
    /// condition). Returns the truth value and the position just past it.
    /// `source` is the line's source-form bytes — a string literal's exec
    /// operand is a `(start, length)` pair pointing back into it, since the
    /// translator never copies string contents into the exec stream itself.
    fn eval_condition(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(bool, usize)>;

    /// Evaluate a `CASE` statement's selector expression starting at `pos`,
    /// caching it for subsequent [`case_clause_matches`] calls against the
    /// same statement. Returns the position just past the expression.
    fn eval_case_selector(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<usize>;

    /// Compare the cached selector against one `WHEN` clause's
    /// comma-separated value list starting at `pos`. Returns whether any
    /// value matched and the position just past the list.
    fn case_clause_matches(&mut self, symbols: &mut SymbolTable, source: &[u8], exec: &[u8], pos: usize) -> Result<(bool, usize)>;

    /// Execute one non-control statement starting at `pos` (assignment,
    /// `PRINT`, a bare command, ...), reporting what should happen next.
    /// `exec_base` is the whole-program cumulative exec address of
    /// `exec[0]` (the current line's own start) — `GOSUB` needs it to
    /// compute an absolute return address before jumping away, since the
    /// return may land in a different line than the call.
    fn exec_statement(
        &mut self,
        symbols: &mut SymbolTable,
        source: &[u8],
        exec: &[u8],
        pos: usize,
        exec_base: u32,
    ) -> Result<StatementOutcome>;
}

/// `THEN`, `ENDWHILE` and `ENDCASE` have no dedicated exec opcode — unlike
/// `WHEN`/`OTHERWISE`/`WHILE`/`CASE`, the translator leaves them as plain
/// pass-through keyword tokens, so the dispatcher has to recognize them by
/// their assigned keyword opcode instead of a named constant.
struct ControlKeywords {
    then_: TokenVariant,
    endwhile: TokenVariant,
    endcase: TokenVariant,
}

fn control_keywords() -> &'static ControlKeywords {
    static KEYWORDS: OnceLock<ControlKeywords> = OnceLock::new();
    KEYWORDS.get_or_init(|| {
        let kw = |s: &str| *keyword::find(s).unwrap_or_else(|| panic!("missing keyword {s}"));
        ControlKeywords {
            then_: kw("THEN").first,
            endwhile: kw("ENDWHILE").first,
            endcase: kw("ENDCASE").first,
        }
    })
}

fn variant_matches(exec: &[u8], pos: usize, variant: TokenVariant) -> bool {
    match variant.class.prefix_byte() {
        Some(prefix) => exec.get(pos) == Some(&prefix) && exec.get(pos + 1) == Some(&variant.opcode),
        None => exec.get(pos) == Some(&variant.opcode),
    }
}

fn variant_len(variant: TokenVariant) -> usize {
    if variant.class.prefix_byte().is_some() {
        2
    } else {
        1
    }
}

/// Scans forward from `pos`, treating any byte in `openers` as increasing
/// nesting depth and any byte in `closers` as decreasing it, and returns
/// the position of the first `closers` byte seen at depth zero. Returns
/// `exec.len()` if the line ends first (no matching closer — the
/// construct's body runs to the end of the line).
fn scan_to_closer(exec: &[u8], mut pos: usize, openers: &[u8], closers: &[u8]) -> Result<usize> {
    let mut depth = 0usize;
    while pos < exec.len() {
        let op = exec[pos];
        if closers.contains(&op) {
            if depth == 0 {
                return Ok(pos);
            }
            depth -= 1;
        } else if openers.contains(&op) {
            depth += 1;
        }
        pos += opcode::skip(exec, pos).ok_or(BBCBasicError::BadProgram)?;
    }
    Ok(exec.len())
}

const IF_OPENERS: [u8; 2] = [opcode::XIF, opcode::IF];
const ELSE_CLOSERS: [u8; 4] = [opcode::XELSE, opcode::ELSE, opcode::XLHELSE, opcode::LHELSE];
const WHILE_OPENERS: [u8; 2] = [opcode::XWHILE, opcode::WHILE];
const CASE_OPENERS: [u8; 2] = [opcode::XCASE, opcode::CASE];

fn read_u16(exec: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([exec[pos], exec[pos + 1]])
}

fn write_u16(exec: &mut [u8], pos: usize, value: u16) {
    exec[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
}

/// Where execution is: the line currently running, and the byte offset
/// into that line's exec bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecPointer {
    pub line_number: u16,
    pub pos: usize,
}

/// Drives one program (or one immediate-mode line) through its resolved
/// exec stream, handling structured control flow itself and delegating
/// everything else to an [`Evaluator`].
pub struct Dispatcher<'a, E: Evaluator> {
    program: &'a mut ProgramStore,
    symbols: &'a mut SymbolTable,
    config: &'a Config,
    evaluator: &'a mut E,
    loop_stack: Vec<usize>,
}

impl<'a, E: Evaluator> Dispatcher<'a, E> {
    pub fn new(program: &'a mut ProgramStore, symbols: &'a mut SymbolTable, config: &'a Config, evaluator: &'a mut E) -> Self {
        Self {
            program,
            symbols,
            config,
            evaluator,
            loop_stack: Vec::new(),
        }
    }

    /// Run from `start` to completion (end of store, `END`/`STOP`, or a
    /// propagated error).
    pub fn run(&mut self, start: u16) -> Result<()> {
        let mut at = ExecPointer { line_number: start, pos: 0 };
        loop {
            match self.step(at)? {
                Some(next) => at = next,
                None => return Ok(()),
            }
        }
    }

    /// Execute exactly one opcode at `at`, returning the next pointer, or
    /// `None` if the program just ended.
    pub fn step(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let exec_len = self
            .program
            .get_line(at.line_number)
            .ok_or(BBCBasicError::BadProgram)?
            .exec_bytes()
            .len();

        if at.pos >= exec_len {
            if self.config.trace_lines {
                log::trace!("[{}]", at.line_number);
            }
            return Ok(self.next_line(at.line_number));
        }

        let op = self.program.get_line(at.line_number).unwrap().exec_bytes()[at.pos];

        if op == opcode::COLON {
            return Ok(Some(ExecPointer { pos: at.pos + 1, ..at }));
        }

        match op {
            opcode::BADLINE_MARK => {
                let code = self.program.get_line(at.line_number).unwrap().exec_bytes()[at.pos + 1];
                Err(BBCBasicError::from_badline_code(code))
            }
            opcode::XIF | opcode::IF => self.dispatch_if(at),
            opcode::XELSE | opcode::ELSE | opcode::XLHELSE | opcode::LHELSE => self.dispatch_else(at),
            opcode::XWHILE | opcode::WHILE => self.dispatch_while(at),
            op if op == control_keywords().endwhile.opcode => self.dispatch_endwhile(at),
            opcode::XCASE | opcode::CASE => self.dispatch_case(at),
            opcode::XWHEN | opcode::WHEN | opcode::XOTHERWISE | opcode::OTHERWISE => {
                self.dispatch_case_fallthrough(at)
            }
            _ => self.dispatch_statement(at),
        }
    }

    fn next_line(&mut self, current: u16) -> Option<ExecPointer> {
        let next = self
            .program
            .get_line_numbers()
            .into_iter()
            .find(|&n| n > current);
        next.map(|line_number| ExecPointer { line_number, pos: 0 })
    }

    fn dispatch_statement(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let line = self.program.get_line(at.line_number).unwrap();
        let source = line.source_bytes().to_vec();
        let exec = line.exec_bytes().to_vec();
        let exec_base = self.program.exec_address_of(at.line_number).ok_or(BBCBasicError::BadProgram)?;
        match self.evaluator.exec_statement(self.symbols, &source, &exec, at.pos, exec_base)? {
            StatementOutcome::Continue(pos) => Ok(Some(ExecPointer { pos, ..at })),
            StatementOutcome::JumpToAddress(addr) => self.jump_to_address(addr),
            StatementOutcome::EndProgram => Ok(None),
        }
    }

    fn jump_to_address(&mut self, addr: u32) -> Result<Option<ExecPointer>> {
        let line_number = self
            .program
            .line_number_at_exec_address(addr)
            .ok_or(BBCBasicError::BadProgram)?;
        let base = self.program.exec_address_of(line_number).ok_or(BBCBasicError::BadProgram)?;
        Ok(Some(ExecPointer { line_number, pos: (addr - base) as usize }))
    }

    fn dispatch_if(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let line = self.program.get_line(at.line_number).unwrap();
        let source = line.source_bytes().to_vec();
        let exec = line.exec_bytes().to_vec();
        let cond_start = at.pos + 5;
        let (truth, pos_after_cond) = self.evaluator.eval_condition(self.symbols, &source, &exec, cond_start)?;

        let kw = control_keywords();
        if !variant_matches(&exec, pos_after_cond, kw.then_) {
            return Err(BBCBasicError::BadSyntax);
        }
        let then_start = pos_after_cond + variant_len(kw.then_);

        let (else_start, end) = if exec[at.pos] == opcode::XIF {
            let else_pos = scan_to_closer(&exec, then_start, &IF_OPENERS, &ELSE_CLOSERS)?;
            // Every ELSE/LHELSE variant carries a 2-byte operand, so the
            // body starts 3 bytes past whichever one was found.
            let else_start = if else_pos < exec.len() { else_pos + 3 } else { exec.len() };
            let end = exec.len();

            let bytes = self.program.get_line_mut(at.line_number).unwrap().exec_bytes_mut();
            bytes[at.pos] = opcode::IF;
            write_u16(bytes, at.pos + 1, else_start as u16);
            write_u16(bytes, at.pos + 3, end as u16);
            (else_start, end)
        } else {
            let bytes = self.program.get_line(at.line_number).unwrap().exec_bytes();
            (read_u16(bytes, at.pos + 1) as usize, read_u16(bytes, at.pos + 3) as usize)
        };

        if truth {
            Ok(Some(ExecPointer { pos: then_start, ..at }))
        } else if else_start >= end || else_start >= exec.len() {
            Ok(Some(ExecPointer { pos: exec.len(), ..at }))
        } else {
            Ok(Some(ExecPointer { pos: else_start, ..at }))
        }
    }

    /// Reached by falling out of a `THEN` branch straight into the else
    /// clause — this instance isn't a branch target (those jump straight
    /// past it), so its job is just to skip the else-clause body.
    fn dispatch_else(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let exec = self.program.get_line(at.line_number).unwrap().exec_bytes().to_vec();
        let unresolved = exec[at.pos] == opcode::XELSE || exec[at.pos] == opcode::XLHELSE;
        let end = if unresolved {
            let end = exec.len();
            let resolved = opcode::resolve(exec[at.pos]).ok_or(BBCBasicError::BadProgram)?;
            let bytes = self.program.get_line_mut(at.line_number).unwrap().exec_bytes_mut();
            bytes[at.pos] = resolved;
            write_u16(bytes, at.pos + 1, end as u16);
            end
        } else {
            read_u16(&exec, at.pos + 1) as usize
        };
        Ok(Some(ExecPointer { pos: end, ..at }))
    }

    fn dispatch_while(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let line = self.program.get_line(at.line_number).unwrap();
        let source = line.source_bytes().to_vec();
        let exec = line.exec_bytes().to_vec();
        let cond_start = at.pos + 3;

        let exit = if exec[at.pos] == opcode::XWHILE {
            let endwhile_pos = scan_to_closer(&exec, cond_start, &WHILE_OPENERS, &[control_keywords().endwhile.opcode])?;
            let exit = if endwhile_pos < exec.len() {
                endwhile_pos + variant_len(control_keywords().endwhile)
            } else {
                exec.len()
            };
            let bytes = self.program.get_line_mut(at.line_number).unwrap().exec_bytes_mut();
            bytes[at.pos] = opcode::WHILE;
            write_u16(bytes, at.pos + 1, exit as u16);
            exit
        } else {
            read_u16(&exec, at.pos + 1) as usize
        };

        let (truth, pos_after_cond) = self.evaluator.eval_condition(self.symbols, &source, &exec, cond_start)?;
        if truth {
            self.loop_stack.push(at.pos);
            Ok(Some(ExecPointer { pos: pos_after_cond, ..at }))
        } else {
            Ok(Some(ExecPointer { pos: exit, ..at }))
        }
    }

    fn dispatch_endwhile(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let while_pos = self.loop_stack.pop().ok_or(BBCBasicError::BadSyntax)?;
        Ok(Some(ExecPointer { pos: while_pos, ..at }))
    }

    /// `CASE`'s selector expression is evaluated fresh every time this
    /// statement runs (it may sit inside a loop), so there is nothing to
    /// cache in the resolved opcode's operand — resolving `XCASE` to `CASE`
    /// only matters for `LIST`/de-resolve, not for dispatch. This dialect's
    /// keyword table has no `OF`, so `CASE <expr>` runs straight into its
    /// first `WHEN` with no separator keyword between them.
    fn dispatch_case(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let line = self.program.get_line(at.line_number).unwrap();
        let source = line.source_bytes().to_vec();
        let exec = line.exec_bytes().to_vec();
        if exec[at.pos] == opcode::XCASE {
            let bytes = self.program.get_line_mut(at.line_number).unwrap().exec_bytes_mut();
            bytes[at.pos] = opcode::CASE;
        }

        let selector_start = at.pos + 5;
        let mut pos = self.evaluator.eval_case_selector(self.symbols, &source, &exec, selector_start)?;
        let endcase_op = control_keywords().endcase.opcode;

        loop {
            match exec.get(pos) {
                Some(&opcode::XWHEN) | Some(&opcode::WHEN) => {
                    let unresolved = exec[pos] == opcode::XWHEN;
                    let values_start = pos + 3;
                    let (matched, clause_body) = self.evaluator.case_clause_matches(self.symbols, &source, &exec, values_start)?;
                    let next_clause =
                        scan_to_closer(&exec, clause_body, &CASE_OPENERS, &[opcode::XWHEN, opcode::WHEN, opcode::XOTHERWISE, opcode::OTHERWISE, endcase_op])?;
                    if unresolved {
                        let bytes = self.program.get_line_mut(at.line_number).unwrap().exec_bytes_mut();
                        bytes[pos] = opcode::WHEN;
                        write_u16(bytes, pos + 1, next_clause as u16);
                    }
                    if matched {
                        return Ok(Some(ExecPointer { pos: clause_body, ..at }));
                    }
                    pos = next_clause;
                }
                Some(&opcode::XOTHERWISE) | Some(&opcode::OTHERWISE) => {
                    if exec[pos] == opcode::XOTHERWISE {
                        let bytes = self.program.get_line_mut(at.line_number).unwrap().exec_bytes_mut();
                        bytes[pos] = opcode::OTHERWISE;
                        write_u16(bytes, pos + 1, 0);
                    }
                    return Ok(Some(ExecPointer { pos: pos + 3, ..at }));
                }
                Some(&op) if op == endcase_op => return Ok(Some(ExecPointer { pos: pos + 1, ..at })),
                None => return Ok(Some(ExecPointer { pos: exec.len(), ..at })),
                _ => return Err(BBCBasicError::BadSyntax),
            }
        }
    }

    /// Reached when execution falls out of a matched `WHEN`/`OTHERWISE`
    /// clause body straight into the next clause marker: the whole `CASE`
    /// is done, so this skips everything up to (and past) its `ENDCASE`
    /// rather than re-testing the next clause.
    fn dispatch_case_fallthrough(&mut self, at: ExecPointer) -> Result<Option<ExecPointer>> {
        let exec = self.program.get_line(at.line_number).unwrap().exec_bytes().to_vec();
        let endcase_op = control_keywords().endcase.opcode;
        let end = scan_to_closer(&exec, at.pos, &CASE_OPENERS, &[endcase_op])?;
        let pos = if end < exec.len() { end + 1 } else { exec.len() };
        Ok(Some(ExecPointer { pos, ..at }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::line::TokenizedLine;
    use crate::resolver;
    use crate::tokenizer;
    use crate::translator;

    struct ScriptedEvaluator {
        conditions: Vec<bool>,
        case_matches: Vec<bool>,
    }

    impl Evaluator for ScriptedEvaluator {
        fn eval_condition(&mut self, _symbols: &mut SymbolTable, _source: &[u8], exec: &[u8], pos: usize) -> Result<(bool, usize)> {
            let mut p = pos;
            let truth = self.conditions.remove(0);
            while p < exec.len() && !variant_matches(exec, p, control_keywords().then_) {
                p += opcode::skip(exec, p).ok_or(BBCBasicError::BadProgram)?;
            }
            Ok((truth, p))
        }

        fn eval_case_selector(&mut self, _symbols: &mut SymbolTable, _source: &[u8], exec: &[u8], pos: usize) -> Result<usize> {
            let mut p = pos;
            while p < exec.len() && !matches!(exec[p], opcode::XWHEN | opcode::WHEN | opcode::XOTHERWISE | opcode::OTHERWISE) {
                p += opcode::skip(exec, p).ok_or(BBCBasicError::BadProgram)?;
            }
            Ok(p)
        }

        fn case_clause_matches(&mut self, _symbols: &mut SymbolTable, _source: &[u8], exec: &[u8], pos: usize) -> Result<(bool, usize)> {
            let mut p = pos;
            while p < exec.len() && exec[p] != opcode::COLON {
                p += opcode::skip(exec, p).ok_or(BBCBasicError::BadProgram)?;
            }
            let matched = self.case_matches.remove(0);
            Ok((matched, p + 1))
        }

        fn exec_statement(
            &mut self,
            _symbols: &mut SymbolTable,
            _source: &[u8],
            exec: &[u8],
            pos: usize,
            _exec_base: u32,
        ) -> Result<StatementOutcome> {
            let len = opcode::skip(exec, pos).ok_or(BBCBasicError::BadProgram)?;
            Ok(StatementOutcome::Continue(pos + len))
        }
    }

    fn line_for(text: &[u8]) -> TokenizedLine {
        let config = Config::default();
        let out = tokenizer::tokenize(text, true, &config);
        assert!(out.error.is_none(), "{:?}", out.error);
        let exec = translator::translate(&out.source, &config).unwrap();
        TokenizedLine::assemble(out.line_number, &out.source, &exec, 1024).unwrap()
    }

    #[test]
    fn if_true_branch_falls_through_and_skips_else() {
        let mut program = ProgramStore::new();
        let mut line = line_for(br#"10 IF A%>0 THEN PRINT "yes" ELSE PRINT "no""#);
        let mut symbols = SymbolTable::new();
        resolver::resolve(&mut line, &program, &mut symbols).unwrap();
        program.store_line(line);

        let config = Config::default();
        let mut eval = ScriptedEvaluator { conditions: vec![true], case_matches: vec![] };
        let mut dispatcher = Dispatcher::new(&mut program, &mut symbols, &config, &mut eval);

        // IF -> THEN-branch start
        let at = dispatcher.step(ExecPointer { line_number: 10, pos: 0 }).unwrap().unwrap();
        // PRINT "yes" consumed as one opaque statement
        let at = dispatcher.step(at).unwrap().unwrap();
        // Falling into ELSE should skip its body straight to end of line.
        let exec_len = dispatcher.program.get_line(10).unwrap().exec_bytes().len();
        let at = dispatcher.step(at).unwrap().unwrap();
        assert_eq!(at.pos, exec_len);
    }

    #[test]
    fn if_false_branch_jumps_directly_to_else_body() {
        let mut program = ProgramStore::new();
        let mut line = line_for(br#"10 IF A%>0 THEN PRINT "yes" ELSE PRINT "no""#);
        let mut symbols = SymbolTable::new();
        resolver::resolve(&mut line, &program, &mut symbols).unwrap();
        program.store_line(line);

        let config = Config::default();
        let mut eval = ScriptedEvaluator { conditions: vec![false], case_matches: vec![] };
        let mut dispatcher = Dispatcher::new(&mut program, &mut symbols, &config, &mut eval);

        let at = dispatcher.step(ExecPointer { line_number: 10, pos: 0 }).unwrap().unwrap();
        let exec = dispatcher.program.get_line(10).unwrap().exec_bytes().to_vec();
        // The position landed on should be the start of the else-branch's
        // PRINT statement, not the then-branch's.
        let print = keyword::find("PRINT").unwrap().first;
        assert!(variant_matches(&exec, at.pos, print));
    }

    #[test]
    fn while_loop_re_enters_on_endwhile() {
        let mut program = ProgramStore::new();
        let mut line = line_for(b"10 WHILE A%<3:A%=A%+1:ENDWHILE");
        let mut symbols = SymbolTable::new();
        resolver::resolve(&mut line, &program, &mut symbols).unwrap();
        program.store_line(line);

        let config = Config::default();
        let mut eval = ScriptedEvaluator { conditions: vec![true, true, false], case_matches: vec![] };
        let mut dispatcher = Dispatcher::new(&mut program, &mut symbols, &config, &mut eval);

        let mut at = ExecPointer { line_number: 10, pos: 0 };
        // WHILE(true) -> body
        at = dispatcher.step(at).unwrap().unwrap();
        // A%=A%+1 (one opaque statement)
        at = dispatcher.step(at).unwrap().unwrap();
        // ':'
        at = dispatcher.step(at).unwrap().unwrap();
        // ENDWHILE -> back to WHILE
        at = dispatcher.step(at).unwrap().unwrap();
        assert_eq!(at.pos, 0);
        // WHILE(true) again -> body
        at = dispatcher.step(at).unwrap().unwrap();
        at = dispatcher.step(at).unwrap().unwrap();
        at = dispatcher.step(at).unwrap().unwrap();
        at = dispatcher.step(at).unwrap().unwrap();
        assert_eq!(at.pos, 0);
        // WHILE(false) -> exit past ENDWHILE
        at = dispatcher.step(at).unwrap().unwrap();
        let exec_len = dispatcher.program.get_line(10).unwrap().exec_bytes().len();
        assert_eq!(at.pos, exec_len);
    }

    #[test]
    fn case_dispatches_straight_to_the_first_matching_when_body() {
        let mut program = ProgramStore::new();
        let mut line = line_for(b"10 CASE A% WHEN 1:PRINT 1:WHEN 2:PRINT 2:ENDCASE");
        let mut symbols = SymbolTable::new();
        resolver::resolve(&mut line, &program, &mut symbols).unwrap();
        program.store_line(line);

        let config = Config::default();
        let mut eval = ScriptedEvaluator { conditions: vec![], case_matches: vec![true] };
        let mut dispatcher = Dispatcher::new(&mut program, &mut symbols, &config, &mut eval);

        let at = dispatcher.step(ExecPointer { line_number: 10, pos: 0 }).unwrap().unwrap();
        let exec = dispatcher.program.get_line(10).unwrap().exec_bytes().to_vec();
        let print = keyword::find("PRINT").unwrap().first;
        assert!(variant_matches(&exec, at.pos, print));

        // Running the matched clause's statement should eventually fall
        // into the fallthrough handler on hitting the second WHEN, skipping
        // straight to past ENDCASE rather than re-testing that clause.
        let exec_len = dispatcher.program.get_line(10).unwrap().exec_bytes().len();
        let mut at = at;
        for _ in 0..10 {
            if at.pos == exec_len {
                break;
            }
            at = dispatcher.step(at).unwrap().unwrap();
        }
        assert_eq!(at.pos, exec_len);
    }

    #[test]
    fn case_falls_to_otherwise_when_no_when_clause_matches() {
        let mut program = ProgramStore::new();
        let mut line = line_for(b"10 CASE A% WHEN 1:PRINT 1:OTHERWISE:PRINT 2:ENDCASE");
        let mut symbols = SymbolTable::new();
        resolver::resolve(&mut line, &program, &mut symbols).unwrap();
        program.store_line(line);

        let config = Config::default();
        let mut eval = ScriptedEvaluator { conditions: vec![], case_matches: vec![false] };
        let mut dispatcher = Dispatcher::new(&mut program, &mut symbols, &config, &mut eval);

        let at = dispatcher.step(ExecPointer { line_number: 10, pos: 0 }).unwrap().unwrap();
        let exec = dispatcher.program.get_line(10).unwrap().exec_bytes().to_vec();
        let print = keyword::find("PRINT").unwrap().first;
        assert!(variant_matches(&exec, at.pos, print));
    }

    #[test]
    fn trace_lines_logs_each_line_start_without_panicking() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut program = ProgramStore::new();
        let mut line = line_for(b"10 PRINT 1");
        let mut symbols = SymbolTable::new();
        resolver::resolve(&mut line, &program, &mut symbols).unwrap();
        program.store_line(line);

        let mut config = Config::default();
        config.trace_lines = true;
        let mut eval = ScriptedEvaluator { conditions: vec![], case_matches: vec![] };
        let mut dispatcher = Dispatcher::new(&mut program, &mut symbols, &config, &mut eval);

        let at = dispatcher.step(ExecPointer { line_number: 10, pos: 0 }).unwrap().unwrap();
        let exec_len = dispatcher.program.get_line(10).unwrap().exec_bytes().len();
        assert_eq!(at.pos, exec_len);
        // One more step crosses the end-of-line boundary, where trace_lines
        // emits the `log::trace!` line this test exists to exercise.
        assert!(dispatcher.step(at).unwrap().is_none());
    }
}
