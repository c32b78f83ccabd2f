use bbc_basic_tokenizer::dispatcher::Dispatcher;
use bbc_basic_tokenizer::executor::BuiltinEvaluator;
use bbc_basic_tokenizer::line::{TokenizedLine, NOLINENO};
use bbc_basic_tokenizer::lister::{self, ListDepth};
use bbc_basic_tokenizer::program::ProgramStore;
use bbc_basic_tokenizer::resolver;
use bbc_basic_tokenizer::tokenizer;
use bbc_basic_tokenizer::translator;
use bbc_basic_tokenizer::variables::SymbolTable;
use bbc_basic_tokenizer::Config;
use std::io::{self, Write};

/// Session state threaded through the REPL: the stored program, the symbol
/// table (shared across RUN and immediate mode so direct-mode commands can
/// see variables a program run left behind), and the evaluator backing
/// direct-mode execution. `RUN` gets a fresh evaluator of its own so a
/// program run starts from a clean variable set, matching the rest of the
/// BASIC family's behavior.
struct Session {
    config: Config,
    program: ProgramStore,
    symbols: SymbolTable,
    direct_evaluator: BuiltinEvaluator,
}

impl Session {
    fn new() -> Self {
        Self {
            config: Config::default(),
            program: ProgramStore::new(),
            symbols: SymbolTable::new(),
            direct_evaluator: BuiltinEvaluator::new(),
        }
    }

    /// Tokenizes and translates one line of text into an assembled,
    /// resolved `TokenizedLine`.
    fn assemble_line(&mut self, text: &[u8], numbered_allowed: bool) -> Result<TokenizedLine, String> {
        let out = tokenizer::tokenize(text, numbered_allowed, &self.config);
        if let Some(err) = out.error {
            return Err(format!("{err}"));
        }
        let exec = translator::translate(&out.source, &self.config).map_err(|e| e.to_string())?;
        TokenizedLine::assemble(out.line_number, &out.source, &exec, bbc_basic_tokenizer::line::DEFAULT_MAX_LINE_LEN)
            .map_err(|e| e.to_string())
    }

    /// Re-resolves every stored line against the current program. Cheap
    /// enough at REPL scale, and simpler than tracking which lines still
    /// carry a deferred forward reference — storing a new line may resolve
    /// any number of earlier ones (`GOTO`s to it, `GOTO`s past it, ...).
    fn reresolve_program(&mut self) {
        for number in self.program.get_line_numbers() {
            let mut line = self.program.get_line(number).unwrap().clone();
            let _ = resolver::resolve(&mut line, &self.program, &mut self.symbols);
            self.program.store_line(line);
        }
    }

    fn store_or_delete(&mut self, line: TokenizedLine) {
        if line.exec_bytes().is_empty() && line.source_bytes().is_empty() {
            self.program.delete_line(line.line_number());
        } else {
            self.program.store_line(line);
            self.reresolve_program();
        }
    }

    /// Runs one immediate-mode statement. Stored transiently under
    /// [`NOLINENO`], the one line number `TokenizedLine::assemble` accepts
    /// above `MAX_LINE_NUMBER` — since it sorts higher than every legal
    /// stored line, the dispatcher's "next line" search never finds a
    /// successor, so a single `Dispatcher::run` executes exactly this line
    /// and stops.
    fn run_immediate(&mut self, mut line: TokenizedLine) -> Result<(), String> {
        let _ = resolver::resolve(&mut line, &self.program, &mut self.symbols).map_err(|e| e.to_string())?;
        self.program.store_line(line);
        let result = {
            let mut dispatcher = Dispatcher::new(&mut self.program, &mut self.symbols, &self.config, &mut self.direct_evaluator);
            dispatcher.run(NOLINENO)
        };
        self.program.delete_line(NOLINENO);
        result.map_err(|e| e.to_string())
    }

    fn run_program(&mut self) -> Result<(), String> {
        let Some(start) = self.program.get_line_numbers().into_iter().next() else {
            return Err("No program to run".to_string());
        };
        let mut evaluator = BuiltinEvaluator::new();
        let result = {
            let mut dispatcher = Dispatcher::new(&mut self.program, &mut self.symbols, &self.config, &mut evaluator);
            dispatcher.run(start)
        };
        self.program.stop_execution();
        result.map_err(|e| e.to_string())
    }

    fn list_program(&self) {
        if self.program.is_empty() {
            println!("No program");
            return;
        }
        let mut depth = ListDepth::new();
        for (number, line) in self.program.list() {
            match lister::list_line(line, number, &self.config, &mut depth) {
                Ok(text) => println!("{text}"),
                Err(e) => println!("Error listing line {number}: {e}"),
            }
        }
    }

    fn save_program(&self, filename: &str) -> Result<(), String> {
        if self.program.is_empty() {
            return Err("No program to save".to_string());
        }
        let path = if filename.ends_with(".bbas") { filename.to_string() } else { format!("{filename}.bbas") };
        let mut file = std::fs::File::create(&path).map_err(|e| format!("Failed to create file: {e}"))?;
        let mut depth = ListDepth::new();
        for (number, line) in self.program.list() {
            let text = lister::list_line(line, number, &self.config, &mut depth).map_err(|e| format!("Failed to list line {number}: {e}"))?;
            writeln!(file, "{text}").map_err(|e| format!("Failed to write line {number}: {e}"))?;
        }
        println!("Saved to {path}");
        Ok(())
    }

    fn load_program(&mut self, filename: &str) -> Result<(), String> {
        let path = if filename.ends_with(".bbas") { filename.to_string() } else { format!("{filename}.bbas") };
        let content = std::fs::read_to_string(&path).map_err(|e| format!("Failed to read file: {e}"))?;

        self.program.clear();
        for (line_num, text) in content.lines().enumerate() {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let line = self.assemble_line(text.as_bytes(), true).map_err(|e| format!("Parse error at line {}: {e}", line_num + 1))?;
            if line.line_number() == NOLINENO {
                return Err(format!("Line {} has no line number: {text}", line_num + 1));
            }
            self.program.store_line(line);
        }
        self.reresolve_program();
        println!("Loaded from {path}");
        Ok(())
    }
}

fn main() {
    println!("BBC BASIC Interpreter v0.1.0");
    println!("Type 'EXIT' to quit, 'HELP' for help\n");

    let mut session = Session::new();
    let stdin = io::stdin();
    let mut line_buffer = String::new();

    loop {
        print!("> ");
        io::stdout().flush().unwrap();

        line_buffer.clear();
        if stdin.read_line(&mut line_buffer).is_err() {
            break;
        }

        let input = line_buffer.trim();
        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }
        if input.eq_ignore_ascii_case("help") {
            print_help();
            continue;
        }
        if input.eq_ignore_ascii_case("run") {
            if let Err(e) = session.run_program() {
                println!("Error: {e}");
            }
            continue;
        }
        if input.eq_ignore_ascii_case("list") {
            session.list_program();
            continue;
        }
        if input.eq_ignore_ascii_case("new") {
            session.program.clear();
            session.symbols.clear();
            println!("Program cleared");
            continue;
        }

        let upper = input.to_uppercase();
        if let Some(rest) = upper.strip_prefix("SAVE ") {
            let _ = rest;
            match extract_filename(input) {
                Ok(filename) => {
                    if let Err(e) = session.save_program(&filename) {
                        println!("Error: {e}");
                    }
                }
                Err(e) => println!("Error: {e}"),
            }
            continue;
        }
        if let Some(rest) = upper.strip_prefix("LOAD ") {
            let _ = rest;
            match extract_filename(input) {
                Ok(filename) => {
                    if let Err(e) = session.load_program(&filename) {
                        println!("Error: {e}");
                    }
                }
                Err(e) => println!("Error: {e}"),
            }
            continue;
        }
        if let Some(rest) = upper.strip_prefix("CHAIN ") {
            let _ = rest;
            match extract_filename(input) {
                Ok(filename) => {
                    if let Err(e) = session.load_program(&filename) {
                        println!("Error: {e}");
                    } else if let Err(e) = session.run_program() {
                        println!("Error: {e}");
                    }
                }
                Err(e) => println!("Error: {e}"),
            }
            continue;
        }
        if input.eq_ignore_ascii_case("*cat") {
            if let Err(e) = catalog_files() {
                println!("Error: {e}");
            }
            continue;
        }

        match session.assemble_line(input.as_bytes(), true) {
            Ok(line) if line.line_number() != NOLINENO => {
                session.store_or_delete(line);
            }
            Ok(line) => {
                if let Err(e) = session.run_immediate(line) {
                    println!("Error: {e}");
                }
            }
            Err(e) => println!("Error: {e}"),
        }
    }
}

/// Extract filename from a command like `SAVE "filename"` or `LOAD "filename"`.
fn extract_filename(input: &str) -> Result<String, String> {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    if parts.len() < 2 {
        return Err("Expected filename".to_string());
    }
    let filename = parts[1].trim();
    let filename = if filename.starts_with('"') && filename.ends_with('"') && filename.len() >= 2 {
        &filename[1..filename.len() - 1]
    } else {
        filename
    };
    if filename.is_empty() {
        return Err("Filename cannot be empty".to_string());
    }
    Ok(filename.to_string())
}

/// Catalog all `.bbas` files in the current directory.
fn catalog_files() -> Result<(), String> {
    let paths = std::fs::read_dir(".").map_err(|e| format!("Failed to read directory: {e}"))?;

    println!("\nCatalog:");
    println!("{:<30} {:>10}  {}", "Filename", "Size", "Modified");
    println!("{}", "-".repeat(60));

    let mut entries: Vec<_> = paths.collect();
    entries.sort_by_key(|e| e.as_ref().ok().and_then(|e| e.file_name().to_str().map(|s| s.to_lowercase())));

    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read entry: {e}"))?;
        let filename = entry.file_name();
        let filename = filename.to_string_lossy();
        if !filename.ends_with(".bbas") {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| format!("Failed to read metadata: {e}"))?;
        let size = metadata.len();
        let modified = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .map(|d| {
                let secs = d.as_secs();
                if secs < 60 {
                    format!("{secs}s ago")
                } else if secs < 3600 {
                    format!("{}m ago", secs / 60)
                } else if secs < 86400 {
                    format!("{}h ago", secs / 3600)
                } else {
                    format!("{}d ago", secs / 86400)
                }
            })
            .unwrap_or_else(|| "unknown".to_string());

        println!("{:<30} {:>10}  {}", filename, size, modified);
        count += 1;
    }

    if count == 0 {
        println!("(no .bbas files found)");
    } else {
        println!("\n{count} file(s)");
    }
    Ok(())
}

fn print_help() {
    println!("BBC BASIC Interpreter - Available Commands:");
    println!();
    println!("Program Mode (with line numbers):");
    println!("  10 PRINT \"HELLO\"        - Store program line");
    println!("  20 GOTO 10               - Store line with GOTO");
    println!("  10                       - Delete line 10");
    println!();
    println!("Immediate Commands:");
    println!("  LIST                     - List the program");
    println!("  RUN                      - Run the stored program");
    println!("  NEW                      - Clear the program");
    println!("  SAVE \"filename\"          - Save program to filename.bbas");
    println!("  LOAD \"filename\"          - Load program from filename.bbas");
    println!("  CHAIN \"filename\"         - Load and run program");
    println!("  *CAT                     - List all .bbas files");
    println!();
    println!("Immediate Mode (no line numbers):");
    println!("  A% = 42                  - Execute immediately");
    println!("  PRINT \"text\"             - Execute immediately");
    println!();
    println!("Statements:");
    println!("  A% = 42                  - Assign integer variable");
    println!("  PRINT \"text\", A%          - Print values");
    println!("  GOTO 100                 - Jump to line");
    println!("  GOSUB 1000               - Call subroutine");
    println!("  RETURN                   - Return from subroutine");
    println!("  WHILE cond ... ENDWHILE  - Structured loop");
    println!("  CASE expr WHEN ... ENDCASE - Structured branch");
    println!("  END                      - End program");
    println!();
    println!("Examples:");
    println!("  10 PRINT \"Hello\"");
    println!("  20 GOTO 10");
    println!("  LIST");
    println!("  RUN");
    println!("  SAVE \"myprog\"");
    println!("  LOAD \"myprog\"");
    println!();
    println!("Variable Types:");
    println!("  A%  - Integer variable");
    println!("  B   - Real (float) variable");
    println!("  C$  - String variable");
    println!();
}
