use clap::{Parser, Subcommand};
use ember_ast::Module;
use ember_interp::{Interpreter, RuntimeError};
use ember_lexer::Span;
use ember_parser::ParseError;
use ember_typeck::{CheckedForm, Session, SessionOptions, TypeError};
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ember", version, about = "The Ember language")]
struct Cli {
    /// Print the annotated tree and the solved type assignments of each form
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the interactive prompt (the default)
    Repl,
    /// Check and evaluate every form of a file
    Run {
        /// Path to the source file
        file: PathBuf,
    },
    /// Type-check a file without evaluating it
    Check {
        /// Path to the source file
        file: PathBuf,
    },
    /// Parse a file and dump the AST
    Parse {
        /// Path to the source file
        file: PathBuf,
    },
}

// ── Driver ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("parse error: {}", .0.message)]
    Parse(ParseError),
    #[error("type error: {}", .0.kind)]
    Type(TypeError),
    #[error("runtime error: {}", .0.kind)]
    Runtime(RuntimeError),
}

impl Failure {
    fn span(&self) -> Span {
        match self {
            Failure::Parse(err) => err.span,
            Failure::Type(err) => err.span,
            Failure::Runtime(err) => err.span,
        }
    }
}

/// Reads, checks and (unless only checking) evaluates forms against one
/// growing module, the way the prompt does.
struct Driver {
    module: Module,
    session: Session,
    interp: Interpreter,
    evaluate: bool,
}

impl Driver {
    fn new(options: SessionOptions, evaluate: bool) -> Self {
        Self {
            module: Module::new(),
            session: Session::new(options),
            interp: Interpreter::new(),
            evaluate,
        }
    }

    /// Process every form of `source` in order, stopping at the first error.
    fn process(&mut self, source: &str) -> Result<(), Failure> {
        let (forms, errors) = ember_parser::parse_into(&mut self.module, source);
        if let Some(err) = errors.into_iter().next() {
            return Err(Failure::Parse(err));
        }
        for form in forms {
            let checked = self
                .session
                .check_form(&self.module, form)
                .map_err(Failure::Type)?;
            if let Some(trace) = &checked.trace {
                print!("{}", trace);
            }
            self.report(&checked)?;
        }
        Ok(())
    }

    fn report(&mut self, checked: &CheckedForm) -> Result<(), Failure> {
        if self.evaluate {
            let value = self
                .interp
                .eval_form(&self.module, &self.session, checked.form)
                .map_err(Failure::Runtime)?;
            if checked.is_expression {
                println!("{}", value);
            }
        }
        for (name, ty) in &checked.declarations {
            println!("{} : {}", name, self.session.display_type(*ty));
        }
        Ok(())
    }
}

// ── Commands ─────────────────────────────────────────────────────

fn read_file(file: &Path) -> String {
    match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: could not read {}: {}", file.display(), e);
            std::process::exit(1);
        }
    }
}

fn run_file(file: &Path, options: SessionOptions, evaluate: bool) {
    let source = read_file(file);
    let mut driver = Driver::new(options, evaluate);
    if let Err(failure) = driver.process(&source) {
        let span = failure.span();
        eprintln!("{}:{}:{}: {}", file.display(), span.start, span.end, failure);
        std::process::exit(1);
    }
    if !evaluate {
        println!("OK");
    }
}

fn parse_file(file: &Path) {
    let source = read_file(file);
    let (module, errors) = ember_parser::parse(&source);
    for error in &errors {
        eprintln!(
            "{}:{}:{}: {}",
            file.display(),
            error.span.start,
            error.span.end,
            error.message
        );
    }
    print!("{}", ember_ast::pretty_print(&module));
    if !errors.is_empty() {
        std::process::exit(1);
    }
}

// ── REPL ─────────────────────────────────────────────────────────

/// Collects lines until they form complete input.
#[derive(Default)]
struct InputBuffer {
    text: String,
}

impl InputBuffer {
    fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Append a line; returns the whole input once it is well bracketed.
    fn push_line(&mut self, line: &str) -> Option<String> {
        self.text.push_str(line);
        self.text.push('\n');
        if self.is_empty() {
            self.text.clear();
            return None;
        }
        if ember_lexer::needs_more_input(&self.text) {
            return None;
        }
        Some(std::mem::take(&mut self.text))
    }
}

fn eval_input(driver: &mut Driver, input: &str) {
    if let Err(failure) = driver.process(input) {
        log::debug!("failed at {:?}", failure.span());
        eprintln!("error: {}", failure);
    }
}

fn repl(options: SessionOptions) {
    let mut driver = Driver::new(options, true);
    if io::stdin().is_terminal() {
        interactive(&mut driver);
    } else {
        piped(&mut driver);
    }
}

fn interactive(driver: &mut Driver) {
    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("error: failed to start line editor: {}", e);
            return piped(driver);
        }
    };
    println!("ember {} (ctrl-d to exit)", env!("CARGO_PKG_VERSION"));

    let mut buffer = InputBuffer::default();
    loop {
        let prompt = if buffer.is_empty() { "> " } else { "... " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => {
                buffer = InputBuffer::default();
                continue;
            }
            Err(_) => break,
        };
        if let Some(input) = buffer.push_line(&line) {
            let _ = rl.add_history_entry(input.trim_end());
            eval_input(driver, &input);
        }
    }
}

fn piped(driver: &mut Driver) {
    let mut buffer = InputBuffer::default();
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if let Some(input) = buffer.push_line(&line) {
            eval_input(driver, &input);
        }
    }
    // Whatever is left at end of input is still worth a diagnostic.
    if !buffer.is_empty() {
        let rest = std::mem::take(&mut buffer.text);
        eval_input(driver, &rest);
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let options = SessionOptions { trace: cli.trace };

    match cli.command.unwrap_or(Command::Repl) {
        Command::Repl => repl(options),
        Command::Run { file } => run_file(&file, options, true),
        Command::Check { file } => run_file(&file, options, false),
        Command::Parse { file } => parse_file(&file),
    }
}
