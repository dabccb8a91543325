//! Statement parser and REPL.
//!
//! A line starting with a line number stores the remainder in the
//! program store; a handful of keywords drive the program store, the
//! variable store, and the job runner; anything else parses as a
//! pipeline and is launched as a job. `cmd >@ var` waits for the job
//! and deposits its captured output (minus trailing newlines) in
//! variable `var`.

use std::fmt;
use std::io::{self, BufRead, ErrorKind, Write};

use crate::program::{Program, ProgramError, Stmt};
use crate::store::Store;
use crate::syntax::{Arg, Command, Pipeline};
use crate::sys::syscalls::{self, STDIN_FILENO};
use crate::{jobs, log_debug};

#[derive(Debug)]
pub enum ShellError {
    Parse(String),
    Job(String),
    Program(ProgramError),
    Io(io::Error),
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::Parse(msg) => write!(f, "{}", msg),
            ShellError::Job(msg) => write!(f, "{}", msg),
            ShellError::Program(e) => write!(f, "{}", e),
            ShellError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl From<io::Error> for ShellError {
    fn from(e: io::Error) -> Self {
        ShellError::Io(e)
    }
}

impl From<ProgramError> for ShellError {
    fn from(e: ProgramError) -> Self {
        ShellError::Program(e)
    }
}

/// Whether the REPL keeps going after a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell {
    store: Store,
    program: Program,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            store: Store::new(),
            program: Program::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Execute one statement.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> Result<Flow, ShellError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        // A leading line number stores the statement for later.
        if line.starts_with(|c: char| c.is_ascii_digit()) {
            let (number, rest) = line.split_at(line.find(|c: char| !c.is_ascii_digit()).unwrap_or(line.len()));
            let lineno: i32 = number
                .parse()
                .map_err(|_| ShellError::Parse(format!("bad line number: {}", number)))?;
            let text = rest.trim();
            if text.is_empty() {
                return Err(ShellError::Parse("empty statement".to_string()));
            }
            self.program.insert(Stmt {
                lineno,
                text: text.to_string(),
            });
            return Ok(Flow::Continue);
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens[0] {
            "list" => {
                self.program.list(out)?;
                Ok(Flow::Continue)
            }
            "delete" => {
                let min = parse_int(&tokens, 1)?;
                let max = if tokens.len() > 2 { parse_int(&tokens, 2)? } else { min };
                self.program.delete(min, max)?;
                Ok(Flow::Continue)
            }
            "goto" => {
                let lineno = parse_int(&tokens, 1)?;
                if self.program.goto(lineno).is_none() {
                    return Err(ShellError::Parse(format!("no line {}", lineno)));
                }
                Ok(Flow::Continue)
            }
            "run" => self.run_program(out),
            "jobs" => {
                jobs::show(out)?;
                Ok(Flow::Continue)
            }
            "wait" => {
                let id = parse_int(&tokens, 1)?;
                if jobs::wait(id) < 0 {
                    return Err(ShellError::Job(format!("cannot wait for job {}", id)));
                }
                Ok(Flow::Continue)
            }
            "poll" => {
                let id = parse_int(&tokens, 1)?;
                writeln!(out, "{}", jobs::poll(id))?;
                Ok(Flow::Continue)
            }
            "cancel" => {
                let id = parse_int(&tokens, 1)?;
                if jobs::cancel(id) < 0 {
                    return Err(ShellError::Job(format!("cannot cancel job {}", id)));
                }
                Ok(Flow::Continue)
            }
            "expunge" => {
                let id = parse_int(&tokens, 1)?;
                if jobs::expunge(id) < 0 {
                    return Err(ShellError::Job(format!("cannot expunge job {}", id)));
                }
                Ok(Flow::Continue)
            }
            "output" => {
                let id = parse_int(&tokens, 1)?;
                match jobs::get_output(id) {
                    Some(bytes) => {
                        out.write_all(&bytes)?;
                        Ok(Flow::Continue)
                    }
                    None => Err(ShellError::Job(format!("no output for job {}", id))),
                }
            }
            "set" => {
                if tokens.len() < 3 {
                    return Err(ShellError::Parse("usage: set <var> <value>".to_string()));
                }
                let value = tokens[2..].join(" ");
                self.store.set(tokens[1], &value);
                Ok(Flow::Continue)
            }
            "unset" => {
                if tokens.len() < 2 {
                    return Err(ShellError::Parse("usage: unset <var>".to_string()));
                }
                self.store.unset(tokens[1]);
                Ok(Flow::Continue)
            }
            "show" => {
                self.store.show(out)?;
                Ok(Flow::Continue)
            }
            "pause" => {
                jobs::pause();
                Ok(Flow::Continue)
            }
            "quit" => Ok(Flow::Quit),
            _ => self.run_pipeline(&tokens, out),
        }
    }

    /// Execute the stored program from the top.
    fn run_program(&mut self, out: &mut dyn Write) -> Result<Flow, ShellError> {
        self.program.reset();
        loop {
            let Some(stmt) = self.program.fetch() else {
                return Ok(Flow::Continue);
            };
            let text = stmt.text.clone();
            self.program.next();
            if self.execute(&text, out)? == Flow::Quit {
                return Ok(Flow::Quit);
            }
        }
    }

    fn run_pipeline(&mut self, tokens: &[&str], out: &mut dyn Write) -> Result<Flow, ShellError> {
        let (pipeline, capture_var) = parse_pipeline(tokens)?;
        log_debug!("launching pipeline: {}", pipeline);
        let id = jobs::run(pipeline, &self.store);
        if id < 0 {
            return Err(ShellError::Job("pipeline failed to start".to_string()));
        }
        writeln!(out, "[{}]", id)?;
        if let Some(var) = capture_var {
            if jobs::wait(id) < 0 {
                return Err(ShellError::Job(format!("cannot wait for job {}", id)));
            }
            let bytes = jobs::get_output(id).unwrap_or_default();
            let text = String::from_utf8_lossy(&bytes);
            self.store.set(&var, text.trim_end_matches('\n'));
        }
        Ok(Flow::Continue)
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_int(tokens: &[&str], index: usize) -> Result<i32, ShellError> {
    let word = tokens
        .get(index)
        .ok_or_else(|| ShellError::Parse("missing argument".to_string()))?;
    word.parse()
        .map_err(|_| ShellError::Parse(format!("not a number: {}", word)))
}

/// Parse tokens into a pipeline plus the capture variable, if any.
fn parse_pipeline(tokens: &[&str]) -> Result<(Pipeline, Option<String>), ShellError> {
    let mut commands = Vec::new();
    let mut current: Vec<Arg> = Vec::new();
    let mut input_file = None;
    let mut output_file = None;
    let mut capture_var = None;

    let mut iter = tokens.iter();
    while let Some(tok) = iter.next() {
        match *tok {
            "|" => {
                if current.is_empty() {
                    return Err(ShellError::Parse("empty pipeline stage".to_string()));
                }
                commands.push(Command {
                    args: std::mem::take(&mut current),
                });
            }
            "<" => {
                let file = iter
                    .next()
                    .ok_or_else(|| ShellError::Parse("missing input file".to_string()))?;
                input_file = Some(file.to_string());
            }
            ">" => {
                let file = iter
                    .next()
                    .ok_or_else(|| ShellError::Parse("missing output file".to_string()))?;
                output_file = Some(file.to_string());
            }
            ">@" => {
                let var = iter
                    .next()
                    .ok_or_else(|| ShellError::Parse("missing capture variable".to_string()))?;
                capture_var = Some(var.to_string());
            }
            word if word.len() > 1 && word.starts_with('$') => {
                current.push(Arg::Var(word[1..].to_string()));
            }
            word => {
                current.push(Arg::Word(word.to_string()));
            }
        }
    }
    if current.is_empty() {
        return Err(ShellError::Parse("empty pipeline stage".to_string()));
    }
    commands.push(Command { args: current });

    let mut pipeline = Pipeline::new(commands);
    pipeline.input_file = input_file;
    pipeline.output_file = output_file;
    pipeline.capture_output = capture_var.is_some();
    Ok((pipeline, capture_var))
}

/// Drive the shell over an input stream until EOF or `quit`.
/// The prompt is only printed when stdin is a terminal.
pub fn repl<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> i32 {
    let interactive = unsafe { syscalls::isatty(STDIN_FILENO) } != 0;
    let mut shell = Shell::new();
    let mut line = String::new();
    loop {
        if interactive {
            let _ = write!(out, "minnow> ");
            let _ = out.flush();
        }
        line.clear();
        match input.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
        match shell.execute(&line, out) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => {
                let _ = writeln!(out, "error: {}", e);
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(shell: &mut Shell, line: &str) -> (Result<Flow, ShellError>, String) {
        let mut out = Vec::new();
        let flow = shell.execute(line, &mut out);
        (flow, String::from_utf8_lossy(&out).to_string())
    }

    #[test]
    fn empty_line_is_a_no_op() {
        let mut shell = Shell::new();
        let (flow, out) = exec(&mut shell, "   ");
        assert_eq!(flow.unwrap(), Flow::Continue);
        assert!(out.is_empty());
    }

    #[test]
    fn quit_stops_the_loop() {
        let mut shell = Shell::new();
        let (flow, _) = exec(&mut shell, "quit");
        assert_eq!(flow.unwrap(), Flow::Quit);
    }

    #[test]
    fn numbered_lines_are_stored_and_listed() {
        let mut shell = Shell::new();
        exec(&mut shell, "20 set b 2").0.unwrap();
        exec(&mut shell, "10 set a 1").0.unwrap();
        let (flow, out) = exec(&mut shell, "list");
        flow.unwrap();
        assert_eq!(out, "10 set a 1\n20 set b 2\n-->\n");
    }

    #[test]
    fn numbered_line_without_statement_is_an_error() {
        let mut shell = Shell::new();
        assert!(exec(&mut shell, "10").0.is_err());
        assert!(exec(&mut shell, "10   ").0.is_err());
    }

    #[test]
    fn set_and_show() {
        let mut shell = Shell::new();
        exec(&mut shell, "set greeting hello world").0.unwrap();
        assert_eq!(shell.store().get("greeting"), Some("hello world"));
        let (_, out) = exec(&mut shell, "show");
        assert!(out.contains("greeting"));
        exec(&mut shell, "unset greeting").0.unwrap();
        assert_eq!(shell.store().get("greeting"), None);
    }

    #[test]
    fn run_executes_stored_sets_in_order() {
        let mut shell = Shell::new();
        exec(&mut shell, "10 set x 1").0.unwrap();
        exec(&mut shell, "20 set x 2").0.unwrap();
        exec(&mut shell, "run").0.unwrap();
        assert_eq!(shell.store().get("x"), Some("2"));
    }

    #[test]
    fn delete_accepts_single_line_form() {
        let mut shell = Shell::new();
        exec(&mut shell, "10 set a 1").0.unwrap();
        exec(&mut shell, "delete 10").0.unwrap();
        let (_, out) = exec(&mut shell, "list");
        assert_eq!(out, "-->\n");
    }

    #[test]
    fn goto_unknown_line_errors() {
        let mut shell = Shell::new();
        assert!(exec(&mut shell, "goto 55").0.is_err());
    }

    #[test]
    fn parse_pipeline_splits_stages() {
        let (p, cap) = parse_pipeline(&["echo", "hi", "|", "tr", "h", "H"]).unwrap();
        assert!(cap.is_none());
        assert_eq!(p.commands.len(), 2);
        assert_eq!(p.to_string(), "echo hi | tr h H");
    }

    #[test]
    fn parse_pipeline_redirections_and_capture() {
        let (p, cap) = parse_pipeline(&["sort", "<", "in.txt", ">@", "result"]).unwrap();
        assert_eq!(cap.as_deref(), Some("result"));
        assert!(p.capture_output);
        assert_eq!(p.input_file.as_deref(), Some("in.txt"));
    }

    #[test]
    fn parse_pipeline_variable_words() {
        let (p, _) = parse_pipeline(&["echo", "$x"]).unwrap();
        assert_eq!(p.commands[0].args[1], Arg::Var("x".to_string()));
        // A bare dollar sign is an ordinary word.
        let (p, _) = parse_pipeline(&["echo", "$"]).unwrap();
        assert_eq!(p.commands[0].args[1], Arg::Word("$".to_string()));
    }

    #[test]
    fn parse_pipeline_rejects_empty_stages() {
        assert!(parse_pipeline(&["|", "cat"]).is_err());
        assert!(parse_pipeline(&["cat", "|"]).is_err());
        assert!(parse_pipeline(&["cat", "<"]).is_err());
    }

    #[test]
    fn bad_numbers_error() {
        let mut shell = Shell::new();
        assert!(exec(&mut shell, "wait abc").0.is_err());
        assert!(exec(&mut shell, "delete").0.is_err());
    }
}
