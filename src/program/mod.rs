//! Program store — numbered statements with a cursor.
//!
//! Statements are kept in ascending line-number order. The cursor
//! ("program counter") points either just before a statement or past
//! the end of the program; insertion and deletion preserve its position
//! as far as possible.

use std::fmt;
use std::io::{self, Write};

/// A stored, line-numbered statement. The text is re-parsed by the
/// shell when the program runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub lineno: i32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramError {
    EmptyStore,
    InvalidRange,
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramError::EmptyStore => f.write_str("program store is empty"),
            ProgramError::InvalidRange => f.write_str("invalid line number range"),
        }
    }
}

pub struct Program {
    stmts: Vec<Stmt>,
    /// Line number of the statement the cursor sits before; `None`
    /// means past the end of the program.
    cursor: Option<i32>,
}

impl Program {
    pub fn new() -> Self {
        Self {
            stmts: Vec::new(),
            cursor: None,
        }
    }

    /// Insert a statement, replacing any statement with the same line
    /// number. The cursor keeps its position.
    pub fn insert(&mut self, stmt: Stmt) {
        match self.stmts.binary_search_by_key(&stmt.lineno, |s| s.lineno) {
            Ok(i) => self.stmts[i] = stmt,
            Err(i) => self.stmts.insert(i, stmt),
        }
    }

    /// Delete statements with line numbers in `[min, max]`. A cursor
    /// pointing into the deleted range moves to the first surviving
    /// statement at or beyond it, else past the end.
    pub fn delete(&mut self, min: i32, max: i32) -> Result<(), ProgramError> {
        if max < min {
            return Err(ProgramError::InvalidRange);
        }
        if self.stmts.is_empty() {
            return Err(ProgramError::EmptyStore);
        }
        self.stmts.retain(|s| s.lineno < min || s.lineno > max);
        if let Some(c) = self.cursor {
            if c >= min && c <= max {
                self.cursor = self.stmts.iter().find(|s| s.lineno >= c).map(|s| s.lineno);
            }
        }
        Ok(())
    }

    /// Move the cursor before the first statement.
    pub fn reset(&mut self) {
        self.cursor = self.stmts.first().map(|s| s.lineno);
    }

    /// The statement at the cursor, without moving it.
    pub fn fetch(&self) -> Option<&Stmt> {
        let c = self.cursor?;
        self.stmts.iter().find(|s| s.lineno == c)
    }

    /// Advance the cursor one statement and return the statement now at
    /// the cursor, if any.
    pub fn next(&mut self) -> Option<&Stmt> {
        let c = self.cursor?;
        let pos = self.stmts.iter().position(|s| s.lineno == c)?;
        match self.stmts.get(pos + 1) {
            Some(stmt) => {
                self.cursor = Some(stmt.lineno);
                self.stmts.get(pos + 1)
            }
            None => {
                self.cursor = None;
                None
            }
        }
    }

    /// Position the cursor before the statement with exactly `lineno`,
    /// returning it. An unknown line number leaves the cursor alone.
    pub fn goto(&mut self, lineno: i32) -> Option<&Stmt> {
        let pos = self.stmts.iter().position(|s| s.lineno == lineno)?;
        self.cursor = Some(lineno);
        self.stmts.get(pos)
    }

    /// List the program, marking the cursor position with `-->`.
    pub fn list(&self, out: &mut dyn Write) -> io::Result<()> {
        for stmt in &self.stmts {
            if self.cursor == Some(stmt.lineno) {
                writeln!(out, "-->")?;
            }
            writeln!(out, "{} {}", stmt.lineno, stmt.text)?;
        }
        if self.cursor.is_none() {
            writeln!(out, "-->")?;
        }
        Ok(())
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
