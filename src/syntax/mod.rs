//! Pipeline syntax trees and their printer.
//!
//! A pipeline is an ordered list of commands with optional redirections
//! and an output-capture flag. Words are either literals or `$name`
//! variable references resolved against the store at exec time.

use std::fmt;

use crate::store::Store;

/// One word of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Word(String),
    Var(String),
}

impl Arg {
    /// Resolve this word against the store. Unset variables evaluate
    /// to the empty string.
    pub fn eval_to_string(&self, store: &Store) -> String {
        match self {
            Arg::Word(w) => w.clone(),
            Arg::Var(name) => store.get(name).unwrap_or("").to_string(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Word(w) => f.write_str(w),
            Arg::Var(name) => write!(f, "${}", name),
        }
    }
}

/// One stage of a pipeline. The first arg is the program word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub args: Vec<Arg>,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

/// An ordered list of commands with optional redirections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub input_file: Option<String>,
    pub output_file: Option<String>,
    pub capture_output: bool,
}

impl Pipeline {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            input_file: None,
            output_file: None,
            capture_output: false,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cmd) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", cmd)?;
        }
        if let Some(ref input) = self.input_file {
            write!(f, " < {}", input)?;
        }
        if let Some(ref output) = self.output_file {
            write!(f, " > {}", output)?;
        }
        if self.capture_output {
            f.write_str(" >@")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> Arg {
        Arg::Word(s.to_string())
    }

    #[test]
    fn eval_word_is_identity() {
        let store = Store::new();
        assert_eq!(word("echo").eval_to_string(&store), "echo");
    }

    #[test]
    fn eval_var_reads_store() {
        let mut store = Store::new();
        store.set("greeting", "hi");
        assert_eq!(
            Arg::Var("greeting".to_string()).eval_to_string(&store),
            "hi"
        );
        assert_eq!(Arg::Var("missing".to_string()).eval_to_string(&store), "");
    }

    #[test]
    fn pipeline_display_joins_stages() {
        let p = Pipeline::new(vec![
            Command {
                args: vec![word("echo"), word("hi")],
            },
            Command {
                args: vec![word("tr"), word("h"), word("H")],
            },
        ]);
        assert_eq!(p.to_string(), "echo hi | tr h H");
    }

    #[test]
    fn pipeline_display_shows_redirections() {
        let mut p = Pipeline::new(vec![Command {
            args: vec![word("sort")],
        }]);
        p.input_file = Some("in.txt".to_string());
        p.output_file = Some("out.txt".to_string());
        assert_eq!(p.to_string(), "sort < in.txt > out.txt");
    }

    #[test]
    fn pipeline_display_marks_capture() {
        let mut p = Pipeline::new(vec![Command {
            args: vec![word("date")],
        }]);
        p.capture_output = true;
        assert_eq!(p.to_string(), "date >@");
    }

    #[test]
    fn var_display_keeps_sigil() {
        assert_eq!(Arg::Var("x".to_string()).to_string(), "$x");
    }
}
