//! Compile-time errors.
//!
//! Anything wrong with the input tree aborts the current compilation unit with
//! a [`CompileError`]. Failures of the compiled program are not errors in this
//! sense; they are thrown boxes, see [`crate::engine::Fatal`].

use std::fmt;
use std::io;

use termcolor::{Color, ColorSpec, WriteColor};

use crate::ast::Pos;

#[derive(Clone, Debug, PartialEq)]
pub struct CompileError {
    pub message: String,
    pub pos: Option<Pos>,
}

pub type CompileResult<T> = Result<T, CompileError>;

/// `return Err(..)` with a formatted message at a position.
#[macro_export]
macro_rules! abort {
    ($pos:expr, $($arg:tt)+) => {
        return Err($crate::error::CompileError::at($pos, format!($($arg)+)))
    };
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pos: None,
        }
    }

    pub fn at(pos: &Pos, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pos: Some(pos.clone()),
        }
    }

    /// Attach `pos` unless the error already has one.
    pub fn or_at(mut self, pos: &Pos) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos.clone());
        }
        self
    }

    /// Render the error with the offending source line, when the file can be read.
    pub fn report(&self, mut out: impl WriteColor) -> io::Result<()> {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(out, "error")?;
        out.reset()?;
        writeln!(out, ": {}", self.message)?;

        let pos = match &self.pos {
            Some(pos) => pos,
            None => return Ok(()),
        };

        out.set_color(ColorSpec::new().set_fg(Some(Color::Blue)))?;
        write!(out, "  --> ")?;
        out.reset()?;
        writeln!(out, "{}", pos)?;

        let line = pos
            .file
            .as_deref()
            .and_then(|file| std::fs::read_to_string(file).ok())
            .and_then(|text| {
                text.lines()
                    .nth(pos.line.saturating_sub(1) as usize)
                    .map(str::to_owned)
            });

        if let Some(line) = line {
            let gutter = pos.line.to_string();
            let pad = " ".repeat(gutter.len());
            out.set_color(ColorSpec::new().set_fg(Some(Color::Blue)))?;
            writeln!(out, "{} |", pad)?;
            write!(out, "{} | ", gutter)?;
            out.reset()?;
            writeln!(out, "{}", line)?;
            out.set_color(ColorSpec::new().set_fg(Some(Color::Blue)))?;
            write!(out, "{} | ", pad)?;
            out.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
            writeln!(
                out,
                "{}{}",
                " ".repeat(pos.col.saturating_sub(1) as usize),
                "^".repeat(pos.len.max(1) as usize)
            )?;
            out.reset()?;
        }

        Ok(())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pos {
            Some(pos) => write!(f, "{}: {}", pos, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}
