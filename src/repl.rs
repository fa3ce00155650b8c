use rustyline::{DefaultEditor, error::ReadlineError};

use crate::{
    diagnostics::{EzError, Result},
    environment::Environment,
    runtime::Interpreter,
    value::ValueKind,
};

/// What the loop should do after a line has been handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
}

pub struct Repl {
    interpreter: Interpreter,
}

impl Default for Repl {
    fn default() -> Self {
        Self::new(Interpreter::new())
    }
}

impl Repl {
    pub fn new(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        loop {
            match editor.readline("ez> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    match self.handle_line(trimmed) {
                        Ok(Outcome::Quit) => break,
                        Ok(Outcome::Continue) => {}
                        Err(err) => {
                            eprintln!("error: {}", Interpreter::render_error(&err, trimmed))
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }

    /// Runs one line of input: a `:command` or EzLang source.
    pub fn handle_line(&mut self, line: &str) -> Result<Outcome> {
        let Some(command) = line.strip_prefix(':') else {
            let value = self.interpreter.eval_source(line)?;
            if !value.is_null() {
                println!("{value:?}");
            }
            return Ok(Outcome::Continue);
        };

        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("quit" | "exit"), _) => return Ok(Outcome::Quit),
            (Some("vars"), _) => {
                for (name, value) in Environment::get_all(self.interpreter.globals()) {
                    if matches!(value.kind(), ValueKind::NativeFunction(_)) {
                        continue;
                    }
                    println!("{name} = {value:?}");
                }
            }
            (Some("modules"), _) => {
                let listing = self.interpreter.modules().list_modules();
                if listing.is_empty() {
                    println!("no modules loaded");
                }
                for entry in listing {
                    println!("{entry}");
                }
            }
            (Some("reload"), Some(name)) => {
                self.interpreter.reload_module(name)?;
                println!("reloaded {name}");
            }
            _ => eprintln!(
                "unknown command `:{command}` (try :vars, :modules, :reload <name>, :quit)"
            ),
        }
        Ok(Outcome::Continue)
    }
}

fn readline_error(err: ReadlineError) -> EzError {
    EzError::from(std::io::Error::other(err))
}
