use std::{
    fmt,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Represents a byte span within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end,
        }
    }

    /// Whether the span lies within `source` on character boundaries.
    pub fn fits(&self, source: &str) -> bool {
        self.start <= self.end
            && self.end <= source.len()
            && source.is_char_boundary(self.start)
            && source.is_char_boundary(self.end)
    }

    /// One-based line and column of `start` within `source`. Offsets past the
    /// end or inside a character are moved back to the previous boundary.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let mut start = self.start.min(source.len());
        while !source.is_char_boundary(start) {
            start -= 1;
        }
        let prefix = &source[..start];
        let line = prefix.matches('\n').count() + 1;
        let column = prefix
            .rfind('\n')
            .map(|idx| prefix[idx + 1..].chars().count())
            .unwrap_or_else(|| prefix.chars().count())
            + 1;
        (line, column)
    }
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Runtime,
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    /// Module file the span points into; `None` for the evaluated source.
    pub origin: Option<PathBuf>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            origin: None,
            notes: Vec::new(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Runtime, message)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_origin(mut self, origin: PathBuf) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(span) = self.span {
            write!(f, " ({}..{})", span.start, span.end)?;
        }
        if let Some(origin) = &self.origin {
            write!(f, " in {}", origin.display())?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the EzLang runtime.
#[derive(Debug, Error)]
pub enum EzError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("module file not found: {}", .0.display())]
    ModuleNotFound(PathBuf),
    #[error(
        "module name conflict: '{name}' is already registered from {}",
        .existing.display()
    )]
    ModuleNameConflict {
        name: String,
        existing: PathBuf,
        attempted: PathBuf,
    },
    #[error("variable '{0}' is already declared in this scope")]
    AlreadyDeclared(String),
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("module '{0}' not found")]
    UnknownModule(String),
    #[error("circular module import: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),
    #[error("failed to load module from '{path}': {source}")]
    ModuleLoad {
        path: String,
        #[source]
        source: Box<EzError>,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl EzError {
    pub fn runtime(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::Diagnostic(Diagnostic::runtime(message).with_span(span))
    }

    /// Marks a spanned diagnostic as pointing into the module file `origin`,
    /// unless it already names a file.
    pub fn with_origin(self, origin: &Path) -> Self {
        match self {
            EzError::Diagnostic(diag) if diag.span.is_some() && diag.origin.is_none() => {
                EzError::Diagnostic(diag.with_origin(origin.to_path_buf()))
            }
            other => other,
        }
    }

    /// Strips `ModuleLoad` context layers and returns the underlying failure.
    pub fn root_cause(&self) -> &EzError {
        let mut current = self;
        while let EzError::ModuleLoad { source, .. } = current {
            current = source;
        }
        current
    }
}

pub type Result<T> = std::result::Result<T, EzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_one() {
        let source = "var a = 1\nvar b = oops";
        let span = SourceSpan::new(18, 22);
        assert_eq!(span.line_col(source), (2, 9));
        assert_eq!(SourceSpan::new(0, 1).line_col(source), (1, 1));
    }

    #[test]
    fn line_col_stays_on_char_boundaries() {
        let source = "var s = \"éé\"";
        assert_eq!(SourceSpan::new(10, 11).line_col(source), (1, 10));
        assert_eq!(SourceSpan::new(500, 510).line_col(source), (1, 14));
        assert!(!SourceSpan::new(10, 11).fits(source));
        assert!(SourceSpan::new(9, 11).fits(source));
        assert!(!SourceSpan::new(0, 500).fits(source));
    }

    #[test]
    fn root_cause_unwraps_nested_context() {
        let inner = EzError::UndefinedVariable("x".into());
        let wrapped = EzError::ModuleLoad {
            path: "outer.ez".into(),
            source: Box::new(EzError::ModuleLoad {
                path: "inner.ez".into(),
                source: Box::new(inner),
            }),
        };
        assert!(matches!(
            wrapped.root_cause(),
            EzError::UndefinedVariable(name) if name == "x"
        ));
        let message = wrapped.to_string();
        assert!(message.contains("outer.ez"), "{message}");
    }
}
