//! The error envelope shared by the lexer, parser, evaluator, and applier.

use codespan::Span;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use std::fmt;

/// The category of a language error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed source: bad escape, unterminated string, invalid literal,
    /// unexpected token.
    Syntax,
    /// An operator or function was given operand kinds it does not accept.
    Type,
    /// A missing map key, a missing identifier, or an index out of range.
    Access,
    /// An arithmetic domain violation such as division by zero.
    Domain,
    /// Structurally well typed but semantically invalid.
    Value,
    /// An operation on a value kind that does not support it.
    Runtime,
    /// A magic pattern did not match at the given absolute offset. Drivers
    /// treat this as "the definition does not describe this file".
    Magic { offset: u64 },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "SyntaxError"),
            ErrorKind::Type => write!(f, "TypeError"),
            ErrorKind::Access => write!(f, "AccessError"),
            ErrorKind::Domain => write!(f, "DomainError"),
            ErrorKind::Value => write!(f, "ValueError"),
            ErrorKind::Runtime => write!(f, "RuntimeError"),
            ErrorKind::Magic { .. } => write!(f, "MagicError"),
        }
    }
}

/// An error produced anywhere in the definition pipeline.
///
/// The span locates the error in the definition source; errors raised on the
/// runtime side without a source site carry the zero span.
#[derive(Clone, Debug, PartialEq)]
pub struct LangError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
}

impl LangError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> LangError {
        LangError {
            kind,
            span,
            message: message.into(),
        }
    }

    /// An error with no source location.
    pub fn unpositioned(kind: ErrorKind, message: impl Into<String>) -> LangError {
        LangError::new(kind, Span::new(0u32, 0u32), message)
    }

    /// Render this error as a diagnostic against `file_id`, ready to be
    /// emitted by a reporting backend.
    pub fn to_diagnostic<FileId>(&self, file_id: FileId) -> Diagnostic<FileId> {
        let range = self.span.start().to_usize()..self.span.end().to_usize();
        Diagnostic::error()
            .with_message(self.to_string())
            .with_labels(vec![Label::primary(file_id, range)])
    }
}

impl fmt::Display for LangError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for LangError {}
