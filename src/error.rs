use crate::token::{token_to_string, Span, Token};
use std::fmt;

/// Where a failure happened: while building the function, or while running
/// it at a specific tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorPhase {
    Compilation,
    Runtime { t: f64 },
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPhase::Compilation => write!(f, "compilation"),
            ErrorPhase::Runtime { t } if t.fract() == 0.0 && t.abs() < 1e15 => {
                write!(f, "t={}", *t as i64)
            }
            ErrorPhase::Runtime { t } => write!(f, "t={t}"),
        }
    }
}

#[derive(Debug)]
pub enum LexError {
    UnexpectedChar { ch: char, pos: usize },
    UnterminatedString { pos: usize },
    UnterminatedComment { pos: usize },
    InvalidNumber { text: String, pos: usize },
}

#[derive(Debug)]
pub enum ParseError {
    UnexpectedToken {
        expected: String,
        found: Token,
        span: Span,
    },
    InvalidAssignmentTarget {
        span: Span,
    },
    /// Parentheses, operator chains or blocks nested past the parser's limit.
    TooDeep {
        span: Span,
    },
}

/// A failure raised while evaluating user code.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub message: String,
    pub span: Option<Span>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            span: None,
        }
    }

    pub fn at(message: impl Into<String>, span: Span) -> Self {
        RuntimeError {
            message: message.into(),
            span: Some(span),
        }
    }
}

#[derive(Debug)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    /// Name resolution failed (unknown name, write to a constant, ...).
    Scope { message: String, span: Span },
    /// The function was built but its trial invocation failed.
    Validation(RuntimeError),
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { ch, pos } => Span::new(*pos, pos + ch.len_utf8()),
            LexError::UnterminatedString { pos }
            | LexError::UnterminatedComment { pos } => Span::new(*pos, *pos),
            LexError::InvalidNumber { text, pos } => Span::new(*pos, pos + text.len()),
        }
    }
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::InvalidAssignmentTarget { span }
            | ParseError::TooDeep { span } => *span,
        }
    }
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lex(e) => Some(e.span()),
            CompileError::Parse(e) => Some(e.span()),
            CompileError::Scope { span, .. } => Some(*span),
            CompileError::Validation(e) => e.span,
        }
    }

    /// Construction-time failures report `compilation`; a failing trial call
    /// reports the tick it was made at.
    pub fn phase(&self) -> ErrorPhase {
        match self {
            CompileError::Validation(_) => ErrorPhase::Runtime { t: 0.0 },
            _ => ErrorPhase::Compilation,
        }
    }

    /// True when the source parsed and resolved, and only validation failed.
    pub fn is_compiled(&self) -> bool {
        matches!(self, CompileError::Validation(_))
    }

    pub fn message(&self) -> String {
        match self {
            CompileError::Lex(e) => e.to_string(),
            CompileError::Parse(e) => e.to_string(),
            CompileError::Scope { message, .. } => message.clone(),
            CompileError::Validation(e) => e.message.clone(),
        }
    }

    /// One-line description with phase and 1-based location, as sent to hosts.
    pub fn describe(&self, source: &str) -> String {
        let loc = self.span().map(|s| location(source, s.start));
        format_error(self.phase(), &self.message(), loc)
    }

    /// Framed diagnostic pointing into `source`.
    pub fn render(&self, source: &str) -> String {
        use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};

        let span = self.span().unwrap_or_default();
        let start = span.start.min(source.len());
        let end = span.end.clamp(start, source.len());
        let mut out = Vec::new();
        let written = Report::build(ReportKind::Error, start..end)
            .with_config(
                Config::default()
                    .with_color(false)
                    .with_index_type(IndexType::Byte),
            )
            .with_message(self.message())
            .with_label(Label::new(start..end).with_message(format!("{} error", self.phase())))
            .finish()
            .write(Source::from(source), &mut out);
        match written {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => self.describe(source),
        }
    }
}

/// 1-based `(line, character)` of a byte offset in `source`.
pub fn location(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// `"<phase> error (at line L, character C): <message>"`, location optional.
pub fn format_error(phase: ErrorPhase, message: &str, loc: Option<(usize, usize)>) -> String {
    match loc {
        Some((line, col)) => {
            format!("{phase} error (at line {line}, character {col}): {message}")
        }
        None => format!("{phase} error: {message}"),
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "Lexer error: {e}"),
            CompileError::Parse(e) => write!(f, "Parse error: {e}"),
            CompileError::Scope { message, .. } => write!(f, "Scope error: {message}"),
            CompileError::Validation(e) => write!(f, "Validation failed: {e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnexpectedChar { ch, .. } => write!(f, "Invalid or unexpected token '{ch}'"),
            LexError::UnterminatedString { .. } => write!(f, "Unterminated string literal"),
            LexError::UnterminatedComment { .. } => write!(f, "Unterminated comment"),
            LexError::InvalidNumber { text, .. } => write!(f, "Invalid number '{text}'"),
        }
    }
}

impl std::error::Error for LexError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { found: Token::EOF, expected, .. } => {
                write!(f, "Unexpected end of input, expected {expected}")
            }
            ParseError::UnexpectedToken { expected, found, .. } => {
                write!(f, "Unexpected token '{}', expected {expected}", token_to_string(found))
            }
            ParseError::InvalidAssignmentTarget { .. } => {
                write!(f, "Invalid left-hand side in assignment")
            }
            ParseError::TooDeep { .. } => write!(f, "Expression nested too deeply"),
        }
    }
}

impl std::error::Error for ParseError {}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<RuntimeError> for CompileError {
    fn from(e: RuntimeError) -> Self {
        CompileError::Validation(e)
    }
}
