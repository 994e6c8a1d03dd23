#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    StringLit(String),
    Ident(String),

    // Keywords
    Let,
    Const,
    Var,
    Function,
    Return,
    If,
    Else,
    For,
    While,
    Break,
    Continue,
    True,
    False,

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Comma,    // ,
    Semicolon, // ;
    Dot,      // .
    Question, // ?
    Colon,    // :
    Arrow,    // =>

    // Operators
    Plus,       // +
    Minus,      // -
    Star,       // *
    StarStar,   // **
    Slash,      // /
    Percent,    // %
    Amp,        // &
    AmpAmp,     // &&
    Pipe,       // |
    PipePipe,   // ||
    Caret,      // ^
    Tilde,      // ~
    Bang,       // !
    Shl,        // <<
    Shr,        // >>
    UShr,       // >>>
    Lt,         // <
    Gt,         // >
    LtEq,       // <=
    GtEq,       // >=
    EqEq,       // ==
    NotEq,      // !=
    EqEqEq,     // ===
    NotEqEq,    // !==
    PlusPlus,   // ++
    MinusMinus, // --
    Eq,         // =
    /// Compound assignment such as `+=` or `>>>=`; carries the binary operator token.
    OpAssign(Box<Token>),

    EOF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

/// Convert a token back to its approximate source representation.
pub fn token_to_string(token: &Token) -> String {
    match token {
        Token::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{n}")
            }
        }
        Token::StringLit(s) => format!("\"{s}\""),
        Token::Ident(s) => s.clone(),
        Token::Let => "let".into(),
        Token::Const => "const".into(),
        Token::Var => "var".into(),
        Token::Function => "function".into(),
        Token::Return => "return".into(),
        Token::If => "if".into(),
        Token::Else => "else".into(),
        Token::For => "for".into(),
        Token::While => "while".into(),
        Token::Break => "break".into(),
        Token::Continue => "continue".into(),
        Token::True => "true".into(),
        Token::False => "false".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::LBracket => "[".into(),
        Token::RBracket => "]".into(),
        Token::LBrace => "{".into(),
        Token::RBrace => "}".into(),
        Token::Comma => ",".into(),
        Token::Semicolon => ";".into(),
        Token::Dot => ".".into(),
        Token::Question => "?".into(),
        Token::Colon => ":".into(),
        Token::Arrow => "=>".into(),
        Token::Plus => "+".into(),
        Token::Minus => "-".into(),
        Token::Star => "*".into(),
        Token::StarStar => "**".into(),
        Token::Slash => "/".into(),
        Token::Percent => "%".into(),
        Token::Amp => "&".into(),
        Token::AmpAmp => "&&".into(),
        Token::Pipe => "|".into(),
        Token::PipePipe => "||".into(),
        Token::Caret => "^".into(),
        Token::Tilde => "~".into(),
        Token::Bang => "!".into(),
        Token::Shl => "<<".into(),
        Token::Shr => ">>".into(),
        Token::UShr => ">>>".into(),
        Token::Lt => "<".into(),
        Token::Gt => ">".into(),
        Token::LtEq => "<=".into(),
        Token::GtEq => ">=".into(),
        Token::EqEq => "==".into(),
        Token::NotEq => "!=".into(),
        Token::EqEqEq => "===".into(),
        Token::NotEqEq => "!==".into(),
        Token::PlusPlus => "++".into(),
        Token::MinusMinus => "--".into(),
        Token::Eq => "=".into(),
        Token::OpAssign(op) => format!("{}=", token_to_string(op)),
        Token::EOF => "end of input".into(),
    }
}
