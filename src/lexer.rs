use crate::error::LexError;
use crate::token::{Span, Spanned, Token};

pub struct Lexer {
    chars: Vec<char>,
    /// Precomputed byte offset for each char index.
    /// `byte_offsets[i]` = byte offset of `chars[i]` in the original `&str`.
    /// `byte_offsets[chars.len()]` = total byte length (sentinel for EOF).
    byte_offsets: Vec<usize>,
    pos: usize,
    /// Whether a line break was skipped since the previous token.
    saw_newline: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let mut byte_offsets = Vec::with_capacity(chars.len() + 1);
        let mut offset = 0;
        for ch in &chars {
            byte_offsets.push(offset);
            offset += ch.len_utf8();
        }
        byte_offsets.push(offset); // sentinel for EOF
        Lexer {
            chars,
            byte_offsets,
            pos: 0,
            saw_newline: false,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let is_eof = spanned.token == Token::EOF;
            tokens.push(spanned);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    /// Skip whitespace and comments, remembering whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(ch) = self.peek_at(0) {
            match ch {
                '\n' | '\u{2028}' | '\u{2029}' => {
                    self.saw_newline = true;
                    self.pos += 1;
                }
                c if c.is_whitespace() || c == '\u{feff}' => self.pos += 1,
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek_at(0) {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.advance() {
                            Some('*') if self.peek_at(0) == Some('/') => {
                                self.pos += 1;
                                break;
                            }
                            Some('\n') => self.saw_newline = true,
                            Some(_) => {}
                            None => {
                                return Err(LexError::UnterminatedComment {
                                    pos: self.byte_pos_of(start),
                                })
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Convert a char index to a byte offset.
    fn byte_pos_of(&self, char_idx: usize) -> usize {
        self.byte_offsets[char_idx.min(self.chars.len())]
    }

    fn spanned(&mut self, token: Token, start: usize) -> Spanned {
        let newline_before = std::mem::take(&mut self.saw_newline);
        Spanned {
            token,
            span: Span {
                start: self.byte_pos_of(start),
                end: self.byte_pos_of(self.pos),
            },
            newline_before,
        }
    }

    /// Consume `len` chars and emit `token`.
    fn punct(&mut self, token: Token, len: usize, start: usize) -> Result<Spanned, LexError> {
        self.pos += len;
        Ok(self.spanned(token, start))
    }

    fn next_token(&mut self) -> Result<Spanned, LexError> {
        self.skip_trivia()?;

        let start = self.pos;
        let Some(ch) = self.peek_at(0) else {
            return Ok(self.spanned(Token::EOF, start));
        };
        let next = self.peek_at(1);
        let third = self.peek_at(2);
        let assign = |op: Token| Token::OpAssign(Box::new(op));

        match ch {
            '(' => self.punct(Token::LParen, 1, start),
            ')' => self.punct(Token::RParen, 1, start),
            '[' => self.punct(Token::LBracket, 1, start),
            ']' => self.punct(Token::RBracket, 1, start),
            '{' => self.punct(Token::LBrace, 1, start),
            '}' => self.punct(Token::RBrace, 1, start),
            ',' => self.punct(Token::Comma, 1, start),
            ';' => self.punct(Token::Semicolon, 1, start),
            '?' => self.punct(Token::Question, 1, start),
            ':' => self.punct(Token::Colon, 1, start),
            '~' => self.punct(Token::Tilde, 1, start),
            '.' if next.is_some_and(|c| c.is_ascii_digit()) => self.lex_number(start),
            '.' => self.punct(Token::Dot, 1, start),
            '=' => match (next, third) {
                (Some('='), Some('=')) => self.punct(Token::EqEqEq, 3, start),
                (Some('='), _) => self.punct(Token::EqEq, 2, start),
                (Some('>'), _) => self.punct(Token::Arrow, 2, start),
                _ => self.punct(Token::Eq, 1, start),
            },
            '!' => match (next, third) {
                (Some('='), Some('=')) => self.punct(Token::NotEqEq, 3, start),
                (Some('='), _) => self.punct(Token::NotEq, 2, start),
                _ => self.punct(Token::Bang, 1, start),
            },
            '<' => match (next, third) {
                (Some('<'), Some('=')) => self.punct(assign(Token::Shl), 3, start),
                (Some('<'), _) => self.punct(Token::Shl, 2, start),
                (Some('='), _) => self.punct(Token::LtEq, 2, start),
                _ => self.punct(Token::Lt, 1, start),
            },
            '>' => match (next, third, self.peek_at(3)) {
                (Some('>'), Some('>'), Some('=')) => self.punct(assign(Token::UShr), 4, start),
                (Some('>'), Some('>'), _) => self.punct(Token::UShr, 3, start),
                (Some('>'), Some('='), _) => self.punct(assign(Token::Shr), 3, start),
                (Some('>'), _, _) => self.punct(Token::Shr, 2, start),
                (Some('='), _, _) => self.punct(Token::GtEq, 2, start),
                _ => self.punct(Token::Gt, 1, start),
            },
            '*' => match (next, third) {
                (Some('*'), Some('=')) => self.punct(assign(Token::StarStar), 3, start),
                (Some('*'), _) => self.punct(Token::StarStar, 2, start),
                (Some('='), _) => self.punct(assign(Token::Star), 2, start),
                _ => self.punct(Token::Star, 1, start),
            },
            '&' => match next {
                Some('&') => self.punct(Token::AmpAmp, 2, start),
                Some('=') => self.punct(assign(Token::Amp), 2, start),
                _ => self.punct(Token::Amp, 1, start),
            },
            '|' => match next {
                Some('|') => self.punct(Token::PipePipe, 2, start),
                Some('=') => self.punct(assign(Token::Pipe), 2, start),
                _ => self.punct(Token::Pipe, 1, start),
            },
            '^' => match next {
                Some('=') => self.punct(assign(Token::Caret), 2, start),
                _ => self.punct(Token::Caret, 1, start),
            },
            '+' => match next {
                Some('+') => self.punct(Token::PlusPlus, 2, start),
                Some('=') => self.punct(assign(Token::Plus), 2, start),
                _ => self.punct(Token::Plus, 1, start),
            },
            '-' => match next {
                Some('-') => self.punct(Token::MinusMinus, 2, start),
                Some('=') => self.punct(assign(Token::Minus), 2, start),
                _ => self.punct(Token::Minus, 1, start),
            },
            '/' => match next {
                Some('=') => self.punct(assign(Token::Slash), 2, start),
                _ => self.punct(Token::Slash, 1, start),
            },
            '%' => match next {
                Some('=') => self.punct(assign(Token::Percent), 2, start),
                _ => self.punct(Token::Percent, 1, start),
            },
            '"' | '\'' | '`' => self.lex_string(start),
            c if c.is_ascii_digit() => self.lex_number(start),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => self.lex_ident(start),
            _ => Err(LexError::UnexpectedChar {
                ch,
                pos: self.byte_pos_of(start),
            }),
        }
    }

    fn lex_string(&mut self, start: usize) -> Result<Spanned, LexError> {
        let quote = self.advance().unwrap_or('"');
        let unterminated = |lexer: &Self| LexError::UnterminatedString {
            pos: lexer.byte_pos_of(start),
        };
        let mut s = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some('\n') if quote != '`' => return Err(unterminated(self)),
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('\n') => {}
                    Some('x') => {
                        let code = self.lex_hex_digits(2).ok_or_else(|| unterminated(self))?;
                        s.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    Some('u') => {
                        let code = self.lex_hex_digits(4).ok_or_else(|| unterminated(self))?;
                        s.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    Some(c) => s.push(c),
                    None => return Err(unterminated(self)),
                },
                Some(c) => s.push(c),
                None => return Err(unterminated(self)),
            }
        }
        Ok(self.spanned(Token::StringLit(s), start))
    }

    fn lex_hex_digits(&mut self, count: usize) -> Option<u32> {
        let mut code = 0;
        for _ in 0..count {
            let digit = self.advance()?.to_digit(16)?;
            code = code * 16 + digit;
        }
        Some(code)
    }

    fn lex_number(&mut self, start: usize) -> Result<Spanned, LexError> {
        // Radix prefixes: 0x, 0b, 0o
        if self.peek_at(0) == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('b' | 'B') => Some(2),
                Some('o' | 'O') => Some(8),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while self.peek_at(0).is_some_and(|c| c.is_digit(radix)) {
                    self.pos += 1;
                }
                let digits: String = self.chars[digits_start..self.pos].iter().collect();
                let value = u64::from_str_radix(&digits, radix).map_err(|_| {
                    LexError::InvalidNumber {
                        text: self.chars[start..self.pos].iter().collect(),
                        pos: self.byte_pos_of(start),
                    }
                })?;
                return Ok(self.spanned(Token::Number(value as f64), start));
            }
        }

        while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek_at(0) == Some('.') {
            self.pos += 1;
            while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek_at(0), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1 + sign;
                while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        // Rust's float parser rejects a bare trailing dot ("1.")
        let num: f64 = text
            .strip_suffix('.')
            .unwrap_or(&text)
            .parse()
            .map_err(|_| LexError::InvalidNumber {
                text: text.clone(),
                pos: self.byte_pos_of(start),
            })?;
        Ok(self.spanned(Token::Number(num), start))
    }

    fn lex_ident(&mut self, start: usize) -> Result<Spanned, LexError> {
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let token = match text.as_str() {
            "let" => Token::Let,
            "const" => Token::Const,
            "var" => Token::Var,
            "function" => Token::Function,
            "return" => Token::Return,
            "if" => Token::If,
            "else" => Token::Else,
            "for" => Token::For,
            "while" => Token::While,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Ident(text),
        };
        Ok(self.spanned(token, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .filter(|t| !matches!(t, Token::EOF))
            .collect()
    }

    #[test]
    fn test_classic_bytebeat() {
        let tokens = lex("t*(t>>5|t>>8)");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("t".into()),
                Token::Star,
                Token::LParen,
                Token::Ident("t".into()),
                Token::Shr,
                Token::Number(5.0),
                Token::Pipe,
                Token::Ident("t".into()),
                Token::Shr,
                Token::Number(8.0),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_longest_operator_match() {
        let tokens = lex("a>>>=b>>>c===d!==e**=f=>g");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::OpAssign(Box::new(Token::UShr)),
                Token::Ident("b".into()),
                Token::UShr,
                Token::Ident("c".into()),
                Token::EqEqEq,
                Token::Ident("d".into()),
                Token::NotEqEq,
                Token::Ident("e".into()),
                Token::OpAssign(Box::new(Token::StarStar)),
                Token::Ident("f".into()),
                Token::Arrow,
                Token::Ident("g".into()),
            ]
        );
    }

    #[test]
    fn test_number_forms() {
        let tokens = lex("0x1F 0b101 0o17 .5 1.25e2 3.");
        assert_eq!(
            tokens,
            vec![
                Token::Number(31.0),
                Token::Number(5.0),
                Token::Number(15.0),
                Token::Number(0.5),
                Token::Number(125.0),
                Token::Number(3.0),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = lex(r#"'a\x41B' "q\"" `raw`"#);
        assert_eq!(
            tokens,
            vec![
                Token::StringLit("aAB".into()),
                Token::StringLit("q\"".into()),
                Token::StringLit("raw".into()),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped_and_newlines_tracked() {
        let spanned = Lexer::new("a // note\n/* block */ b").tokenize().unwrap();
        assert_eq!(spanned[0].token, Token::Ident("a".into()));
        assert!(!spanned[0].newline_before);
        assert_eq!(spanned[1].token, Token::Ident("b".into()));
        assert!(spanned[1].newline_before);
    }

    #[test]
    fn test_unexpected_char_reports_position() {
        let err = Lexer::new("t # 2").tokenize().unwrap_err();
        match err {
            LexError::UnexpectedChar { ch, pos } => {
                assert_eq!(ch, '#');
                assert_eq!(pos, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            Lexer::new("'abc").tokenize(),
            Err(LexError::UnterminatedString { pos: 0 })
        ));
    }
}
