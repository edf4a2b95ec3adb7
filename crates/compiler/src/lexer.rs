//! muF lexer
//!
//! Hand-written tokenizer. Whitespace and newlines are insignificant,
//! comments run from `!` to the end of the line, strings are double-quoted
//! with `\n`/`\t`/`\r` escapes. Dotted spellings (`.true.`, `.eq.`,
//! `.not.`) are matched directly, and a dot followed by an identifier with
//! no closing dot is a label.

use muf_core::{Int, Real};

use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // tokens with a value
    Int(Int),
    Real(Real),
    Str(String),
    Bool(bool),
    Ident(String),
    /// `.name` jump label.
    Label(String),

    // keywords
    If,
    Then,
    Else,
    While,
    Break,
    Next,
    Do,
    Select,
    Case,
    Default,
    End,
    Function,
    Procedure,
    Return,
    Result,
    Results,
    Assign,
    IntDecl,
    RealDecl,
    BoolDecl,
    CplxDecl,
    StringDecl,
    Dimension,
    Program,
    Goto,
    Comefrom,

    // logical operators
    And,
    Or,
    Xor,
    Not,

    // comparison operators
    Equ,
    Neq,
    Geq,
    Leq,
    Gt,
    Lt,

    // other multi-char operators
    TypeSep,
    Pow,
    Range,

    // single-char tokens
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Comma,
    Colon,
    Eq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Pipe,
    Apostrophe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    src_name: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &str, src_name: &'a str) -> Self {
        Lexer {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            src_name,
        }
    }

    /// Tokenize the whole input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek() {
            match ch {
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c.is_whitespace() => self.pos += 1,
                // line comment
                '!' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                // statement separators are insignificant
                ';' => self.pos += 1,
                '"' => tokens.push(self.lex_string()?),
                c if c.is_ascii_digit() => tokens.push(self.lex_number()),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.lex_word()),
                '.' => tokens.push(self.lex_dotted()?),
                _ => tokens.push(self.lex_operator()?),
            }
        }

        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offs: usize) -> Option<char> {
        self.chars.get(self.pos + offs).copied()
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            line: self.line,
        }
    }

    fn error(&self, msg: String) -> ParseError {
        ParseError::new(self.src_name, self.line, msg)
    }

    fn lex_string(&mut self) -> Result<Token, ParseError> {
        self.pos += 1; // opening quote
        let mut val = String::new();

        loop {
            match self.peek() {
                None => return Err(self.error("Unterminated string literal.".into())),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    let esc = self.peek_at(1);
                    self.pos += 2;
                    match esc {
                        Some('n') => val.push('\n'),
                        Some('t') => val.push('\t'),
                        Some('r') => val.push('\r'),
                        Some(other) => val.push(other),
                        None => return Err(self.error("Unterminated string literal.".into())),
                    }
                }
                Some('\n') => return Err(self.error("Unterminated string literal.".into())),
                Some(c) => {
                    val.push(c);
                    self.pos += 1;
                }
            }
        }

        Ok(self.token(TokenKind::Str(val)))
    }

    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        let mut is_real = false;

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }

        // fractional part; a dot not followed by a digit could still start
        // a dotted keyword, so only consume `.` followed by a digit
        if self.peek() == Some('.')
            && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit() || c.is_whitespace())
        {
            is_real = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        // exponent
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut offs = 1;
            if matches!(self.peek_at(1), Some('+' | '-')) {
                offs = 2;
            }
            if matches!(self.peek_at(offs), Some(c) if c.is_ascii_digit()) {
                is_real = true;
                self.pos += offs;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if is_real {
            self.token(TokenKind::Real(text.parse().unwrap_or(0.0)))
        } else {
            self.token(TokenKind::Int(text.parse().unwrap_or(0)))
        }
    }

    fn lex_word(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        let kind = match word.as_str() {
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "next" => TokenKind::Next,
            "do" => TokenKind::Do,
            "select" => TokenKind::Select,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "end" => TokenKind::End,
            "function" => TokenKind::Function,
            "procedure" => TokenKind::Procedure,
            "return" => TokenKind::Return,
            "result" => TokenKind::Result,
            "results" => TokenKind::Results,
            "assign" => TokenKind::Assign,
            "integer" => TokenKind::IntDecl,
            "real" => TokenKind::RealDecl,
            "logical" => TokenKind::BoolDecl,
            "complex" => TokenKind::CplxDecl,
            "string" => TokenKind::StringDecl,
            "dimension" => TokenKind::Dimension,
            "program" => TokenKind::Program,
            "goto" => TokenKind::Goto,
            "comefrom" => TokenKind::Comefrom,
            "xor" => TokenKind::Xor,
            _ => TokenKind::Ident(word),
        };

        self.token(kind)
    }

    /// `.true.`, `.eq.`-style spellings and `.name` labels.
    fn lex_dotted(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        self.pos += 1; // dot
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let closed = self.peek() == Some('.');
        if closed {
            self.pos += 1;
        }

        let word: String = self.chars[start..self.pos].iter().collect();

        if closed {
            let kind = match word.as_str() {
                ".true." => TokenKind::Bool(true),
                ".false." => TokenKind::Bool(false),
                ".eq." => TokenKind::Equ,
                ".ne." => TokenKind::Neq,
                ".ge." => TokenKind::Geq,
                ".le." => TokenKind::Leq,
                ".gt." => TokenKind::Gt,
                ".lt." => TokenKind::Lt,
                ".and." => TokenKind::And,
                ".or." => TokenKind::Or,
                ".not." => TokenKind::Not,
                _ => return Err(self.error(format!("Unknown keyword \"{word}\"."))),
            };
            return Ok(self.token(kind));
        }

        // labels are `.name` with an identifier-shaped name
        if word.len() > 1 && !word.as_bytes()[1].is_ascii_digit() {
            return Ok(self.token(TokenKind::Label(word[1..].to_string())));
        }

        Err(self.error(format!("Stray \"{word}\" in input.")))
    }

    fn lex_operator(&mut self) -> Result<Token, ParseError> {
        let two: String = self
            .chars
            .iter()
            .skip(self.pos)
            .take(2)
            .collect();

        let two_kind = match two.as_str() {
            "==" => Some(TokenKind::Equ),
            "/=" => Some(TokenKind::Neq),
            ">=" => Some(TokenKind::Geq),
            "<=" => Some(TokenKind::Leq),
            "&&" => Some(TokenKind::And),
            "||" => Some(TokenKind::Or),
            "::" => Some(TokenKind::TypeSep),
            "**" => Some(TokenKind::Pow),
            _ => None,
        };
        if let Some(kind) = two_kind {
            self.pos += 2;
            return Ok(self.token(kind));
        }

        let ch = self.peek().expect("operator char");
        let kind = match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '=' => TokenKind::Eq,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '>' => TokenKind::Gt,
            '<' => TokenKind::Lt,
            '|' => TokenKind::Pipe,
            '~' => TokenKind::Range,
            '\'' => TokenKind::Apostrophe,
            other => return Err(self.error(format!("Unexpected character '{other}'."))),
        };

        self.pos += 1;
        Ok(self.token(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "<test>")
            .tokenize()
            .expect("lex")
            .into_iter()
            .map(|tok| tok.kind)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("42"), vec![TokenKind::Int(42)]);
        assert_eq!(lex("3.25"), vec![TokenKind::Real(3.25)]);
        assert_eq!(lex("1e3"), vec![TokenKind::Real(1000.0)]);
        assert_eq!(lex("2.5e-1"), vec![TokenKind::Real(0.25)]);
    }

    #[test]
    fn test_declaration() {
        assert_eq!(
            lex("integer :: x = 2"),
            vec![
                TokenKind::IntDecl,
                TokenKind::TypeSep,
                TokenKind::Ident("x".into()),
                TokenKind::Eq,
                TokenKind::Int(2),
            ]
        );
    }

    #[test]
    fn test_dotted_keywords() {
        assert_eq!(lex(".true."), vec![TokenKind::Bool(true)]);
        assert_eq!(lex("a .eq. b"), vec![
            TokenKind::Ident("a".into()),
            TokenKind::Equ,
            TokenKind::Ident("b".into()),
        ]);
    }

    #[test]
    fn test_labels() {
        assert_eq!(
            lex("goto .loop_start"),
            vec![TokenKind::Goto, TokenKind::Label("loop_start".into())]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            lex(r#""a\tb""#),
            vec![TokenKind::Str("a\tb".into())]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let tokens = Lexer::new("x ! comment == ignored\ny", "<test>")
            .tokenize()
            .expect("lex");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex("a /= b ** 2"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Neq,
                TokenKind::Ident("b".into()),
                TokenKind::Pow,
                TokenKind::Int(2),
            ]
        );
    }

    #[test]
    fn test_range_operator() {
        assert_eq!(
            lex("v[1 ~ 3]"),
            vec![
                TokenKind::Ident("v".into()),
                TokenKind::LBracket,
                TokenKind::Int(1),
                TokenKind::Range,
                TokenKind::Int(3),
                TokenKind::RBracket,
            ]
        );
    }
}
