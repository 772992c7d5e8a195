//! Template and expression tokenizers.

use crate::error::{QueryError, QueryResult};

/// A raw piece of template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    /// `{{ expr }}`
    Output(String),
    /// `{% tag %}`
    Tag(String),
}

/// Split template source into text, output and tag segments.
///
/// `{#- ... -#}` comments are dropped. A `-` just inside a delimiter trims the
/// whitespace on that side (`{%- if x -%}`).
pub fn split_segments(source: &str) -> QueryResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut trim_next = false;

    while !rest.is_empty() {
        let Some(start) = find_open(rest) else {
            push_text(&mut segments, rest, trim_next, false);
            break;
        };
        let opener = &rest[start..start + 2];
        let closer = match opener {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };
        let body_start = start + 2;
        let Some(end) = rest[body_start..].find(closer) else {
            return Err(QueryError::Template(format!(
                "Unclosed '{}' in template",
                opener
            )));
        };
        let mut body = &rest[body_start..body_start + end];
        let trim_before = body.starts_with('-');
        if trim_before {
            body = &body[1..];
        }
        let trim_after = body.ends_with('-');
        if trim_after {
            body = &body[..body.len() - 1];
        }

        push_text(&mut segments, &rest[..start], trim_next, trim_before);
        match opener {
            "{{" => segments.push(Segment::Output(body.trim().to_string())),
            "{%" => segments.push(Segment::Tag(body.trim().to_string())),
            _ => {}
        }
        trim_next = trim_after;
        rest = &rest[body_start + end + 2..];
    }

    Ok(segments)
}

fn find_open(input: &str) -> Option<usize> {
    ["{{", "{%", "{#"]
        .iter()
        .filter_map(|open| input.find(open))
        .min()
}

fn push_text(segments: &mut Vec<Segment>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),

    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,

    Equal,         // ==
    NotEqual,      // !=
    LessThan,      // <
    LessThanEq,    // <=
    GreaterThan,   // >
    GreaterThanEq, // >=
    Plus,          // +

    Dot,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,

    Eof,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn read_number(&mut self) -> QueryResult<Token> {
        let mut num_str = String::new();
        let mut has_dot = false;
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                num_str.push(ch);
            } else if ch == '.' && !has_dot && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                num_str.push(ch);
            } else {
                break;
            }
            self.advance();
        }
        if has_dot {
            num_str
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| QueryError::Template(format!("Invalid number: {}", num_str)))
        } else {
            num_str
                .parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| QueryError::Template(format!("Invalid number: {}", num_str)))
        }
    }

    fn read_string(&mut self, quote: char) -> QueryResult<Token> {
        self.advance();
        let mut string = String::new();
        while let Some(ch) = self.current_char() {
            self.advance();
            if ch == quote {
                return Ok(Token::String(string));
            }
            if ch == '\\' {
                if let Some(escaped) = self.current_char() {
                    self.advance();
                    string.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                continue;
            }
            string.push(ch);
        }
        Err(QueryError::Template("Unterminated string".to_string()))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match ident.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" | "none" => Token::Null,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            _ => Token::Identifier(ident),
        }
    }

    fn two_char(&mut self, second: char, double: Token, single: Option<Token>) -> QueryResult<Token> {
        let first = self.current_char();
        self.advance();
        if self.current_char() == Some(second) {
            self.advance();
            return Ok(double);
        }
        single.ok_or_else(|| {
            QueryError::Template(format!("Unexpected character: {}", first.unwrap_or(' ')))
        })
    }

    fn single(&mut self, token: Token) -> QueryResult<Token> {
        self.advance();
        Ok(token)
    }

    pub fn next_token(&mut self) -> QueryResult<Token> {
        while self.current_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
        let Some(ch) = self.current_char() else {
            return Ok(Token::Eof);
        };
        match ch {
            c if c.is_ascii_digit() => self.read_number(),
            '\'' | '"' => self.read_string(ch),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier()),
            '=' => self.two_char('=', Token::Equal, None),
            '!' => self.two_char('=', Token::NotEqual, Some(Token::Not)),
            '<' => self.two_char('=', Token::LessThanEq, Some(Token::LessThan)),
            '>' => self.two_char('=', Token::GreaterThanEq, Some(Token::GreaterThan)),
            '&' => self.two_char('&', Token::And, None),
            '|' => self.two_char('|', Token::Or, None),
            '+' => self.single(Token::Plus),
            '.' => self.single(Token::Dot),
            ',' => self.single(Token::Comma),
            '(' => self.single(Token::LeftParen),
            ')' => self.single(Token::RightParen),
            '[' => self.single(Token::LeftBracket),
            ']' => self.single(Token::RightBracket),
            other => Err(QueryError::Template(format!(
                "Unexpected character: {}",
                other
            ))),
        }
    }

    pub fn tokenize(&mut self) -> QueryResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}
