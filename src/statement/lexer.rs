use std::ops::Range;

use crate::error::{QueryError, QueryResult};

/// A bind placeholder found in statement text.
#[derive(Debug, Clone, PartialEq)]
pub enum Placeholder {
    /// `?`
    Positional,
    /// `?3`, bound to a fixed 1-based argument index
    Indexed(usize),
    /// `:name`
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderNode {
    pub placeholder: Placeholder,
    /// Byte range of the placeholder in the statement text.
    pub span: Range<usize>,
}

/// Statement text split at its placeholders.
#[derive(Debug, Clone)]
pub struct ParsedStatement<'a> {
    pub text: &'a str,
    pub placeholders: Vec<PlaceholderNode>,
}

impl ParsedStatement<'_> {
    pub fn has_indexed(&self) -> bool {
        self.placeholders
            .iter()
            .any(|p| matches!(p.placeholder, Placeholder::Indexed(_)))
    }

    pub fn has_positional(&self) -> bool {
        self.placeholders
            .iter()
            .any(|p| p.placeholder == Placeholder::Positional)
    }

    pub fn has_named(&self) -> bool {
        self.placeholders
            .iter()
            .any(|p| matches!(p.placeholder, Placeholder::Named(_)))
    }
}

/// Scans statement text for placeholders, skipping string literals, quoted
/// identifiers, comments and `::` casts.
pub struct StatementLexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    position: usize,
}

impl<'a> StatementLexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            position: 0,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.chars.get(self.position).map(|(_, c)| *c)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.position)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current_char() {
            self.advance();
            if ch == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> QueryResult<()> {
        self.advance(); // skip /
        self.advance(); // skip *
        while let Some(ch) = self.current_char() {
            if ch == '*' && self.peek() == Some('/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(QueryError::Statement("Unterminated block comment".to_string()))
    }

    fn skip_quoted(&mut self, quote: char) -> QueryResult<()> {
        self.advance(); // skip opening quote
        while let Some(ch) = self.current_char() {
            if ch == quote {
                // Doubled quote is an escaped quote
                if self.peek() == Some(quote) {
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                return Ok(());
            }
            if ch == '\\' && quote == '\'' {
                self.advance();
            }
            self.advance();
        }
        Err(QueryError::Statement(format!(
            "Unterminated quoted text starting with {}",
            quote
        )))
    }

    fn read_placeholder(&mut self) -> Option<PlaceholderNode> {
        let start = self.offset();
        let marker = self.current_char()?;
        self.advance();

        let mut name = String::new();
        while let Some(ch) = self.current_char() {
            let accept = if marker == '?' {
                ch.is_ascii_digit()
            } else {
                ch.is_alphanumeric() || ch == '_' || (ch == '.' && !name.is_empty())
            };
            if !accept {
                break;
            }
            name.push(ch);
            self.advance();
        }
        // A trailing dot belongs to the surrounding text
        if name.ends_with('.') {
            name.pop();
            self.position -= 1;
        }
        let span = start..self.offset();

        let placeholder = match marker {
            '?' if name.is_empty() => Placeholder::Positional,
            '?' => Placeholder::Indexed(name.parse().ok()?),
            _ if name.is_empty() => return None,
            _ => Placeholder::Named(name),
        };
        Some(PlaceholderNode { placeholder, span })
    }

    pub fn parse(mut self) -> QueryResult<ParsedStatement<'a>> {
        let mut placeholders = Vec::new();

        while let Some(ch) = self.current_char() {
            match ch {
                '-' if self.peek() == Some('-') => self.skip_line_comment(),
                '/' if self.peek() == Some('*') => self.skip_block_comment()?,
                '\'' | '"' | '`' => self.skip_quoted(ch)?,
                ':' if self.peek() == Some(':') || self.peek() == Some('=') => {
                    // `::type` cast or `:=` assignment
                    self.advance();
                    self.advance();
                }
                ':' if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') => {
                    if let Some(node) = self.read_placeholder() {
                        placeholders.push(node);
                    }
                }
                '?' => {
                    if let Some(node) = self.read_placeholder() {
                        placeholders.push(node);
                    }
                }
                _ => self.advance(),
            }
        }

        Ok(ParsedStatement {
            text: self.input,
            placeholders,
        })
    }
}

/// Locate the placeholders of a statement.
pub fn parse_statement(input: &str) -> QueryResult<ParsedStatement<'_>> {
    StatementLexer::new(input).parse()
}
