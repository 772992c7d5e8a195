//! Template block parser and expression parser.

use serde_json::Value;

use super::lexer::{Lexer, Segment, Token};
use super::{BinaryOp, Expr, Node};
use crate::error::{QueryError, QueryResult};

pub(super) fn parse_template(segments: &[Segment]) -> QueryResult<Vec<Node>> {
    let mut position = 0;
    let (nodes, terminator) = parse_block(segments, &mut position, &[])?;
    match terminator {
        Some(tag) => Err(QueryError::Template(format!("Unexpected tag '{}'", tag))),
        None => Ok(nodes),
    }
}

/// Parse nodes until one of `terminators` (matched on the tag keyword) or the
/// end of input. Returns the nodes and the terminating tag, if any.
fn parse_block(
    segments: &[Segment],
    position: &mut usize,
    terminators: &[&str],
) -> QueryResult<(Vec<Node>, Option<String>)> {
    let mut nodes = Vec::new();

    while let Some(segment) = segments.get(*position) {
        *position += 1;
        match segment {
            Segment::Text(text) => nodes.push(Node::Text(text.clone())),
            Segment::Output(source) => nodes.push(Node::Output(parse_expression(source)?)),
            Segment::Tag(tag) => {
                let (keyword, rest) = split_keyword(tag);
                if terminators.contains(&keyword) {
                    return Ok((nodes, Some(tag.clone())));
                }
                match keyword {
                    "if" => nodes.push(parse_if(segments, position, rest)?),
                    "for" => nodes.push(parse_for(segments, position, rest)?),
                    _ => {
                        return Err(QueryError::Template(format!("Unexpected tag '{}'", tag)));
                    }
                }
            }
        }
    }

    Ok((nodes, None))
}

fn split_keyword(tag: &str) -> (&str, &str) {
    match tag.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (tag, ""),
    }
}

fn parse_if(segments: &[Segment], position: &mut usize, condition: &str) -> QueryResult<Node> {
    let mut branches = Vec::new();
    let mut condition = parse_expression(condition)?;

    loop {
        let (body, end) = parse_block(segments, position, &["elif", "else", "endif"])?;
        branches.push((condition, body));
        let Some(end) = end else {
            return Err(QueryError::Template("Missing '{% endif %}'".to_string()));
        };
        match split_keyword(&end) {
            ("elif", rest) => condition = parse_expression(rest)?,
            ("else", _) => {
                let (otherwise, end) = parse_block(segments, position, &["endif"])?;
                if end.is_none() {
                    return Err(QueryError::Template("Missing '{% endif %}'".to_string()));
                }
                return Ok(Node::If {
                    branches,
                    otherwise,
                });
            }
            _ => {
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                });
            }
        }
    }
}

fn parse_for(segments: &[Segment], position: &mut usize, header: &str) -> QueryResult<Node> {
    let (variable, iterable) = header
        .split_once(" in ")
        .map(|(v, i)| (v.trim(), i.trim()))
        .filter(|(v, _)| !v.is_empty() && v.chars().all(|c| c.is_alphanumeric() || c == '_'))
        .ok_or_else(|| QueryError::Template(format!("Invalid for loop '{}'", header)))?;

    let iterable = parse_expression(iterable)?;
    let (body, end) = parse_block(segments, position, &["endfor"])?;
    if end.is_none() {
        return Err(QueryError::Template("Missing '{% endfor %}'".to_string()));
    }

    Ok(Node::For {
        variable: variable.to_string(),
        iterable,
        body,
    })
}

pub(super) fn parse_expression(source: &str) -> QueryResult<Expr> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = ExprParser {
        tokens,
        position: 0,
    };
    let expr = parser.parse_or()?;
    if *parser.current_token() != Token::Eof {
        return Err(QueryError::Template(format!(
            "Unexpected token {:?} in '{}'",
            parser.current_token(),
            source
        )));
    }
    Ok(expr)
}

struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    fn current_token(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn peek_token(&self, offset: usize) -> &Token {
        self.tokens.get(self.position + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn expect(&mut self, expected: Token) -> QueryResult<()> {
        if *self.current_token() == expected {
            self.advance();
            Ok(())
        } else {
            Err(QueryError::Template(format!(
                "Expected {:?}, found {:?}",
                expected,
                self.current_token()
            )))
        }
    }

    fn parse_or(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_and()?;
        while *self.current_token() == Token::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary(Box::new(left), BinaryOp::Or, Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_not()?;
        while *self.current_token() == Token::And {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary(Box::new(left), BinaryOp::And, Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> QueryResult<Expr> {
        if *self.current_token() == Token::Not {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> QueryResult<Expr> {
        let left = self.parse_additive()?;
        let op = match self.current_token() {
            Token::Equal => BinaryOp::Equal,
            Token::NotEqual => BinaryOp::NotEqual,
            Token::LessThan => BinaryOp::LessThan,
            Token::LessThanEq => BinaryOp::LessThanOrEqual,
            Token::GreaterThan => BinaryOp::GreaterThan,
            Token::GreaterThanEq => BinaryOp::GreaterThanOrEqual,
            Token::In => BinaryOp::In,
            Token::Not if *self.peek_token(1) == Token::In => {
                self.advance();
                BinaryOp::NotIn
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    fn parse_additive(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_postfix()?;
        while *self.current_token() == Token::Plus {
            self.advance();
            let right = self.parse_postfix()?;
            left = Expr::Binary(Box::new(left), BinaryOp::Add, Box::new(right));
        }
        Ok(left)
    }

    fn parse_postfix(&mut self) -> QueryResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current_token() {
                Token::Dot => {
                    self.advance();
                    let field = match self.current_token() {
                        Token::Identifier(name) => name.clone(),
                        Token::Integer(n) => n.to_string(),
                        other => {
                            return Err(QueryError::Template(format!(
                                "Expected field name after '.', found {:?}",
                                other
                            )));
                        }
                    };
                    self.advance();
                    expr = Expr::Field(Box::new(expr), field);
                }
                Token::LeftBracket => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(Token::RightBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> QueryResult<Expr> {
        let token = self.current_token().clone();
        match token {
            Token::Integer(n) => {
                self.advance();
                Ok(Expr::Literal(Value::from(n)))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(crate::value::number_from_f64(f))))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::Identifier(name) => {
                self.advance();
                if *self.current_token() == Token::LeftParen {
                    self.advance();
                    let args = self.parse_list(Token::RightParen)?;
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Variable(name))
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::LeftBracket => {
                self.advance();
                Ok(Expr::Array(self.parse_list(Token::RightBracket)?))
            }
            other => Err(QueryError::Template(format!(
                "Unexpected token {:?}",
                other
            ))),
        }
    }

    fn parse_list(&mut self, close: Token) -> QueryResult<Vec<Expr>> {
        let mut items = Vec::new();
        if *self.current_token() == close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if *self.current_token() == Token::Comma {
                self.advance();
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("a or b and not c == 1").unwrap();
        let expected = Expr::Binary(
            Box::new(Expr::Variable("a".to_string())),
            BinaryOp::Or,
            Box::new(Expr::Binary(
                Box::new(Expr::Variable("b".to_string())),
                BinaryOp::And,
                Box::new(Expr::Not(Box::new(Expr::Binary(
                    Box::new(Expr::Variable("c".to_string())),
                    BinaryOp::Equal,
                    Box::new(Expr::Literal(Value::from(1))),
                )))),
            )),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_paths_calls_and_not_in() {
        let expr = parse_expression("p.items[0].id not in ids").unwrap();
        match expr {
            Expr::Binary(left, BinaryOp::NotIn, _) => {
                assert!(matches!(*left, Expr::Field(_, ref f) if f == "id"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let expr = parse_expression("sp(like(name))").unwrap();
        assert!(matches!(expr, Expr::Call(ref n, ref args) if n == "sp" && args.len() == 1));
    }

    #[test]
    fn test_for_header_validation() {
        let segments = vec![Segment::Tag("for in rows".to_string())];
        assert!(parse_template(&segments).is_err());
    }
}
