//! Statement templates.
//!
//! A template mixes statement text with directives:
//!
//! - `{{ expr }}` writes the value of `expr` as text
//! - `{{ sp(expr) }}` writes a `?` placeholder and binds the value of `expr`
//! - `{% if expr %}` / `{% elif expr %}` / `{% else %}` / `{% endif %}`
//! - `{% for x in expr %}` ... `{% endfor %}`, with `loop.index`, `loop.index0`,
//!   `loop.first` and `loop.last`
//! - `{# comment #}`
//!
//! Names resolve against loop variables first, then against the criteria
//! object; `p` refers to the whole criteria value.

mod eval;
mod lexer;
mod parser;

use serde_json::Value;

use crate::error::QueryResult;

pub use lexer::{split_segments, Segment};

/// Expression syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Not(Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    And,
    Or,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    NotIn,
    Add,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        variable: String,
        iterable: Expr,
        body: Vec<Node>,
    },
}

/// A compiled template. Compile once, render many times.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn compile(source: &str) -> QueryResult<Self> {
        let segments = split_segments(source)?;
        let nodes = parser::parse_template(&segments)?;
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Render against the criteria, returning the statement text and the
    /// values bound through `sp(...)`, in placeholder order.
    pub fn render(&self, criteria: &Value) -> QueryResult<(String, Vec<Value>)> {
        let mut renderer = eval::Renderer::new(criteria);
        renderer.render_nodes(&self.nodes)?;
        Ok(renderer.finish())
    }
}
