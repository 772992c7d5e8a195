//! Statement placeholder handling.

pub mod lexer;
pub mod normalizer;

pub use lexer::{parse_statement, ParsedStatement, Placeholder, PlaceholderNode};
pub use normalizer::{normalize_named, normalize_positional, Normalized};
