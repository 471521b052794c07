use thiserror::Error;

/// Errors raised while compiling a selector, before any entry is visited
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid predicate at offset {offset}: {message}")]
    InvalidPredicate { offset: usize, message: String },

    #[error("empty predicate expression")]
    EmptyPredicate,
}
