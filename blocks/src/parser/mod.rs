pub mod error;
pub mod expression;

pub use error::ParseError;
