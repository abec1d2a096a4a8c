//! IRC messages: parsing and serialization.

mod nom_parser;
mod types;

pub use self::nom_parser::{DetailedParseError, ParsedMessage};
pub use self::types::Message;
