//! CTCP framing.
//!
//! CTCP payloads travel inside `PRIVMSG` (requests) and `NOTICE` (replies),
//! delimited by `\x01`. XDCC offers arrive as `DCC SEND` requests.

const DELIM: char = '\x01';

/// Wrap a CTCP body in delimiters.
pub fn encode(body: &str) -> String {
    format!("{DELIM}{body}{DELIM}")
}

/// Return the CTCP body if `text` is a CTCP frame.
///
/// A missing closing delimiter is tolerated; some bots truncate it.
pub fn decode(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(DELIM)?;
    Some(inner.strip_suffix(DELIM).unwrap_or(inner))
}

/// Split a CTCP body into its verb (uppercased) and the rest.
pub fn split(body: &str) -> (String, &str) {
    match body.split_once(' ') {
        Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim()),
        None => (body.to_ascii_uppercase(), ""),
    }
}
