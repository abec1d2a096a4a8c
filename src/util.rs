//! Text helpers shared by the bot parser and the connection manager.

use std::net::{IpAddr, Ipv4Addr};

/// Maximum length for an IRC line including tags.
pub const MAX_IRC_LINE_LEN: usize = 8191;

/// Removes mIRC formatting and other control characters.
///
/// Color codes (`\x03` followed by up to two digits, optionally `,` and two
/// more) are dropped together with their arguments.
///
/// # Examples
///
/// ```
/// use slirc_xdcc::util::strip_formatting;
///
/// assert_eq!(strip_formatting("\x0304,01** Sending\x0f you"), "** Sending you");
/// assert_eq!(strip_formatting("\x02bold\x02"), "bold");
/// ```
pub fn strip_formatting(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x03' {
            for _ in 0..2 {
                if chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                    chars.next();
                }
            }
            if chars.peek() == Some(&',') {
                let mut lookahead = chars.clone();
                lookahead.next();
                if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                    chars.next();
                    for _ in 0..2 {
                        if chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                            chars.next();
                        }
                    }
                }
            }
            continue;
        }
        if c.is_control() {
            continue;
        }
        out.push(c);
    }

    out.trim().to_string()
}

/// Normalizes a file name for duplicate-request suppression.
///
/// Case and every non-alphanumeric character are ignored, so
/// `Some.File_v2.MKV` and `some file v2 mkv` collide.
///
/// ```
/// use slirc_xdcc::util::shrink_file_name;
///
/// assert_eq!(shrink_file_name("Some.File_v2.MKV"), "somefilev2mkv");
/// ```
pub fn shrink_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Parses a human size like `700M`, `1.4G` or `<1K` into bytes.
///
/// Bare numbers are bytes. Returns `None` for anything else.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().trim_start_matches('<').trim();
    let (number, unit) = match s.find(|c: char| !(c.is_ascii_digit() || c == '.')) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    };
    let value: f64 = number.parse().ok()?;
    let factor: u64 = match unit.to_ascii_uppercase().trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => return None,
    };
    Some((value * factor as f64) as u64)
}

/// Parses the host field of a `DCC SEND` offer.
///
/// Classic DCC encodes IPv4 addresses as a decimal `u32`; newer clients
/// send dotted or IPv6 text.
pub fn parse_dcc_ip(s: &str) -> Option<IpAddr> {
    if let Ok(n) = s.parse::<u32>() {
        return Some(IpAddr::V4(Ipv4Addr::from(n)));
    }
    s.parse().ok()
}

/// Splits a CTCP argument list, honoring double-quoted file names.
pub fn split_quoted(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in s.chars() {
        match c {
            '"' => quoted = !quoted,
            ' ' if !quoted => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
