//! IRC case-mapping functions.
//!
//! Nicknames and channel names are compared with the `rfc1459` mapping:
//! ASCII letters fold to lowercase and `[]\~` fold to `{}|^`.

#[inline]
fn fold(c: char) -> char {
    match c {
        'A'..='Z' => c.to_ascii_lowercase(),
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c,
    }
}

/// Convert a string to IRC lowercase using RFC 1459 case mapping.
pub fn irc_to_lower(s: &str) -> String {
    s.chars().map(fold).collect()
}

/// Compare two names using IRC case-insensitive comparison.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().map(fold).eq(b.chars().map(fold))
}

/// Remove channel membership prefixes (`@`, `%`, `+`, ...) from a NAMES entry.
pub fn strip_membership(name: &str) -> &str {
    name.trim_start_matches(['@', '!', '%', '+', '~', '&'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1459_folding() {
        assert_eq!(irc_to_lower("[XG]Bot\\~"), "{xg}bot|^");
        assert!(irc_eq("[XG]TestBot", "{xg}testbot"));
        assert!(!irc_eq("bot", "bots"));
    }

    #[test]
    fn test_strip_membership() {
        assert_eq!(strip_membership("@Op"), "Op");
        assert_eq!(strip_membership("+Voice"), "Voice");
        assert_eq!(strip_membership("%@mixed"), "mixed");
        assert_eq!(strip_membership("plain"), "plain");
    }
}
