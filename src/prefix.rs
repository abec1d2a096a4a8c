//! IRC message prefix (source).

use std::fmt;

/// The source of a message: a server name or a `nick!user@host` triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prefix {
    /// A server name such as `irc.example.net`.
    ServerName(String),
    /// A user, with optional user and host parts.
    Nickname(String, String, String),
}

impl Prefix {
    /// Parse a prefix string (without the leading `:`).
    ///
    /// Anything with `!` or `@`, or without a `.`, is treated as a user.
    pub fn new_from_str(s: &str) -> Prefix {
        let (nick, rest) = match s.find(['!', '@']) {
            Some(i) => (&s[..i], &s[i..]),
            None if s.contains('.') => return Prefix::ServerName(s.to_string()),
            None => (s, ""),
        };

        let (user, host) = match rest.split_once('@') {
            Some((user, host)) => (user.trim_start_matches('!'), host),
            None => (rest.trim_start_matches('!'), ""),
        };

        Prefix::Nickname(nick.to_string(), user.to_string(), host.to_string())
    }

    /// The nickname, or the server name for server prefixes.
    pub fn name(&self) -> &str {
        match self {
            Prefix::ServerName(name) => name,
            Prefix::Nickname(nick, _, _) => nick,
        }
    }

    /// The nickname for user prefixes.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::ServerName(_) => None,
            Prefix::Nickname(nick, _, _) => Some(nick),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::ServerName(name) => f.write_str(name),
            Prefix::Nickname(nick, user, host) => {
                f.write_str(nick)?;
                if !user.is_empty() {
                    write!(f, "!{}", user)?;
                }
                if !host.is_empty() {
                    write!(f, "@{}", host)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_user_prefix() {
        let p = Prefix::new_from_str("[XG]TestBot!~SYSTEM@XG.BITPIR.AT");
        assert_eq!(
            p,
            Prefix::Nickname(
                "[XG]TestBot".into(),
                "~SYSTEM".into(),
                "XG.BITPIR.AT".into()
            )
        );
        assert_eq!(p.nick(), Some("[XG]TestBot"));
        assert_eq!(p.to_string(), "[XG]TestBot!~SYSTEM@XG.BITPIR.AT");
    }

    #[test]
    fn test_server_prefix() {
        let p = Prefix::new_from_str("irc.example.net");
        assert_eq!(p, Prefix::ServerName("irc.example.net".into()));
        assert_eq!(p.nick(), None);
        assert_eq!(p.name(), "irc.example.net");
    }

    #[test]
    fn test_bare_nick_and_host_only() {
        assert_eq!(
            Prefix::new_from_str("nick"),
            Prefix::Nickname("nick".into(), String::new(), String::new())
        );
        assert_eq!(
            Prefix::new_from_str("nick@host.net"),
            Prefix::Nickname("nick".into(), String::new(), "host.net".into())
        );
    }
}
