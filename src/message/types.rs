use std::fmt;
use std::str::FromStr;

use crate::command::Command;
use crate::ctcp;
use crate::error::{MessageParseError, ProtocolError};
use crate::prefix::Prefix;

use super::nom_parser::ParsedMessage;

/// An owned IRC message.
///
/// IRCv3 tags are accepted on input and dropped; the agent never sends them.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Message source, if any.
    pub prefix: Option<Prefix>,
    /// The command and its parameters.
    pub command: Command,
}

impl Message {
    /// Wrap a command without a prefix.
    pub fn new(command: Command) -> Self {
        Message {
            prefix: None,
            command,
        }
    }

    /// `PRIVMSG target :text`
    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new(Command::PRIVMSG(target.to_string(), text.to_string()))
    }

    /// `NOTICE target :text`
    pub fn notice(target: &str, text: &str) -> Self {
        Self::new(Command::NOTICE(target.to_string(), text.to_string()))
    }

    /// `JOIN channel`
    pub fn join(channel: &str) -> Self {
        Self::new(Command::JOIN(channel.to_string(), None))
    }

    /// `PART channel`
    pub fn part(channel: &str) -> Self {
        Self::new(Command::PART(channel.to_string(), None))
    }

    /// A CTCP request carried in a `PRIVMSG`.
    pub fn ctcp_request(target: &str, body: &str) -> Self {
        Self::privmsg(target, &ctcp::encode(body))
    }

    /// A CTCP reply carried in a `NOTICE`.
    pub fn ctcp_reply(target: &str, body: &str) -> Self {
        Self::notice(target, &ctcp::encode(body))
    }

    /// Attach a prefix.
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Nickname of the sender, if the prefix names a user.
    pub fn source_nickname(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nick)
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidMessage {
                string: s.to_string(),
                cause: MessageParseError::EmptyMessage,
            });
        }

        let parsed = ParsedMessage::parse(trimmed).map_err(|e| ProtocolError::InvalidMessage {
            string: s.to_string(),
            cause: MessageParseError::ParseContext {
                position: e.position,
                context: e.context.unwrap_or("parsing message").to_string(),
            },
        })?;

        Ok(Message {
            prefix: parsed.prefix.map(Prefix::new_from_str),
            command: Command::new(parsed.command, parsed.params),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}\r\n", self.command)
    }
}
