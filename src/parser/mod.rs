//! Classification of bot traffic.
//!
//! [`Parser`] turns one demultiplexed message into zero or one
//! [`ParserEvent`]. It owns no network or timer state, only an ordered list
//! of [`Rule`]s; new bot software phrasings are supported by registering
//! another rule.

mod dcc;
mod notice;
mod privmsg;

use std::net::IpAddr;
use std::time::Duration;

use regex::Regex;
use tracing::{error, trace};

use crate::command::Command;
use crate::ctcp;
use crate::domain::BotState;
use crate::message::Message;
use crate::util::strip_formatting;

pub use self::dcc::{CtcpRule, DccRule};
pub use self::notice::{PhraseRule, StatusRule, MAX_SUGGESTED_WAIT};
pub use self::privmsg::AnnouncementRule;

/// How a message reached us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `PRIVMSG` addressed to our nick.
    Query,
    /// `PRIVMSG` to a channel.
    Channel,
    /// `NOTICE` to us or a channel.
    Notice,
    /// CTCP inside a `PRIVMSG`.
    CtcpRequest,
    /// CTCP inside a `NOTICE`.
    CtcpReply,
}

/// One message as seen by the rules. For CTCP kinds `text` is the body
/// without delimiters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Incoming {
    pub kind: MessageKind,
    pub sender: String,
    pub target: String,
    pub text: String,
}

impl Incoming {
    pub fn new(kind: MessageKind, sender: &str, target: &str, text: &str) -> Self {
        Incoming {
            kind,
            sender: sender.to_string(),
            target: target.to_string(),
            text: text.to_string(),
        }
    }

    /// Demultiplex a `PRIVMSG` or `NOTICE`. Other commands and messages
    /// without a nick prefix yield `None`.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let sender = msg.source_nickname()?;
        let (notice, target, text) = match &msg.command {
            Command::PRIVMSG(target, text) => (false, target, text),
            Command::NOTICE(target, text) => (true, target, text),
            _ => return None,
        };
        let (kind, text) = match (ctcp::decode(text), notice) {
            (Some(body), false) => (MessageKind::CtcpRequest, body),
            (Some(body), true) => (MessageKind::CtcpReply, body),
            (None, true) => (MessageKind::Notice, text.as_str()),
            (None, false) if is_channel(target) => (MessageKind::Channel, text.as_str()),
            (None, false) => (MessageKind::Query, text.as_str()),
        };
        Some(Incoming::new(kind, sender, target, text))
    }
}

pub(crate) fn is_channel(name: &str) -> bool {
    name.starts_with(['#', '&', '+', '!'])
}

/// A `DCC SEND` offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DccOffer {
    pub bot: String,
    pub file_name: String,
    pub addr: IpAddr,
    /// 0 for a passive (reverse) offer.
    pub port: u16,
    /// 0 when the bot did not say.
    pub size: u64,
}

/// Typed outcome of classifying one message.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ParserEvent {
    /// Join `channel` (the bot requires it).
    JoinChannel { channel: String },
    /// The bot wants us on one of its channels; look them up.
    JoinChannelsFromBot { bot: String },
    /// Ask `bot` again later; `None` means the configured bot wait.
    QueueRequest { bot: String, wait: Option<Duration> },
    /// The bot dropped our request.
    UnRequest { bot: String },
    /// Send `text` to `bot`.
    SendPrivateMessage { bot: String, text: String },
    /// Send a raw message (CTCP replies).
    SendData { message: Message },
    /// Status report; `state` is `None` when only the message is news.
    BotStatus {
        bot: String,
        state: Option<BotState>,
        message: String,
        queue_position: Option<u32>,
        queue_time: Option<u32>,
    },
    /// The bot does not offer the number we asked for.
    PacketInvalid { bot: String, message: String },
    /// A channel listing line.
    PacketAnnounced {
        bot: String,
        channel: String,
        id: u32,
        size: u64,
        name: String,
    },
    DccSend(DccOffer),
    /// The bot agreed to resume `file_name` at `position`.
    DccAccept {
        bot: String,
        file_name: String,
        port: u16,
        position: u64,
    },
}

/// One recognizer of bot behavior.
pub trait Rule: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Classify an already scrubbed message.
    fn parse(&self, incoming: &Incoming) -> Option<ParserEvent>;
}

/// Ordered rule list; the first rule that matches wins.
pub struct Parser {
    rules: Vec<Box<dyn Rule>>,
}

impl Parser {
    /// Parser with the default vocabulary. `version` answers CTCP VERSION.
    pub fn new(version: &str) -> Self {
        Parser {
            rules: vec![
                Box::new(CtcpRule::new(version)),
                Box::new(DccRule),
                Box::new(AnnouncementRule::new()),
                Box::new(StatusRule::new()),
            ],
        }
    }

    /// Parser without any rules.
    pub fn empty() -> Self {
        Parser { rules: Vec::new() }
    }

    /// Append a rule. Earlier rules take precedence.
    pub fn register(&mut self, rule: impl Rule + 'static) {
        self.rules.push(Box::new(rule));
    }

    /// Classify one message. Unrecognized input yields `None`.
    pub fn parse(&self, incoming: &Incoming) -> Option<ParserEvent> {
        let scrubbed = Incoming {
            text: strip_formatting(&incoming.text),
            ..incoming.clone()
        };
        self.rules.iter().find_map(|rule| {
            let event = rule.parse(&scrubbed)?;
            trace!(rule = rule.name(), sender = %scrubbed.sender, "classified");
            Some(event)
        })
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(concat!("slirc-xdcc ", env!("CARGO_PKG_VERSION")))
    }
}

/// Compile built-in patterns, logging (and skipping) any that fail.
pub(crate) fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                error!(pattern = p, "invalid bot pattern: {}", e);
                None
            }
        })
        .collect()
}
