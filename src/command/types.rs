//! IRC command types.
//!
//! Only the commands that drive the XDCC workflow get their own variant;
//! everything else is carried in [`Command::Raw`].
//!
//! # Reference
//! - RFC 2812: Internet Relay Chat: Client Protocol

use crate::response::Response;

/// IRC command with its parameters.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Command {
    // === Connection Registration ===
    /// `PASS password`
    PASS(String),
    /// `NICK nickname`
    NICK(String),
    /// `USER username mode realname`
    USER(String, String, String),
    /// `QUIT [message]`
    QUIT(Option<String>),

    // === Channel Operations ===
    /// `JOIN channels [keys]`
    JOIN(String, Option<String>),
    /// `PART channels [message]`
    PART(String, Option<String>),
    /// `KICK channel user [comment]`
    KICK(String, String, Option<String>),
    /// `MODE target [modes and arguments]`
    MODE(String, Vec<String>),
    /// `TOPIC channel [topic]`
    TOPIC(String, Option<String>),

    // === Messaging ===
    /// `PRIVMSG target text`
    PRIVMSG(String, String),
    /// `NOTICE target text`
    NOTICE(String, String),

    // === Queries and keepalive ===
    /// `WHOIS nickmask`
    WHOIS(String),
    /// `PING server1 [server2]`
    PING(String, Option<String>),
    /// `PONG server1 [server2]`
    PONG(String, Option<String>),
    /// `ERROR message`
    ERROR(String),

    /// Numeric reply with its arguments.
    Response(Response, Vec<String>),
    /// Any other command, verbatim.
    Raw(String, Vec<String>),
}
