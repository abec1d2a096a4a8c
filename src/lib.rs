//! # slirc-xdcc
//!
//! An unattended XDCC grabber. It keeps IRC sessions on many servers,
//! discovers packets announced by file-serving bots, asks the bots for the
//! packets it wants, and streams them over DCC into local files.
//!
//! ## Layout
//!
//! - [`domain`]: the shared server / channel / bot / packet tree and its
//!   change events
//! - [`parser`]: classification of bot messages into typed events
//! - [`connection`]: the per-server state machine and its async driver
//! - [`download`]: DCC transfers and their registry
//! - [`allocator`]: where parts of a file go on disk
//! - [`agent`]: the supervisor tying it all together
//!
//! The wire layer ([`message`], [`command`], [`irc`], [`transport`]) is a
//! small IRC client codec.
//!
//! ## Quick Start
//!
//! ```rust
//! use slirc_xdcc::{Node, Tree};
//!
//! let tree = Tree::new();
//! let server = tree
//!     .add_child(None, Node::server("irc.example.net", 6667).enabled(true))
//!     .expect("servers attach to the root");
//! tree.add_child(Some(server), Node::channel("#xdcc").enabled(true))
//!     .expect("channels attach to servers");
//!
//! assert_eq!(tree.read().children(server).len(), 1);
//! ```
//!
//! ### Parsing IRC Messages
//!
//! ```rust
//! use slirc_xdcc::{Command, Message};
//!
//! let message: Message = ":Bot!bot@host PRIVMSG #xdcc :#1 10x [700M] file.mkv"
//!     .parse()
//!     .expect("valid IRC message");
//! assert_eq!(message.source_nickname(), Some("Bot"));
//! assert!(matches!(message.command, Command::PRIVMSG(..)));
//! ```

#![deny(clippy::all)]

pub mod agent;
pub mod allocator;
pub mod casemap;
pub mod command;
pub mod config;
pub mod connection;
pub mod ctcp;
pub mod domain;
pub mod download;
pub mod error;
pub mod irc;
pub mod message;
pub mod notification;
pub mod parser;
pub mod policy;
pub mod prefix;
pub mod response;
pub mod transport;
pub mod util;

pub use self::agent::Agent;
pub use self::allocator::{ChunkAllocator, DiskAllocator, PartSink};
pub use self::casemap::{irc_eq, irc_to_lower};
pub use self::command::Command;
pub use self::config::Config;
pub use self::connection::{Action, Connection, ConnectionHandle, ControlCommand, SessionEnd};
pub use self::domain::{BotState, EntityKind, Field, Node, ObjectId, Tree, TreeEvent};
pub use self::download::{DownloadManager, DownloadReport, DownloadRequest, Downloads, Outcome};
pub use self::error::{ConfigError, MessageParseError, ProtocolError, TreeError, XdccError};
pub use self::irc::IrcCodec;
pub use self::message::Message;
pub use self::notification::{Notification, NotificationKind};
pub use self::parser::{Incoming, MessageKind, Parser, ParserEvent, Rule};
pub use self::prefix::Prefix;
pub use self::response::Response;
pub use self::transport::{Transport, TransportReadError};
