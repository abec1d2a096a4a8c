//! Error types for the XDCC agent.
//!
//! The wire layer reports [`ProtocolError`] and [`MessageParseError`];
//! everything above it folds into [`XdccError`].

use std::net::SocketAddr;

use thiserror::Error;

use crate::domain::{EntityKind, ObjectId};

/// Convenience type alias for Results using [`XdccError`].
pub type Result<T, E = XdccError> = std::result::Result<T, E>;

/// Top-level errors raised by the agent.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum XdccError {
    /// I/O error on a control or peer socket, or on disk.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-level failure on the IRC control connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Domain tree misuse.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A transfer for this packet is already running.
    #[error("packet {0} is already downloading")]
    DuplicateTransfer(ObjectId),

    /// A TCP connect did not finish in time.
    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// A DCC peer hung up before the byte budget was met.
    #[error("peer closed after {received} of {expected} bytes")]
    PeerClosed { received: u64, expected: u64 },
}

/// Errors on the IRC control connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Message exceeded maximum allowed length.
    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    /// Failed to parse an IRC message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The raw message string.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors encountered when parsing IRC messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Message was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Command was invalid or missing.
    #[error("invalid command")]
    InvalidCommand,

    /// Invalid message prefix.
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    /// Parsing error with position information.
    #[error("parsing failed at position {position}: {context}")]
    ParseContext {
        /// Character position where parsing failed.
        position: usize,
        /// Description of what was being parsed.
        context: String,
    },
}

/// Errors raised by the domain tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    /// No entity with this id.
    #[error("entity {0} not found")]
    NotFound(ObjectId),

    /// The child kind cannot live under the given parent.
    #[error("a {child} cannot be attached to {parent:?}")]
    InvalidParent {
        /// Kind of the entity being attached.
        child: EntityKind,
        /// Kind of the requested parent, `None` for the root.
        parent: Option<EntityKind>,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`crate::config::Config`].
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
