//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use slirc_xdcc::allocator::PartSink;
use slirc_xdcc::{
    Action, ChunkAllocator, Command, Config, Connection, Message, Node, ObjectId, Parser, Tree,
};

/// Allocator whose answers are scripted per file name. Unscripted files
/// start at offset 0.
#[derive(Default)]
pub struct ScriptedAllocator {
    chunks: Mutex<HashMap<String, Option<u64>>>,
    completed: Mutex<Vec<String>>,
}

impl ScriptedAllocator {
    pub fn answer(&self, file: &str, chunk: Option<u64>) {
        self.chunks.lock().insert(file.to_string(), chunk);
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

impl ChunkAllocator for ScriptedAllocator {
    fn next_available_chunk(&self, file: &str, _size: u64) -> Option<u64> {
        self.chunks.lock().get(file).copied().unwrap_or(Some(0))
    }

    fn open_part(&self, _file: &str, _size: u64, _offset: u64) -> io::Result<Box<dyn PartSink>> {
        Ok(Box::new(tokio::io::sink()))
    }

    fn check_completed_file(&self, file: &str, _size: u64) -> io::Result<bool> {
        self.completed.lock().push(file.to_string());
        Ok(true)
    }
}

/// A server with one enabled channel and one bot.
pub struct Fixture {
    pub tree: Arc<Tree>,
    pub allocator: Arc<ScriptedAllocator>,
    pub server: ObjectId,
    pub channel: ObjectId,
    pub bot: ObjectId,
    pub conn: Connection,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let tree = Arc::new(Tree::new());
        let server = tree
            .add_child(None, Node::server("irc.example.net", 6667).enabled(true))
            .unwrap();
        let channel = tree
            .add_child(Some(server), Node::channel("#xdcc").enabled(true))
            .unwrap();
        let bot = tree
            .add_child(Some(channel), Node::bot("Bot").enabled(true))
            .unwrap();
        let allocator = Arc::new(ScriptedAllocator::default());
        let conn = Connection::new(
            server,
            tree.clone(),
            Arc::new(config),
            allocator.clone(),
            Arc::new(Parser::default()),
        );
        Fixture {
            tree,
            allocator,
            server,
            channel,
            bot,
            conn,
        }
    }

    /// Complete registration and forget the resulting actions.
    pub fn register(&mut self, now: Instant) {
        self.conn.start();
        self.line(":irc.example.net 001 slirc-xdcc :Welcome", now);
        self.conn.drain();
    }

    pub fn line(&mut self, line: &str, now: Instant) {
        let message: Message = line.parse().unwrap();
        self.conn.handle_message(&message, now);
    }

    pub fn packet(&self, number: u32, name: &str, enabled: bool) -> ObjectId {
        self.tree
            .add_child(Some(self.bot), Node::packet(number, name, 1024).enabled(enabled))
            .unwrap()
    }

    /// Feed every pending tree event into the connection.
    pub fn pump(&mut self, subscription: &mut slirc_xdcc::domain::Subscription, now: Instant) {
        while let Some(event) = subscription.try_recv() {
            self.conn.on_tree_event(&event, now);
        }
    }
}

/// Text of every PRIVMSG in `actions` addressed to `target`.
pub fn privmsgs(actions: &[Action], target: &str) -> Vec<String> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Send(Message {
                command: Command::PRIVMSG(t, text),
                ..
            }) if t == target => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Channels named in outbound JOINs.
pub fn joins(actions: &[Action]) -> Vec<String> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Send(Message {
                command: Command::JOIN(channel, _),
                ..
            }) => Some(channel.clone()),
            _ => None,
        })
        .collect()
}
