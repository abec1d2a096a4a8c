//! Per-server connection manager.
//!
//! [`Connection`] is a sans-IO state machine: it consumes IRC messages,
//! parser events, tree events and clock ticks, mutates the shared tree, and
//! queues [`Action`]s for its driver to execute. It performs no network
//! I/O and owns no timers; every operation that schedules takes `now`.
//!
//! Retry bookkeeping (bot deadlines, channel deadlines and the anti-flood
//! window per normalized file name) is private to one connection.

mod driver;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::allocator::ChunkAllocator;
use crate::casemap::{irc_eq, irc_to_lower, strip_membership};
use crate::command::Command;
use crate::config::Config;
use crate::domain::{BotState, EntityKind, Node, ObjectId, Tree, TreeEvent};
use crate::download::DownloadRequest;
use crate::message::Message;
use crate::notification::{Notification, NotificationKind};
use crate::parser::{is_channel, DccOffer, Incoming, MessageKind, Parser, ParserEvent};
use crate::policy;
use crate::response::Response;
use crate::util::{shrink_file_name, strip_formatting};

pub use self::driver::{run_session, ConnectionHandle, ControlCommand, SessionEnd};

/// Minimum spacing between `last_contact` updates of one bot.
const CONTACT_GRANULARITY: i64 = 60;

/// Side effects requested by the connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Write to the control connection.
    Send(Message),
    /// Spawn a download manager.
    StartDownload(DownloadRequest),
    /// Publish an audit record.
    Notify(Notification),
}

/// An offer waiting for the bot's `DCC ACCEPT`.
#[derive(Clone, Debug)]
struct PendingResume {
    packet: ObjectId,
    bot: ObjectId,
    file_name: String,
    size: u64,
    offset: u64,
    addr: SocketAddr,
}

pub struct Connection {
    server: ObjectId,
    tree: Arc<Tree>,
    config: Arc<Config>,
    allocator: Arc<dyn ChunkAllocator>,
    parser: Arc<Parser>,

    nick: String,
    registered: bool,

    bot_queue: HashMap<ObjectId, Instant>,
    channel_queue: HashMap<ObjectId, Instant>,
    latest_requests: HashMap<String, Instant>,

    pending_resumes: HashMap<(String, u16), PendingResume>,
    pending_whois: HashSet<String>,
    members: HashMap<String, HashSet<String>>,

    actions: Vec<Action>,
}

impl Connection {
    pub fn new(
        server: ObjectId,
        tree: Arc<Tree>,
        config: Arc<Config>,
        allocator: Arc<dyn ChunkAllocator>,
        parser: Arc<Parser>,
    ) -> Self {
        Connection {
            server,
            nick: config.irc.nick.clone(),
            tree,
            config,
            allocator,
            parser,
            registered: false,
            bot_queue: HashMap::new(),
            channel_queue: HashMap::new(),
            latest_requests: HashMap::new(),
            pending_resumes: HashMap::new(),
            pending_whois: HashSet::new(),
            members: HashMap::new(),
            actions: Vec::new(),
        }
    }

    pub fn server(&self) -> ObjectId {
        self.server
    }

    pub(crate) fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Our current nickname.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Whether `001` has been received on the current session.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// When `bot` is next scheduled for a request.
    pub fn bot_deadline(&self, bot: ObjectId) -> Option<Instant> {
        self.bot_queue.get(&bot).copied()
    }

    /// When `channel` is next scheduled for a join.
    pub fn channel_deadline(&self, channel: ObjectId) -> Option<Instant> {
        self.channel_queue.get(&channel).copied()
    }

    /// End of the anti-flood window for a file name, if one is open.
    pub fn suppressed_until(&self, file_name: &str) -> Option<Instant> {
        self.latest_requests.get(&shrink_file_name(file_name)).copied()
    }

    /// Take every queued action.
    pub fn drain(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    fn send(&mut self, message: Message) {
        self.actions.push(Action::Send(message));
    }

    fn notify(&mut self, kind: NotificationKind, entity: ObjectId) {
        self.actions.push(Action::Notify(Notification::new(kind, entity)));
    }

    fn is_self(&self, nick: &str) -> bool {
        irc_eq(&self.nick, nick)
    }

    fn find_bot(&self, nick: &str) -> Option<ObjectId> {
        self.tree.find_bot(self.server, nick)
    }

    fn find_channel(&self, name: &str) -> Option<ObjectId> {
        self.tree.find_channel(self.server, name)
    }

    fn node_name(&self, id: ObjectId) -> Option<String> {
        self.tree.get(id).map(|n| n.name().to_string())
    }

    fn modify(&self, id: ObjectId, f: impl FnOnce(&mut Node)) {
        if let Err(e) = self.tree.modify(id, f) {
            debug!("entity vanished during update: {}", e);
        }
    }

    fn set_enabled(&self, id: ObjectId, enabled: bool) {
        if let Err(e) = self.tree.set_enabled(id, enabled) {
            debug!("entity vanished during enable change: {}", e);
        }
    }

    /// Begin registration on a fresh session.
    pub fn start(&mut self) {
        self.registered = false;
        self.nick = self.config.irc.nick.clone();
        self.members.clear();
        self.pending_resumes.clear();
        self.pending_whois.clear();

        if let Some(password) = &self.config.irc.password {
            self.send(Message::new(Command::PASS(password.clone())));
        }
        let irc = &self.config.irc;
        let nick = Message::new(Command::NICK(irc.nick.clone()));
        let user = Message::new(Command::USER(
            irc.username.clone(),
            "0".to_string(),
            irc.realname.clone(),
        ));
        self.send(nick);
        self.send(user);
    }

    /// The session ended; everything on it is disconnected.
    pub fn disconnected(&mut self) {
        self.registered = false;
        self.members.clear();
        self.pending_resumes.clear();
        self.pending_whois.clear();

        self.modify(self.server, |n| {
            n.set_connected(false);
        });
        let channels = self.tree.read().children(self.server);
        for channel in channels {
            self.modify(channel, |n| {
                n.set_connected(false);
                n.set_user_count(0);
            });
        }
    }

    // === Scheduling ===

    /// Schedule a request for `bot` after `wait`, unless one is pending.
    /// A wait past the clock's range falls back to the bot wait.
    pub fn requeue_bot(&mut self, bot: ObjectId, wait: Duration, now: Instant) {
        let at = deadline(now, wait, self.config.timeouts.bot_wait());
        self.bot_queue.entry(bot).or_insert(at);
    }

    /// Schedule a join of `channel` after `wait`, unless one is pending.
    /// A wait past the clock's range falls back to the long channel wait.
    pub fn queue_channel(&mut self, channel: ObjectId, wait: Duration, now: Instant) {
        let fallback = Duration::from_secs(self.config.timeouts.channel_wait_long);
        let at = deadline(now, wait, fallback);
        self.channel_queue.entry(channel).or_insert(at);
    }

    /// Fire every due deadline. Each is removed before it fires.
    pub fn tick(&mut self, now: Instant) {
        self.latest_requests.retain(|_, until| *until > now);

        let due_channels: Vec<ObjectId> = self
            .channel_queue
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();
        for channel in due_channels {
            self.channel_queue.remove(&channel);
            let Some(node) = self.tree.get(channel) else {
                continue;
            };
            if self.registered && node.is_enabled() && !node.is_connected() {
                info!(channel = node.name(), "retrying join");
                self.send(Message::join(node.name()));
            }
        }

        let due_bots: Vec<ObjectId> = self
            .bot_queue
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();
        for bot in due_bots {
            self.bot_queue.remove(&bot);
            self.request_from_bot(bot, now);
        }
    }

    // === Requests ===

    /// Ask `bot` for its oldest enabled packet. No-op unless the bot is
    /// idle. After a request the bot is re-checked once `bot_wait` passes.
    ///
    /// Packets the allocator has no free range for are disabled and the
    /// next one is tried. A file name still inside its anti-flood window
    /// defers the bot until the window closes instead of sending.
    pub fn request_from_bot(&mut self, bot: ObjectId, now: Instant) {
        let Some(bot_node) = self.tree.get(bot) else {
            return;
        };
        let Some(data) = bot_node.as_bot() else {
            return;
        };
        if data.state != BotState::Idle {
            return;
        }

        while let Some(packet) = self.tree.oldest_enabled_packet(bot) {
            let Some(packet_node) = self.tree.get(packet) else {
                return;
            };
            let Some(pdata) = packet_node.as_packet() else {
                return;
            };
            let file = pdata.file_name(packet_node.name()).to_string();
            let size = pdata.file_size();
            let number = pdata.id;

            if self.allocator.next_available_chunk(&file, size).is_none() {
                warn!(bot = bot_node.name(), packet = number, file = %file, "packet already in use, disabling");
                self.set_enabled(packet, false);
                self.notify(NotificationKind::PacketConflict, packet);
                continue;
            }

            let key = shrink_file_name(&file);
            if let Some(until) = self.latest_requests.get(&key).copied() {
                if until > now {
                    let remaining = until - now;
                    warn!(bot = bot_node.name(), file = %file, ?remaining, "file name still suppressed");
                    self.requeue_bot(bot, remaining, now);
                    return;
                }
            }

            if self.registered {
                info!(bot = bot_node.name(), packet = number, file = %file, "requesting packet");
                self.send(Message::privmsg(bot_node.name(), &format!("XDCC SEND {number}")));
                self.latest_requests
                    .insert(key, now + self.config.timeouts.same_packet_request());
                self.modify(bot, |n| {
                    n.set_current(Some(packet));
                });
                self.notify(NotificationKind::PacketRequested, packet);
            }

            // Re-check in case the bot ignores us.
            self.requeue_bot(bot, self.config.timeouts.bot_wait(), now);
            return;
        }
    }

    /// Ask `bot` to drop us from its queue.
    pub fn unrequest_from_bot(&mut self, bot: ObjectId, now: Instant) {
        let Some(name) = self.node_name(bot) else {
            return;
        };
        if self.registered {
            info!(bot = %name, "removing request");
            self.send(Message::privmsg(&name, "XDCC REMOVE"));
        }
        self.modify(bot, |n| {
            n.set_current(None);
            if n.as_bot().is_some_and(|b| b.state != BotState::Active) {
                n.set_state(BotState::Idle);
                n.set_queue(0, 0);
            }
        });
        self.requeue_bot(bot, self.config.timeouts.command_wait(), now);
        self.notify(NotificationKind::PacketRemoved, bot);
    }

    // === Tree reactions ===

    /// React to a tree change. Events of other servers are ignored.
    pub fn on_tree_event(&mut self, event: &TreeEvent, now: Instant) {
        if event.server() != self.server {
            return;
        }
        match event {
            TreeEvent::EnabledChanged {
                id,
                kind: EntityKind::Channel,
                enabled,
                ..
            } => self.on_channel_enabled_changed(*id, *enabled, now),
            TreeEvent::EnabledChanged {
                id,
                kind: EntityKind::Packet,
                enabled,
                ..
            } => self.on_packet_enabled_changed(*id, *enabled, now),
            TreeEvent::Removed { id, kind, .. } => match kind {
                EntityKind::Channel => {
                    self.channel_queue.remove(id);
                }
                EntityKind::Bot => {
                    self.bot_queue.remove(id);
                }
                _ => {}
            },
            _ => {}
        }
    }

    /// Enabled: join. Disabled: part and disable every packet under it.
    pub fn on_channel_enabled_changed(&mut self, channel: ObjectId, enabled: bool, _now: Instant) {
        let Some(node) = self.tree.get(channel) else {
            return;
        };
        if enabled {
            if self.registered && !node.is_connected() {
                info!(channel = node.name(), "joining");
                self.send(Message::join(node.name()));
            }
            return;
        }

        self.channel_queue.remove(&channel);
        if self.registered && node.is_connected() {
            info!(channel = node.name(), "parting");
            self.send(Message::part(node.name()));
        }
        let packets = self.tree.read().descendant_packets(channel);
        for packet in packets {
            self.set_enabled(packet, false);
        }
    }

    /// Enabled: request if it became the bot's oldest enabled packet.
    /// Disabled: unrequest if it was the bot's current target.
    pub fn on_packet_enabled_changed(&mut self, packet: ObjectId, enabled: bool, now: Instant) {
        let Some(bot) = self.tree.read().bot_of(packet) else {
            return;
        };
        if enabled {
            if self.tree.oldest_enabled_packet(bot) == Some(packet) {
                self.request_from_bot(bot, now);
            }
            return;
        }

        let current = self
            .tree
            .get(bot)
            .and_then(|n| n.as_bot().and_then(|b| b.current));
        if current == Some(packet) {
            self.unrequest_from_bot(bot, now);
        }
    }

    // === IRC session ===

    /// React to one message from the server.
    pub fn handle_message(&mut self, message: &Message, now: Instant) {
        let source = message.source_nickname().map(str::to_string);
        match &message.command {
            Command::PING(server, token) => {
                self.send(Message::new(Command::PONG(server.clone(), token.clone())));
            }
            Command::Response(code, args) => self.handle_response(*code, args, now),
            Command::JOIN(channel, _) => {
                if let Some(who) = source {
                    self.on_join(channel, &who, now);
                }
            }
            Command::PART(channel, _) => {
                if let Some(who) = source {
                    self.on_part(channel, &who, "parted channel");
                }
            }
            Command::KICK(channel, whom, reason) => self.on_kick(channel, whom, reason.as_deref(), now),
            Command::QUIT(_) => {
                if let Some(who) = source {
                    self.on_quit(&who);
                }
            }
            Command::NICK(new) => {
                if let Some(old) = source {
                    self.on_nick(&old, new);
                }
            }
            Command::MODE(target, args) if is_channel(target) => self.on_mode(target, args, now),
            Command::TOPIC(channel, Some(topic)) => self.set_topic(channel, topic),
            Command::ERROR(reason) => info!(server = %self.server, "server error: {}", reason),
            Command::PRIVMSG(..) | Command::NOTICE(..) => {
                let Some(incoming) = Incoming::from_message(message) else {
                    return;
                };
                if let Some(bot) = self.find_bot(&incoming.sender) {
                    self.touch_bot(bot);
                }
                if incoming.kind == MessageKind::Channel {
                    if let Some(event) = self.parser.parse(&incoming) {
                        self.handle_parser_event(event, now);
                    }
                    return;
                }
                match self.parser.parse(&incoming) {
                    Some(event) => self.handle_parser_event(event, now),
                    None => debug!(from = %incoming.sender, text = %incoming.text, "unrecognized message"),
                }
            }
            _ => {}
        }
    }

    fn handle_response(&mut self, code: Response, args: &[String], now: Instant) {
        match code {
            Response::RPL_WELCOME => {
                self.registered = true;
                if let Some(nick) = args.first() {
                    self.nick = nick.clone();
                }
                info!(server = %self.server, nick = %self.nick, "registered");
                self.modify(self.server, |n| {
                    n.set_connected(true);
                });
                self.notify(NotificationKind::ServerConnected, self.server);

                let channels: Vec<String> = {
                    let view = self.tree.read();
                    view.children(self.server)
                        .into_iter()
                        .filter_map(|c| view.get(c))
                        .filter(|n| n.is_enabled())
                        .map(|n| n.name().to_string())
                        .collect()
                };
                for channel in channels {
                    self.send(Message::join(&channel));
                }
            }
            Response::ERR_NICKNAMEINUSE if !self.registered => {
                self.nick.push('_');
                warn!(nick = %self.nick, "nickname in use, retrying");
                self.send(Message::new(Command::NICK(self.nick.clone())));
            }
            Response::RPL_TOPIC => {
                if let [_, channel, topic, ..] = args {
                    self.set_topic(channel, topic);
                }
            }
            Response::RPL_NAMREPLY => {
                if let [_, _, channel, names, ..] = args {
                    self.on_names(channel, names, now);
                }
            }
            Response::RPL_WHOISCHANNELS => {
                if let [_, nick, channels, ..] = args {
                    self.on_whois_channels(nick, channels, now);
                }
            }
            code if code.is_join_failure() => {
                if let Some(channel) = args.get(1) {
                    self.on_join_failed(code, channel, now);
                }
            }
            _ => {}
        }
    }

    fn update_user_count(&mut self, channel: ObjectId, name: &str) {
        let count = self
            .members
            .get(&irc_to_lower(name))
            .map(|m| m.len() as u32)
            .unwrap_or(0);
        self.modify(channel, |n| {
            n.set_user_count(count);
        });
    }

    /// `last_contact` is refreshed at most once a minute.
    fn touch_bot(&self, bot: ObjectId) {
        let now = Utc::now();
        self.modify(bot, |n| {
            let stale = n
                .as_bot()
                .is_some_and(|b| (now - b.last_contact).num_seconds() > CONTACT_GRANULARITY);
            if stale {
                n.set_last_contact(now);
            }
        });
    }

    /// Mark a bot present; it becomes idle unless a transfer is running.
    fn bot_seen(&mut self, bot: ObjectId, message: String, now: Instant) {
        self.modify(bot, |n| {
            n.set_connected(true);
            n.set_last_message(&message);
            if n.as_bot().is_some_and(|b| b.state != BotState::Active) {
                n.set_state(BotState::Idle);
            }
        });
        self.touch_bot(bot);
        self.request_from_bot(bot, now);
    }

    fn bot_gone(&mut self, nick: &str, message: String) {
        if let Some(bot) = self.find_bot(nick) {
            self.modify(bot, |n| {
                n.set_connected(false);
                n.set_last_message(&message);
            });
            self.touch_bot(bot);
        }
    }

    fn on_join(&mut self, channel_name: &str, who: &str, now: Instant) {
        let key = irc_to_lower(channel_name);
        if self.is_self(who) {
            let channel = match self.find_channel(channel_name) {
                Some(id) => id,
                None => match self.tree.ensure_channel(self.server, channel_name) {
                    Ok(id) => id,
                    Err(e) => {
                        error!("cannot track joined channel {}: {}", channel_name, e);
                        return;
                    }
                },
            };
            self.channel_queue.remove(&channel);
            self.modify(channel, |n| {
                n.set_connected(true);
                n.set_error_code(0);
            });
            self.set_enabled(channel, true);
            info!(channel = channel_name, "joined");
            self.notify(NotificationKind::ChannelJoined, channel);
            let members = self.members.entry(key).or_default();
            members.clear();
            members.insert(irc_to_lower(who));
            self.update_user_count(channel, channel_name);
            return;
        }

        let Some(channel) = self.find_channel(channel_name) else {
            return;
        };
        self.members.entry(key).or_default().insert(irc_to_lower(who));
        if let Some(bot) = self.find_bot(who) {
            self.bot_seen(bot, format!("joined channel {channel_name}"), now);
        }
        self.update_user_count(channel, channel_name);
    }

    fn on_part(&mut self, channel_name: &str, who: &str, reason: &str) {
        let Some(channel) = self.find_channel(channel_name) else {
            return;
        };
        let key = irc_to_lower(channel_name);
        if self.is_self(who) {
            self.modify(channel, |n| {
                n.set_connected(false);
                n.set_error_code(0);
            });
            self.members.remove(&key);
            info!(channel = channel_name, "parted");
            self.notify(NotificationKind::ChannelParted, channel);
        } else {
            if let Some(members) = self.members.get_mut(&key) {
                members.remove(&irc_to_lower(who));
            }
            self.bot_gone(who, format!("{reason} {channel_name}"));
        }
        self.update_user_count(channel, channel_name);
    }

    fn on_kick(&mut self, channel_name: &str, whom: &str, reason: Option<&str>, now: Instant) {
        let Some(channel) = self.find_channel(channel_name) else {
            return;
        };
        if !self.is_self(whom) {
            self.on_part(channel_name, whom, "kicked from");
            return;
        }
        self.modify(channel, |n| {
            n.set_connected(false);
        });
        self.members.remove(&irc_to_lower(channel_name));
        warn!(channel = channel_name, reason = reason.unwrap_or(""), "kicked");
        self.notify(NotificationKind::ChannelKicked, channel);
        self.update_user_count(channel, channel_name);
        if self.tree.get(channel).is_some_and(|n| n.is_enabled()) {
            self.queue_channel(channel, self.config.timeouts.command_wait(), now);
        }
    }

    fn on_quit(&mut self, who: &str) {
        let lowered = irc_to_lower(who);
        let affected: Vec<String> = self
            .members
            .iter_mut()
            .filter_map(|(chan, m)| m.remove(&lowered).then(|| chan.clone()))
            .collect();
        self.bot_gone(who, "quit".to_string());
        for channel_name in affected {
            if let Some(channel) = self.find_channel(&channel_name) {
                self.update_user_count(channel, &channel_name);
            }
        }
    }

    fn on_nick(&mut self, old: &str, new: &str) {
        let (old_key, new_key) = (irc_to_lower(old), irc_to_lower(new));
        for members in self.members.values_mut() {
            if members.remove(&old_key) {
                members.insert(new_key.clone());
            }
        }
        if self.is_self(old) {
            self.nick = new.to_string();
            return;
        }
        if let Some(bot) = self.find_bot(old) {
            info!(old, new, "bot renamed");
            self.modify(bot, |n| {
                n.set_name(new);
            });
        }
    }

    /// Ban and unban tracking. Only `b` is interpreted; other modes just
    /// consume their parameters.
    fn on_mode(&mut self, channel_name: &str, args: &[String], now: Instant) {
        let Some(channel) = self.find_channel(channel_name) else {
            return;
        };
        let Some((modes, params)) = args.split_first() else {
            return;
        };
        let mut params = params.iter();
        let mut adding = true;
        for c in modes.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                'b' => {
                    let Some(mask) = params.next() else {
                        continue;
                    };
                    let target = mask.split(['!', '@']).next().unwrap_or(mask);
                    if self.is_self(target) {
                        if adding {
                            warn!(channel = channel_name, "banned");
                            self.modify(channel, |n| {
                                n.set_connected(false);
                            });
                        } else {
                            info!(channel = channel_name, "unbanned, rejoining");
                            self.modify(channel, |n| {
                                n.set_error_code(0);
                            });
                            self.queue_channel(channel, self.config.timeouts.command_wait(), now);
                        }
                    } else if adding {
                        self.bot_gone(target, format!("banned from {channel_name}"));
                    }
                }
                'e' | 'I' | 'k' | 'o' | 'v' | 'h' | 'q' | 'a' => {
                    params.next();
                }
                'l' if adding => {
                    params.next();
                }
                _ => {}
            }
        }
    }

    fn set_topic(&mut self, channel_name: &str, topic: &str) {
        if let Some(channel) = self.find_channel(channel_name) {
            let topic = strip_formatting(topic);
            self.modify(channel, |n| {
                n.set_topic(&topic);
            });
        }
    }

    fn on_names(&mut self, channel_name: &str, names: &str, now: Instant) {
        let Some(channel) = self.find_channel(channel_name) else {
            return;
        };
        let members = self.members.entry(irc_to_lower(channel_name)).or_default();
        let nicks: Vec<String> = names
            .split_whitespace()
            .map(|n| strip_membership(n).to_string())
            .filter(|n| !n.is_empty())
            .collect();
        for nick in &nicks {
            members.insert(irc_to_lower(nick));
        }
        for nick in &nicks {
            if let Some(bot) = self.find_bot(nick) {
                self.bot_seen(bot, format!("joined channel {channel_name}"), now);
            }
        }
        self.update_user_count(channel, channel_name);
    }

    fn on_whois_channels(&mut self, nick: &str, channels: &str, now: Instant) {
        if !self.pending_whois.remove(&irc_to_lower(nick)) {
            return;
        }
        for channel in channels.split_whitespace() {
            let channel = channel.trim_start_matches(['@', '+', '%', '~', '&', '!']);
            if is_channel(channel) && !self.members.contains_key(&irc_to_lower(channel)) {
                info!(bot = nick, channel, "joining bot channel");
                self.send(Message::join(channel));
            }
        }
        if let Some(bot) = self.find_bot(nick) {
            self.requeue_bot(bot, self.config.timeouts.command_wait(), now);
        }
    }

    fn on_join_failed(&mut self, code: Response, channel_name: &str, now: Instant) {
        let Some(channel) = self.find_channel(channel_name) else {
            return;
        };
        self.modify(channel, |n| {
            n.set_error_code(code.code());
            n.set_connected(false);
        });
        self.notify(NotificationKind::ChannelJoinFailed, channel);
        match policy::join_retry_wait(code, &self.config.timeouts) {
            Some(wait) => {
                warn!(channel = channel_name, ?code, ?wait, "join refused, retrying later");
                self.queue_channel(channel, wait, now);
            }
            None => warn!(channel = channel_name, ?code, "join refused"),
        }
    }

    // === Parser events ===

    /// Act on one classified bot message.
    pub fn handle_parser_event(&mut self, event: ParserEvent, now: Instant) {
        match event {
            ParserEvent::JoinChannel { channel } => {
                info!(channel = %channel, "bot requires channel");
                self.send(Message::join(&channel));
            }
            ParserEvent::JoinChannelsFromBot { bot } => {
                self.pending_whois.insert(irc_to_lower(&bot));
                self.send(Message::new(Command::WHOIS(bot)));
            }
            ParserEvent::QueueRequest { bot, wait } => {
                let Some(id) = self.find_bot(&bot) else {
                    return;
                };
                self.modify(id, |n| {
                    if n.as_bot().is_some_and(|b| b.state != BotState::Active) {
                        n.set_state(BotState::Idle);
                    }
                });
                let wait = wait.unwrap_or_else(|| self.config.timeouts.bot_wait());
                self.requeue_bot(id, wait, now);
            }
            ParserEvent::UnRequest { bot } => {
                let Some(id) = self.find_bot(&bot) else {
                    return;
                };
                self.modify(id, |n| {
                    n.set_current(None);
                    n.set_queue(0, 0);
                    if n.as_bot().is_some_and(|b| b.state != BotState::Active) {
                        n.set_state(BotState::Idle);
                    }
                });
                self.requeue_bot(id, self.config.timeouts.command_wait(), now);
            }
            ParserEvent::SendPrivateMessage { bot, text } => {
                self.send(Message::privmsg(&bot, &text));
            }
            ParserEvent::SendData { message } => self.send(message),
            ParserEvent::BotStatus {
                bot,
                state,
                message,
                queue_position,
                queue_time,
            } => {
                let Some(id) = self.find_bot(&bot) else {
                    return;
                };
                self.modify(id, |n| {
                    n.set_last_message(&message);
                    if let Some(state) = state {
                        if n.as_bot().is_some_and(|b| b.state != BotState::Active) {
                            n.set_state(state);
                        }
                    }
                    if let Some(position) = queue_position {
                        n.set_queue(position, queue_time.unwrap_or(0));
                    }
                });
            }
            ParserEvent::PacketInvalid { bot, message } => {
                let Some(id) = self.find_bot(&bot) else {
                    return;
                };
                let current = self.tree.get(id).and_then(|n| n.as_bot().and_then(|b| b.current));
                warn!(bot = %bot, "{}", message);
                self.modify(id, |n| {
                    n.set_last_message(&message);
                    n.set_current(None);
                    n.set_state(BotState::Idle);
                });
                if let Some(packet) = current {
                    self.set_enabled(packet, false);
                }
                self.requeue_bot(id, self.config.timeouts.command_wait(), now);
            }
            ParserEvent::PacketAnnounced {
                bot,
                channel,
                id,
                size,
                name,
            } => self.on_announcement(&bot, &channel, id, size, &name),
            ParserEvent::DccSend(offer) => self.on_dcc_send(offer, now),
            ParserEvent::DccAccept {
                bot,
                file_name,
                port,
                position,
            } => self.on_dcc_accept(&bot, &file_name, port, position, now),
        }
    }

    fn on_announcement(&mut self, bot_name: &str, channel_name: &str, number: u32, size: u64, name: &str) {
        let Some(channel) = self.find_channel(channel_name) else {
            return;
        };
        let bot = match self.tree.ensure_bot(channel, bot_name) {
            Ok(bot) => bot,
            Err(e) => {
                error!("cannot track bot {}: {}", bot_name, e);
                return;
            }
        };
        self.modify(bot, |n| {
            n.set_connected(true);
        });

        let existing = self.tree.read().find_packet(bot, number);
        let now = Utc::now();
        match existing {
            Some(packet) => self.modify(packet, |n| {
                n.set_name(name);
                n.set_size(size);
                n.set_last_mentioned(now);
            }),
            None => {
                let wanted = self.config.is_wanted(name);
                match self.tree.add_child(Some(bot), Node::packet(number, name, size)) {
                    Ok(packet) => {
                        debug!(bot = bot_name, packet = number, name, "packet discovered");
                        if wanted {
                            info!(name, "wanted packet announced, enabling");
                            self.set_enabled(packet, true);
                        }
                    }
                    Err(e) => error!("cannot track packet {}: {}", name, e),
                }
            }
        }
    }

    fn on_dcc_send(&mut self, offer: DccOffer, now: Instant) {
        let Some(bot) = self.find_bot(&offer.bot) else {
            warn!(bot = %offer.bot, file = %offer.file_name, "DCC offer from unknown user ignored");
            return;
        };
        if offer.port == 0 {
            warn!(bot = %offer.bot, file = %offer.file_name, "passive DCC is not supported");
            return;
        }
        let current = self.tree.get(bot).and_then(|n| n.as_bot().and_then(|b| b.current));
        let Some(packet) = current.or_else(|| self.tree.oldest_enabled_packet(bot)) else {
            warn!(bot = %offer.bot, file = %offer.file_name, "unexpected DCC offer");
            return;
        };
        let announced = self
            .tree
            .get(packet)
            .and_then(|n| n.as_packet().map(|p| p.size))
            .unwrap_or(0);
        let size = if offer.size > 0 { offer.size } else { announced };
        self.modify(packet, |n| {
            n.set_real_name(&offer.file_name);
            n.set_real_size(size);
        });

        let addr = SocketAddr::new(offer.addr, offer.port);
        match self.allocator.next_available_chunk(&offer.file_name, size) {
            None => {
                warn!(bot = %offer.bot, file = %offer.file_name, "no free range for offer, disabling packet");
                self.set_enabled(packet, false);
                self.notify(NotificationKind::PacketConflict, packet);
                self.unrequest_from_bot(bot, now);
            }
            Some(0) => self.start_download(DownloadRequest {
                server: self.server,
                bot,
                packet,
                file_name: offer.file_name,
                size,
                offset: 0,
                addr,
            }),
            Some(offset) => {
                info!(file = %offer.file_name, offset, "resuming");
                let body = format!(
                    "DCC RESUME {} {} {}",
                    quote_file_name(&offer.file_name),
                    offer.port,
                    offset
                );
                self.send(Message::ctcp_request(&offer.bot, &body));
                self.pending_resumes.insert(
                    (irc_to_lower(&offer.bot), offer.port),
                    PendingResume {
                        packet,
                        bot,
                        file_name: offer.file_name,
                        size,
                        offset,
                        addr,
                    },
                );
            }
        }
    }

    fn on_dcc_accept(&mut self, bot_name: &str, file_name: &str, port: u16, position: u64, now: Instant) {
        let Some(pending) = self.pending_resumes.remove(&(irc_to_lower(bot_name), port)) else {
            warn!(bot = bot_name, file = file_name, port, "DCC ACCEPT without a pending resume");
            return;
        };
        if position != pending.offset {
            warn!(
                bot = bot_name,
                expected = pending.offset,
                position,
                "bot resumes at a different position, dropping offer"
            );
            self.requeue_bot(pending.bot, self.config.timeouts.command_wait(), now);
            return;
        }
        self.start_download(DownloadRequest {
            server: self.server,
            bot: pending.bot,
            packet: pending.packet,
            file_name: pending.file_name,
            size: pending.size,
            offset: pending.offset,
            addr: pending.addr,
        });
    }

    fn start_download(&mut self, request: DownloadRequest) {
        info!(file = %request.file_name, offset = request.offset, peer = %request.addr, "starting download");
        self.modify(request.bot, |n| {
            n.set_state(BotState::Active);
            n.set_queue(0, 0);
        });
        self.modify(request.packet, |n| {
            n.set_connected(true);
        });
        let packet = request.packet;
        self.actions.push(Action::StartDownload(request));
        self.notify(NotificationKind::DownloadStarted, packet);
    }
}

fn deadline(now: Instant, wait: Duration, fallback: Duration) -> Instant {
    now.checked_add(wait)
        .or_else(|| {
            warn!(?wait, ?fallback, "wait out of range, using fallback");
            now.checked_add(fallback)
        })
        .unwrap_or(now)
}

fn quote_file_name(name: &str) -> String {
    if name.contains(' ') {
        format!("\"{name}\"")
    } else {
        name.to_string()
    }
}
