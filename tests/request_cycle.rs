//! Request, retry and transfer hand-off behavior of the connection manager,
//! driven without any network.

mod common;

use std::time::{Duration, Instant};

use common::{joins, privmsgs, Fixture};
use slirc_xdcc::policy::join_retry_wait;
use slirc_xdcc::{
    Action, BotState, Command, Config, DownloadRequest, Message, NotificationKind, Response,
};

fn notified(actions: &[Action], kind: NotificationKind) -> bool {
    actions
        .iter()
        .any(|a| matches!(a, Action::Notify(n) if n.kind == kind))
}

fn downloads(actions: &[Action]) -> Vec<DownloadRequest> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::StartDownload(request) => Some(request.clone()),
            _ => None,
        })
        .collect()
}

fn bot_state(f: &Fixture) -> BotState {
    f.tree.get(f.bot).unwrap().as_bot().unwrap().state
}

#[test]
fn test_conflicting_packet_is_skipped_in_same_cycle() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let p1 = f.packet(1, "first.bin", true);
    let p2 = f.packet(2, "second.bin", true);
    f.allocator.answer("first.bin", None);

    f.conn.request_from_bot(f.bot, now);
    let actions = f.conn.drain();

    assert!(!f.tree.get(p1).unwrap().is_enabled());
    assert!(f.tree.get(p2).unwrap().is_enabled());
    assert_eq!(privmsgs(&actions, "Bot"), vec!["XDCC SEND 2".to_string()]);
    assert!(notified(&actions, NotificationKind::PacketConflict));
    assert!(notified(&actions, NotificationKind::PacketRequested));
    assert_eq!(f.tree.get(f.bot).unwrap().as_bot().unwrap().current, Some(p2));
    assert_eq!(f.conn.bot_deadline(f.bot), Some(now + Duration::from_secs(240)));
}

#[test]
fn test_request_only_from_idle_bot() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.packet(1, "a.bin", true);

    for state in [BotState::Waiting, BotState::Queued, BotState::Active] {
        f.tree.modify(f.bot, |n| n.set_state(state)).unwrap();
        f.conn.request_from_bot(f.bot, now);
        assert!(f.conn.drain().is_empty(), "{state:?} bot was asked");
        assert_eq!(f.conn.bot_deadline(f.bot), None);
    }

    f.tree.modify(f.bot, |n| n.set_state(BotState::Idle)).unwrap();
    f.conn.request_from_bot(f.bot, now);
    assert_eq!(privmsgs(&f.conn.drain(), "Bot"), vec!["XDCC SEND 1".to_string()]);
}

#[test]
fn test_same_file_name_is_suppressed_across_bots() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.packet(1, "Show.S01E01.mkv", true);
    let other = f.tree.ensure_bot(f.channel, "Other").unwrap();
    f.tree
        .add_child(
            Some(other),
            slirc_xdcc::Node::packet(7, "show s01e01 mkv", 1024).enabled(true),
        )
        .unwrap();

    f.conn.request_from_bot(f.bot, now);
    assert_eq!(privmsgs(&f.conn.drain(), "Bot").len(), 1);
    assert_eq!(
        f.conn.suppressed_until("SHOW_S01E01.MKV"),
        Some(now + Duration::from_secs(10))
    );

    let later = now + Duration::from_secs(1);
    f.conn.request_from_bot(other, later);
    assert!(privmsgs(&f.conn.drain(), "Other").is_empty());
    assert_eq!(f.conn.bot_deadline(other), Some(now + Duration::from_secs(10)));

    f.conn.tick(now + Duration::from_secs(9));
    assert!(f.conn.drain().is_empty());

    f.conn.tick(now + Duration::from_secs(10));
    let actions = f.conn.drain();
    assert_eq!(privmsgs(&actions, "Other"), vec!["XDCC SEND 7".to_string()]);
    assert!(privmsgs(&actions, "Bot").is_empty());
}

#[test]
fn test_long_join_failure_schedules_one_retry() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let wait = join_retry_wait(Response::ERR_BANNEDFROMCHAN, &Config::default().timeouts).unwrap();

    f.line(":irc.example.net 474 slirc-xdcc #xdcc :Cannot join channel (+b)", now);
    let actions = f.conn.drain();
    assert!(notified(&actions, NotificationKind::ChannelJoinFailed));
    assert_eq!(f.conn.channel_deadline(f.channel), Some(now + wait));

    // A repeated refusal does not push the retry out.
    f.line(
        ":irc.example.net 474 slirc-xdcc #xdcc :Cannot join channel (+b)",
        now + Duration::from_secs(5),
    );
    f.conn.drain();
    assert_eq!(f.conn.channel_deadline(f.channel), Some(now + wait));

    let code = |f: &Fixture| f.tree.get(f.channel).unwrap().as_channel().unwrap().error_code;
    assert_eq!(code(&f), 474);

    f.conn.tick(now + wait - Duration::from_secs(1));
    assert!(joins(&f.conn.drain()).is_empty());

    f.conn.tick(now + wait);
    assert_eq!(joins(&f.conn.drain()), vec!["#xdcc".to_string()]);
    assert_eq!(f.conn.channel_deadline(f.channel), None);
    assert_eq!(code(&f), 474);

    f.conn.tick(now + wait + Duration::from_secs(60));
    assert!(joins(&f.conn.drain()).is_empty());

    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now + wait);
    assert_eq!(code(&f), 0);
    assert!(f.tree.get(f.channel).unwrap().is_connected());
}

#[test]
fn test_unclassified_join_failure_is_not_retried() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);

    f.line(":irc.example.net 475 slirc-xdcc #xdcc :Cannot join channel (+k)", now);
    assert!(notified(&f.conn.drain(), NotificationKind::ChannelJoinFailed));
    assert_eq!(f.conn.channel_deadline(f.channel), None);
    assert_eq!(
        f.tree.get(f.channel).unwrap().as_channel().unwrap().error_code,
        475
    );
}

#[test]
fn test_channel_enable_round_trip() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    let disabled = f.packet(1, "old.bin", false);
    f.tree.modify(f.bot, |n| n.set_state(BotState::Queued)).unwrap();
    f.conn.drain();

    let mut sub = f.tree.subscribe();
    f.tree.set_enabled(f.channel, false).unwrap();
    f.pump(&mut sub, now);
    let actions = f.conn.drain();
    assert!(actions.contains(&Action::Send(Message::part("#xdcc"))));

    f.line(":slirc-xdcc!xdcc@host PART #xdcc", now);
    f.tree.set_enabled(f.channel, true).unwrap();
    f.pump(&mut sub, now);
    let actions = f.conn.drain();
    assert_eq!(joins(&actions), vec!["#xdcc".to_string()]);

    assert!(!f.tree.get(disabled).unwrap().is_enabled());
    assert_eq!(bot_state(&f), BotState::Queued);
}

#[test]
fn test_bot_join_triggers_request() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    f.packet(1, "a.bin", true);
    f.conn.drain();

    f.line(":Bot!bot@host JOIN #xdcc", now);
    let actions = f.conn.drain();
    assert_eq!(privmsgs(&actions, "Bot"), vec!["XDCC SEND 1".to_string()]);

    let bot = f.tree.get(f.bot).unwrap();
    assert!(bot.is_connected());
    assert_eq!(bot.as_bot().unwrap().last_message, "joined channel #xdcc");
    assert_eq!(
        f.tree.get(f.channel).unwrap().as_channel().unwrap().user_count,
        2
    );
}

#[test]
fn test_names_reply_marks_bots_and_requests() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    f.packet(3, "c.bin", true);
    f.conn.drain();

    f.line(
        ":irc.example.net 353 slirc-xdcc = #xdcc :@Bot +voiced slirc-xdcc",
        now,
    );
    let actions = f.conn.drain();
    assert_eq!(privmsgs(&actions, "Bot"), vec!["XDCC SEND 3".to_string()]);
    assert!(f.tree.get(f.bot).unwrap().is_connected());
    assert_eq!(
        f.tree.get(f.channel).unwrap().as_channel().unwrap().user_count,
        3
    );
}

#[test]
fn test_bot_leaving_is_recorded() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    f.line(":Bot!bot@host JOIN #xdcc", now);

    f.line(":Bot!bot@host PART #xdcc :later", now);
    let bot = f.tree.get(f.bot).unwrap();
    assert!(!bot.is_connected());
    assert_eq!(bot.as_bot().unwrap().last_message, "parted channel #xdcc");

    f.line(":Bot!bot@host JOIN #xdcc", now);
    f.line(":Bot!bot@host QUIT :Ping timeout", now);
    let bot = f.tree.get(f.bot).unwrap();
    assert!(!bot.is_connected());
    assert_eq!(bot.as_bot().unwrap().last_message, "quit");
}

#[test]
fn test_disabling_current_packet_unrequests() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let p = f.packet(1, "a.bin", true);
    f.conn.request_from_bot(f.bot, now);
    f.conn.drain();

    let mut sub = f.tree.subscribe();
    f.tree.set_enabled(p, false).unwrap();
    f.pump(&mut sub, now);
    let actions = f.conn.drain();

    assert_eq!(privmsgs(&actions, "Bot"), vec!["XDCC REMOVE".to_string()]);
    assert!(notified(&actions, NotificationKind::PacketRemoved));
    assert_eq!(f.tree.get(f.bot).unwrap().as_bot().unwrap().current, None);
}

#[test]
fn test_enabling_oldest_packet_requests() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let p = f.packet(4, "d.bin", false);

    let mut sub = f.tree.subscribe();
    f.tree.set_enabled(p, true).unwrap();
    f.pump(&mut sub, now);
    assert_eq!(privmsgs(&f.conn.drain(), "Bot"), vec!["XDCC SEND 4".to_string()]);
}

#[test]
fn test_announcements_discover_packets() {
    let now = Instant::now();
    let mut config = Config::default();
    config.wanted = vec!["ubuntu".to_string()];
    let mut f = Fixture::with_config(config);
    f.register(now);
    let mut sub = f.tree.subscribe();

    f.line(":Bot!bot@host PRIVMSG #xdcc :#5 12x [1.4G] ubuntu-24.04.iso", now);
    f.line(":Bot!bot@host PRIVMSG #xdcc :#6 1x [1M] other.txt", now);

    let (wanted, other) = {
        let view = f.tree.read();
        (view.find_packet(f.bot, 5).unwrap(), view.find_packet(f.bot, 6).unwrap())
    };
    assert!(f.tree.get(wanted).unwrap().is_enabled());
    assert!(!f.tree.get(other).unwrap().is_enabled());

    f.pump(&mut sub, now);
    assert_eq!(privmsgs(&f.conn.drain(), "Bot"), vec!["XDCC SEND 5".to_string()]);

    f.line(":Bot!bot@host PRIVMSG #xdcc :#5 13x [1.4G] ubuntu-24.04.1.iso", now);
    assert_eq!(f.tree.read().children(f.bot).len(), 2);
    assert_eq!(f.tree.get(wanted).unwrap().name(), "ubuntu-24.04.1.iso");
}

#[test]
fn test_dcc_offer_starts_download() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let p = f.packet(1, "a.bin", true);
    f.conn.request_from_bot(f.bot, now);
    f.conn.drain();

    f.line(
        ":Bot!bot@host PRIVMSG slirc-xdcc :\x01DCC SEND a.bin 2130706433 5000 1024\x01",
        now,
    );
    let actions = f.conn.drain();
    let started = downloads(&actions);
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].packet, p);
    assert_eq!(started[0].offset, 0);
    assert_eq!(started[0].size, 1024);
    assert_eq!(started[0].addr, "127.0.0.1:5000".parse().unwrap());
    assert!(notified(&actions, NotificationKind::DownloadStarted));

    assert_eq!(bot_state(&f), BotState::Active);
    let packet = f.tree.get(p).unwrap();
    assert!(packet.is_connected());
    assert_eq!(packet.as_packet().unwrap().real_name, "a.bin");
}

#[test]
fn test_dcc_resume_waits_for_accept() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let p = f.packet(1, "a.bin", true);
    f.allocator.answer("a.bin", Some(512));
    f.conn.request_from_bot(f.bot, now);
    f.conn.drain();

    f.line(
        ":Bot!bot@host PRIVMSG slirc-xdcc :\x01DCC SEND a.bin 2130706433 5000 1024\x01",
        now,
    );
    let actions = f.conn.drain();
    assert!(downloads(&actions).is_empty());
    assert_eq!(
        privmsgs(&actions, "Bot"),
        vec!["\x01DCC RESUME a.bin 5000 512\x01".to_string()]
    );

    f.line(
        ":Bot!bot@host PRIVMSG slirc-xdcc :\x01DCC ACCEPT a.bin 5000 512\x01",
        now,
    );
    let started = downloads(&f.conn.drain());
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].packet, p);
    assert_eq!(started[0].offset, 512);
    assert_eq!(started[0].budget(), 512);
}

#[test]
fn test_offer_without_free_range_disables_packet() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let p = f.packet(1, "a.bin", true);
    f.conn.request_from_bot(f.bot, now);
    f.conn.drain();
    f.allocator.answer("a.bin", None);

    f.line(
        ":Bot!bot@host PRIVMSG slirc-xdcc :\x01DCC SEND a.bin 2130706433 5000 1024\x01",
        now,
    );
    let actions = f.conn.drain();
    assert!(downloads(&actions).is_empty());
    assert!(!f.tree.get(p).unwrap().is_enabled());
    assert!(notified(&actions, NotificationKind::PacketConflict));
    assert_eq!(privmsgs(&actions, "Bot"), vec!["XDCC REMOVE".to_string()]);
}

#[test]
fn test_kick_schedules_rejoin() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    f.conn.drain();

    f.line(":op!op@host KICK #xdcc slirc-xdcc :no leeching", now);
    assert!(notified(&f.conn.drain(), NotificationKind::ChannelKicked));
    assert!(!f.tree.get(f.channel).unwrap().is_connected());
    assert_eq!(
        f.conn.channel_deadline(f.channel),
        Some(now + Duration::from_secs(15))
    );

    f.conn.tick(now + Duration::from_secs(15));
    assert_eq!(joins(&f.conn.drain()), vec!["#xdcc".to_string()]);
}

#[test]
fn test_ban_and_unban() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    f.line(":Bot!bot@host JOIN #xdcc", now);
    f.conn.drain();

    f.line(":op!op@host MODE #xdcc +b Bot!*@*", now);
    let bot = f.tree.get(f.bot).unwrap();
    assert!(!bot.is_connected());
    assert_eq!(bot.as_bot().unwrap().last_message, "banned from #xdcc");

    f.line(":op!op@host MODE #xdcc +b slirc-xdcc!*@*", now);
    assert!(!f.tree.get(f.channel).unwrap().is_connected());

    f.tree.modify(f.channel, |n| n.set_error_code(474)).unwrap();
    f.line(":op!op@host MODE #xdcc -b slirc-xdcc!*@*", now);
    assert_eq!(
        f.tree.get(f.channel).unwrap().as_channel().unwrap().error_code,
        0
    );
    assert_eq!(
        f.conn.channel_deadline(f.channel),
        Some(now + Duration::from_secs(15))
    );
}

#[test]
fn test_queue_refusal_uses_suggested_wait() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.tree.modify(f.bot, |n| n.set_state(BotState::Waiting)).unwrap();

    f.line(
        ":Bot!bot@host NOTICE slirc-xdcc :** All 4 Slots full and queue for this pack is full, try again in 5 min",
        now,
    );
    assert_eq!(bot_state(&f), BotState::Idle);
    assert_eq!(
        f.conn.bot_deadline(f.bot),
        Some(now + Duration::from_secs(300))
    );
}

#[test]
fn test_absurd_refusal_wait_is_capped() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.tree.modify(f.bot, |n| n.set_state(BotState::Waiting)).unwrap();

    f.line(
        ":Bot!b@h NOTICE slirc-xdcc :** All Slots Full, try again in 200000000000000000 min",
        now,
    );
    assert_eq!(bot_state(&f), BotState::Idle);
    assert_eq!(
        f.conn.bot_deadline(f.bot),
        Some(now + slirc_xdcc::parser::MAX_SUGGESTED_WAIT)
    );

    f.line(
        ":Bot!b@h NOTICE slirc-xdcc :Queued 0h1m for \"x\", in position 2 of 5. 9999999h30m or less remaining.",
        now,
    );
    let bot = f.tree.get(f.bot).unwrap();
    assert_eq!(bot.as_bot().unwrap().queue_position, 2);
}

#[test]
fn test_queue_position_is_recorded() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);

    f.line(
        ":Bot!bot@host NOTICE slirc-xdcc :** All Slots Full, Added you to the main queue for pack 5 (\"x\") in position 3.",
        now,
    );
    let bot = f.tree.get(f.bot).unwrap();
    let data = bot.as_bot().unwrap();
    assert_eq!(data.state, BotState::Queued);
    assert_eq!(data.queue_position, 3);
}

#[test]
fn test_invalid_pack_disables_current() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    let p = f.packet(99, "gone.bin", true);
    f.conn.request_from_bot(f.bot, now);
    f.conn.drain();

    f.line(":Bot!bot@host NOTICE slirc-xdcc :** Invalid Pack Number, Try Again", now);
    assert!(!f.tree.get(p).unwrap().is_enabled());
    assert_eq!(f.tree.get(f.bot).unwrap().as_bot().unwrap().current, None);
    assert_eq!(bot_state(&f), BotState::Idle);
}

#[test]
fn test_known_channel_refusal_joins_bot_channels() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    f.conn.drain();

    f.line(
        ":Bot!bot@host NOTICE slirc-xdcc :XDCC SEND denied, you must be on a known channel to request a pack",
        now,
    );
    assert_eq!(
        f.conn.drain(),
        vec![Action::Send(Message::new(Command::WHOIS("Bot".into())))]
    );

    f.line(":irc.example.net 319 slirc-xdcc Bot :@#bots #xdcc", now);
    assert_eq!(joins(&f.conn.drain()), vec!["#bots".to_string()]);
    assert_eq!(
        f.conn.bot_deadline(f.bot),
        Some(now + Duration::from_secs(15))
    );

    // Replies nobody asked for are ignored.
    f.line(":irc.example.net 319 slirc-xdcc Bot :#elsewhere", now);
    assert!(f.conn.drain().is_empty());
}

#[test]
fn test_must_join_directive() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);

    f.line(
        ":Bot!bot@host NOTICE slirc-xdcc :** Closing Connection You Must JOIN MG-CHAT As Well To Download",
        now,
    );
    assert_eq!(joins(&f.conn.drain()), vec!["#MG-CHAT".to_string()]);
}

#[test]
fn test_disconnect_marks_everything_offline() {
    let now = Instant::now();
    let mut f = Fixture::new();
    f.register(now);
    f.line(":slirc-xdcc!xdcc@host JOIN #xdcc", now);
    assert!(f.tree.get(f.server).unwrap().is_connected());

    f.conn.disconnected();
    assert!(!f.conn.is_registered());
    assert!(!f.tree.get(f.server).unwrap().is_connected());
    assert!(!f.tree.get(f.channel).unwrap().is_connected());

    // Offline requests are scheduled but not sent.
    f.packet(1, "a.bin", true);
    f.conn.request_from_bot(f.bot, now);
    assert!(f.conn.drain().is_empty());
    assert!(f.conn.bot_deadline(f.bot).is_some());
}
