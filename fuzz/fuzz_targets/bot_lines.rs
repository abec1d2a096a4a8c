//! Fuzz target for bot line classification, bypassing the wire parser.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slirc_xdcc::{Incoming, MessageKind, Parser};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let kind = match selector % 5 {
        0 => MessageKind::Query,
        1 => MessageKind::Channel,
        2 => MessageKind::Notice,
        3 => MessageKind::CtcpRequest,
        _ => MessageKind::CtcpReply,
    };
    let text = String::from_utf8_lossy(rest);
    let incoming = Incoming::new(kind, "Bot", "#xdcc", &text);
    let _ = Parser::default().parse(&incoming);
});
