//! Fuzz target for the wire parser and message classification.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slirc_xdcc::{Incoming, Message, Parser};
use std::str;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = str::from_utf8(data) {
        if input.is_empty() || input.len() > 512 {
            return;
        }

        if let Ok(message) = input.parse::<Message>() {
            let _ = message.to_string();
            if let Some(incoming) = Incoming::from_message(&message) {
                let _ = Parser::default().parse(&incoming);
            }
        }
    }
});
