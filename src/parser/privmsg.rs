use regex::Regex;

use super::{compile, Incoming, MessageKind, ParserEvent, Rule};
use crate::util::parse_size;

/// Channel listing lines: `#<id> <gets>x [<size>] <name>`.
pub struct AnnouncementRule {
    patterns: Vec<Regex>,
}

impl AnnouncementRule {
    pub fn new() -> Self {
        AnnouncementRule {
            patterns: compile(&[
                r"^#(\d+)\s+\d+x\s+\[\s*(<?\s*[\d.,]+\s*[KMGTkmgt]?[Bb]?)\s*\]\s+(.+?)\s*$",
            ]),
        }
    }
}

impl Default for AnnouncementRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for AnnouncementRule {
    fn name(&self) -> &str {
        "announcement"
    }

    fn parse(&self, incoming: &Incoming) -> Option<ParserEvent> {
        if incoming.kind != MessageKind::Channel {
            return None;
        }
        let caps = self.patterns.iter().find_map(|re| re.captures(&incoming.text))?;
        let id = caps[1].parse().ok()?;
        let size = parse_size(&caps[2].replace(',', "."))?;
        Some(ParserEvent::PacketAnnounced {
            bot: incoming.sender.clone(),
            channel: incoming.target.clone(),
            id,
            size,
            name: caps[3].to_string(),
        })
    }
}
