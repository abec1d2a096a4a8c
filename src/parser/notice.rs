use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};

use super::{compile, Incoming, MessageKind, ParserEvent, Rule};
use crate::domain::BotState;

type Build = dyn Fn(&Incoming, &Captures<'_>) -> Option<ParserEvent> + Send + Sync;

/// A named set of case-insensitive patterns sharing one event builder.
///
/// Applies to notices and queries; channel chatter never carries bot status.
pub struct PhraseRule {
    name: String,
    patterns: Vec<Regex>,
    build: Box<Build>,
}

impl PhraseRule {
    /// Compile `patterns` (matched case-insensitively).
    pub fn new<F>(name: &str, patterns: &[&str], build: F) -> Result<Self, regex::Error>
    where
        F: Fn(&Incoming, &Captures<'_>) -> Option<ParserEvent> + Send + Sync + 'static,
    {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")))
            .collect::<Result<_, _>>()?;
        Ok(PhraseRule {
            name: name.to_string(),
            patterns,
            build: Box::new(build),
        })
    }

    fn builtin<F>(name: &str, patterns: &[&str], build: F) -> Self
    where
        F: Fn(&Incoming, &Captures<'_>) -> Option<ParserEvent> + Send + Sync + 'static,
    {
        let patterns: Vec<String> = patterns.iter().map(|p| format!("(?i){p}")).collect();
        let refs: Vec<&str> = patterns.iter().map(String::as_str).collect();
        PhraseRule {
            name: name.to_string(),
            patterns: compile(&refs),
            build: Box::new(build),
        }
    }
}

impl Rule for PhraseRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse(&self, incoming: &Incoming) -> Option<ParserEvent> {
        if !matches!(incoming.kind, MessageKind::Notice | MessageKind::Query) {
            return None;
        }
        let caps = self.patterns.iter().find_map(|re| re.captures(&incoming.text))?;
        (self.build)(incoming, &caps)
    }
}

/// The default vocabulary of iroffer-style bot replies.
pub struct StatusRule {
    phrases: Vec<PhraseRule>,
}

fn status(incoming: &Incoming, state: Option<BotState>) -> ParserEvent {
    ParserEvent::BotStatus {
        bot: incoming.sender.clone(),
        state,
        message: incoming.text.clone(),
        queue_position: None,
        queue_time: None,
    }
}

/// Longest refusal wait a bot can ask for.
pub const MAX_SUGGESTED_WAIT: Duration = Duration::from_secs(24 * 3600);

static SUGGESTED_WAIT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:try again|retry) in (\d+)\s*(s|sec|secs|seconds?|m|min|mins|minutes?)\b").ok()
});

static REMAINING_TIME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)h\s*(\d+)m\s+or less remaining").ok());

/// `try again in 5 min` style hints, capped at [`MAX_SUGGESTED_WAIT`].
fn suggested_wait(text: &str) -> Option<Duration> {
    let caps = SUGGESTED_WAIT.as_ref()?.captures(text)?;
    // Digit runs too long for u64 are as good as forever.
    let n: u64 = caps[1].parse().unwrap_or(u64::MAX);
    let unit = if caps[2].to_ascii_lowercase().starts_with('m') {
        60
    } else {
        1
    };
    let secs = n.saturating_mul(unit);
    Some(Duration::from_secs(secs).min(MAX_SUGGESTED_WAIT))
}

/// `1h30m or less remaining` style estimates, in seconds. Estimates that
/// do not fit are dropped.
fn remaining_time(text: &str) -> Option<u32> {
    let caps = REMAINING_TIME.as_ref()?.captures(text)?;
    let h: u32 = caps[1].parse().ok()?;
    let m: u32 = caps[2].parse().ok()?;
    h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)
}

impl StatusRule {
    pub fn new() -> Self {
        let phrases = vec![
            PhraseRule::builtin(
                "known-channel",
                &[
                    r"you (?:must|need to) be (?:on|in) a known channel",
                    r"you must be (?:on|in) (?:one of )?(?:my|the bot's) channels?",
                ],
                |i, _| {
                    Some(ParserEvent::JoinChannelsFromBot {
                        bot: i.sender.clone(),
                    })
                },
            ),
            PhraseRule::builtin(
                "must-join",
                &[
                    r"you must (?:join|be (?:on|in))\s+(#?[^\s,.:]+)",
                    r"please join\s+(#[^\s,.:]+)",
                ],
                |_, caps| {
                    let name = &caps[1];
                    let channel = if name.starts_with('#') {
                        name.to_string()
                    } else {
                        format!("#{name}")
                    };
                    Some(ParserEvent::JoinChannel { channel })
                },
            ),
            PhraseRule::builtin(
                "queued",
                &[
                    r"added you to the (?:main |idle )?queue.*?position\s*#?(\d+)",
                    r"queued\s+\d+h\d+m\s+for\s+.*?in position\s+(\d+)",
                    r"you are already (?:in|queued).*?position\s*#?(\d+)",
                ],
                |i, caps| {
                    Some(ParserEvent::BotStatus {
                        bot: i.sender.clone(),
                        state: Some(BotState::Queued),
                        message: i.text.clone(),
                        queue_position: caps[1].parse().ok(),
                        queue_time: remaining_time(&i.text),
                    })
                },
            ),
            PhraseRule::builtin(
                "sending",
                &[r"sending you (?:pack|file)"],
                |i, _| Some(status(i, Some(BotState::Waiting))),
            ),
            PhraseRule::builtin(
                "refused",
                &[
                    r"all\s+(?:\d+\s+)?slots\s+(?:are\s+)?(?:full|occupied|in use)",
                    r"queue\s+(?:for\s+\S+\s+)?is\s+(?:full|closed)",
                    r"you (?:already )?have (?:a|\d+) (?:transfers?|packs?) (?:in progress|queued)",
                    r"you can only (?:have|be queued for) \d+",
                ],
                |i, _| {
                    Some(ParserEvent::QueueRequest {
                        bot: i.sender.clone(),
                        wait: suggested_wait(&i.text),
                    })
                },
            ),
            PhraseRule::builtin(
                "dcc-timeout",
                &[
                    r"dcc (?:pending )?timeout",
                    r"(?:transfer|dcc|connection) timed out",
                ],
                |i, _| {
                    Some(ParserEvent::QueueRequest {
                        bot: i.sender.clone(),
                        wait: None,
                    })
                },
            ),
            PhraseRule::builtin(
                "invalid-pack",
                &[
                    r"invalid pack number",
                    r"pack(?: number)? .*?not found",
                    r"no such pack",
                ],
                |i, _| {
                    Some(ParserEvent::PacketInvalid {
                        bot: i.sender.clone(),
                        message: i.text.clone(),
                    })
                },
            ),
            PhraseRule::builtin(
                "removed",
                &[
                    r"removed you from the (?:main |idle )?queue",
                    r"you have been removed from",
                    r"you don'?t appear to be in a queue",
                ],
                |i, _| {
                    Some(ParserEvent::UnRequest {
                        bot: i.sender.clone(),
                    })
                },
            ),
            PhraseRule::builtin(
                "completed",
                &[r"transfer completed", r"xdcc send completed"],
                |i, _| Some(status(i, None)),
            ),
        ];
        StatusRule { phrases }
    }

    #[cfg(test)]
    fn compiled(&self) -> usize {
        self.phrases.iter().map(|p| p.patterns.len()).sum()
    }
}

impl Default for StatusRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for StatusRule {
    fn name(&self) -> &str {
        "status"
    }

    fn parse(&self, incoming: &Incoming) -> Option<ParserEvent> {
        self.phrases.iter().find_map(|p| p.parse(incoming))
    }
}
