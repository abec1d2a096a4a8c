//! Retry and backoff decisions.
//!
//! Pure lookups from an error classification to a wait tier. New refusal
//! codes or socket conditions are handled by extending the tables below.

use std::io;
use std::time::Duration;

use crate::config::Timeouts;
use crate::response::Response;

/// Wait tier for a refused channel join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinBackoff {
    /// Not retried automatically.
    None,
    Short,
    Medium,
    Long,
}

/// Wait tier for a failed or dropped server connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconnectBackoff {
    Default,
    Long,
}

const JOIN_TABLE: &[(Response, JoinBackoff)] = &[
    (Response::ERR_NOCHANMODES, JoinBackoff::Short),
    (Response::ERR_TOOMANYCHANNELS, JoinBackoff::Short),
    (Response::ERR_NOTREGISTERED, JoinBackoff::Short),
    (Response::ERR_CHANNELISFULL, JoinBackoff::Short),
    (Response::ERR_INVITEONLYCHAN, JoinBackoff::Medium),
    (Response::ERR_UNIQOPPRIVSNEEDED, JoinBackoff::Medium),
    (Response::ERR_BANNEDFROMCHAN, JoinBackoff::Long),
];

const RECONNECT_LONG: &[io::ErrorKind] = &[
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::TimedOut,
    io::ErrorKind::HostUnreachable,
    io::ErrorKind::NetworkUnreachable,
];

/// `EHOSTDOWN` on Linux; std has no stable kind for it.
const EHOSTDOWN: i32 = 112;

/// Classify a join refusal.
pub fn join_backoff(code: Response) -> JoinBackoff {
    JOIN_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, tier)| *tier)
        .unwrap_or(JoinBackoff::None)
}

/// Wait before the next join attempt, `None` if no retry is scheduled.
pub fn join_retry_wait(code: Response, timeouts: &Timeouts) -> Option<Duration> {
    let secs = match join_backoff(code) {
        JoinBackoff::None => return None,
        JoinBackoff::Short => timeouts.channel_wait_short,
        JoinBackoff::Medium => timeouts.channel_wait_medium,
        JoinBackoff::Long => timeouts.channel_wait_long,
    };
    Some(Duration::from_secs(secs))
}

/// Classify a connection failure. `None` means the session ended without a
/// socket error (server closed it); that uses the default tier.
pub fn reconnect_backoff(error: Option<&io::Error>) -> ReconnectBackoff {
    let Some(error) = error else {
        return ReconnectBackoff::Default;
    };
    if RECONNECT_LONG.contains(&error.kind()) || error.raw_os_error() == Some(EHOSTDOWN) {
        ReconnectBackoff::Long
    } else {
        ReconnectBackoff::Default
    }
}

pub fn reconnect_wait(error: Option<&io::Error>, timeouts: &Timeouts) -> Duration {
    Duration::from_secs(match reconnect_backoff(error) {
        ReconnectBackoff::Default => timeouts.reconnect_wait,
        ReconnectBackoff::Long => timeouts.reconnect_wait_long,
    })
}
