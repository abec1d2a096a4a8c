use super::{DccOffer, Incoming, MessageKind, ParserEvent, Rule};
use crate::ctcp;
use crate::message::Message;
use crate::util::{parse_dcc_ip, split_quoted};

/// Answers CTCP `VERSION` and `PING`.
pub struct CtcpRule {
    version: String,
}

impl CtcpRule {
    pub fn new(version: &str) -> Self {
        CtcpRule {
            version: version.to_string(),
        }
    }
}

impl Rule for CtcpRule {
    fn name(&self) -> &str {
        "ctcp"
    }

    fn parse(&self, incoming: &Incoming) -> Option<ParserEvent> {
        if incoming.kind != MessageKind::CtcpRequest {
            return None;
        }
        let (verb, rest) = ctcp::split(&incoming.text);
        let body = match verb.as_str() {
            "VERSION" => format!("VERSION {}", self.version),
            "PING" if rest.is_empty() => "PING".to_string(),
            "PING" => format!("PING {rest}"),
            _ => return None,
        };
        Some(ParserEvent::SendData {
            message: Message::ctcp_reply(&incoming.sender, &body),
        })
    }
}

/// `DCC SEND` offers and `DCC ACCEPT` resume confirmations.
pub struct DccRule;

impl DccRule {
    fn send(sender: &str, args: &[String]) -> Option<ParserEvent> {
        let [file_name, ip, port, rest @ ..] = args else {
            return None;
        };
        Some(ParserEvent::DccSend(DccOffer {
            bot: sender.to_string(),
            file_name: file_name.clone(),
            addr: parse_dcc_ip(ip)?,
            port: port.parse().ok()?,
            size: rest.first().and_then(|s| s.parse().ok()).unwrap_or(0),
        }))
    }

    fn accept(sender: &str, args: &[String]) -> Option<ParserEvent> {
        let [file_name, port, position, ..] = args else {
            return None;
        };
        Some(ParserEvent::DccAccept {
            bot: sender.to_string(),
            file_name: file_name.clone(),
            port: port.parse().ok()?,
            position: position.parse().ok()?,
        })
    }
}

impl Rule for DccRule {
    fn name(&self) -> &str {
        "dcc"
    }

    fn parse(&self, incoming: &Incoming) -> Option<ParserEvent> {
        if incoming.kind != MessageKind::CtcpRequest {
            return None;
        }
        let (verb, rest) = ctcp::split(&incoming.text);
        if verb != "DCC" {
            return None;
        }
        let (sub, args) = ctcp::split(rest);
        let args = split_quoted(args);
        match sub.as_str() {
            "SEND" => Self::send(&incoming.sender, &args),
            "ACCEPT" => Self::accept(&incoming.sender, &args),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::command::Command;

    fn ctcp(text: &str) -> Incoming {
        Incoming::new(MessageKind::CtcpRequest, "Bot", "me", text)
    }

    #[test]
    fn test_dcc_send() {
        assert_eq!(
            DccRule.parse(&ctcp("DCC SEND \"My File.mkv\" 3232235777 5000 734003200")),
            Some(ParserEvent::DccSend(DccOffer {
                bot: "Bot".into(),
                file_name: "My File.mkv".into(),
                addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
                port: 5000,
                size: 734003200,
            }))
        );
        assert!(matches!(
            DccRule.parse(&ctcp("DCC SEND a.bin 10.0.0.1 0 12 77")),
            Some(ParserEvent::DccSend(DccOffer { port: 0, size: 12, .. }))
        ));
        assert_eq!(DccRule.parse(&ctcp("DCC SEND a.bin nowhere 1 2")), None);
        assert_eq!(DccRule.parse(&ctcp("DCC CHAT chat 1 2")), None);
    }

    #[test]
    fn test_dcc_accept() {
        assert_eq!(
            DccRule.parse(&ctcp("DCC ACCEPT file.bin 5000 1024")),
            Some(ParserEvent::DccAccept {
                bot: "Bot".into(),
                file_name: "file.bin".into(),
                port: 5000,
                position: 1024,
            })
        );
    }

    #[test]
    fn test_ctcp_replies() {
        let rule = CtcpRule::new("slirc-xdcc test");
        match rule.parse(&ctcp("VERSION")) {
            Some(ParserEvent::SendData { message }) => assert_eq!(
                message.command,
                Command::NOTICE("Bot".into(), "\x01VERSION slirc-xdcc test\x01".into())
            ),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            rule.parse(&ctcp("PING 12345")),
            Some(ParserEvent::SendData { .. })
        ));
        assert_eq!(rule.parse(&ctcp("CLIENTINFO")), None);
    }
}
