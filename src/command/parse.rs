use super::types::Command;

fn raw(cmd: &str, args: Vec<&str>) -> Command {
    Command::Raw(
        cmd.to_owned(),
        args.into_iter().map(|s| s.to_owned()).collect(),
    )
}

fn owned(arg: Option<&&str>) -> Option<String> {
    arg.map(|s| (*s).to_owned())
}

impl Command {
    /// Build a typed command from a command word and its parameters.
    ///
    /// Commands with an unexpected arity, unknown commands and unknown
    /// numerics all become [`Command::Raw`].
    pub fn new(cmd: &str, args: Vec<&str>) -> Command {
        let cmd_upper = cmd.to_ascii_uppercase();

        match (cmd_upper.as_str(), args.len()) {
            ("PASS", 1) => Command::PASS(args[0].to_owned()),
            ("NICK", 1) => Command::NICK(args[0].to_owned()),
            ("USER", 4) => {
                Command::USER(args[0].to_owned(), args[1].to_owned(), args[3].to_owned())
            }
            ("QUIT", 0 | 1) => Command::QUIT(owned(args.first())),
            ("JOIN", 1 | 2) => Command::JOIN(args[0].to_owned(), owned(args.get(1))),
            ("PART", 1 | 2) => Command::PART(args[0].to_owned(), owned(args.get(1))),
            ("KICK", 2 | 3) => {
                Command::KICK(args[0].to_owned(), args[1].to_owned(), owned(args.get(2)))
            }
            ("MODE", n) if n >= 1 => Command::MODE(
                args[0].to_owned(),
                args[1..].iter().map(|s| (*s).to_owned()).collect(),
            ),
            ("TOPIC", 1 | 2) => Command::TOPIC(args[0].to_owned(), owned(args.get(1))),
            ("PRIVMSG", 2) => Command::PRIVMSG(args[0].to_owned(), args[1].to_owned()),
            ("NOTICE", 2) => Command::NOTICE(args[0].to_owned(), args[1].to_owned()),
            ("WHOIS", 1) => Command::WHOIS(args[0].to_owned()),
            ("PING", 1 | 2) => Command::PING(args[0].to_owned(), owned(args.get(1))),
            ("PONG", 1 | 2) => Command::PONG(args[0].to_owned(), owned(args.get(1))),
            ("ERROR", 1) => Command::ERROR(args[0].to_owned()),
            _ => match cmd.parse() {
                Ok(resp) => Command::Response(
                    resp,
                    args.into_iter().map(|s| s.to_owned()).collect(),
                ),
                Err(_) => raw(cmd, args),
            },
        }
    }
}
