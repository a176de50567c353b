//! IRC message codec (RFC 1459 / RFC 2812 line format).
//!
//! Inbound lines are parsed into [`IrcMessage`]; outbound commands are built
//! by the functions below, each returning a complete CRLF-terminated line.

/// Maximum length of one protocol line, CRLF included.
pub const MAX_LINE_BYTES: usize = 512;

/// A parsed inbound message. IRCv3 message tags are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    /// Origin (`nick!user@host` or a server name), without the leading `:`.
    pub prefix: Option<String>,
    /// Command or three-digit numeric, upper-cased.
    pub command: String,
    /// Middle parameters followed by the trailing parameter, if any.
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parses one line. Returns `None` for lines with no command.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if let Some(tagged) = rest.strip_prefix('@') {
            rest = tagged.split_once(' ')?.1;
        }

        let prefix = match rest.strip_prefix(':') {
            Some(prefixed) => {
                let (prefix, remainder) = prefixed.split_once(' ')?;
                rest = remainder;
                Some(prefix.to_string())
            }
            None => None,
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => match rest.strip_prefix(':') {
                // Command-less line such as ":trailing" is caught below.
                Some(trailing) => ("", Some(trailing)),
                None => (rest, None),
            },
        };

        let mut words = head.split(' ').filter(|word| !word.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nickname part of the prefix, if the prefix names a user.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|prefix| prefix.split(['!', '@']).next())
    }

    /// The last parameter (usually the human-readable text).
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

/// `true` if `nick` can be sent in a `NICK` command.
pub fn is_valid_nickname(nick: &str) -> bool {
    !nick.is_empty()
        && !nick.starts_with([':', '#', '&'])
        && !nick
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ',')
}

pub fn nick(nickname: &str) -> String {
    format!("NICK {nickname}\r\n")
}

pub fn user(nickname: &str, realname: &str) -> String {
    format!("USER {nickname} 0 * :{realname}\r\n")
}

pub fn join(channel: &str) -> String {
    format!("JOIN {channel}\r\n")
}

pub fn privmsg(target: &str, text: &str) -> String {
    format!("PRIVMSG {target} :{text}\r\n")
}

pub fn ping(token: &str) -> String {
    format!("PING :{token}\r\n")
}

pub fn pong(token: &str) -> String {
    format!("PONG :{token}\r\n")
}

pub fn quit(reason: &str) -> String {
    format!("QUIT :{reason}\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_with_server_prefix() {
        let msg = IrcMessage::parse(":irc.example.net 001 relay :Welcome to the network\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("irc.example.net"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, ["relay", "Welcome to the network"]);
    }

    #[test]
    fn parses_ping_without_prefix() {
        let msg = IrcMessage::parse("PING :irc.example.net").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.trailing(), Some("irc.example.net"));
    }

    #[test]
    fn parses_user_prefix_and_skips_tags() {
        let msg =
            IrcMessage::parse("@time=2024-01-01T00:00:00Z :relay!bot@host JOIN #web-ci").unwrap();
        assert_eq!(msg.source_nick(), Some("relay"));
        assert_eq!(msg.command, "JOIN");
        assert_eq!(msg.params, ["#web-ci"]);
    }

    #[test]
    fn trailing_keeps_inner_colons_and_spaces() {
        let msg = IrcMessage::parse(":srv ERROR :Closing link: (bot@host) [Ping timeout]").unwrap();
        assert_eq!(msg.command, "ERROR");
        assert_eq!(msg.trailing(), Some("Closing link: (bot@host) [Ping timeout]"));
    }

    #[test]
    fn lines_without_command_are_rejected() {
        assert_eq!(IrcMessage::parse(""), None);
        assert_eq!(IrcMessage::parse(":prefix-only"), None);
        assert_eq!(IrcMessage::parse(":srv :trailing"), None);
    }

    #[test]
    fn builds_crlf_terminated_commands() {
        assert_eq!(user("relay", "Webhook relay"), "USER relay 0 * :Webhook relay\r\n");
        assert_eq!(privmsg("#web-ci", "hello: world"), "PRIVMSG #web-ci :hello: world\r\n");
        assert_eq!(ping("keepalive"), "PING :keepalive\r\n");
        assert_eq!(pong("abc"), "PONG :abc\r\n");
    }

    #[test]
    fn nickname_validation() {
        assert!(is_valid_nickname("go-gitlab-irc"));
        assert!(!is_valid_nickname(""));
        assert!(!is_valid_nickname("two words"));
        assert!(!is_valid_nickname("#chan"));
    }
}
