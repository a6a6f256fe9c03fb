//! Plaintext IRC transport.
//!
//! Just enough of the client protocol for announce channels: registration
//! with nick-collision retry, NickServ identification, channel joins with
//! optional keys, PING/PONG, and PRIVMSG in both directions. Everything else
//! on the wire is ignored.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use prewire_core::config::NetworkConfig;
use prewire_core::session::{Connection, IncomingLine, Transport, TransportError};

pub struct IrcTransport;

#[async_trait]
impl Transport for IrcTransport {
    async fn connect(
        &self,
        network: &NetworkConfig,
    ) -> Result<Box<dyn Connection>, TransportError> {
        if network.ssl_enabled {
            return Err(TransportError::Unsupported(format!(
                "network {}: TLS connections are not supported",
                network.name
            )));
        }

        let stream = TcpStream::connect((network.host.as_str(), network.port))
            .await
            .map_err(|e| {
                TransportError::Connect(format!("{}:{}: {e}", network.host, network.port))
            })?;
        let (read, write) = stream.into_split();

        let mut conn = IrcConnection {
            reader: BufReader::new(read),
            writer: write,
        };
        conn.register(network).await?;
        Ok(Box::new(conn))
    }
}

struct IrcConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IrcConnection {
    async fn send_raw(&mut self, command: &str) -> Result<(), TransportError> {
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// One raw protocol line, CRLF stripped. `None` on EOF.
    async fn read_raw(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Register, identify and join; returns once the server welcomes us.
    async fn register(&mut self, network: &NetworkConfig) -> Result<(), TransportError> {
        let username = network
            .username
            .clone()
            .unwrap_or_else(|| network.nickname.clone());
        let realname = network
            .realname
            .clone()
            .unwrap_or_else(|| network.nickname.clone());

        let mut nick = network.nickname.clone();
        self.send_raw(&format!("NICK {nick}")).await?;
        self.send_raw(&format!("USER {username} 0 * :{realname}"))
            .await?;

        loop {
            let Some(raw) = self.read_raw().await? else {
                return Err(TransportError::Connect(
                    "connection closed during registration".to_string(),
                ));
            };
            let Some(message) = parse_message(&raw) else {
                continue;
            };

            match message.command {
                "PING" => {
                    let token = message.trailing.unwrap_or_default();
                    self.send_raw(&format!("PONG :{token}")).await?;
                }
                // Nick in use: retry with a suffixed nick.
                "433" => {
                    nick.push('_');
                    warn!(network = %network.name, "nickname taken, retrying as {nick}");
                    self.send_raw(&format!("NICK {nick}")).await?;
                }
                // Welcome: identify and join.
                "001" => {
                    if let Some(password) = &network.nickserv_password {
                        self.send_raw(&format!("PRIVMSG NickServ :IDENTIFY {password}"))
                            .await?;
                    }
                    for channel in &network.channels {
                        self.send_raw(&join_command(&channel.name, channel.password.as_deref()))
                            .await?;
                    }
                    info!(network = %network.name, nick = %nick, "registered");
                    return Ok(());
                }
                "ERROR" => {
                    return Err(TransportError::Connect(format!(
                        "server error: {}",
                        message.trailing.unwrap_or_default()
                    )));
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Connection for IrcConnection {
    async fn next_line(&mut self) -> Result<Option<IncomingLine>, TransportError> {
        loop {
            let Some(raw) = self.read_raw().await? else {
                return Ok(None);
            };
            let Some(message) = parse_message(&raw) else {
                continue;
            };

            match message.command {
                "PING" => {
                    let token = message.trailing.unwrap_or_default();
                    self.send_raw(&format!("PONG :{token}")).await?;
                }
                "ERROR" => {
                    return Err(TransportError::Io(format!(
                        "server error: {}",
                        message.trailing.unwrap_or_default()
                    )));
                }
                "PRIVMSG" => {
                    if let Some(line) = to_incoming(&message) {
                        return Ok(Some(line));
                    }
                    debug!("ignoring non-channel privmsg: {raw}");
                }
                _ => {}
            }
        }
    }

    async fn send_line(&mut self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.send_raw(&format!("PRIVMSG {channel} :{text}")).await
    }
}

/// One parsed protocol line.
#[derive(Debug, PartialEq, Eq)]
struct IrcMessage<'a> {
    /// Sender nick, when the line carried a prefix.
    nick: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
    trailing: Option<&'a str>,
}

fn parse_message(raw: &str) -> Option<IrcMessage<'_>> {
    let mut rest = raw;

    let nick = if let Some(stripped) = rest.strip_prefix(':') {
        let (prefix, tail) = stripped.split_once(' ')?;
        rest = tail;
        Some(prefix.split(['!', '@']).next().unwrap_or(prefix))
    } else {
        None
    };

    let (head, trailing) = match rest.split_once(" :") {
        Some((head, trailing)) => (head, Some(trailing)),
        None => (rest, None),
    };

    let mut words = head.split_ascii_whitespace();
    let command = words.next()?;
    Some(IrcMessage {
        nick,
        command,
        params: words.collect(),
        trailing,
    })
}

/// A PRIVMSG into a channel, as the ingest pipeline sees it.
fn to_incoming(message: &IrcMessage) -> Option<IncomingLine> {
    let target = message.params.first()?;
    if !target.starts_with('#') {
        return None;
    }
    Some(IncomingLine {
        channel: target.to_string(),
        nick: message.nick.unwrap_or_default().to_string(),
        text: message.trailing.unwrap_or_default().to_string(),
    })
}

fn join_command(channel: &str, password: Option<&str>) -> String {
    match password {
        Some(password) => format!("JOIN {channel} {password}"),
        None => format!("JOIN {channel}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg() {
        let message =
            parse_message(":announcer!bot@relay.example.net PRIVMSG #pre :[PRE] [TV] Some-GRP")
                .unwrap();
        assert_eq!(message.nick, Some("announcer"));
        assert_eq!(message.command, "PRIVMSG");
        assert_eq!(message.params, vec!["#pre"]);
        assert_eq!(message.trailing, Some("[PRE] [TV] Some-GRP"));
    }

    #[test]
    fn test_parse_ping_without_prefix() {
        let message = parse_message("PING :irc.example.net").unwrap();
        assert_eq!(message.nick, None);
        assert_eq!(message.command, "PING");
        assert_eq!(message.trailing, Some("irc.example.net"));
    }

    #[test]
    fn test_parse_numeric() {
        let message = parse_message(":irc.example.net 433 * prewire :Nickname is in use").unwrap();
        assert_eq!(message.command, "433");
        assert_eq!(message.params, vec!["*", "prewire"]);
    }

    #[test]
    fn test_parse_empty_line() {
        assert!(parse_message("").is_none());
        assert!(parse_message(":lonely.prefix").is_none());
    }

    #[test]
    fn test_to_incoming_channel_message() {
        let message =
            parse_message(":announcer!bot@host PRIVMSG #Pre :[NUKE] Some-GRP [reason]").unwrap();
        let line = to_incoming(&message).unwrap();
        assert_eq!(line.channel, "#Pre");
        assert_eq!(line.nick, "announcer");
        assert_eq!(line.text, "[NUKE] Some-GRP [reason]");
    }

    #[test]
    fn test_to_incoming_ignores_direct_messages() {
        let message = parse_message(":someone!id@host PRIVMSG prewire :hello").unwrap();
        assert!(to_incoming(&message).is_none());
    }

    #[test]
    fn test_join_command_with_key() {
        assert_eq!(join_command("#pre", None), "JOIN #pre");
        assert_eq!(join_command("#pre", Some("hunter2")), "JOIN #pre hunter2");
    }

    #[test]
    fn test_message_colors_survive_trailing_parse() {
        let message =
            parse_message(":bot!b@h PRIVMSG #pre :\u{3}04[PRE]\u{3} Some-GRP").unwrap();
        assert!(message.trailing.unwrap().contains("[PRE]"));
    }
}
