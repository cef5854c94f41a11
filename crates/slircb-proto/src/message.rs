//! Wire message parsing and encoding.
//!
//! [`Message`] is the single typed representation of one protocol line,
//! incoming or outgoing. Parsing is infallible by design: the server is an
//! adversarial peer and a malformed line must degrade into a diagnostic
//! message rather than abort the pipeline.

use std::fmt;

use crate::ctcp;

/// Classification of a protocol line, assigned once at parse/construction
/// time. The kinds are mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Ordinary PRIVMSG text.
    PlainText,
    /// A CTCP ACTION carried in a PRIVMSG (`/me`).
    Action,
    /// A non-ACTION CTCP request carried in a PRIVMSG.
    CtcpRequest,
    /// A CTCP reply carried in a NOTICE.
    CtcpReply,
    /// An ordinary NOTICE.
    Notice,
    /// A 3-digit numeric reply from the server.
    Numeric,
    /// A command line with no sender prefix (e.g. `PING`).
    ServerCommand,
    /// A prefixed non-numeric command (JOIN, MODE, NICK, ...).
    ClientCommand,
}

/// One protocol line.
///
/// `args` holds the ordered wire parameters; the last element may carry
/// embedded spaces (the trailing parameter). `text` is the derived human
/// payload: the CTCP body for CTCP kinds, the trailing text for
/// PRIVMSG/NOTICE, empty for pure control messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Message classification.
    pub kind: MessageKind,
    /// Sender nickname, when the line carried a prefix.
    pub nick: Option<String>,
    /// Sender ident, when the prefix was a full hostmask.
    pub ident: Option<String>,
    /// Sender host, when the prefix was a full hostmask.
    pub host: Option<String>,
    /// Nick or channel the message is addressed to, where applicable.
    pub recipient: Option<String>,
    /// Upper-cased command verb or 3-digit numeric code.
    pub command: String,
    /// CTCP command name; set only for CtcpRequest/CtcpReply.
    pub ctcp_name: Option<String>,
    /// Ordered wire parameters.
    pub args: Vec<String>,
    /// Derived human payload.
    pub text: String,
    /// Pre-framed body bytes. When set, byte encoding emits these verbatim
    /// as the trailing parameter instead of re-joining `args`; the spooler
    /// uses this for already-chunked payloads.
    pub framed: Option<Vec<u8>>,
}

impl Message {
    fn empty(kind: MessageKind) -> Self {
        Message {
            kind,
            nick: None,
            ident: None,
            host: None,
            recipient: None,
            command: String::new(),
            ctcp_name: None,
            args: Vec::new(),
            text: String::new(),
            framed: None,
        }
    }

    /// The sender mask: `nick!ident@host`, a bare nick for server prefixes,
    /// or `None` when self-originated before the server echoes identity.
    pub fn sender(&self) -> Option<String> {
        match (&self.nick, &self.ident, &self.host) {
            (None, None, None) => None,
            (nick, None, None) => nick.clone(),
            (nick, ident, host) => Some(format!(
                "{}!{}@{}",
                nick.as_deref().unwrap_or(""),
                ident.as_deref().unwrap_or(""),
                host.as_deref().unwrap_or("")
            )),
        }
    }

    /// The sender's `ident@host`, used as the pagination cache key.
    pub fn ident_host(&self) -> Option<String> {
        match (&self.ident, &self.host) {
            (Some(ident), Some(host)) => Some(format!("{ident}@{host}")),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    /// Parse one raw line into a `Message`.
    ///
    /// Never fails: lines that do not fit the grammar come back as a
    /// degraded `ServerCommand` carrying the raw line in `text`, so callers
    /// can log them and keep the pipeline alive.
    pub fn parse(line: &str) -> Message {
        match Self::parse_inner(line) {
            Some(msg) => msg,
            None => {
                let mut msg = Message::empty(MessageKind::ServerCommand);
                msg.text = line.to_string();
                msg
            }
        }
    }

    fn parse_inner(line: &str) -> Option<Message> {
        let mut msg = Message::empty(MessageKind::ServerCommand);

        let (first, mut rest) = line.split_once(' ')?;
        let command = if let Some(prefix) = first.strip_prefix(':') {
            let (command, after) = rest.split_once(' ')?;
            let (nick, ident, host) = split_hostmask(prefix);
            msg.nick = nick;
            msg.ident = ident;
            msg.host = host;
            rest = after;
            command
        } else {
            first
        };
        msg.command = command.to_ascii_uppercase();

        loop {
            if let Some(trailing) = rest.strip_prefix(':') {
                msg.args.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((arg, after)) => {
                    msg.args.push(arg.to_string());
                    rest = after;
                }
                None => {
                    msg.args.push(rest.to_string());
                    break;
                }
            }
        }

        msg.kind = classify(line, &mut msg);
        if matches!(msg.command.as_str(), "PRIVMSG" | "NOTICE" | "MODE")
            || is_numeric(&msg.command)
        {
            msg.recipient = msg.args.first().cloned();
        }

        Some(msg)
    }

    // ------------------------------------------------------------------
    // Outbound constructors
    // ------------------------------------------------------------------

    /// Text message to a nick or channel.
    pub fn privmsg(to: &str, text: &str) -> Message {
        let mut msg = Message::empty(MessageKind::PlainText);
        msg.recipient = Some(to.to_string());
        msg.args = vec![to.to_string(), text.to_string()];
        msg.text = text.to_string();
        msg
    }

    /// Notice to a nick or channel.
    pub fn notice(to: &str, text: &str) -> Message {
        let mut msg = Message::privmsg(to, text);
        msg.kind = MessageKind::Notice;
        msg
    }

    /// CTCP ACTION (`/me`) to a nick or channel.
    pub fn action(to: &str, text: &str) -> Message {
        let mut msg = Message::privmsg(to, text);
        msg.kind = MessageKind::Action;
        msg
    }

    /// CTCP request.
    pub fn ctcp(to: &str, name: &str, body: Option<&str>) -> Message {
        let mut msg = Message::empty(MessageKind::CtcpRequest);
        msg.recipient = Some(to.to_string());
        msg.ctcp_name = Some(name.to_ascii_uppercase());
        msg.args = match body {
            Some(body) => vec![to.to_string(), body.to_string()],
            None => vec![to.to_string()],
        };
        msg.text = body.unwrap_or_default().to_string();
        msg
    }

    /// CTCP reply (carried in a NOTICE).
    pub fn ctcp_reply(to: &str, name: &str, body: Option<&str>) -> Message {
        let mut msg = Message::ctcp(to, name, body);
        msg.kind = MessageKind::CtcpReply;
        msg
    }

    /// Bare client-to-server command with positional arguments.
    pub fn raw(command: &str, args: &[&str]) -> Message {
        let mut msg = Message::empty(MessageKind::ServerCommand);
        msg.command = command.to_ascii_uppercase();
        msg.args = args.iter().map(|a| a.to_string()).collect();
        msg
    }

    /// Batched JOIN: comma-joined channels with keys aligned by position.
    pub fn join(channels: &[String], keys: &[String]) -> Message {
        let chans = channels.join(",");
        if keys.is_empty() {
            Message::raw("JOIN", &[&chans])
        } else {
            Message::raw("JOIN", &[&chans, &keys.join(",")])
        }
    }

    /// PART a single channel.
    pub fn part(channel: &str) -> Message {
        Message::raw("PART", &[channel])
    }

    /// QUIT with a reason.
    pub fn quit(reason: &str) -> Message {
        Message::raw("QUIT", &[reason])
    }

    /// NICK change request.
    pub fn nick(newnick: &str) -> Message {
        Message::raw("NICK", &[newnick])
    }

    /// MODE query or change. `modes`/`param` are appended when present.
    pub fn mode(target: &str, modes: Option<&str>, param: Option<&str>) -> Message {
        let mut args = vec![target];
        if let Some(modes) = modes {
            args.push(modes);
        }
        if let Some(param) = param {
            args.push(param);
        }
        Message::raw("MODE", &args)
    }

    /// KICK a nick from a channel.
    pub fn kick(channel: &str, nick: &str, reason: Option<&str>) -> Message {
        let mut args = vec![channel, nick];
        if let Some(reason) = reason {
            args.push(reason);
        }
        Message::raw("KICK", &args)
    }

    /// WHOIS query.
    pub fn whois(nick: &str) -> Message {
        Message::raw("WHOIS", &[nick])
    }

    /// PONG echoing the server's PING arguments.
    pub fn pong(args: &[String]) -> Message {
        let borrowed: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        Message::raw("PONG", &borrowed)
    }

    /// USER registration line.
    pub fn user(ident: &str, realname: &str) -> Message {
        Message::raw("USER", &[ident, "0", "*", realname])
    }

    /// PASS line for servers requiring a connection password.
    pub fn pass(password: &str) -> Message {
        Message::raw("PASS", &[password])
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    /// The wire verb this message encodes under.
    fn wire_verb(&self) -> &str {
        match self.kind {
            MessageKind::PlainText | MessageKind::Action | MessageKind::CtcpRequest => "PRIVMSG",
            MessageKind::Notice | MessageKind::CtcpReply => "NOTICE",
            _ => self.command.as_str(),
        }
    }

    /// Encode to wire bytes, without the trailing CRLF.
    ///
    /// Pre-framed bodies are emitted verbatim after the `<VERB> <target> :`
    /// head; everything else goes through the text encoding.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        match &self.framed {
            Some(body) => {
                let head = format!(
                    "{} {} :",
                    self.wire_verb(),
                    self.recipient.as_deref().unwrap_or("")
                );
                let mut out = head.into_bytes();
                out.extend_from_slice(body);
                out
            }
            None => self.to_string().into_bytes(),
        }
    }
}

/// Split a `:nick!ident@host` or `:servername` prefix (without the colon).
/// Hostmask match failure falls back to a bare nick.
fn split_hostmask(prefix: &str) -> (Option<String>, Option<String>, Option<String>) {
    if let Some((nick, rest)) = prefix.split_once('!') {
        if let Some((ident, host)) = rest.split_once('@') {
            if !nick.is_empty() && !ident.is_empty() && !host.is_empty() {
                return (
                    Some(nick.to_string()),
                    Some(ident.to_string()),
                    Some(host.to_string()),
                );
            }
        }
    }
    (Some(prefix.to_string()), None, None)
}

fn is_numeric(command: &str) -> bool {
    command.len() == 3 && command.chars().all(|c| c.is_ascii_digit())
}

/// Classification rules, in priority order (see the parser grammar).
fn classify(line: &str, msg: &mut Message) -> MessageKind {
    let trailing = msg.args.last().cloned().unwrap_or_default();

    if !line.starts_with(':') {
        MessageKind::ServerCommand
    } else if is_numeric(&msg.command) {
        MessageKind::Numeric
    } else if msg.command == "NOTICE" {
        match ctcp::parse_envelope(&trailing) {
            Some(env) => {
                msg.ctcp_name = Some(env.name);
                msg.text = env.body.unwrap_or_default().to_string();
                MessageKind::CtcpReply
            }
            None => {
                msg.text = trailing;
                MessageKind::Notice
            }
        }
    } else if msg.command == "PRIVMSG" {
        match ctcp::parse_envelope(&trailing) {
            Some(env) => {
                msg.text = env.body.unwrap_or_default().to_string();
                if env.name == "ACTION" {
                    MessageKind::Action
                } else {
                    msg.ctcp_name = Some(env.name);
                    MessageKind::CtcpRequest
                }
            }
            None => {
                msg.text = trailing;
                MessageKind::PlainText
            }
        }
    } else {
        MessageKind::ClientCommand
    }
}

/// Join wire parameters: the first argument containing a space gets a `:`
/// prefix; everything after it is appended as-is. Producing a list where a
/// space-containing argument is not last is a caller contract violation.
fn join_args(args: &[String]) -> String {
    let mut out = Vec::with_capacity(args.len());
    let mut space_found = false;
    for arg in args {
        if !space_found && arg.contains(' ') {
            out.push(format!(":{arg}"));
            space_found = true;
        } else {
            out.push(arg.clone());
        }
    }
    out.join(" ")
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MessageKind::*;

        let args = if matches!(self.kind, Action | CtcpRequest | CtcpReply) {
            let name = match self.kind {
                Action => "ACTION",
                _ => self.ctcp_name.as_deref().unwrap_or(""),
            };
            let body = if self.args.len() > 1 {
                Some(self.args[1..].join(" "))
            } else {
                None
            };
            let envelope = ctcp::format_envelope(name, body.as_deref());
            let target = self.args.first().cloned().unwrap_or_default();
            join_args(&[target, envelope])
        } else {
            join_args(&self.args)
        };

        match self.kind {
            PlainText | Action | CtcpRequest => write!(f, "PRIVMSG {args}"),
            Notice | CtcpReply => write!(f, "NOTICE {args}"),
            Numeric => write!(f, "{} {args}", self.command),
            ServerCommand => {
                if args.is_empty() {
                    write!(f, "{}", self.command)
                } else {
                    write!(f, "{} {args}", self.command)
                }
            }
            ClientCommand => write!(
                f,
                ":{} {} {args}",
                self.sender().unwrap_or_default(),
                self.command
            ),
        }
    }
}
