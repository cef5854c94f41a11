//! Connection-scoped protocol state.
//!
//! [`Session`] is a pure reducer over parsed messages: the connection loop
//! feeds every incoming [`Message`] through [`Session::apply`], which
//! mutates the tracked state and returns any protocol messages the event
//! obligates us to send (PONG, autojoin, mode queries). The session never
//! touches the socket itself.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use slircb_proto::{
    split_channel_modes, split_user_modes, CaseMapping, ChanModeClasses, Message, MessageKind,
    ModeSign, PrefixSpec, TargMax,
};

use crate::config::{AutojoinEntry, IdentityConfig};

/// Our own identity on the network.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Current nickname, updated on self-rename.
    pub nick: String,
    /// Fallback nickname for registration collisions.
    pub altnick: Option<String>,
    /// Ident sent at registration.
    pub ident: String,
    /// Real name sent at registration.
    pub realname: String,
    /// User modes requested after welcome.
    pub modes: Option<String>,
    /// Connection password.
    pub serverpw: Option<String>,
    /// Our host as the server sees it, learned from echoed messages.
    pub host: Option<String>,
}

impl From<IdentityConfig> for Identity {
    fn from(c: IdentityConfig) -> Self {
        Identity {
            nick: c.nick,
            altnick: c.altnick,
            ident: c.ident,
            realname: c.realname,
            modes: c.modes,
            serverpw: c.serverpw,
            host: None,
        }
    }
}

/// Channel topic with attribution.
#[derive(Debug, Clone, Default)]
pub struct Topic {
    /// Topic text; empty when unset.
    pub text: String,
    /// Who set it.
    pub set_by: Option<String>,
    /// When it was set, as the server reported it (unix seconds).
    pub set_at: Option<String>,
}

/// One member of a channel.
#[derive(Debug, Clone, Default)]
pub struct Member {
    /// Nickname as the server spelled it.
    pub nick: String,
    /// Ident, when learned from a full hostmask.
    pub ident: Option<String>,
    /// Host, when learned from a full hostmask.
    pub host: Option<String>,
    /// Held prefix mode letters (e.g. 'o', 'v').
    pub grade: BTreeSet<char>,
}

/// A list-mode entry (ban or exception) with attribution.
#[derive(Debug, Clone)]
pub struct ListEntry {
    /// Who set it.
    pub set_by: String,
    /// When, as the server reported it.
    pub set_at: String,
}

/// Tracked state of one joined channel.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    /// Channel name as the server spelled it.
    pub name: String,
    /// Current topic.
    pub topic: Topic,
    /// Active channel modes, letter to optional argument.
    pub modes: HashMap<char, Option<String>>,
    /// Members keyed by case-lowered nick.
    pub members: HashMap<String, Member>,
    /// Ban masks with attribution.
    pub bans: HashMap<String, ListEntry>,
    /// Ban-exception masks with attribution.
    pub excepts: HashMap<String, ListEntry>,
}

/// Everything we know about the current connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Who we are.
    pub identity: Identity,
    /// Channels to join after welcome.
    autojoin: Vec<AutojoinEntry>,
    /// Our own user modes.
    pub own_modes: BTreeSet<char>,
    /// Raw ISUPPORT tokens as advertised.
    pub capabilities: HashMap<String, Option<String>>,
    /// Parsed CHANMODES partition.
    pub chan_modes: ChanModeClasses,
    /// Parsed PREFIX token.
    pub prefix: PrefixSpec,
    /// Ban-exception mode letter.
    pub excepts_letter: char,
    /// MODES cap: variable modes per MODE command, -1 when unlimited.
    pub max_modes: i32,
    /// Per-command target caps.
    pub targmax: TargMax,
    /// Negotiated case mapping.
    pub casemapping: CaseMapping,
    /// Joined channels keyed by case-lowered name.
    pub channels: HashMap<String, Channel>,
}

impl Session {
    /// Fresh pre-registration state.
    pub fn new(identity: Identity, autojoin: Vec<AutojoinEntry>) -> Self {
        Session {
            identity,
            autojoin,
            own_modes: BTreeSet::new(),
            capabilities: HashMap::new(),
            chan_modes: ChanModeClasses::default(),
            prefix: PrefixSpec::parse("(ov)@+").unwrap_or_default(),
            excepts_letter: 'e',
            max_modes: -1,
            targmax: TargMax::default(),
            casemapping: CaseMapping::Ascii,
            channels: HashMap::new(),
        }
    }

    /// Lower a nick or channel name under the negotiated mapping.
    pub fn lower(&self, s: &str) -> String {
        self.casemapping.lower(s)
    }

    /// Whether `nick` is us.
    pub fn is_self(&self, nick: &str) -> bool {
        self.casemapping.eq(nick, &self.identity.nick)
    }

    /// Channel type sigils, from CHANTYPES or the common default.
    pub fn chantypes(&self) -> String {
        self.capabilities
            .get("CHANTYPES")
            .and_then(|v| v.clone())
            .unwrap_or_else(|| "#&".to_string())
    }

    /// Whether `target` names a channel rather than a nick.
    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.chantypes().contains(c))
    }

    /// Look up a joined channel.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.lower(name))
    }

    /// Where a reply to `msg` should go: the channel it arrived on, or the
    /// sender's nick for direct messages.
    pub fn reply_target(&self, msg: &Message) -> Option<String> {
        match &msg.recipient {
            Some(r) if self.is_channel(r) => Some(r.clone()),
            _ => msg.nick.clone(),
        }
    }

    /// Fold one incoming message into the state and return the messages the
    /// event obligates us to send.
    pub fn apply(&mut self, msg: &Message) -> Vec<Message> {
        self.learn_own_host(msg);

        match msg.kind {
            MessageKind::ServerCommand if msg.command == "PING" => {
                // Answered here so liveness never waits on pacing.
                vec![Message::pong(&msg.args)]
            }
            MessageKind::Numeric => self.apply_numeric(msg),
            MessageKind::ClientCommand => self.apply_command(msg),
            _ => Vec::new(),
        }
    }

    /// Our own host is never told to us directly; harvest it from any echo
    /// of our full hostmask.
    fn learn_own_host(&mut self, msg: &Message) {
        if self.identity.host.is_none()
            && msg.nick.as_deref().is_some_and(|n| self.is_self(n))
            && msg.host.is_some()
        {
            self.identity.host = msg.host.clone();
        }
    }

    // ------------------------------------------------------------------
    // Numerics
    // ------------------------------------------------------------------

    fn apply_numeric(&mut self, msg: &Message) -> Vec<Message> {
        match msg.command.as_str() {
            "001" => self.on_welcome(),
            "005" => {
                self.on_isupport(msg);
                Vec::new()
            }
            "324" => {
                // <me> <channel> <modes> [args...]
                if msg.args.len() >= 3 {
                    let targets: Vec<&str> = msg.args[3..].iter().map(|s| s.as_str()).collect();
                    let channel = msg.args[1].clone();
                    let modes = msg.args[2].clone();
                    self.apply_channel_modes(&channel, &modes, &targets, msg.sender());
                }
                Vec::new()
            }
            "332" => {
                // <me> <channel> :<topic>
                if msg.args.len() >= 3 {
                    let name = self.lower(&msg.args[msg.args.len() - 2]);
                    let text = msg.args[msg.args.len() - 1].clone();
                    if let Some(chan) = self.channels.get_mut(&name) {
                        chan.topic.text = text;
                    }
                }
                Vec::new()
            }
            "333" => {
                // <me> <channel> <setter> <ts>
                if msg.args.len() >= 4 {
                    let n = msg.args.len();
                    let name = self.lower(&msg.args[n - 3]);
                    if let Some(chan) = self.channels.get_mut(&name) {
                        chan.topic.set_by = Some(msg.args[n - 2].clone());
                        chan.topic.set_at = Some(msg.args[n - 1].clone());
                    }
                }
                Vec::new()
            }
            "353" => {
                self.on_names(msg);
                Vec::new()
            }
            "367" => {
                // <me> <channel> <mask> <setter> <ts>
                if msg.args.len() >= 5 {
                    let n = msg.args.len();
                    let name = self.lower(&msg.args[n - 4]);
                    if let Some(chan) = self.channels.get_mut(&name) {
                        chan.bans.insert(
                            msg.args[n - 3].clone(),
                            ListEntry {
                                set_by: msg.args[n - 2].clone(),
                                set_at: msg.args[n - 1].clone(),
                            },
                        );
                    }
                }
                Vec::new()
            }
            "376" | "422" => self.on_end_of_motd(),
            _ => Vec::new(),
        }
    }

    fn on_welcome(&mut self) -> Vec<Message> {
        match &self.identity.modes {
            Some(modes) => vec![Message::mode(&self.identity.nick.clone(), Some(modes), None)],
            None => Vec::new(),
        }
    }

    fn on_isupport(&mut self, msg: &Message) {
        // args[0] is our nick; the rest are tokens, the last being the
        // human-readable trailer which parse_entry rejects.
        for token in msg.args.iter().skip(1) {
            let Some(entry) = slircb_proto::parse_entry(token) else {
                continue;
            };
            if entry.revoked {
                self.capabilities.remove(&entry.key);
                continue;
            }
            let value = entry.value.as_deref().unwrap_or("");
            match entry.key.as_str() {
                "CHANMODES" => match ChanModeClasses::parse(value) {
                    Some(classes) => self.chan_modes = classes,
                    None => {
                        warn!(token = %token, "unparseable CHANMODES, keeping previous");
                    }
                },
                "PREFIX" => match PrefixSpec::parse(value) {
                    Some(spec) => self.prefix = spec,
                    None => warn!(token = %token, "unparseable PREFIX, keeping previous"),
                },
                "EXCEPTS" => {
                    self.excepts_letter = value.chars().next().unwrap_or('e');
                }
                "MODES" => {
                    self.max_modes = value.parse().unwrap_or(-1);
                }
                "TARGMAX" => {
                    self.targmax = TargMax::parse(value);
                }
                "CASEMAPPING" => match CaseMapping::parse(value) {
                    Some(mapping) => self.casemapping = mapping,
                    None => {
                        warn!(value = %value, "unknown CASEMAPPING, keeping previous");
                    }
                },
                _ => {}
            }
            self.capabilities.insert(entry.key, entry.value);
        }
    }

    fn on_names(&mut self, msg: &Message) {
        // <me> <symbol> <channel> :glyph-prefixed nicks
        if msg.args.len() < 3 {
            return;
        }
        let n = msg.args.len();
        let name = self.lower(&msg.args[n - 2]);
        let prefix = self.prefix.clone();
        let mapping = self.casemapping;
        let Some(chan) = self.channels.get_mut(&name) else {
            return;
        };
        for token in msg.args[n - 1].split_whitespace() {
            let mut grade = BTreeSet::new();
            let mut rest = token;
            while let Some(c) = rest.chars().next() {
                match prefix.letter_for_glyph(c) {
                    Some(letter) => {
                        grade.insert(letter);
                        rest = &rest[c.len_utf8()..];
                    }
                    None => break,
                }
            }
            if rest.is_empty() {
                continue;
            }
            let member = chan.members.entry(mapping.lower(rest)).or_default();
            member.nick = rest.to_string();
            member.grade.extend(grade);
        }
    }

    fn on_end_of_motd(&mut self) -> Vec<Message> {
        // One batched JOIN per group: the keyed channels with their key list
        // aligned positionally, then the keyless channels.
        let mut keyed = Vec::new();
        let mut keys = Vec::new();
        let mut keyless = Vec::new();
        for entry in &self.autojoin {
            match entry.key() {
                Some(key) => {
                    keyed.push(entry.channel().to_string());
                    keys.push(key.to_string());
                }
                None => keyless.push(entry.channel().to_string()),
            }
        }
        let mut out = Vec::new();
        if !keyed.is_empty() {
            out.push(Message::join(&keyed, &keys));
        }
        if !keyless.is_empty() {
            out.push(Message::join(&keyless, &[]));
        }
        out
    }

    // ------------------------------------------------------------------
    // Prefixed commands
    // ------------------------------------------------------------------

    fn apply_command(&mut self, msg: &Message) -> Vec<Message> {
        match msg.command.as_str() {
            "JOIN" => self.on_join(msg),
            "PART" => {
                if let (Some(nick), Some(channel)) = (&msg.nick, msg.args.first()) {
                    self.remove_from_channel(&nick.clone(), &channel.clone());
                }
                Vec::new()
            }
            "KICK" => {
                if msg.args.len() >= 2 {
                    self.remove_from_channel(&msg.args[1].clone(), &msg.args[0].clone());
                }
                Vec::new()
            }
            "QUIT" => {
                if let Some(nick) = &msg.nick {
                    let key = self.lower(nick);
                    for chan in self.channels.values_mut() {
                        chan.members.remove(&key);
                    }
                }
                Vec::new()
            }
            "NICK" => {
                if let (Some(old), Some(new)) = (&msg.nick, msg.args.first()) {
                    self.on_nick(&old.clone(), &new.clone());
                }
                Vec::new()
            }
            "TOPIC" => {
                if msg.args.len() >= 2 {
                    let name = self.lower(&msg.args[0]);
                    if let Some(chan) = self.channels.get_mut(&name) {
                        chan.topic = Topic {
                            text: msg.args[1].clone(),
                            set_by: msg.nick.clone(),
                            set_at: Some(chrono::Utc::now().timestamp().to_string()),
                        };
                    }
                }
                Vec::new()
            }
            "MODE" => {
                self.on_mode(msg);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_join(&mut self, msg: &Message) -> Vec<Message> {
        let (Some(nick), Some(channel)) = (msg.nick.clone(), msg.args.first().cloned()) else {
            return Vec::new();
        };
        let key = self.lower(&channel);
        if self.is_self(&nick) {
            debug!(channel = %channel, "joined");
            self.channels.insert(
                key,
                Channel {
                    name: channel.clone(),
                    ..Channel::default()
                },
            );
            // Prime the tracker: current modes and the ban list.
            return vec![
                Message::mode(&channel, None, None),
                Message::mode(&channel, Some("+b"), None),
            ];
        }
        let Some(chan) = self.channels.get_mut(&key) else {
            return Vec::new();
        };
        chan.members.insert(
            self.casemapping.lower(&nick),
            Member {
                nick,
                ident: msg.ident.clone(),
                host: msg.host.clone(),
                grade: BTreeSet::new(),
            },
        );
        Vec::new()
    }

    fn remove_from_channel(&mut self, nick: &str, channel: &str) {
        let key = self.lower(channel);
        if self.is_self(nick) {
            self.channels.remove(&key);
            return;
        }
        let nick_key = self.lower(nick);
        if let Some(chan) = self.channels.get_mut(&key) {
            chan.members.remove(&nick_key);
        }
    }

    fn on_nick(&mut self, old: &str, new: &str) {
        // Self-rename first, so lookups below use the new identity.
        if self.is_self(old) {
            self.identity.nick = new.to_string();
        }
        let old_key = self.lower(old);
        let new_key = self.lower(new);
        for chan in self.channels.values_mut() {
            if let Some(mut member) = chan.members.remove(&old_key) {
                member.nick = new.to_string();
                chan.members.insert(new_key.clone(), member);
            }
        }
    }

    fn on_mode(&mut self, msg: &Message) {
        let Some(target) = msg.args.first().cloned() else {
            return;
        };
        if msg.args.len() < 2 {
            return;
        }
        if self.is_self(&target) && !self.is_channel(&target) {
            for (sign, letter) in split_user_modes(&msg.args[1]) {
                match sign {
                    ModeSign::Plus => {
                        self.own_modes.insert(letter);
                    }
                    ModeSign::Minus => {
                        self.own_modes.remove(&letter);
                    }
                }
            }
            return;
        }
        let targets: Vec<&str> = msg.args[2..].iter().map(|s| s.as_str()).collect();
        let modes = msg.args[1].clone();
        self.apply_channel_modes(&target, &modes, &targets, msg.sender());
    }

    fn apply_channel_modes(
        &mut self,
        channel: &str,
        modes: &str,
        targets: &[&str],
        sender: Option<String>,
    ) {
        let key = self.lower(channel);
        // Prefix modes take a nick argument on both signs, same as the
        // list class, so they are folded into the list set for splitting.
        let mut list = self.chan_modes.list.clone();
        list.extend(self.prefix.modes.iter().copied());

        let changes = split_channel_modes(
            modes,
            targets,
            &list,
            &self.chan_modes.param_always,
            &self.chan_modes.param_set,
            &self.chan_modes.no_param,
        );

        let excepts_letter = self.excepts_letter;
        let prefix = self.prefix.clone();
        let mapping = self.casemapping;
        let Some(chan) = self.channels.get_mut(&key) else {
            debug!(channel = %channel, "mode change for untracked channel");
            return;
        };
        let set_by = sender.unwrap_or_default();
        let set_at = chrono::Utc::now().timestamp().to_string();

        for change in changes {
            if change.letter == 'b' {
                if let Some(mask) = change.target {
                    match change.sign {
                        ModeSign::Plus => {
                            chan.bans.insert(
                                mask,
                                ListEntry {
                                    set_by: set_by.clone(),
                                    set_at: set_at.clone(),
                                },
                            );
                        }
                        ModeSign::Minus => {
                            chan.bans.remove(&mask);
                        }
                    }
                }
            } else if change.letter == excepts_letter {
                if let Some(mask) = change.target {
                    match change.sign {
                        ModeSign::Plus => {
                            chan.excepts.insert(
                                mask,
                                ListEntry {
                                    set_by: set_by.clone(),
                                    set_at: set_at.clone(),
                                },
                            );
                        }
                        ModeSign::Minus => {
                            chan.excepts.remove(&mask);
                        }
                    }
                }
            } else if prefix.has_letter(change.letter) {
                let Some(nick) = change.target else { continue };
                let Some(member) = chan.members.get_mut(&mapping.lower(&nick)) else {
                    debug!(nick = %nick, channel = %channel, "grade change for unknown member");
                    continue;
                };
                match change.sign {
                    ModeSign::Plus => {
                        member.grade.insert(change.letter);
                    }
                    ModeSign::Minus => {
                        member.grade.remove(&change.letter);
                    }
                }
            } else {
                match change.sign {
                    ModeSign::Plus => {
                        chan.modes.insert(change.letter, change.target);
                    }
                    ModeSign::Minus => {
                        chan.modes.remove(&change.letter);
                    }
                }
            }
        }
    }
}
