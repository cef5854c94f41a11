//! ISUPPORT (RPL_ISUPPORT, numeric 005) token parsing.
//!
//! Servers advertise protocol parameters as `KEY[=VALUE]` tokens; a leading
//! `-` revokes a previously advertised key. This module parses the tokens
//! the client acts on: `CHANMODES`, `PREFIX`, `EXCEPTS`, `MODES`, `TARGMAX`.

use std::collections::{BTreeSet, HashMap};

/// One `KEY[=VALUE]` token, possibly a `-KEY` revocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsupportEntry {
    /// The token key, without any leading `-`.
    pub key: String,
    /// The optional value.
    pub value: Option<String>,
    /// Whether the key is being revoked.
    pub revoked: bool,
}

/// Parse a single ISUPPORT token.
///
/// Returns `None` for tokens that cannot be a key (e.g. the trailing
/// human-readable "are supported by this server" text).
pub fn parse_entry(token: &str) -> Option<IsupportEntry> {
    if token.is_empty() || token.contains(' ') {
        return None;
    }
    let (token, revoked) = match token.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (token, false),
    };
    if token.is_empty() {
        return None;
    }
    let (key, value) = match token.split_once('=') {
        Some((k, v)) => (k, Some(v.to_string())),
        None => (token, None),
    };
    Some(IsupportEntry {
        key: key.to_string(),
        value,
        revoked,
    })
}

/// The four disjoint CHANMODES classes.
///
/// - type A (`list`): list modes, argument on both signs (bans, excepts)
/// - type B (`param_always`): setting with an argument on both signs (key)
/// - type C (`param_set`): argument only when setting (limit)
/// - type D (`no_param`): flags, never an argument
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChanModeClasses {
    /// Type A list modes.
    pub list: BTreeSet<char>,
    /// Type B always-parameter modes.
    pub param_always: BTreeSet<char>,
    /// Type C set-parameter modes.
    pub param_set: BTreeSet<char>,
    /// Type D flag modes.
    pub no_param: BTreeSet<char>,
}

impl ChanModeClasses {
    /// Parse a `CHANMODES` value like `eb,k,l,imnpst`.
    ///
    /// Exactly four comma-separated class strings are expected; anything
    /// after a fourth comma is ignored. Returns `None` when fewer than four
    /// fields are declared so the caller can log and default.
    pub fn parse(value: &str) -> Option<Self> {
        let mut fields = value.splitn(5, ',');
        let a = fields.next()?;
        let b = fields.next()?;
        let c = fields.next()?;
        let d = fields.next()?;
        Some(ChanModeClasses {
            list: a.chars().collect(),
            param_always: b.chars().collect(),
            param_set: c.chars().collect(),
            no_param: d.chars().collect(),
        })
    }
}

/// Parsed `PREFIX` token: parallel sequences of mode letters and their
/// display glyphs, ordered by rank, highest privilege first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixSpec {
    /// Mode letters (e.g. `['o', 'v']`).
    pub modes: Vec<char>,
    /// Display glyphs parallel to `modes` (e.g. `['@', '+']`).
    pub literals: Vec<char>,
}

impl PrefixSpec {
    /// Parse a `PREFIX` value like `(ov)@+`.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix('(')?;
        let (modes, literals) = rest.split_once(')')?;
        let modes: Vec<char> = modes.chars().collect();
        let literals: Vec<char> = literals.chars().collect();
        if modes.len() != literals.len() {
            return None;
        }
        Some(PrefixSpec { modes, literals })
    }

    /// Map a display glyph back to its mode letter via the parallel index.
    pub fn letter_for_glyph(&self, glyph: char) -> Option<char> {
        let idx = self.literals.iter().position(|&g| g == glyph)?;
        self.modes.get(idx).copied()
    }

    /// Whether a letter is one of the advertised prefix modes.
    pub fn has_letter(&self, letter: char) -> bool {
        self.modes.contains(&letter)
    }
}

/// Parsed `TARGMAX` token: per-command target caps, `-1` meaning unlimited.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargMax {
    caps: HashMap<String, i32>,
}

impl TargMax {
    /// Parse a `TARGMAX` value like `PRIVMSG:4,NOTICE:3,JOIN:`.
    ///
    /// An absent count means unlimited and is stored as `-1`.
    pub fn parse(value: &str) -> Self {
        let mut caps = HashMap::new();
        for pair in value.split(',') {
            let Some((cmd, count)) = pair.split_once(':') else {
                continue;
            };
            if cmd.is_empty() {
                continue;
            }
            let cap = count.parse::<i32>().unwrap_or(-1);
            caps.insert(cmd.to_ascii_uppercase(), cap);
        }
        TargMax { caps }
    }

    /// The cap for a command, if the server declared one.
    pub fn cap(&self, command: &str) -> Option<i32> {
        self.caps.get(&command.to_ascii_uppercase()).copied()
    }

    /// Whether the command is subject to any target cap at all.
    pub fn is_capped(&self, command: &str) -> bool {
        self.caps.contains_key(&command.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_shapes() {
        let e = parse_entry("NETWORK=TestNet").unwrap();
        assert_eq!(e.key, "NETWORK");
        assert_eq!(e.value.as_deref(), Some("TestNet"));
        assert!(!e.revoked);

        let e = parse_entry("EXCEPTS").unwrap();
        assert_eq!(e.key, "EXCEPTS");
        assert_eq!(e.value, None);

        let e = parse_entry("-KNOCK").unwrap();
        assert_eq!(e.key, "KNOCK");
        assert!(e.revoked);

        // Trailing human-readable text is not a token
        assert!(parse_entry("are supported by this server").is_none());
        assert!(parse_entry("").is_none());
    }

    #[test]
    fn test_chanmodes_example() {
        let cm = ChanModeClasses::parse("eb,k,l,imnpst").unwrap();
        assert_eq!(cm.list, "eb".chars().collect());
        assert_eq!(cm.param_always, "k".chars().collect());
        assert_eq!(cm.param_set, "l".chars().collect());
        assert_eq!(cm.no_param, "imnpst".chars().collect());
    }

    #[test]
    fn test_chanmodes_extra_field_ignored() {
        let cm = ChanModeClasses::parse("b,k,l,imnt,xyz").unwrap();
        assert_eq!(cm.no_param, "imnt".chars().collect());
    }

    #[test]
    fn test_chanmodes_underdeclared() {
        assert!(ChanModeClasses::parse("b,k").is_none());
        assert!(ChanModeClasses::parse("").is_none());
    }

    #[test]
    fn test_prefix_example() {
        let spec = PrefixSpec::parse("(ov)@+").unwrap();
        assert_eq!(spec.modes, vec!['o', 'v']);
        assert_eq!(spec.literals, vec!['@', '+']);
        assert_eq!(spec.letter_for_glyph('@'), Some('o'));
        assert_eq!(spec.letter_for_glyph('+'), Some('v'));
        assert_eq!(spec.letter_for_glyph('%'), None);
        assert!(spec.has_letter('v'));
    }

    #[test]
    fn test_prefix_malformed() {
        assert!(PrefixSpec::parse("ov)@+").is_none());
        assert!(PrefixSpec::parse("(ov@+").is_none());
        assert!(PrefixSpec::parse("(ovh)@+").is_none());
    }

    #[test]
    fn test_targmax() {
        let tm = TargMax::parse("PRIVMSG:4,NOTICE:3,JOIN:");
        assert_eq!(tm.cap("PRIVMSG"), Some(4));
        assert_eq!(tm.cap("privmsg"), Some(4));
        assert_eq!(tm.cap("JOIN"), Some(-1));
        assert_eq!(tm.cap("KICK"), None);
        assert!(tm.is_capped("NOTICE"));
        assert!(!tm.is_capped("MODE"));
    }
}
