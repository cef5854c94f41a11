//! Mode algebra: splitting raw mode strings into discrete changes.
//!
//! Given the server-advertised CHANMODES class partition, a raw mode string
//! like `+ob-k nick` expands into `(sign, letter, target)` tuples. The
//! server is trusted to be well formed but not relied upon: argument
//! underflow and unknown letters are skipped, never panicked on.

use std::collections::BTreeSet;

/// Sign of a mode change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeSign {
    /// `+`: setting.
    Plus,
    /// `-`: removal.
    Minus,
}

/// One discrete mode change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeChange {
    /// Whether the mode is being set or removed.
    pub sign: ModeSign,
    /// The mode letter.
    pub letter: char,
    /// The consumed argument, when the letter's class requires one.
    pub target: Option<String>,
}

/// Split a channel mode string against the four CHANMODES classes.
///
/// Consumption rules:
/// - `list` (type A) letters consume one target on both signs;
/// - `param_always` (type B) and `param_set` (type C) letters consume one
///   target on `+` only — removal of a B-class setting does not repeat its
///   value in this protocol's convention;
/// - `no_param` (type D) letters never consume.
///
/// Letters in no class are dropped. Running out of targets where one is
/// required is a malformed server line; the letter is skipped silently and
/// the walk continues.
pub fn split_channel_modes(
    modes: &str,
    targets: &[&str],
    list: &BTreeSet<char>,
    param_always: &BTreeSet<char>,
    param_set: &BTreeSet<char>,
    no_param: &BTreeSet<char>,
) -> Vec<ModeChange> {
    let mut out = Vec::new();
    let mut sign = ModeSign::Plus;
    let mut targets = targets.iter();

    for c in modes.chars() {
        match c {
            '+' => sign = ModeSign::Plus,
            '-' => sign = ModeSign::Minus,
            _ if list.contains(&c)
                || (sign == ModeSign::Plus
                    && (param_always.contains(&c) || param_set.contains(&c))) =>
            {
                match targets.next() {
                    Some(target) => out.push(ModeChange {
                        sign,
                        letter: c,
                        target: Some(target.to_string()),
                    }),
                    // Argument underflow: malformed line, skip the letter.
                    None => continue,
                }
            }
            _ if param_always.contains(&c) || param_set.contains(&c) => {
                // Removal without a repeated value.
                out.push(ModeChange {
                    sign,
                    letter: c,
                    target: None,
                });
            }
            _ if no_param.contains(&c) => {
                out.push(ModeChange {
                    sign,
                    letter: c,
                    target: None,
                });
            }
            _ => {}
        }
    }

    out
}

/// Split a user mode string like `+iw-x`. User modes never take arguments.
pub fn split_user_modes(modes: &str) -> Vec<(ModeSign, char)> {
    let mut out = Vec::new();
    let mut sign = ModeSign::Plus;
    for c in modes.chars() {
        match c {
            '+' => sign = ModeSign::Plus,
            '-' => sign = ModeSign::Minus,
            _ => out.push((sign, c)),
        }
    }
    out
}
