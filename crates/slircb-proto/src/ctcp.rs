//! CTCP (Client-to-Client Protocol) envelope handling.
//!
//! CTCP requests and replies travel inside the trailing parameter of a
//! PRIVMSG or NOTICE, wrapped in `\x01` delimiters: `\x01NAME[ body]\x01`.
//!
//! # Reference
//! - CTCP specification: <https://modern.ircdocs.horse/ctcp.html>

/// The CTCP delimiter character (`\x01`).
pub const CTCP_DELIM: char = '\x01';

/// A CTCP envelope extracted from a PRIVMSG/NOTICE trailing parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CtcpEnvelope<'a> {
    /// The CTCP command name, normalized to uppercase.
    pub name: String,
    /// Optional body following the name.
    pub body: Option<&'a str>,
}

/// Bytes that may never appear inside a CTCP envelope.
fn forbidden(c: char) -> bool {
    matches!(c, '\x00' | '\x01' | '\r' | '\n')
}

/// Parse a CTCP envelope from a message body.
///
/// Returns `None` unless the text is wrapped in `\x01` on both ends and the
/// name/body are free of NUL, CR, LF and embedded delimiters.
///
/// # Example
///
/// ```
/// use slircb_proto::ctcp::parse_envelope;
///
/// let env = parse_envelope("\x01ACTION waves hello\x01").unwrap();
/// assert_eq!(env.name, "ACTION");
/// assert_eq!(env.body, Some("waves hello"));
/// ```
pub fn parse_envelope(text: &str) -> Option<CtcpEnvelope<'_>> {
    let inner = text.strip_prefix(CTCP_DELIM)?.strip_suffix(CTCP_DELIM)?;
    if inner.is_empty() {
        return None;
    }

    let (name, body) = match inner.split_once(' ') {
        Some((name, body)) => (name, (!body.is_empty()).then_some(body)),
        None => (inner, None),
    };

    if name.is_empty() || name.chars().any(|c| forbidden(c) || c == ' ') {
        return None;
    }
    if body.is_some_and(|b| b.chars().any(forbidden)) {
        return None;
    }

    Some(CtcpEnvelope {
        name: name.to_ascii_uppercase(),
        body,
    })
}

/// Wrap a CTCP name and optional body into its wire envelope.
pub fn format_envelope(name: &str, body: Option<&str>) -> String {
    match body {
        Some(body) if !body.is_empty() => format!("{CTCP_DELIM}{name} {body}{CTCP_DELIM}"),
        _ => format!("{CTCP_DELIM}{name}{CTCP_DELIM}"),
    }
}
