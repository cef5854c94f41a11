//! IRC case-mapping functions.
//!
//! IRC nickname comparison is case-insensitive under a server-negotiated
//! mapping (`CASEMAPPING` in ISUPPORT). Under `rfc1459`, `{|}~` are the
//! lowercase forms of `[\]^`; `strict-rfc1459` excludes the `~`/`^` pair.
//! When the server never advertises a mapping we default to `ascii`.

/// Negotiated case mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaseMapping {
    /// Plain ASCII lowering. The default when the server is silent.
    #[default]
    Ascii,
    /// RFC 1459: `[\]^` lower to `{|}~`.
    Rfc1459,
    /// Strict RFC 1459: `[\]` lower to `{|}`, `^` is untouched.
    StrictRfc1459,
}

impl CaseMapping {
    /// Parse a `CASEMAPPING` ISUPPORT value. Unknown values return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ascii" => Some(Self::Ascii),
            "rfc1459" => Some(Self::Rfc1459),
            "strict-rfc1459" => Some(Self::StrictRfc1459),
            _ => None,
        }
    }

    /// Lower a single character under this mapping.
    #[inline]
    pub const fn lower_char(self, c: char) -> char {
        match (self, c) {
            (Self::Rfc1459 | Self::StrictRfc1459, '[') => '{',
            (Self::Rfc1459 | Self::StrictRfc1459, '\\') => '|',
            (Self::Rfc1459 | Self::StrictRfc1459, ']') => '}',
            (Self::Rfc1459, '~') => '^',
            (_, 'A'..='Z') => (c as u8 + 32) as char,
            _ => c,
        }
    }

    /// Lower a string under this mapping.
    pub fn lower(self, s: &str) -> String {
        s.chars().map(|c| self.lower_char(c)).collect()
    }

    /// Compare two strings for equality under this mapping.
    pub fn eq(self, a: &str, b: &str) -> bool {
        a.chars().count() == b.chars().count()
            && a.chars()
                .zip(b.chars())
                .all(|(ca, cb)| self.lower_char(ca) == self.lower_char(cb))
    }
}
