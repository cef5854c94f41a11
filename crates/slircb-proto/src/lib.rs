//! # slircb-proto
//!
//! Protocol core for the Straylight IRC bot: wire codec, CTCP envelopes,
//! mode algebra, ISUPPORT parsing, case mapping and byte-safe text chunking.
//!
//! The crate is runtime-free; everything here is pure parsing and encoding.
//!
//! ## Quick Start
//!
//! ```rust
//! use slircb_proto::{Message, MessageKind};
//!
//! let msg = Message::parse(":nick!user@host PRIVMSG #rust :Hello!");
//! assert_eq!(msg.kind, MessageKind::PlainText);
//! assert_eq!(msg.text, "Hello!");
//!
//! let reply = Message::privmsg("#rust", "Hello yourself");
//! assert_eq!(reply.to_string(), "PRIVMSG #rust :Hello yourself");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod chunk;
pub mod ctcp;
pub mod isupport;
pub mod message;
pub mod mode;

pub use self::casemap::CaseMapping;
pub use self::chunk::{is_breakable, split_user_chars, Utf8Chunker};
pub use self::ctcp::{format_envelope, parse_envelope, CtcpEnvelope};
pub use self::isupport::{parse_entry, ChanModeClasses, IsupportEntry, PrefixSpec, TargMax};
pub use self::message::{Message, MessageKind};
pub use self::mode::{split_channel_modes, split_user_modes, ModeChange, ModeSign};
