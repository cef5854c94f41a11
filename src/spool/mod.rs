//! Reply pacing: chunking, pagination and paste escalation.
//!
//! Handler replies never go straight to the socket. The spooler renders
//! each text reply into wire-budgeted chunks; when a burst would flood the
//! channel, everything past the instant threshold is withheld behind the
//! pagination cache, and a burst past the more threshold is uploaded to a
//! paste service instead, replaced by a single link.

pub mod mores;
pub mod paste;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use slircb_proto::{Message, MessageKind, Utf8Chunker};

use crate::config::SpoolConfig;
use crate::session::Session;

use self::mores::MoreCache;
use self::paste::PasteSink;

/// Visible pagination annotation, appended to the last instant chunk.
pub fn more_suffix(n: usize) -> String {
    format!(" \u{2}({n} more)")
}

/// Payload characters that must never reach the wire: NUL and CR would
/// terminate or split the line, a leading ^A would forge a CTCP envelope.
fn filter_text(text: &str) -> String {
    let text = text.strip_prefix('\u{1}').unwrap_or(text);
    text.chars().filter(|c| !matches!(c, '\0' | '\r')).collect()
}

fn chunkable(msg: &Message) -> bool {
    matches!(msg.kind, MessageKind::PlainText | MessageKind::Notice) && msg.framed.is_none()
}

fn framed(template: &Message, chunk: Vec<u8>) -> Message {
    let mut msg = template.clone();
    msg.framed = Some(chunk);
    msg
}

fn append_suffix(msg: &mut Message, withheld: usize) {
    let suffix = more_suffix(withheld);
    match &mut msg.framed {
        Some(body) => body.extend_from_slice(suffix.as_bytes()),
        None => {
            msg.text.push_str(&suffix);
            if let Some(last) = msg.args.last_mut() {
                last.push_str(&suffix);
            }
        }
    }
}

/// Pacing stage between dispatch and the socket.
pub struct Spooler {
    config: SpoolConfig,
    mores: Arc<Mutex<MoreCache>>,
    paste: Arc<dyn PasteSink>,
}

impl Spooler {
    /// Spooler sharing the pagination cache with the dispatch layer.
    pub fn new(
        config: SpoolConfig,
        mores: Arc<Mutex<MoreCache>>,
        paste: Arc<dyn PasteSink>,
    ) -> Self {
        Spooler {
            config,
            mores,
            paste,
        }
    }

    /// Withheld chunks tolerated before escalating to a paste.
    fn max_mores(&self) -> usize {
        self.config
            .more_threshold
            .saturating_sub(self.config.instant_threshold)
    }

    /// Payload byte budget for one chunk of `msg`, leaving room for the
    /// framing the server will prepend when relaying: our full hostmask,
    /// the verb, the target and the line terminator. Until the server has
    /// echoed our host we assume the longest one allowed.
    fn line_budget(&self, session: &Session, msg: &Message) -> usize {
        let id = &session.identity;
        let mask_len = id.nick.len()
            + 1
            + id.ident.len()
            + 1
            + id.host.as_deref().map(str::len).unwrap_or(63);
        let verb = match msg.kind {
            MessageKind::Notice | MessageKind::CtcpReply => "NOTICE",
            _ => "PRIVMSG",
        };
        let recipient = msg.recipient.as_deref().map(str::len).unwrap_or(0);
        let overhead = mask_len + verb.len() + recipient + 7;
        self.config.chunk_size.saturating_sub(overhead).max(1)
    }

    /// Pace one batch of replies produced for `incoming`.
    pub async fn spool(
        &self,
        session: &Session,
        incoming: &Message,
        replies: Vec<Message>,
    ) -> Vec<Message> {
        if replies.is_empty() {
            return replies;
        }
        let instant = self.config.instant_threshold;

        // First pass: render optimistically, stopping as soon as the batch
        // is known to overflow.
        let mut out: Vec<Message> = Vec::new();
        'pass1: for reply in &replies {
            for msg in self.render(session, reply) {
                out.push(msg);
                if out.len() > instant {
                    break 'pass1;
                }
            }
        }
        if out.len() <= instant {
            return out;
        }

        // Second pass: re-render from scratch, splitting at the thresholds.
        let (mut instants, withheld) = self.paginate(session, &replies);

        if withheld.len() > self.max_mores() {
            return vec![self.escalate(session, incoming, &replies).await];
        }

        if !withheld.is_empty() {
            if let Some(last) = instants.last_mut() {
                append_suffix(last, withheld.len());
            }
            let recipient = session
                .reply_target(incoming)
                .or_else(|| replies.first().and_then(|m| m.recipient.clone()))
                .unwrap_or_default();
            match incoming.ident_host() {
                Some(key) => {
                    self.mores.lock().store(&recipient, &key, withheld);
                }
                // No hostmask means no one can ever page these out.
                None => debug!("dropping withheld chunks for senderless message"),
            }
        }

        instants
    }

    /// Render one reply at the full budget.
    fn render(&self, session: &Session, reply: &Message) -> Vec<Message> {
        if !chunkable(reply) {
            return vec![reply.clone()];
        }
        let budget = self.line_budget(session, reply);
        let filtered = filter_text(&reply.text);
        let mut out = Vec::new();
        for line in filtered.split('\n') {
            for chunk in Utf8Chunker::new(line).chunk_all(budget) {
                out.push(framed(reply, chunk));
            }
        }
        out
    }

    /// Re-render the batch, splitting into instant and withheld chunks.
    ///
    /// The chunk that will carry the pagination suffix, and everything
    /// after it, is cut at a reduced budget so the suffix still fits the
    /// wire line. Production bails one chunk past the more threshold; the
    /// caller reads an over-long withheld list as the escalation signal.
    fn paginate(&self, session: &Session, replies: &[Message]) -> (Vec<Message>, Vec<Vec<u8>>) {
        let instant = self.config.instant_threshold;
        let more_cap = self.config.more_threshold;
        let reserve = more_suffix(self.max_mores()).len();

        let mut instants: Vec<Message> = Vec::new();
        let mut withheld: Vec<Vec<u8>> = Vec::new();

        'outer: for reply in replies {
            if !chunkable(reply) {
                if instants.len() < instant {
                    instants.push(reply.clone());
                } else {
                    withheld.push(filter_text(&reply.text).into_bytes());
                }
                if instants.len() + withheld.len() > more_cap {
                    break 'outer;
                }
                continue;
            }

            let full = self.line_budget(session, reply);
            let filtered = filter_text(&reply.text);
            for line in filtered.split('\n') {
                let mut chunker = Utf8Chunker::new(line);
                loop {
                    let produced = instants.len() + withheld.len();
                    let budget = if produced + 1 >= instant {
                        full.saturating_sub(reserve).max(1)
                    } else {
                        full
                    };
                    let Some(chunk) = chunker.next_chunk(budget) else {
                        break;
                    };
                    if produced < instant {
                        instants.push(framed(reply, chunk));
                    } else {
                        withheld.push(chunk);
                    }
                    if instants.len() + withheld.len() > more_cap {
                        break 'outer;
                    }
                }
            }
        }

        (instants, withheld)
    }

    /// Replace the whole batch with a single paste link, or an apology
    /// when the upload fails.
    async fn escalate(
        &self,
        session: &Session,
        incoming: &Message,
        replies: &[Message],
    ) -> Message {
        let target = session
            .reply_target(incoming)
            .or_else(|| replies.first().and_then(|m| m.recipient.clone()))
            .unwrap_or_default();
        let body: String = replies
            .iter()
            .map(|m| filter_text(&m.text))
            .collect::<Vec<_>>()
            .join("\n");
        let lines = body.split('\n').count();
        let who = incoming.nick.as_deref().unwrap_or("you");
        let plural = if lines == 1 { "" } else { "s" };

        match self.paste.upload(&body).await {
            Ok(url) => Message::privmsg(
                &target,
                &format!("{who}: look at {url} ({lines} line{plural} long)"),
            ),
            Err(e) => {
                warn!(error = %e, "paste upload failed");
                Message::privmsg(&target, &format!("refusing to paste: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::session::Identity;
    use async_trait::async_trait;
    use std::time::Duration;

    struct OkSink;

    #[async_trait]
    impl PasteSink for OkSink {
        async fn upload(&self, _text: &str) -> Result<String, paste::PasteError> {
            Ok("https://paste.example/abc".to_string())
        }
    }

    struct FailSink;

    #[async_trait]
    impl PasteSink for FailSink {
        async fn upload(&self, _text: &str) -> Result<String, paste::PasteError> {
            Err(paste::PasteError::EmptyBody)
        }
    }

    fn session() -> Session {
        let identity = Identity::from(IdentityConfig {
            nick: "bot".to_string(),
            altnick: None,
            ident: "bot".to_string(),
            realname: "bot".to_string(),
            modes: None,
            serverpw: None,
        });
        Session::new(identity, Vec::new())
    }

    fn spooler(config: SpoolConfig, sink: Arc<dyn PasteSink>) -> Spooler {
        let mores = Arc::new(Mutex::new(MoreCache::new(Duration::from_secs(3600))));
        Spooler::new(config, mores, sink)
    }

    fn incoming() -> Message {
        Message::parse(":alice!a@host PRIVMSG #chan :)cmd")
    }

    fn lines(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::privmsg("#chan", &format!("line {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_small_batch_passes_through() {
        let s = session();
        let sp = spooler(SpoolConfig::default(), Arc::new(OkSink));
        let out = sp.spool(&s, &incoming(), lines(3)).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].framed.as_deref(), Some(b"line 0".as_slice()));
    }

    #[tokio::test]
    async fn test_long_line_is_chunked() {
        let s = session();
        let config = SpoolConfig {
            chunk_size: 120,
            ..SpoolConfig::default()
        };
        let sp = spooler(config, Arc::new(OkSink));
        // budget = 120 - (3+1+3+1+63) - 7 - 5 - 7 = 30
        let text = "x".repeat(100);
        let out = sp
            .spool(&s, &incoming(), vec![Message::privmsg("#chan", &text)])
            .await;
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].framed.as_ref().unwrap().len(), 30);
        let total: usize = out.iter().map(|m| m.framed.as_ref().unwrap().len()).sum();
        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn test_pagination_annotates_and_stores() {
        let s = session();
        let config = SpoolConfig {
            instant_threshold: 7,
            more_threshold: 12,
            ..SpoolConfig::default()
        };
        let mores = Arc::new(Mutex::new(MoreCache::new(Duration::from_secs(3600))));
        let sp = Spooler::new(config, Arc::clone(&mores), Arc::new(OkSink));

        let out = sp.spool(&s, &incoming(), lines(10)).await;
        assert_eq!(out.len(), 7);
        let last = out.last().unwrap().framed.as_ref().unwrap();
        let last = String::from_utf8(last.clone()).unwrap();
        assert_eq!(last, "line 6 \u{2}(3 more)");

        // Withheld chunks come back oldest-first, keyed by requester
        let mut cache = mores.lock();
        let (chunk, remaining) = cache.pop("#chan", "a@host").unwrap();
        assert_eq!(chunk, b"line 7".to_vec());
        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn test_escalation_replaces_batch_with_link() {
        let s = session();
        let config = SpoolConfig {
            instant_threshold: 7,
            more_threshold: 7,
            ..SpoolConfig::default()
        };
        let mores = Arc::new(Mutex::new(MoreCache::new(Duration::from_secs(3600))));
        let sp = Spooler::new(config, Arc::clone(&mores), Arc::new(OkSink));

        let out = sp.spool(&s, &incoming(), lines(8)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].text,
            "alice: look at https://paste.example/abc (8 lines long)"
        );
        // Escalation must not leave anything paginated
        assert!(mores.lock().pop("#chan", "a@host").is_none());
    }

    #[tokio::test]
    async fn test_failed_upload_refuses_visibly() {
        let s = session();
        let config = SpoolConfig {
            instant_threshold: 1,
            more_threshold: 1,
            ..SpoolConfig::default()
        };
        let sp = spooler(config, Arc::new(FailSink));
        let out = sp.spool(&s, &incoming(), lines(5)).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].text.starts_with("refusing to paste:"));
    }

    #[tokio::test]
    async fn test_control_chars_filtered() {
        let s = session();
        let sp = spooler(SpoolConfig::default(), Arc::new(OkSink));
        let out = sp
            .spool(
                &s,
                &incoming(),
                vec![Message::privmsg("#chan", "\u{1}sneaky\0 att\rack")],
            )
            .await;
        assert_eq!(out[0].framed.as_deref(), Some(b"sneaky attack".as_slice()));
    }
}
