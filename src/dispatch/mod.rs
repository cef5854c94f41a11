//! Command and reactive handler dispatch.
//!
//! Every incoming message fans out to the handlers that claimed it: an
//! addressed command (sigil-prefixed text), reactive handlers keyed on the
//! event kind, and the catch-alls. Fan-out runs concurrently, each handler
//! under a hard deadline; a handler error becomes a diagnostic reply
//! instead of ending the connection.

pub mod builtins;
pub mod nested;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use slircb_proto::{Message, MessageKind};

use crate::error::{HandlerResult, RegistryError};
use crate::session::Session;
use crate::spool::mores::MoreCache;

/// Hard per-handler deadline.
pub const HANDLER_DEADLINE: Duration = Duration::from_secs(15);

/// What a reactive handler keys on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// Any non-ACTION CTCP request.
    Ctcp,
    /// Any CTCP reply.
    CtcpReply,
    /// A CTCP ACTION.
    Action,
    /// A named command or numeric, lower-cased (e.g. "join", "001").
    Command(String),
}

impl EventKey {
    fn for_message(msg: &Message) -> EventKey {
        match msg.kind {
            MessageKind::CtcpRequest => EventKey::Ctcp,
            MessageKind::CtcpReply => EventKey::CtcpReply,
            MessageKind::Action => EventKey::Action,
            MessageKind::PlainText => EventKey::Command("privmsg".to_string()),
            MessageKind::Notice => EventKey::Command("notice".to_string()),
            _ => EventKey::Command(msg.command.to_ascii_lowercase()),
        }
    }
}

/// Shared per-event view handed to every handler.
///
/// Handlers reply through the context; the reply buffer is drained once,
/// after the whole fan-out settles, and handed to the spooler.
pub struct Context<'a> {
    /// Read-only connection state.
    pub session: &'a Session,
    /// The message being handled.
    pub incoming: &'a Message,
    /// Pagination cache, shared with the spooler.
    pub mores: Arc<Mutex<MoreCache>>,
    replies: Mutex<Vec<Message>>,
}

impl<'a> Context<'a> {
    fn new(session: &'a Session, incoming: &'a Message, mores: Arc<Mutex<MoreCache>>) -> Self {
        Context {
            session,
            incoming,
            mores,
            replies: Mutex::new(Vec::new()),
        }
    }

    /// A context over the same event with its own reply buffer, so captured
    /// output cannot mix with replies pushed by concurrent handlers.
    fn child(&self) -> Context<'a> {
        Context::new(self.session, self.incoming, Arc::clone(&self.mores))
    }

    /// Where replies to this event go.
    pub fn target(&self) -> Option<String> {
        self.session.reply_target(self.incoming)
    }

    /// Queue an arbitrary outgoing message.
    pub fn push(&self, msg: Message) {
        self.replies.lock().push(msg);
    }

    /// Text reply to the originating target.
    pub fn reply(&self, text: &str) {
        if let Some(target) = self.target() {
            self.push(Message::privmsg(&target, text));
        }
    }

    /// ACTION reply to the originating target.
    pub fn reply_action(&self, text: &str) {
        if let Some(target) = self.target() {
            self.push(Message::action(&target, text));
        }
    }

    /// CTCP reply to the originating nick.
    pub fn ctcp_reply(&self, name: &str, body: Option<&str>) {
        if let Some(nick) = &self.incoming.nick {
            self.push(Message::ctcp_reply(nick, name, body));
        }
    }

    fn into_replies(self) -> Vec<Message> {
        self.replies.into_inner()
    }
}

/// An async handler, run on the reactor.
#[async_trait]
pub trait AsyncHandler: Send + Sync {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult;
}

/// A synchronous handler. With [`ExecMode::Worker`] it runs on the
/// blocking pool so it may compute or block freely; it then sees a
/// detached snapshot of the event and its replies surface only if it
/// finishes within the deadline.
pub trait BlockingHandler: Send + Sync {
    fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult;
}

/// Where a handler runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// On the reactor, inline with the fan-out.
    Inline,
    /// On the blocking pool.
    Worker,
}

#[derive(Clone)]
enum Callable {
    Async(Arc<dyn AsyncHandler>),
    Blocking(Arc<dyn BlockingHandler>),
}

/// One registered handler with its execution mode.
#[derive(Clone)]
pub struct HandlerSpec {
    exec: ExecMode,
    callable: Callable,
}

impl HandlerSpec {
    /// Async handler, run inline.
    pub fn from_async(handler: impl AsyncHandler + 'static) -> Self {
        HandlerSpec {
            exec: ExecMode::Inline,
            callable: Callable::Async(Arc::new(handler)),
        }
    }

    /// Synchronous handler, run inline.
    pub fn from_blocking(handler: impl BlockingHandler + 'static) -> Self {
        HandlerSpec {
            exec: ExecMode::Inline,
            callable: Callable::Blocking(Arc::new(handler)),
        }
    }

    /// Move execution to the blocking pool.
    pub fn on_worker(mut self) -> Self {
        self.exec = ExecMode::Worker;
        self
    }

    fn validate(&self, name: &str) -> Result<(), RegistryError> {
        if self.exec == ExecMode::Worker && matches!(self.callable, Callable::Async(_)) {
            return Err(RegistryError::AsyncWorker(name.to_string()));
        }
        Ok(())
    }
}

/// Sanitize a command name: reject empty names and names starting with a
/// digit or underscore, and drop every character outside `[A-Za-z0-9_]`.
pub fn validate_command(name: &str) -> Option<String> {
    let first = name.chars().next()?;
    if first.is_ascii_digit() || first == '_' {
        return None;
    }
    let filtered: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if filtered.is_empty() {
        None
    } else {
        Some(filtered.to_ascii_lowercase())
    }
}

/// Explicit handler table. Nothing is discovered; everything is registered.
#[derive(Default)]
pub struct Registry {
    commands: HashMap<String, HandlerSpec>,
    reactive: HashMap<EventKey, HandlerSpec>,
    catchall: Vec<HandlerSpec>,
    unhandled: Option<HandlerSpec>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registry pre-loaded with the built-in handlers.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Registry::new();
        builtins::register(&mut registry)?;
        Ok(registry)
    }

    /// Register an addressed command.
    pub fn command(&mut self, name: &str, spec: HandlerSpec) -> Result<(), RegistryError> {
        let Some(name) = validate_command(name) else {
            return Err(RegistryError::InvalidName(name.to_string()));
        };
        spec.validate(&name)?;
        if self.commands.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.commands.insert(name, spec);
        Ok(())
    }

    /// Register a reactive handler for an event key.
    pub fn reactive(&mut self, key: EventKey, spec: HandlerSpec) -> Result<(), RegistryError> {
        spec.validate(&format!("{key:?}"))?;
        if self.reactive.contains_key(&key) {
            return Err(RegistryError::Duplicate(format!("{key:?}")));
        }
        self.reactive.insert(key, spec);
        Ok(())
    }

    /// Register a catch-all, run after everything else on every event.
    pub fn catch_all(&mut self, spec: HandlerSpec) -> Result<(), RegistryError> {
        spec.validate("catch-all")?;
        self.catchall.push(spec);
        Ok(())
    }

    /// Register the hook run when no handler claimed the event.
    pub fn on_unhandled(&mut self, spec: HandlerSpec) -> Result<(), RegistryError> {
        spec.validate("unhandled")?;
        self.unhandled = Some(spec);
        Ok(())
    }
}

/// The dispatch engine.
pub struct Dispatcher {
    registry: Registry,
    prefix: char,
    deadline: Duration,
}

impl Dispatcher {
    /// Dispatcher over `registry`, recognizing `prefix` as the command
    /// sigil.
    pub fn new(registry: Registry, prefix: char) -> Self {
        Dispatcher {
            registry,
            prefix,
            deadline: HANDLER_DEADLINE,
        }
    }

    #[cfg(test)]
    fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Fan one message out to its handlers and collect the replies.
    pub async fn dispatch(
        &self,
        session: &Session,
        msg: &Message,
        mores: &Arc<Mutex<MoreCache>>,
    ) -> Vec<Message> {
        let ctx = Context::new(session, msg, Arc::clone(mores));

        let (addressed, reacted) =
            tokio::join!(self.run_addressed(&ctx), self.run_reactive(&ctx));
        let handled = addressed || reacted;

        for spec in &self.registry.catchall {
            self.run_spec("catch-all", spec, &ctx, &msg.text).await;
        }

        if !handled {
            if let Some(spec) = &self.registry.unhandled {
                self.run_spec("unhandled", spec, &ctx, &msg.text).await;
            }
        }

        ctx.into_replies()
    }

    /// Run the addressed-command branch. Returns whether a command matched.
    async fn run_addressed(&self, ctx: &Context<'_>) -> bool {
        let msg = ctx.incoming;
        if msg.kind != MessageKind::PlainText {
            return false;
        }
        let Some(rest) = msg.text.strip_prefix(self.prefix) else {
            return false;
        };

        if let Some(body) = rest.strip_prefix(self.prefix) {
            // Doubled sigil: brace expansion first, then run each line.
            match nested::scan(body) {
                Err(e) => {
                    ctx.reply(&format!("Error: {e}"));
                    true
                }
                Ok(tree) => {
                    let exec = CtxExecutor {
                        dispatcher: self,
                        ctx,
                    };
                    let mut any = false;
                    for command in nested::expand(&tree, &exec).await {
                        any |= self.execute_command(ctx, &command).await;
                    }
                    any
                }
            }
        } else {
            self.execute_command(ctx, rest).await
        }
    }

    async fn run_reactive(&self, ctx: &Context<'_>) -> bool {
        let key = EventKey::for_message(ctx.incoming);
        let Some(spec) = self.registry.reactive.get(&key) else {
            return false;
        };
        self.run_spec(&format!("{key:?}"), spec, ctx, &ctx.incoming.text)
            .await;
        true
    }

    /// Parse and run one addressed command line. Unknown names are ignored
    /// silently; anyone may be chattering at the sigil.
    async fn execute_command(&self, ctx: &Context<'_>, line: &str) -> bool {
        let line = line.trim_start();
        let (name, args) = line.split_once(' ').unwrap_or((line, ""));
        let Some(name) = validate_command(name) else {
            return false;
        };
        let Some(spec) = self.registry.commands.get(&name) else {
            debug!(command = %name, "no such command");
            return false;
        };
        self.run_spec(&name, spec, ctx, args).await;
        true
    }

    /// Run one handler under the deadline; errors become diagnostic
    /// replies, timeouts are logged and contribute nothing.
    async fn run_spec(&self, label: &str, spec: &HandlerSpec, ctx: &Context<'_>, args: &str) {
        let outcome = match (&spec.callable, spec.exec) {
            (Callable::Async(h), _) => {
                tokio::time::timeout(self.deadline, h.handle(ctx, args))
                    .await
                    .ok()
            }
            (Callable::Blocking(h), ExecMode::Inline) => Some(h.handle(ctx, args)),
            (Callable::Blocking(h), ExecMode::Worker) => {
                self.run_worker(label, h, ctx, args).await
            }
        };
        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(handler = label, error = %e, "handler failed");
                ctx.reply(&format!("Error: {e}"));
            }
            None => {
                warn!(handler = label, deadline = ?self.deadline, "handler deadline exceeded");
            }
        }
    }

    /// Run a worker handler on the blocking pool against a detached copy of
    /// the event, so the deadline can abandon it without stalling the
    /// fan-out. Replies merge back only on completion; a timed-out worker
    /// keeps running on its thread but its output is discarded.
    async fn run_worker(
        &self,
        label: &str,
        handler: &Arc<dyn BlockingHandler>,
        ctx: &Context<'_>,
        args: &str,
    ) -> Option<HandlerResult> {
        let handler = Arc::clone(handler);
        let args = args.to_string();
        let session = ctx.session.clone();
        let incoming = ctx.incoming.clone();
        let mores = Arc::clone(&ctx.mores);
        let work = tokio::task::spawn_blocking(move || {
            let detached = Context::new(&session, &incoming, mores);
            let result = handler.handle(&detached, &args);
            (result, detached.into_replies())
        });
        match tokio::time::timeout(self.deadline, work).await {
            Ok(Ok((result, replies))) => {
                for reply in replies {
                    ctx.push(reply);
                }
                Some(result)
            }
            Ok(Err(e)) => {
                warn!(handler = label, error = %e, "worker handler panicked");
                Some(Ok(()))
            }
            Err(_) => None,
        }
    }
}

/// Executes nested sub-commands against the live registry, capturing the
/// replies they produce instead of sending them.
struct CtxExecutor<'a> {
    dispatcher: &'a Dispatcher,
    ctx: &'a Context<'a>,
}

#[async_trait]
impl nested::SubExecutor for CtxExecutor<'_> {
    async fn run(&self, command: &str) -> Vec<String> {
        let sub = self.ctx.child();
        self.dispatcher.execute_command(&sub, command).await;
        sub.into_replies()
            .into_iter()
            .map(|m| m.text)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::error::HandlerError;
    use crate::session::Identity;

    struct Echo;

    #[async_trait]
    impl AsyncHandler for Echo {
        async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
            ctx.reply(args);
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl AsyncHandler for Fail {
        async fn handle(&self, _ctx: &Context<'_>, _args: &str) -> HandlerResult {
            Err(HandlerError::Failed("boom".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl AsyncHandler for Slow {
        async fn handle(&self, ctx: &Context<'_>, _args: &str) -> HandlerResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ctx.reply("too late");
            Ok(())
        }
    }

    struct Upper;

    impl BlockingHandler for Upper {
        fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
            ctx.reply(&args.to_uppercase());
            Ok(())
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

    fn mores() -> Arc<Mutex<MoreCache>> {
        Arc::new(Mutex::new(MoreCache::new(Duration::from_secs(3600))))
    }

    async fn run(dispatcher: &Dispatcher, line: &str) -> Vec<Message> {
        let session = session();
        let cache = mores();
        dispatcher
            .dispatch(&session, &Message::parse(line), &cache)
            .await
    }

    #[test]
    fn test_validate_command() {
        assert_eq!(validate_command("echo"), Some("echo".to_string()));
        assert_eq!(validate_command("EcHo"), Some("echo".to_string()));
        assert_eq!(validate_command("e-c.h!o"), Some("echo".to_string()));
        assert_eq!(validate_command("1echo"), None);
        assert_eq!(validate_command("_echo"), None);
        assert_eq!(validate_command(""), None);
        assert_eq!(validate_command("!!!"), None);
    }

    #[test]
    fn test_async_worker_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .command("bad", HandlerSpec::from_async(Echo).on_worker())
            .unwrap_err();
        assert_eq!(err, RegistryError::AsyncWorker("bad".to_string()));

        // Blocking on the worker pool is fine
        registry
            .command("good", HandlerSpec::from_blocking(Upper).on_worker())
            .unwrap();
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        assert_eq!(
            registry
                .command("ECHO", HandlerSpec::from_async(Echo))
                .unwrap_err(),
            RegistryError::Duplicate("echo".to_string())
        );
    }

    #[tokio::test]
    async fn test_addressed_command_replies() {
        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        let d = Dispatcher::new(registry, ')');

        let out = run(&d, ":alice!a@h PRIVMSG #chan :)echo hello world").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_string(), "PRIVMSG #chan :hello world");
    }

    #[tokio::test]
    async fn test_unprefixed_text_ignored() {
        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        let d = Dispatcher::new(registry, ')');
        assert!(run(&d, ":alice!a@h PRIVMSG #chan :echo hello").await.is_empty());
    }

    #[tokio::test]
    async fn test_direct_message_replies_to_nick() {
        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        let d = Dispatcher::new(registry, ')');
        let out = run(&d, ":alice!a@h PRIVMSG bot :)echo hi").await;
        assert_eq!(out[0].to_string(), "PRIVMSG alice hi");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_diagnostic() {
        let mut registry = Registry::new();
        registry.command("fail", HandlerSpec::from_async(Fail)).unwrap();
        let d = Dispatcher::new(registry, ')');
        let out = run(&d, ":alice!a@h PRIVMSG #chan :)fail").await;
        assert_eq!(out[0].text, "Error: boom");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deadline_drops_slow_handler() {
        let mut registry = Registry::new();
        registry.command("slow", HandlerSpec::from_async(Slow)).unwrap();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        let d = Dispatcher::new(registry, ')').with_deadline(Duration::from_millis(20));
        let out = run(&d, ":alice!a@h PRIVMSG #chan :)slow").await;
        assert!(out.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_worker_handler() {
        let mut registry = Registry::new();
        registry
            .command("upper", HandlerSpec::from_blocking(Upper).on_worker())
            .unwrap();
        let d = Dispatcher::new(registry, ')');
        let out = run(&d, ":alice!a@h PRIVMSG #chan :)upper shout").await;
        assert_eq!(out[0].text, "SHOUT");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_deadline_abandons_and_discards() {
        struct Sleepy;

        impl BlockingHandler for Sleepy {
            fn handle(&self, ctx: &Context<'_>, _args: &str) -> HandlerResult {
                std::thread::sleep(Duration::from_millis(300));
                ctx.reply("too late");
                Ok(())
            }
        }

        let mut registry = Registry::new();
        registry
            .command("sleepy", HandlerSpec::from_blocking(Sleepy).on_worker())
            .unwrap();
        let d = Dispatcher::new(registry, ')').with_deadline(Duration::from_millis(20));

        let started = std::time::Instant::now();
        let out = run(&d, ":alice!a@h PRIVMSG #chan :)sleepy").await;
        // The fan-out must come back at the deadline, not the handler's
        // duration, and the late reply must never surface.
        assert!(out.is_empty());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_nested_expansion_executes_each_line() {
        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        let d = Dispatcher::new(registry, ')');
        let out = run(&d, ":alice!a@h PRIVMSG #chan :))echo {1,2,3}").await;
        let texts: Vec<&str> = out.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_nested_replies_substituted() {
        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        let d = Dispatcher::new(registry, ')');
        let out = run(&d, ":alice!a@h PRIVMSG #chan :))echo [{echo inner}]").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "[inner]");
    }

    #[tokio::test]
    async fn test_nested_capture_excludes_reactive_replies() {
        struct Chatter;

        #[async_trait]
        impl AsyncHandler for Chatter {
            async fn handle(&self, ctx: &Context<'_>, _args: &str) -> HandlerResult {
                ctx.reply("chatter");
                Ok(())
            }
        }

        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        registry
            .reactive(
                EventKey::Command("privmsg".to_string()),
                HandlerSpec::from_async(Chatter),
            )
            .unwrap();
        let d = Dispatcher::new(registry, ')');

        let out = run(&d, ":alice!a@h PRIVMSG #chan :))echo [{echo inner}]").await;
        let texts: Vec<&str> = out.iter().map(|m| m.text.as_str()).collect();
        // The reactive reply is delivered but never captured as
        // sub-command output.
        assert!(texts.contains(&"[inner]"), "{texts:?}");
        assert!(texts.contains(&"chatter"), "{texts:?}");
        assert!(!texts.iter().any(|t| t.contains("chatter") && *t != "chatter"));
    }

    #[tokio::test]
    async fn test_nested_scan_error_reported() {
        let d = Dispatcher::new(Registry::new(), ')');
        let out = run(&d, ":alice!a@h PRIVMSG #chan :))oops {{").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Error: missing 2 closing brace(s)");
    }

    #[tokio::test]
    async fn test_reactive_handler_keyed_on_kind() {
        struct OnAction;

        #[async_trait]
        impl AsyncHandler for OnAction {
            async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
                ctx.reply(&format!("saw action: {args}"));
                Ok(())
            }
        }

        let mut registry = Registry::new();
        registry
            .reactive(EventKey::Action, HandlerSpec::from_async(OnAction))
            .unwrap();
        let d = Dispatcher::new(registry, ')');
        let out = run(&d, ":alice!a@h PRIVMSG #chan :\u{1}ACTION waves\u{1}").await;
        assert_eq!(out[0].text, "saw action: waves");
    }

    #[tokio::test]
    async fn test_unhandled_hook_fires_only_when_unclaimed() {
        struct Note;

        #[async_trait]
        impl AsyncHandler for Note {
            async fn handle(&self, ctx: &Context<'_>, _args: &str) -> HandlerResult {
                ctx.reply("unclaimed");
                Ok(())
            }
        }

        let mut registry = Registry::new();
        registry.command("echo", HandlerSpec::from_async(Echo)).unwrap();
        registry.on_unhandled(HandlerSpec::from_async(Note)).unwrap();
        let d = Dispatcher::new(registry, ')');

        let out = run(&d, ":alice!a@h PRIVMSG #chan :just chatting").await;
        assert_eq!(out[0].text, "unclaimed");

        let out = run(&d, ":alice!a@h PRIVMSG #chan :)echo hi").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "hi");
    }
}
