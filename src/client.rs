//! The connection loop: registration, then parse, track, dispatch, spool.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, trace, warn};

use slircb_proto::Message;

use crate::config::Config;
use crate::dispatch::{Dispatcher, Registry};
use crate::error::{ClientError, RegistryError};
use crate::session::{Identity, Session};
use crate::spool::mores::MoreCache;
use crate::spool::paste::DpasteClient;
use crate::spool::Spooler;
use crate::transport::Transport;

/// The bot: one connection, one session, one pipeline.
pub struct Client {
    config: Config,
    session: Session,
    dispatcher: Dispatcher,
    spooler: Spooler,
    mores: Arc<Mutex<MoreCache>>,
    registered: bool,
    nick_attempts: u32,
}

impl Client {
    /// Client with the built-in command set.
    pub fn new(config: Config) -> Result<Self, RegistryError> {
        let registry = Registry::with_builtins()?;
        Ok(Self::with_registry(config, registry))
    }

    /// Client with a caller-assembled registry.
    pub fn with_registry(config: Config, registry: Registry) -> Self {
        let identity = Identity::from(config.identity.clone());
        let session = Session::new(identity, config.autojoin.clone());
        let mores = Arc::new(Mutex::new(MoreCache::new(Duration::from_secs(
            config.spool.more_ttl_secs,
        ))));
        let paste = Arc::new(DpasteClient::new(
            &config.spool.paste_url,
            Duration::from_secs(config.spool.paste_grace_secs),
        ));
        let spooler = Spooler::new(config.spool.clone(), Arc::clone(&mores), paste);
        let dispatcher = Dispatcher::new(registry, config.commands.prefix);
        Client {
            config,
            session,
            dispatcher,
            spooler,
            mores,
            registered: false,
            nick_attempts: 0,
        }
    }

    /// Connect and run until the connection dies.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut transport = Transport::connect(&self.config.servers).await?;
        self.register(&mut transport).await?;

        loop {
            let line = {
                let next = transport.next_line();
                tokio::pin!(next);
                tokio::select! {
                    line = &mut next => Some(line?),
                    _ = tokio::signal::ctrl_c() => None,
                }
            };
            let Some(line) = line else {
                info!("interrupt received, quitting");
                transport.disconnect("interrupted").await?;
                return Ok(());
            };
            let msg = Message::parse(&line);
            trace!(kind = ?msg.kind, command = %msg.command, "recv");

            if !self.registered && msg.command == "433" {
                let nick = fallback_nick(
                    &self.config.identity.nick,
                    self.config.identity.altnick.as_deref(),
                    self.nick_attempts,
                );
                self.nick_attempts += 1;
                warn!(nick = %nick, "nickname in use, falling back");
                self.session.identity.nick = nick.clone();
                transport.send(&Message::nick(&nick)).await?;
                continue;
            }
            if msg.command == "001" {
                self.registered = true;
                // The server has the final say on our nick.
                if let Some(nick) = msg.args.first() {
                    self.session.identity.nick = nick.clone();
                }
                info!(nick = %self.session.identity.nick, "registered");
            }

            // Bookkeeping first, so handlers see post-event state; its
            // obligations (PONG, autojoin, mode queries) skip the spooler.
            for reply in self.session.apply(&msg) {
                transport.send(&reply).await?;
            }

            let replies = self
                .dispatcher
                .dispatch(&self.session, &msg, &self.mores)
                .await;
            for reply in self.spooler.spool(&self.session, &msg, replies).await {
                transport.send(&reply).await?;
            }
        }
    }

    async fn register(&mut self, transport: &mut Transport) -> Result<(), ClientError> {
        let id = &self.config.identity;
        if let Some(password) = &id.serverpw {
            transport.send(&Message::pass(password)).await?;
        }
        transport.send(&Message::nick(&id.nick)).await?;
        transport
            .send(&Message::user(&id.ident, &id.realname))
            .await?;
        Ok(())
    }
}

/// Next nick to try after a collision: the configured fallback first, then
/// time-salted variants of the primary.
fn fallback_nick(primary: &str, altnick: Option<&str>, attempts: u32) -> String {
    if attempts == 0 {
        match altnick {
            Some(alt) => alt.to_string(),
            None => format!("{primary}_"),
        }
    } else {
        let salt = chrono::Utc::now().timestamp_subsec_millis() % 1000;
        format!("{primary}{salt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_nick_progression() {
        assert_eq!(fallback_nick("bot", Some("robot"), 0), "robot");
        assert_eq!(fallback_nick("bot", None, 0), "bot_");
        let salted = fallback_nick("bot", Some("robot"), 1);
        assert!(salted.starts_with("bot"));
        assert_ne!(salted, "bot");
        assert_ne!(salted, "robot");
    }
}
