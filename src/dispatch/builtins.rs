//! Built-in commands and the stock CTCP responder.

use async_trait::async_trait;

use slircb_proto::split_user_chars;

use crate::error::{HandlerError, HandlerResult, RegistryError};
use crate::spool::more_suffix;

use super::{AsyncHandler, Context, EventKey, HandlerSpec, Registry};

const SOURCE_URL: &str = "https://github.com/sid3xyz/slircb";

/// Register every built-in into `registry`.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.command("echo", HandlerSpec::from_async(Echo))?;
    registry.command("act", HandlerSpec::from_async(Act))?;
    registry.command("reverse", HandlerSpec::from_async(Reverse))?;
    registry.command("unireverse", HandlerSpec::from_async(Unireverse))?;
    registry.command("len", HandlerSpec::from_async(Len))?;
    registry.command("unilen", HandlerSpec::from_async(Unilen))?;
    registry.command("more", HandlerSpec::from_async(More))?;
    registry.command("dump", HandlerSpec::from_async(Dump))?;
    registry.command("isin", HandlerSpec::from_async(Isin))?;
    registry.reactive(EventKey::Ctcp, HandlerSpec::from_async(CtcpResponder))?;
    Ok(())
}

/// `echo <text>`: say it back.
struct Echo;

#[async_trait]
impl AsyncHandler for Echo {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        ctx.reply(args);
        Ok(())
    }
}

/// `act <text>`: say it back as an ACTION.
struct Act;

#[async_trait]
impl AsyncHandler for Act {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        ctx.reply_action(args);
        Ok(())
    }
}

/// `reverse <text>`: codepoint-wise reversal.
struct Reverse;

#[async_trait]
impl AsyncHandler for Reverse {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        ctx.reply(&args.chars().rev().collect::<String>());
        Ok(())
    }
}

/// `unireverse <text>`: reversal over user-perceived characters, keeping
/// combining sequences and composed emoji intact.
struct Unireverse;

#[async_trait]
impl AsyncHandler for Unireverse {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        ctx.reply(&split_user_chars(args).into_iter().rev().collect::<String>());
        Ok(())
    }
}

/// `len <text>`: codepoint count.
struct Len;

#[async_trait]
impl AsyncHandler for Len {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        ctx.reply(&args.chars().count().to_string());
        Ok(())
    }
}

/// `unilen <text>`: user-perceived character count.
struct Unilen;

#[async_trait]
impl AsyncHandler for Unilen {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        ctx.reply(&split_user_chars(args).len().to_string());
        Ok(())
    }
}

/// `more`: pop the caller's oldest withheld chunk, annotated with how many
/// remain after it.
struct More;

#[async_trait]
impl AsyncHandler for More {
    async fn handle(&self, ctx: &Context<'_>, _args: &str) -> HandlerResult {
        let Some(target) = ctx.target() else {
            return Ok(());
        };
        let Some(key) = ctx.incoming.ident_host() else {
            ctx.reply("No more messages.");
            return Ok(());
        };
        let popped = ctx.mores.lock().pop(&target, &key);
        match popped {
            Some((mut chunk, remaining)) => {
                if remaining > 0 {
                    chunk.extend_from_slice(more_suffix(remaining).as_bytes());
                }
                let mut msg = slircb_proto::Message::privmsg(&target, "");
                msg.framed = Some(chunk);
                ctx.push(msg);
            }
            None => ctx.reply("No more messages."),
        }
        Ok(())
    }
}

/// `dump`: one-line summary of the tracked connection state.
struct Dump;

#[async_trait]
impl AsyncHandler for Dump {
    async fn handle(&self, ctx: &Context<'_>, _args: &str) -> HandlerResult {
        let s = ctx.session;
        let modes: String = s.own_modes.iter().collect();
        ctx.reply(&format!(
            "nick={} modes=+{} casemapping={:?} caps={} modes_per_line={} privmsg_targets={:?}",
            s.identity.nick,
            modes,
            s.casemapping,
            s.capabilities.len(),
            s.max_modes,
            s.targmax.cap("PRIVMSG"),
        ));
        let mut names: Vec<String> = s
            .channels
            .values()
            .map(|c| format!("{}({})", c.name, c.members.len()))
            .collect();
        names.sort();
        if !names.is_empty() {
            ctx.reply(&format!("channels: {}", names.join(" ")));
        }
        Ok(())
    }
}

/// `isin <nick> <channel>`: membership check against the tracker.
struct Isin;

#[async_trait]
impl AsyncHandler for Isin {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        let mut parts = args.split_whitespace();
        let (Some(nick), Some(channel)) = (parts.next(), parts.next()) else {
            return Err(HandlerError::MissingArgument("isin <nick> <channel>"));
        };
        match ctx.session.channel(channel) {
            None => ctx.reply(&format!("not tracking {channel}")),
            Some(chan) => {
                let key = ctx.session.lower(nick);
                if chan.members.contains_key(&key) {
                    ctx.reply(&format!("{nick} is in {channel}"));
                } else {
                    ctx.reply(&format!("{nick} is not in {channel}"));
                }
            }
        }
        Ok(())
    }
}

/// Answers the CTCP requests every well-behaved client answers.
struct CtcpResponder;

#[async_trait]
impl AsyncHandler for CtcpResponder {
    async fn handle(&self, ctx: &Context<'_>, args: &str) -> HandlerResult {
        match ctx.incoming.ctcp_name.as_deref() {
            Some("PING") => ctx.ctcp_reply("PING", Some(args)),
            Some("VERSION") => ctx.ctcp_reply(
                "VERSION",
                Some(&format!("slircb {}", env!("CARGO_PKG_VERSION"))),
            ),
            Some("SOURCE") => ctx.ctcp_reply("SOURCE", Some(SOURCE_URL)),
            Some("DCC") => ctx.ctcp_reply("ERRMSG", Some("DCC not supported")),
            _ => {}
        }
        Ok(())
    }
}
