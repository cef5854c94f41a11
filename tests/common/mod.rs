//! Integration test common infrastructure.
//!
//! Tests play the server: they bind a local listener, spawn the slircb
//! binary pointed at it, and script both sides of the connection.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// A spawned bot process, killed on drop.
pub struct Bot {
    child: Child,
    _data_dir: PathBuf,
}

impl Bot {
    /// Spawn the bot against `127.0.0.1:port` with extra config (autojoin,
    /// [spool], ...). Top-level keys in `extra_config` must stay at the top
    /// of the file, before any table header.
    pub fn spawn(port: u16, extra_config: &str) -> anyhow::Result<Self> {
        let data_dir = std::env::temp_dir().join(format!("slircb-test-{port}"));
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.toml");
        let config_content = format!(
            r#"
{extra_config}

[identity]
nick = "bot"
altnick = "robot"
ident = "bot"
realname = "test bot"

[[servers]]
host = "127.0.0.1"
port = {port}
"#
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_slircb"))
            .arg(&config_path)
            .spawn()
            .context("failed to spawn slircb")?;

        Ok(Bot {
            child,
            _data_dir: data_dir,
        })
    }
}

impl Drop for Bot {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// The server side of the bot's connection.
pub struct ServerConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Bind a listener on an ephemeral port.
pub async fn listen() -> anyhow::Result<(TcpListener, u16)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Accept the bot's connection.
pub async fn accept(listener: &TcpListener) -> anyhow::Result<ServerConn> {
    let (stream, _) = tokio::time::timeout(RECV_TIMEOUT, listener.accept())
        .await
        .context("bot never connected")??;
    let (read, writer) = stream.into_split();
    Ok(ServerConn {
        reader: BufReader::new(read),
        writer,
    })
}

impl ServerConn {
    /// Receive one line, CRLF stripped.
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .context("timed out waiting for a line from the bot")??;
        anyhow::ensure!(n > 0, "bot closed the connection");
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Receive lines until one satisfies `pred`, failing on anything that
    /// looks unrelated after 20 lines.
    pub async fn expect(&mut self, pred: impl Fn(&str) -> bool) -> anyhow::Result<String> {
        for _ in 0..20 {
            let line = self.recv().await?;
            if pred(&line) {
                return Ok(line);
            }
        }
        anyhow::bail!("expected line never arrived");
    }

    /// Send one line, CRLF appended.
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    /// Drive the registration handshake: wait for NICK and USER, then send
    /// the welcome burst with a standard ISUPPORT line.
    pub async fn handshake(&mut self) -> anyhow::Result<()> {
        let mut saw_nick = false;
        let mut saw_user = false;
        while !(saw_nick && saw_user) {
            let line = self.recv().await?;
            if line.starts_with("NICK ") {
                saw_nick = true;
            } else if line.starts_with("USER ") {
                saw_user = true;
            }
        }
        self.send(":test.server 001 bot :Welcome to TestNet, bot")
            .await?;
        self.send(
            ":test.server 005 bot CHANMODES=eb,k,l,imnpst PREFIX=(ov)@+ EXCEPTS \
             CASEMAPPING=ascii :are supported by this server",
        )
        .await?;
        self.send(":test.server 376 bot :End of /MOTD command.")
            .await?;
        Ok(())
    }
}
