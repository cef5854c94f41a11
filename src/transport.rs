//! Server connection: failover, TLS, line framing and charset fallback.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, info, warn};

use slircb_proto::Message;

use crate::config::ServerEntry;
use crate::error::ClientError;

enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// One live server connection.
pub struct Transport {
    stream: Stream,
    rbuf: BytesMut,
}

impl Transport {
    /// Try each configured server in order until one accepts.
    pub async fn connect(servers: &[ServerEntry]) -> Result<Self, ClientError> {
        for server in servers {
            match Self::connect_one(server).await {
                Ok(transport) => {
                    info!(host = %server.host, port = server.port, tls = server.tls, "connected");
                    return Ok(transport);
                }
                Err(e) => {
                    warn!(host = %server.host, port = server.port, error = %e, "connect failed");
                }
            }
        }
        Err(ClientError::AllServersFailed)
    }

    async fn connect_one(server: &ServerEntry) -> Result<Self, ClientError> {
        let tcp = TcpStream::connect((server.host.as_str(), server.port)).await?;
        let stream = if server.tls {
            if !server.verify_cert {
                warn!(host = %server.host, "verify_cert = false is not supported, verifying anyway");
            }
            let connector = tls_connector()?;
            let name = ServerName::try_from(server.host.clone())
                .map_err(|e| ClientError::Tls(e.to_string()))?;
            Stream::Tls(Box::new(connector.connect(name, tcp).await?))
        } else {
            Stream::Plain(tcp)
        };
        Ok(Transport {
            stream,
            rbuf: BytesMut::with_capacity(8192),
        })
    }

    /// Next complete line from the server. Empty lines are skipped; a
    /// zero-length read means the peer hung up.
    pub async fn next_line(&mut self) -> Result<String, ClientError> {
        loop {
            if let Some(line) = take_line(&mut self.rbuf) {
                return Ok(line);
            }
            let n = match &mut self.stream {
                Stream::Plain(s) => s.read_buf(&mut self.rbuf).await?,
                Stream::Tls(s) => s.read_buf(&mut self.rbuf).await?,
            };
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    /// Encode and send one message.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        let mut bytes = msg.to_wire_bytes();
        debug!(line = %String::from_utf8_lossy(&bytes), "send");
        bytes.extend_from_slice(b"\r\n");
        match &mut self.stream {
            Stream::Plain(s) => s.write_all(&bytes).await?,
            Stream::Tls(s) => s.write_all(&bytes).await?,
        }
        Ok(())
    }

    /// Say QUIT and close the stream.
    pub async fn disconnect(&mut self, reason: &str) -> Result<(), ClientError> {
        self.send(&Message::quit(reason)).await?;
        match &mut self.stream {
            Stream::Plain(s) => s.shutdown().await?,
            Stream::Tls(s) => s.shutdown().await?,
        }
        Ok(())
    }
}

fn tls_connector() -> Result<TlsConnector, ClientError> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(error = %error, "skipping unreadable root certificate");
    }
    for cert in native.certs {
        let _ = roots.add(cert);
    }
    if roots.is_empty() {
        return Err(ClientError::Tls(
            "no trusted root certificates found".to_string(),
        ));
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Pull the next complete non-empty line out of the read buffer, leaving
/// any trailing partial fragment in place.
fn take_line(rbuf: &mut BytesMut) -> Option<String> {
    while let Some(pos) = rbuf.iter().position(|&b| b == b'\n') {
        let line = rbuf.split_to(pos + 1);
        let line = &line[..line.len() - 1];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        return Some(decode_line(line));
    }
    None
}

/// Servers are supposed to send UTF-8; the ones that do not are almost
/// always Latin-9, so that is the fallback.
fn decode_line(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::ISO_8859_15.decode(bytes);
            text.into_owned()
        }
    }
}
