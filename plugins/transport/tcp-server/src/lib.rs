use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

/// Listening side used by the frame receiver: bind once, hand out
/// accepted connections one at a time.
pub struct TcpServerTransport {
    addr: String,
    listener: Option<TcpListener>,
}

impl TcpServerTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            listener: None,
        }
    }

    pub async fn start(&mut self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| std::io::Error::new(e.kind(), format!("bind {}: {e}", self.addr)))?;
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "tcp-server listening");
        self.listener = Some(listener);
        Ok(local)
    }

    pub async fn next_connection(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "transport not started"))?;
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "tcp-server client connected");
        Ok((stream, peer))
    }

    pub fn stop(&mut self) {
        self.listener = None;
    }
}
