use tokio::net::TcpStream;

/// Client side of the consumer connection: one outgoing TCP stream per
/// session, no reconnects.
pub struct TcpClientTransport {
    addr: String,
}

impl TcpClientTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self { addr: format!("{host}:{port}") }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open the connection. No timeout beyond the OS default.
    pub async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("TCP connect to {}: {e}", self.addr))
        })?;
        // Frames are written whole; don't hold small ones back.
        stream.set_nodelay(true)?;
        tracing::info!(addr = %self.addr, "tcp-client connected");
        Ok(stream)
    }
}
