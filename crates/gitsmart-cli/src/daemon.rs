//! Sub-transport for `git daemon` over TCP.
//!
//! The daemon protocol is stateful: one socket carries the advertisement and
//! everything after it. Each stream starts with a single request line naming
//! the service and repository.

use crate::url::GitUrl;
use gitsmart_protocol::{PktLineWriter, Service, SubTransport};
use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Opens `git://` connections.
#[derive(Debug)]
pub struct DaemonTransport {
    url: GitUrl,
    timeout: Option<Duration>,
}

impl DaemonTransport {
    pub fn new(url: GitUrl) -> Self {
        Self { url, timeout: None }
    }

    /// Read timeout applied to every socket.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl SubTransport for DaemonTransport {
    type Stream = TcpStream;

    fn action(&mut self, _url: &str, service: Service) -> io::Result<TcpStream> {
        let request = request_line(&self.url, service)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let addr = self.url.socket_addr();
        tracing::debug!(addr = %addr, service = %service, "opening daemon connection");
        let mut stream = TcpStream::connect(&addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.timeout)?;
        io::Write::write_all(&mut stream, &request)?;
        Ok(stream)
    }
}

/// `<len>git-upload-pack /path\0host=<host>\0`
pub fn request_line(url: &GitUrl, service: Service) -> gitsmart_protocol::Result<Vec<u8>> {
    let payload = format!(
        "{} {}\0host={}\0",
        service.program(),
        url.path,
        url.host_param()
    );
    let mut writer = PktLineWriter::new();
    writer.write_payload(payload.as_bytes())?;
    Ok(writer.take().to_vec())
}
