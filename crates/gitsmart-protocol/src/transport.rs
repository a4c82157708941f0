//! Boundary to the byte stream that carries the protocol.

use std::fmt;
use std::io::{self, Read, Write};

/// Which side of the protocol the connection drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Talk to `git-upload-pack`.
    Fetch,
    /// Talk to `git-receive-pack`.
    Push,
}

/// A request a sub-transport can be asked to open a stream for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Ref advertisement of `git-upload-pack`.
    UploadPackLs,
    /// Negotiation and pack download.
    UploadPack,
    /// Ref advertisement of `git-receive-pack`.
    ReceivePackLs,
    /// Update commands and pack upload.
    ReceivePack,
}

impl Service {
    /// Name of the program serving this request on the remote.
    pub fn program(&self) -> &'static str {
        match self {
            Self::UploadPackLs | Self::UploadPack => "git-upload-pack",
            Self::ReceivePackLs | Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Returns true for the requests that only list refs.
    pub fn is_ls(&self) -> bool {
        matches!(self, Self::UploadPackLs | Self::ReceivePackLs)
    }

    /// The advertisement request for `direction`.
    pub fn ls_for(direction: Direction) -> Self {
        match direction {
            Direction::Fetch => Self::UploadPackLs,
            Direction::Push => Self::ReceivePackLs,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Opens the streams a smart session runs over (TCP, pipe, HTTP...).
///
/// A stateful transport keeps one stream for the whole session: the stream
/// returned for the advertisement is reused for everything that follows.
/// A stateless (RPC) transport gets a fresh stream for every request, and its
/// advertisement starts with a `# service=...` banner.
pub trait SubTransport {
    /// The byte stream for one request.
    type Stream: Read + Write;

    /// Opens a stream for `service` at `url`.
    fn action(&mut self, url: &str, service: Service) -> io::Result<Self::Stream>;

    /// Returns true if every request travels on its own stream.
    fn is_stateless(&self) -> bool {
        false
    }
}

impl<T: SubTransport + ?Sized> SubTransport for &mut T {
    type Stream = T::Stream;

    fn action(&mut self, url: &str, service: Service) -> io::Result<Self::Stream> {
        (**self).action(url, service)
    }

    fn is_stateless(&self) -> bool {
        (**self).is_stateless()
    }
}
