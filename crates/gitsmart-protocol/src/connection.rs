//! A smart protocol session with one remote.

use crate::cancel::CancelToken;
use crate::capabilities::Capabilities;
use crate::config::SmartConfig;
use crate::negotiate::{CommitWalk, NegotiationSession, NegotiationWire, Negotiator};
use crate::pktline::{PktBuffer, PktLine};
use crate::push::{send_push, PushOutcome, PushSpec};
use crate::receive::{PackReceiver, PackWriter, TransferStats};
use crate::refs::{RefAdvertisement, RemoteHead};
use crate::transport::{Direction, Service, SubTransport};
use crate::{Result, SmartError};
use gitsmart_types::ObjectId;
use std::fmt;
use std::io::{Read, Write};
use tracing::{debug, info};

/// Connection to `git-upload-pack` or `git-receive-pack` on a remote.
///
/// Connecting reads the ref advertisement. On a stateful transport the
/// advertisement stream stays open for the rest of the session; on a
/// stateless one every request opens its own stream.
pub struct SmartConnection<T: SubTransport> {
    transport: T,
    url: String,
    direction: Direction,
    config: SmartConfig,
    stream: Option<T::Stream>,
    buffer: PktBuffer,
    advertisement: RefAdvertisement,
    cancel: CancelToken,
    connected: bool,
}

impl<T: SubTransport> SmartConnection<T> {
    /// Opens the session and reads the ref advertisement.
    pub fn connect(transport: T, url: &str, direction: Direction, config: SmartConfig) -> Result<Self> {
        config.validate()?;
        let mut conn = Self {
            transport,
            url: url.to_string(),
            direction,
            buffer: PktBuffer::new(config.read_buffer_size),
            config,
            stream: None,
            advertisement: RefAdvertisement::default(),
            cancel: CancelToken::new(),
            connected: false,
        };
        conn.open()?;
        Ok(conn)
    }

    fn open(&mut self) -> Result<()> {
        let stateless = self.transport.is_stateless();
        let service = Service::ls_for(self.direction);
        debug!(url = %self.url, service = %service, stateless, "connecting");

        self.buffer.clear();
        let mut stream = self.transport.action(&self.url, service)?;
        self.advertisement = RefAdvertisement::read(&mut self.buffer, &mut stream, stateless)?;
        self.stream = if stateless { None } else { Some(stream) };
        self.connected = true;

        info!(
            url = %self.url,
            refs = self.advertisement.heads().count(),
            "connected"
        );
        Ok(())
    }

    /// Remote URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Direction given at connect time.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Tuning in effect.
    pub fn config(&self) -> &SmartConfig {
        &self.config
    }

    /// Returns true if every request uses its own stream.
    pub fn is_stateless(&self) -> bool {
        self.transport.is_stateless()
    }

    /// The advertisement read by the last (re)connect.
    pub fn advertisement(&self) -> &RefAdvertisement {
        &self.advertisement
    }

    /// The remote's capability table.
    pub fn capabilities(&self) -> &Capabilities {
        self.advertisement.capabilities()
    }

    /// Advertised refs in arrival order.
    pub fn heads(&self) -> impl Iterator<Item = RemoteHead> + '_ {
        self.advertisement.heads()
    }

    /// Returns true between a successful connect and [`SmartConnection::close`].
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Token that cancels the negotiation or download in progress.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// A pack receiver using this connection's threshold and cancel token.
    pub fn pack_receiver<'a>(&self) -> PackReceiver<'a> {
        PackReceiver::from_config(&self.config).with_cancel(self.cancel.clone())
    }

    /// Drops the stream. The advertisement stays readable.
    pub fn close(&mut self) {
        if self.connected {
            debug!(url = %self.url, "closing connection");
        }
        self.stream = None;
        self.buffer.clear();
        self.connected = false;
    }

    /// Closes and connects again with the same transport, url and direction,
    /// replacing the advertisement.
    pub fn reconnect(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    /// Negotiates `wants` against the local history produced by `walk`.
    ///
    /// On success the pack is ready to be read with
    /// [`SmartConnection::download_pack`].
    pub fn negotiate_fetch<C>(&mut self, wants: &[ObjectId], walk: &mut C) -> Result<NegotiationSession>
    where
        C: CommitWalk + ?Sized,
    {
        self.expect(Direction::Fetch)?;
        let stateless = self.transport.is_stateless();
        let mut wire = RpcWire {
            transport: &mut self.transport,
            url: &self.url,
            stream: &mut self.stream,
            buffer: &mut self.buffer,
            stateless,
        };
        Negotiator::new(
            &self.config,
            self.advertisement.capabilities(),
            stateless,
            &self.cancel,
        )
        .run(&mut wire, wants, walk)
    }

    /// Receives the pack that follows a successful negotiation.
    pub fn download_pack<W>(
        &mut self,
        receiver: &mut PackReceiver<'_>,
        writer: &mut W,
        stats: &mut TransferStats,
    ) -> Result<()>
    where
        W: PackWriter + ?Sized,
    {
        self.expect(Direction::Fetch)?;
        let sideband = self.advertisement.capabilities().sideband();
        let stream = self.stream.as_mut().ok_or_else(no_stream)?;
        receiver.receive(sideband, &mut self.buffer, stream, writer, stats)
    }

    /// Sends `specs` followed by `pack`, then reconnects if any ref was
    /// touched so the advertisement reflects the remote's new state.
    pub fn push<P>(&mut self, specs: &[PushSpec], pack: &mut P) -> Result<PushOutcome>
    where
        P: Read + ?Sized,
    {
        self.expect(Direction::Push)?;
        if self.transport.is_stateless() {
            self.stream = Some(self.transport.action(&self.url, Service::ReceivePack)?);
            self.buffer.clear();
        }
        let stream = self.stream.as_mut().ok_or_else(no_stream)?;
        let outcome = send_push(stream, &mut self.buffer, &self.advertisement, specs, pack)?;

        if !specs.is_empty() {
            debug!(url = %self.url, "refreshing refs after push");
            self.reconnect()?;
        }
        Ok(outcome)
    }

    fn expect(&self, direction: Direction) -> Result<()> {
        if !self.connected {
            return Err(SmartError::InvalidRequest("connection is closed".to_string()));
        }
        if self.direction != direction {
            return Err(SmartError::InvalidRequest(format!(
                "connection was opened for {:?}, not {:?}",
                self.direction, direction
            )));
        }
        Ok(())
    }
}

impl<T: SubTransport> fmt::Debug for SmartConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartConnection")
            .field("url", &self.url)
            .field("direction", &self.direction)
            .field("connected", &self.connected)
            .field("capabilities", self.advertisement.capabilities())
            .finish()
    }
}

fn no_stream() -> SmartError {
    SmartError::Protocol("no open stream to the remote".to_string())
}

/// Negotiation requests over a connection's streams. Stateless transports get
/// a fresh upload-pack stream per request.
struct RpcWire<'c, T: SubTransport> {
    transport: &'c mut T,
    url: &'c str,
    stream: &'c mut Option<T::Stream>,
    buffer: &'c mut PktBuffer,
    stateless: bool,
}

impl<T: SubTransport> NegotiationWire for RpcWire<'_, T> {
    fn send(&mut self, request: &[u8]) -> Result<()> {
        if self.stateless {
            *self.stream = Some(self.transport.action(self.url, Service::UploadPack)?);
            self.buffer.clear();
        }
        let stream = self.stream.as_mut().ok_or_else(no_stream)?;
        stream.write_all(request)?;
        stream.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<PktLine> {
        let stream = self.stream.as_mut().ok_or_else(no_stream)?;
        self.buffer.recv(stream, |_| {})
    }
}
