//! Fetch negotiation.
//!
//! The client lists the objects it wants, then walks its own history newest
//! first and offers commits as `have` lines in blocks, until the server
//! acknowledges something in common or the walk runs out. A final `done`
//! tells the server to start sending the pack.
//!
//! How acknowledgements are read depends on the server dialect, which is
//! decided once from the capability table: see [`MultiAck`] and [`SingleAck`].

use crate::cancel::CancelToken;
use crate::capabilities::Capabilities;
use crate::config::SmartConfig;
use crate::pktline::{AckStatus, PktLine, PktLineWriter};
use crate::{Result, SmartError};
use gitsmart_types::ObjectId;
use tracing::{debug, trace};

const TAGS_PREFIX: &str = "refs/tags/";

/// Source of local commits, newest first.
pub trait CommitWalk {
    /// Next commit of the walk, or `None` once it is exhausted.
    fn next_commit(&mut self) -> Result<Option<ObjectId>>;
}

impl<I> CommitWalk for I
where
    I: Iterator<Item = ObjectId>,
{
    fn next_commit(&mut self) -> Result<Option<ObjectId>> {
        Ok(self.next())
    }
}

/// Target of a local reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

/// A local reference offered to [`walk_tips`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRef {
    /// Full reference name.
    pub name: String,
    /// What it points to.
    pub target: Reference,
}

/// Tips that seed the local commit walk.
///
/// Tags and symbolic references are skipped: tags may point at non-commits and
/// symbolic references only repeat a tip that is already listed.
pub fn walk_tips(refs: &[LocalRef]) -> Vec<ObjectId> {
    refs.iter()
        .filter(|r| !r.name.starts_with(TAGS_PREFIX))
        .filter_map(|r| match r.target {
            Reference::Direct(oid) => Some(oid),
            Reference::Symbolic(_) => None,
        })
        .collect()
}

/// The request/response channel negotiation runs over.
pub trait NegotiationWire {
    /// Sends one complete request.
    fn send(&mut self, request: &[u8]) -> Result<()>;

    /// Receives the next packet of the response.
    fn recv(&mut self) -> Result<PktLine>;
}

/// State accumulated by one negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationSession {
    /// Objects the server acknowledged.
    pub common: Vec<ObjectId>,
    /// Have-blocks sent before the final request.
    pub rounds: usize,
    /// Total `have` lines sent.
    pub haves_sent: usize,
}

/// Reads the server's acknowledgements in one dialect.
pub trait AckStrategy {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Reads the answer to one have-block, recording common objects.
    fn read_round(&self, wire: &mut dyn NegotiationWire, session: &mut NegotiationSession)
        -> Result<()>;

    /// Reads the answer to the final request.
    fn read_final(&self, wire: &mut dyn NegotiationWire) -> Result<()>;
}

/// `multi_ack` dialect: any number of ACKs per round, ended by a non-ACK.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiAck;

/// Simple dialect: exactly one ACK or NAK per round.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleAck;

impl AckStrategy for MultiAck {
    fn name(&self) -> &'static str {
        "multi_ack"
    }

    fn read_round(
        &self,
        wire: &mut dyn NegotiationWire,
        session: &mut NegotiationSession,
    ) -> Result<()> {
        loop {
            match wire.recv()? {
                PktLine::Ack { oid, status } => {
                    trace!(%oid, ?status, "server acknowledged");
                    session.common.push(oid);
                }
                PktLine::Err(msg) => return Err(SmartError::RemoteReported(msg)),
                _ => return Ok(()),
            }
        }
    }

    fn read_final(&self, wire: &mut dyn NegotiationWire) -> Result<()> {
        loop {
            match wire.recv()? {
                PktLine::Nak => return Ok(()),
                PktLine::Ack {
                    status: AckStatus::Continue,
                    ..
                } => continue,
                PktLine::Ack { .. } => return Ok(()),
                PktLine::Err(msg) => return Err(SmartError::RemoteReported(msg)),
                other => return Err(SmartError::unexpected(&other, "after done")),
            }
        }
    }
}

impl AckStrategy for SingleAck {
    fn name(&self) -> &'static str {
        "single-ack"
    }

    fn read_round(
        &self,
        wire: &mut dyn NegotiationWire,
        session: &mut NegotiationSession,
    ) -> Result<()> {
        match wire.recv()? {
            // The acked object is kept so a stateless replay can mention it.
            PktLine::Ack { oid, .. } => {
                session.common.push(oid);
                Ok(())
            }
            PktLine::Nak => Ok(()),
            PktLine::Err(msg) => Err(SmartError::RemoteReported(msg)),
            other => Err(SmartError::unexpected(&other, "in negotiation")),
        }
    }

    fn read_final(&self, wire: &mut dyn NegotiationWire) -> Result<()> {
        match wire.recv()? {
            PktLine::Ack { .. } | PktLine::Nak => Ok(()),
            PktLine::Err(msg) => Err(SmartError::RemoteReported(msg)),
            other => Err(SmartError::unexpected(&other, "after done")),
        }
    }
}

/// Picks the acknowledgement dialect for a capability table.
pub fn strategy_for(capabilities: &Capabilities) -> &'static dyn AckStrategy {
    if capabilities.multi_ack {
        &MultiAck
    } else {
        &SingleAck
    }
}

/// Drives one want/have exchange.
#[derive(Debug)]
pub struct Negotiator<'a> {
    config: &'a SmartConfig,
    capabilities: &'a Capabilities,
    stateless: bool,
    cancel: &'a CancelToken,
}

impl<'a> Negotiator<'a> {
    /// Creates a negotiator for a remote with the given capabilities.
    pub fn new(
        config: &'a SmartConfig,
        capabilities: &'a Capabilities,
        stateless: bool,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            config,
            capabilities,
            stateless,
            cancel,
        }
    }

    /// Negotiates `wants` against the commits produced by `walk`.
    ///
    /// Returns once the server has answered the final `done`, leaving the
    /// wire positioned at the start of the pack.
    pub fn run<W, C>(&self, wire: &mut W, wants: &[ObjectId], walk: &mut C) -> Result<NegotiationSession>
    where
        W: NegotiationWire,
        C: CommitWalk + ?Sized,
    {
        if wants.is_empty() {
            return Err(SmartError::InvalidRequest(
                "fetch without any wanted object".to_string(),
            ));
        }

        let strategy = strategy_for(self.capabilities);
        let per_round = self.config.haves_per_round.max(1);
        let mut session = NegotiationSession::default();
        let mut request = PktLineWriter::new();

        debug!(
            wants = wants.len(),
            dialect = strategy.name(),
            stateless = self.stateless,
            "starting negotiation"
        );
        self.write_wants(&mut request, wants)?;

        while let Some(oid) = walk.next_commit()? {
            request.have(oid)?;
            session.haves_sent += 1;
            let block_full = session.haves_sent % per_round == 0;

            if block_full {
                self.cancel.check()?;
                request.flush_pkt();
                wire.send(&request.take())?;
                session.rounds += 1;
                debug!(
                    round = session.rounds,
                    haves = session.haves_sent,
                    "sent have block"
                );
                strategy.read_round(wire, &mut session)?;
            }

            if !session.common.is_empty() {
                break;
            }

            // A stateless peer forgets everything between requests.
            if block_full && self.stateless {
                self.write_wants(&mut request, wants)?;
            }
        }

        if self.stateless && !session.common.is_empty() {
            self.write_wants(&mut request, wants)?;
            for oid in &session.common {
                request.have(*oid)?;
            }
        }

        request.done();
        self.cancel.check()?;
        wire.send(&request.take())?;
        debug!(
            rounds = session.rounds,
            common = session.common.len(),
            "sent done"
        );

        strategy.read_final(wire)?;
        Ok(session)
    }

    fn write_wants(&self, request: &mut PktLineWriter, wants: &[ObjectId]) -> Result<()> {
        let caps = self.capabilities.fetch_request();
        for (i, oid) in wants.iter().enumerate() {
            let caps = if i == 0 { Some(caps.as_str()) } else { None };
            request.want(*oid, caps)?;
        }
        request.flush_pkt();
        Ok(())
    }
}
