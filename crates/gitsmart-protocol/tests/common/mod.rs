//! Scripted sub-transport shared by the integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use gitsmart_protocol::{
    ObjectId, PackWriter, PktLine, Result, Service, SubTransport, TransferStats,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

pub const URL: &str = "git://example.com/repo.git";

/// What the client did on the wire.
#[derive(Debug, Default)]
pub struct WireLog {
    /// Services requested, one per opened stream.
    pub actions: Vec<Service>,
    /// Bytes written, one entry per opened stream.
    pub written: Vec<Vec<u8>>,
}

/// Answers each `action` with the next scripted reply.
pub struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    stateless: bool,
    log: Arc<Mutex<WireLog>>,
}

impl ScriptedTransport {
    pub fn stateful(replies: Vec<Vec<u8>>) -> Self {
        Self::new(replies, false)
    }

    pub fn stateless(replies: Vec<Vec<u8>>) -> Self {
        Self::new(replies, true)
    }

    fn new(replies: Vec<Vec<u8>>, stateless: bool) -> Self {
        Self {
            replies: replies.into(),
            stateless,
            log: Arc::new(Mutex::new(WireLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<WireLog>> {
        self.log.clone()
    }
}

impl SubTransport for ScriptedTransport {
    type Stream = ScriptedStream;

    fn action(&mut self, _url: &str, service: Service) -> io::Result<ScriptedStream> {
        let reply = self.replies.pop_front().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no reply scripted for {service}"),
            )
        })?;
        let mut log = self.log.lock();
        log.actions.push(service);
        log.written.push(Vec::new());
        Ok(ScriptedStream {
            reply: Cursor::new(reply),
            log: self.log.clone(),
            id: log.written.len() - 1,
        })
    }

    fn is_stateless(&self) -> bool {
        self.stateless
    }
}

pub struct ScriptedStream {
    reply: Cursor<Vec<u8>>,
    log: Arc<Mutex<WireLog>>,
    id: usize,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reply.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.lock().written[self.id].extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pack writer keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryPack {
    pub data: Vec<u8>,
    pub adds: usize,
    pub committed: bool,
}

impl PackWriter for MemoryPack {
    fn add(&mut self, data: &[u8], _stats: &mut TransferStats) -> Result<()> {
        self.data.extend_from_slice(data);
        self.adds += 1;
        Ok(())
    }

    fn commit(&mut self, stats: &mut TransferStats) -> Result<()> {
        stats.indexed_objects = stats.received_objects;
        self.committed = true;
        Ok(())
    }
}

pub fn oid(n: u8) -> ObjectId {
    ObjectId::from_bytes([n; 20])
}

pub fn encode(packets: &[PktLine]) -> Vec<u8> {
    let mut out = BytesMut::new();
    for p in packets {
        p.encode_into(&mut out).unwrap();
    }
    out.to_vec()
}

/// Advertisement of `refs`, capabilities on the first one, ending in a flush.
pub fn advertisement(caps: &str, refs: &[(ObjectId, &str)]) -> Vec<u8> {
    let mut packets: Vec<PktLine> = refs
        .iter()
        .enumerate()
        .map(|(i, (oid, name))| PktLine::Ref {
            oid: *oid,
            name: name.to_string(),
            capabilities: (i == 0).then(|| caps.to_string()),
        })
        .collect();
    packets.push(PktLine::Flush);
    encode(&packets)
}

/// Stateless advertisement: service banner and its flush first.
pub fn rpc_advertisement(service: &str, caps: &str, refs: &[(ObjectId, &str)]) -> Vec<u8> {
    let mut out = encode(&[PktLine::comment(&format!("service={service}")), PktLine::Flush]);
    out.extend(advertisement(caps, refs));
    out
}

