//! Git pkt-line format implementation.
//!
//! Every exchange of the smart protocol is framed as pkt-lines: a 4 character
//! lower case hex length (which counts itself) followed by the payload, or the
//! literal `0000` for a flush packet.
//!
//! Decoding is incremental. [`parse_line`] looks at whatever is buffered and
//! either yields one packet and the number of bytes it used, or reports that
//! more data must be read first. [`PktBuffer`] couples that with a reader.

use crate::{Result, SmartError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use gitsmart_types::{ObjectId, OID_HEX_LEN};
use std::io::Read;
use tracing::trace;

/// Size of the hex length prefix.
pub const LEN_SIZE: usize = 4;

/// Largest pkt-line, prefix included, that git will produce or accept.
pub const MAX_PKT_LEN: usize = 65520;

/// The flush packet.
pub const FLUSH_PKT: &[u8; 4] = b"0000";

const DONE_PKT: &[u8] = b"0009done\n";

const BAND_DATA: u8 = 1;
const BAND_PROGRESS: u8 = 2;
const BAND_ERROR: u8 = 3;

/// Status carried by an `ACK` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Bare `ACK <oid>`.
    Plain,
    /// `ACK <oid> continue`: the server wants more haves.
    Continue,
    /// `ACK <oid> common`.
    Common,
}

/// Overall result of a push as reported by `unpack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnpackStatus {
    /// `unpack ok`
    Ok,
    /// `unpack <message>`
    Failed(String),
}

/// A decoded pkt-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Flush packet (0000).
    Flush,
    /// `#`-prefixed line, e.g. the `# service=...` banner of stateless peers.
    /// The text keeps its leading `#`.
    Comment(String),
    /// An advertised reference. Capabilities only follow the first one.
    Ref {
        /// Object the reference points to.
        oid: ObjectId,
        /// Reference name.
        name: String,
        /// Raw capability string found after the NUL byte.
        capabilities: Option<String>,
    },
    /// `have <oid>`
    Have(ObjectId),
    /// `want <oid>[ <capabilities>]`
    Want {
        /// Wanted object.
        oid: ObjectId,
        /// Capabilities requested by the client, first want only.
        capabilities: Option<String>,
    },
    /// `ACK <oid>[ continue|common]`
    Ack {
        /// Acknowledged object.
        oid: ObjectId,
        /// Acknowledgement flavour.
        status: AckStatus,
    },
    /// `NAK`
    Nak,
    /// Sideband band 2, human readable progress.
    Progress(Bytes),
    /// Sideband band 1, pack data.
    Data(Bytes),
    /// `ERR <text>` or sideband band 3.
    Err(String),
    /// `ok <refname>` from report-status.
    Ok(String),
    /// `ng <refname> <reason>` from report-status.
    Ng {
        /// Rejected reference.
        reference: String,
        /// Reason given by the remote.
        reason: String,
    },
    /// `unpack ok|<error>` from report-status.
    Unpack(UnpackStatus),
}

/// Packets are what the rest of the crate exchanges.
pub type Packet = PktLine;

impl PktLine {
    /// Creates a comment packet, adding the leading `#` if missing.
    pub fn comment(text: &str) -> Self {
        if text.starts_with('#') {
            Self::Comment(text.to_string())
        } else {
            Self::Comment(format!("# {text}"))
        }
    }

    /// Returns a short name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Flush => "flush",
            Self::Comment(_) => "comment",
            Self::Ref { .. } => "ref",
            Self::Have(_) => "have",
            Self::Want { .. } => "want",
            Self::Ack { .. } => "ACK",
            Self::Nak => "NAK",
            Self::Progress(_) => "progress",
            Self::Data(_) => "data",
            Self::Err(_) => "error",
            Self::Ok(_) => "ok",
            Self::Ng { .. } => "ng",
            Self::Unpack(_) => "unpack",
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Appends the encoded packet to `out`.
    pub fn encode_into(&self, out: &mut BytesMut) -> Result<()> {
        if self.is_flush() {
            out.put_slice(FLUSH_PKT);
            return Ok(());
        }
        self.check_encodable()?;
        let payload = self.payload();
        let len = payload.len() + LEN_SIZE;
        if len > MAX_PKT_LEN {
            return Err(SmartError::WireFormat(format!(
                "{} packet of {} bytes exceeds {}",
                self.kind(),
                len,
                MAX_PKT_LEN
            )));
        }
        out.reserve(len);
        out.put_slice(format!("{:04x}", len).as_bytes());
        out.put_slice(&payload);
        Ok(())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        self.encode_into(&mut out)?;
        Ok(out.freeze())
    }

    /// Rejects packets whose text would decode as something else.
    fn check_encodable(&self) -> Result<()> {
        let problem = match self {
            Self::Comment(text) if !text.starts_with('#') => "comment must start with '#'",
            Self::Unpack(UnpackStatus::Failed(msg)) if msg == "ok" => {
                "unpack failure cannot read \"ok\""
            }
            Self::Ng { reference, .. } if reference.is_empty() || reference.contains(' ') => {
                "ng reference must be a single word"
            }
            _ => return Ok(()),
        };
        Err(SmartError::WireFormat(format!("{} packet: {problem}", self.kind())))
    }

    fn payload(&self) -> Vec<u8> {
        fn line(s: String) -> Vec<u8> {
            let mut v = s.into_bytes();
            v.push(b'\n');
            v
        }
        fn band(channel: u8, data: &[u8]) -> Vec<u8> {
            let mut v = Vec::with_capacity(data.len() + 1);
            v.push(channel);
            v.extend_from_slice(data);
            v
        }

        match self {
            Self::Flush => Vec::new(),
            Self::Comment(text) => line(text.clone()),
            Self::Ref {
                oid,
                name,
                capabilities,
            } => match capabilities {
                Some(caps) => line(format!("{oid} {name}\0{caps}")),
                None => line(format!("{oid} {name}")),
            },
            Self::Have(oid) => line(format!("have {oid}")),
            Self::Want { oid, capabilities } => match capabilities {
                Some(caps) => line(format!("want {oid} {caps}")),
                None => line(format!("want {oid}")),
            },
            Self::Ack { oid, status } => match status {
                AckStatus::Plain => line(format!("ACK {oid}")),
                AckStatus::Continue => line(format!("ACK {oid} continue")),
                AckStatus::Common => line(format!("ACK {oid} common")),
            },
            Self::Nak => line("NAK".to_string()),
            Self::Progress(data) => band(BAND_PROGRESS, data),
            Self::Data(data) => band(BAND_DATA, data),
            Self::Err(text) => line(format!("ERR {text}")),
            Self::Ok(reference) => line(format!("ok {reference}")),
            Self::Ng { reference, reason } => line(format!("ng {reference} {reason}")),
            Self::Unpack(UnpackStatus::Ok) => line("unpack ok".to_string()),
            Self::Unpack(UnpackStatus::Failed(msg)) => line(format!("unpack {msg}")),
        }
    }
}

/// Decodes the first pkt-line in `buf`.
///
/// Returns `Ok(None)` when `buf` holds less than a complete line; the caller
/// must read more and retry with the same (extended) buffer. On success the
/// second tuple field is the number of bytes the line occupied.
pub fn parse_line(buf: &[u8]) -> Result<Option<(PktLine, usize)>> {
    if buf.len() < LEN_SIZE {
        return Ok(None);
    }

    let len = parse_len(&buf[..LEN_SIZE])?;
    if len == 0 {
        return Ok(Some((PktLine::Flush, LEN_SIZE)));
    }
    if len <= LEN_SIZE {
        return Err(SmartError::WireFormat(format!(
            "length {:04x} leaves no room for a payload",
            len
        )));
    }
    if len > MAX_PKT_LEN {
        return Err(SmartError::WireFormat(format!(
            "length {} exceeds {}",
            len, MAX_PKT_LEN
        )));
    }
    if buf.len() < len {
        return Ok(None);
    }

    let packet = decode_payload(&buf[LEN_SIZE..len])?;
    Ok(Some((packet, len)))
}

fn parse_len(prefix: &[u8]) -> Result<usize> {
    let mut len = 0usize;
    for &b in prefix {
        let digit = char::from(b).to_digit(16).ok_or_else(|| {
            SmartError::WireFormat(format!(
                "invalid length prefix {:?}",
                String::from_utf8_lossy(prefix)
            ))
        })?;
        len = (len << 4) | digit as usize;
    }
    Ok(len)
}

fn decode_payload(payload: &[u8]) -> Result<PktLine> {
    match payload[0] {
        BAND_DATA => Ok(PktLine::Data(Bytes::copy_from_slice(&payload[1..]))),
        BAND_PROGRESS => Ok(PktLine::Progress(Bytes::copy_from_slice(&payload[1..]))),
        BAND_ERROR => Ok(PktLine::Err(lossy(strip_newline(&payload[1..])))),
        _ => decode_text(strip_newline(payload)),
    }
}

fn decode_text(line: &[u8]) -> Result<PktLine> {
    if let Some(rest) = line.strip_prefix(b"ACK ") {
        return decode_ack(rest);
    }
    if line == b"NAK" {
        return Ok(PktLine::Nak);
    }
    if let Some(rest) = line.strip_prefix(b"ERR ") {
        return Ok(PktLine::Err(lossy(rest)));
    }
    if line.starts_with(b"#") {
        return Ok(PktLine::Comment(lossy(line)));
    }
    if let Some(rest) = line.strip_prefix(b"ok ") {
        return Ok(PktLine::Ok(utf8(rest, "ok")?.to_string()));
    }
    if let Some(rest) = line.strip_prefix(b"ng ") {
        return decode_ng(rest);
    }
    if let Some(rest) = line.strip_prefix(b"unpack ") {
        return Ok(PktLine::Unpack(if rest == b"ok" {
            UnpackStatus::Ok
        } else {
            UnpackStatus::Failed(lossy(rest))
        }));
    }
    if let Some(rest) = line.strip_prefix(b"want ") {
        let (oid, capabilities) = decode_oid_and_tail(rest, "want")?;
        return Ok(PktLine::Want { oid, capabilities });
    }
    if let Some(rest) = line.strip_prefix(b"have ") {
        return Ok(PktLine::Have(decode_oid(rest, "have")?));
    }
    decode_ref(line)
}

fn decode_ack(rest: &[u8]) -> Result<PktLine> {
    let (oid, tail) = decode_oid_and_tail(rest, "ACK")?;
    let status = match tail.as_deref() {
        None => AckStatus::Plain,
        Some("continue") => AckStatus::Continue,
        Some("common") => AckStatus::Common,
        Some(other) => {
            return Err(SmartError::WireFormat(format!(
                "unknown ACK status {:?}",
                other
            )))
        }
    };
    Ok(PktLine::Ack { oid, status })
}

fn decode_ng(rest: &[u8]) -> Result<PktLine> {
    let space = rest
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| SmartError::WireFormat("ng line without a reason".to_string()))?;
    if space == 0 {
        return Err(SmartError::WireFormat("ng line without a reference".to_string()));
    }
    Ok(PktLine::Ng {
        reference: utf8(&rest[..space], "ng")?.to_string(),
        reason: lossy(&rest[space + 1..]),
    })
}

fn decode_ref(line: &[u8]) -> Result<PktLine> {
    if line.len() < OID_HEX_LEN + 2 || line[OID_HEX_LEN] != b' ' {
        return Err(SmartError::WireFormat(format!(
            "unrecognized line {:?}",
            String::from_utf8_lossy(line)
        )));
    }
    let oid = decode_oid(&line[..OID_HEX_LEN], "ref")?;
    let rest = &line[OID_HEX_LEN + 1..];
    let (name, capabilities) = match rest.iter().position(|&b| b == 0) {
        Some(nul) => (&rest[..nul], Some(lossy(&rest[nul + 1..]))),
        None => (rest, None),
    };
    if name.is_empty() {
        return Err(SmartError::WireFormat("ref line without a name".to_string()));
    }
    Ok(PktLine::Ref {
        oid,
        name: utf8(name, "ref")?.to_string(),
        capabilities,
    })
}

fn decode_oid(hex: &[u8], what: &str) -> Result<ObjectId> {
    ObjectId::from_hex_bytes(hex)
        .map_err(|e| SmartError::WireFormat(format!("{what} line: {e}")))
}

/// Splits `<oid>[ <tail>]`.
fn decode_oid_and_tail(rest: &[u8], what: &str) -> Result<(ObjectId, Option<String>)> {
    if rest.len() < OID_HEX_LEN {
        return Err(SmartError::WireFormat(format!("{what} line too short")));
    }
    let oid = decode_oid(&rest[..OID_HEX_LEN], what)?;
    let tail = &rest[OID_HEX_LEN..];
    match tail.split_first() {
        None => Ok((oid, None)),
        Some((b' ', tail)) => Ok((oid, Some(lossy(tail)))),
        Some(_) => Err(SmartError::WireFormat(format!(
            "{what} line: garbage after object id"
        ))),
    }
}

fn strip_newline(payload: &[u8]) -> &[u8] {
    payload.strip_suffix(b"\n").unwrap_or(payload)
}

fn utf8<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|_| SmartError::WireFormat(format!("{what} line is not valid UTF-8")))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Receive buffer sitting between a transport stream and [`parse_line`].
#[derive(Debug)]
pub struct PktBuffer {
    data: BytesMut,
    read_size: usize,
}

impl PktBuffer {
    /// Creates an empty buffer that reads at most `read_size` bytes at a time.
    pub fn new(read_size: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(read_size),
            read_size: read_size.max(1),
        }
    }

    /// Reads once from `reader` and appends what arrived.
    ///
    /// Returns the number of bytes read; zero means end of stream.
    pub fn fill<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<usize> {
        let start = self.data.len();
        self.data.resize(start + self.read_size, 0);
        let read = loop {
            match reader.read(&mut self.data[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.data.truncate(start);
                    return Err(e.into());
                }
            }
        };
        self.data.truncate(start + read);
        Ok(read)
    }

    /// Decodes and consumes the next buffered packet, if a complete one is present.
    pub fn next_packet(&mut self) -> Result<Option<PktLine>> {
        match parse_line(&self.data)? {
            Some((packet, used)) => {
                self.data.advance(used);
                trace!(kind = packet.kind(), len = used, "received pkt-line");
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    /// Returns the next packet, reading from `reader` as often as needed.
    ///
    /// `on_read` sees the size of every read, which is how download progress
    /// is metered. End of stream before a complete packet is an error.
    pub fn recv<R, F>(&mut self, reader: &mut R, mut on_read: F) -> Result<PktLine>
    where
        R: Read + ?Sized,
        F: FnMut(usize),
    {
        loop {
            if let Some(packet) = self.next_packet()? {
                return Ok(packet);
            }
            let read = self.fill(reader)?;
            on_read(read);
            if read == 0 {
                return Err(SmartError::early_eof());
            }
        }
    }

    /// Removes and returns everything buffered.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drops everything buffered.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Outgoing request assembled from pkt-lines before it is handed to the
/// transport in one write.
#[derive(Debug, Default)]
pub struct PktLineWriter {
    buf: BytesMut,
}

impl PktLineWriter {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        pkt.encode_into(&mut self.buf)
    }

    /// Writes a text line, adding the newline if it is missing.
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        if s.ends_with('\n') {
            self.write_payload(s.as_bytes())
        } else {
            let mut line = Vec::with_capacity(s.len() + 1);
            line.extend_from_slice(s.as_bytes());
            line.push(b'\n');
            self.write_payload(&line)
        }
    }

    /// Frames `payload` as is, without adding a newline.
    ///
    /// An empty payload would read as a flush and is refused.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let len = payload.len() + LEN_SIZE;
        if payload.is_empty() || len > MAX_PKT_LEN {
            return Err(SmartError::WireFormat(format!(
                "payload of {} bytes does not fit a pkt-line",
                payload.len()
            )));
        }
        self.buf.reserve(len);
        self.buf.put_slice(format!("{:04x}", len).as_bytes());
        self.buf.put_slice(payload);
        Ok(())
    }

    /// Writes `want <oid>[ <capabilities>]`.
    pub fn want(&mut self, oid: ObjectId, capabilities: Option<&str>) -> Result<()> {
        self.write(&PktLine::Want {
            oid,
            capabilities: capabilities
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    /// Writes `have <oid>`.
    pub fn have(&mut self, oid: ObjectId) -> Result<()> {
        self.write(&PktLine::Have(oid))
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) {
        self.buf.put_slice(FLUSH_PKT);
    }

    /// Writes the `done` line that ends negotiation.
    pub fn done(&mut self) {
        self.buf.put_slice(DONE_PKT);
    }

    /// The request so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Forgets everything written so far.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Returns the request, leaving the writer empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
