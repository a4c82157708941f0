//! Ref advertisement collected when a connection is opened.

use crate::capabilities::Capabilities;
use crate::pktline::{PktBuffer, PktLine};
use crate::{Result, SmartError};
use gitsmart_types::ObjectId;
use serde::Serialize;
use std::io::Read;
use tracing::{debug, warn};

/// Name the server uses for its placeholder ref when it has no refs to
/// advertise but still needs a line to carry capabilities.
pub const CAPABILITIES_PLACEHOLDER: &str = "capabilities^{}";

/// A reference as advertised by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteHead {
    /// Object the reference points to.
    pub oid: ObjectId,
    /// Full reference name.
    pub name: String,
}

/// Everything the remote sent before the first exchange, in wire order.
#[derive(Debug, Clone, Default)]
pub struct RefAdvertisement {
    packets: Vec<PktLine>,
    banner: Option<String>,
    capabilities: Capabilities,
}

impl RefAdvertisement {
    /// Reads the advertisement from `reader`.
    ///
    /// Stateful peers end it with one flush. Stateless peers first send a
    /// `# service=...` banner terminated by its own flush, so two flushes are
    /// read and the banner is split off.
    pub fn read<R: Read + ?Sized>(
        buffer: &mut PktBuffer,
        reader: &mut R,
        stateless: bool,
    ) -> Result<Self> {
        let flushes = if stateless { 2 } else { 1 };
        let packets = collect(buffer, reader, flushes)?;
        Self::from_packets(packets, stateless)
    }

    /// Builds the advertisement from packets already read, flushes excluded.
    pub fn from_packets(mut packets: Vec<PktLine>, stateless: bool) -> Result<Self> {
        let banner = if stateless {
            match packets.first() {
                Some(PktLine::Comment(_)) => match packets.remove(0) {
                    PktLine::Comment(text) => Some(text),
                    _ => None,
                },
                _ => {
                    return Err(SmartError::Protocol(
                        "invalid response: missing service banner".to_string(),
                    ))
                }
            }
        } else {
            None
        };

        let capabilities = match packets.first() {
            Some(PktLine::Ref {
                capabilities: Some(caps),
                ..
            }) => Capabilities::parse(caps),
            _ => Capabilities::default(),
        };

        debug!(
            refs = packets.len(),
            multi_ack = capabilities.multi_ack,
            sideband = capabilities.sideband(),
            agent = capabilities.agent.as_deref().unwrap_or("unknown"),
            "ref advertisement received"
        );

        Ok(Self {
            packets,
            banner,
            capabilities,
        })
    }

    /// Capability table of the remote.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The `# service=...` banner of a stateless peer.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// All stored packets in arrival order.
    pub fn packets(&self) -> &[PktLine] {
        &self.packets
    }

    /// Advertised refs in arrival order, without the empty-repository placeholder.
    pub fn heads(&self) -> impl Iterator<Item = RemoteHead> + '_ {
        self.packets.iter().filter_map(|p| match p {
            PktLine::Ref { oid, name, .. } if name != CAPABILITIES_PLACEHOLDER => {
                Some(RemoteHead {
                    oid: *oid,
                    name: name.clone(),
                })
            }
            _ => None,
        })
    }

    /// First advertised ref named `name`.
    pub fn find(&self, name: &str) -> Option<RemoteHead> {
        self.heads().find(|h| h.name == name)
    }

    /// Returns true if the remote advertised no refs.
    pub fn is_empty(&self) -> bool {
        self.heads().next().is_none()
    }
}

fn collect<R: Read + ?Sized>(
    buffer: &mut PktBuffer,
    reader: &mut R,
    flushes: usize,
) -> Result<Vec<PktLine>> {
    let mut packets = Vec::new();
    let mut seen = 0;
    while seen < flushes {
        match buffer.recv(reader, |_| {})? {
            PktLine::Flush => seen += 1,
            PktLine::Err(msg) => {
                warn!(error = %msg, "remote refused the advertisement");
                return Err(SmartError::RemoteReported(msg));
            }
            packet => packets.push(packet),
        }
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::io::Cursor;

    const A: &str = "1111111111111111111111111111111111111111";
    const B: &str = "2222222222222222222222222222222222222222";

    fn encode(packets: &[PktLine]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for p in packets {
            p.encode_into(&mut out).unwrap();
        }
        out.to_vec()
    }

    fn head(oid: &str, name: &str, caps: Option<&str>) -> PktLine {
        PktLine::Ref {
            oid: ObjectId::from_hex(oid).unwrap(),
            name: name.to_string(),
            capabilities: caps.map(str::to_string),
        }
    }

    #[test]
    fn test_read_stateful() {
        let wire = encode(&[
            head(A, "HEAD", Some("multi_ack side-band-64k")),
            head(A, "refs/heads/main", None),
            head(B, "refs/tags/v1", None),
            PktLine::Flush,
        ]);
        let mut buffer = PktBuffer::new(1024);
        let adv = RefAdvertisement::read(&mut buffer, &mut Cursor::new(wire), false).unwrap();
        let names: Vec<_> = adv.heads().map(|h| h.name).collect();
        assert_eq!(names, vec!["HEAD", "refs/heads/main", "refs/tags/v1"]);
        assert!(adv.capabilities().multi_ack);
        assert!(adv.capabilities().side_band_64k);
        assert!(adv.banner().is_none());
        assert_eq!(adv.find("refs/tags/v1").unwrap().oid.to_hex(), B);
    }

    #[test]
    fn test_duplicates_kept_in_order() {
        let wire = encode(&[
            head(A, "refs/heads/x", None),
            head(B, "refs/heads/x", None),
            PktLine::Flush,
        ]);
        let mut buffer = PktBuffer::new(1024);
        let adv = RefAdvertisement::read(&mut buffer, &mut Cursor::new(wire), false).unwrap();
        assert_eq!(adv.heads().count(), 2);
        assert_eq!(adv.find("refs/heads/x").unwrap().oid.to_hex(), A);
    }

    #[test]
    fn test_read_stateless_strips_banner() {
        let wire = encode(&[
            PktLine::comment("service=git-upload-pack"),
            PktLine::Flush,
            head(A, "HEAD", Some("side-band")),
            PktLine::Flush,
        ]);
        let mut buffer = PktBuffer::new(1024);
        let adv = RefAdvertisement::read(&mut buffer, &mut Cursor::new(wire), true).unwrap();
        assert_eq!(adv.banner(), Some("# service=git-upload-pack"));
        assert_eq!(adv.packets().len(), 1);
        assert!(adv.capabilities().side_band);
    }

    #[test]
    fn test_stateless_without_banner_is_protocol_error() {
        let wire = encode(&[
            head(A, "HEAD", None),
            PktLine::Flush,
            PktLine::Flush,
        ]);
        let mut buffer = PktBuffer::new(1024);
        let err = RefAdvertisement::read(&mut buffer, &mut Cursor::new(wire), true).unwrap_err();
        assert!(matches!(err, SmartError::Protocol(_)));
    }

    #[test]
    fn test_remote_error_line() {
        let wire = encode(&[PktLine::Err("access denied".into())]);
        let mut buffer = PktBuffer::new(1024);
        let err = RefAdvertisement::read(&mut buffer, &mut Cursor::new(wire), false).unwrap_err();
        assert!(matches!(err, SmartError::RemoteReported(ref m) if m == "access denied"));
    }

    #[test]
    fn test_early_eof() {
        let wire = encode(&[head(A, "HEAD", None)]);
        let mut buffer = PktBuffer::new(1024);
        let err = RefAdvertisement::read(&mut buffer, &mut Cursor::new(wire), false).unwrap_err();
        assert!(matches!(err, SmartError::Protocol(_)));
    }

    #[test]
    fn test_empty_repository_placeholder_hidden() {
        let wire = encode(&[
            PktLine::Ref {
                oid: ObjectId::ZERO,
                name: CAPABILITIES_PLACEHOLDER.to_string(),
                capabilities: Some("report-status delete-refs".into()),
            },
            PktLine::Flush,
        ]);
        let mut buffer = PktBuffer::new(1024);
        let adv = RefAdvertisement::read(&mut buffer, &mut Cursor::new(wire), false).unwrap();
        assert!(adv.is_empty());
        assert!(adv.capabilities().report_status);
        assert!(adv.capabilities().delete_refs);
    }
}
