//! Capability detection.
//!
//! The server lists its capabilities once, after a NUL byte on the first
//! advertised ref. The table computed from it never changes for the rest of
//! the connection.

use serde::Serialize;

/// `ofs-delta`
pub const CAP_OFS_DELTA: &str = "ofs-delta";
/// `multi_ack`
pub const CAP_MULTI_ACK: &str = "multi_ack";
/// `include-tag`
pub const CAP_INCLUDE_TAG: &str = "include-tag";
/// `side-band-64k`
pub const CAP_SIDE_BAND_64K: &str = "side-band-64k";
/// `side-band`
pub const CAP_SIDE_BAND: &str = "side-band";
/// `delete-refs`
pub const CAP_DELETE_REFS: &str = "delete-refs";
/// `report-status`
pub const CAP_REPORT_STATUS: &str = "report-status";

const AGENT_PREFIX: &str = "agent=";

/// Features the remote advertised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Pack may contain offset deltas.
    pub ofs_delta: bool,
    /// Server acknowledges several haves per round.
    pub multi_ack: bool,
    /// Server sends annotated tags pointing into the pack.
    pub include_tag: bool,
    /// Pack is multiplexed in pkt-lines of up to 1000 bytes.
    pub side_band: bool,
    /// Pack is multiplexed in pkt-lines of up to 65520 bytes.
    pub side_band_64k: bool,
    /// Refs may be deleted by a push.
    pub delete_refs: bool,
    /// Server answers a push with a status report.
    pub report_status: bool,
    /// The remote speaks the protocol at all: set once any of `multi_ack`,
    /// `side-band`, `side-band-64k`, `include-tag` or `delete-refs` is seen.
    pub common: bool,
    /// Value of the `agent=` capability.
    pub agent: Option<String>,
}

impl Capabilities {
    /// Parses a space separated capability string.
    ///
    /// Tokens this client does not know are skipped, so servers may add new
    /// ones without breaking older clients.
    pub fn parse(caps: &str) -> Self {
        let mut out = Self::default();
        for token in caps.split(' ').filter(|t| !t.is_empty()) {
            match token {
                CAP_OFS_DELTA => out.ofs_delta = true,
                CAP_MULTI_ACK => {
                    out.multi_ack = true;
                    out.common = true;
                }
                CAP_INCLUDE_TAG => {
                    out.include_tag = true;
                    out.common = true;
                }
                // `side-band` is a prefix of `side-band-64k`; tokens are
                // matched whole so one never implies the other.
                CAP_SIDE_BAND_64K => {
                    out.side_band_64k = true;
                    out.common = true;
                }
                CAP_SIDE_BAND => {
                    out.side_band = true;
                    out.common = true;
                }
                CAP_DELETE_REFS => {
                    out.delete_refs = true;
                    out.common = true;
                }
                CAP_REPORT_STATUS => out.report_status = true,
                _ => {
                    if let Some(agent) = token.strip_prefix(AGENT_PREFIX) {
                        out.agent = Some(agent.to_string());
                    }
                }
            }
        }
        out
    }

    /// Returns true if pack data arrives multiplexed.
    pub fn sideband(&self) -> bool {
        self.side_band || self.side_band_64k
    }

    /// Capabilities the client requests on its first `want` line.
    pub fn fetch_request(&self) -> String {
        let mut tokens = Vec::with_capacity(4);
        if self.ofs_delta {
            tokens.push(CAP_OFS_DELTA);
        }
        if self.multi_ack {
            tokens.push(CAP_MULTI_ACK);
        }
        if self.side_band_64k {
            tokens.push(CAP_SIDE_BAND_64K);
        } else if self.side_band {
            tokens.push(CAP_SIDE_BAND);
        }
        if self.include_tag {
            tokens.push(CAP_INCLUDE_TAG);
        }
        tokens.join(" ")
    }
}
