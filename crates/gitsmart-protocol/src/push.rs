//! Push: update commands, pack upload and the report-status reply.

use crate::capabilities::{Capabilities, CAP_REPORT_STATUS};
use crate::pktline::{PktBuffer, PktLine, UnpackStatus, FLUSH_PKT, LEN_SIZE, MAX_PKT_LEN};
use crate::refs::RefAdvertisement;
use crate::{Result, SmartError};
use bytes::{BufMut, Bytes, BytesMut};
use gitsmart_types::{ObjectId, OID_HEX_LEN};
use serde::Serialize;
use std::io::{self, Read, Write};
use tracing::{debug, warn};

/// One reference update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    /// Object the remote ref should point to afterwards.
    pub local_oid: ObjectId,
    /// Object the remote ref points to now; zero creates the ref.
    pub remote_oid: ObjectId,
    /// Local source ref; `None` deletes the remote ref.
    pub local_ref: Option<String>,
    /// Remote ref to update; defaults to `local_ref`.
    pub remote_ref: Option<String>,
}

impl PushSpec {
    /// Updates `name` on the remote from `old` to `new`.
    pub fn update(name: &str, old: ObjectId, new: ObjectId) -> Self {
        Self {
            local_oid: new,
            remote_oid: old,
            local_ref: Some(name.to_string()),
            remote_ref: None,
        }
    }

    /// Creates `name` on the remote at `new`.
    pub fn create(name: &str, new: ObjectId) -> Self {
        Self::update(name, ObjectId::ZERO, new)
    }

    /// Deletes `name` on the remote.
    pub fn delete(name: &str) -> Self {
        Self {
            local_oid: ObjectId::ZERO,
            remote_oid: ObjectId::ZERO,
            local_ref: None,
            remote_ref: Some(name.to_string()),
        }
    }

    /// Name of the remote ref this spec updates.
    pub fn target(&self) -> Option<&str> {
        self.remote_ref.as_deref().or(self.local_ref.as_deref())
    }

    /// Returns true if the spec removes the remote ref.
    pub fn is_delete(&self) -> bool {
        self.local_ref.is_none()
    }
}

/// Per-ref result from the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushStatus {
    /// The remote ref.
    pub reference: String,
    /// Rejection reason; `None` if the ref was updated.
    pub message: Option<String>,
}

impl PushStatus {
    /// Returns true if the remote updated the ref.
    pub fn is_ok(&self) -> bool {
        self.message.is_none()
    }
}

/// Everything learned from a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    /// The remote unpacked the pack.
    pub unpack_ok: bool,
    /// Text of a failed `unpack` line.
    pub unpack_error: Option<String>,
    /// Per-ref results in the order the remote sent them.
    pub statuses: Vec<PushStatus>,
}

impl PushOutcome {
    /// Outcome of a push that had no reply to parse.
    pub fn assumed_ok() -> Self {
        Self {
            unpack_ok: true,
            ..Self::default()
        }
    }

    /// Refs the remote refused.
    pub fn rejected(&self) -> impl Iterator<Item = &PushStatus> {
        self.statuses.iter().filter(|s| !s.is_ok())
    }

    /// Fails with [`SmartError::RemoteReported`] if the pack was not unpacked.
    pub fn into_result(self) -> Result<Self> {
        if self.unpack_ok {
            Ok(self)
        } else {
            Err(SmartError::RemoteReported(
                self.unpack_error
                    .unwrap_or_else(|| "remote did not unpack the pack".to_string()),
            ))
        }
    }
}

/// Builds the update command block sent before the pack.
///
/// Deletions look up the current remote oid in `advertisement` and need the
/// peer's `delete-refs`.
pub fn build_update_request(
    specs: &[PushSpec],
    advertisement: &RefAdvertisement,
) -> Result<Bytes> {
    let caps = advertisement.capabilities();
    let mut out = BytesMut::new();

    for (i, spec) in specs.iter().enumerate() {
        let name = spec
            .target()
            .ok_or_else(|| SmartError::InvalidRequest("push spec names no ref".to_string()))?;
        let (old, new) = if spec.is_delete() {
            if !caps.delete_refs {
                return Err(SmartError::InvalidRequest(format!(
                    "cannot delete {name}: remote does not support delete-refs"
                )));
            }
            let head = advertisement.find(name).ok_or_else(|| {
                SmartError::InvalidRequest(format!("cannot delete {name}: no such remote ref"))
            })?;
            (head.oid, ObjectId::ZERO)
        } else {
            (spec.remote_oid, spec.local_oid)
        };

        let report = i == 0 && caps.report_status;
        put_command(&mut out, old, new, name, report)?;
    }

    out.put_slice(FLUSH_PKT);
    Ok(out.freeze())
}

fn put_command(
    out: &mut BytesMut,
    old: ObjectId,
    new: ObjectId,
    name: &str,
    report: bool,
) -> Result<()> {
    let mut len = LEN_SIZE + OID_HEX_LEN + 1 + OID_HEX_LEN + 1 + name.len() + 1;
    if report {
        len += 1 + CAP_REPORT_STATUS.len();
    }
    if len > MAX_PKT_LEN {
        return Err(SmartError::WireFormat(format!(
            "update command for {name} exceeds {MAX_PKT_LEN} bytes"
        )));
    }

    let start = out.len();
    out.reserve(len);
    out.put_slice(format!("{len:04x}{old} {new} {name}").as_bytes());
    if report {
        out.put_u8(0);
        out.put_slice(CAP_REPORT_STATUS.as_bytes());
    }
    out.put_u8(b'\n');
    debug_assert_eq!(out.len() - start, len);
    Ok(())
}

/// Reads the report-status reply up to its flush.
pub fn parse_report<R: Read + ?Sized>(
    buffer: &mut PktBuffer,
    reader: &mut R,
) -> Result<PushOutcome> {
    let mut outcome = PushOutcome::default();
    loop {
        match buffer.recv(reader, |_| {})? {
            PktLine::Ok(reference) => outcome.statuses.push(PushStatus {
                reference,
                message: None,
            }),
            PktLine::Ng { reference, reason } => {
                warn!(reference = %reference, reason = %reason, "remote rejected ref");
                outcome.statuses.push(PushStatus {
                    reference,
                    message: Some(reason),
                });
            }
            PktLine::Unpack(UnpackStatus::Ok) => outcome.unpack_ok = true,
            PktLine::Unpack(UnpackStatus::Failed(msg)) => {
                warn!(error = %msg, "remote failed to unpack");
                outcome.unpack_ok = false;
                outcome.unpack_error = Some(msg);
            }
            PktLine::Flush => return Ok(outcome),
            other => return Err(SmartError::unexpected(&other, "in push report")),
        }
    }
}

/// Runs a push over an open receive-pack `stream`.
///
/// The pack is copied to the stream verbatim after the update commands. The
/// reply is only read when there were updates and the peer reports status.
pub fn send_push<S, P>(
    stream: &mut S,
    buffer: &mut PktBuffer,
    advertisement: &RefAdvertisement,
    specs: &[PushSpec],
    pack: &mut P,
) -> Result<PushOutcome>
where
    S: Read + Write + ?Sized,
    P: Read + ?Sized,
{
    let request = build_update_request(specs, advertisement)?;
    stream.write_all(&request)?;
    let pack_len = io::copy(pack, stream)?;
    stream.flush()?;
    debug!(
        updates = specs.len(),
        request_len = request.len(),
        pack_len,
        "push sent"
    );

    if !expects_report(specs, advertisement.capabilities()) {
        return Ok(PushOutcome::assumed_ok());
    }
    let outcome = parse_report(buffer, stream)?;
    debug!(
        unpack_ok = outcome.unpack_ok,
        rejected = outcome.rejected().count(),
        "push report received"
    );
    Ok(outcome)
}

fn expects_report(specs: &[PushSpec], caps: &Capabilities) -> bool {
    !specs.is_empty() && caps.report_status
}
