//! Client side of the git smart protocol.
//!
//! This crate speaks pkt-line to `git-upload-pack` and `git-receive-pack`
//! over any byte stream a [`SubTransport`] can open: it reads the ref
//! advertisement, negotiates a fetch, demultiplexes the pack download and
//! sends pushes with their report-status reply.

mod cancel;
mod capabilities;
mod config;
mod connection;
mod error;
mod negotiate;
mod pktline;
mod push;
mod receive;
mod refs;
mod transport;

pub use cancel::CancelToken;
pub use capabilities::{
    Capabilities, CAP_DELETE_REFS, CAP_INCLUDE_TAG, CAP_MULTI_ACK, CAP_OFS_DELTA,
    CAP_REPORT_STATUS, CAP_SIDE_BAND, CAP_SIDE_BAND_64K,
};
pub use config::{
    SmartConfig, DEFAULT_HAVES_PER_ROUND, DEFAULT_PROGRESS_THRESHOLD, DEFAULT_READ_BUFFER_SIZE,
};
pub use connection::SmartConnection;
pub use error::SmartError;
pub use negotiate::{
    strategy_for, walk_tips, AckStrategy, CommitWalk, LocalRef, MultiAck, NegotiationSession,
    NegotiationWire, Negotiator, Reference, SingleAck,
};
pub use pktline::{
    parse_line, AckStatus, Packet, PktBuffer, PktLine, PktLineWriter, UnpackStatus, FLUSH_PKT,
    LEN_SIZE, MAX_PKT_LEN,
};
pub use push::{build_update_request, parse_report, send_push, PushOutcome, PushSpec, PushStatus};
pub use receive::{PackReceiver, PackWriter, TransferStats};
pub use refs::{RefAdvertisement, RemoteHead, CAPABILITIES_PLACEHOLDER};
pub use transport::{Direction, Service, SubTransport};

pub use gitsmart_types::ObjectId;

/// Result type for smart protocol operations.
pub type Result<T> = std::result::Result<T, SmartError>;
