//! Pack download after negotiation.
//!
//! Without sideband every byte the transport delivers belongs to the pack and
//! the stream ends at EOF. With sideband the pack arrives in band 1 packets
//! mixed with band 2 progress text, and a flush ends it.

use crate::cancel::CancelToken;
use crate::config::SmartConfig;
use crate::pktline::{PktBuffer, PktLine};
use crate::{Result, SmartError};
use serde::Serialize;
use std::io::Read;
use tracing::{debug, warn};

/// Transfer counters shared between the receiver, the pack writer and the
/// progress callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    /// Bytes read from the transport, framing included.
    pub received_bytes: u64,
    /// Objects the pack writer has seen.
    pub received_objects: u32,
    /// Objects the pack writer has indexed.
    pub indexed_objects: u32,
    /// Objects the pack announces.
    pub total_objects: u32,
}

/// Destination of the downloaded pack.
pub trait PackWriter {
    /// Appends pack bytes.
    fn add(&mut self, data: &[u8], stats: &mut TransferStats) -> Result<()>;

    /// Called once after the last byte arrived.
    fn commit(&mut self, stats: &mut TransferStats) -> Result<()>;
}

impl<T: PackWriter + ?Sized> PackWriter for &mut T {
    fn add(&mut self, data: &[u8], stats: &mut TransferStats) -> Result<()> {
        (**self).add(data, stats)
    }

    fn commit(&mut self, stats: &mut TransferStats) -> Result<()> {
        (**self).commit(stats)
    }
}

type StatsCallback<'a> = Box<dyn FnMut(&TransferStats) + 'a>;
type MessageCallback<'a> = Box<dyn FnMut(&[u8]) + 'a>;

/// Feeds a pack from the wire into a [`PackWriter`].
pub struct PackReceiver<'a> {
    threshold: u64,
    on_stats: Option<StatsCallback<'a>>,
    on_progress: Option<MessageCallback<'a>>,
    cancel: CancelToken,
}

impl<'a> PackReceiver<'a> {
    /// Creates a receiver that reports stats every `threshold` received bytes.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            on_stats: None,
            on_progress: None,
            cancel: CancelToken::new(),
        }
    }

    /// Creates a receiver with the configured progress threshold.
    pub fn from_config(config: &SmartConfig) -> Self {
        Self::new(config.progress_threshold)
    }

    /// Sets the rate limited stats callback.
    pub fn on_stats(mut self, callback: impl FnMut(&TransferStats) + 'a) -> Self {
        self.on_stats = Some(Box::new(callback));
        self
    }

    /// Sets the callback receiving the remote's progress text verbatim.
    pub fn on_progress(mut self, callback: impl FnMut(&[u8]) + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Polls `cancel` before every read.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receives the whole pack.
    ///
    /// `stats` is reset first. Bytes already sitting in `buffer` count as
    /// received. On failure, whatever was already handed to `writer` is left
    /// for it to discard.
    pub fn receive<R, W>(
        &mut self,
        sideband: bool,
        buffer: &mut PktBuffer,
        reader: &mut R,
        writer: &mut W,
        stats: &mut TransferStats,
    ) -> Result<()>
    where
        R: Read + ?Sized,
        W: PackWriter + ?Sized,
    {
        *stats = TransferStats::default();
        let mut meter = Meter {
            threshold: self.threshold,
            last_fired: 0,
            callback: self.on_stats.as_mut(),
        };
        meter.record(buffer.len(), stats);

        debug!(sideband, "receiving pack");
        let result = if sideband {
            receive_sideband(
                &self.cancel,
                self.on_progress.as_mut(),
                &mut meter,
                buffer,
                reader,
                writer,
                stats,
            )
        } else {
            receive_raw(&self.cancel, &mut meter, buffer, reader, writer, stats)
        };

        meter.finish(stats);
        if let Err(e) = &result {
            warn!(error = %e, received = stats.received_bytes, "pack download failed");
        } else {
            debug!(received = stats.received_bytes, "pack received");
        }
        result
    }
}

impl std::fmt::Debug for PackReceiver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackReceiver")
            .field("threshold", &self.threshold)
            .field("on_stats", &self.on_stats.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

struct Meter<'r, 'a> {
    threshold: u64,
    last_fired: u64,
    callback: Option<&'r mut StatsCallback<'a>>,
}

impl Meter<'_, '_> {
    fn record(&mut self, read: usize, stats: &mut TransferStats) {
        stats.received_bytes += read as u64;
        if stats.received_bytes - self.last_fired > self.threshold {
            self.fire(stats);
        }
    }

    fn finish(&mut self, stats: &TransferStats) {
        if stats.received_bytes > self.last_fired {
            self.fire(stats);
        }
    }

    fn fire(&mut self, stats: &TransferStats) {
        if let Some(callback) = self.callback.as_mut() {
            self.last_fired = stats.received_bytes;
            callback(stats);
        }
    }
}

fn receive_raw<R, W>(
    cancel: &CancelToken,
    meter: &mut Meter<'_, '_>,
    buffer: &mut PktBuffer,
    reader: &mut R,
    writer: &mut W,
    stats: &mut TransferStats,
) -> Result<()>
where
    R: Read + ?Sized,
    W: PackWriter + ?Sized,
{
    loop {
        cancel.check()?;
        if !buffer.is_empty() {
            let chunk = buffer.take();
            writer.add(&chunk, stats)?;
        }
        let read = buffer.fill(reader)?;
        meter.record(read, stats);
        if read == 0 {
            break;
        }
    }
    writer.commit(stats)
}

fn receive_sideband<R, W>(
    cancel: &CancelToken,
    mut on_progress: Option<&mut MessageCallback<'_>>,
    meter: &mut Meter<'_, '_>,
    buffer: &mut PktBuffer,
    reader: &mut R,
    writer: &mut W,
    stats: &mut TransferStats,
) -> Result<()>
where
    R: Read + ?Sized,
    W: PackWriter + ?Sized,
{
    loop {
        cancel.check()?;
        let packet = buffer.recv(reader, |read| meter.record(read, stats))?;
        match packet {
            PktLine::Data(data) => writer.add(&data, stats)?,
            PktLine::Progress(text) => {
                if let Some(callback) = on_progress.as_mut() {
                    callback(&text);
                }
            }
            PktLine::Flush => break,
            PktLine::Err(msg) => return Err(SmartError::RemoteReported(msg)),
            other => return Err(SmartError::unexpected(&other, "in pack stream")),
        }
    }
    writer.commit(stats)
}
