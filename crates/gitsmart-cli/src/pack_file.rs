//! Pack writer storing the received pack in a file.

use gitsmart_protocol::{PackWriter, SmartError, TransferStats};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const PACK_HEADER_LEN: usize = 12;

/// Writes the pack verbatim and reads the object count from its header.
#[derive(Debug)]
pub struct FilePackWriter {
    path: PathBuf,
    out: BufWriter<File>,
    header: Vec<u8>,
    written: u64,
}

impl FilePackWriter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(File::create(path)?),
            header: Vec::with_capacity(PACK_HEADER_LEN),
            written: 0,
        })
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn read_header(&mut self, data: &[u8], stats: &mut TransferStats) -> gitsmart_protocol::Result<()> {
        if self.header.len() >= PACK_HEADER_LEN {
            return Ok(());
        }
        let missing = PACK_HEADER_LEN - self.header.len();
        self.header
            .extend_from_slice(&data[..missing.min(data.len())]);
        if self.header.len() < PACK_HEADER_LEN {
            return Ok(());
        }

        if &self.header[..4] != PACK_SIGNATURE {
            return Err(SmartError::PackWriter(format!(
                "{}: data does not start with a pack signature",
                self.path.display()
            )));
        }
        let version = u32::from_be_bytes([self.header[4], self.header[5], self.header[6], self.header[7]]);
        let objects = u32::from_be_bytes([self.header[8], self.header[9], self.header[10], self.header[11]]);
        tracing::debug!(version, objects, "pack header");
        stats.total_objects = objects;
        Ok(())
    }
}

impl PackWriter for FilePackWriter {
    fn add(&mut self, data: &[u8], stats: &mut TransferStats) -> gitsmart_protocol::Result<()> {
        self.read_header(data, stats)?;
        self.out.write_all(data).map_err(|e| {
            SmartError::PackWriter(format!("{}: {e}", self.path.display()))
        })?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn commit(&mut self, _stats: &mut TransferStats) -> gitsmart_protocol::Result<()> {
        if self.written > 0 && self.header.len() < PACK_HEADER_LEN {
            return Err(SmartError::PackWriter(format!(
                "{}: pack truncated after {} bytes",
                self.path.display(),
                self.written
            )));
        }
        self.out
            .flush()
            .and_then(|()| self.out.get_ref().sync_all())
            .map_err(|e| SmartError::PackWriter(format!("{}: {e}", self.path.display())))
    }
}
