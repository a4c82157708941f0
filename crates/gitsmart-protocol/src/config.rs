//! Tuning knobs for the smart protocol.

use crate::{Result, SmartError};
use serde::{Deserialize, Serialize};

/// Number of `have` lines sent before each round trip with the server.
pub const DEFAULT_HAVES_PER_ROUND: usize = 20;

/// Received bytes between two stats notifications.
pub const DEFAULT_PROGRESS_THRESHOLD: u64 = 100 * 1024;

/// Size of a single read from the transport.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 65536;

/// Configuration of a smart protocol session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SmartConfig {
    /// Haves per negotiation round. On stateless transports this is also the
    /// cadence at which the wants are replayed, since each round is a new
    /// request.
    pub haves_per_round: usize,
    /// Bytes that must arrive before the stats callback fires again.
    pub progress_threshold: u64,
    /// Maximum bytes requested from the transport per read.
    pub read_buffer_size: usize,
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            haves_per_round: DEFAULT_HAVES_PER_ROUND,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl SmartConfig {
    /// Checks that every knob has a usable value.
    pub fn validate(&self) -> Result<()> {
        if self.haves_per_round == 0 {
            return Err(SmartError::Config(
                "haves_per_round must be at least 1".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(SmartError::Config(
                "read_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
