//! Store configuration

use crate::error::ConfigError;
use crate::record::HEADER_LEN;
use serde::{Deserialize, Serialize};

/// Sizes of the retained area and of the two logs carved out of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Total retained bytes shared by both logs
    pub total_size: usize,
    /// Bytes reserved for the critical log
    pub critical_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            total_size: 3072,
            critical_size: 2048,
        }
    }
}

impl StoreConfig {
    /// Create config with explicit sizes
    pub fn new(total_size: usize, critical_size: usize) -> Self {
        Self {
            total_size,
            critical_size,
        }
    }

    /// Storage length of the critical log
    pub fn critical_len(&self) -> usize {
        self.critical_size
    }

    /// Storage length of the non-critical log.
    ///
    /// One byte is added when the share is a multiple of 4, so that records of
    /// word-aligned sizes do not end exactly on the physical end of storage.
    pub fn non_critical_len(&self) -> usize {
        let size = self.total_size.saturating_sub(self.critical_size);
        if size % 4 == 0 {
            size + 1
        } else {
            size
        }
    }

    /// Check that both logs are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.critical_size == 0 {
            return Err(ConfigError::EmptyCriticalLog);
        }
        if self.critical_size >= self.total_size {
            return Err(ConfigError::CriticalExceedsTotal {
                critical: self.critical_size,
                total: self.total_size,
            });
        }
        let size = self.non_critical_len();
        if size <= HEADER_LEN {
            return Err(ConfigError::NonCriticalTooSmall { size });
        }
        Ok(())
    }
}
