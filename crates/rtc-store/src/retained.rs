//! Retained Memory Layout
//!
//! Each log lives in memory that keeps its bit pattern across warm resets: a
//! small descriptor followed by the raw byte storage. Nothing here is trusted
//! after a reset until recovery has validated it.

use crate::config::StoreConfig;
use crate::error::ConfigError;

/// Persisted state of one log
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Offset of the oldest live byte
    pub read_offset: usize,
    /// Live bytes, possibly wrapped around the physical end
    pub len: u32,
    /// Storage length, re-bound at every init
    pub size: u32,
}

impl Descriptor {
    pub const fn new() -> Self {
        Self {
            read_offset: 0,
            len: 0,
            size: 0,
        }
    }
}

/// Descriptor and storage of one log, borrowed from retained memory
#[derive(Debug)]
pub struct RetainedLog<'a> {
    pub descriptor: &'a mut Descriptor,
    pub storage: &'a mut [u8],
}

/// Retained memory handed to the store: one block per log
#[derive(Debug)]
pub struct RetainedArea<'a> {
    pub critical: RetainedLog<'a>,
    pub non_critical: RetainedLog<'a>,
}

/// Fixed-size block suitable for a statically allocated retained section
#[repr(C)]
#[derive(Debug)]
pub struct RetainedBlock<const N: usize> {
    descriptor: Descriptor,
    storage: [u8; N],
}

impl<const N: usize> RetainedBlock<N> {
    pub const fn new() -> Self {
        Self {
            descriptor: Descriptor::new(),
            storage: [0; N],
        }
    }

    pub fn log(&mut self) -> RetainedLog<'_> {
        RetainedLog {
            descriptor: &mut self.descriptor,
            storage: &mut self.storage,
        }
    }
}

impl<const N: usize> Default for RetainedBlock<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct HeapBlock {
    descriptor: Descriptor,
    storage: Box<[u8]>,
}

impl HeapBlock {
    fn new(size: usize) -> Self {
        Self {
            descriptor: Descriptor::new(),
            storage: vec![0; size].into_boxed_slice(),
        }
    }

    fn log(&mut self) -> RetainedLog<'_> {
        RetainedLog {
            descriptor: &mut self.descriptor,
            storage: &mut self.storage,
        }
    }

    fn scramble(&mut self, seed: u8) {
        let mut x = seed;
        for byte in self.storage.iter_mut() {
            x = x.wrapping_mul(31).wrapping_add(17);
            *byte = x;
        }
        self.descriptor = Descriptor {
            read_offset: usize::from(seed).wrapping_mul(0x0101_0101),
            len: u32::from(seed).wrapping_mul(0x0100_0001),
            size: u32::from(seed),
        };
    }
}

/// Heap-backed retained memory for hosts and tests.
///
/// Outlives any number of stores created over it, which is how a warm reset
/// is modelled: drop the store, create a new one over the same memory.
#[derive(Debug)]
pub struct RetainedMemory {
    critical: HeapBlock,
    non_critical: HeapBlock,
}

impl RetainedMemory {
    /// Allocate both logs with the sizes from `config`
    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_capacities(
            config.critical_len(),
            config.non_critical_len(),
        ))
    }

    /// Allocate both logs with exact storage lengths
    pub fn with_capacities(critical: usize, non_critical: usize) -> Self {
        Self {
            critical: HeapBlock::new(critical),
            non_critical: HeapBlock::new(non_critical),
        }
    }

    /// Borrow both logs for a store
    pub fn area(&mut self) -> RetainedArea<'_> {
        RetainedArea {
            critical: self.critical.log(),
            non_critical: self.non_critical.log(),
        }
    }

    /// Fill descriptors and storage with garbage, as after a power loss
    pub fn scramble(&mut self, seed: u8) {
        self.critical.scramble(seed);
        self.non_critical.scramble(seed.wrapping_add(1));
    }
}
