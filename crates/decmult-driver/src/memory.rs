//! Device-visible host memory
//!
//! The accelerator reaches operands through bus addresses. `HostMemory` models
//! that address space for the software action: buffers are allocated at
//! bus-word alignment, and every access must fall entirely inside one buffer.
//! Anything else is an address fault, which the accelerator reports through
//! the control block.

use crate::error::{ActionError, Result};
use crate::transfer::{pack_words, unpack_words, Element};
use decmult_chip::{BufferAddr, PackingRule};
use std::collections::BTreeMap;
use tracing::debug;

/// Bus address of the first allocation. Address zero is never mapped.
pub const BASE_ADDR: u64 = 0x1_0000;

/// Simulated device-visible address space
#[derive(Debug)]
pub struct HostMemory {
    alignment: u64,
    next_addr: u64,
    regions: BTreeMap<u64, Vec<u8>>,
}

impl HostMemory {
    /// Empty address space allocating at `alignment` bytes (the bus word size).
    pub fn new(alignment: usize) -> Self {
        let alignment = alignment.max(1) as u64;
        Self {
            alignment,
            next_addr: BASE_ADDR.next_multiple_of(alignment),
            regions: BTreeMap::new(),
        }
    }

    /// Allocate a zeroed buffer of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::TransferFailed`] for an empty buffer or one too
    /// large for the descriptor's 32-bit size field.
    pub fn alloc(&mut self, len: usize) -> Result<BufferAddr> {
        if len == 0 {
            return Err(ActionError::transfer_failed("cannot allocate an empty buffer"));
        }
        let size = u32::try_from(len)
            .map_err(|_| ActionError::transfer_failed(format!("buffer of {len} B exceeds 32-bit size field")))?;

        let addr = self.next_addr;
        self.next_addr = (addr + len as u64).next_multiple_of(self.alignment);
        self.regions.insert(addr, vec![0u8; len]);
        debug!("HostMemory: allocated {len} B at {addr:#x}");
        Ok(BufferAddr::new(addr, size))
    }

    /// Allocate a buffer holding `elements` packed into whole bus words.
    ///
    /// # Errors
    ///
    /// Returns an error if `rule` does not match the element type or the
    /// allocation fails.
    pub fn alloc_elements<E: Element>(&mut self, elements: &[E], rule: &PackingRule) -> Result<BufferAddr> {
        let words = pack_words(elements, rule)?;
        let buf = self.alloc(words.len().max(rule.bus_word_bytes()))?;
        self.write(buf.addr, &words)?;
        Ok(buf)
    }

    /// Allocate a destination for `count` elements, rounded to whole words.
    ///
    /// # Errors
    ///
    /// See [`alloc`](Self::alloc).
    pub fn alloc_output(&mut self, count: usize, rule: &PackingRule) -> Result<BufferAddr> {
        self.alloc(rule.padded_bytes(count).max(rule.bus_word_bytes()))
    }

    /// Release a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AddressFault`] if no buffer starts at `addr`.
    pub fn free(&mut self, addr: u64) -> Result<()> {
        self.regions
            .remove(&addr)
            .map(|_| ())
            .ok_or(ActionError::AddressFault { addr, len: 0 })
    }

    /// Copy `buf.len()` bytes starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AddressFault`] unless the range lies inside one
    /// buffer.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let (base, region) = self.region(addr, buf.len())?;
        let start = usize::try_from(addr - base).map_err(|_| ActionError::AddressFault { addr, len: buf.len() })?;
        buf.copy_from_slice(&region[start..start + buf.len()]);
        Ok(())
    }

    /// Write `data` starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AddressFault`] unless the range lies inside one
    /// buffer.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let len = data.len();
        let (base, _) = self.region(addr, len)?;
        let start = usize::try_from(addr - base).map_err(|_| ActionError::AddressFault { addr, len })?;
        let region = self
            .regions
            .get_mut(&base)
            .ok_or(ActionError::AddressFault { addr, len })?;
        region[start..start + len].copy_from_slice(data);
        Ok(())
    }

    /// Read `count` elements from the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns an address fault if `buf` does not hold `count` elements.
    pub fn read_elements<E: Element>(&self, buf: BufferAddr, count: usize, rule: &PackingRule) -> Result<Vec<E>> {
        let mut bytes = vec![0u8; rule.payload_bytes(count)];
        self.read(buf.addr, &mut bytes)?;
        unpack_words(&bytes, count, rule)
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.regions.len()
    }

    fn region(&self, addr: u64, len: usize) -> Result<(u64, &Vec<u8>)> {
        let fault = ActionError::AddressFault { addr, len };
        let (&base, region) = self.regions.range(..=addr).next_back().ok_or(fault)?;
        let end = addr
            .checked_add(len as u64)
            .ok_or(ActionError::AddressFault { addr, len })?;
        if end > base + region.len() as u64 {
            return Err(ActionError::AddressFault { addr, len });
        }
        Ok((base, region))
    }
}
