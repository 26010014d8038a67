// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel primitives consumed by the userland filesystem transport
//! OWNERS: @runtime
//! STATUS: Functional (host rendition)
//! PUBLIC API: Kernel, PortId, AreaId, AreaMapping, PortMessage, Wait, KernelError
//! DEPENDS_ON: parking_lot (queues, area memory), log
//! INVARIANTS:
//!   - Kernel ports are bounded queues; a full queue blocks writers, an empty one blocks readers
//!   - Area sizes are whole pages; ids are never reused within one `Kernel`
//!   - `Wait::NonBlocking` never sleeps
//!
//! The `Kernel` handle is cheap to clone; every clone addresses the same port
//! and area tables. Tests create a private `Kernel` per case so leak checks via
//! [`Kernel::port_count`] and [`Kernel::area_count`] stay deterministic.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod area;
mod port;

use core::fmt;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

pub use area::AreaMapping;
use area::AreaMemory;
pub use port::PortMessage;
use port::PortQueue;

/// Result type returned by kernel primitives.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Default page granularity used for area sizes.
pub const PAGE_SIZE: usize = 4096;

/// Errors surfaced by kernel primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Port id does not name a live port.
    BadPortId,
    /// Area id does not name a live area.
    BadAreaId,
    /// Argument outside the accepted range.
    BadValue,
    /// Not enough memory to back the object.
    NoMemory,
    /// Bounded wait elapsed before progress was made.
    TimedOut,
    /// Non-blocking attempt could not make progress.
    WouldBlock,
    /// Wait was interrupted before progress was made.
    Interrupted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BadPortId => "bad port id",
            Self::BadAreaId => "bad area id",
            Self::BadValue => "bad value",
            Self::NoMemory => "no memory",
            Self::TimedOut => "timed out",
            Self::WouldBlock => "would block",
            Self::Interrupted => "interrupted",
        };
        f.write_str(text)
    }
}

impl std::error::Error for KernelError {}

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Maps a signed microsecond timeout onto a wait mode.
    ///
    /// Negative values block indefinitely, zero polls and positive values bound the wait.
    pub fn from_micros(timeout: i64) -> Self {
        match u64::try_from(timeout) {
            Err(_) => Self::Blocking,
            Ok(0) => Self::NonBlocking,
            Ok(micros) => Self::Timeout(Duration::from_micros(micros)),
        }
    }

    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Absolute deadline for bounded waits.
    ///
    /// A zero timeout is treated as a poll by the primitives, so it has no deadline.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Self::Timeout(duration) if !duration.is_zero() => Instant::now().checked_add(duration),
            Self::Blocking | Self::NonBlocking | Self::Timeout(_) => None,
        }
    }

    pub(crate) fn polls(self) -> bool {
        match self {
            Self::NonBlocking => true,
            Self::Timeout(duration) => duration.is_zero(),
            Self::Blocking => false,
        }
    }
}

/// Identifier of a kernel message port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(i32);

impl PortId {
    /// Wraps a raw id received from a peer.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw wire representation.
    pub const fn raw(self) -> i32 {
        self.0
    }
}

/// Identifier of a shared-memory area. Live ids are always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AreaId(i32);

impl AreaId {
    /// Wraps a raw id received from a peer.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw wire representation.
    pub const fn raw(self) -> i32 {
        self.0
    }
}

/// Handle to the port and area tables.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

struct KernelInner {
    page_size: usize,
    next_id: AtomicI32,
    ports: Mutex<HashMap<PortId, Arc<PortQueue>>>,
    areas: Mutex<HashMap<AreaId, Arc<AreaMemory>>>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("page_size", &self.inner.page_size)
            .field("ports", &self.port_count())
            .field("areas", &self.area_count())
            .finish()
    }
}

impl Kernel {
    /// Creates an empty kernel with [`PAGE_SIZE`] pages.
    pub fn new() -> Self {
        Self::with_page_size(PAGE_SIZE)
    }

    /// Creates an empty kernel with a custom page size (rounded up to a power of two).
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(KernelInner {
                page_size: page_size.max(1).next_power_of_two(),
                next_id: AtomicI32::new(1),
                ports: Mutex::new(HashMap::new()),
                areas: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Page granularity for areas.
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Rounds `size` up to the next page multiple.
    pub fn round_to_pages(&self, size: usize) -> Option<usize> {
        let mask = self.inner.page_size - 1;
        size.checked_add(mask).map(|value| value & !mask)
    }

    fn next_id(&self) -> Result<i32> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if id <= 0 {
            return Err(KernelError::NoMemory);
        }
        Ok(id)
    }

    /// Creates a port holding at most `queue_length` messages.
    pub fn create_port(&self, queue_length: usize, name: &str) -> Result<PortId> {
        if queue_length == 0 {
            return Err(KernelError::BadValue);
        }
        let id = PortId(self.next_id()?);
        let queue = Arc::new(PortQueue::new(name, queue_length));
        self.inner.ports.lock().insert(id, queue);
        log::debug!("ufs-abi: created port {} ({name})", id.raw());
        Ok(id)
    }

    /// Deletes a port; blocked readers and writers fail with [`KernelError::BadPortId`].
    pub fn delete_port(&self, id: PortId) -> Result<()> {
        let queue = self.inner.ports.lock().remove(&id).ok_or(KernelError::BadPortId)?;
        queue.close();
        log::debug!("ufs-abi: deleted port {}", id.raw());
        Ok(())
    }

    fn port(&self, id: PortId) -> Result<Arc<PortQueue>> {
        self.inner.ports.lock().get(&id).cloned().ok_or(KernelError::BadPortId)
    }

    /// Enqueues one message on `id`.
    pub fn write_port(&self, id: PortId, code: i32, bytes: &[u8], wait: Wait) -> Result<()> {
        self.port(id)?.write(code, bytes, wait)
    }

    /// Dequeues one message from `id` into `buffer`.
    ///
    /// At most `buffer.len()` bytes are copied. The returned size is the full
    /// size of the dequeued message, so callers can detect truncation.
    pub fn read_port(&self, id: PortId, buffer: &mut [u8], wait: Wait) -> Result<PortMessage> {
        self.port(id)?.read(buffer, wait)
    }

    /// Interrupts the next wait on `id` that would otherwise block.
    pub fn interrupt_port(&self, id: PortId) -> Result<()> {
        self.port(id)?.interrupt();
        Ok(())
    }

    /// Number of live ports.
    pub fn port_count(&self) -> usize {
        self.inner.ports.lock().len()
    }

    /// Creates an area of at least `size` bytes and maps it for the creator.
    pub fn create_area(&self, name: &str, size: usize) -> Result<AreaMapping> {
        if size == 0 {
            return Err(KernelError::BadValue);
        }
        let rounded = self.round_to_pages(size).ok_or(KernelError::NoMemory)?;
        let id = AreaId(self.next_id()?);
        let memory = Arc::new(AreaMemory::new(name, rounded));
        self.inner.areas.lock().insert(id, memory.clone());
        log::debug!("ufs-abi: created area {} ({name}, {rounded} bytes)", id.raw());
        Ok(AreaMapping::new(id, memory))
    }

    /// Deletes an area; existing mappings stay readable until dropped.
    pub fn delete_area(&self, id: AreaId) -> Result<()> {
        self.inner.areas.lock().remove(&id).map(|_| ()).ok_or(KernelError::BadAreaId)
    }

    /// Maps an existing area into the caller.
    pub fn map_area(&self, id: AreaId) -> Result<AreaMapping> {
        let memory = self.inner.areas.lock().get(&id).cloned().ok_or(KernelError::BadAreaId)?;
        Ok(AreaMapping::new(id, memory))
    }

    /// Number of live (not yet deleted) areas.
    pub fn area_count(&self) -> usize {
        self.inner.areas.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_from_micros() {
        assert_eq!(Wait::from_micros(-1), Wait::Blocking);
        assert_eq!(Wait::from_micros(0), Wait::NonBlocking);
        assert_eq!(Wait::from_micros(1500), Wait::Timeout(Duration::from_micros(1500)));
        assert!(Wait::Timeout(Duration::ZERO).polls());
        assert!(!Wait::Blocking.polls());
    }

    #[test]
    fn areas_round_to_pages() {
        let kernel = Kernel::new();
        let area = kernel.create_area("data", 5000).unwrap();
        assert_eq!(area.size(), 8192);
        assert_eq!(kernel.round_to_pages(4096), Some(4096));
        assert_eq!(kernel.round_to_pages(0), Some(0));
        assert_eq!(kernel.create_area("empty", 0).unwrap_err(), KernelError::BadValue);
    }

    #[test]
    fn custom_page_size() {
        let kernel = Kernel::with_page_size(1000);
        assert_eq!(kernel.page_size(), 1024);
        assert_eq!(kernel.create_area("data", 1025).unwrap().size(), 2048);
    }

    #[test]
    fn mapping_shares_memory_and_outlives_delete() {
        let kernel = Kernel::new();
        let creator = kernel.create_area("shared", 16).unwrap();
        creator.write_range(0, 4).unwrap().copy_from_slice(b"ping");
        let peer = kernel.map_area(creator.id()).unwrap();
        assert_eq!(&*peer.read_range(0, 4).unwrap(), b"ping");
        assert_eq!(kernel.area_count(), 1);
        kernel.delete_area(creator.id()).unwrap();
        assert_eq!(kernel.area_count(), 0);
        assert_eq!(kernel.map_area(creator.id()).unwrap_err(), KernelError::BadAreaId);
        assert_eq!(&*peer.read_range(0, 4).unwrap(), b"ping");
        assert_eq!(kernel.delete_area(creator.id()).unwrap_err(), KernelError::BadAreaId);
    }

    #[test]
    fn ids_are_unique_across_objects() {
        let kernel = Kernel::new();
        let port = kernel.create_port(1, "p").unwrap();
        let area = kernel.create_area("a", 1).unwrap();
        assert_ne!(port.raw(), area.id().raw());
        assert!(port.raw() > 0 && area.id().raw() > 0);
    }
}
