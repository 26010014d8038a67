// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared-memory areas.

use std::fmt;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::AreaId;

pub(crate) struct AreaMemory {
    name: String,
    bytes: RwLock<Box<[u8]>>,
}

impl AreaMemory {
    pub(crate) fn new(name: &str, size: usize) -> Self {
        Self { name: name.to_string(), bytes: RwLock::new(vec![0u8; size].into_boxed_slice()) }
    }
}

/// A mapping of an area into the caller's address space.
///
/// Dropping the mapping unmaps it; deleting the area is a separate kernel call.
#[derive(Clone)]
pub struct AreaMapping {
    id: AreaId,
    size: usize,
    memory: Arc<AreaMemory>,
}

impl fmt::Debug for AreaMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AreaMapping")
            .field("id", &self.id)
            .field("name", &self.memory.name)
            .field("size", &self.size)
            .finish()
    }
}

impl AreaMapping {
    pub(crate) fn new(id: AreaId, memory: Arc<AreaMemory>) -> Self {
        let size = memory.bytes.read().len();
        Self { id, size, memory }
    }

    /// Id of the mapped area.
    pub fn id(&self) -> AreaId {
        self.id
    }

    /// Mapped size in bytes (a whole number of pages).
    pub fn size(&self) -> usize {
        self.size
    }

    fn contains(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.size)
    }

    /// Borrows `len` bytes at `offset` for reading; `None` when out of bounds.
    pub fn read_range(&self, offset: usize, len: usize) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        if !self.contains(offset, len) {
            return None;
        }
        Some(RwLockReadGuard::map(self.memory.bytes.read(), |bytes| &bytes[offset..offset + len]))
    }

    /// Borrows `len` bytes at `offset` for writing; `None` when out of bounds.
    pub fn write_range(
        &self,
        offset: usize,
        len: usize,
    ) -> Option<MappedRwLockWriteGuard<'_, [u8]>> {
        if !self.contains(offset, len) {
            return None;
        }
        Some(RwLockWriteGuard::map(self.memory.bytes.write(), |bytes| {
            &mut bytes[offset..offset + len]
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::Kernel;

    #[test]
    fn ranges_are_bounds_checked() {
        let kernel = Kernel::new();
        let area = kernel.create_area("bounds", 10).unwrap();
        assert_eq!(area.size(), 4096);
        assert!(area.read_range(4096, 0).is_some());
        assert!(area.read_range(4000, 97).is_none());
        assert!(area.write_range(usize::MAX, 2).is_none());
        assert_eq!(area.write_range(4095, 1).unwrap().len(), 1);
    }
}
