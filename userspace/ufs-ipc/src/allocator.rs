// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Builds requests in a port buffer and reads them back out
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - RequestAllocator::allocate_request(): lay out the fixed portion
//!   - RequestAllocator::allocate_address()/allocate_data()/allocate_string(): payloads
//!   - RequestAllocator::finish_deferred_init(): commit deferred addresses
//!   - RequestAllocator::send(): commit, send and hand the areas to a SentRequest
//!   - RequestAllocator::read_request(): receive and relocate
//!
//! INVARIANTS:
//!   - The request starts 8-aligned right after the port's reserved region
//!   - Payload offsets are relative to the request start
//!   - At most MAX_REQUEST_ADDRESS_COUNT areas and deferred inits per request
//!   - Areas created by an allocator are deleted by it (or by its SentRequest)
//!   - Dropping the allocator unreserves the port buffer
//!
//! Payload placement: if the aligned payload still fits the port buffer it is
//! packed behind the bytes reserved so far; otherwise a fresh area sized to
//! whole pages holds it at offset 0. Deferred payloads reserve their final
//! place at once but are written to scratch memory (port buffer case) and
//! their address is only stored by `finish_deferred_init`.

use core::ops::{Deref, DerefMut};

use parking_lot::MappedRwLockWriteGuard;
use ufs_abi::{AreaId, AreaMapping, Kernel, Wait};

use crate::address::{Address, ADDRESS_WIRE_SIZE, NULL_AREA, PORT_BUFFER_AREA};
use crate::port::Port;
use crate::relocate::{relocate_request, ReceivedRequest};
use crate::request::{
    decode_fixed, encode_body_in_place, encode_fixed, AddressField, RequestBody, RequestLayout,
    REQUEST_HEADER_SIZE,
};
use crate::requests::RequestKind;
use crate::{Error, Result, MAX_REQUEST_ADDRESS_COUNT};

/// Alignment of the fixed portion inside the port buffer.
const REQUEST_ALIGNMENT: usize = 8;

/// Maps a requested alignment onto the supported anchors {1, 2, 4, 8}.
pub fn effective_alignment(align: usize, size: usize) -> usize {
    if align == 0 || size == 0 {
        1
    } else if align % 8 == 0 {
        8
    } else if align % 4 == 0 {
        4
    } else if align % 2 == 0 {
        2
    } else {
        1
    }
}

fn align_up(value: usize, align: usize) -> Option<usize> {
    let mask = align - 1;
    value.checked_add(mask).map(|value| value & !mask)
}

/// Writable storage handed out for one payload.
pub enum DataSlot<'a> {
    /// Bytes in the port buffer, or scratch memory for deferred payloads.
    Buffer(&'a mut [u8]),
    /// Bytes in an overflow area.
    Area(MappedRwLockWriteGuard<'a, [u8]>),
}

impl DataSlot<'_> {
    /// Returns `true` when the payload overflowed into an area.
    pub fn is_area(&self) -> bool {
        matches!(self, Self::Area(_))
    }
}

impl Deref for DataSlot<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Buffer(bytes) => bytes,
            Self::Area(guard) => guard,
        }
    }
}

impl DerefMut for DataSlot<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Buffer(bytes) => bytes,
            Self::Area(guard) => guard,
        }
    }
}

/// Area created for one request; deleted on drop.
#[derive(Debug)]
struct OwnedArea {
    kernel: Kernel,
    mapping: AreaMapping,
}

impl OwnedArea {
    fn create(kernel: &Kernel, size: usize) -> Result<Self> {
        let mapping = kernel.create_area("ufs request data", size).map_err(|err| {
            log::warn!("ufs-ipc: failed to create {size} byte area: {err}");
            Error::NoMemory
        })?;
        log::debug!("ufs-ipc: area {} holds {size} byte payload", mapping.id().raw());
        Ok(Self { kernel: kernel.clone(), mapping })
    }

    fn id(&self) -> AreaId {
        self.mapping.id()
    }
}

impl Drop for OwnedArea {
    fn drop(&mut self) {
        if let Err(err) = self.kernel.delete_area(self.id()) {
            log::warn!("ufs-ipc: failed to delete area {}: {err}", self.id().raw());
        }
    }
}

/// Areas of a sent request, kept alive until the peer is done with them.
#[derive(Debug)]
pub struct SentRequest {
    kind: RequestKind,
    areas: Vec<OwnedArea>,
}

impl SentRequest {
    /// Kind that was sent.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Number of overflow areas still held.
    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Ids of the overflow areas still held.
    pub fn area_ids(&self) -> Vec<AreaId> {
        self.areas.iter().map(OwnedArea::id).collect()
    }
}

#[derive(Clone, Copy, Debug)]
struct BuiltRequest {
    kind: RequestKind,
    layout: RequestLayout,
    offset: usize,
}

#[derive(Debug)]
struct DeferredInit {
    field_offset: usize,
    address: Address,
    scratch: Option<Vec<u8>>,
}

/// Builder and reader for one in-flight request on a [`Port`].
#[derive(Debug)]
pub struct RequestAllocator<'p> {
    port: &'p mut Port,
    kernel: Kernel,
    request: Option<BuiltRequest>,
    allocated_size: usize,
    allocated_fields: u32,
    areas: Vec<OwnedArea>,
    deferred: Vec<DeferredInit>,
    finished: bool,
    received: Option<ReceivedRequest>,
    error: Option<Error>,
}

impl<'p> RequestAllocator<'p> {
    /// Binds an allocator to `port`.
    pub fn new(port: &'p mut Port) -> Self {
        let kernel = port.kernel().clone();
        Self {
            port,
            kernel,
            request: None,
            allocated_size: 0,
            allocated_fields: 0,
            areas: Vec::new(),
            deferred: Vec::new(),
            finished: false,
            received: None,
            error: None,
        }
    }

    /// Releases everything reserved or allocated so far. Idempotent.
    pub fn uninit(&mut self) {
        if let Some(built) = self.request.take() {
            self.port.unreserve(built.offset);
        }
        self.deferred.clear();
        self.areas.clear();
        self.received = None;
        self.allocated_size = 0;
        self.allocated_fields = 0;
        self.finished = false;
    }

    /// Bound port.
    pub fn port(&self) -> &Port {
        self.port
    }

    /// Remembered hard error, if any.
    pub fn error(&self) -> Option<Error> {
        self.error
    }

    fn check_error(&self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => self.port.init_check(),
        }
    }

    /// Kind of the request under construction.
    pub fn request_kind(&self) -> Option<RequestKind> {
        self.request.map(|built| built.kind)
    }

    /// Bytes used by the request so far, payloads in the port buffer included.
    pub fn request_size(&self) -> usize {
        self.allocated_size
    }

    /// Offset of the request inside the port buffer.
    pub fn request_offset(&self) -> Option<usize> {
        self.request.map(|built| built.offset)
    }

    /// Number of overflow areas created so far.
    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Lays out the fixed portion of `request` in the port buffer.
    pub fn allocate_request<R: RequestBody>(&mut self, request: &R) -> Result<()> {
        self.check_error()?;
        if self.request.is_some() || self.received.is_some() {
            return Err(Error::BadValue);
        }
        let layout = R::LAYOUT;
        let size = layout.fixed_size();
        if size < REQUEST_HEADER_SIZE {
            return Err(Error::Capacity);
        }
        let offset = align_up(self.port.reserved_size(), REQUEST_ALIGNMENT).ok_or(Error::Capacity)?;
        let end = offset.checked_add(size).ok_or(Error::Capacity)?;
        if end > self.port.capacity() {
            log::warn!(
                "ufs-ipc: {} needs {end} bytes, port holds {}",
                R::KIND.name(),
                self.port.capacity()
            );
            return Err(Error::Capacity);
        }
        encode_fixed(request, &mut self.port.buffer_mut()[offset..end])?;
        self.port.reserve(end);
        self.request = Some(BuiltRequest { kind: R::KIND, layout, offset });
        self.allocated_size = size;
        Ok(())
    }

    fn built<R: RequestBody>(&self) -> Result<BuiltRequest> {
        match self.request {
            Some(built) if built.kind == R::KIND => Ok(built),
            _ => Err(Error::BadValue),
        }
    }

    /// Rewrites the fixed fields of the request in place; addresses are kept.
    pub fn update_request<R: RequestBody>(&mut self, update: impl FnOnce(&mut R)) -> Result<()> {
        self.check_error()?;
        let built = self.built::<R>()?;
        let fixed = &mut self.port.buffer_mut()[built.offset..built.offset + built.layout.fixed_size()];
        let mut body = decode_fixed::<R>(fixed)?;
        update(&mut body);
        encode_body_in_place(&body, fixed)
    }

    /// Validates `field` and returns the absolute offset of its address.
    fn claim_field<R: RequestBody>(&mut self, field: AddressField<R>) -> Result<(usize, u32)> {
        self.check_error()?;
        if self.finished {
            return Err(Error::BadValue);
        }
        let built = self.built::<R>()?;
        field.info()?;
        let relative = field.offset();
        if relative + ADDRESS_WIRE_SIZE > built.layout.fixed_size() {
            return Err(Error::BadValue);
        }
        let bit = 1u32 << field.index();
        if self.allocated_fields & bit != 0 {
            return Err(Error::BadValue);
        }
        Ok((built.offset + relative, bit))
    }

    fn write_address(&mut self, field_offset: usize, address: Address) -> Result<()> {
        let target = self
            .port
            .buffer_mut()
            .get_mut(field_offset..field_offset + ADDRESS_WIRE_SIZE)
            .ok_or(Error::BadValue)?;
        address.encode(target)
    }

    /// Reserves `size` bytes for `field` and returns writable storage for them.
    ///
    /// With `deferred` set the address is only stored by
    /// [`finish_deferred_init`](Self::finish_deferred_init).
    pub fn allocate_address<R: RequestBody>(
        &mut self,
        field: AddressField<R>,
        size: usize,
        align: usize,
        deferred: bool,
    ) -> Result<DataSlot<'_>> {
        let (field_offset, bit) = self.claim_field(field)?;
        let info = field.info()?;
        if size > info.max_size {
            return Err(Error::BadValue);
        }
        let wire_size = u32::try_from(size).map_err(|_| Error::BadValue)?;
        if deferred && self.deferred.len() >= MAX_REQUEST_ADDRESS_COUNT {
            return Err(Error::Capacity);
        }
        let built = self.built::<R>()?;
        let align = effective_alignment(align, size);
        let offset = align_up(self.allocated_size, align).ok_or(Error::Capacity)?;
        let start = built.offset.checked_add(offset).ok_or(Error::Capacity)?;
        let end = start.checked_add(size).ok_or(Error::Capacity)?;

        if end <= self.port.capacity() {
            let wire_offset = u32::try_from(offset).map_err(|_| Error::Capacity)?;
            let address = Address::new(PORT_BUFFER_AREA, wire_offset, wire_size);
            self.port.reserve(end);
            self.allocated_size = offset + size;
            self.allocated_fields |= bit;
            if deferred {
                self.deferred.push(DeferredInit {
                    field_offset,
                    address,
                    scratch: Some(vec![0u8; size]),
                });
                return self
                    .deferred
                    .last_mut()
                    .and_then(|record| record.scratch.as_deref_mut())
                    .map(DataSlot::Buffer)
                    .ok_or(Error::BadValue);
            }
            self.write_address(field_offset, address)?;
            return Ok(DataSlot::Buffer(&mut self.port.buffer_mut()[start..end]));
        }

        if self.areas.len() >= MAX_REQUEST_ADDRESS_COUNT {
            log::warn!("ufs-ipc: {} exhausted its area budget", R::KIND.name());
            return Err(Error::Capacity);
        }
        let area = OwnedArea::create(&self.kernel, size)?;
        let address = Address::new(area.id().raw(), 0, wire_size);
        self.areas.push(area);
        self.allocated_fields |= bit;
        if deferred {
            self.deferred.push(DeferredInit { field_offset, address, scratch: None });
        } else {
            self.write_address(field_offset, address)?;
        }
        self.areas
            .last()
            .and_then(|area| area.mapping.write_range(0, size))
            .map(DataSlot::Area)
            .ok_or(Error::NoMemory)
    }

    /// Stores the canonical null address in `field`.
    pub fn set_null<R: RequestBody>(&mut self, field: AddressField<R>) -> Result<()> {
        let (field_offset, bit) = self.claim_field(field)?;
        self.write_address(field_offset, Address::new(NULL_AREA, 0, 0))?;
        self.allocated_fields |= bit;
        Ok(())
    }

    /// Copies `data` into a fresh payload, or stores null for `None`.
    pub fn allocate_data<R: RequestBody>(
        &mut self,
        field: AddressField<R>,
        data: Option<&[u8]>,
        align: usize,
        deferred: bool,
    ) -> Result<()> {
        let Some(data) = data else {
            return self.set_null(field);
        };
        let mut slot = self.allocate_address(field, data.len(), align, deferred)?;
        slot.copy_from_slice(data);
        Ok(())
    }

    /// Copies `text` plus a terminator into a fresh payload, or stores null for `None`.
    pub fn allocate_string<R: RequestBody>(
        &mut self,
        field: AddressField<R>,
        text: Option<&str>,
        deferred: bool,
    ) -> Result<()> {
        let Some(text) = text else {
            return self.set_null(field);
        };
        if text.as_bytes().contains(&0) {
            return Err(Error::BadValue);
        }
        let len = text.len();
        let mut slot = self.allocate_address(field, len + 1, 1, deferred)?;
        slot[..len].copy_from_slice(text.as_bytes());
        slot[len] = 0;
        Ok(())
    }

    /// Commits deferred payloads and their addresses. Later calls are no-ops.
    pub fn finish_deferred_init(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let built = self.request.ok_or(Error::BadValue)?;
        let mut pending = core::mem::take(&mut self.deferred).into_iter();
        while let Some(record) = pending.next() {
            if let Err(err) = self.commit_deferred(&built, &record) {
                // Uncommitted records stay queued for a later attempt.
                self.deferred = core::iter::once(record).chain(pending).collect();
                return Err(err);
            }
        }
        self.finished = true;
        Ok(())
    }

    fn commit_deferred(&mut self, built: &BuiltRequest, record: &DeferredInit) -> Result<()> {
        if let Some(scratch) = &record.scratch {
            let start = built.offset + record.address.offset() as usize;
            let target = self
                .port
                .buffer_mut()
                .get_mut(start..start + scratch.len())
                .ok_or(Error::BadValue)?;
            target.copy_from_slice(scratch);
        }
        self.write_address(record.field_offset, record.address)
    }

    /// Commits deferred payloads and sends the request.
    ///
    /// The returned [`SentRequest`] keeps the overflow areas alive; the port
    /// reservation is released when the allocator is consumed.
    pub fn send(mut self) -> Result<SentRequest> {
        self.check_error()?;
        self.finish_deferred_init()?;
        let built = self.request.ok_or(Error::BadValue)?;
        self.port.send_at(built.offset, self.allocated_size)?;
        Ok(SentRequest { kind: built.kind, areas: core::mem::take(&mut self.areas) })
    }

    /// Receives one message and relocates it.
    ///
    /// Timeouts, would-block, interruption and corrupted frames are returned
    /// without touching the allocator's error state; other failures are
    /// remembered and returned by every later call.
    pub fn read_request(&mut self, wait: Wait) -> Result<&ReceivedRequest> {
        self.check_error()?;
        if self.request.is_some() {
            return Err(Error::BadValue);
        }
        self.received = None;
        let size = match self.port.receive(wait) {
            Ok(size) => size,
            Err(err) if err.is_transient() || err == Error::BadData => return Err(err),
            Err(err) => {
                self.error = Some(err);
                return Err(err);
            }
        };
        if size < REQUEST_HEADER_SIZE {
            log::warn!("ufs-ipc: discarding {size} byte message shorter than a request header");
            return Err(Error::BadData);
        }
        let message = self.port.buffer()[..size].to_vec();
        let received = relocate_request(&self.kernel, message)?;
        Ok(self.received.insert(received))
    }

    /// Request read by the last successful [`read_request`](Self::read_request).
    pub fn get_request(&self) -> Option<&ReceivedRequest> {
        self.received.as_ref()
    }

    /// Takes ownership of the last received request.
    pub fn take_request(&mut self) -> Option<ReceivedRequest> {
        self.received.take()
    }
}

impl Drop for RequestAllocator<'_> {
    fn drop(&mut self) {
        self.uninit();
    }
}
