// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trust boundary for received requests
//! OWNERS: @runtime
//! INVARIANTS:
//!   - `ReceivedRequest` can only be built by `relocate_request`
//!   - Every address of a `ReceivedRequest` lies inside its backing store
//!   - String payloads are non-empty and NUL-terminated
//!   - At most MAX_REQUEST_ADDRESS_COUNT areas are mapped per request
//!
//! Offsets arriving from the peer are treated as untrusted input. Every sum is
//! checked and every bound is validated before a slice is ever produced; a
//! failed check discards the whole message with `Error::BadData`.

use core::ops::Deref;

use parking_lot::MappedRwLockReadGuard;
use ufs_abi::{AreaId, AreaMapping, Kernel};

use crate::address::{Address, AddressLocation};
use crate::dispatch::Typed;
use crate::request::{
    decode_fixed, read_address, read_tag, AddressField, AddressInfo, AddressKind, RequestBody,
    RequestLayout, REQUEST_HEADER_SIZE,
};
use crate::requests::{decode_request, Request, RequestKind};
use crate::{Error, Result, MAX_REQUEST_ADDRESS_COUNT};

/// Validated location of one address field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedAddress {
    /// Null address.
    Null,
    /// Bytes `offset..offset + size` of the message.
    Buffer {
        /// Offset from the request start.
        offset: usize,
        /// Payload length.
        size: usize,
    },
    /// Bytes `offset..offset + size` of a mapped area.
    Area {
        /// Backing area.
        area: AreaId,
        /// Offset within the area.
        offset: usize,
        /// Payload length.
        size: usize,
    },
}

impl ResolvedAddress {
    /// Payload length; zero for null.
    pub fn size(&self) -> usize {
        match *self {
            Self::Null => 0,
            Self::Buffer { size, .. } | Self::Area { size, .. } => size,
        }
    }
}

/// Borrowed payload bytes.
#[derive(Debug)]
pub enum Payload<'a> {
    /// Payload inside the message.
    Buffer(&'a [u8]),
    /// Payload inside a mapped area.
    Area(MappedRwLockReadGuard<'a, [u8]>),
}

impl Deref for Payload<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Buffer(bytes) => bytes,
            Self::Area(guard) => guard,
        }
    }
}

/// A received message whose addresses have all been validated.
#[derive(Debug)]
pub struct ReceivedRequest {
    kind: RequestKind,
    message: Vec<u8>,
    resolved: Vec<ResolvedAddress>,
    mappings: Vec<AreaMapping>,
}

/// Validates `message` and maps the areas it references.
///
/// Fails with [`Error::BadData`] when the tag is unknown, the fixed portion is
/// truncated, an address escapes its backing store, a declared size exceeds
/// the field's limit, a string lacks its terminator or an area cannot be
/// mapped. On failure every mapping made so far is dropped again.
pub fn relocate_request(kernel: &Kernel, message: Vec<u8>) -> Result<ReceivedRequest> {
    if message.len() < REQUEST_HEADER_SIZE {
        return Err(Error::BadData);
    }
    let tag = read_tag(&message)?;
    let kind = RequestKind::from_tag(tag).ok_or_else(|| {
        log::warn!("ufs-ipc: rejecting request with unknown tag {tag}");
        Error::BadData
    })?;
    let layout = kind.layout();
    if message.len() < layout.fixed_size() {
        log::warn!(
            "ufs-ipc: truncated {} ({} of {} bytes)",
            kind.name(),
            message.len(),
            layout.fixed_size()
        );
        return Err(Error::BadData);
    }

    let mut mappings = Vec::new();
    let mut resolved = Vec::with_capacity(layout.addresses.len());
    for (index, info) in layout.addresses.iter().enumerate() {
        let address = read_address(&message, &layout, index)?;
        let entry = resolve(kernel, &message, &layout, &mut mappings, address, info)
            .inspect_err(|_| {
                log::warn!("ufs-ipc: {} address {index} rejected: {address:?}", kind.name());
            })?;
        resolved.push(entry);
    }
    if !mappings.is_empty() {
        log::debug!("ufs-ipc: {} mapped {} area(s)", kind.name(), mappings.len());
    }
    Ok(ReceivedRequest { kind, message, resolved, mappings })
}

fn resolve(
    kernel: &Kernel,
    message: &[u8],
    layout: &RequestLayout,
    mappings: &mut Vec<AreaMapping>,
    address: Address,
    info: &AddressInfo,
) -> Result<ResolvedAddress> {
    let offset = address.offset() as usize;
    let size = address.size() as usize;
    if size > info.max_size {
        return Err(Error::BadData);
    }
    let end = offset.checked_add(size).ok_or(Error::BadData)?;
    let resolved = match address.location()? {
        AddressLocation::Null => return Ok(ResolvedAddress::Null),
        AddressLocation::PortBuffer => {
            if offset < layout.fixed_size() || end > message.len() {
                return Err(Error::BadData);
            }
            ResolvedAddress::Buffer { offset, size }
        }
        AddressLocation::Area(area) => {
            let mapping = match mappings.iter().position(|mapping| mapping.id() == area) {
                Some(slot) => &mappings[slot],
                None => {
                    if mappings.len() >= MAX_REQUEST_ADDRESS_COUNT {
                        return Err(Error::BadData);
                    }
                    let mapping = kernel.map_area(area).map_err(|_| Error::BadData)?;
                    mappings.push(mapping);
                    &mappings[mappings.len() - 1]
                }
            };
            if end > mapping.size() {
                return Err(Error::BadData);
            }
            ResolvedAddress::Area { area, offset, size }
        }
    };
    if info.kind == AddressKind::String {
        let terminated = match resolved {
            ResolvedAddress::Buffer { .. } => message[offset..end].last() == Some(&0),
            ResolvedAddress::Area { area, .. } => mappings
                .iter()
                .find(|mapping| mapping.id() == area)
                .and_then(|mapping| mapping.read_range(offset, size))
                .is_some_and(|bytes| bytes.last() == Some(&0)),
            ResolvedAddress::Null => true,
        };
        if !terminated {
            return Err(Error::BadData);
        }
    }
    Ok(resolved)
}

impl ReceivedRequest {
    /// Kind of the message.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Raw message bytes, fixed portion first.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Areas mapped for this message.
    pub fn area_ids(&self) -> Vec<AreaId> {
        self.mappings.iter().map(AreaMapping::id).collect()
    }

    /// Returns `true` when the payload lives at least partly in areas, which
    /// obliges the receiver of a reply to acknowledge it.
    pub fn needs_receipt(&self) -> bool {
        !self.mappings.is_empty()
    }

    fn expect_kind<R: RequestBody>(&self) -> Result<()> {
        if R::KIND == self.kind {
            Ok(())
        } else {
            Err(Error::BadValue)
        }
    }

    /// Decodes the fixed fields as `R`.
    pub fn body<R: RequestBody>(&self) -> Result<R> {
        self.expect_kind::<R>()?;
        decode_fixed(&self.message)
    }

    /// Decodes the fixed fields into the [`Request`] sum type.
    pub fn decode(&self) -> Result<Request> {
        decode_request(self.kind, &self.message)
    }

    /// Typed view used by dispatch.
    pub fn typed<R: RequestBody>(&self) -> Result<Typed<'_, R>> {
        Ok(Typed::new(self.body::<R>()?, self))
    }

    /// Raw address as received.
    pub fn address<R: RequestBody>(&self, field: AddressField<R>) -> Result<Address> {
        self.expect_kind::<R>()?;
        read_address(&self.message, &R::LAYOUT, field.index())
    }

    /// Validated location of `field`.
    pub fn resolved<R: RequestBody>(&self, field: AddressField<R>) -> Result<ResolvedAddress> {
        self.expect_kind::<R>()?;
        self.resolved.get(field.index()).copied().ok_or(Error::BadValue)
    }

    /// Payload of `field`; `None` for a null address.
    pub fn data<R: RequestBody>(&self, field: AddressField<R>) -> Result<Option<Payload<'_>>> {
        let resolved = self.resolved(field)?;
        self.payload(resolved)
    }

    /// String payload of `field` without its terminator.
    pub fn string<R: RequestBody>(&self, field: AddressField<R>) -> Result<Option<String>> {
        let Some(bytes) = self.data(field)? else {
            return Ok(None);
        };
        let text = bytes.strip_suffix(&[0]).ok_or(Error::BadData)?;
        String::from_utf8(text.to_vec()).map(Some).map_err(|_| Error::BadData)
    }

    fn payload(&self, resolved: ResolvedAddress) -> Result<Option<Payload<'_>>> {
        match resolved {
            ResolvedAddress::Null => Ok(None),
            ResolvedAddress::Buffer { offset, size } => {
                let end = offset.checked_add(size).ok_or(Error::BadData)?;
                let bytes = self.message.get(offset..end).ok_or(Error::BadData)?;
                Ok(Some(Payload::Buffer(bytes)))
            }
            ResolvedAddress::Area { area, offset, size } => {
                let mapping = self
                    .mappings
                    .iter()
                    .find(|mapping| mapping.id() == area)
                    .ok_or(Error::BadData)?;
                let bytes = mapping.read_range(offset, size).ok_or(Error::BadData)?;
                Ok(Some(Payload::Area(bytes)))
            }
        }
    }
}
