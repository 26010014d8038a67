// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request shapes and the fixed-portion layout.
//!
//! Wire layout of a request, all little-endian:
//!
//! ```text
//! +0        tag: u32          RequestKind
//! +4        reserved: u32     zero
//! +8        N x Address       one per address field, in declaration order
//! +8+12N    body              fixed fields in declaration order
//! ```
//!
//! Variable-length payloads follow the fixed portion in the message, or live
//! in shared-memory areas, and are reached only through the address table.

use core::fmt;
use core::marker::PhantomData;

use crate::address::{Address, ADDRESS_WIRE_SIZE};
use crate::requests::{Request, RequestKind};
use crate::wire::{WireReader, WireWriter};
use crate::{Error, Result};

/// Size of the common request header.
pub const REQUEST_HEADER_SIZE: usize = 8;

/// What an address field carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    /// NUL-terminated string; the terminator counts towards the size.
    String,
    /// Opaque bytes.
    Data,
}

/// Static description of one address field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressInfo {
    /// Payload kind.
    pub kind: AddressKind,
    /// Largest payload a peer may declare.
    pub max_size: usize,
}

impl AddressInfo {
    /// String field of at most `max_size` bytes including the terminator.
    pub const fn string(max_size: usize) -> Self {
        Self { kind: AddressKind::String, max_size }
    }

    /// Unbounded data field (bounded by its backing store only).
    pub const fn data() -> Self {
        Self { kind: AddressKind::Data, max_size: u32::MAX as usize }
    }

    /// Data field of at most `max_size` bytes.
    pub const fn data_max(max_size: usize) -> Self {
        Self { kind: AddressKind::Data, max_size }
    }
}

/// Layout of a request's fixed portion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestLayout {
    /// Address fields, in wire order.
    pub addresses: &'static [AddressInfo],
    /// Size of the body following the address table.
    pub body_size: usize,
}

impl RequestLayout {
    /// Offset of address field `index` from the request start.
    pub const fn address_offset(&self, index: usize) -> usize {
        REQUEST_HEADER_SIZE + index * ADDRESS_WIRE_SIZE
    }

    /// Offset of the body from the request start.
    pub const fn body_offset(&self) -> usize {
        self.address_offset(self.addresses.len())
    }

    /// Total size of the fixed portion.
    pub const fn fixed_size(&self) -> usize {
        self.body_offset() + self.body_size
    }
}

/// A request or reply body with a statically known shape.
pub trait RequestBody: Clone + fmt::Debug + Into<Request> + Sized {
    /// Wire tag.
    const KIND: RequestKind;
    /// Address fields, in wire order.
    const ADDRESSES: &'static [AddressInfo];
    /// Encoded size of the fixed fields.
    const BODY_SIZE: usize;
    /// Fixed-portion layout.
    const LAYOUT: RequestLayout =
        RequestLayout { addresses: Self::ADDRESSES, body_size: Self::BODY_SIZE };

    /// Encodes the fixed fields.
    fn encode_body(&self, w: &mut WireWriter<'_>) -> Result<()>;
    /// Decodes the fixed fields.
    fn decode_body(r: &mut WireReader<'_>) -> Result<Self>;
}

/// Typed handle naming one address field of `R`.
pub struct AddressField<R> {
    index: usize,
    _marker: PhantomData<fn() -> R>,
}

impl<R> AddressField<R> {
    /// Handle for field `index`; generated per request kind.
    pub const fn new(index: usize) -> Self {
        Self { index, _marker: PhantomData }
    }

    /// Position of the field in the address table.
    pub const fn index(self) -> usize {
        self.index
    }
}

impl<R> Clone for AddressField<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for AddressField<R> {}

impl<R> PartialEq for AddressField<R> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<R> Eq for AddressField<R> {}

impl<R: RequestBody> fmt::Debug for AddressField<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", R::KIND.name(), self.index)
    }
}

impl<R: RequestBody> AddressField<R> {
    /// Static description of the field.
    pub fn info(self) -> Result<AddressInfo> {
        R::ADDRESSES.get(self.index).copied().ok_or(Error::BadValue)
    }

    /// Offset of the field's address from the request start.
    pub fn offset(self) -> usize {
        R::LAYOUT.address_offset(self.index)
    }
}

/// Reads the wire tag of a message.
pub fn read_tag(message: &[u8]) -> Result<u32> {
    let bytes = message.get(..4).ok_or(Error::BadData)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Writes the header, a null address table and the body of `request`.
pub(crate) fn encode_fixed<R: RequestBody>(request: &R, out: &mut [u8]) -> Result<()> {
    let out = out.get_mut(..R::LAYOUT.fixed_size()).ok_or(Error::BadValue)?;
    out.fill(0);
    out[..4].copy_from_slice(&R::KIND.tag().to_le_bytes());
    encode_body_in_place(request, out)
}

/// Rewrites only the body of `request`, keeping header and addresses.
pub(crate) fn encode_body_in_place<R: RequestBody>(request: &R, fixed: &mut [u8]) -> Result<()> {
    let layout = R::LAYOUT;
    let body = fixed.get_mut(layout.body_offset()..layout.fixed_size()).ok_or(Error::BadValue)?;
    let mut writer = WireWriter::new(body);
    request.encode_body(&mut writer)?;
    debug_assert_eq!(writer.position(), layout.body_size);
    Ok(())
}

/// Decodes the body of a message already known to be of kind `R`.
pub(crate) fn decode_fixed<R: RequestBody>(message: &[u8]) -> Result<R> {
    let layout = R::LAYOUT;
    let body = message.get(layout.body_offset()..layout.fixed_size()).ok_or(Error::BadData)?;
    R::decode_body(&mut WireReader::new(body))
}

/// Reads address field `index` of a message.
pub(crate) fn read_address(message: &[u8], layout: &RequestLayout, index: usize) -> Result<Address> {
    let offset = layout.address_offset(index);
    Address::decode(message.get(offset..).ok_or(Error::BadData)?)
}
