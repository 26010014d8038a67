// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Relocatable references to variable-length request payloads.
//!
//! An address is three little-endian words: `area: i32`, `offset: u32`,
//! `size: u32`. The area word selects the backing store:
//!
//! | area  | meaning                                              |
//! |-------|------------------------------------------------------|
//! | `0`   | null; offset and size must be zero                   |
//! | `-1`  | inside the message, offset relative to request start |
//! | `> 0` | shared-memory area with that id                      |
//!
//! A zero-filled address is therefore null, and a zero-length payload in the
//! message buffer (`area == -1, size == 0`) stays distinguishable from it.

use ufs_abi::AreaId;

use crate::{Error, Result};

/// Encoded size of an [`Address`].
pub const ADDRESS_WIRE_SIZE: usize = 12;
/// Area word of a null address.
pub const NULL_AREA: i32 = 0;
/// Area word of a payload stored in the message itself.
pub const PORT_BUFFER_AREA: i32 = -1;

/// Where an address points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressLocation {
    /// No payload.
    Null,
    /// Payload lives in the message buffer.
    PortBuffer,
    /// Payload lives in a shared-memory area.
    Area(AreaId),
}

/// Relocatable (area, offset, size) triple as carried on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Address {
    area: i32,
    offset: u32,
    size: u32,
}

impl Address {
    /// Canonical null address.
    pub const NULL: Self = Self { area: NULL_AREA, offset: 0, size: 0 };

    /// Builds an address from raw words.
    pub const fn new(area: i32, offset: u32, size: u32) -> Self {
        Self { area, offset, size }
    }

    /// Overwrites all three words.
    pub fn set_to(&mut self, area: i32, offset: u32, size: u32) {
        *self = Self { area, offset, size };
    }

    /// Raw area word.
    pub const fn area(&self) -> i32 {
        self.area
    }

    /// Offset within the backing store.
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Payload length in bytes.
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns `true` for the canonical null form.
    pub const fn is_null(&self) -> bool {
        self.area == NULL_AREA && self.offset == 0 && self.size == 0
    }

    /// Classifies the area word, rejecting values no peer may send.
    pub fn location(&self) -> Result<AddressLocation> {
        match self.area {
            NULL_AREA if self.offset == 0 && self.size == 0 => Ok(AddressLocation::Null),
            NULL_AREA => Err(Error::BadData),
            PORT_BUFFER_AREA => Ok(AddressLocation::PortBuffer),
            area if area > 0 => Ok(AddressLocation::Area(AreaId::from_raw(area))),
            _ => Err(Error::BadData),
        }
    }

    /// Encodes into exactly [`ADDRESS_WIRE_SIZE`] bytes.
    pub fn encode(&self, out: &mut [u8]) -> Result<()> {
        let out = out.get_mut(..ADDRESS_WIRE_SIZE).ok_or(Error::BadValue)?;
        out[0..4].copy_from_slice(&self.area.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        Ok(())
    }

    /// Decodes the first [`ADDRESS_WIRE_SIZE`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.get(..ADDRESS_WIRE_SIZE).ok_or(Error::BadData)?;
        let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        Ok(Self {
            area: i32::from_le_bytes(word(0)),
            offset: u32::from_le_bytes(word(4)),
            size: u32::from_le_bytes(word(8)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_bytes_decode_to_null() {
        let address = Address::decode(&[0u8; ADDRESS_WIRE_SIZE]).unwrap();
        assert!(address.is_null());
        assert_eq!(address, Address::default());
        assert_eq!(address.location().unwrap(), AddressLocation::Null);
    }

    #[test]
    fn empty_buffer_payload_is_not_null() {
        let address = Address::new(PORT_BUFFER_AREA, 0, 0);
        assert!(!address.is_null());
        assert_eq!(address.location().unwrap(), AddressLocation::PortBuffer);
    }

    #[test]
    fn set_to_overwrites() {
        let mut address = Address::new(7, 1, 2);
        address.set_to(PORT_BUFFER_AREA, 64, 10);
        assert_eq!(address, Address::new(-1, 64, 10));
        let mut bytes = [0u8; ADDRESS_WIRE_SIZE];
        address.encode(&mut bytes).unwrap();
        assert_eq!(Address::decode(&bytes).unwrap(), address);
    }

    #[test]
    fn invalid_area_words_are_corrupt() {
        assert_eq!(Address::new(-2, 0, 0).location().unwrap_err(), Error::BadData);
        assert_eq!(Address::new(NULL_AREA, 0, 4).location().unwrap_err(), Error::BadData);
        assert_eq!(
            Address::new(9, 0, 4).location().unwrap(),
            AddressLocation::Area(AreaId::from_raw(9))
        );
        assert_eq!(Address::decode(&[0u8; 11]).unwrap_err(), Error::BadData);
    }
}
