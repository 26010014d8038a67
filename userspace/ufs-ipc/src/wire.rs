// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Little-endian codec for the fixed portion of requests.
//!
//! Every fixed field implements [`WireField`] with a constant encoded size, so
//! the size of a request's fixed portion is known at compile time.

use crate::{Error, Result};

/// Maximum length of a file name, terminator included.
pub const FILE_NAME_LENGTH: usize = 256;
/// Maximum length of a path, terminator included.
pub const PATH_NAME_LENGTH: usize = 1024;
/// Maximum length of an OS-level name (fs names, device names).
pub const OS_NAME_LENGTH: usize = 32;
/// Maximum length of a device name in [`FsInfo`].
pub const DEVICE_NAME_LENGTH: usize = 128;

/// Sequential writer over a fixed slice.
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WireWriter<'a> {
    /// Starts writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Appends raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos.checked_add(bytes.len()).ok_or(Error::BadValue)?;
        let target = self.buf.get_mut(self.pos..end).ok_or(Error::BadValue)?;
        target.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Sequential reader over a fixed slice.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Starts reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Consumes `len` raw bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Error::BadData)?;
        let bytes = self.buf.get(self.pos..end).ok_or(Error::BadData)?;
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// A value with a fixed-size wire encoding.
pub trait WireField: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;
    /// Appends the encoding to `w`.
    fn put(&self, w: &mut WireWriter<'_>) -> Result<()>;
    /// Reads one value from `r`.
    fn get(r: &mut WireReader<'_>) -> Result<Self>;
}

macro_rules! wire_int {
    ($($ty:ty),*) => {$(
        impl WireField for $ty {
            const SIZE: usize = core::mem::size_of::<$ty>();
            fn put(&self, w: &mut WireWriter<'_>) -> Result<()> {
                w.put_bytes(&self.to_le_bytes())
            }
            fn get(r: &mut WireReader<'_>) -> Result<Self> {
                Ok(<$ty>::from_le_bytes(r.take_array()?))
            }
        }
    )*};
}

wire_int!(u8, u16, u32, u64, i32, i64);

impl WireField for bool {
    const SIZE: usize = 1;
    fn put(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_bytes(&[u8::from(*self)])
    }
    fn get(r: &mut WireReader<'_>) -> Result<Self> {
        match r.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::BadData),
        }
    }
}

impl<const N: usize> WireField for [u8; N] {
    const SIZE: usize = N;
    fn put(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_bytes(self)
    }
    fn get(r: &mut WireReader<'_>) -> Result<Self> {
        r.take_array()
    }
}

/// Declares a plain struct whose fields are encoded in declaration order.
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident { $( $(#[$fmeta:meta])* pub $field:ident: $ty:ty, )* }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name { $( $(#[$fmeta])* pub $field: $ty, )* }

        impl WireField for $name {
            const SIZE: usize = 0 $(+ <$ty as WireField>::SIZE)*;
            fn put(&self, w: &mut WireWriter<'_>) -> Result<()> {
                $( self.$field.put(w)?; )*
                Ok(())
            }
            fn get(r: &mut WireReader<'_>) -> Result<Self> {
                Ok(Self { $( $field: <$ty as WireField>::get(r)?, )* })
            }
        }
    };
}

wire_struct! {
    /// Identity of the kernel thread that issued a request.
    #[derive(Default, Copy)]
    pub struct KernelContext {
        /// Team (process) id.
        pub team: i32,
        /// Thread id.
        pub thread: i32,
        /// Effective user id.
        pub user: u32,
        /// Effective group id.
        pub group: u32,
    }
}

wire_struct! {
    /// Node status as exchanged with the filesystem.
    #[derive(Default)]
    pub struct Stat {
        /// Device id.
        pub dev: i32,
        /// Node id.
        pub ino: u64,
        /// Type and permission bits.
        pub mode: u32,
        /// Hard link count.
        pub nlink: u32,
        /// Owner.
        pub uid: u32,
        /// Group.
        pub gid: u32,
        /// Size in bytes.
        pub size: i64,
        /// Preferred I/O block size.
        pub blksize: u32,
        /// Access time, nanoseconds since the epoch.
        pub atime: i64,
        /// Modification time.
        pub mtime: i64,
        /// Status change time.
        pub ctime: i64,
        /// Creation time.
        pub crtime: i64,
        /// Type code of typed files.
        pub node_type: u32,
        /// Allocated 512-byte blocks.
        pub blocks: i64,
    }
}

wire_struct! {
    /// Volume information.
    pub struct FsInfo {
        /// Device id.
        pub dev: i32,
        /// Root node id.
        pub root: u64,
        /// Volume flags.
        pub flags: u32,
        /// Fundamental block size.
        pub block_size: i64,
        /// Optimal I/O size.
        pub io_size: i64,
        /// Total blocks.
        pub total_blocks: i64,
        /// Free blocks.
        pub free_blocks: i64,
        /// Total nodes.
        pub total_nodes: i64,
        /// Free nodes.
        pub free_nodes: i64,
        /// NUL-padded device name.
        pub device_name: [u8; DEVICE_NAME_LENGTH],
        /// NUL-padded volume name.
        pub volume_name: [u8; FILE_NAME_LENGTH],
        /// NUL-padded filesystem handler name.
        pub fsh_name: [u8; OS_NAME_LENGTH],
    }
}

impl Default for FsInfo {
    fn default() -> Self {
        Self {
            dev: 0,
            root: 0,
            flags: 0,
            block_size: 0,
            io_size: 0,
            total_blocks: 0,
            free_blocks: 0,
            total_nodes: 0,
            free_nodes: 0,
            device_name: [0; DEVICE_NAME_LENGTH],
            volume_name: [0; FILE_NAME_LENGTH],
            fsh_name: [0; OS_NAME_LENGTH],
        }
    }
}

impl FsInfo {
    /// Volume name up to the first NUL.
    pub fn volume_name(&self) -> &[u8] {
        until_nul(&self.volume_name)
    }

    /// Stores `name`, truncated to leave room for a terminator.
    pub fn set_volume_name(&mut self, name: &str) {
        copy_padded(&mut self.volume_name, name.as_bytes());
    }

    /// Stores the filesystem handler name.
    pub fn set_fsh_name(&mut self, name: &str) {
        copy_padded(&mut self.fsh_name, name.as_bytes());
    }
}

wire_struct! {
    /// Attribute type and size.
    #[derive(Default)]
    pub struct AttrInfo {
        /// Attribute type code.
        pub attr_type: u32,
        /// Attribute size in bytes.
        pub size: i64,
    }
}

wire_struct! {
    /// Index type, size and ownership.
    #[derive(Default)]
    pub struct IndexInfo {
        /// Indexed attribute type.
        pub index_type: u32,
        /// Index size in bytes.
        pub size: i64,
        /// Modification time.
        pub modification_time: i64,
        /// Creation time.
        pub creation_time: i64,
        /// Owner.
        pub uid: u32,
        /// Group.
        pub gid: u32,
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

fn copy_padded(target: &mut [u8], source: &[u8]) {
    target.fill(0);
    let len = source.len().min(target.len().saturating_sub(1));
    target[..len].copy_from_slice(&source[..len]);
}
