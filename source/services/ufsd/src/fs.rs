// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Filesystem backend interface served by [`crate::UserlandRequestHandler`].
//!
//! Every operation has a default that reports [`FsError::Unsupported`], so a
//! backend only implements what it supports. Volume, node and cookie ids are
//! opaque to the server and handed back verbatim.

use thiserror::Error;
use ufs_ipc::status;
use ufs_ipc::wire::{AttrInfo, FsInfo, Stat};

/// Result alias for filesystem operations.
pub type FsResult<T> = core::result::Result<T, FsError>;

/// Errors reported by a [`FileSystem`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FsError {
    /// Operation not implemented.
    #[error("operation not supported")]
    Unsupported,
    /// No such entry.
    #[error("entry not found")]
    NotFound,
    /// Entry already exists.
    #[error("entry exists")]
    Exists,
    /// Expected a directory.
    #[error("not a directory")]
    NotADirectory,
    /// Did not expect a directory.
    #[error("is a directory")]
    IsADirectory,
    /// Directory still has entries.
    #[error("directory not empty")]
    NotEmpty,
    /// Unknown cookie.
    #[error("bad cookie")]
    BadCookie,
    /// Invalid argument.
    #[error("invalid argument")]
    InvalidArgument,
    /// Permission denied.
    #[error("not allowed")]
    NotAllowed,
    /// Volume is read-only.
    #[error("read-only volume")]
    ReadOnly,
    /// Caller's buffer cannot hold a single result.
    #[error("buffer too small")]
    BufferOverflow,
    /// Backend ran out of memory.
    #[error("out of memory")]
    NoMemory,
    /// Backend-specific status code.
    #[error("filesystem status {0}")]
    Status(i32),
}

impl FsError {
    /// Status code carried in replies.
    pub fn status(self) -> i32 {
        match self {
            Self::Unsupported => status::UNSUPPORTED,
            Self::NotFound => status::ENTRY_NOT_FOUND,
            Self::Exists => status::FILE_EXISTS,
            Self::NotADirectory => status::NOT_A_DIRECTORY,
            Self::IsADirectory => status::IS_A_DIRECTORY,
            Self::NotEmpty => status::DIRECTORY_NOT_EMPTY,
            Self::BadCookie => status::BAD_COOKIE,
            Self::InvalidArgument => status::BAD_VALUE,
            Self::NotAllowed => status::NOT_ALLOWED,
            Self::ReadOnly => status::READ_ONLY_DEVICE,
            Self::BufferOverflow => status::BUFFER_OVERFLOW,
            Self::NoMemory => status::NO_MEMORY,
            Self::Status(code) => code,
        }
    }

    /// Inverse of [`status`](Self::status); `None` for [`status::OK`].
    pub fn from_status(code: i32) -> Option<Self> {
        Some(match code {
            status::OK => return None,
            status::UNSUPPORTED => Self::Unsupported,
            status::ENTRY_NOT_FOUND => Self::NotFound,
            status::FILE_EXISTS => Self::Exists,
            status::NOT_A_DIRECTORY => Self::NotADirectory,
            status::IS_A_DIRECTORY => Self::IsADirectory,
            status::DIRECTORY_NOT_EMPTY => Self::NotEmpty,
            status::BAD_COOKIE => Self::BadCookie,
            status::BAD_VALUE => Self::InvalidArgument,
            status::NOT_ALLOWED => Self::NotAllowed,
            status::READ_ONLY_DEVICE => Self::ReadOnly,
            status::BUFFER_OVERFLOW => Self::BufferOverflow,
            status::NO_MEMORY => Self::NoMemory,
            other => Self::Status(other),
        })
    }
}

/// Status code of an operation result.
pub fn status_of<T>(result: &FsResult<T>) -> i32 {
    match result {
        Ok(_) => status::OK,
        Err(err) => err.status(),
    }
}

/// Arguments of a mount.
#[derive(Clone, Copy, Debug)]
pub struct MountParams<'a> {
    /// Kernel-side volume id.
    pub nsid: i32,
    /// Device path, if any.
    pub device: Option<&'a str>,
    /// Free-form mount parameters.
    pub parameters: Option<&'a str>,
    /// Mount flags.
    pub flags: u32,
}

/// Outcome of a successful mount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mounted {
    /// Volume id used by later requests.
    pub volume: u64,
    /// Root node id.
    pub root: u64,
}

/// Node published by `read_vnode`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VNodeInfo {
    /// Backend node handle.
    pub node: u64,
    /// Type bits of the node.
    pub node_type: u32,
    /// Publication flags.
    pub flags: u32,
}

/// A file created by `create`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Created {
    /// Node id of the new file.
    pub vnid: u64,
    /// Cookie of the opened file.
    pub cookie: u64,
}

/// Filesystem backend.
#[allow(unused_variables)]
pub trait FileSystem: Send {
    /// Handler name reported in volume info.
    fn name(&self) -> &str;

    /// Capability bits advertised on connect and mount.
    fn capabilities(&self) -> u64 {
        0
    }

    /// Mounts a volume.
    fn mount(&mut self, params: MountParams<'_>) -> FsResult<Mounted> {
        Err(FsError::Unsupported)
    }
    /// Unmounts a volume.
    fn unmount(&mut self, volume: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Flushes a volume.
    fn sync(&mut self, volume: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Reads volume information.
    fn read_fs_info(&mut self, volume: u64) -> FsResult<FsInfo> {
        Err(FsError::Unsupported)
    }
    /// Updates volume information selected by `mask`.
    fn write_fs_info(&mut self, volume: u64, info: &FsInfo, mask: u32) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Resolves `name` in directory `dir`.
    fn lookup(&mut self, volume: u64, dir: u64, name: &str) -> FsResult<u64> {
        Err(FsError::Unsupported)
    }
    /// Name of `node` inside its parent.
    fn get_vnode_name(&mut self, volume: u64, node: u64) -> FsResult<String> {
        Err(FsError::Unsupported)
    }
    /// Loads node `vnid`.
    fn read_vnode(&mut self, volume: u64, vnid: u64, reenter: bool) -> FsResult<VNodeInfo> {
        Err(FsError::Unsupported)
    }
    /// Releases a loaded node.
    fn write_vnode(&mut self, volume: u64, node: u64, reenter: bool) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Deletes a node whose last reference is gone.
    fn remove_vnode(&mut self, volume: u64, node: u64, reenter: bool) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Reads the target of a symlink into `buffer`, returning its full length.
    fn read_symlink(&mut self, volume: u64, node: u64, buffer: &mut [u8]) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }
    /// Creates a symlink.
    fn create_symlink(
        &mut self,
        volume: u64,
        dir: u64,
        name: &str,
        target: &str,
        mode: u32,
    ) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Removes a non-directory entry.
    fn unlink(&mut self, volume: u64, dir: u64, name: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Moves an entry.
    fn rename(
        &mut self,
        volume: u64,
        old_dir: u64,
        old_name: &str,
        new_dir: u64,
        new_name: &str,
    ) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Checks access `mode` to `node`.
    fn access(&mut self, volume: u64, node: u64, mode: i32) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Reads node status.
    fn read_stat(&mut self, volume: u64, node: u64) -> FsResult<Stat> {
        Err(FsError::Unsupported)
    }
    /// Updates node status fields selected by `mask`.
    fn write_stat(&mut self, volume: u64, node: u64, stat: &Stat, mask: u32) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Creates and opens a file.
    fn create(
        &mut self,
        volume: u64,
        dir: u64,
        name: &str,
        open_mode: i32,
        mode: u32,
    ) -> FsResult<Created> {
        Err(FsError::Unsupported)
    }
    /// Opens a file.
    fn open(&mut self, volume: u64, node: u64, open_mode: i32) -> FsResult<u64> {
        Err(FsError::Unsupported)
    }
    /// Closes a file cookie.
    fn close(&mut self, volume: u64, node: u64, cookie: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Frees a closed file cookie.
    fn free_cookie(&mut self, volume: u64, node: u64, cookie: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Reads at `pos` into `buffer`.
    fn read(
        &mut self,
        volume: u64,
        node: u64,
        cookie: u64,
        pos: i64,
        buffer: &mut [u8],
    ) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }
    /// Writes `data` at `pos`.
    fn write(
        &mut self,
        volume: u64,
        node: u64,
        cookie: u64,
        pos: i64,
        data: &[u8],
    ) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }

    /// Creates a directory.
    fn create_dir(&mut self, volume: u64, dir: u64, name: &str, mode: u32) -> FsResult<u64> {
        Err(FsError::Unsupported)
    }
    /// Removes an empty directory.
    fn remove_dir(&mut self, volume: u64, dir: u64, name: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Opens a directory for iteration.
    fn open_dir(&mut self, volume: u64, node: u64) -> FsResult<u64> {
        Err(FsError::Unsupported)
    }
    /// Closes a directory cookie.
    fn close_dir(&mut self, volume: u64, node: u64, cookie: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Frees a closed directory cookie.
    fn free_dir_cookie(&mut self, volume: u64, node: u64, cookie: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
    /// Encodes up to `count` entries into `buffer` with [`crate::dirent`];
    /// returns the number written, 0 at the end.
    fn read_dir(
        &mut self,
        volume: u64,
        node: u64,
        cookie: u64,
        buffer: &mut [u8],
        count: u32,
    ) -> FsResult<u32> {
        Err(FsError::Unsupported)
    }
    /// Restarts iteration of a directory cookie.
    fn rewind_dir(&mut self, volume: u64, node: u64, cookie: u64) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    /// Reads attribute `name` at `pos` into `buffer`.
    fn read_attr(
        &mut self,
        volume: u64,
        node: u64,
        name: &str,
        pos: i64,
        buffer: &mut [u8],
    ) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }
    /// Writes attribute `name` at `pos`, creating it with `attr_type` if needed.
    fn write_attr(
        &mut self,
        volume: u64,
        node: u64,
        name: &str,
        attr_type: u32,
        pos: i64,
        data: &[u8],
    ) -> FsResult<usize> {
        Err(FsError::Unsupported)
    }
    /// Type and size of attribute `name`.
    fn read_attr_stat(&mut self, volume: u64, node: u64, name: &str) -> FsResult<AttrInfo> {
        Err(FsError::Unsupported)
    }
    /// Removes attribute `name`.
    fn remove_attr(&mut self, volume: u64, node: u64, name: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
}
