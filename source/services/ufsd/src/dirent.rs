// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Directory entry records carried in `ReadDirReply` buffers.
//!
//! Record layout (little endian): `ino: u64`, `reclen: u16`, then the name
//! and a NUL, zero padded so `reclen` is a multiple of 8.

use ufs_ipc::Error;

use crate::fs::{FsError, FsResult};

/// Bytes before the name.
pub const DIRENT_HEADER_SIZE: usize = 10;

const DIRENT_ALIGNMENT: usize = 8;

/// Size of the record holding `name_len` name bytes.
pub fn record_len(name_len: usize) -> usize {
    (DIRENT_HEADER_SIZE + name_len + 1).next_multiple_of(DIRENT_ALIGNMENT)
}

/// Appends records to a caller-provided buffer.
#[derive(Debug)]
pub struct DirentWriter<'a> {
    buffer: &'a mut [u8],
    used: usize,
    count: u32,
}

impl<'a> DirentWriter<'a> {
    /// Writes into `buffer` from its start.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, used: 0, count: 0 }
    }

    /// Appends one record; returns `Ok(false)` when it does not fit.
    pub fn push(&mut self, ino: u64, name: &str) -> FsResult<bool> {
        if name.is_empty() || name.as_bytes().contains(&0) {
            return Err(FsError::InvalidArgument);
        }
        let len = record_len(name.len());
        let Ok(reclen) = u16::try_from(len) else {
            return Err(FsError::InvalidArgument);
        };
        let Some(record) = self.buffer.get_mut(self.used..self.used + len) else {
            return Ok(false);
        };
        record.fill(0);
        record[..8].copy_from_slice(&ino.to_le_bytes());
        record[8..10].copy_from_slice(&reclen.to_le_bytes());
        record[DIRENT_HEADER_SIZE..DIRENT_HEADER_SIZE + name.len()].copy_from_slice(name.as_bytes());
        self.used += len;
        self.count += 1;
        Ok(true)
    }

    /// Records written so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.used
    }

    /// Returns `true` before the first record.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
}

/// One parsed record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dirent<'a> {
    /// Node id.
    pub ino: u64,
    /// Entry name.
    pub name: &'a str,
}

/// Parses `count` records from `buffer`.
pub fn parse_dirents(buffer: &[u8], count: u32) -> Result<Vec<Dirent<'_>>, Error> {
    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    let mut rest = buffer;
    for _ in 0..count {
        if rest.len() < DIRENT_HEADER_SIZE {
            return Err(Error::BadData);
        }
        let ino = u64::from_le_bytes(rest[..8].try_into().map_err(|_| Error::BadData)?);
        let reclen = u16::from_le_bytes([rest[8], rest[9]]) as usize;
        if reclen <= DIRENT_HEADER_SIZE || reclen % DIRENT_ALIGNMENT != 0 || reclen > rest.len() {
            return Err(Error::BadData);
        }
        let name_area = &rest[DIRENT_HEADER_SIZE..reclen];
        let end = name_area.iter().position(|&b| b == 0).ok_or(Error::BadData)?;
        let name = core::str::from_utf8(&name_area[..end]).map_err(|_| Error::BadData)?;
        entries.push(Dirent { ino, name });
        rest = &rest[reclen..];
    }
    Ok(entries)
}
