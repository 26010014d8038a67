// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Status codes carried in the `error` field of replies.

use crate::Error;

/// Success.
pub const OK: i32 = 0;
/// Unspecified failure.
pub const ERROR: i32 = -1;
/// Out of memory.
pub const NO_MEMORY: i32 = -2;
/// Invalid argument.
pub const BAD_VALUE: i32 = -3;
/// No such entry.
pub const ENTRY_NOT_FOUND: i32 = -4;
/// Entry already exists.
pub const FILE_EXISTS: i32 = -5;
/// Expected a directory.
pub const NOT_A_DIRECTORY: i32 = -6;
/// Did not expect a directory.
pub const IS_A_DIRECTORY: i32 = -7;
/// Directory still has entries.
pub const DIRECTORY_NOT_EMPTY: i32 = -8;
/// Permission denied.
pub const NOT_ALLOWED: i32 = -9;
/// Volume is read-only.
pub const READ_ONLY_DEVICE: i32 = -10;
/// Operation not implemented by the filesystem.
pub const UNSUPPORTED: i32 = -11;
/// Malformed data.
pub const BAD_DATA: i32 = -12;
/// Wait elapsed.
pub const TIMED_OUT: i32 = -13;
/// Caller's buffer is too small.
pub const BUFFER_OVERFLOW: i32 = -14;
/// Stale or unknown cookie.
pub const BAD_COOKIE: i32 = -15;

/// Maps a transport error onto a status code.
pub fn from_error(err: Error) -> i32 {
    match err {
        Error::BadValue | Error::UnexpectedRequest(_) => BAD_VALUE,
        Error::Capacity => BUFFER_OVERFLOW,
        Error::NoMemory => NO_MEMORY,
        Error::BadData => BAD_DATA,
        Error::TimedOut => TIMED_OUT,
        _ => ERROR,
    }
}

/// `Ok(())` for [`OK`], the code otherwise.
pub fn check(code: i32) -> Result<(), i32> {
    if code == OK {
        Ok(())
    } else {
        Err(code)
    }
}

/// Short name of `code` for log lines.
pub fn name(code: i32) -> &'static str {
    match code {
        OK => "ok",
        NO_MEMORY => "no memory",
        BAD_VALUE => "bad value",
        ENTRY_NOT_FOUND => "entry not found",
        FILE_EXISTS => "file exists",
        NOT_A_DIRECTORY => "not a directory",
        IS_A_DIRECTORY => "is a directory",
        DIRECTORY_NOT_EMPTY => "directory not empty",
        NOT_ALLOWED => "not allowed",
        READ_ONLY_DEVICE => "read-only device",
        UNSUPPORTED => "unsupported",
        BAD_DATA => "bad data",
        TIMED_OUT => "timed out",
        BUFFER_OVERFLOW => "buffer overflow",
        BAD_COOKIE => "bad cookie",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestKind;

    #[test]
    fn transport_errors_map_to_codes() {
        assert_eq!(from_error(Error::Capacity), BUFFER_OVERFLOW);
        assert_eq!(from_error(Error::UnexpectedRequest(RequestKind::IoctlRequest)), BAD_VALUE);
        assert_eq!(from_error(Error::Disconnected), ERROR);
    }

    #[test]
    fn check_and_name() {
        assert_eq!(check(OK), Ok(()));
        assert_eq!(check(ENTRY_NOT_FOUND), Err(ENTRY_NOT_FOUND));
        assert_eq!(name(UNSUPPORTED), "unsupported");
        assert_eq!(name(-999), "error");
    }
}
