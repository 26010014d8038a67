// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Userland filesystem server and its kernel-side client
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - FileSystem: backend interface, every operation optional
//!   - UserlandRequestHandler: request dispatch onto a FileSystem
//!   - UserlandServer: connection port plus one thread per request port
//!   - UfsClient: kernel-side proxy issuing requests and validating replies
//!   - dirent: directory entry records
//!
//! DEPENDS_ON: ufs-ipc (transport), parking_lot (shared backend), thiserror, log

pub mod client;
pub mod dirent;
pub mod fs;
pub mod handler;
pub mod server;

use thiserror::Error;
use ufs_ipc::ConfigError;

pub use client::{ClientError, UfsClient};
pub use fs::{Created, FileSystem, FsError, FsResult, MountParams, Mounted, VNodeInfo};
pub use handler::UserlandRequestHandler;
pub use server::UserlandServer;

/// Result alias used by the server.
pub type Result<T> = core::result::Result<T, ServerError>;

/// Errors surfaced while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Transport level failure.
    #[error("transport error: {0}")]
    Transport(#[from] ufs_ipc::Error),
    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// A worker thread could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    /// A worker thread panicked.
    #[error("worker thread panicked")]
    WorkerPanicked,
}
