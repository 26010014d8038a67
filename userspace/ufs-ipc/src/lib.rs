// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Userland filesystem transport and request marshalling
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable (wire tags may still be renumbered)
//!
//! PUBLIC API:
//!   - Port: duplex transport over two single-slot kernel ports plus a bounded buffer
//!   - RequestAllocator: builds requests in the port buffer, overflowing into areas
//!   - relocate_request() / ReceivedRequest: validated view of a received message
//!   - do_for_request() / RequestVisitor: exhaustive dispatch on the wire tag
//!   - RequestPort / PortPool: request-reply sessions, receipt acks, nested requests
//!   - TransportConfig: TOML-backed tuning knobs
//!
//! DEPENDENCIES:
//!   - ufs-abi: kernel ports and shared-memory areas
//!   - parking_lot: port pool synchronisation
//!   - serde/toml: configuration
//!   - thiserror/log: errors and diagnostics
//!
//! INVARIANTS:
//!   - At most MAX_REQUEST_ADDRESS_COUNT areas and deferred inits per request
//!   - Offsets received from a peer are only turned into slices by relocation
//!   - Timeouts, would-block and interruption never poison a port

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod address;
pub mod allocator;
pub mod config;
pub mod dispatch;
pub mod port;
pub mod port_pool;
pub mod relocate;
pub mod request;
pub mod request_port;
pub mod requests;
pub mod status;
pub mod wire;

use thiserror::Error;
use ufs_abi::KernelError;

pub use address::{Address, AddressLocation};
pub use allocator::{DataSlot, RequestAllocator, SentRequest};
pub use config::{ConfigError, TransportConfig};
pub use dispatch::{do_for_request, RequestVisitor, Typed};
pub use port::{Port, PortInfo};
pub use port_pool::{PooledPort, PortPool};
pub use relocate::{relocate_request, Payload, ReceivedRequest, ResolvedAddress};
pub use request::{AddressField, AddressInfo, AddressKind, RequestBody, RequestLayout};
pub use request_port::{RejectNested, RequestHandler, RequestPort};
pub use requests::{Request, RequestKind};
pub use ufs_abi::{Kernel, Wait};

/// Maximum number of overflow areas and deferred initializations per request.
pub const MAX_REQUEST_ADDRESS_COUNT: usize = 4;

/// Result type returned by transport operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the transport and marshalling layer.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Caller supplied an argument that does not fit the request shape.
    #[error("invalid argument")]
    BadValue,
    /// Request does not fit the port buffer and the area budget is spent.
    #[error("request exceeds transport capacity")]
    Capacity,
    /// Backing memory (area or port) could not be allocated.
    #[error("out of memory")]
    NoMemory,
    /// Received message failed validation and was discarded.
    #[error("corrupted request data")]
    BadData,
    /// Bounded wait elapsed.
    #[error("operation timed out")]
    TimedOut,
    /// Non-blocking attempt could not make progress.
    #[error("operation would block")]
    WouldBlock,
    /// Wait was interrupted.
    #[error("operation interrupted")]
    Interrupted,
    /// Peer endpoint is gone.
    #[error("peer disconnected")]
    Disconnected,
    /// Port was closed locally.
    #[error("port closed")]
    Closed,
    /// A message of the wrong kind arrived.
    #[error("unexpected request {0:?}")]
    UnexpectedRequest(RequestKind),
    /// Other kernel failure.
    #[error("kernel error: {0}")]
    Kernel(KernelError),
}

impl Error {
    /// Returns `true` for results that leave the connection usable as-is.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut | Self::WouldBlock | Self::Interrupted)
    }
}

impl From<KernelError> for Error {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::TimedOut => Self::TimedOut,
            KernelError::WouldBlock => Self::WouldBlock,
            KernelError::Interrupted => Self::Interrupted,
            KernelError::NoMemory => Self::NoMemory,
            KernelError::BadPortId => Self::Disconnected,
            KernelError::BadValue => Self::BadValue,
            other => Self::Kernel(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::TimedOut.is_transient());
        assert!(Error::WouldBlock.is_transient());
        assert!(Error::Interrupted.is_transient());
        assert!(!Error::BadData.is_transient());
        assert!(!Error::Disconnected.is_transient());
    }

    #[test]
    fn kernel_errors_map() {
        assert_eq!(Error::from(KernelError::BadPortId), Error::Disconnected);
        assert_eq!(Error::from(KernelError::TimedOut), Error::TimedOut);
        assert_eq!(Error::from(KernelError::BadAreaId), Error::Kernel(KernelError::BadAreaId));
    }
}
