// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Duplex request transport over two single-slot kernel ports
//! OWNERS: @runtime
//! INVARIANTS:
//!   - Capacity is clamped into [MIN_PORT_SIZE, MAX_PORT_SIZE] at construction
//!   - Frames of size zero or above capacity are discarded as BadData and do
//!     not poison the port
//!   - Hard send/receive failures are remembered; every later call fails fast
//!   - Timeouts, would-block and interruption are reported but never remembered
//!
//! The owner allocates both kernel ports and deletes them on drop; the client
//! attaches to ids the owner published. The owner sends on the client port
//! and receives on the owner port, the client the other way round.

use ufs_abi::{Kernel, KernelError, PortId, Wait};

use crate::wire::{WireField, WireReader, WireWriter};
use crate::{Error, Result};

/// Smallest port buffer.
pub const MIN_PORT_SIZE: usize = 1024;
/// Largest port buffer.
pub const MAX_PORT_SIZE: usize = 64 * 1024;
/// Buffer size used when nothing else is configured.
pub const DEFAULT_PORT_SIZE: usize = 4096;

/// Identity of a port pair, as published to the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortInfo {
    /// Port the owner receives on.
    pub owner_port: PortId,
    /// Port the client receives on.
    pub client_port: PortId,
    /// Buffer capacity shared by both sides.
    pub size: usize,
}

impl WireField for PortInfo {
    const SIZE: usize = 12;

    fn put(&self, w: &mut WireWriter<'_>) -> Result<()> {
        let size = u32::try_from(self.size).map_err(|_| Error::BadValue)?;
        self.owner_port.raw().put(w)?;
        self.client_port.raw().put(w)?;
        size.put(w)
    }

    fn get(r: &mut WireReader<'_>) -> Result<Self> {
        let owner_port = PortId::from_raw(i32::get(r)?);
        let client_port = PortId::from_raw(i32::get(r)?);
        let size = u32::get(r)? as usize;
        Ok(Self { owner_port, client_port, size })
    }
}

/// Encodes port infos as a flat array.
pub fn encode_port_infos(infos: &[PortInfo]) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; infos.len() * PortInfo::SIZE];
    let mut writer = WireWriter::new(&mut bytes);
    for info in infos {
        info.put(&mut writer)?;
    }
    Ok(bytes)
}

/// Decodes a flat array of port infos.
pub fn decode_port_infos(bytes: &[u8]) -> Result<Vec<PortInfo>> {
    if bytes.len() % PortInfo::SIZE != 0 {
        return Err(Error::BadData);
    }
    let mut reader = WireReader::new(bytes);
    (0..bytes.len() / PortInfo::SIZE).map(|_| PortInfo::get(&mut reader)).collect()
}

/// Clamps a requested buffer size into the supported range.
pub fn clamp_port_size(size: usize) -> usize {
    size.clamp(MIN_PORT_SIZE, MAX_PORT_SIZE)
}

/// One end of a request transport.
#[derive(Debug)]
pub struct Port {
    kernel: Kernel,
    info: PortInfo,
    owner: bool,
    ports_deleted: bool,
    buffer: Vec<u8>,
    reserved: usize,
    message_size: usize,
    error: Option<Error>,
}

impl Port {
    /// Creates the owner end, allocating both kernel ports.
    pub fn create(kernel: &Kernel, size: usize) -> Result<Self> {
        let size = clamp_port_size(size);
        let owner_port = kernel.create_port(1, "ufs owner port")?;
        let client_port = match kernel.create_port(1, "ufs client port") {
            Ok(port) => port,
            Err(err) => {
                if let Err(cleanup) = kernel.delete_port(owner_port) {
                    log::warn!("ufs-ipc: leaked owner port {}: {cleanup}", owner_port.raw());
                }
                return Err(err.into());
            }
        };
        Ok(Self::with_info(kernel, PortInfo { owner_port, client_port, size }, true))
    }

    /// Attaches the client end to ports published by an owner.
    pub fn attach(kernel: &Kernel, info: PortInfo) -> Self {
        let info = PortInfo { size: clamp_port_size(info.size), ..info };
        Self::with_info(kernel, info, false)
    }

    fn with_info(kernel: &Kernel, info: PortInfo, owner: bool) -> Self {
        Self {
            kernel: kernel.clone(),
            info,
            owner,
            ports_deleted: false,
            buffer: vec![0u8; info.size],
            reserved: 0,
            message_size: 0,
            error: None,
        }
    }

    /// Ids and capacity of this port pair.
    pub fn info(&self) -> PortInfo {
        self.info
    }

    /// Kernel the port lives in.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Returns `true` on the end that owns the kernel ports.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Remembered hard error, if any.
    pub fn init_check(&self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read-only view of the whole buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// High-water mark of reserved bytes.
    pub fn reserved_size(&self) -> usize {
        self.reserved
    }

    /// Extends the reservation to at least `end_offset`.
    pub fn reserve(&mut self, end_offset: usize) {
        self.reserved = self.reserved.max(end_offset.min(self.capacity()));
    }

    /// Shrinks the reservation back to `end_offset`.
    pub fn unreserve(&mut self, end_offset: usize) {
        self.reserved = self.reserved.min(end_offset);
    }

    /// Size of the most recently received message.
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Bytes of the most recently received message.
    pub fn message(&self) -> &[u8] {
        &self.buffer[..self.message_size]
    }

    fn send_port(&self) -> PortId {
        if self.owner {
            self.info.client_port
        } else {
            self.info.owner_port
        }
    }

    fn receive_port(&self) -> PortId {
        if self.owner {
            self.info.owner_port
        } else {
            self.info.client_port
        }
    }

    /// Sends the first `size` bytes of the buffer.
    pub fn send(&mut self, size: usize) -> Result<()> {
        self.send_at(0, size)
    }

    /// Sends `size` bytes of the buffer starting at `offset`.
    ///
    /// Interruptions are retried; any other failure is remembered.
    pub fn send_at(&mut self, offset: usize, size: usize) -> Result<()> {
        self.init_check()?;
        let end = offset.checked_add(size).ok_or(Error::BadValue)?;
        if size == 0 || end > self.capacity() {
            return Err(Error::BadValue);
        }
        let target = self.send_port();
        loop {
            match self.kernel.write_port(target, 0, &self.buffer[offset..end], Wait::Blocking) {
                Ok(()) => return Ok(()),
                Err(KernelError::Interrupted) => continue,
                Err(err) => {
                    let err = Error::from(err);
                    log::error!("ufs-ipc: send on port {} failed: {err}", target.raw());
                    self.error = Some(err);
                    return Err(err);
                }
            }
        }
    }

    /// Receives one message into the buffer and returns its size.
    pub fn receive(&mut self, wait: Wait) -> Result<usize> {
        self.init_check()?;
        self.message_size = 0;
        let source = self.receive_port();
        match self.kernel.read_port(source, &mut self.buffer, wait) {
            Ok(message) if message.size == 0 || message.size > self.buffer.len() => {
                log::warn!(
                    "ufs-ipc: discarding frame of {} bytes on port {} (capacity {})",
                    message.size,
                    source.raw(),
                    self.buffer.len()
                );
                Err(Error::BadData)
            }
            Ok(message) => {
                self.message_size = message.size;
                Ok(message.size)
            }
            Err(err) => {
                let err = Error::from(err);
                if !err.is_transient() {
                    log::error!("ufs-ipc: receive on port {} failed: {err}", source.raw());
                    self.error = Some(err);
                }
                Err(err)
            }
        }
    }

    /// Sends `size` bytes and blocks for the reply.
    pub fn send_and_receive(&mut self, size: usize) -> Result<usize> {
        self.send(size)?;
        self.receive(Wait::Blocking)
    }

    /// Closes the port; the owner also deletes the kernel ports.
    pub fn close(&mut self) {
        self.error = Some(Error::Closed);
        self.delete_ports();
    }

    fn delete_ports(&mut self) {
        if !self.owner || self.ports_deleted {
            return;
        }
        self.ports_deleted = true;
        for port in [self.info.owner_port, self.info.client_port] {
            if let Err(err) = self.kernel.delete_port(port) {
                log::debug!("ufs-ipc: port {} already gone: {err}", port.raw());
            }
        }
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        self.delete_ports();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn pair(kernel: &Kernel, size: usize) -> (Port, Port) {
        let owner = Port::create(kernel, size).unwrap();
        let client = Port::attach(kernel, owner.info());
        (owner, client)
    }

    #[test]
    fn capacity_is_clamped() {
        let kernel = Kernel::new();
        assert_eq!(Port::create(&kernel, 10).unwrap().capacity(), MIN_PORT_SIZE);
        assert_eq!(Port::create(&kernel, 1 << 20).unwrap().capacity(), MAX_PORT_SIZE);
        assert_eq!(Port::create(&kernel, 4096).unwrap().capacity(), 4096);
    }

    #[test]
    fn send_and_receive_both_directions() {
        let kernel = Kernel::new();
        let (mut owner, mut client) = pair(&kernel, 2048);
        client.buffer_mut()[..4].copy_from_slice(b"ping");
        client.send(4).unwrap();
        assert_eq!(owner.receive(Wait::NonBlocking).unwrap(), 4);
        assert_eq!(owner.message(), b"ping");
        owner.buffer_mut()[10..14].copy_from_slice(b"pong");
        owner.send_at(10, 4).unwrap();
        assert_eq!(client.receive(Wait::Blocking).unwrap(), 4);
        assert_eq!(client.message(), b"pong");
    }

    #[test]
    fn send_rejects_bad_sizes() {
        let kernel = Kernel::new();
        let (mut owner, _client) = pair(&kernel, 1024);
        assert_eq!(owner.send(0).unwrap_err(), Error::BadValue);
        assert_eq!(owner.send(1025).unwrap_err(), Error::BadValue);
        assert!(owner.init_check().is_ok());
    }

    #[test]
    fn timeout_is_not_fatal() {
        let kernel = Kernel::new();
        let (mut owner, mut client) = pair(&kernel, 1024);
        let err = owner.receive(Wait::Timeout(Duration::from_millis(5))).unwrap_err();
        assert_eq!(err, Error::TimedOut);
        assert_eq!(owner.receive(Wait::NonBlocking).unwrap_err(), Error::WouldBlock);
        assert!(owner.init_check().is_ok());
        client.send(16).unwrap();
        assert_eq!(owner.receive(Wait::Blocking).unwrap(), 16);
    }

    #[test]
    fn interruption_is_surfaced_on_receive() {
        let kernel = Kernel::new();
        let (mut owner, mut client) = pair(&kernel, 1024);
        kernel.interrupt_port(owner.info().owner_port).unwrap();
        assert_eq!(owner.receive(Wait::Blocking).unwrap_err(), Error::Interrupted);
        client.send(8).unwrap();
        assert_eq!(owner.receive(Wait::Blocking).unwrap(), 8);
    }

    #[test]
    fn send_retries_after_interruption() {
        let kernel = Kernel::new();
        let (mut owner, mut client) = pair(&kernel, 1024);
        client.send(1).unwrap();
        // the slot is full, so the next send blocks and is interrupted first
        kernel.interrupt_port(owner.info().owner_port).unwrap();
        let reader = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut sizes = Vec::new();
            while sizes.len() < 2 {
                match owner.receive(Wait::Blocking) {
                    Ok(size) => sizes.push(size),
                    Err(Error::Interrupted) => continue,
                    Err(err) => panic!("receive failed: {err}"),
                }
            }
            (sizes[0], sizes[1])
        });
        client.send(2).unwrap();
        assert_eq!(reader.join().unwrap(), (1, 2));
        assert!(client.init_check().is_ok());
    }

    #[test]
    fn oversized_and_empty_frames_are_discarded() {
        let kernel = Kernel::new();
        let (mut owner, mut client) = pair(&kernel, 1024);
        let port = owner.info().owner_port;
        kernel.write_port(port, 0, &[0u8; 2000], Wait::Blocking).unwrap();
        assert_eq!(owner.receive(Wait::Blocking).unwrap_err(), Error::BadData);
        kernel.write_port(port, 0, &[], Wait::Blocking).unwrap();
        assert_eq!(owner.receive(Wait::Blocking).unwrap_err(), Error::BadData);
        assert!(owner.init_check().is_ok());
        client.send(32).unwrap();
        assert_eq!(owner.receive(Wait::Blocking).unwrap(), 32);
    }

    #[test]
    fn peer_loss_is_remembered() {
        let kernel = Kernel::new();
        let (owner, mut client) = pair(&kernel, 1024);
        drop(owner);
        assert_eq!(kernel.port_count(), 0);
        assert_eq!(client.send(4).unwrap_err(), Error::Disconnected);
        assert_eq!(client.receive(Wait::NonBlocking).unwrap_err(), Error::Disconnected);
        assert_eq!(client.init_check().unwrap_err(), Error::Disconnected);
    }

    #[test]
    fn close_fails_fast_and_releases_ports() {
        let kernel = Kernel::new();
        let (mut owner, mut client) = pair(&kernel, 1024);
        owner.close();
        assert_eq!(kernel.port_count(), 0);
        assert_eq!(owner.send(4).unwrap_err(), Error::Closed);
        assert_eq!(client.receive(Wait::Blocking).unwrap_err(), Error::Disconnected);
    }

    #[test]
    fn reservation_high_water_mark() {
        let kernel = Kernel::new();
        let (mut owner, _client) = pair(&kernel, 1024);
        owner.reserve(100);
        owner.reserve(40);
        assert_eq!(owner.reserved_size(), 100);
        owner.unreserve(200);
        assert_eq!(owner.reserved_size(), 100);
        owner.unreserve(0);
        assert_eq!(owner.reserved_size(), 0);
    }

    #[test]
    fn port_infos_roundtrip() {
        let infos = vec![
            PortInfo { owner_port: PortId::from_raw(3), client_port: PortId::from_raw(4), size: 4096 },
            PortInfo { owner_port: PortId::from_raw(5), client_port: PortId::from_raw(6), size: 1024 },
        ];
        let bytes = encode_port_infos(&infos).unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(decode_port_infos(&bytes).unwrap(), infos);
        assert_eq!(decode_port_infos(&bytes[..13]).unwrap_err(), Error::BadData);
    }
}
