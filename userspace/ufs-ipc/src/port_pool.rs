// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed set of request ports shared by concurrent callers
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - PortPool::create()/attach(): owner or client side of N port pairs
//!   - PortPool::acquire()/try_acquire(): exclusive use of one port
//!   - PortPool::disconnect(): fail every later acquire
//!
//! INVARIANTS:
//!   - A port is used by at most one caller at a time
//!   - Ports that failed hard, or still expect a reply, are dropped instead of being handed out again

use core::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};
use ufs_abi::Kernel;

use crate::config::TransportConfig;
use crate::port::{Port, PortInfo};
use crate::request_port::RequestPort;
use crate::{Error, Result};

#[derive(Debug)]
struct PoolState {
    free: Vec<RequestPort>,
    live: usize,
    disconnected: bool,
}

/// Pool of [`RequestPort`]s.
#[derive(Debug)]
pub struct PortPool {
    state: Mutex<PoolState>,
    available: Condvar,
    infos: Vec<PortInfo>,
}

impl PortPool {
    /// Pools already constructed ports.
    pub fn new(ports: Vec<RequestPort>) -> Self {
        let infos = ports.iter().map(|port| port.port().info()).collect();
        Self {
            state: Mutex::new(PoolState { live: ports.len(), free: ports, disconnected: false }),
            available: Condvar::new(),
            infos,
        }
    }

    /// Creates `config.port_count` owner ports.
    pub fn create(kernel: &Kernel, config: &TransportConfig) -> Result<Self> {
        let ports = (0..config.port_count)
            .map(|_| {
                Port::create(kernel, config.effective_port_size())
                    .map(|port| RequestPort::with_config(port, config))
            })
            .collect::<Result<Vec<_>>>()?;
        log::debug!("ufs-ipc: created pool of {} port(s)", ports.len());
        Ok(Self::new(ports))
    }

    /// Attaches client ports to pairs published by an owner.
    pub fn attach(kernel: &Kernel, infos: &[PortInfo], config: &TransportConfig) -> Result<Self> {
        if infos.is_empty() {
            return Err(Error::BadValue);
        }
        let ports = infos
            .iter()
            .map(|info| RequestPort::with_config(Port::attach(kernel, *info), config))
            .collect();
        Ok(Self::new(ports))
    }

    /// Infos of every pooled port, in creation order.
    pub fn port_infos(&self) -> &[PortInfo] {
        &self.infos
    }

    /// Number of ports still usable.
    pub fn live_count(&self) -> usize {
        self.state.lock().live
    }

    /// Number of ports not currently acquired.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Blocks until a port is free.
    pub fn acquire(&self) -> Result<PooledPort<'_>> {
        let mut state = self.state.lock();
        loop {
            if state.disconnected || state.live == 0 {
                return Err(Error::Disconnected);
            }
            if let Some(port) = state.free.pop() {
                return Ok(PooledPort { pool: self, port: Some(port) });
            }
            self.available.wait(&mut state);
        }
    }

    /// Takes a free port without blocking.
    pub fn try_acquire(&self) -> Result<PooledPort<'_>> {
        let mut state = self.state.lock();
        if state.disconnected || state.live == 0 {
            return Err(Error::Disconnected);
        }
        let port = state.free.pop().ok_or(Error::WouldBlock)?;
        Ok(PooledPort { pool: self, port: Some(port) })
    }

    /// Fails current waiters and every later acquire with [`Error::Disconnected`].
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnected = true;
        state.free.clear();
        drop(state);
        self.available.notify_all();
        log::debug!("ufs-ipc: port pool disconnected");
    }

    /// Unwraps the free ports.
    pub fn into_ports(self) -> Vec<RequestPort> {
        self.state.into_inner().free
    }

    fn release(&self, port: RequestPort) {
        let mut state = self.state.lock();
        if state.disconnected {
            return;
        }
        if let Err(err) = port.port().init_check() {
            log::warn!("ufs-ipc: dropping failed pool port: {err}");
        } else if port.reply_outstanding() {
            log::warn!("ufs-ipc: dropping pool port with a reply in flight");
        } else {
            state.free.push(port);
            drop(state);
            self.available.notify_one();
            return;
        }
        state.live -= 1;
        drop(state);
        self.available.notify_all();
    }
}

/// Exclusive use of one pooled port; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledPort<'a> {
    pool: &'a PortPool,
    port: Option<RequestPort>,
}

impl Deref for PooledPort<'_> {
    type Target = RequestPort;

    fn deref(&self) -> &RequestPort {
        self.port.as_ref().unwrap_or_else(|| unreachable!("pooled port already released"))
    }
}

impl DerefMut for PooledPort<'_> {
    fn deref_mut(&mut self) -> &mut RequestPort {
        self.port.as_mut().unwrap_or_else(|| unreachable!("pooled port already released"))
    }
}

impl Drop for PooledPort<'_> {
    fn drop(&mut self) {
        if let Some(port) = self.port.take() {
            self.pool.release(port);
        }
    }
}
