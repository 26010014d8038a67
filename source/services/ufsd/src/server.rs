// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Userland filesystem server threads
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! A server owns one connection port and a pool of request ports. The
//! connection port answers `FsConnectRequest` with the request ports' infos;
//! every request port is served by its own thread through a
//! [`UserlandRequestHandler`]. Threads exit on `UfsDisconnectRequest`, when
//! their port is closed or when the kernel ports disappear.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use ufs_abi::Kernel;
use ufs_ipc::port::encode_port_infos;
use ufs_ipc::requests::{FsConnectReply, FsConnectRequest, RequestKind};
use ufs_ipc::{
    status, Error, Port, PortInfo, PortPool, RequestHandler, RequestPort, TransportConfig, Wait,
};

use crate::fs::FileSystem;
use crate::handler::UserlandRequestHandler;
use crate::{Result, ServerError};

/// Running server for one filesystem.
pub struct UserlandServer<F> {
    kernel: Kernel,
    fs: Arc<Mutex<F>>,
    connection: PortInfo,
    infos: Vec<PortInfo>,
    workers: Vec<JoinHandle<ufs_ipc::Result<()>>>,
}

impl<F: FileSystem + 'static> UserlandServer<F> {
    /// Creates the ports described by `config` and starts serving `fs`.
    pub fn start(kernel: &Kernel, fs: F, config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        let fs_name = fs.name().to_string();
        let capabilities = fs.capabilities();
        let fs = Arc::new(Mutex::new(fs));
        let pool = PortPool::create(kernel, config)?;
        let infos = pool.port_infos().to_vec();
        let connection =
            RequestPort::with_config(Port::create(kernel, config.effective_port_size())?, config);
        let connection_info = connection.port().info();

        let mut server = Self {
            kernel: kernel.clone(),
            fs: Arc::clone(&fs),
            connection: connection_info,
            infos: infos.clone(),
            workers: Vec::new(),
        };
        let greeting = Greeting { fs_name: fs_name.clone(), capabilities, infos };
        let spawned = thread::Builder::new()
            .name(format!("ufsd-{fs_name}-connect"))
            .spawn(move || serve_connection(connection, greeting));
        server.workers.push(spawned?);
        for (index, port) in pool.into_ports().into_iter().enumerate() {
            let handler = UserlandRequestHandler::new(Arc::clone(&fs));
            let spawned = thread::Builder::new()
                .name(format!("ufsd-{fs_name}-{index}"))
                .spawn(move || serve_port(port, handler));
            server.workers.push(spawned?);
        }
        log::info!(
            "ufsd: serving {fs_name} on {} request port(s), connection port {}",
            server.infos.len(),
            connection_info.owner_port.raw()
        );
        Ok(server)
    }

    /// Port pair a kernel attaches to for `FsConnectRequest`.
    pub fn connection_info(&self) -> PortInfo {
        self.connection
    }

    /// Request ports handed out on connect.
    pub fn port_infos(&self) -> &[PortInfo] {
        &self.infos
    }

    /// Served filesystem.
    pub fn filesystem(&self) -> &Arc<Mutex<F>> {
        &self.fs
    }

    /// Waits for every thread to exit on its own.
    pub fn join(self) -> Result<()> {
        let mut first_error = None;
        for worker in self.workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("ufsd: worker failed: {err}");
                    first_error.get_or_insert(ServerError::Transport(err));
                }
                Err(_) => {
                    first_error.get_or_insert(ServerError::WorkerPanicked);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Deletes the kernel ports, which stops every thread, then joins them.
    pub fn shutdown(self) -> Result<()> {
        for info in self.infos.iter().chain(core::iter::once(&self.connection)) {
            for id in [info.owner_port, info.client_port] {
                if let Err(err) = self.kernel.delete_port(id) {
                    log::debug!("ufsd: port {} already gone: {err}", id.raw());
                }
            }
        }
        self.join()
    }
}

struct Greeting {
    fs_name: String,
    capabilities: u64,
    infos: Vec<PortInfo>,
}

fn is_shutdown(err: Error) -> bool {
    matches!(err, Error::Disconnected | Error::Closed)
}

fn serve_connection(mut port: RequestPort, greeting: Greeting) -> ufs_ipc::Result<()> {
    loop {
        let request = match port.receive_request(Wait::Blocking) {
            Ok(request) => request,
            Err(err) if is_shutdown(err) => return Ok(()),
            Err(err) if err.is_transient() || err == Error::BadData => continue,
            Err(err) => return Err(err),
        };
        match request.kind() {
            RequestKind::UfsDisconnectRequest => return Ok(()),
            RequestKind::FsConnectRequest => {
                let requested =
                    request.string(FsConnectRequest::FS_NAME).ok().flatten().unwrap_or_default();
                drop(request);
                let result = if requested == greeting.fs_name {
                    log::info!("ufsd: kernel connected to {requested}");
                    let infos = encode_port_infos(&greeting.infos)?;
                    port.send_reply(|allocator| {
                        allocator.allocate_request(&FsConnectReply {
                            error: status::OK,
                            port_info_count: greeting.infos.len() as u32,
                            capabilities: greeting.capabilities,
                        })?;
                        allocator.allocate_data(FsConnectReply::PORT_INFOS, Some(&infos), 4, false)
                    })
                } else {
                    log::warn!("ufsd: connect for unknown filesystem {requested:?}");
                    port.send_reply(|allocator| {
                        allocator.allocate_request(&FsConnectReply {
                            error: status::ENTRY_NOT_FOUND,
                            ..Default::default()
                        })
                    })
                };
                match result {
                    Err(err) if is_shutdown(err) => return Ok(()),
                    other => other?,
                }
            }
            other => log::warn!("ufsd: ignoring {} on connection port", other.name()),
        }
    }
}

fn serve_port<F: FileSystem>(
    mut port: RequestPort,
    mut handler: UserlandRequestHandler<F>,
) -> ufs_ipc::Result<()> {
    loop {
        let request = match port.receive_request(Wait::Blocking) {
            Ok(request) => request,
            Err(err) if is_shutdown(err) => return Ok(()),
            Err(err) if err.is_transient() || err == Error::BadData => continue,
            Err(err) => return Err(err),
        };
        if request.kind() == RequestKind::UfsDisconnectRequest {
            log::debug!("ufsd: request port {} disconnected", port.port().info().owner_port.raw());
            return Ok(());
        }
        match handler.handle_request(&mut port, request) {
            Ok(()) => {}
            Err(err) if is_shutdown(err) => return Ok(()),
            Err(err @ (Error::UnexpectedRequest(_) | Error::BadData)) => {
                log::warn!("ufsd: dropped request: {err}");
            }
            Err(err) if err.is_transient() => {
                log::warn!("ufsd: reply handshake failed: {err}");
            }
            Err(err) => return Err(err),
        }
    }
}
