// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel-side proxy for a userland filesystem
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - UfsClient::connect(): FsConnectRequest handshake, then a pool of request ports
//!   - UfsClient::{mount, lookup, read, write, read_dir, ...}: one round trip each
//!   - UfsClient::disconnect(): release every server thread
//!
//! INVARIANTS:
//!   - Replies reporting more bytes than their payload holds are rejected as BadData
//!   - Replies referencing areas are acknowledged before the call returns

use thiserror::Error;
use ufs_abi::Kernel;
use ufs_ipc::port::decode_port_infos;
use ufs_ipc::requests::*;
use ufs_ipc::wire::{AttrInfo, FsInfo, KernelContext, Stat};
use ufs_ipc::{
    Port, PortInfo, PortPool, ReceivedRequest, RejectNested, RequestAllocator,
    RequestBody, RequestPort, TransportConfig,
};

use crate::dirent::parse_dirents;
use crate::fs::{Created, FsError, Mounted, VNodeInfo};

/// Result alias for client calls.
pub type ClientResult<T> = core::result::Result<T, ClientError>;

/// Failure of a client call.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Transport or marshalling failure.
    #[error("transport error: {0}")]
    Transport(#[from] ufs_ipc::Error),
    /// Filesystem reported an error.
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),
}

fn check(code: i32) -> ClientResult<()> {
    match FsError::from_status(code) {
        None => Ok(()),
        Some(err) => Err(ClientError::Fs(err)),
    }
}

/// Copies at most `reported` bytes of `field`, failing when the payload is shorter.
fn reported_bytes<R: RequestBody>(
    reply: &ReceivedRequest,
    field: ufs_ipc::AddressField<R>,
    reported: u64,
) -> ClientResult<Vec<u8>> {
    let payload = reply.data(field)?;
    let available = payload.as_deref().map_or(0, <[u8]>::len);
    let reported = usize::try_from(reported).map_err(|_| ufs_ipc::Error::BadData)?;
    if reported > available {
        log::warn!("ufsd: {} reports {reported} bytes, payload holds {available}", R::KIND.name());
        return Err(ufs_ipc::Error::BadData.into());
    }
    Ok(payload.map(|bytes| bytes[..reported].to_vec()).unwrap_or_default())
}

/// Connection to a userland filesystem server.
#[derive(Debug)]
pub struct UfsClient {
    pool: PortPool,
    connection: RequestPort,
    ctx: KernelContext,
    capabilities: u64,
}

impl UfsClient {
    /// Connects to the server listening on `connection` and asks for `fs_name`.
    pub fn connect(
        kernel: &Kernel,
        connection: PortInfo,
        fs_name: &str,
        config: &TransportConfig,
    ) -> ClientResult<Self> {
        let mut connection = RequestPort::with_config(Port::attach(kernel, connection), config);
        let reply = connection.send_request_and_wait(
            |allocator| {
                allocator.allocate_request(&FsConnectRequest::default())?;
                allocator.allocate_string(FsConnectRequest::FS_NAME, Some(fs_name), false)
            },
            RequestKind::FsConnectReply,
            &mut RejectNested,
        )?;
        let body = reply.body::<FsConnectReply>();
        let infos = reply.data(FsConnectReply::PORT_INFOS).and_then(|payload| {
            payload.map_or(Ok(Vec::new()), |bytes| decode_port_infos(&bytes))
        });
        connection.release_reply(reply)?;
        let body = body?;
        check(body.error)?;
        let infos = infos?;
        if infos.len() != body.port_info_count as usize {
            return Err(ufs_ipc::Error::BadData.into());
        }
        let pool = PortPool::attach(kernel, &infos, config)?;
        log::debug!("ufsd: connected to {fs_name} over {} port(s)", infos.len());
        Ok(Self { pool, connection, ctx: KernelContext::default(), capabilities: body.capabilities })
    }

    /// Uses `ctx` as the caller identity of later requests.
    pub fn with_context(mut self, ctx: KernelContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Capabilities advertised by the server.
    pub fn capabilities(&self) -> u64 {
        self.capabilities
    }

    /// Request ports in use.
    pub fn port_pool(&self) -> &PortPool {
        &self.pool
    }

    /// One round trip; `extract` sees the reply before it is released.
    fn call_with<Rep, T, B, X>(&self, build: B, extract: X) -> ClientResult<T>
    where
        Rep: RequestBody,
        B: FnOnce(&mut RequestAllocator<'_>) -> ufs_ipc::Result<()>,
        X: FnOnce(&ReceivedRequest, Rep) -> ClientResult<T>,
    {
        let mut port = self.pool.acquire()?;
        let reply = port.send_request_and_wait(build, Rep::KIND, &mut RejectNested)?;
        let result = reply.body::<Rep>().map_err(ClientError::from).and_then(|body| extract(&reply, body));
        port.release_reply(reply)?;
        result
    }

    fn call<Rep, B>(&self, build: B) -> ClientResult<Rep>
    where
        Rep: RequestBody,
        B: FnOnce(&mut RequestAllocator<'_>) -> ufs_ipc::Result<()>,
    {
        self.call_with(build, |_, body: Rep| Ok(body))
    }

    /// Mounts a volume.
    pub fn mount(
        &self,
        nsid: i32,
        device: Option<&str>,
        parameters: Option<&str>,
    ) -> ClientResult<Mounted> {
        let request = MountVolumeRequest { ctx: self.ctx, nsid, flags: 0 };
        let reply: MountVolumeReply = self.call(|allocator| {
            allocator.allocate_request(&request)?;
            allocator.allocate_string(MountVolumeRequest::CWD, Some("/"), false)?;
            allocator.allocate_string(MountVolumeRequest::DEVICE, device, false)?;
            allocator.allocate_string(MountVolumeRequest::PARAMETERS, parameters, false)
        })?;
        check(reply.error)?;
        Ok(Mounted { volume: reply.volume, root: reply.root_id })
    }

    /// Unmounts a volume.
    pub fn unmount(&self, volume: u64) -> ClientResult<()> {
        let request = UnmountVolumeRequest { ctx: self.ctx, volume };
        let reply: UnmountVolumeReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)
    }

    /// Flushes a volume.
    pub fn sync(&self, volume: u64) -> ClientResult<()> {
        let request = SyncVolumeRequest { ctx: self.ctx, volume };
        let reply: SyncVolumeReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)
    }

    /// Reads volume information.
    pub fn read_fs_info(&self, volume: u64) -> ClientResult<FsInfo> {
        let request = ReadFsInfoRequest { ctx: self.ctx, volume };
        let reply: ReadFsInfoReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)?;
        Ok(reply.info)
    }

    /// Resolves `name` in `dir`.
    pub fn lookup(&self, volume: u64, dir: u64, name: &str) -> ClientResult<u64> {
        let request = LookupRequest { ctx: self.ctx, volume, node: dir, traverse_link: false };
        let reply: LookupReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(LookupRequest::ENTRY_NAME, Some(name), false)
        })?;
        check(reply.error)?;
        Ok(reply.vnid)
    }

    /// Name of `node` inside its parent.
    pub fn get_vnode_name(&self, volume: u64, node: u64) -> ClientResult<String> {
        let request = GetVNodeNameRequest {
            ctx: self.ctx,
            volume,
            node,
            size: ufs_ipc::wire::FILE_NAME_LENGTH as u32,
        };
        self.call_with(
            |a| a.allocate_request(&request),
            |reply, body: GetVNodeNameReply| {
                check(body.error)?;
                reply.string(GetVNodeNameReply::BUFFER)?.ok_or(ufs_ipc::Error::BadData.into())
            },
        )
    }

    /// Loads node `vnid`.
    pub fn read_vnode(&self, volume: u64, vnid: u64) -> ClientResult<VNodeInfo> {
        let request = ReadVNodeRequest { ctx: self.ctx, volume, vnid, reenter: false };
        let reply: ReadVNodeReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)?;
        Ok(VNodeInfo { node: reply.node, node_type: reply.node_type, flags: reply.flags })
    }

    /// Releases a loaded node.
    pub fn write_vnode(&self, volume: u64, node: u64) -> ClientResult<()> {
        let request = WriteVNodeRequest { ctx: self.ctx, volume, node, reenter: false };
        let reply: WriteVNodeReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)
    }

    /// Reads node status.
    pub fn read_stat(&self, volume: u64, node: u64) -> ClientResult<Stat> {
        let request = ReadStatRequest { ctx: self.ctx, volume, node };
        let reply: ReadStatReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)?;
        Ok(reply.st)
    }

    /// Updates node status fields selected by `mask`.
    pub fn write_stat(&self, volume: u64, node: u64, st: Stat, mask: u32) -> ClientResult<()> {
        let request = WriteStatRequest { ctx: self.ctx, volume, node, st, mask };
        let reply: WriteStatReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)
    }

    /// Creates and opens a file.
    pub fn create(
        &self,
        volume: u64,
        dir: u64,
        name: &str,
        open_mode: i32,
        mode: u32,
    ) -> ClientResult<Created> {
        let request = CreateRequest { ctx: self.ctx, volume, node: dir, open_mode, mode };
        let reply: CreateReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(CreateRequest::NAME, Some(name), false)
        })?;
        check(reply.error)?;
        Ok(Created { vnid: reply.vnid, cookie: reply.file_cookie })
    }

    /// Opens a file.
    pub fn open(&self, volume: u64, node: u64, open_mode: i32) -> ClientResult<u64> {
        let request = OpenRequest { ctx: self.ctx, volume, node, open_mode };
        let reply: OpenReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)?;
        Ok(reply.file_cookie)
    }

    /// Closes and frees a file cookie.
    pub fn close(&self, volume: u64, node: u64, cookie: u64) -> ClientResult<()> {
        let request = CloseRequest { ctx: self.ctx, volume, node, file_cookie: cookie };
        let reply: CloseReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)?;
        let request = FreeCookieRequest { ctx: self.ctx, volume, node, file_cookie: cookie };
        let reply: FreeCookieReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)
    }

    /// Reads up to `size` bytes at `pos`.
    pub fn read(
        &self,
        volume: u64,
        node: u64,
        cookie: u64,
        pos: i64,
        size: u64,
    ) -> ClientResult<Vec<u8>> {
        let request = ReadRequest { ctx: self.ctx, volume, node, file_cookie: cookie, pos, size };
        self.call_with(
            |a| a.allocate_request(&request),
            |reply, body: ReadReply| {
                check(body.error)?;
                reported_bytes(reply, ReadReply::BUFFER, body.bytes_read)
            },
        )
    }

    /// Writes `data` at `pos`.
    pub fn write(
        &self,
        volume: u64,
        node: u64,
        cookie: u64,
        pos: i64,
        data: &[u8],
    ) -> ClientResult<u64> {
        let request = WriteRequest { ctx: self.ctx, volume, node, file_cookie: cookie, pos };
        let reply: WriteReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_data(WriteRequest::BUFFER, Some(data), 1, false)
        })?;
        check(reply.error)?;
        Ok(reply.bytes_written)
    }

    /// Creates a directory.
    pub fn create_dir(&self, volume: u64, dir: u64, name: &str, mode: u32) -> ClientResult<u64> {
        let request = CreateDirRequest { ctx: self.ctx, volume, node: dir, mode };
        let reply: CreateDirReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(CreateDirRequest::NAME, Some(name), false)
        })?;
        check(reply.error)?;
        Ok(reply.new_dir)
    }

    /// Removes an empty directory.
    pub fn remove_dir(&self, volume: u64, dir: u64, name: &str) -> ClientResult<()> {
        let request = RemoveDirRequest { ctx: self.ctx, volume, node: dir };
        let reply: RemoveDirReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(RemoveDirRequest::NAME, Some(name), false)
        })?;
        check(reply.error)
    }

    /// Removes a file entry.
    pub fn unlink(&self, volume: u64, dir: u64, name: &str) -> ClientResult<()> {
        let request = UnlinkRequest { ctx: self.ctx, volume, node: dir };
        let reply: UnlinkReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(UnlinkRequest::NAME, Some(name), false)
        })?;
        check(reply.error)
    }

    /// Moves an entry.
    pub fn rename(
        &self,
        volume: u64,
        old_dir: u64,
        old_name: &str,
        new_dir: u64,
        new_name: &str,
    ) -> ClientResult<()> {
        let request = RenameRequest { ctx: self.ctx, volume, old_dir, new_dir };
        let reply: RenameReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(RenameRequest::OLD_NAME, Some(old_name), false)?;
            a.allocate_string(RenameRequest::NEW_NAME, Some(new_name), false)
        })?;
        check(reply.error)
    }

    /// Opens a directory for iteration.
    pub fn open_dir(&self, volume: u64, node: u64) -> ClientResult<u64> {
        let request = OpenDirRequest { ctx: self.ctx, volume, node };
        let reply: OpenDirReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)?;
        Ok(reply.dir_cookie)
    }

    /// Reads up to `count` entries into a `buffer_size` byte buffer.
    pub fn read_dir(
        &self,
        volume: u64,
        node: u64,
        cookie: u64,
        buffer_size: u32,
        count: u32,
    ) -> ClientResult<Vec<(u64, String)>> {
        let request =
            ReadDirRequest { ctx: self.ctx, volume, node, dir_cookie: cookie, buffer_size, count };
        self.call_with(
            |a| a.allocate_request(&request),
            |reply, body: ReadDirReply| {
                check(body.error)?;
                if body.count > count {
                    return Err(ufs_ipc::Error::BadData.into());
                }
                let payload = reply.data(ReadDirReply::BUFFER)?;
                let bytes = payload.as_deref().unwrap_or(&[]);
                let entries = parse_dirents(bytes, body.count)?;
                Ok(entries.into_iter().map(|entry| (entry.ino, entry.name.to_string())).collect())
            },
        )
    }

    /// Restarts iteration of a directory cookie.
    pub fn rewind_dir(&self, volume: u64, node: u64, cookie: u64) -> ClientResult<()> {
        let request = RewindDirRequest { ctx: self.ctx, volume, node, dir_cookie: cookie };
        let reply: RewindDirReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)
    }

    /// Closes and frees a directory cookie.
    pub fn close_dir(&self, volume: u64, node: u64, cookie: u64) -> ClientResult<()> {
        let request = CloseDirRequest { ctx: self.ctx, volume, node, dir_cookie: cookie };
        let reply: CloseDirReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)?;
        let request = FreeDirCookieRequest { ctx: self.ctx, volume, node, dir_cookie: cookie };
        let reply: FreeDirCookieReply = self.call(|a| a.allocate_request(&request))?;
        check(reply.error)
    }

    /// Creates a symlink.
    pub fn create_symlink(
        &self,
        volume: u64,
        dir: u64,
        name: &str,
        target: &str,
    ) -> ClientResult<()> {
        let request = CreateSymlinkRequest { ctx: self.ctx, volume, node: dir, mode: 0o777 };
        let reply: CreateSymlinkReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(CreateSymlinkRequest::NAME, Some(name), false)?;
            a.allocate_string(CreateSymlinkRequest::TARGET, Some(target), false)
        })?;
        check(reply.error)
    }

    /// Reads a symlink target of at most `size` bytes.
    pub fn read_symlink(&self, volume: u64, node: u64, size: u32) -> ClientResult<Vec<u8>> {
        let request = ReadSymlinkRequest { ctx: self.ctx, volume, node, size };
        self.call_with(
            |a| a.allocate_request(&request),
            |reply, body: ReadSymlinkReply| {
                check(body.error)?;
                reported_bytes(reply, ReadSymlinkReply::BUFFER, u64::from(body.bytes_read))
            },
        )
    }

    /// Reads up to `size` bytes of attribute `name` at `pos`.
    pub fn read_attr(
        &self,
        volume: u64,
        node: u64,
        name: &str,
        pos: i64,
        size: u64,
    ) -> ClientResult<Vec<u8>> {
        let request = ReadAttrRequest { ctx: self.ctx, volume, node, pos, size };
        self.call_with(
            |a| {
                a.allocate_request(&request)?;
                a.allocate_string(ReadAttrRequest::NAME, Some(name), false)
            },
            |reply, body: ReadAttrReply| {
                check(body.error)?;
                reported_bytes(reply, ReadAttrReply::BUFFER, body.bytes_read)
            },
        )
    }

    /// Writes attribute `name` at `pos`.
    pub fn write_attr(
        &self,
        volume: u64,
        node: u64,
        name: &str,
        attr_type: u32,
        pos: i64,
        data: &[u8],
    ) -> ClientResult<u64> {
        let request = WriteAttrRequest { ctx: self.ctx, volume, node, attr_type, pos };
        let reply: WriteAttrReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(WriteAttrRequest::NAME, Some(name), false)?;
            a.allocate_data(WriteAttrRequest::BUFFER, Some(data), 1, false)
        })?;
        check(reply.error)?;
        Ok(reply.bytes_written)
    }

    /// Type and size of attribute `name`.
    pub fn read_attr_stat(&self, volume: u64, node: u64, name: &str) -> ClientResult<AttrInfo> {
        let request = ReadAttrStatRequest { ctx: self.ctx, volume, node };
        let reply: ReadAttrStatReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(ReadAttrStatRequest::NAME, Some(name), false)
        })?;
        check(reply.error)?;
        Ok(reply.info)
    }

    /// Removes attribute `name`.
    pub fn remove_attr(&self, volume: u64, node: u64, name: &str) -> ClientResult<()> {
        let request = RemoveAttrRequest { ctx: self.ctx, volume, node };
        let reply: RemoveAttrReply = self.call(|a| {
            a.allocate_request(&request)?;
            a.allocate_string(RemoveAttrRequest::NAME, Some(name), false)
        })?;
        check(reply.error)
    }

    /// Sends `UfsDisconnectRequest` on every port, ending the server's threads.
    pub fn disconnect(mut self) -> ClientResult<()> {
        let mut ports = Vec::new();
        while let Ok(port) = self.pool.try_acquire() {
            ports.push(port);
        }
        for port in &mut ports {
            port.send_request(|a| a.allocate_request(&UfsDisconnectRequest {}))?;
        }
        drop(ports);
        self.pool.disconnect();
        self.connection.send_request(|a| a.allocate_request(&UfsDisconnectRequest {}))?;
        Ok(())
    }
}
