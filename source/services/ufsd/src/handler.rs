// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Turns kernel requests into [`FileSystem`] calls and typed replies
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! INVARIANTS:
//!   - Every handled request is answered with its reply kind, errors included
//!   - Read-type replies are built around a deferred buffer the filesystem fills
//!   - Transfers are capped at MAX_TRANSFER_SIZE; larger reads come back short

use std::sync::Arc;

use parking_lot::Mutex;
use ufs_ipc::requests::*;
use ufs_ipc::{
    do_for_request, status, AddressField, Error, ReceivedRequest, RequestAllocator, RequestBody,
    RequestHandler, RequestPort, RequestVisitor, Result, Typed,
};

use crate::fs::{status_of, FileSystem, FsError, FsResult, MountParams};

/// Largest payload moved by a single read or write.
pub const MAX_TRANSFER_SIZE: usize = 16 * 1024 * 1024;

/// Serves requests for one filesystem instance.
pub struct UserlandRequestHandler<F> {
    fs: Arc<Mutex<F>>,
}

impl<F> Clone for UserlandRequestHandler<F> {
    fn clone(&self) -> Self {
        Self { fs: Arc::clone(&self.fs) }
    }
}

impl<F: FileSystem> UserlandRequestHandler<F> {
    /// Serves `fs`, which may be shared with other handlers.
    pub fn new(fs: Arc<Mutex<F>>) -> Self {
        Self { fs }
    }

    /// Shared filesystem.
    pub fn filesystem(&self) -> &Arc<Mutex<F>> {
        &self.fs
    }
}

impl<F: FileSystem> RequestHandler for UserlandRequestHandler<F> {
    fn handle_request(&mut self, port: &mut RequestPort, request: ReceivedRequest) -> Result<()> {
        let mut serve = Serve { fs: &self.fs, port };
        do_for_request(&request, &mut serve)?
    }
}

struct Serve<'a, F> {
    fs: &'a Mutex<F>,
    port: &'a mut RequestPort,
}

impl<F: FileSystem> RequestVisitor for Serve<'_, F> {
    type Output = Result<()>;

    fn visit<R: RequestBody>(&mut self, request: Typed<'_, R>) -> Result<()> {
        let source = request.source();
        log::debug!("ufsd: serving {}", R::KIND.name());
        self.serve(source, request.into_body().into())
    }
}

fn name_arg(name: Result<Option<String>>) -> FsResult<String> {
    match name {
        Ok(Some(name)) => Ok(name),
        Ok(None) | Err(_) => Err(FsError::InvalidArgument),
    }
}

fn transfer_size(requested: u64) -> usize {
    usize::try_from(requested).unwrap_or(usize::MAX).min(MAX_TRANSFER_SIZE)
}

fn is_build_error(err: Error) -> bool {
    matches!(err, Error::BadValue | Error::Capacity | Error::NoMemory)
}

impl<F: FileSystem> Serve<'_, F> {
    fn reply<R: RequestBody>(&mut self, reply: R) -> Result<()> {
        self.port.send_reply(|allocator| allocator.allocate_request(&reply))
    }

    /// Sends the reply built by `build`, or `failed(status)` if building it failed.
    fn reply_or_fail<R, B>(&mut self, build: B, failed: impl FnOnce(i32) -> R) -> Result<()>
    where
        R: RequestBody,
        B: FnOnce(&mut RequestAllocator<'_>) -> Result<()>,
    {
        match self.port.send_reply(build) {
            Err(err) if is_build_error(err) => {
                log::warn!("ufsd: failed to build {}: {err}", R::KIND.name());
                self.reply(failed(status::from_error(err)))
            }
            other => other,
        }
    }

    /// Replies with a deferred buffer of `size` bytes filled by `fill`.
    ///
    /// `finish` stores the status and the amount reported by `fill`, clamped
    /// to `limit`.
    fn reply_with_buffer<R, Fill, Finish>(
        &mut self,
        field: AddressField<R>,
        size: usize,
        limit: usize,
        fill: Fill,
        finish: Finish,
    ) -> Result<()>
    where
        R: RequestBody + Default,
        Fill: FnOnce(&mut F, &mut [u8]) -> FsResult<usize>,
        Finish: Fn(&mut R, i32, usize),
    {
        let fs = self.fs;
        let finish = &finish;
        self.reply_or_fail(
            |allocator| {
                allocator.allocate_request(&R::default())?;
                let mut slot = allocator.allocate_address(field, size, 8, true)?;
                let result = fill(&mut *fs.lock(), &mut slot[..]);
                drop(slot);
                let (error, done) = match result {
                    Ok(done) => (status::OK, done.min(limit)),
                    Err(err) => (err.status(), 0),
                };
                allocator.update_request(|reply: &mut R| finish(reply, error, done))
            },
            |error| {
                let mut reply = R::default();
                finish(&mut reply, error, 0);
                reply
            },
        )
    }

    fn serve(&mut self, source: &ReceivedRequest, request: Request) -> Result<()> {
        let fs = self.fs;
        match request {
            Request::MountVolumeRequest(req) => {
                let device = source.string(MountVolumeRequest::DEVICE).ok().flatten();
                let parameters = source.string(MountVolumeRequest::PARAMETERS).ok().flatten();
                let mut fs = fs.lock();
                let result = fs.mount(MountParams {
                    nsid: req.nsid,
                    device: device.as_deref(),
                    parameters: parameters.as_deref(),
                    flags: req.flags,
                });
                let capabilities = fs.capabilities();
                drop(fs);
                if let Ok(mounted) = &result {
                    log::info!("ufsd: mounted volume {} (nsid {})", mounted.volume, req.nsid);
                }
                let mounted = result.as_ref().copied().unwrap_or_default();
                self.reply(MountVolumeReply {
                    error: status_of(&result),
                    root_id: mounted.root,
                    volume: mounted.volume,
                    capabilities,
                })
            }
            Request::UnmountVolumeRequest(req) => {
                let result = fs.lock().unmount(req.volume);
                self.reply(UnmountVolumeReply { error: status_of(&result) })
            }
            Request::SyncVolumeRequest(req) => {
                let result = fs.lock().sync(req.volume);
                self.reply(SyncVolumeReply { error: status_of(&result) })
            }
            Request::ReadFsInfoRequest(req) => {
                let mut fs = fs.lock();
                let result = fs.read_fs_info(req.volume);
                let mut info = result.as_ref().cloned().unwrap_or_default();
                info.set_fsh_name(fs.name());
                drop(fs);
                self.reply(ReadFsInfoReply { error: status_of(&result), info })
            }
            Request::WriteFsInfoRequest(req) => {
                let result = fs.lock().write_fs_info(req.volume, &req.info, req.mask);
                self.reply(WriteFsInfoReply { error: status_of(&result) })
            }

            Request::LookupRequest(req) => {
                let result = name_arg(source.string(LookupRequest::ENTRY_NAME))
                    .and_then(|name| fs.lock().lookup(req.volume, req.node, &name));
                self.reply(LookupReply { error: status_of(&result), vnid: result.unwrap_or_default() })
            }
            Request::GetVNodeNameRequest(req) => {
                let result = fs.lock().get_vnode_name(req.volume, req.node).and_then(|name| {
                    if name.len() + 1 > req.size as usize {
                        Err(FsError::BufferOverflow)
                    } else {
                        Ok(name)
                    }
                });
                match result {
                    Ok(name) => self.reply_or_fail(
                        |allocator| {
                            allocator.allocate_request(&GetVNodeNameReply { error: status::OK })?;
                            allocator.allocate_string(GetVNodeNameReply::BUFFER, Some(&name), false)
                        },
                        |error| GetVNodeNameReply { error },
                    ),
                    Err(err) => self.reply(GetVNodeNameReply { error: err.status() }),
                }
            }
            Request::ReadVNodeRequest(req) => {
                let mut fs = fs.lock();
                let result = fs.read_vnode(req.volume, req.vnid, req.reenter);
                let capabilities = fs.capabilities();
                drop(fs);
                let vnode = result.as_ref().copied().unwrap_or_default();
                self.reply(ReadVNodeReply {
                    error: status_of(&result),
                    node: vnode.node,
                    node_type: vnode.node_type,
                    flags: vnode.flags,
                    capabilities,
                })
            }
            Request::WriteVNodeRequest(req) => {
                let result = fs.lock().write_vnode(req.volume, req.node, req.reenter);
                self.reply(WriteVNodeReply { error: status_of(&result) })
            }
            Request::FsRemoveVNodeRequest(req) => {
                let result = fs.lock().remove_vnode(req.volume, req.node, req.reenter);
                self.reply(FsRemoveVNodeReply { error: status_of(&result) })
            }

            Request::ReadSymlinkRequest(req) => self.reply_with_buffer(
                ReadSymlinkReply::BUFFER,
                req.size as usize,
                req.size as usize,
                |fs, buffer| fs.read_symlink(req.volume, req.node, buffer),
                |reply: &mut ReadSymlinkReply, error, done| {
                    reply.error = error;
                    reply.bytes_read = done as u32;
                },
            ),
            Request::CreateSymlinkRequest(req) => {
                let result = name_arg(source.string(CreateSymlinkRequest::NAME)).and_then(|name| {
                    let target = name_arg(source.string(CreateSymlinkRequest::TARGET))?;
                    fs.lock().create_symlink(req.volume, req.node, &name, &target, req.mode)
                });
                self.reply(CreateSymlinkReply { error: status_of(&result) })
            }
            Request::UnlinkRequest(req) => {
                let result = name_arg(source.string(UnlinkRequest::NAME))
                    .and_then(|name| fs.lock().unlink(req.volume, req.node, &name));
                self.reply(UnlinkReply { error: status_of(&result) })
            }
            Request::RenameRequest(req) => {
                let result = name_arg(source.string(RenameRequest::OLD_NAME)).and_then(|old| {
                    let new = name_arg(source.string(RenameRequest::NEW_NAME))?;
                    fs.lock().rename(req.volume, req.old_dir, &old, req.new_dir, &new)
                });
                self.reply(RenameReply { error: status_of(&result) })
            }
            Request::AccessRequest(req) => {
                let result = fs.lock().access(req.volume, req.node, req.mode);
                self.reply(AccessReply { error: status_of(&result) })
            }
            Request::ReadStatRequest(req) => {
                let result = fs.lock().read_stat(req.volume, req.node);
                self.reply(ReadStatReply {
                    error: status_of(&result),
                    st: result.unwrap_or_default(),
                })
            }
            Request::WriteStatRequest(req) => {
                let result = fs.lock().write_stat(req.volume, req.node, &req.st, req.mask);
                self.reply(WriteStatReply { error: status_of(&result) })
            }

            Request::CreateRequest(req) => {
                let result = name_arg(source.string(CreateRequest::NAME)).and_then(|name| {
                    fs.lock().create(req.volume, req.node, &name, req.open_mode, req.mode)
                });
                let created = result.as_ref().copied().unwrap_or_default();
                self.reply(CreateReply {
                    error: status_of(&result),
                    vnid: created.vnid,
                    file_cookie: created.cookie,
                })
            }
            Request::OpenRequest(req) => {
                let result = fs.lock().open(req.volume, req.node, req.open_mode);
                self.reply(OpenReply {
                    error: status_of(&result),
                    file_cookie: result.unwrap_or_default(),
                })
            }
            Request::CloseRequest(req) => {
                let result = fs.lock().close(req.volume, req.node, req.file_cookie);
                self.reply(CloseReply { error: status_of(&result) })
            }
            Request::FreeCookieRequest(req) => {
                let result = fs.lock().free_cookie(req.volume, req.node, req.file_cookie);
                self.reply(FreeCookieReply { error: status_of(&result) })
            }
            Request::ReadRequest(req) => self.reply_with_buffer(
                ReadReply::BUFFER,
                transfer_size(req.size),
                transfer_size(req.size),
                |fs, buffer| fs.read(req.volume, req.node, req.file_cookie, req.pos, buffer),
                |reply: &mut ReadReply, error, done| {
                    reply.error = error;
                    reply.bytes_read = done as u64;
                },
            ),
            Request::WriteRequest(req) => {
                let result = match source.data(WriteRequest::BUFFER) {
                    Ok(Some(data)) => {
                        let data = &data[..data.len().min(MAX_TRANSFER_SIZE)];
                        fs.lock().write(req.volume, req.node, req.file_cookie, req.pos, data)
                    }
                    Ok(None) => Ok(0),
                    Err(_) => Err(FsError::InvalidArgument),
                };
                self.reply(WriteReply {
                    error: status_of(&result),
                    bytes_written: result.unwrap_or_default() as u64,
                })
            }

            Request::CreateDirRequest(req) => {
                let result = name_arg(source.string(CreateDirRequest::NAME))
                    .and_then(|name| fs.lock().create_dir(req.volume, req.node, &name, req.mode));
                self.reply(CreateDirReply {
                    error: status_of(&result),
                    new_dir: result.unwrap_or_default(),
                })
            }
            Request::RemoveDirRequest(req) => {
                let result = name_arg(source.string(RemoveDirRequest::NAME))
                    .and_then(|name| fs.lock().remove_dir(req.volume, req.node, &name));
                self.reply(RemoveDirReply { error: status_of(&result) })
            }
            Request::OpenDirRequest(req) => {
                let result = fs.lock().open_dir(req.volume, req.node);
                self.reply(OpenDirReply {
                    error: status_of(&result),
                    dir_cookie: result.unwrap_or_default(),
                })
            }
            Request::CloseDirRequest(req) => {
                let result = fs.lock().close_dir(req.volume, req.node, req.dir_cookie);
                self.reply(CloseDirReply { error: status_of(&result) })
            }
            Request::FreeDirCookieRequest(req) => {
                let result = fs.lock().free_dir_cookie(req.volume, req.node, req.dir_cookie);
                self.reply(FreeDirCookieReply { error: status_of(&result) })
            }
            Request::ReadDirRequest(req) => self.reply_with_buffer(
                ReadDirReply::BUFFER,
                transfer_size(u64::from(req.buffer_size)),
                req.count as usize,
                |fs, buffer| {
                    fs.read_dir(req.volume, req.node, req.dir_cookie, buffer, req.count)
                        .map(|count| count as usize)
                },
                |reply: &mut ReadDirReply, error, count| {
                    reply.error = error;
                    reply.count = count as u32;
                },
            ),
            Request::RewindDirRequest(req) => {
                let result = fs.lock().rewind_dir(req.volume, req.node, req.dir_cookie);
                self.reply(RewindDirReply { error: status_of(&result) })
            }

            Request::ReadAttrRequest(req) => {
                let name = name_arg(source.string(ReadAttrRequest::NAME));
                self.reply_with_buffer(
                    ReadAttrReply::BUFFER,
                    transfer_size(req.size),
                    transfer_size(req.size),
                    |fs, buffer| fs.read_attr(req.volume, req.node, &name?, req.pos, buffer),
                    |reply: &mut ReadAttrReply, error, done| {
                        reply.error = error;
                        reply.bytes_read = done as u64;
                    },
                )
            }
            Request::WriteAttrRequest(req) => {
                let result = name_arg(source.string(WriteAttrRequest::NAME)).and_then(|name| {
                    let data = source
                        .data(WriteAttrRequest::BUFFER)
                        .map_err(|_| FsError::InvalidArgument)?;
                    let data = data.as_deref().unwrap_or(&[]);
                    fs.lock().write_attr(req.volume, req.node, &name, req.attr_type, req.pos, data)
                });
                self.reply(WriteAttrReply {
                    error: status_of(&result),
                    bytes_written: result.unwrap_or_default() as u64,
                })
            }
            Request::ReadAttrStatRequest(req) => {
                let result = name_arg(source.string(ReadAttrStatRequest::NAME))
                    .and_then(|name| fs.lock().read_attr_stat(req.volume, req.node, &name));
                self.reply(ReadAttrStatReply {
                    error: status_of(&result),
                    info: result.unwrap_or_default(),
                })
            }
            Request::RemoveAttrRequest(req) => {
                let result = name_arg(source.string(RemoveAttrRequest::NAME))
                    .and_then(|name| fs.lock().remove_attr(req.volume, req.node, &name));
                self.reply(RemoveAttrReply { error: status_of(&result) })
            }

            other => {
                log::warn!("ufsd: no handler for {}", other.kind().name());
                Err(Error::UnexpectedRequest(other.kind()))
            }
        }
    }
}
