// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Userland filesystem end-to-end tests
//! INTENT: Kernel-side client talking to a ufsd server over in-process kernel ports
//! DEPS: ufs-abi (ports, areas), ufs-ipc (transport), ufsd (server, client)
//! TESTS: Handshake, file data in and out of areas, attributes, directories,
//!        unsupported operations, concurrent callers, disconnect

use std::collections::{BTreeMap, HashMap};
use std::thread;

use ufs_abi::Kernel;
use ufs_ipc::wire::{AttrInfo, Stat};
use ufs_ipc::TransportConfig;
use ufsd::dirent::DirentWriter;
use ufsd::{
    ClientError, Created, FileSystem, FsError, FsResult, MountParams, Mounted, UfsClient,
    UserlandServer, VNodeInfo,
};

const ROOT: u64 = 1;
const VOLUME: u64 = 7;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

enum Content {
    File(Vec<u8>),
    Dir(BTreeMap<String, u64>),
}

struct Node {
    parent: u64,
    name: String,
    content: Content,
    attrs: BTreeMap<String, (u32, Vec<u8>)>,
}

#[derive(Default)]
struct MemoryFs {
    nodes: HashMap<u64, Node>,
    next_id: u64,
    next_cookie: u64,
    dir_cookies: HashMap<u64, usize>,
}

impl MemoryFs {
    fn node(&self, id: u64) -> FsResult<&Node> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, id: u64) -> FsResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FsError::NotFound)
    }

    fn entries(&self, dir: u64) -> FsResult<&BTreeMap<String, u64>> {
        match &self.node(dir)?.content {
            Content::Dir(entries) => Ok(entries),
            Content::File(_) => Err(FsError::NotADirectory),
        }
    }

    fn entries_mut(&mut self, dir: u64) -> FsResult<&mut BTreeMap<String, u64>> {
        match &mut self.node_mut(dir)?.content {
            Content::Dir(entries) => Ok(entries),
            Content::File(_) => Err(FsError::NotADirectory),
        }
    }

    fn file_mut(&mut self, id: u64) -> FsResult<&mut Vec<u8>> {
        match &mut self.node_mut(id)?.content {
            Content::File(bytes) => Ok(bytes),
            Content::Dir(_) => Err(FsError::IsADirectory),
        }
    }

    fn insert(&mut self, dir: u64, name: &str, content: Content) -> FsResult<u64> {
        if self.entries(dir)?.contains_key(name) {
            return Err(FsError::Exists);
        }
        self.next_id += 1;
        let id = self.next_id;
        self.entries_mut(dir)?.insert(name.to_string(), id);
        self.nodes.insert(
            id,
            Node { parent: dir, name: name.to_string(), content, attrs: BTreeMap::new() },
        );
        Ok(id)
    }

    fn cookie(&mut self) -> u64 {
        self.next_cookie += 1;
        self.next_cookie
    }
}

fn offset(pos: i64) -> FsResult<usize> {
    usize::try_from(pos).map_err(|_| FsError::InvalidArgument)
}

fn copy_out(source: &[u8], pos: i64, buffer: &mut [u8]) -> FsResult<usize> {
    let start = offset(pos)?.min(source.len());
    let len = buffer.len().min(source.len() - start);
    buffer[..len].copy_from_slice(&source[start..start + len]);
    Ok(len)
}

fn copy_in(target: &mut Vec<u8>, pos: i64, data: &[u8]) -> FsResult<usize> {
    let start = offset(pos)?;
    if target.len() < start + data.len() {
        target.resize(start + data.len(), 0);
    }
    target[start..start + data.len()].copy_from_slice(data);
    Ok(data.len())
}

impl FileSystem for MemoryFs {
    fn name(&self) -> &str {
        "memfs"
    }

    fn capabilities(&self) -> u64 {
        0x3
    }

    fn mount(&mut self, params: MountParams<'_>) -> FsResult<Mounted> {
        if params.parameters == Some("fail") {
            return Err(FsError::InvalidArgument);
        }
        self.next_id = ROOT;
        self.nodes.insert(
            ROOT,
            Node {
                parent: ROOT,
                name: "/".to_string(),
                content: Content::Dir(BTreeMap::new()),
                attrs: BTreeMap::new(),
            },
        );
        Ok(Mounted { volume: VOLUME, root: ROOT })
    }

    fn unmount(&mut self, _volume: u64) -> FsResult<()> {
        self.nodes.clear();
        Ok(())
    }

    fn lookup(&mut self, _volume: u64, dir: u64, name: &str) -> FsResult<u64> {
        self.entries(dir)?.get(name).copied().ok_or(FsError::NotFound)
    }

    fn get_vnode_name(&mut self, _volume: u64, node: u64) -> FsResult<String> {
        Ok(self.node(node)?.name.clone())
    }

    fn read_vnode(&mut self, _volume: u64, vnid: u64, _reenter: bool) -> FsResult<VNodeInfo> {
        let node_type = match self.node(vnid)?.content {
            Content::Dir(_) => S_IFDIR,
            Content::File(_) => S_IFREG,
        };
        Ok(VNodeInfo { node: vnid, node_type, flags: 0 })
    }

    fn unlink(&mut self, _volume: u64, dir: u64, name: &str) -> FsResult<()> {
        let id = self.lookup(VOLUME, dir, name)?;
        if matches!(self.node(id)?.content, Content::Dir(_)) {
            return Err(FsError::IsADirectory);
        }
        self.entries_mut(dir)?.remove(name);
        self.nodes.remove(&id);
        Ok(())
    }

    fn rename(
        &mut self,
        _volume: u64,
        old_dir: u64,
        old_name: &str,
        new_dir: u64,
        new_name: &str,
    ) -> FsResult<()> {
        if self.entries(new_dir)?.contains_key(new_name) {
            return Err(FsError::Exists);
        }
        let id = self.entries_mut(old_dir)?.remove(old_name).ok_or(FsError::NotFound)?;
        self.entries_mut(new_dir)?.insert(new_name.to_string(), id);
        let node = self.node_mut(id)?;
        node.parent = new_dir;
        node.name = new_name.to_string();
        Ok(())
    }

    fn read_stat(&mut self, _volume: u64, node: u64) -> FsResult<Stat> {
        let (mode, size) = match &self.node(node)?.content {
            Content::Dir(entries) => (S_IFDIR | 0o755, entries.len() as i64),
            Content::File(bytes) => (S_IFREG | 0o644, bytes.len() as i64),
        };
        Ok(Stat { ino: node, mode, nlink: 1, size, blksize: 4096, ..Default::default() })
    }

    fn create(
        &mut self,
        _volume: u64,
        dir: u64,
        name: &str,
        _open_mode: i32,
        _mode: u32,
    ) -> FsResult<Created> {
        let vnid = self.insert(dir, name, Content::File(Vec::new()))?;
        Ok(Created { vnid, cookie: self.cookie() })
    }

    fn open(&mut self, _volume: u64, node: u64, _open_mode: i32) -> FsResult<u64> {
        self.file_mut(node)?;
        Ok(self.cookie())
    }

    fn close(&mut self, _volume: u64, _node: u64, _cookie: u64) -> FsResult<()> {
        Ok(())
    }

    fn free_cookie(&mut self, _volume: u64, _node: u64, _cookie: u64) -> FsResult<()> {
        Ok(())
    }

    fn read(
        &mut self,
        _volume: u64,
        node: u64,
        _cookie: u64,
        pos: i64,
        buffer: &mut [u8],
    ) -> FsResult<usize> {
        let bytes = self.file_mut(node)?;
        copy_out(bytes, pos, buffer)
    }

    fn write(
        &mut self,
        _volume: u64,
        node: u64,
        _cookie: u64,
        pos: i64,
        data: &[u8],
    ) -> FsResult<usize> {
        copy_in(self.file_mut(node)?, pos, data)
    }

    fn create_dir(&mut self, _volume: u64, dir: u64, name: &str, _mode: u32) -> FsResult<u64> {
        self.insert(dir, name, Content::Dir(BTreeMap::new()))
    }

    fn remove_dir(&mut self, _volume: u64, dir: u64, name: &str) -> FsResult<()> {
        let id = self.lookup(VOLUME, dir, name)?;
        if !self.entries(id)?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        self.entries_mut(dir)?.remove(name);
        self.nodes.remove(&id);
        Ok(())
    }

    fn open_dir(&mut self, _volume: u64, node: u64) -> FsResult<u64> {
        self.entries(node)?;
        let cookie = self.cookie();
        self.dir_cookies.insert(cookie, 0);
        Ok(cookie)
    }

    fn close_dir(&mut self, _volume: u64, _node: u64, cookie: u64) -> FsResult<()> {
        self.dir_cookies.get(&cookie).map(drop).ok_or(FsError::BadCookie)
    }

    fn free_dir_cookie(&mut self, _volume: u64, _node: u64, cookie: u64) -> FsResult<()> {
        self.dir_cookies.remove(&cookie).map(drop).ok_or(FsError::BadCookie)
    }

    fn read_dir(
        &mut self,
        _volume: u64,
        node: u64,
        cookie: u64,
        buffer: &mut [u8],
        count: u32,
    ) -> FsResult<u32> {
        let position = *self.dir_cookies.get(&cookie).ok_or(FsError::BadCookie)?;
        let entries: Vec<(String, u64)> =
            self.entries(node)?.iter().map(|(name, id)| (name.clone(), *id)).collect();
        let mut writer = DirentWriter::new(buffer);
        let mut next = position;
        for (name, id) in entries.iter().skip(position) {
            if writer.count() == count || !writer.push(*id, name)? {
                break;
            }
            next += 1;
        }
        if writer.is_empty() && next < entries.len() {
            return Err(FsError::BufferOverflow);
        }
        self.dir_cookies.insert(cookie, next);
        Ok(writer.count())
    }

    fn rewind_dir(&mut self, _volume: u64, _node: u64, cookie: u64) -> FsResult<()> {
        let position = self.dir_cookies.get_mut(&cookie).ok_or(FsError::BadCookie)?;
        *position = 0;
        Ok(())
    }

    fn read_attr(
        &mut self,
        _volume: u64,
        node: u64,
        name: &str,
        pos: i64,
        buffer: &mut [u8],
    ) -> FsResult<usize> {
        let (_, value) = self.node(node)?.attrs.get(name).ok_or(FsError::NotFound)?;
        copy_out(value, pos, buffer)
    }

    fn write_attr(
        &mut self,
        _volume: u64,
        node: u64,
        name: &str,
        attr_type: u32,
        pos: i64,
        data: &[u8],
    ) -> FsResult<usize> {
        let attrs = &mut self.node_mut(node)?.attrs;
        let (stored_type, value) = attrs.entry(name.to_string()).or_default();
        *stored_type = attr_type;
        copy_in(value, pos, data)
    }

    fn read_attr_stat(&mut self, _volume: u64, node: u64, name: &str) -> FsResult<AttrInfo> {
        let (attr_type, value) = self.node(node)?.attrs.get(name).ok_or(FsError::NotFound)?;
        Ok(AttrInfo { attr_type: *attr_type, size: value.len() as i64 })
    }

    fn remove_attr(&mut self, _volume: u64, node: u64, name: &str) -> FsResult<()> {
        self.node_mut(node)?.attrs.remove(name).map(drop).ok_or(FsError::NotFound)
    }
}

struct Harness {
    kernel: Kernel,
    server: UserlandServer<MemoryFs>,
    client: UfsClient,
    root: u64,
}

fn start(port_count: usize) -> Harness {
    let kernel = Kernel::new();
    let config = TransportConfig { port_count, ..Default::default() };
    let server = UserlandServer::start(&kernel, MemoryFs::default(), &config).unwrap();
    let client = UfsClient::connect(&kernel, server.connection_info(), "memfs", &config).unwrap();
    assert_eq!(client.capabilities(), 0x3);
    let mounted = client.mount(1, None, Some("mode=rw")).unwrap();
    assert_eq!(mounted, Mounted { volume: VOLUME, root: ROOT });
    Harness { kernel, server, client, root: mounted.root }
}

fn finish(harness: Harness) {
    let Harness { kernel, server, client, .. } = harness;
    client.unmount(VOLUME).unwrap();
    client.disconnect().unwrap();
    server.join().unwrap();
    assert_eq!(kernel.area_count(), 0);
    assert_eq!(kernel.port_count(), 0);
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn file_data_roundtrip() {
    let harness = start(2);
    let client = &harness.client;

    let Created { vnid, cookie } = client.create(VOLUME, harness.root, "hello.txt", 2, 0o644).unwrap();
    assert_eq!(client.lookup(VOLUME, harness.root, "hello.txt").unwrap(), vnid);
    assert_eq!(client.get_vnode_name(VOLUME, vnid).unwrap(), "hello.txt");
    assert_eq!(client.read_vnode(VOLUME, vnid).unwrap().node_type, S_IFREG);

    assert_eq!(client.write(VOLUME, vnid, cookie, 0, b"hello world").unwrap(), 11);
    assert_eq!(client.read(VOLUME, vnid, cookie, 6, 64).unwrap(), b"world");
    assert!(client.read(VOLUME, vnid, cookie, 4096, 64).unwrap().is_empty());

    // Larger than a port buffer in both directions.
    let big = pattern(100 * 1024);
    assert_eq!(client.write(VOLUME, vnid, cookie, 0, &big).unwrap(), big.len() as u64);
    assert_eq!(harness.kernel.area_count(), 0);
    assert_eq!(client.read(VOLUME, vnid, cookie, 0, big.len() as u64).unwrap(), big);
    assert_eq!(harness.kernel.area_count(), 0);
    assert_eq!(client.read_stat(VOLUME, vnid).unwrap().size, big.len() as i64);

    client.close(VOLUME, vnid, cookie).unwrap();
    let cookie = client.open(VOLUME, vnid, 0).unwrap();
    assert_eq!(client.read(VOLUME, vnid, cookie, 10, 4).unwrap(), &big[10..14]);
    client.close(VOLUME, vnid, cookie).unwrap();

    assert_eq!(
        client.lookup(VOLUME, harness.root, "missing"),
        Err(ClientError::Fs(FsError::NotFound))
    );
    finish(harness);
}

#[test]
fn attributes_roundtrip() {
    let harness = start(1);
    let client = &harness.client;
    let Created { vnid, .. } = client.create(VOLUME, harness.root, "tagged", 2, 0o644).unwrap();

    assert_eq!(client.write_attr(VOLUME, vnid, "user.note", 0x54455854, 0, b"remember").unwrap(), 8);
    let info = client.read_attr_stat(VOLUME, vnid, "user.note").unwrap();
    assert_eq!((info.attr_type, info.size), (0x54455854, 8));
    assert_eq!(client.read_attr(VOLUME, vnid, "user.note", 2, 100).unwrap(), b"member");

    let blob = pattern(20 * 1024);
    client.write_attr(VOLUME, vnid, "user.blob", 0, 0, &blob).unwrap();
    assert_eq!(client.read_attr(VOLUME, vnid, "user.blob", 0, blob.len() as u64).unwrap(), blob);

    client.remove_attr(VOLUME, vnid, "user.note").unwrap();
    assert_eq!(
        client.read_attr_stat(VOLUME, vnid, "user.note"),
        Err(ClientError::Fs(FsError::NotFound))
    );
    finish(harness);
}

#[test]
fn directory_listing_and_namespace_changes() {
    let harness = start(2);
    let client = &harness.client;
    let docs = client.create_dir(VOLUME, harness.root, "docs", 0o755).unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        client.create(VOLUME, docs, name, 2, 0o644).unwrap();
    }
    assert_eq!(
        client.create(VOLUME, docs, "a", 2, 0o644),
        Err(ClientError::Fs(FsError::Exists))
    );

    let cookie = client.open_dir(VOLUME, docs).unwrap();
    let mut names = Vec::new();
    loop {
        let batch = client.read_dir(VOLUME, docs, cookie, 64, 2).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 2);
        names.extend(batch.into_iter().map(|(_, name)| name));
    }
    assert_eq!(names, ["a", "b", "c", "d", "e"]);

    client.rewind_dir(VOLUME, docs, cookie).unwrap();
    let first = client.read_dir(VOLUME, docs, cookie, 4096, 100).unwrap();
    assert_eq!(first.len(), 5);
    assert_eq!(first[0].0, client.lookup(VOLUME, docs, "a").unwrap());
    client.close_dir(VOLUME, docs, cookie).unwrap();
    assert_eq!(
        client.rewind_dir(VOLUME, docs, cookie),
        Err(ClientError::Fs(FsError::BadCookie))
    );

    assert_eq!(
        client.remove_dir(VOLUME, harness.root, "docs"),
        Err(ClientError::Fs(FsError::NotEmpty))
    );
    client.rename(VOLUME, docs, "a", harness.root, "moved").unwrap();
    assert!(client.lookup(VOLUME, harness.root, "moved").is_ok());
    for name in ["b", "c", "d", "e"] {
        client.unlink(VOLUME, docs, name).unwrap();
    }
    client.remove_dir(VOLUME, harness.root, "docs").unwrap();
    assert_eq!(
        client.lookup(VOLUME, harness.root, "docs"),
        Err(ClientError::Fs(FsError::NotFound))
    );
    finish(harness);
}

#[test]
fn unsupported_and_failed_operations_report_status() {
    let harness = start(1);
    let client = &harness.client;
    assert_eq!(
        client.read_symlink(VOLUME, harness.root, 256),
        Err(ClientError::Fs(FsError::Unsupported))
    );
    assert_eq!(
        client.create_symlink(VOLUME, harness.root, "link", "/target"),
        Err(ClientError::Fs(FsError::Unsupported))
    );
    assert_eq!(client.sync(VOLUME), Err(ClientError::Fs(FsError::Unsupported)));
    assert_eq!(
        client.mount(2, None, Some("fail")),
        Err(ClientError::Fs(FsError::InvalidArgument))
    );
    finish(harness);
}

#[test]
fn concurrent_callers_share_the_port_pool() {
    let harness = start(3);
    let client = &harness.client;
    let root = harness.root;
    thread::scope(|scope| {
        for worker in 0..6u8 {
            scope.spawn(move || {
                let name = format!("file-{worker}");
                let Created { vnid, cookie } = client.create(VOLUME, root, &name, 2, 0o644).unwrap();
                let data = vec![worker; 8 * 1024];
                client.write(VOLUME, vnid, cookie, 0, &data).unwrap();
                assert_eq!(client.read(VOLUME, vnid, cookie, 0, 8 * 1024).unwrap(), data);
                client.close(VOLUME, vnid, cookie).unwrap();
            });
        }
    });
    assert_eq!(client.port_pool().free_count(), 3);
    finish(harness);
}

#[test]
fn unknown_filesystem_is_refused() {
    let kernel = Kernel::new();
    let config = TransportConfig::default();
    let server = UserlandServer::start(&kernel, MemoryFs::default(), &config).unwrap();
    let refused = UfsClient::connect(&kernel, server.connection_info(), "otherfs", &config);
    assert!(matches!(refused, Err(ClientError::Fs(FsError::NotFound))));
    server.shutdown().unwrap();
    assert_eq!(kernel.port_count(), 0);
}
